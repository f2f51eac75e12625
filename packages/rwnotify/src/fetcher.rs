// packages/rwnotify/src/fetcher.rs

use crate::{
    config::{Config, ProxyConfig},
    error::AppError,
    types::{AvailabilitySnapshot, CarPlacesResponse, Route},
};
use reqwest::{Client, Proxy};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36";

/// 查询一条线路的余票。实现方必须吞掉所有网络/解析错误，
/// 失败只体现为 `valid == false`。
pub trait AvailabilityFetcher: Send + Sync {
    fn fetch(&self, route: &Route) -> impl Future<Output = AvailabilitySnapshot> + Send;
}

/// 单个车厢类别的查询结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryAvailability {
    pub has_places: bool,
    pub has_lower_places: bool,
}

/// 把一份结构正确的响应归约为是否有票。`tariffs` 缺失或不是列表时返回 `None`。
pub fn reduce_response(response: &CarPlacesResponse) -> Option<CategoryAvailability> {
    let tariffs = response.tariffs.as_ref()?;
    let mut result = CategoryAvailability::default();

    let cars = tariffs
        .iter()
        .filter_map(|t| t.as_ref())
        .filter_map(|t| t.cars.as_ref())
        .flatten()
        .filter_map(|c| c.as_ref());

    for car in cars {
        if car.total_places.as_ref().is_some_and(|n| *n != 0.0) {
            result.has_places = true;
        }
        if car.lower_places.as_ref().is_some_and(|n| *n != 0.0) {
            result.has_lower_places = true;
        }
    }
    Some(result)
}

/// 合并各类别结果：任一类别成功即 valid，任一类别有票即有票
pub fn merge<I>(results: I) -> AvailabilitySnapshot
where
    I: IntoIterator<Item = Option<CategoryAvailability>>,
{
    results
        .into_iter()
        .flatten()
        .fold(AvailabilitySnapshot::default(), |acc, c| AvailabilitySnapshot {
            valid: true,
            has_places: acc.has_places || c.has_places,
            has_lower_places: acc.has_lower_places || c.has_lower_places,
        })
}

/// 解析响应正文。顶层必须是 JSON 对象。
pub fn parse_body(body: &str) -> Result<CarPlacesResponse, AppError> {
    let value: serde_json::Value = serde_json::from_str(body)?;
    if !value.is_object() {
        return Err(AppError::Json(serde::de::Error::custom("top-level document is not an object")));
    }
    Ok(CarPlacesResponse::deserialize(value)?)
}

/// pass.rw.by 客户端
#[derive(Clone)]
pub struct RwClient {
    client: Client,
    base_url: String,
    car_types: Vec<u32>,
}

impl RwClient {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        let client = build_client(config.proxy.as_ref(), config.http_timeout)?;
        Ok(Self::with_client(client, config.car_places_url.clone(), config.car_types.clone()))
    }

    pub fn with_client(client: Client, base_url: String, car_types: Vec<u32>) -> Self {
        Self {
            client,
            base_url,
            car_types,
        }
    }

    async fn fetch_category(&self, route: &Route, car_type: u32) -> Result<CategoryAvailability, AppError> {
        let date = route.date_str();
        let car_type = car_type.to_string();
        let res = self
            .client
            .get(&self.base_url)
            .query(&[
                ("from", route.from.as_str()),
                ("to", route.to.as_str()),
                ("date", date.as_str()),
                ("train_number", route.number.as_str()),
                ("car_type", car_type.as_str()),
            ])
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(AppError::UpstreamError(res.status()));
        }

        let body = res.text().await?;
        let response = parse_body(&body)?;
        reduce_response(&response).ok_or_else(|| {
            AppError::Json(serde::de::Error::custom("'tariffs' is absent or not a list"))
        })
    }
}

impl AvailabilityFetcher for RwClient {
    async fn fetch(&self, route: &Route) -> AvailabilitySnapshot {
        let mut results = Vec::with_capacity(self.car_types.len());
        // 每个类别独立请求，一个失败不影响其它类别；不重试
        for &car_type in &self.car_types {
            match self.fetch_category(route, car_type).await {
                Ok(c) => {
                    debug!("[FETCH] {} car_type={} -> {:?}", route, car_type, c);
                    results.push(Some(c));
                }
                Err(e) => {
                    warn!("❌ [FETCH] {} car_type={} failed: {}", route, car_type, e);
                    results.push(None);
                }
            }
        }
        merge(results)
    }
}

/// 代理 URL：socks5h://[user:password@]host:port，域名交给代理解析
pub fn proxy_url(proxy: &ProxyConfig) -> Result<Url, AppError> {
    let mut url = Url::parse(&format!("socks5h://{}", proxy.addr))
        .map_err(|e| AppError::ProxyClientBuild(format!("invalid proxy address '{}': {}", proxy.addr, e)))?;
    if url.host_str().is_none() || url.port().is_none() {
        return Err(AppError::ProxyClientBuild(format!(
            "proxy address '{}' must be host:port",
            proxy.addr
        )));
    }

    if proxy.user.is_some() || proxy.password.is_some() {
        url.set_username(proxy.user.as_deref().unwrap_or_default())
            .map_err(|_| AppError::ProxyClientBuild("cannot set proxy username".to_string()))?;
        url.set_password(proxy.password.as_deref())
            .map_err(|_| AppError::ProxyClientBuild("cannot set proxy password".to_string()))?;
    }
    Ok(url)
}

/// 构建查询客户端。配置了代理但无法使用时直接报错，不回退到直连。
pub fn build_client(proxy: Option<&ProxyConfig>, timeout: Duration) -> Result<Client, AppError> {
    let mut builder = Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .pool_idle_timeout(Duration::from_secs(90))
        .user_agent(USER_AGENT);

    if let Some(proxy) = proxy {
        let url = proxy_url(proxy)?;
        let proxy_obj = Proxy::all(url.as_str()).map_err(|e| AppError::ProxyClientBuild(e.to_string()))?;
        builder = builder.proxy(proxy_obj);
        info!("🧦 [HTTP] Using proxy {}", proxy.addr);
    }

    builder.build().map_err(|e| AppError::ProxyClientBuild(e.to_string()))
}
