// packages/rwnotify/src/config.rs
use crate::error::AppError;
use crate::validation::TrackingWindow;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CAR_PLACES_URL: &str = "https://pass.rw.by/ru/ajax/route/car_places";
pub const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";
/// 默认查询的车厢类别代码
pub const DEFAULT_CAR_TYPES: [u32; 2] = [3, 4];

/// SOCKS5 代理配置，只作用于查询余票的 HTTP 客户端
#[derive(Clone, Debug, PartialEq)]
pub struct ProxyConfig {
    pub addr: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub bot_token: String,
    pub telegram_api_url: String,
    pub car_places_url: String,
    /// 需要查询的车厢类别代码，每个类别单独请求一次
    pub car_types: Vec<u32>,
    pub proxy: Option<ProxyConfig>,
    pub data_file: PathBuf,
    pub poll_interval: Duration,
    pub http_timeout: Duration,
    /// getUpdates 长轮询的服务端等待时间
    pub long_poll_timeout: Duration,
    pub window: TrackingWindow,
}

impl Config {
    /// 从环境变量构建配置。只有 RWNOTIFY_TOKEN 是必需的。
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bot_token = get("RWNOTIFY_TOKEN")
            .ok_or_else(|| AppError::Config("RWNOTIFY_TOKEN is not set".to_string()))?;

        let proxy = get("RWNOTIFY_PROXY_IP").map(|addr| ProxyConfig {
            addr,
            user: get("RWNOTIFY_PROXY_USER"),
            password: get("RWNOTIFY_PROXY_PASSWORD"),
        });

        let poll_secs = parse_number(get("RWNOTIFY_POLL_INTERVAL_SECS"), "RWNOTIFY_POLL_INTERVAL_SECS", 60)?;
        let past_days = parse_number(get("RWNOTIFY_WINDOW_PAST_DAYS"), "RWNOTIFY_WINDOW_PAST_DAYS", 2)?;
        let future_days = parse_number(get("RWNOTIFY_WINDOW_FUTURE_DAYS"), "RWNOTIFY_WINDOW_FUTURE_DAYS", 32)?;

        let car_types = match get("RWNOTIFY_CAR_TYPES") {
            None => DEFAULT_CAR_TYPES.to_vec(),
            Some(raw) => parse_car_types(&raw)?,
        };

        Ok(Self {
            bot_token,
            telegram_api_url: get("RWNOTIFY_TELEGRAM_API_URL").unwrap_or_else(|| DEFAULT_TELEGRAM_API_URL.to_string()),
            car_places_url: get("RWNOTIFY_CAR_PLACES_URL").unwrap_or_else(|| DEFAULT_CAR_PLACES_URL.to_string()),
            car_types,
            proxy,
            data_file: get("RWNOTIFY_DATA_FILE").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("data.json")),
            poll_interval: Duration::from_secs(poll_secs.max(1)),
            http_timeout: Duration::from_secs(30),
            long_poll_timeout: Duration::from_secs(30),
            window: TrackingWindow::new(past_days, future_days),
        })
    }
}

fn parse_number(raw: Option<String>, key: &str, default: u64) -> Result<u64, AppError> {
    match raw {
        None => Ok(default),
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{} must be a non-negative integer, got '{}'", key, v))),
    }
}

/// 逗号分隔的类别代码，例如 "3,4"
fn parse_car_types(raw: &str) -> Result<Vec<u32>, AppError> {
    let types = raw
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| {
            t.parse()
                .map_err(|_| AppError::Config(format!("RWNOTIFY_CAR_TYPES has a bad entry '{}'", t)))
        })
        .collect::<Result<Vec<u32>, _>>()?;
    if types.is_empty() {
        return Err(AppError::Config("RWNOTIFY_CAR_TYPES lists no categories".to_string()));
    }
    Ok(types)
}
