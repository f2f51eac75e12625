// packages/rwnotify/src/types.rs

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// 消息通道里的用户标识 (Telegram user / chat id)
pub type UserId = i64;

// ==============================================================================
// 1. 核心领域模型
// ==============================================================================

/// 一趟具体的车次：车次号 + 出发站 + 到达站 + 出发日期。作为 map key 使用。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Route {
    // 字段顺序决定 Ord：先按日期，再按车次
    pub date: NaiveDate,
    pub number: String,
    pub from: String,
    pub to: String,
}

impl Route {
    pub fn new(number: impl Into<String>, from: impl Into<String>, to: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            date,
            number: number.into(),
            from: from.into(),
            to: to.into(),
        }
    }

    /// 远端接口和用户展示统一使用的日期格式
    pub fn date_str(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.number, self.date_str())
    }
}

/// 每条线路缓存的最近一次有效余票状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilitySnapshot {
    /// 至少有一个车厢类别成功返回了结构正确的数据
    pub valid: bool,
    pub has_places: bool,
    pub has_lower_places: bool,
}

// ==============================================================================
// 2. pass.rw.by car_places 接口的响应结构
// ==============================================================================

/// 宽松解码包装：字段缺失或类型不符时得到 `None`，而不是让整个文档解析失败。
#[derive(Debug, Clone, PartialEq)]
pub struct Lenient<T>(pub Option<T>);

impl<T> Default for Lenient<T> {
    fn default() -> Self {
        Lenient(None)
    }
}

impl<T> Lenient<T> {
    pub fn as_ref(&self) -> Option<&T> {
        self.0.as_ref()
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Lenient<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(Lenient(serde_json::from_value(value).ok()))
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct CarPlacesResponse {
    #[serde(default)]
    pub tariffs: Lenient<Vec<Lenient<Tariff>>>,
}

#[derive(Debug, Deserialize, Default)]
pub struct Tariff {
    #[serde(default)]
    pub cars: Lenient<Vec<Lenient<Car>>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Car {
    #[serde(default)]
    pub total_places: Lenient<f64>,
    #[serde(default)]
    pub lower_places: Lenient<f64>,
}

// ==============================================================================
// 3. 持久化镜像 (整份状态一次性写盘)
// ==============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateImage {
    #[serde(default)]
    pub routes: Vec<TrackedRouteImage>,
    #[serde(default)]
    pub users: Vec<UserImage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedRouteImage {
    pub route: Route,
    pub snapshot: AvailabilitySnapshot,
    #[serde(default)]
    pub watchers: Vec<EdgeImage<UserId>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserImage {
    pub user_id: UserId,
    #[serde(default)]
    pub routes: Vec<EdgeImage<Route>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeImage<K> {
    pub key: K,
    pub active: bool,
}
