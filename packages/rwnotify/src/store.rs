// packages/rwnotify/src/store.rs
use crate::{
    persistence,
    types::{AvailabilitySnapshot, EdgeImage, Route, StateImage, TrackedRouteImage, UserId, UserImage},
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

/// 三张表：被跟踪线路的余票缓存，以及 线路 -> 用户 / 用户 -> 线路 两个互为镜像的索引。
///
/// 字段全部私有，只能通过下面的方法修改，保证两个索引里同一条边的 active 标记一致。
#[derive(Debug, Default)]
pub struct Subscriptions {
    route_info: HashMap<Route, AvailabilitySnapshot>,
    route_users: HashMap<Route, HashMap<UserId, bool>>,
    user_routes: HashMap<UserId, HashMap<Route, bool>>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_tracked(&self, route: &Route) -> bool {
        self.route_info.contains_key(route)
    }

    pub fn snapshot(&self, route: &Route) -> Option<AvailabilitySnapshot> {
        self.route_info.get(route).copied()
    }

    pub fn tracked_len(&self) -> usize {
        self.route_info.len()
    }

    /// 所有被跟踪的线路及其缓存，按线路排序
    pub fn tracked_routes(&self) -> Vec<(Route, AvailabilitySnapshot)> {
        let mut routes: Vec<_> = self.route_info.iter().map(|(r, s)| (r.clone(), *s)).collect();
        routes.sort_by(|a, b| a.0.cmp(&b.0));
        routes
    }

    /// 把新线路放进跟踪表。已存在时覆盖缓存。
    pub fn track(&mut self, route: Route, snapshot: AvailabilitySnapshot) {
        self.route_info.insert(route, snapshot);
    }

    /// 只更新已被跟踪的线路，返回旧值
    pub fn update_snapshot(&mut self, route: &Route, snapshot: AvailabilitySnapshot) -> Option<AvailabilitySnapshot> {
        self.route_info.get_mut(route).map(|s| std::mem::replace(s, snapshot))
    }

    /// 两个索引同时置为 active，子表按需创建。线路必须已经在跟踪表里，否则不建边并返回 false。
    pub fn activate(&mut self, route: &Route, user: UserId) -> bool {
        if !self.is_tracked(route) {
            return false;
        }
        self.route_users.entry(route.clone()).or_default().insert(user, true);
        self.user_routes.entry(user).or_default().insert(route.clone(), true);
        true
    }

    /// 两个索引同时置为 inactive。边不存在时什么也不做，返回是否发生了变化。
    pub fn deactivate(&mut self, route: &Route, user: UserId) -> bool {
        let was_active = self.is_active(route, user);
        if let Some(flag) = self.route_users.get_mut(route).and_then(|users| users.get_mut(&user)) {
            *flag = false;
        }
        if let Some(flag) = self.user_routes.get_mut(&user).and_then(|routes| routes.get_mut(route)) {
            *flag = false;
        }
        was_active
    }

    pub fn is_active(&self, route: &Route, user: UserId) -> bool {
        self.route_users
            .get(route)
            .and_then(|users| users.get(&user))
            .copied()
            .unwrap_or(false)
    }

    pub fn has_active_watcher(&self, route: &Route) -> bool {
        self.route_users
            .get(route)
            .is_some_and(|users| users.values().any(|active| *active))
    }

    pub fn active_watchers(&self, route: &Route) -> Vec<UserId> {
        let mut users: Vec<UserId> = self
            .route_users
            .get(route)
            .map(|users| users.iter().filter(|(_, a)| **a).map(|(u, _)| *u).collect())
            .unwrap_or_default();
        users.sort_unstable();
        users
    }

    /// 用户当前 active 的线路。排序后与 /list 的编号一一对应。
    pub fn active_routes(&self, user: UserId) -> Vec<Route> {
        let mut routes: Vec<Route> = self
            .user_routes
            .get(&user)
            .map(|routes| routes.iter().filter(|(_, a)| **a).map(|(r, _)| r.clone()).collect())
            .unwrap_or_default();
        routes.sort();
        routes
    }

    /// 驱逐线路：先把 active 的边置为 inactive，再从两张索引和跟踪表里彻底删除这条线路的所有边。
    /// 返回当时仍在关注的用户。
    pub fn evict(&mut self, route: &Route) -> Vec<UserId> {
        let watchers = self.active_watchers(route);
        for &user in &watchers {
            self.deactivate(route, user);
        }

        if let Some(users) = self.route_users.remove(route) {
            for user in users.keys() {
                if let Some(routes) = self.user_routes.get_mut(user) {
                    routes.remove(route);
                    if routes.is_empty() {
                        self.user_routes.remove(user);
                    }
                }
            }
        }
        self.route_info.remove(route);
        watchers
    }

    /// 两个索引是否完全镜像 (边集合相同且 active 标记相同)
    pub fn is_consistent(&self) -> bool {
        let forward = self
            .route_users
            .iter()
            .flat_map(|(r, users)| users.iter().map(move |(u, a)| (r, *u, *a)))
            .all(|(r, u, a)| self.user_routes.get(&u).and_then(|routes| routes.get(r)) == Some(&a));
        let backward = self
            .user_routes
            .iter()
            .flat_map(|(u, routes)| routes.iter().map(move |(r, a)| (r, *u, *a)))
            .all(|(r, u, a)| self.route_users.get(r).and_then(|users| users.get(&u)) == Some(&a));
        forward && backward
    }

    /// 边是否存在于任一索引 (不论 active 与否)
    pub fn has_edge(&self, route: &Route, user: UserId) -> bool {
        self.route_users.get(route).is_some_and(|u| u.contains_key(&user))
            || self.user_routes.get(&user).is_some_and(|r| r.contains_key(route))
    }

    pub fn to_image(&self) -> StateImage {
        let routes = self
            .tracked_routes()
            .into_iter()
            .map(|(route, snapshot)| {
                let mut watchers: Vec<EdgeImage<UserId>> = self
                    .route_users
                    .get(&route)
                    .map(|users| users.iter().map(|(u, a)| EdgeImage { key: *u, active: *a }).collect())
                    .unwrap_or_default();
                watchers.sort_by_key(|e| e.key);
                TrackedRouteImage {
                    route,
                    snapshot,
                    watchers,
                }
            })
            .collect();

        let mut users: Vec<UserImage> = self
            .user_routes
            .iter()
            .map(|(user_id, routes)| {
                let mut routes: Vec<EdgeImage<Route>> = routes
                    .iter()
                    .map(|(r, a)| EdgeImage {
                        key: r.clone(),
                        active: *a,
                    })
                    .collect();
                routes.sort_by(|a, b| a.key.cmp(&b.key));
                UserImage {
                    user_id: *user_id,
                    routes,
                }
            })
            .collect();
        users.sort_by_key(|u| u.user_id);

        StateImage { routes, users }
    }

    /// 从磁盘镜像重建。只在一侧出现的边按 inactive 补齐，保证两个索引镜像一致。
    pub fn from_image(image: StateImage) -> Self {
        let mut subs = Self::new();

        for tracked in image.routes {
            for edge in tracked.watchers {
                subs.route_users
                    .entry(tracked.route.clone())
                    .or_default()
                    .insert(edge.key, edge.active);
            }
            subs.route_info.insert(tracked.route, tracked.snapshot);
        }
        for user in image.users {
            for edge in user.routes {
                subs.user_routes.entry(user.user_id).or_default().insert(edge.key, edge.active);
            }
        }

        subs.repair();
        subs
    }

    fn repair(&mut self) {
        let mut repaired = 0usize;

        // 指向未跟踪线路的边没有意义，直接丢弃
        let route_info = &self.route_info;
        self.route_users.retain(|r, _| route_info.contains_key(r));
        for routes in self.user_routes.values_mut() {
            let before = routes.len();
            routes.retain(|r, _| route_info.contains_key(r));
            repaired += before - routes.len();
        }
        self.user_routes.retain(|_, routes| !routes.is_empty());

        let edges: Vec<(Route, UserId, bool)> = self
            .route_users
            .iter()
            .flat_map(|(r, users)| users.iter().map(move |(u, a)| (r.clone(), *u, *a)))
            .collect();
        for (route, user, active) in edges {
            let mirror = self.user_routes.entry(user).or_default().entry(route.clone()).or_insert(false);
            if *mirror != active {
                repaired += 1;
                *mirror = false;
                if let Some(flag) = self.route_users.get_mut(&route).and_then(|u| u.get_mut(&user)) {
                    *flag = false;
                }
            }
        }

        let edges: Vec<(Route, UserId)> = self
            .user_routes
            .iter()
            .flat_map(|(u, routes)| routes.keys().map(move |r| (r.clone(), *u)))
            .collect();
        for (route, user) in edges {
            let users = self.route_users.entry(route.clone()).or_default();
            if !users.contains_key(&user) {
                repaired += 1;
                users.insert(user, false);
                if let Some(flag) = self.user_routes.get_mut(&user).and_then(|r| r.get_mut(&route)) {
                    *flag = false;
                }
            }
        }

        if repaired > 0 {
            warn!("🩹 [STORE] Repaired {} inconsistent subscription edges while loading", repaired);
        }
    }
}

/// 共享状态：一把锁保护全部三张表，外加状态文件路径。
///
/// 复合操作 (查找 -> 可能的网络请求 -> 修改 -> 写盘) 需要在整个过程中持有 [`SubscriptionStore::lock`] 返回的 guard。
#[derive(Clone)]
pub struct SubscriptionStore {
    inner: Arc<Mutex<Subscriptions>>,
    data_file: PathBuf,
}

impl SubscriptionStore {
    pub fn new(subscriptions: Subscriptions, data_file: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(subscriptions)),
            data_file: data_file.into(),
        }
    }

    /// 启动时读取状态文件。读取失败只记录警告，以空状态启动。
    pub async fn open(data_file: impl Into<PathBuf>) -> Self {
        let data_file = data_file.into();
        let subscriptions = match persistence::load_state(&data_file).await {
            Ok(image) => {
                let subs = Subscriptions::from_image(image);
                info!(
                    "💾 [STORE] Loaded {} tracked routes from {:?}",
                    subs.tracked_len(),
                    data_file
                );
                subs
            }
            Err(e) => {
                warn!("[STORE] Failed to load state from {:?}: {}. Starting empty.", data_file, e);
                Subscriptions::new()
            }
        };
        Self::new(subscriptions, data_file)
    }

    pub async fn lock(&self) -> MutexGuard<'_, Subscriptions> {
        self.inner.lock().await
    }

    pub fn data_file(&self) -> &Path {
        &self.data_file
    }

    /// 整份状态写盘。调用方必须持有锁 (传入 guard 下的引用)。失败只记录警告。
    pub async fn persist(&self, subscriptions: &Subscriptions) {
        if let Err(e) = persistence::save_state(&subscriptions.to_image(), &self.data_file).await {
            warn!("[STORE] Failed to save state to {:?}: {}", self.data_file, e);
        }
    }
}
