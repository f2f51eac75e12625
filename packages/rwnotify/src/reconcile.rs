// packages/rwnotify/src/reconcile.rs
use crate::{
    fetcher::AvailabilityFetcher,
    notifier::Outbox,
    store::SubscriptionStore,
    types::Route,
    validation::TrackingWindow,
};
use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// 一轮对账的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub checked: usize,
    pub invalid: usize,
    pub updated: usize,
    pub dropped: usize,
    pub notified: usize,
}

/// 执行一轮对账。整轮都持有 store 锁 (包括网络请求和写盘)。
pub async fn reconcile_once<F: AvailabilityFetcher>(
    store: &SubscriptionStore,
    fetcher: &F,
    outbox: &Outbox,
    window: TrackingWindow,
    today: NaiveDate,
) -> ReconcileReport {
    let mut subs = store.lock().await;
    let mut report = ReconcileReport::default();

    // 1. 先收集要丢弃的线路，不在遍历中修改
    let mut to_drop: Vec<Route> = Vec::new();
    let mut to_check = Vec::new();
    for (route, cached) in subs.tracked_routes() {
        if !window.contains(route.date, today) || !subs.has_active_watcher(&route) {
            to_drop.push(route);
        } else {
            to_check.push((route, cached));
        }
    }

    // 2. 重新查询，有变化才通知并覆盖缓存
    for (route, cached) in to_check {
        report.checked += 1;
        let fresh = fetcher.fetch(&route).await;
        if !fresh.valid {
            report.invalid += 1;
            debug!("[RECONCILE] {}: no valid data this pass, keeping cached snapshot", route);
            continue;
        }
        if fresh == cached {
            continue;
        }

        info!("🔄 [RECONCILE] Updated info for route {}, sending notifications", route);
        for user_id in subs.active_watchers(&route) {
            report.notified += outbox.notify_change(user_id, &route, &cached, &fresh);
        }
        subs.update_snapshot(&route, fresh);
        report.updated += 1;
    }

    // 3. 驱逐
    for route in &to_drop {
        info!("🗑️ [RECONCILE] Dropping route {}", route);
        subs.evict(route);
        report.dropped += 1;
    }

    // 4. 整份写盘
    store.persist(&subs).await;

    if report.updated > 0 || report.dropped > 0 {
        info!("[RECONCILE] Pass finished: {:?}", report);
    }
    report
}

/// 后台定时对账任务
pub async fn reconcile_task<F: AvailabilityFetcher>(
    store: SubscriptionStore,
    fetcher: Arc<F>,
    outbox: Outbox,
    window: TrackingWindow,
    period: Duration,
) {
    info!("🚂 Reconcile loop started. Interval: {:?}, window: {:?}", period, window);

    let mut timer = interval(period);
    // 一轮耗时超过间隔时顺延，不要连续补跑
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        timer.tick().await;
        let today = Utc::now().date_naive();
        reconcile_once(&store, fetcher.as_ref(), &outbox, window, today).await;
    }
}
