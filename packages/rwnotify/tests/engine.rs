// packages/rwnotify/tests/engine.rs
use chrono::NaiveDate;
use rwnotify::{
    commands::{self, add_route, list_routes, remove_route, Command},
    config::Config,
    error::{AddError, RemoveError},
    fetcher::AvailabilityFetcher,
    notifier::{ChangeKind, OutgoingMessage, Outbox},
    reconcile::reconcile_once,
    store::{SubscriptionStore, Subscriptions},
    types::{AvailabilitySnapshot, Route},
    validation::TrackingWindow,
    BotState,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedReceiver;

/// 按线路返回预设结果的假查询器，记录调用次数
#[derive(Default)]
struct ScriptedFetcher {
    results: Mutex<HashMap<Route, AvailabilitySnapshot>>,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    fn set(&self, route: &Route, snapshot: AvailabilitySnapshot) {
        self.results.lock().unwrap().insert(route.clone(), snapshot);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl AvailabilityFetcher for ScriptedFetcher {
    async fn fetch(&self, route: &Route) -> AvailabilitySnapshot {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // 让出执行权，模拟网络请求
        tokio::task::yield_now().await;
        self.results.lock().unwrap().get(route).copied().unwrap_or_default()
    }
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 5, 20).unwrap()
}

fn route(number: &str, day: u32) -> Route {
    Route::new(number, "2100050", "2100001", NaiveDate::from_ymd_opt(2025, 5, day).unwrap())
}

fn add_args(r: &Route) -> Vec<String> {
    vec![r.number.clone(), r.from.clone(), r.to.clone(), r.date_str()]
}

fn snap(has_places: bool, has_lower_places: bool) -> AvailabilitySnapshot {
    AvailabilitySnapshot {
        valid: true,
        has_places,
        has_lower_places,
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    store: SubscriptionStore,
    fetcher: ScriptedFetcher,
    outbox: Outbox,
    rx: UnboundedReceiver<OutgoingMessage>,
    window: TrackingWindow,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = SubscriptionStore::new(Subscriptions::new(), dir.path().join("data.json"));
        let (outbox, rx) = Outbox::channel();
        Self {
            _dir: dir,
            store,
            fetcher: ScriptedFetcher::default(),
            outbox,
            rx,
            window: TrackingWindow::default(),
        }
    }

    async fn add(&self, user: i64, r: &Route) -> Result<Route, AddError> {
        add_route(&self.store, &self.fetcher, &self.outbox, self.window, today(), user, &add_args(r)).await
    }

    async fn reconcile(&self) -> rwnotify::reconcile::ReconcileReport {
        reconcile_once(&self.store, &self.fetcher, &self.outbox, self.window, today()).await
    }

    fn drain(&mut self) -> Vec<OutgoingMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            out.push(msg);
        }
        out
    }
}

#[tokio::test]
async fn add_then_list_for_user_42() {
    let mut h = Harness::new();
    let r = Route::new("704Б", "2100050", "2100001", NaiveDate::from_ymd_opt(2025, 5, 25).unwrap());
    h.fetcher.set(&r, snap(true, false));

    assert_eq!(h.add(42, &r).await.unwrap(), r);
    {
        let subs = h.store.lock().await;
        assert_eq!(subs.snapshot(&r), Some(snap(true, false)));
        assert!(subs.is_active(&r, 42));
        assert!(subs.is_consistent());
    }

    let listed = list_routes(&h.store, 42).await.unwrap();
    assert_eq!(listed, vec![r.clone()]);
    assert_eq!(commands::format_list(&listed), "1. 704Б 2100050 2100001 2025-05-25\n");

    // 新线路会先收到一条 "正在获取数据" 的提示
    assert_eq!(h.drain().len(), 1);
    assert!(h.store.data_file().exists());
}

#[tokio::test]
async fn invalid_initial_fetch_stores_nothing() {
    let h = Harness::new();
    let r = route("704Б", 25);

    assert_eq!(h.add(42, &r).await, Err(AddError::InvalidRemoteData));
    let subs = h.store.lock().await;
    assert!(!subs.is_tracked(&r));
    assert!(!subs.has_edge(&r, 42));
}

#[tokio::test]
async fn second_subscriber_reuses_cached_route() {
    let h = Harness::new();
    let r = route("704Б", 25);
    h.fetcher.set(&r, snap(false, false));

    h.add(1, &r).await.unwrap();
    h.add(2, &r).await.unwrap();
    assert_eq!(h.fetcher.calls(), 1);
    assert_eq!(h.store.lock().await.active_watchers(&r), vec![1, 2]);
}

#[tokio::test]
async fn concurrent_adds_of_new_route_fetch_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = SubscriptionStore::new(Subscriptions::new(), dir.path().join("data.json"));
    let fetcher = Arc::new(ScriptedFetcher::default());
    let (outbox, _rx) = Outbox::channel();
    let r = route("704Б", 25);
    fetcher.set(&r, snap(true, true));

    let handles: Vec<_> = (0..8i64)
        .map(|user| {
            let store = store.clone();
            let fetcher = fetcher.clone();
            let outbox = outbox.clone();
            let args = add_args(&r);
            tokio::spawn(async move {
                add_route(&store, fetcher.as_ref(), &outbox, TrackingWindow::default(), today(), user, &args).await
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    assert_eq!(fetcher.calls(), 1);
    let subs = store.lock().await;
    assert_eq!(subs.active_watchers(&r).len(), 8);
    assert!(subs.is_consistent());
}

#[tokio::test]
async fn places_appeared_notifies_every_active_watcher() {
    let mut h = Harness::new();
    let r = route("704Б", 25);
    h.fetcher.set(&r, snap(false, false));
    h.add(1, &r).await.unwrap();
    h.add(2, &r).await.unwrap();
    h.add(3, &r).await.unwrap();
    remove_route(&h.store, 3, &["1".to_string()]).await.unwrap();
    h.drain();

    h.fetcher.set(&r, snap(true, false));
    let report = h.reconcile().await;
    assert_eq!(report.updated, 1);
    assert_eq!(report.notified, 2);

    let sent = h.drain();
    let expected = ChangeKind::PlacesAppeared.message(&r);
    assert_eq!(
        sent,
        vec![
            OutgoingMessage { user_id: 1, text: expected.clone() },
            OutgoingMessage { user_id: 2, text: expected },
        ]
    );
    assert_eq!(h.store.lock().await.snapshot(&r), Some(snap(true, false)));
}

#[tokio::test]
async fn reconcile_is_idempotent() {
    let mut h = Harness::new();
    let r = route("704Б", 25);
    h.fetcher.set(&r, snap(false, false));
    h.add(1, &r).await.unwrap();
    h.drain();

    h.fetcher.set(&r, snap(true, true));
    assert_eq!(h.reconcile().await.notified, 2);
    h.drain();

    let second = h.reconcile().await;
    assert_eq!(second.updated, 0);
    assert_eq!(second.notified, 0);
    assert!(h.drain().is_empty());
}

#[tokio::test]
async fn invalid_fetch_keeps_cached_snapshot() {
    let mut h = Harness::new();
    let r = route("704Б", 25);
    h.fetcher.set(&r, snap(true, false));
    h.add(1, &r).await.unwrap();
    h.drain();

    h.fetcher.set(&r, AvailabilitySnapshot::default());
    let report = h.reconcile().await;
    assert_eq!(report.invalid, 1);
    assert_eq!(report.updated, 0);
    assert!(h.drain().is_empty());
    assert_eq!(h.store.lock().await.snapshot(&r), Some(snap(true, false)));
}

#[tokio::test]
async fn unwatched_and_stale_routes_are_evicted() {
    let mut h = Harness::new();
    let unwatched = route("704Б", 25);
    let stale = route("612Б", 21);
    let kept = route("706Б", 26);
    for r in [&unwatched, &stale, &kept] {
        h.fetcher.set(r, snap(false, false));
        h.add(1, r).await.unwrap();
    }
    h.add(2, &unwatched).await.unwrap();
    remove_route(&h.store, 1, &["2".to_string()]).await.unwrap(); // 704Б (2025-05-25)
    remove_route(&h.store, 2, &["1".to_string()]).await.unwrap();
    h.drain();

    // 向后推进到 stale 超出两天的窗口
    let later = NaiveDate::from_ymd_opt(2025, 5, 24).unwrap();
    let report = reconcile_once(&h.store, &h.fetcher, &h.outbox, h.window, later).await;
    assert_eq!(report.dropped, 2);
    assert_eq!(report.checked, 1);

    let subs = h.store.lock().await;
    assert_eq!(subs.tracked_routes().len(), 1);
    assert!(subs.is_tracked(&kept));
    for (r, _) in subs.tracked_routes() {
        assert!(subs.has_active_watcher(&r));
    }
    for user in [1, 2] {
        assert!(!subs.has_edge(&unwatched, user));
        assert!(!subs.has_edge(&stale, user));
    }
    assert!(subs.is_consistent());
    drop(subs);

    assert!(h.drain().is_empty(), "eviction does not notify");
}

#[tokio::test]
async fn remove_out_of_range_mutates_nothing() {
    let h = Harness::new();
    let a = route("704Б", 25);
    let b = route("706Б", 26);
    for r in [&a, &b] {
        h.fetcher.set(r, snap(false, false));
        h.add(42, r).await.unwrap();
    }

    assert_eq!(
        remove_route(&h.store, 42, &["3".to_string()]).await,
        Err(RemoveError::NoSuchIndex(3))
    );
    assert_eq!(
        remove_route(&h.store, 42, &["0".to_string()]).await,
        Err(RemoveError::NoSuchIndex(0))
    );
    assert_eq!(
        remove_route(&h.store, 42, &["two".to_string()]).await,
        Err(RemoveError::BadFormat)
    );
    assert_eq!(remove_route(&h.store, 42, &[]).await, Err(RemoveError::BadFormat));
    assert_eq!(
        remove_route(&h.store, 7, &["1".to_string()]).await,
        Err(RemoveError::NothingTracked)
    );
    assert_eq!(list_routes(&h.store, 42).await.unwrap(), vec![a.clone(), b.clone()]);

    assert_eq!(remove_route(&h.store, 42, &["2".to_string()]).await, Ok(b.clone()));
    assert_eq!(list_routes(&h.store, 42).await.unwrap(), vec![a]);
    let subs = h.store.lock().await;
    assert!(subs.is_tracked(&b), "route stays until the next reconcile pass");
    assert!(subs.has_edge(&b, 42));
}

#[tokio::test]
async fn list_without_routes_is_explicit() {
    let h = Harness::new();
    assert_eq!(list_routes(&h.store, 42).await, None);
}

#[tokio::test]
async fn state_survives_restart() {
    let h = Harness::new();
    let r = route("704Б", 25);
    h.fetcher.set(&r, snap(true, false));
    h.add(42, &r).await.unwrap();

    let reopened = SubscriptionStore::open(h.store.data_file().to_path_buf()).await;
    let subs = reopened.lock().await;
    assert_eq!(subs.snapshot(&r), Some(snap(true, false)));
    assert!(subs.is_active(&r, 42));
    assert!(subs.is_consistent());
}

#[tokio::test]
async fn corrupt_state_file_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.json");
    tokio::fs::write(&path, b"\x00\x01garbage").await.unwrap();

    let store = SubscriptionStore::open(path).await;
    assert_eq!(store.lock().await.tracked_len(), 0);
}

#[tokio::test]
async fn handle_command_replies_with_user_facing_text() {
    let config = Config::from_lookup(|key| (key == "RWNOTIFY_TOKEN").then(|| "t".to_string())).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let store = SubscriptionStore::new(Subscriptions::new(), dir.path().join("data.json"));
    let (outbox, _rx) = Outbox::channel();
    let state = BotState::new(store, ScriptedFetcher::default(), outbox, Arc::new(config));

    let reply = commands::handle_command(&state, 42, Command::List).await;
    assert_eq!(reply, commands::NOTHING_TRACKED_TEXT);

    let reply = commands::handle_command(&state, 42, Command::parse("/add 704 1 2 2025-05-25").unwrap()).await;
    assert_eq!(reply, AddError::BadTrainNumber.to_string());

    let reply = commands::handle_command(&state, 42, Command::parse("/remove 3").unwrap()).await;
    assert_eq!(reply, RemoveError::NothingTracked.to_string());

    let reply = commands::handle_command(&state, 42, Command::Help).await;
    assert!(reply.contains("/add"));
}
