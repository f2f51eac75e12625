// packages/rwnotify/src/notifier.rs
use crate::{
    error::AppError,
    types::{AvailabilitySnapshot, Route, UserId},
};
use std::future::Future;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{info, warn};

/// 余票状态的四种变化
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    PlacesAppeared,
    PlacesGone,
    LowerPlacesAppeared,
    LowerPlacesGone,
}

impl ChangeKind {
    pub fn message(&self, route: &Route) -> String {
        let prefix = match self {
            ChangeKind::PlacesAppeared => "Появились свободные места",
            ChangeKind::PlacesGone => "Больше нет свободных мест",
            ChangeKind::LowerPlacesAppeared => "Появились свободные нижние места",
            ChangeKind::LowerPlacesGone => "Больше нет свободных нижних мест",
        };
        format!("{} в поезде {}", prefix, escape_html(&route.to_string()))
    }
}

/// 消息以 HTML parse_mode 发送，拼进去的用户输入要转义
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// 旧快照 -> 新快照 的变化列表，顺序固定。只在布尔值翻转时产生。
pub fn changes(old: &AvailabilitySnapshot, new: &AvailabilitySnapshot) -> Vec<ChangeKind> {
    let mut out = Vec::new();
    match (old.has_places, new.has_places) {
        (false, true) => out.push(ChangeKind::PlacesAppeared),
        (true, false) => out.push(ChangeKind::PlacesGone),
        _ => {}
    }
    match (old.has_lower_places, new.has_lower_places) {
        (false, true) => out.push(ChangeKind::LowerPlacesAppeared),
        (true, false) => out.push(ChangeKind::LowerPlacesGone),
        _ => {}
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub user_id: UserId,
    pub text: String,
}

/// 发消息的能力 (由 Telegram 客户端实现)
pub trait Messenger: Send + Sync {
    fn send_text(&self, user_id: UserId, text: &str) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// 待发送消息队列的发送端。入队永不阻塞，可以在持有 store 锁时调用。
#[derive(Clone)]
pub struct Outbox {
    tx: UnboundedSender<OutgoingMessage>,
}

impl Outbox {
    pub fn channel() -> (Self, UnboundedReceiver<OutgoingMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, user_id: UserId, text: impl Into<String>) {
        let msg = OutgoingMessage {
            user_id,
            text: text.into(),
        };
        if self.tx.send(msg).is_err() {
            warn!("[OUTBOX] Dispatcher is gone, dropping message for user {}", user_id);
        }
    }

    /// 给一个关注者发送该线路的全部变化，返回入队的消息数
    pub fn notify_change(
        &self,
        user_id: UserId,
        route: &Route,
        old: &AvailabilitySnapshot,
        new: &AvailabilitySnapshot,
    ) -> usize {
        let kinds = changes(old, new);
        for kind in &kinds {
            self.send(user_id, kind.message(route));
        }
        kinds.len()
    }
}

/// 后台派发任务：逐条投递，单条失败只记录日志，不影响后续消息
pub async fn run_dispatcher<M: Messenger>(mut rx: UnboundedReceiver<OutgoingMessage>, messenger: M) {
    info!("📮 [DISPATCH] Dispatcher started");
    while let Some(msg) = rx.recv().await {
        if let Err(e) = messenger.send_text(msg.user_id, &msg.text).await {
            warn!("❌ [DISPATCH] Failed to deliver message to {}: {}", msg.user_id, e);
        }
    }
    info!("[DISPATCH] Queue closed, dispatcher stopped");
}
