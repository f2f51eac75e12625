// packages/rwnotify/src/lib.rs
pub mod commands;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod notifier;
pub mod persistence;
pub mod reconcile;
pub mod store;
pub mod telegram;
pub mod types;
pub mod validation;

use config::Config;
use error::AppError;
use fetcher::{AvailabilityFetcher, RwClient};
use notifier::{OutgoingMessage, Outbox};
use std::sync::Arc;
use store::SubscriptionStore;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// 命令处理与对账任务共享的上下文
pub struct BotState<F> {
    pub store: SubscriptionStore,
    pub fetcher: Arc<F>,
    pub outbox: Outbox,
    pub config: Arc<Config>,
}

// 手写 Clone，避免要求 F: Clone
impl<F> Clone for BotState<F> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            fetcher: self.fetcher.clone(),
            outbox: self.outbox.clone(),
            config: self.config.clone(),
        }
    }
}

impl<F: AvailabilityFetcher> BotState<F> {
    pub fn new(store: SubscriptionStore, fetcher: F, outbox: Outbox, config: Arc<Config>) -> Self {
        Self {
            store,
            fetcher: Arc::new(fetcher),
            outbox,
            config,
        }
    }
}

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "rwnotify=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// 读取状态文件、构建查询客户端和消息队列。代理配置错误直接返回 Err。
pub async fn setup_shared_state(
    config: Arc<Config>,
) -> Result<(BotState<RwClient>, UnboundedReceiver<OutgoingMessage>), AppError> {
    let store = SubscriptionStore::open(config.data_file.clone()).await;
    let fetcher = RwClient::new(&config)?;
    let (outbox, rx) = Outbox::channel();
    Ok((BotState::new(store, fetcher, outbox, config), rx))
}
