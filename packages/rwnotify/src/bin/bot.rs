// packages/rwnotify/src/bin/bot.rs
use anyhow::{Context, Result};
use rwnotify::{
    init_tracing, notifier, reconcile, setup_shared_state,
    telegram::{self, TelegramBot},
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    info!("🚀 Starting rwnotify bot");

    let config = Arc::new(rwnotify::config::Config::from_env().context("Failed to read configuration")?);
    let (state, outbox_rx) = setup_shared_state(config.clone())
        .await
        .context("Failed to create HTTP client")?;

    let bot = TelegramBot::new(&config).context("Failed to create Telegram client")?;
    let me = bot.get_me().await.context("Failed to authenticate with Telegram")?;
    info!("🤖 Authorized as @{}", me.username.as_deref().unwrap_or("unknown"));

    tokio::spawn(notifier::run_dispatcher(outbox_rx, bot.clone()));
    tokio::spawn(reconcile::reconcile_task(
        state.store.clone(),
        state.fetcher.clone(),
        state.outbox.clone(),
        config.window,
        config.poll_interval,
    ));

    telegram::run_updates_loop(bot, state).await;
    Ok(())
}
