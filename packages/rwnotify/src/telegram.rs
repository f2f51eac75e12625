// packages/rwnotify/src/telegram.rs
use crate::{
    commands::{self, Command},
    config::Config,
    error::AppError,
    fetcher::AvailabilityFetcher,
    notifier::Messenger,
    types::UserId,
    BotState,
};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info};

// ==============================================================================
// Bot API 数据结构 (只保留用到的字段)
// ==============================================================================

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
}

impl Message {
    /// 发送者身份：优先 from.id，否则退回 chat.id
    pub fn sender_id(&self) -> UserId {
        self.from.as_ref().map_or(self.chat.id, |u| u.id)
    }
}

#[derive(Serialize)]
struct SendMessageParams<'a> {
    chat_id: i64,
    text: &'a str,
    parse_mode: &'a str,
    disable_web_page_preview: bool,
}

#[derive(Clone)]
pub struct TelegramBot {
    client: Client,
    base_url: String,
    long_poll_timeout: Duration,
}

impl TelegramBot {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        // 长轮询本身会挂起 long_poll_timeout，客户端超时要比它长
        let client = Client::builder()
            .timeout(config.http_timeout + config.long_poll_timeout)
            .connect_timeout(config.http_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: format!("{}/bot{}", config.telegram_api_url.trim_end_matches('/'), config.bot_token),
            long_poll_timeout: config.long_poll_timeout,
        })
    }

    async fn call<P: Serialize + ?Sized, T: DeserializeOwned>(&self, method: &str, params: &P) -> Result<T, AppError> {
        let url = format!("{}/{}", self.base_url, method);
        let res = self.client.post(&url).json(params).send().await?;
        let status = res.status();

        // 出错时 Bot API 也会返回 JSON 描述，先尝试解析
        let body = res.text().await?;
        let parsed: ApiResponse<T> = match serde_json::from_str(&body) {
            Ok(p) => p,
            Err(_) if !status.is_success() => return Err(AppError::UpstreamError(status)),
            Err(e) => return Err(e.into()),
        };

        match (parsed.ok, parsed.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(AppError::Telegram(
                parsed.description.unwrap_or_else(|| format!("{} failed with status {}", method, status)),
            )),
        }
    }

    /// 启动时的鉴权检查
    pub async fn get_me(&self) -> Result<User, AppError> {
        self.call("getMe", &json!({})).await
    }

    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, AppError> {
        let params = json!({
            "offset": offset,
            "timeout": self.long_poll_timeout.as_secs(),
            "allowed_updates": ["message"],
        });
        self.call("getUpdates", &params).await
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), AppError> {
        let params = SendMessageParams {
            chat_id,
            text,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };
        let _: serde_json::Value = self.call("sendMessage", &params).await?;
        Ok(())
    }
}

impl Messenger for TelegramBot {
    async fn send_text(&self, user_id: UserId, text: &str) -> Result<(), AppError> {
        self.send_message(user_id, text).await
    }
}

/// 长轮询收取命令。每条命令在独立任务里处理，互相之间以及与对账循环之间的并发由 store 锁串行化。
pub async fn run_updates_loop<F>(bot: TelegramBot, state: BotState<F>)
where
    F: AvailabilityFetcher + 'static,
{
    info!("🤖 [BOT] Polling for updates...");
    let mut offset = 0i64;

    loop {
        let updates = match bot.get_updates(offset).await {
            Ok(updates) => updates,
            Err(e) => {
                error!("🔁 [BOT] getUpdates failed: {}. Retrying in 5s...", e);
                sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            let Some(message) = update.message else {
                continue;
            };
            let Some(command) = message.text.as_deref().and_then(Command::parse) else {
                continue;
            };

            let user_id = message.sender_id();
            let state = state.clone();
            tokio::spawn(async move {
                info!("📩 [BOT] {:?} from {}", command, user_id);
                let reply = commands::handle_command(&state, user_id, command).await;
                state.outbox.send(user_id, reply);
            });
        }
    }
}
