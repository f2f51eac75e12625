// packages/rwnotify/src/error.rs
use reqwest::StatusCode;
use thiserror::Error;

// 基础设施层错误：网络、磁盘、配置。不会直接展示给用户
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Upstream server returned an error: {0}")]
    UpstreamError(StatusCode),

    #[error("State file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Telegram API error: {0}")]
    Telegram(String),

    #[error("Failed to create proxy client: {0}")]
    ProxyClientBuild(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

// 用户输入错误：Display 就是回复给用户的文本
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddError {
    #[error("Неправильное количество аргументов, введите /help для справки")]
    WrongArgCount,

    #[error("Некорректный формат номера поезда, введите /help для справки")]
    BadTrainNumber,

    #[error("Некорректный код станции отправления, введите /help для справки")]
    BadOrigin,

    #[error("Некорректный код станции прибытия, введите /help для справки")]
    BadDestination,

    #[error("Некорректная дата, введите /help для справки")]
    BadDate,

    #[error("Сервер вернул невалидные данные, проверьте корректность ввода")]
    InvalidRemoteData,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RemoveError {
    #[error("Неправильный формат ввода, введите /help для справки")]
    BadFormat,

    #[error("Вы не отслеживаете никакие маршруты")]
    NothingTracked,

    #[error("Вы не отслеживаете маршрут с номером {0}, введите /list чтобы узнать нужный номер")]
    NoSuchIndex(i64),
}
