// packages/rwnotify/src/commands.rs
use crate::{
    error::{AddError, RemoveError},
    fetcher::AvailabilityFetcher,
    notifier::{escape_html, Outbox},
    store::SubscriptionStore,
    types::{Route, UserId},
    validation::{is_valid_station_code, is_valid_train_number, parse_date, TrackingWindow},
    BotState,
};
use chrono::{NaiveDate, Utc};
use tracing::info;

pub const HELP_TEXT: &str = "<b>/add [number] [from] [to] [date]</b>\n\
Добавить маршрут в отслеживание\n\
<b>[number]</b> - номер поезда, например 704Б\n\
<b>[from]</b> - код станции отправления, см. /codes\n\
<b>[to]</b> - код станции прибытия, см. /codes\n\
<b>[date]</b> - дата отправления, например 2025-05-25\n\n\
<b>/list</b>\n\
Список всех маршрутов, которые вы отслеживаете\n\n\
<b>/remove [index]</b>\n\
Убрать маршрут из отслеживания\n\
<b>[index]</b> - номер маршрута в выводе команды /list\n";

pub const CODES_TEXT: &str = "БЖД использует коды железнодорожных станций в формате АСУ \"Экспресс-3\" (UIC-коды). \
Вот такие коды для станций в областных центрах:\n\n\
<b>2100001</b> - Минск-Пассажирский\n\
<b>2100200</b> - Брест-Центральный\n\
<b>2100050</b> - Витебск\n\
<b>2100100</b> - Гомель\n\
<b>2100070</b> - Гродно\n\
<b>2100150</b> - Могилёв\n\n\
Чтобы посмотреть код другой станции, можно открыть на pass.rw.by \
список поездов на каком-то маршруте, прибывающем на эту станцию, \
и посмотреть на число после &amp;to_exp= в ссылке на страницу.";

pub const FETCHING_TEXT: &str = "Этот маршрут ещё не отслеживается ботом, получение данных с сервера...";
pub const ADDED_TEXT: &str = "Теперь вы отслеживаете этот маршрут";
pub const NOTHING_TRACKED_TEXT: &str = "Вы не отслеживаете никакие маршруты";
pub const UNKNOWN_COMMAND_TEXT: &str = "Неизвестная команда, введите /help для справки";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Codes,
    Add(Vec<String>),
    List,
    Remove(Vec<String>),
    Unknown(String),
}

impl Command {
    /// 解析 "/cmd[@BotName] arg1 arg2 ..."。不是命令的文本返回 `None`。
    pub fn parse(text: &str) -> Option<Command> {
        let mut parts = text.split_whitespace();
        let head = parts.next()?.strip_prefix('/')?;
        let name = head.split('@').next().unwrap_or_default().to_lowercase();
        let args: Vec<String> = parts.map(str::to_string).collect();

        Some(match name.as_str() {
            "start" => Command::Start,
            "help" => Command::Help,
            "codes" => Command::Codes,
            "add" => Command::Add(args),
            "list" => Command::List,
            "remove" => Command::Remove(args),
            _ => Command::Unknown(name),
        })
    }
}

/// 按固定顺序校验 (车次号、出发站、到达站、日期)，报告第一个不合法的字段
pub fn parse_route(args: &[String], window: TrackingWindow, today: NaiveDate) -> Result<Route, AddError> {
    let [number, from, to, date] = args else {
        return Err(AddError::WrongArgCount);
    };

    if !is_valid_train_number(number) {
        return Err(AddError::BadTrainNumber);
    }
    if !is_valid_station_code(from) {
        return Err(AddError::BadOrigin);
    }
    if !is_valid_station_code(to) {
        return Err(AddError::BadDestination);
    }
    let date = parse_date(date)
        .filter(|d| window.contains(*d, today))
        .ok_or(AddError::BadDate)?;

    Ok(Route::new(number.as_str(), from.as_str(), to.as_str(), date))
}

/// /add：新线路在持锁状态下同步查询一次；查询无效则不保存
pub async fn add_route<F: AvailabilityFetcher>(
    store: &SubscriptionStore,
    fetcher: &F,
    outbox: &Outbox,
    window: TrackingWindow,
    today: NaiveDate,
    user_id: UserId,
    args: &[String],
) -> Result<Route, AddError> {
    let route = parse_route(args, window, today)?;

    let mut subs = store.lock().await;
    if !subs.is_tracked(&route) {
        outbox.send(user_id, FETCHING_TEXT);
        let snapshot = fetcher.fetch(&route).await;
        if !snapshot.valid {
            return Err(AddError::InvalidRemoteData);
        }
        subs.track(route.clone(), snapshot);
        info!("➕ [ADD] Added new route {} to global watchlist", route);
    }

    subs.activate(&route, user_id);
    store.persist(&subs).await;
    Ok(route)
}

/// /list：用户当前 active 的线路；没有时返回 `None`
pub async fn list_routes(store: &SubscriptionStore, user_id: UserId) -> Option<Vec<Route>> {
    let routes = store.lock().await.active_routes(user_id);
    if routes.is_empty() {
        None
    } else {
        Some(routes)
    }
}

pub fn format_list(routes: &[Route]) -> String {
    routes
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let line = format!("{} {} {} {}", r.number, r.from, r.to, r.date_str());
            format!("{}. {}\n", i + 1, escape_html(&line))
        })
        .collect()
}

/// /remove：编号与同一时刻 /list 的输出一致。只清除 active 标记，线路留给下一轮对账驱逐。
pub async fn remove_route(store: &SubscriptionStore, user_id: UserId, args: &[String]) -> Result<Route, RemoveError> {
    let [raw] = args else {
        return Err(RemoveError::BadFormat);
    };
    let index: i64 = raw.parse().map_err(|_| RemoveError::BadFormat)?;

    let mut subs = store.lock().await;
    let routes = subs.active_routes(user_id);
    if routes.is_empty() {
        return Err(RemoveError::NothingTracked);
    }

    let route = usize::try_from(index)
        .ok()
        .and_then(|i| i.checked_sub(1))
        .and_then(|i| routes.get(i))
        .cloned()
        .ok_or(RemoveError::NoSuchIndex(index))?;

    subs.deactivate(&route, user_id);
    store.persist(&subs).await;
    info!("➖ [REMOVE] User {} stopped tracking {}", user_id, route);
    Ok(route)
}

/// 执行一条命令，返回给发送者的回复
pub async fn handle_command<F: AvailabilityFetcher>(state: &BotState<F>, user_id: UserId, command: Command) -> String {
    let today = Utc::now().date_naive();
    let window = state.config.window;

    match command {
        Command::Start | Command::Help => HELP_TEXT.to_string(),
        Command::Codes => CODES_TEXT.to_string(),
        Command::Add(args) => {
            match add_route(&state.store, state.fetcher.as_ref(), &state.outbox, window, today, user_id, &args).await {
                Ok(_) => ADDED_TEXT.to_string(),
                Err(e) => e.to_string(),
            }
        }
        Command::List => match list_routes(&state.store, user_id).await {
            Some(routes) => format_list(&routes),
            None => NOTHING_TRACKED_TEXT.to_string(),
        },
        Command::Remove(args) => match remove_route(&state.store, user_id, &args).await {
            Ok(route) => format!("Маршрут {} больше не отслеживается", escape_html(&route.to_string())),
            Err(e) => e.to_string(),
        },
        Command::Unknown(_) => UNKNOWN_COMMAND_TEXT.to_string(),
    }
}
