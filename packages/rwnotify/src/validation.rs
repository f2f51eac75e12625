// packages/rwnotify/src/validation.rs
use chrono::{Days, NaiveDate};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// 车次号：4 个字符，前三位是数字，最后一位是字母后缀 (例如 704Б)
pub fn is_valid_train_number(number: &str) -> bool {
    let chars: Vec<char> = number.chars().collect();
    chars.len() == 4 && chars[..3].iter().all(|c| c.is_ascii_digit()) && chars[3].is_alphabetic()
}

/// 车站代码 (UIC / "Экспресс-3")：非空的纯数字串
pub fn is_valid_station_code(code: &str) -> bool {
    !code.is_empty() && code.bytes().all(|b| b.is_ascii_digit())
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT).ok()
}

/// 可跟踪的出发日期范围，以"今天"为基准
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrackingWindow {
    pub past_days: u64,
    pub future_days: u64,
}

impl Default for TrackingWindow {
    fn default() -> Self {
        Self::new(2, 32)
    }
}

impl TrackingWindow {
    pub fn new(past_days: u64, future_days: u64) -> Self {
        Self { past_days, future_days }
    }

    /// 闭区间。边界超出 NaiveDate 可表示范围时视为该侧不设限。
    pub fn contains(&self, date: NaiveDate, today: NaiveDate) -> bool {
        let after_start = today
            .checked_sub_days(Days::new(self.past_days))
            .map_or(true, |start| date >= start);
        let before_end = today
            .checked_add_days(Days::new(self.future_days))
            .map_or(true, |end| date <= end);
        after_start && before_end
    }
}
