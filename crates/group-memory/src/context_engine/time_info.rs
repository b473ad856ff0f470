//! Wall-clock facts attached to an assembled context and used by the time-of-day bonus
use chrono::{DateTime, Datelike, FixedOffset, Offset, Timelike, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeOfDay {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeOfDay {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            6..=11 => TimeOfDay::Morning,
            12..=17 => TimeOfDay::Afternoon,
            18..=22 => TimeOfDay::Evening,
            _ => TimeOfDay::Night,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeInfo {
    pub timestamp: f64,
    /// `YYYY-MM-DD HH:MM:SS` in the configured offset
    pub datetime: String,
    pub weekday: String,
    pub hour: u32,
    pub time_of_day: TimeOfDay,
    pub is_weekend: bool,
}

impl TimeInfo {
    pub fn at(timestamp: f64, utc_offset_hours: i32) -> Self {
        let offset = FixedOffset::east_opt(utc_offset_hours * 3600).unwrap_or_else(|| Utc.fix());
        let utc = DateTime::from_timestamp_millis((timestamp * 1000.0) as i64).unwrap_or_default();
        let local = utc.with_timezone(&offset);
        let hour = local.hour();
        Self {
            timestamp,
            datetime: local.format("%Y-%m-%d %H:%M:%S").to_string(),
            weekday: local.format("%A").to_string(),
            hour,
            time_of_day: TimeOfDay::from_hour(hour),
            is_weekend: local.weekday().number_from_monday() >= 6,
        }
    }
}
