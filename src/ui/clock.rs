use anyhow::{anyhow, Result};
use chrono::{DateTime, Datelike, Local, NaiveDateTime, Timelike, Utc, Weekday};
use chrono_tz::Tz;

/// The zone wall-clock times are shown and matched in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocalZone {
    #[default]
    System,
    Named(Tz),
}

impl LocalZone {
    pub fn parse(name: Option<&str>) -> Result<Self> {
        match name {
            None | Some("") => Ok(LocalZone::System),
            Some(name) => name
                .parse::<Tz>()
                .map(LocalZone::Named)
                .map_err(|e| anyhow!("unknown timezone {:?}: {}", name, e)),
        }
    }

    pub fn naive(&self, t: DateTime<Utc>) -> NaiveDateTime {
        match self {
            LocalZone::System => t.with_timezone(&Local).naive_local(),
            LocalZone::Named(tz) => t.with_timezone(tz).naive_local(),
        }
    }

    /// Local weekday and minute of the day.
    pub fn weekday_minute(&self, t: DateTime<Utc>) -> (Weekday, u32) {
        let local = self.naive(t);
        (local.weekday(), local.hour() * 60 + local.minute())
    }
}

/// `HH:MM:SS` for today, `YYYY-MM-DD HH:MM:SS` otherwise.
pub fn format_time(t: DateTime<Utc>, now: DateTime<Utc>, zone: LocalZone) -> String {
    let local = zone.naive(t);
    if local.date() == zone.naive(now).date() {
        local.format("%H:%M:%S").to_string()
    } else {
        local.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}
