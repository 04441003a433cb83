//! Microsecond timestamps and local-calendar helpers.
//!
//! History times are microseconds since the Unix epoch. Day boundaries are
//! local midnights, so "today" and "age in days" follow the user's calendar
//! rather than UTC.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Local, Months, NaiveDate, TimeZone, Utc};

pub const USECS_PER_SEC: i64 = 1_000_000;
pub const USECS_PER_DAY: i64 = 86_400 * USECS_PER_SEC;

/// Source of "now" in microseconds. Injected so tests can pin time.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

pub fn now_us() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

pub fn system_clock() -> Clock {
    Arc::new(now_us)
}

/// A clock that always reports `t`.
pub fn fixed_clock(t: i64) -> Clock {
    Arc::new(move || t)
}

fn to_local(t: i64) -> Option<DateTime<Local>> {
    Utc.timestamp_opt(t.div_euclid(USECS_PER_SEC), (t.rem_euclid(USECS_PER_SEC) * 1000) as u32)
        .single()
        .map(|dt| dt.with_timezone(&Local))
}

fn local_midnight_of(date: NaiveDate) -> Option<i64> {
    date.and_hms_opt(0, 0, 0)?
        .and_local_timezone(Local)
        .earliest()
        .map(|dt| dt.timestamp_micros())
}

/// Local midnight at the start of the day containing `t`.
pub fn start_of_local_day(t: i64) -> i64 {
    to_local(t)
        .and_then(|dt| local_midnight_of(dt.date_naive()))
        .unwrap_or_else(|| t - t.rem_euclid(USECS_PER_DAY))
}

/// Local midnight `days` calendar days after the day containing `t`
/// (negative moves backwards).
pub fn local_day_offset(t: i64, days: i64) -> i64 {
    to_local(t)
        .and_then(|dt| {
            let date = dt.date_naive() + chrono::Duration::days(days);
            local_midnight_of(date)
        })
        .unwrap_or_else(|| start_of_local_day(t) + days * USECS_PER_DAY)
}

/// Local midnight on the first day of the month `months_back` months before
/// the month containing `t`.
pub fn start_of_local_month(t: i64, months_back: u32) -> i64 {
    to_local(t)
        .and_then(|dt| {
            let first = dt.date_naive().with_day(1)?;
            let shifted = first.checked_sub_months(Months::new(months_back))?;
            local_midnight_of(shifted)
        })
        .unwrap_or_else(|| start_of_local_day(t) - i64::from(months_back) * 30 * USECS_PER_DAY)
}

/// Month name of `t`, with the year when it differs from the year of `now`.
pub fn local_month_label(t: i64, now: i64) -> String {
    let (Some(dt), Some(current)) = (to_local(t), to_local(now)) else {
        return String::new();
    };
    let name = u8::try_from(dt.month())
        .ok()
        .and_then(|m| chrono::Month::try_from(m).ok())
        .map(|m| m.name())
        .unwrap_or_default();
    if dt.year() == current.year() {
        name.to_string()
    } else {
        format!("{name} {}", dt.year())
    }
}

/// Whole days between the local day of `date` and `normalized_now`, which
/// must already be a local midnight. Future dates count as today.
pub fn age_in_days(normalized_now: i64, date: i64) -> i64 {
    let date_midnight = start_of_local_day(date);
    if date_midnight > normalized_now {
        return 0;
    }
    // Calendar difference, so a DST shift inside the span doesn't lose a day.
    match (to_local(normalized_now), to_local(date)) {
        (Some(a), Some(b)) => (a.date_naive() - b.date_naive()).num_days().max(0),
        _ => (normalized_now - date_midnight) / USECS_PER_DAY,
    }
}

/// Reference point a relative query time is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum TimeRef {
    #[default]
    Epoch = 0,
    Today = 1,
    Now = 2,
}

impl TryFrom<u8> for TimeRef {
    type Error = crate::error::PlacesError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(TimeRef::Epoch),
            1 => Ok(TimeRef::Today),
            2 => Ok(TimeRef::Now),
            _ => Err(crate::error::PlacesError::QueryParse(format!("invalid time reference {v}"))),
        }
    }
}

impl From<TimeRef> for u8 {
    fn from(r: TimeRef) -> u8 {
        r as u8
    }
}

/// Resolve a (reference, offset) pair into an absolute time.
pub fn normalize_time(reference: TimeRef, offset: i64, now: i64) -> i64 {
    match reference {
        TimeRef::Epoch => offset,
        TimeRef::Today => start_of_local_day(now) + offset,
        TimeRef::Now => now + offset,
    }
}
