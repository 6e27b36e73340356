//! Wall-clock helpers: packed date/time fields and local formatting
//!
//! The stored clock is always UTC. The timezone offset only enters through
//! `format_local`, so a restart never applies it twice.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Offset, SecondsFormat, Timelike, Utc};

pub const SECONDS_PER_DAY: u32 = 86_400;

/// Years outside this range in storage are treated as uninitialized
const MIN_VALID_YEAR: i32 = 1970;
const MAX_VALID_YEAR: i32 = 2099;

/// Calendar date packed as YYYYMMDD
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedDate(pub u32);

impl PackedDate {
    pub fn to_naive(self) -> Option<NaiveDate> {
        let year = (self.0 / 10_000) as i32;
        let month = (self.0 / 100) % 100;
        let day = self.0 % 100;
        if !(MIN_VALID_YEAR..=MAX_VALID_YEAR).contains(&year) {
            return None;
        }
        NaiveDate::from_ymd_opt(year, month, day)
    }
}

/// Seconds since midnight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedTime(pub u32);

impl PackedTime {
    pub fn to_naive(self) -> Option<NaiveTime> {
        if self.0 >= SECONDS_PER_DAY {
            return None;
        }
        NaiveTime::from_num_seconds_from_midnight_opt(self.0, 0)
    }
}

/// Split UTC epoch seconds into independently storable date and time fields
pub fn split_epoch(epoch: i64) -> (PackedDate, PackedTime) {
    let dt = DateTime::<Utc>::from_timestamp(epoch.max(0), 0).unwrap_or_default();
    let date = dt.year() as u32 * 10_000 + dt.month() * 100 + dt.day();
    (PackedDate(date), PackedTime(dt.num_seconds_from_midnight()))
}

/// Join stored date and time back into UTC epoch seconds.
/// Returns None if either field is out of range.
pub fn join_epoch(date: PackedDate, time: PackedTime) -> Option<i64> {
    let naive = date.to_naive()?.and_time(time.to_naive()?);
    Some(naive.and_utc().timestamp())
}

/// Fixed offset for whole-hour timezones; out-of-range values fall back to UTC
pub fn utc_offset(hours: i32) -> FixedOffset {
    match FixedOffset::east_opt(hours.saturating_mul(3600)) {
        Some(offset) => offset,
        None => Utc.fix(),
    }
}

/// Format epoch seconds as RFC 3339 local time, e.g. `2026-10-18T15:00:00+03:00`
pub fn format_local(epoch: i64, offset_hours: i32) -> String {
    DateTime::<Utc>::from_timestamp(epoch, 0)
        .unwrap_or_default()
        .with_timezone(&utc_offset(offset_hours))
        .to_rfc3339_opts(SecondsFormat::Secs, false)
}
