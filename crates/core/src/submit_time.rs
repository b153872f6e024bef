//! Dispatcher job submission timestamps.
//!
//! The dispatcher stamps every task of one submission with the same
//! wall-clock string (`12/08/2020 13:10:55`). All shots of that
//! submission must report the same initialization time, so the string
//! is converted once per task into a UTC [`Timestamp`].

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::CoreError;
use crate::types::Timestamp;

/// Format used by the dispatcher: month/day/year hour:minute:second.
pub const DISPATCHER_TIME_FORMAT: &str = "%m/%d/%Y %H:%M:%S";

/// Parse a dispatcher submit time, interpreted as UTC.
///
/// RFC 3339 strings are accepted as well.
pub fn parse_submit_time(raw: &str) -> Result<Timestamp, CoreError> {
    let trimmed = raw.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, DISPATCHER_TIME_FORMAT) {
        return Ok(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(trimmed)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| CoreError::InvalidSubmitTime(raw.to_string()))
}

/// Render a timestamp in the dispatcher's format.
pub fn format_submit_time(time: &Timestamp) -> String {
    time.format(DISPATCHER_TIME_FORMAT).to_string()
}
