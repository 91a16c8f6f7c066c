//! CDR timestamp parsing
//!
//! Provider timestamps look like `"Mon  1 Jan 2024 10:00:00 +0000"`: weekday,
//! unpadded day, month abbreviation, year, time, and a fixed UTC offset. Runs
//! of whitespace are insignificant and a comma counts as whitespace, so
//! `"Mon, 1 Jan 2024 10:00:00 +0000"` parses too.

use chrono::{NaiveDateTime, Weekday};

use crate::error::{Result, SyncError};

const DATE_TIME_FORMAT: &str = "%d %b %Y %H:%M:%S";
const UTC_OFFSET: &str = "+0000";

/// Parse a dedup-key value into a comparable instant.
///
/// The weekday must be a valid name but is not checked against the date.
pub fn parse_cdr_timestamp(raw: &str) -> Result<NaiveDateTime> {
    let normalized = raw.replace(',', " ");
    let tokens: Vec<&str> = normalized.split_whitespace().collect();

    let &[weekday, day, month, year, time, offset] = tokens.as_slice() else {
        return Err(SyncError::TimestampFormat(raw.to_string()));
    };

    if weekday.parse::<Weekday>().is_err() || offset != UTC_OFFSET {
        return Err(SyncError::TimestampFormat(raw.to_string()));
    }

    NaiveDateTime::parse_from_str(&format!("{day} {month} {year} {time}"), DATE_TIME_FORMAT)
        .map_err(|_| SyncError::TimestampFormat(raw.to_string()))
}
