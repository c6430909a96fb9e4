//! Mapping between calendar dates and store keys.
//!
//! Every key owned by the liturgy cache starts with [`KEY_PREFIX`]. Day entries
//! look like `liturgia-2025-06-10`; the retention window record lives under
//! [`META_KEY`]. Older builds stored whole months under `liturgia-2025-06`.

use chrono::{Datelike, Days, NaiveDate};

/// Prefix shared by every key this subsystem writes.
pub const KEY_PREFIX: &str = "liturgia-";

/// Reserved key holding the JSON-encoded retention window.
pub const META_KEY: &str = "liturgia-week-meta";

/// Date format used in keys, window metadata and on the command line.
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Format a calendar date as `YYYY-MM-DD`.
pub fn format_date<D: Datelike>(date: &D) -> String {
    format!("{:04}-{:02}-{:02}", date.year(), date.month(), date.day())
}

/// Parse a `YYYY-MM-DD` string into a date.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok()
}

/// Cache key for one calendar day. Only the date part of `date` is used, so
/// two timestamps on the same local day always share a key.
pub fn key_for<D: Datelike>(date: &D) -> String {
    format!("{}{}", KEY_PREFIX, format_date(date))
}

/// Key of a legacy whole-month bundle.
pub fn month_key_for(year: i32, month: u32) -> String {
    format!("{}{:04}-{:02}", KEY_PREFIX, year, month)
}

/// Decode the date of a day key. Returns `None` for the metadata key, legacy
/// month keys and anything outside the namespace.
pub fn date_from_key(key: &str) -> Option<NaiveDate> {
    let rest = key.strip_prefix(KEY_PREFIX)?;
    // "YYYY-MM-DD" only; parse_from_str alone would accept "2025-6-1"
    if rest.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(rest, DATE_FORMAT).ok()
}

/// Shift a date by `n` days, negative meaning backwards. Saturates at the
/// bounds of the representable calendar.
pub fn add_days(date: NaiveDate, n: i64) -> NaiveDate {
    let shifted = if n >= 0 {
        date.checked_add_days(Days::new(n.unsigned_abs()))
    } else {
        date.checked_sub_days(Days::new(n.unsigned_abs()))
    };
    shifted.unwrap_or(if n >= 0 { NaiveDate::MAX } else { NaiveDate::MIN })
}
