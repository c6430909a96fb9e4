use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::utils::add_days;

/// Contiguous range of dates the cache tries to keep resident, stored as
/// `{"start":"YYYY-MM-DD","end":"YYYY-MM-DD"}`. Both ends are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct RetentionWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl RetentionWindow {
    /// Window of `days` consecutive dates beginning at `start`
    pub fn anchored_at(start: NaiveDate, days: u32) -> Self {
        let span = i64::from(days.max(1)) - 1;
        Self {
            start,
            end: add_days(start, span),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn len_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Every date in the window, oldest first
    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }
}
