//! Utility functions for date handling and cache key derivation.

pub mod date_key;

// Re-export commonly used functions at module level
pub use date_key::{
    add_days, date_from_key, format_date, key_for, month_key_for, parse_date, KEY_PREFIX,
    META_KEY,
};
