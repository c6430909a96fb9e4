//! Local caching of daily liturgies for offline reading.
//!
//! `LiturgyCache` serves one day's liturgy from the key-value store when it is
//! there and from the remote API when it is not. Requests for "today" keep a
//! rolling window of `CACHE_DAYS` consecutive days resident, anchored at
//! today; entries outside the window are pruned whenever it moves.
//!
//! Stored entries are never refreshed: a published liturgy does not change.

pub mod clock;
pub mod manager;
pub mod window;

pub use clock::{Clock, FixedClock, SystemClock};
pub use manager::{CacheStats, LiturgyCache, PrefetchReport, CACHE_DAYS, MAX_CACHE_SIZE};
pub use window::RetentionWindow;
