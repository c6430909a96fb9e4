//! Core library for liturgia: a local, date-keyed cache of daily liturgies.
//!
//! - [`api`]: HTTP client for the remote liturgy API
//! - [`cache`]: the cache engine and its rolling retention window
//! - [`store`]: persistent key-value stores the cache writes through
//! - [`models`]: the liturgy document and a typed view over it
//! - [`utils`]: date/key codec
//! - [`config`]: on-disk configuration

pub mod api;
pub mod cache;
pub mod config;
pub mod models;
pub mod store;
pub mod utils;

pub use api::{FetchError, LiturgyClient, LiturgyProvider};
pub use cache::{CacheStats, LiturgyCache, PrefetchReport, RetentionWindow, CACHE_DAYS, MAX_CACHE_SIZE};
pub use config::Config;
pub use models::LiturgyDocument;
pub use store::{FileStore, KeyValueStore, MemoryStore, StoreError};
