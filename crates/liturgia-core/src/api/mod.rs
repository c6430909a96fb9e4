//! REST client for the daily liturgy API.
//!
//! This module provides the `LiturgyProvider` seam the cache fetches through,
//! and `LiturgyClient`, its reqwest implementation. One request returns the
//! liturgy for one calendar date, addressed by `dia`/`mes`/`ano` query
//! parameters.

pub mod client;
pub mod error;

pub use client::{LiturgyClient, LiturgyProvider, DEFAULT_BASE_URL, REQUEST_TIMEOUT_SECS};
pub use error::FetchError;
