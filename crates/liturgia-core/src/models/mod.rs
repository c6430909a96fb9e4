//! Data models for the daily liturgy.
//!
//! - `LiturgyDocument`: the opaque JSON payload returned by the remote API
//! - `LiturgySummary`, `Reading`, `Psalm`: a typed, read-only view for display

pub mod liturgy;

pub use liturgy::{Antiphons, LiturgyDocument, LiturgySummary, Psalm, Reading, SecondReading};
