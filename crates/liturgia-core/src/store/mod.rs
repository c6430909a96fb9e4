//! Persistent key-value storage used by the liturgy cache.
//!
//! The cache only needs a string-keyed, string-valued store with five
//! operations. `FileStore` keeps one file per key on disk; `MemoryStore` is a
//! process-local map used by tests and ephemeral runs.
//!
//! No multi-key atomicity is assumed: `remove_many` may fail part-way.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

pub use file::FileStore;
pub use memory::MemoryStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid store key: {0}")]
    InvalidKey(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Asynchronous string key-value store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value; `Ok(None)` when the key is absent.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Insert or overwrite a value.
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Remove a key. Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> StoreResult<()>;

    /// Remove several keys.
    async fn remove_many(&self, keys: &[String]) -> StoreResult<()> {
        for key in keys {
            self.remove(key).await?;
        }
        Ok(())
    }

    /// Every key currently present, in no particular order.
    async fn list_keys(&self) -> StoreResult<Vec<String>>;
}
