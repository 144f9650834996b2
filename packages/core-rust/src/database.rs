use std::sync::Arc;

use async_trait::async_trait;

/// Host-owned storage handle passed into module calls.
///
/// Borrowed for the duration of one call: modules must not keep it past the
/// call that received it, and must never close it.
#[async_trait]
pub trait Database: Send + Sync {
    /// Load a single value by collection and key.
    async fn load(&self, collection: &str, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    /// Insert or replace a value.
    async fn store(&self, collection: &str, key: &str, value: Vec<u8>) -> anyhow::Result<()>;

    /// Delete a value. Returns whether it existed.
    async fn delete(&self, collection: &str, key: &str) -> anyhow::Result<bool>;

    /// All keys present in a collection, sorted.
    async fn list_keys(&self, collection: &str) -> anyhow::Result<Vec<String>>;
}

/// Shared database handle.
pub type DbHandle = Arc<dyn Database>;
