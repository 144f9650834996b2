//! In-memory [`Database`] implementation backed by [`DashMap`].
//!
//! Suitable for development, tests, and single-node deployments where all
//! module data fits in memory.

use async_trait::async_trait;
use dashmap::DashMap;
use linna_core::Database;

/// Concurrent in-memory database keyed by `(collection, key)`.
pub struct MemoryDatabase {
    entries: DashMap<(String, String), Vec<u8>>,
}

impl MemoryDatabase {
    /// Creates a new, empty `MemoryDatabase`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Total number of stored values across all collections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

fn entry_key(collection: &str, key: &str) -> (String, String) {
    (collection.to_string(), key.to_string())
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn load(&self, collection: &str, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self
            .entries
            .get(&entry_key(collection, key))
            .map(|v| v.value().clone()))
    }

    async fn store(&self, collection: &str, key: &str, value: Vec<u8>) -> anyhow::Result<()> {
        self.entries.insert(entry_key(collection, key), value);
        Ok(())
    }

    async fn delete(&self, collection: &str, key: &str) -> anyhow::Result<bool> {
        Ok(self.entries.remove(&entry_key(collection, key)).is_some())
    }

    async fn list_keys(&self, collection: &str) -> anyhow::Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.key().0 == collection)
            .map(|entry| entry.key().1.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_then_load() {
        let db = MemoryDatabase::new();
        db.store("profiles", "u1", b"hello".to_vec()).await.unwrap();
        assert_eq!(db.load("profiles", "u1").await.unwrap(), Some(b"hello".to_vec()));
        assert_eq!(db.load("profiles", "u2").await.unwrap(), None);
        assert_eq!(db.load("other", "u1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn store_overwrites() {
        let db = MemoryDatabase::new();
        db.store("c", "k", vec![1]).await.unwrap();
        db.store("c", "k", vec![2]).await.unwrap();
        assert_eq!(db.load("c", "k").await.unwrap(), Some(vec![2]));
        assert_eq!(db.len(), 1);
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let db = MemoryDatabase::new();
        db.store("c", "k", vec![1]).await.unwrap();
        assert!(db.delete("c", "k").await.unwrap());
        assert!(!db.delete("c", "k").await.unwrap());
        assert!(db.is_empty());
    }

    #[tokio::test]
    async fn list_keys_is_scoped_and_sorted() {
        let db = MemoryDatabase::new();
        db.store("c", "b", vec![]).await.unwrap();
        db.store("c", "a", vec![]).await.unwrap();
        db.store("d", "z", vec![]).await.unwrap();
        assert_eq!(db.list_keys("c").await.unwrap(), vec!["a", "b"]);
        assert!(db.list_keys("missing").await.unwrap().is_empty());
    }
}
