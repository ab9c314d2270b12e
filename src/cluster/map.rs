//! Shared key/value map used for cross-replica coordination.
//!
//! All replicas read and write the same map: the requestor id is
//! established with put-if-absent, feed liveness timestamps are plain
//! writes, and the leader leases use compare-and-swap. `MemoryMap` is the
//! single-process implementation; a distributed store plugs in behind the
//! same trait.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("shared map unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait SharedMap: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, MapError>;

    async fn set(&self, key: &str, value: String) -> Result<(), MapError>;

    /// Store `value` only if the key is absent. Returns the previously
    /// stored value when another writer won, `None` when this write won.
    async fn put_if_absent(&self, key: &str, value: String)
        -> Result<Option<String>, MapError>;

    /// Replace the current value atomically. `expected` of `None` means the
    /// key must be absent. Returns false without writing when the current
    /// value does not match.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: String,
    ) -> Result<bool, MapError>;
}

/// In-process map for single-replica deployments and tests.
#[derive(Debug, Default)]
pub struct MemoryMap {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryMap {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SharedMap for MemoryMap {
    async fn get(&self, key: &str) -> Result<Option<String>, MapError> {
        let entries = self.entries.lock().expect("map lock poisoned");
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), MapError> {
        let mut entries = self.entries.lock().expect("map lock poisoned");
        entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn put_if_absent(
        &self,
        key: &str,
        value: String,
    ) -> Result<Option<String>, MapError> {
        let mut entries = self.entries.lock().expect("map lock poisoned");
        match entries.get(key) {
            Some(existing) => Ok(Some(existing.clone())),
            None => {
                entries.insert(key.to_string(), value);
                Ok(None)
            }
        }
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: String,
    ) -> Result<bool, MapError> {
        let mut entries = self.entries.lock().expect("map lock poisoned");
        let current = entries.get(key).map(String::as_str);
        if current == expected {
            entries.insert(key.to_string(), value);
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_if_absent_first_writer_wins() {
        let map = MemoryMap::new();
        let first = map.put_if_absent("id", "a".into()).await.unwrap();
        assert_eq!(first, None);

        let second = map.put_if_absent("id", "b".into()).await.unwrap();
        assert_eq!(second, Some("a".to_string()));

        assert_eq!(map.get("id").await.unwrap(), Some("a".to_string()));
    }

    #[tokio::test]
    async fn compare_and_swap_respects_expected_value() {
        let map = MemoryMap::new();

        // Absent key: only expected=None succeeds
        assert!(!map.compare_and_swap("k", Some("x"), "y".into()).await.unwrap());
        assert!(map.compare_and_swap("k", None, "v1".into()).await.unwrap());

        // Present key: must match the stored value
        assert!(!map.compare_and_swap("k", None, "v2".into()).await.unwrap());
        assert!(!map.compare_and_swap("k", Some("other"), "v2".into()).await.unwrap());
        assert!(map.compare_and_swap("k", Some("v1"), "v2".into()).await.unwrap());
        assert_eq!(map.get("k").await.unwrap(), Some("v2".to_string()));
    }

    #[tokio::test]
    async fn set_overwrites() {
        let map = MemoryMap::new();
        map.set("ts", "1".into()).await.unwrap();
        map.set("ts", "2".into()).await.unwrap();
        assert_eq!(map.get("ts").await.unwrap(), Some("2".to_string()));
    }
}
