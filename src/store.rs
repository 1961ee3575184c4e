//! Shared key-value store
//!
//! Inter-process namespace scoped by group identifier. The privileged tunnel
//! process writes raw statistics into it; this crate writes back the single
//! composed connection-update record. The store is owned by the OS, so every
//! write here is best effort: failures are logged and never propagated.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Structured statistics record written by the privileged process
pub const VPN_STATISTICS_KEY: &str = "vpn_statistics";
/// Composed connection-update record written only by this crate
pub const CONNECTION_UPDATE_KEY: &str = "connectionUpdate";

/// Legacy scalar fallback keys
pub const LEGACY_BYTES_IN_KEY: &str = "bytes_in";
pub const LEGACY_BYTES_OUT_KEY: &str = "bytes_out";
pub const LEGACY_PACKETS_IN_KEY: &str = "packets_in";
pub const LEGACY_PACKETS_OUT_KEY: &str = "packets_out";
pub const LEGACY_CONNECTED_DATE_KEY: &str = "connected_date";

/// Group-scoped key-value namespace shared with the privileged process
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Whether a namespace exists for the group identifier
    async fn contains_group(&self, group: &str) -> bool;

    /// Read a value from the group namespace
    async fn get(&self, group: &str, key: &str) -> Option<Value>;

    /// Write a value into the group namespace (best effort)
    async fn set(&self, group: &str, key: &str, value: Value);

    /// Remove a key from the group namespace (best effort)
    async fn remove(&self, group: &str, key: &str);
}

/// In-process store used by tests and demos
#[derive(Default)]
pub struct MemoryStore {
    groups: RwLock<HashMap<String, HashMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn contains_group(&self, group: &str) -> bool {
        self.groups.read().await.contains_key(group)
    }

    async fn get(&self, group: &str, key: &str) -> Option<Value> {
        self.groups.read().await.get(group)?.get(key).cloned()
    }

    async fn set(&self, group: &str, key: &str, value: Value) {
        let mut groups = self.groups.write().await;
        groups
            .entry(group.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    async fn remove(&self, group: &str, key: &str) {
        let mut groups = self.groups.write().await;
        if let Some(entries) = groups.get_mut(group) {
            entries.remove(key);
        }
    }
}

/// File-backed store: one JSON document per group identifier under a root
/// directory. Stands in for the OS-managed shared namespace when both sides
/// agree on the root path.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn group_path(&self, group: &str) -> PathBuf {
        self.root.join(format!("{}.json", group))
    }

    async fn read_group(&self, group: &str) -> Option<HashMap<String, Value>> {
        let path = self.group_path(group);
        let content = tokio::fs::read_to_string(&path).await.ok()?;
        match serde_json::from_str(&content) {
            Ok(entries) => Some(entries),
            Err(e) => {
                warn!("Malformed shared store document {:?}: {}", path, e);
                None
            }
        }
    }

    async fn write_group(&self, group: &str, entries: &HashMap<String, Value>) {
        let path = self.group_path(group);
        let content = match serde_json::to_string_pretty(entries) {
            Ok(content) => content,
            Err(e) => {
                warn!("Failed to serialize shared store group {}: {}", group, e);
                return;
            }
        };
        if let Err(e) = tokio::fs::write(&path, content).await {
            warn!("Failed to write shared store document {:?}: {}", path, e);
        } else {
            debug!("Wrote shared store document {:?}", path);
        }
    }
}

#[async_trait]
impl SharedStore for FileStore {
    async fn contains_group(&self, group: &str) -> bool {
        self.group_path(group).exists()
    }

    async fn get(&self, group: &str, key: &str) -> Option<Value> {
        self.read_group(group).await?.remove(key)
    }

    async fn set(&self, group: &str, key: &str, value: Value) {
        let mut entries = self.read_group(group).await.unwrap_or_default();
        entries.insert(key.to_string(), value);
        self.write_group(group, &entries).await;
    }

    async fn remove(&self, group: &str, key: &str) {
        let Some(mut entries) = self.read_group(group).await else {
            return;
        };
        if entries.remove(key).is_some() {
            self.write_group(group, &entries).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_memory_store_round_trip() {
        tokio_test::block_on(async {
            let store = MemoryStore::new();
            assert!(!store.contains_group("group.app").await);

            store.set("group.app", "k", json!("v")).await;
            assert!(store.contains_group("group.app").await);
            assert_eq!(store.get("group.app", "k").await, Some(json!("v")));

            store.remove("group.app", "k").await;
            assert_eq!(store.get("group.app", "k").await, None);
        });
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf());
        assert!(!store.contains_group("group.app").await);

        store.set("group.app", "counter", json!(100u64)).await;
        store.set("group.app", "label", json!("up")).await;
        assert!(store.contains_group("group.app").await);
        assert_eq!(store.get("group.app", "counter").await, Some(json!(100u64)));
        assert_eq!(store.get("group.app", "label").await, Some(json!("up")));

        store.remove("group.app", "label").await;
        assert_eq!(store.get("group.app", "label").await, None);
        assert_eq!(store.get("group.app", "counter").await, Some(json!(100u64)));
    }

    #[tokio::test]
    async fn test_file_store_missing_group_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf());
        assert_eq!(store.get("nope", "k").await, None);
    }
}
