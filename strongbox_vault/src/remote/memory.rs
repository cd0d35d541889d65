//! In-memory remote for tests and ephemeral sessions

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{stamp, BlobStore, MetadataRemote, RemoteError, RemoteResult};
use crate::model::VaultItem;

#[derive(Default)]
struct Inner {
    /// owner -> item id -> item
    items: HashMap<String, HashMap<String, VaultItem>>,
    blobs: BTreeMap<String, Vec<u8>>,
    frozen_now: Option<DateTime<Utc>>,
}

/// Metadata and blob store held in process memory.
///
/// Clones share the same state.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the server clock (`None` restores wall time)
    pub fn freeze_clock(&self, at: Option<DateTime<Utc>>) {
        self.inner.write().frozen_now = at;
    }

    pub fn blob_count(&self) -> usize {
        self.inner.read().blobs.len()
    }

    pub fn blob_paths(&self) -> Vec<String> {
        self.inner.read().blobs.keys().cloned().collect()
    }

    pub fn has_blob(&self, path: &str) -> bool {
        self.inner.read().blobs.contains_key(path)
    }

    pub fn item_count(&self, owner_id: &str) -> usize {
        self.inner
            .read()
            .items
            .get(owner_id)
            .map(|items| items.len())
            .unwrap_or(0)
    }

    /// Stored copy of one item, bypassing any cache
    pub fn stored_item(&self, owner_id: &str, item_id: &str) -> Option<VaultItem> {
        self.inner
            .read()
            .items
            .get(owner_id)
            .and_then(|items| items.get(item_id))
            .cloned()
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner.read().frozen_now.unwrap_or_else(Utc::now)
    }
}

#[async_trait]
impl MetadataRemote for MemoryRemote {
    async fn fetch_items(&self, owner_id: &str) -> RemoteResult<Vec<VaultItem>> {
        Ok(self
            .inner
            .read()
            .items
            .get(owner_id)
            .map(|items| items.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn put_item(&self, item: &VaultItem) -> RemoteResult<VaultItem> {
        let now = self.now();
        let mut inner = self.inner.write();
        let owner_items = inner.items.entry(item.owner_id.clone()).or_default();

        let stored = stamp(item, owner_items.get(&item.id), now);
        owner_items.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn delete_item(&self, owner_id: &str, item_id: &str) -> RemoteResult<()> {
        self.inner
            .write()
            .items
            .get_mut(owner_id)
            .and_then(|items| items.remove(item_id))
            .map(|_| ())
            .ok_or_else(|| RemoteError::NotFound(format!("item {item_id}")))
    }
}

#[async_trait]
impl BlobStore for MemoryRemote {
    async fn put_blob(&self, path: &str, data: Vec<u8>) -> RemoteResult<()> {
        self.inner.write().blobs.insert(path.to_string(), data);
        Ok(())
    }

    async fn get_blob(&self, path: &str) -> RemoteResult<Vec<u8>> {
        self.inner
            .read()
            .blobs
            .get(path)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("blob {path}")))
    }

    async fn delete_blob(&self, path: &str) -> RemoteResult<()> {
        self.inner
            .write()
            .blobs
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| RemoteError::NotFound(format!("blob {path}")))
    }

    async fn list_blobs(&self, prefix: &str) -> RemoteResult<Vec<String>> {
        Ok(self
            .inner
            .read()
            .blobs
            .keys()
            .filter(|path| path.starts_with(prefix))
            .cloned()
            .collect())
    }
}
