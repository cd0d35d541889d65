//! Strongbox Vault - Recycle bin and lifecycle
//!
//! Soft delete and restore flip `is_deleted`. Purge is irreversible:
//! blob and key go first, metadata last, so a failed purge leaves the item
//! in place (flagged `purge_pending`) for the next attempt.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use strongbox_keystore::{KeyStore, KeyStoreError};
use tracing::{debug, info, warn};

use crate::error::{VaultError, VaultResult};
use crate::ingest::OrphanLedger;
use crate::metadata::MetadataStore;
use crate::model::VaultItem;
use crate::remote::{owner_blob_prefix, BlobStore};

/// Outcome of a retention sweep
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub purged: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl SweepReport {
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Outcome of a reconciliation pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub blobs_deleted: Vec<String>,
    pub keys_deleted: Vec<String>,
    pub failures: Vec<String>,
}

/// Recycle/lifecycle manager
#[derive(Clone)]
pub struct Recycler {
    metadata: Arc<MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    keystore: Arc<dyn KeyStore>,
    orphans: Arc<OrphanLedger>,
}

impl Recycler {
    pub fn new(
        metadata: Arc<MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        keystore: Arc<dyn KeyStore>,
        orphans: Arc<OrphanLedger>,
    ) -> Self {
        Self {
            metadata,
            blobs,
            keystore,
            orphans,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // SOFT DELETE / RESTORE
    // ═══════════════════════════════════════════════════════════════════════

    /// Move to the recycle bin. Descendants of a folder are hidden with it.
    pub async fn soft_delete(&self, owner_id: &str, item_id: &str) -> VaultResult<VaultItem> {
        let item = self
            .metadata
            .update_with(owner_id, item_id, |item| {
                item.is_deleted = true;
                item.deleted_at = Some(Utc::now());
                Ok(())
            })
            .await?;
        self.invalidate(owner_id).await;
        debug!(owner_id, item_id, "item moved to recycle bin");
        Ok(item)
    }

    /// Take out of the recycle bin. An item whose folder is gone or itself
    /// deleted comes back at the root.
    pub async fn restore(&self, owner_id: &str, item_id: &str) -> VaultResult<VaultItem> {
        let current = self.metadata.get(owner_id, item_id).await?;
        if current.purge_pending {
            return Err(VaultError::invalid(format!("{item_id} is being purged")));
        }

        let parent_alive = match current.parent_id.as_deref() {
            Some(parent_id) => self.metadata.folder_is_live(owner_id, parent_id).await?,
            None => true,
        };

        let item = self
            .metadata
            .update_with(owner_id, item_id, move |item| {
                item.is_deleted = false;
                item.deleted_at = None;
                if !parent_alive {
                    item.parent_id = None;
                }
                Ok(())
            })
            .await?;
        self.invalidate(owner_id).await;
        debug!(owner_id, item_id, "item restored");
        Ok(item)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // PURGE
    // ═══════════════════════════════════════════════════════════════════════

    /// Irreversibly remove an item (a folder with everything below it).
    ///
    /// Retrying after `PurgeFailed` is safe: a blob or key already gone
    /// counts as deleted.
    pub async fn purge(&self, owner_id: &str, item_id: &str) -> VaultResult<()> {
        let items = self.metadata.all_items(owner_id).await?;
        let Some(root) = items.iter().find(|i| i.id == item_id) else {
            return Err(VaultError::NotFound(format!("item {item_id}")));
        };
        if !root.purge_pending {
            self.mark_pending(root).await?;
        }

        // Children before parents; a folder whose subtree failed stays behind
        let mut failure = None;
        for item in purge_order(&items, item_id) {
            if failure.is_some() && item.is_folder() {
                continue;
            }
            if let Err(e) = self.purge_one(&item, item.id != item_id).await {
                failure.get_or_insert(e);
            }
        }
        self.invalidate(owner_id).await;

        match failure {
            None => {
                info!(owner_id, item_id, "item purged");
                Ok(())
            }
            Some(e) => Err(e),
        }
    }

    async fn purge_one(&self, item: &VaultItem, mark: bool) -> VaultResult<()> {
        // Hide it first so a partial purge never shows up as a live item
        if mark && !item.purge_pending {
            self.mark_pending(item).await?;
        }

        let failed = |reason: String| VaultError::PurgeFailed {
            item_id: item.id.clone(),
            reason,
        };

        if let Some(path) = item.storage_path.as_deref() {
            match self.blobs.delete_blob(path).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => debug!(path, "blob already gone"),
                Err(e) => {
                    warn!(item_id = %item.id, error = %e, "purge could not delete blob");
                    return Err(failed(format!("blob: {e}")));
                }
            }
        }

        if let Some(key_id) = item.encryption_key_id.clone() {
            let keystore = Arc::clone(&self.keystore);
            let deleted = tokio::task::spawn_blocking(move || keystore.delete(&key_id)).await?;
            match deleted {
                Ok(()) | Err(KeyStoreError::NotFound(_)) => {}
                Err(e) => {
                    warn!(item_id = %item.id, error = %e, "purge could not delete key");
                    return Err(failed(format!("key: {e}")));
                }
            }
        }

        self.metadata
            .remove(&item.owner_id, &item.id)
            .await
            .map_err(|e| failed(format!("metadata: {e}")))?;
        debug!(item_id = %item.id, "purged");
        Ok(())
    }

    async fn mark_pending(&self, item: &VaultItem) -> VaultResult<()> {
        self.metadata
            .update_with(&item.owner_id, &item.id, |i| {
                i.purge_pending = true;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // SWEEPS
    // ═══════════════════════════════════════════════════════════════════════

    /// Purge soft-deleted items older than `retention`, and retry every
    /// item left in `purge_pending`
    pub async fn sweep_with_retention(&self, owner_id: &str, retention: Duration) -> VaultResult<SweepReport> {
        // No cutoff when the retention reaches past the calendar
        let cutoff = Utc::now().checked_sub_signed(retention);
        let items = self.metadata.all_items(owner_id).await?;
        let by_id: HashMap<&str, &VaultItem> =
            items.iter().map(|i| (i.id.as_str(), i)).collect();

        let due = |item: &VaultItem| {
            item.purge_pending
                || (item.is_deleted
                    && cutoff.is_some_and(|cutoff| item.deleted_at.unwrap_or(item.updated_at) <= cutoff))
        };

        // Only the top-most due item of each subtree; purge takes the rest
        let mut candidates: Vec<&VaultItem> = items
            .iter()
            .filter(|item| due(item))
            .filter(|item| {
                let mut seen = HashSet::new();
                let mut cursor = item.parent_id.as_deref();
                while let Some(parent_id) = cursor {
                    if !seen.insert(parent_id) {
                        break;
                    }
                    match by_id.get(parent_id) {
                        Some(parent) if due(parent) => return false,
                        Some(parent) => cursor = parent.parent_id.as_deref(),
                        None => break,
                    }
                }
                true
            })
            .collect();
        candidates.sort_by(|a, b| a.id.cmp(&b.id));

        let mut report = SweepReport::default();
        for item in candidates {
            match self.purge(owner_id, &item.id).await {
                Ok(()) => report.purged.push(item.id.clone()),
                Err(VaultError::NotFound(_)) => {}
                Err(e) => report.failed.push((item.id.clone(), e.to_string())),
            }
        }

        info!(
            owner_id,
            purged = report.purged.len(),
            failed = report.failed.len(),
            "recycle bin swept"
        );
        Ok(report)
    }

    /// Delete blobs and keys of `owner_id` that no item references
    pub async fn reconcile(&self, owner_id: &str) -> VaultResult<ReconcileReport> {
        // Decide against the remote's view, not a possibly stale cache
        self.metadata.invalidate_cache(owner_id).await?;
        let items = self.metadata.all_items(owner_id).await?;

        let referenced_paths: HashSet<&str> =
            items.iter().filter_map(|i| i.storage_path.as_deref()).collect();
        let referenced_keys: HashSet<&str> =
            items.iter().filter_map(|i| i.encryption_key_id.as_deref()).collect();

        let mut report = ReconcileReport::default();

        for path in self.blobs.list_blobs(&owner_blob_prefix(owner_id)).await? {
            if referenced_paths.contains(path.as_str()) {
                continue;
            }
            match self.blobs.delete_blob(&path).await {
                Ok(()) => report.blobs_deleted.push(path.clone()),
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    report.failures.push(format!("blob {path}: {e}"));
                    continue;
                }
            }
            self.orphans.clear(owner_id, &path);
        }
        // Ledger entries whose blob never landed or is already gone
        for path in self.orphans.pending(owner_id) {
            if !referenced_paths.contains(path.as_str())
                && !report.failures.iter().any(|f| f.contains(&path))
            {
                self.orphans.clear(owner_id, &path);
            }
        }

        let keystore = Arc::clone(&self.keystore);
        let owner = owner_id.to_string();
        let key_ids = tokio::task::spawn_blocking(move || keystore.key_ids(&owner)).await??;
        for key_id in key_ids {
            if referenced_keys.contains(key_id.as_str()) {
                continue;
            }
            let keystore = Arc::clone(&self.keystore);
            let id = key_id.clone();
            match tokio::task::spawn_blocking(move || keystore.delete(&id)).await? {
                Ok(()) => report.keys_deleted.push(key_id),
                Err(KeyStoreError::NotFound(_)) => {}
                Err(e) => report.failures.push(format!("key {key_id}: {e}")),
            }
        }

        if report.blobs_deleted.is_empty() && report.keys_deleted.is_empty() {
            debug!(owner_id, "reconcile found no orphans");
        } else {
            warn!(
                owner_id,
                blobs = report.blobs_deleted.len(),
                keys = report.keys_deleted.len(),
                "reconcile deleted orphans"
            );
        }
        Ok(report)
    }

    async fn invalidate(&self, owner_id: &str) {
        if let Err(e) = self.metadata.invalidate_cache(owner_id).await {
            warn!(owner_id, error = %e, "cache invalidation failed");
        }
    }
}

/// `root` and its descendants, deepest first
fn purge_order(items: &[VaultItem], root: &str) -> Vec<VaultItem> {
    let mut children: HashMap<&str, Vec<&VaultItem>> = HashMap::new();
    for item in items {
        if let Some(parent) = item.parent_id.as_deref() {
            children.entry(parent).or_default().push(item);
        }
    }

    let Some(root_item) = items.iter().find(|i| i.id == root) else {
        return Vec::new();
    };

    // Pre-order walk, reversed: every child lands before its parent
    let mut order = Vec::new();
    let mut stack = vec![root_item];
    let mut seen = HashSet::new();
    while let Some(item) = stack.pop() {
        if !seen.insert(item.id.as_str()) {
            continue;
        }
        order.push(item.clone());
        if let Some(kids) = children.get(item.id.as_str()) {
            let mut kids = kids.clone();
            kids.sort_by(|a, b| b.id.cmp(&a.id));
            stack.extend(kids);
        }
    }
    order.reverse();
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder(id: &str, parent: Option<&str>) -> VaultItem {
        VaultItem::new_folder(id.into(), "u1", id.into(), parent.map(str::to_string))
    }

    #[test]
    fn test_purge_order_children_first() {
        let items = vec![
            folder("root", None),
            folder("a", Some("root")),
            folder("a1", Some("a")),
            folder("b", Some("root")),
            folder("other", None),
        ];
        let order: Vec<_> = purge_order(&items, "root").into_iter().map(|i| i.id).collect();

        assert_eq!(order.len(), 4);
        assert_eq!(order.last().map(String::as_str), Some("root"));
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        assert!(pos("a1") < pos("a"));
        assert!(!order.contains(&"other".to_string()));
    }
}
