//! Strongbox Vault - Metadata Store
//!
//! In-memory index of vault items, backed by the remote metadata store and
//! optionally by an encrypted on-disk snapshot (`CacheDb`).
//!
//! - The cache is authoritative for reads until invalidated, then rebuilt
//!   wholesale from the remote (never merged field by field)
//! - Writes are serialized per owner; the owner lock is held across the
//!   remote write
//! - The cached copy of an item is replaced only by a copy with an equal or
//!   newer `updated_at` (last write wins)

pub mod cache_db;

pub use cache_db::CacheDb;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::{VaultError, VaultResult};
use crate::model::{Listing, SortOption, VaultItem, VaultStats};
use crate::remote::MetadataRemote;

type OwnerItems = HashMap<String, VaultItem>;

/// Per-owner cache slot; `None` until loaded or after invalidation
#[derive(Default)]
struct OwnerCache {
    items: Option<OwnerItems>,
}

/// Metadata Store
pub struct MetadataStore {
    remote: Arc<dyn MetadataRemote>,
    owners: Mutex<HashMap<String, Arc<tokio::sync::Mutex<OwnerCache>>>>,
    sort: RwLock<SortOption>,
    cache_db: Option<Arc<CacheDb>>,
}

impl MetadataStore {
    pub fn new(remote: Arc<dyn MetadataRemote>, sort: SortOption) -> Self {
        Self {
            remote,
            owners: Mutex::new(HashMap::new()),
            sort: RwLock::new(sort),
            cache_db: None,
        }
    }

    /// Persist snapshots to `cache_db` and prefer it over the remote on a cold start
    pub fn with_cache_db(mut self, cache_db: Arc<CacheDb>) -> Self {
        self.cache_db = Some(cache_db);
        self
    }

    pub fn sort_option(&self) -> SortOption {
        *self.sort.read()
    }

    pub fn set_sort(&self, sort: SortOption) {
        *self.sort.write() = sort;
    }

    fn owner_slot(&self, owner_id: &str) -> Arc<tokio::sync::Mutex<OwnerCache>> {
        self.owners
            .lock()
            .entry(owner_id.to_string())
            .or_default()
            .clone()
    }

    async fn loaded<'a>(
        &self,
        owner_id: &str,
        slot: &'a mut OwnerCache,
    ) -> VaultResult<&'a mut OwnerItems> {
        if slot.items.is_none() {
            slot.items = Some(self.load_owner(owner_id).await?);
        }
        slot.items
            .as_mut()
            .ok_or_else(|| VaultError::Cache(format!("cache for {owner_id} not loaded")))
    }

    async fn load_owner(&self, owner_id: &str) -> VaultResult<OwnerItems> {
        if let Some(db) = &self.cache_db {
            match db.load_owner(owner_id) {
                Ok(Some(items)) => {
                    debug!(owner_id, items = items.len(), "metadata loaded from local cache");
                    return Ok(into_map(items));
                }
                Ok(None) => {}
                Err(e) => warn!(owner_id, error = %e, "local metadata cache unreadable"),
            }
        }

        let items = self.remote.fetch_items(owner_id).await?;
        let items: Vec<_> = items.into_iter().filter(|i| i.owner_id == owner_id).collect();
        debug!(owner_id, items = items.len(), "metadata loaded from remote");

        if let Some(db) = &self.cache_db {
            if let Err(e) = db.replace_owner(owner_id, &items) {
                warn!(owner_id, error = %e, "failed to store metadata snapshot");
            }
        }
        Ok(into_map(items))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // READS
    // ═══════════════════════════════════════════════════════════════════════

    /// Children of `parent_id` (root when `None`) in the active sort order
    pub async fn list(
        &self,
        owner_id: &str,
        parent_id: Option<&str>,
        include_deleted: bool,
    ) -> VaultResult<Listing> {
        let slot = self.owner_slot(owner_id);
        let mut guard = slot.lock().await;
        let items = &*self.loaded(owner_id, &mut guard).await?;

        let mut children: Vec<_> = items
            .values()
            .filter(|i| i.parent_id.as_deref() == parent_id && i.is_listed(include_deleted))
            .filter(|i| include_deleted || !hidden_by_ancestor(items, i))
            .cloned()
            .collect();
        drop(guard);

        self.sort_option().sort(&mut children);
        Ok(Listing::new(children))
    }

    pub async fn get(&self, owner_id: &str, item_id: &str) -> VaultResult<VaultItem> {
        let slot = self.owner_slot(owner_id);
        let mut guard = slot.lock().await;
        self.loaded(owner_id, &mut guard)
            .await?
            .get(item_id)
            .cloned()
            .ok_or_else(|| VaultError::NotFound(format!("item {item_id}")))
    }

    /// Every item of the owner, including deleted and purge-pending ones
    pub async fn all_items(&self, owner_id: &str) -> VaultResult<Vec<VaultItem>> {
        let slot = self.owner_slot(owner_id);
        let mut guard = slot.lock().await;
        Ok(self.loaded(owner_id, &mut guard).await?.values().cloned().collect())
    }

    /// Fails unless `parent_id` is a live folder of `owner_id`
    pub async fn ensure_parent(&self, owner_id: &str, parent_id: Option<&str>) -> VaultResult<()> {
        let Some(parent_id) = parent_id else {
            return Ok(());
        };
        let slot = self.owner_slot(owner_id);
        let mut guard = slot.lock().await;
        let items = self.loaded(owner_id, &mut guard).await?;
        check_parent(items, parent_id).map(|_| ())
    }

    /// Whether `folder_id` is a folder that is neither deleted nor inside a
    /// deleted folder
    pub async fn folder_is_live(&self, owner_id: &str, folder_id: &str) -> VaultResult<bool> {
        let slot = self.owner_slot(owner_id);
        let mut guard = slot.lock().await;
        let items = &*self.loaded(owner_id, &mut guard).await?;
        Ok(check_parent(items, folder_id).is_ok())
    }

    /// Groups of live files sharing a content hash, for the caller to review
    pub async fn find_duplicates(&self, owner_id: &str) -> VaultResult<Vec<Vec<VaultItem>>> {
        let slot = self.owner_slot(owner_id);
        let mut guard = slot.lock().await;
        let items = &*self.loaded(owner_id, &mut guard).await?;

        let mut groups: BTreeMap<String, Vec<VaultItem>> = BTreeMap::new();
        for item in items.values() {
            if item.is_file() && !item.content_hash.is_empty() && is_live(items, item) {
                groups.entry(item.content_hash.clone()).or_default().push(item.clone());
            }
        }
        drop(guard);

        Ok(groups
            .into_values()
            .filter(|group| group.len() > 1)
            .map(|mut group| {
                group.sort_by(|a, b| a.id.cmp(&b.id));
                group
            })
            .collect())
    }

    /// Items inside a deleted folder count as deleted
    pub async fn stats(&self, owner_id: &str) -> VaultResult<VaultStats> {
        let slot = self.owner_slot(owner_id);
        let mut guard = slot.lock().await;
        let items = &*self.loaded(owner_id, &mut guard).await?;

        let mut stats = VaultStats::default();
        for item in items.values() {
            if item.purge_pending {
                stats.purge_pending += 1;
            } else if !is_live(items, item) {
                stats.deleted += 1;
            } else if item.is_folder() {
                stats.folders += 1;
            } else {
                stats.files += 1;
                stats.total_bytes += item.size_bytes;
            }
        }
        Ok(stats)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // WRITES
    // ═══════════════════════════════════════════════════════════════════════

    /// Create or replace an item. Returns the stored copy.
    pub async fn upsert(&self, item: VaultItem) -> VaultResult<VaultItem> {
        let slot = self.owner_slot(&item.owner_id);
        let mut guard = slot.lock().await;
        let items = self.loaded(&item.owner_id, &mut guard).await?;
        self.write_locked(items, item).await
    }

    /// Read-modify-write of one item under the owner lock
    pub async fn update_with<F>(&self, owner_id: &str, item_id: &str, apply: F) -> VaultResult<VaultItem>
    where
        F: FnOnce(&mut VaultItem) -> VaultResult<()> + Send,
    {
        let slot = self.owner_slot(owner_id);
        let mut guard = slot.lock().await;
        let items = self.loaded(owner_id, &mut guard).await?;

        let mut item = items
            .get(item_id)
            .cloned()
            .ok_or_else(|| VaultError::NotFound(format!("item {item_id}")))?;
        apply(&mut item)?;
        self.write_locked(items, item).await
    }

    pub async fn rename(&self, owner_id: &str, item_id: &str, name: &str) -> VaultResult<VaultItem> {
        let name = name.trim().to_string();
        self.update_with(owner_id, item_id, move |item| {
            item.name = name;
            Ok(())
        })
        .await
    }

    pub async fn move_item(
        &self,
        owner_id: &str,
        item_id: &str,
        new_parent: Option<&str>,
    ) -> VaultResult<VaultItem> {
        let new_parent = new_parent.map(str::to_string);
        self.update_with(owner_id, item_id, move |item| {
            item.parent_id = new_parent;
            Ok(())
        })
        .await
    }

    /// Delete the metadata document. A document already gone counts as removed.
    pub async fn remove(&self, owner_id: &str, item_id: &str) -> VaultResult<()> {
        let slot = self.owner_slot(owner_id);
        let mut guard = slot.lock().await;

        match self.remote.delete_item(owner_id, item_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => debug!(owner_id, item_id, "metadata already removed"),
            Err(e) => return Err(e.into()),
        }

        if let Some(items) = guard.items.as_mut() {
            items.remove(item_id);
        }
        if let Some(db) = &self.cache_db {
            if let Err(e) = db.remove_item(owner_id, item_id) {
                warn!(owner_id, item_id, error = %e, "failed to update local metadata cache");
            }
        }
        Ok(())
    }

    /// Drop the owner's cached listing; the next read rebuilds it from the remote
    pub async fn invalidate_cache(&self, owner_id: &str) -> VaultResult<()> {
        let slot = self.owner_slot(owner_id);
        slot.lock().await.items = None;
        if let Some(db) = &self.cache_db {
            db.invalidate_owner(owner_id)?;
        }
        debug!(owner_id, "metadata cache invalidated");
        Ok(())
    }

    /// Forget all in-memory metadata (the on-disk snapshot stays sealed)
    pub fn clear_memory(&self) {
        self.owners.lock().clear();
    }

    async fn write_locked(&self, items: &mut OwnerItems, item: VaultItem) -> VaultResult<VaultItem> {
        validate_item(items, &item)?;

        let stored = self.remote.put_item(&item).await?;

        let cached_is_newer = items
            .get(&stored.id)
            .is_some_and(|cached| cached.updated_at > stored.updated_at);
        if cached_is_newer {
            debug!(item_id = %stored.id, "newer cached copy kept");
        } else {
            items.insert(stored.id.clone(), stored.clone());
        }
        let winner = items.get(&stored.id).unwrap_or(&stored);
        if let Some(db) = &self.cache_db {
            if let Err(e) = db.put_item(winner) {
                warn!(item_id = %stored.id, error = %e, "failed to update local metadata cache");
            }
        }
        Ok(stored)
    }
}

fn into_map(items: Vec<VaultItem>) -> OwnerItems {
    items.into_iter().map(|i| (i.id.clone(), i)).collect()
}

/// Some folder above `item` is deleted or being purged
fn hidden_by_ancestor(items: &OwnerItems, item: &VaultItem) -> bool {
    let mut seen = HashSet::new();
    let mut cursor = item.parent_id.as_deref();
    while let Some(id) = cursor {
        if !seen.insert(id) {
            break;
        }
        match items.get(id) {
            Some(parent) if parent.is_deleted || parent.purge_pending => return true,
            Some(parent) => cursor = parent.parent_id.as_deref(),
            None => break,
        }
    }
    false
}

fn is_live(items: &OwnerItems, item: &VaultItem) -> bool {
    item.is_listed(false) && !hidden_by_ancestor(items, item)
}

fn check_parent<'a>(items: &'a OwnerItems, parent_id: &str) -> VaultResult<&'a VaultItem> {
    let parent = items
        .get(parent_id)
        .ok_or_else(|| VaultError::NotFound(format!("parent folder {parent_id}")))?;
    if !parent.is_folder() {
        return Err(VaultError::invalid(format!("{parent_id} is not a folder")));
    }
    if !is_live(items, parent) {
        return Err(VaultError::invalid(format!("folder {parent_id} is deleted")));
    }
    Ok(parent)
}

/// Structural checks for a write of `item` against the owner's current items
fn validate_item(items: &OwnerItems, item: &VaultItem) -> VaultResult<()> {
    if item.name.trim().is_empty() {
        return Err(VaultError::invalid("name must not be empty"));
    }

    let existing = items.get(&item.id);
    if let Some(existing) = existing {
        if existing.kind != item.kind || existing.owner_id != item.owner_id {
            return Err(VaultError::invalid(format!(
                "item {} cannot change kind or owner",
                item.id
            )));
        }
    }

    // Parent rules apply to new items, moves and restores
    let parent_changed = existing.map_or(true, |e| e.parent_id != item.parent_id);
    let restored = existing.map_or(false, |e| e.is_deleted && !item.is_deleted);
    if !(parent_changed || restored) {
        return Ok(());
    }

    let Some(parent_id) = item.parent_id.as_deref() else {
        return Ok(());
    };
    if parent_id == item.id {
        return Err(VaultError::invalid("an item cannot contain itself"));
    }
    check_parent(items, parent_id)?;

    // Walk up from the new parent; meeting the item means a cycle
    let mut seen = HashSet::new();
    let mut cursor = Some(parent_id);
    while let Some(id) = cursor {
        if id == item.id {
            return Err(VaultError::invalid(format!(
                "moving {} under {parent_id} would create a cycle",
                item.id
            )));
        }
        if !seen.insert(id) {
            break;
        }
        cursor = items.get(id).and_then(|i| i.parent_id.as_deref());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemote;

    fn store() -> (MetadataStore, MemoryRemote) {
        let remote = MemoryRemote::new();
        let store = MetadataStore::new(Arc::new(remote.clone()), SortOption::Name);
        (store, remote)
    }

    fn folder(id: &str, parent: Option<&str>) -> VaultItem {
        VaultItem::new_folder(id.into(), "u1", id.to_uppercase(), parent.map(str::to_string))
    }

    #[tokio::test]
    async fn test_list_by_parent() {
        let (store, _) = store();
        store.upsert(folder("a", None)).await.unwrap();
        store.upsert(folder("b", None)).await.unwrap();
        store.upsert(folder("c", Some("a"))).await.unwrap();

        let root: Vec<_> = store.list("u1", None, false).await.unwrap().map(|i| i.id).collect();
        assert_eq!(root, vec!["a", "b"]);
        let inner: Vec<_> = store.list("u1", Some("a"), false).await.unwrap().map(|i| i.id).collect();
        assert_eq!(inner, vec!["c"]);
    }

    #[tokio::test]
    async fn test_parent_validation() {
        let (store, remote) = store();
        store.upsert(folder("a", None)).await.unwrap();

        let err = store.upsert(folder("x", Some("missing"))).await.unwrap_err();
        assert!(matches!(err, VaultError::NotFound(_)));

        let mut file = folder("f", None);
        file.kind = crate::model::ItemKind::File;
        store.upsert(file).await.unwrap();
        let err = store.upsert(folder("y", Some("f"))).await.unwrap_err();
        assert!(matches!(err, VaultError::InvalidData(_)));

        assert_eq!(remote.item_count("u1"), 2);
    }

    #[tokio::test]
    async fn test_move_rejects_cycle() {
        let (store, _) = store();
        store.upsert(folder("a", None)).await.unwrap();
        store.upsert(folder("b", Some("a"))).await.unwrap();
        store.upsert(folder("c", Some("b"))).await.unwrap();

        let err = store.move_item("u1", "a", Some("c")).await.unwrap_err();
        assert!(matches!(err, VaultError::InvalidData(_)));
        let err = store.move_item("u1", "a", Some("a")).await.unwrap_err();
        assert!(matches!(err, VaultError::InvalidData(_)));

        let moved = store.move_item("u1", "c", None).await.unwrap();
        assert_eq!(moved.parent_id, None);
    }

    #[tokio::test]
    async fn test_cache_is_authoritative_until_invalidated() {
        let (store, remote) = store();
        store.upsert(folder("a", None)).await.unwrap();
        assert_eq!(store.list("u1", None, false).await.unwrap().len(), 1);

        // Written behind the store's back
        remote.put_item(&folder("b", None)).await.unwrap();
        assert_eq!(store.list("u1", None, false).await.unwrap().len(), 1);

        store.invalidate_cache("u1").await.unwrap();
        assert_eq!(store.list("u1", None, false).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let (store, remote) = store();
        store.upsert(folder("a", None)).await.unwrap();
        store.remove("u1", "a").await.unwrap();
        store.remove("u1", "a").await.unwrap();
        assert_eq!(remote.item_count("u1"), 0);
        assert!(matches!(store.get("u1", "a").await, Err(VaultError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_deleted_folder_hides_its_subtree() {
        let (store, _) = store();
        store.upsert(folder("a", None)).await.unwrap();
        store.upsert(folder("b", Some("a"))).await.unwrap();
        store.upsert(folder("c", Some("b"))).await.unwrap();
        store
            .update_with("u1", "a", |item| {
                item.is_deleted = true;
                Ok(())
            })
            .await
            .unwrap();

        assert!(store.list("u1", Some("b"), false).await.unwrap().is_empty());
        assert_eq!(store.list("u1", Some("b"), true).await.unwrap().len(), 1);
        assert!(!store.folder_is_live("u1", "c").await.unwrap());

        let stats = store.stats("u1").await.unwrap();
        assert_eq!((stats.folders, stats.deleted), (0, 3));

        let err = store.upsert(folder("d", Some("c"))).await.unwrap_err();
        assert!(matches!(err, VaultError::InvalidData(_)));
    }

    #[tokio::test]
    async fn test_snapshot_follows_last_write_wins() {
        let remote = MemoryRemote::new();
        let db = Arc::new(CacheDb::in_memory().unwrap());
        let store = MetadataStore::new(Arc::new(remote.clone()), SortOption::Name)
            .with_cache_db(Arc::clone(&db));

        let t1 = chrono::Utc::now();
        remote.freeze_clock(Some(t1));
        store.upsert(folder("a", None)).await.unwrap();

        // Server clock behind the cached copy
        remote.freeze_clock(Some(t1 - chrono::Duration::hours(1)));
        store.rename("u1", "a", "Late").await.unwrap();

        let cached = store.get("u1", "a").await.unwrap();
        let persisted = db.load_owner("u1").unwrap().unwrap();
        assert_eq!(cached.name, "A");
        assert_eq!(persisted, vec![cached]);
    }

    #[tokio::test]
    async fn test_rename_rejects_empty_name() {
        let (store, _) = store();
        store.upsert(folder("a", None)).await.unwrap();
        assert!(store.rename("u1", "a", "   ").await.is_err());
        assert_eq!(store.rename("u1", "a", " Taxes ").await.unwrap().name, "Taxes");
    }
}
