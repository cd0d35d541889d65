//! Strongbox Vault - Item model, sort orders and listings

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// File or folder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    File,
    Folder,
}

/// One file or folder record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultItem {
    /// Unique ID (UUID v4), immutable
    pub id: String,
    /// Owning identity, immutable
    pub owner_id: String,
    pub kind: ItemKind,
    /// Display name
    pub name: String,
    /// Containing folder, `None` at the root
    pub parent_id: Option<String>,
    /// Plaintext size (0 for folders)
    pub size_bytes: u64,
    /// Empty for folders
    pub mime_type: String,
    /// KeyStore reference (files only)
    pub encryption_key_id: Option<String>,
    /// SHA-256 of the plaintext, hex. Empty for folders.
    pub content_hash: String,
    /// Blob address of the ciphertext (files only)
    #[serde(default)]
    pub storage_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_deleted: bool,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    /// A purge started but did not finish
    #[serde(default)]
    pub purge_pending: bool,
}

impl VaultItem {
    /// New file record. Timestamps are provisional until the remote store
    /// assigns its own.
    pub fn new_file(
        id: String,
        owner_id: &str,
        name: String,
        parent_id: Option<String>,
        size_bytes: u64,
        mime_type: String,
        encryption_key_id: String,
        content_hash: String,
        storage_path: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner_id: owner_id.to_string(),
            kind: ItemKind::File,
            name,
            parent_id,
            size_bytes,
            mime_type,
            encryption_key_id: Some(encryption_key_id),
            content_hash,
            storage_path: Some(storage_path),
            created_at: now,
            updated_at: now,
            is_deleted: false,
            deleted_at: None,
            purge_pending: false,
        }
    }

    pub fn new_folder(id: String, owner_id: &str, name: String, parent_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner_id: owner_id.to_string(),
            kind: ItemKind::Folder,
            name,
            parent_id,
            size_bytes: 0,
            mime_type: String::new(),
            encryption_key_id: None,
            content_hash: String::new(),
            storage_path: None,
            created_at: now,
            updated_at: now,
            is_deleted: false,
            deleted_at: None,
            purge_pending: false,
        }
    }

    pub fn is_folder(&self) -> bool {
        self.kind == ItemKind::Folder
    }

    pub fn is_file(&self) -> bool {
        self.kind == ItemKind::File
    }

    /// Shown in listings: not soft-deleted (unless asked for) and not stuck
    /// half-purged
    pub fn is_listed(&self, include_deleted: bool) -> bool {
        !self.purge_pending && (include_deleted || !self.is_deleted)
    }
}

/// Listing order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortOption {
    /// Case-insensitive name, A to Z
    Name,
    /// Newest first
    #[default]
    DateDescending,
    /// Largest first
    Size,
}

impl SortOption {
    /// Total order: the option's key, then `id` so equal keys stay stable
    pub fn compare(&self, a: &VaultItem, b: &VaultItem) -> Ordering {
        let primary = match self {
            SortOption::Name => a
                .name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| a.name.cmp(&b.name)),
            SortOption::DateDescending => b.created_at.cmp(&a.created_at),
            SortOption::Size => b.size_bytes.cmp(&a.size_bytes),
        };
        primary.then_with(|| a.id.cmp(&b.id))
    }

    pub fn sort(&self, items: &mut [VaultItem]) {
        items.sort_by(|a, b| self.compare(a, b));
    }
}

impl std::str::FromStr for SortOption {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "name" => Ok(SortOption::Name),
            "date" | "date-descending" => Ok(SortOption::DateDescending),
            "size" => Ok(SortOption::Size),
            other => Err(format!("unknown sort option: {other}")),
        }
    }
}

/// Snapshot of one folder listing.
///
/// Iterates lazily over a shared, already-ordered snapshot; `restart`
/// rewinds without touching the store again.
#[derive(Debug, Clone)]
pub struct Listing {
    items: Arc<[VaultItem]>,
    cursor: usize,
}

impl Listing {
    pub fn new(items: Vec<VaultItem>) -> Self {
        Self {
            items: items.into(),
            cursor: 0,
        }
    }

    pub fn restart(&mut self) {
        self.cursor = 0;
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn as_slice(&self) -> &[VaultItem] {
        &self.items
    }
}

impl Iterator for Listing {
    type Item = VaultItem;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.items.get(self.cursor).cloned();
        if item.is_some() {
            self.cursor += 1;
        }
        item
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.items.len() - self.cursor;
        (remaining, Some(remaining))
    }
}

/// Counts for one owner
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VaultStats {
    pub files: usize,
    pub folders: usize,
    pub deleted: usize,
    pub purge_pending: usize,
    pub total_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn item(id: &str, name: &str, size: u64, ts: i64) -> VaultItem {
        let mut item = VaultItem::new_folder(id.into(), "u1", name.into(), None);
        item.size_bytes = size;
        item.created_at = Utc.timestamp_opt(ts, 0).unwrap();
        item
    }

    #[test]
    fn test_date_desc_ties_by_id() {
        let mut items = vec![item("c", "x", 0, 10), item("a", "y", 0, 10), item("b", "z", 0, 20)];
        SortOption::DateDescending.sort(&mut items);
        let ids: Vec<_> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_name_and_size() {
        let mut items = vec![item("1", "beta", 5, 0), item("2", "Alpha", 50, 0), item("3", "alpha", 50, 0)];

        SortOption::Name.sort(&mut items);
        let names: Vec<_> = items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "alpha", "beta"]);

        SortOption::Size.sort(&mut items);
        let ids: Vec<_> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "3", "1"]);
    }

    #[test]
    fn test_listing_restart() {
        let mut listing = Listing::new(vec![item("a", "a", 0, 0), item("b", "b", 0, 0)]);
        assert_eq!(listing.next().unwrap().id, "a");
        assert_eq!(listing.size_hint(), (1, Some(1)));
        listing.restart();
        let ids: Vec<_> = listing.map(|i| i.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_parse_sort_option() {
        assert_eq!("size".parse::<SortOption>().unwrap(), SortOption::Size);
        assert!("random".parse::<SortOption>().is_err());
    }
}
