//! Strongbox Vault - Remote collaborators
//!
//! The remote metadata store is the source of truth for the item graph;
//! the blob store only ever sees ciphertext.
//!
//! ```text
//! ┌──────────────┐   put_item / fetch_items   ┌────────────────┐
//! │ MetadataStore│ ─────────────────────────▶ │ MetadataRemote │
//! └──────────────┘                            └────────────────┘
//! ┌──────────────┐   put_blob / get_blob      ┌────────────────┐
//! │ImportPipeline│ ─────────────────────────▶ │   BlobStore    │
//! └──────────────┘                            └────────────────┘
//! ```

pub mod fs;
pub mod memory;

pub use fs::FsRemote;
pub use memory::MemoryRemote;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::error::VaultError;
use crate::model::VaultItem;

/// Remote store failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Transient: timeouts, connectivity, I/O. Retryable.
    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The store refused the request (bad path, wrong owner)
    #[error("rejected: {0}")]
    Rejected(String),
}

pub type RemoteResult<T> = Result<T, RemoteError>;

impl RemoteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }
}

impl From<RemoteError> for VaultError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::Unavailable(msg) => VaultError::RemoteUnavailable(msg),
            RemoteError::NotFound(what) => VaultError::NotFound(what),
            RemoteError::Rejected(msg) => VaultError::InvalidData(msg),
        }
    }
}

/// Remote metadata document store
#[async_trait]
pub trait MetadataRemote: Send + Sync {
    /// Every item of `owner_id`, deleted ones included
    async fn fetch_items(&self, owner_id: &str) -> RemoteResult<Vec<VaultItem>>;

    /// Write an item. Returns the stored copy with server-assigned
    /// `created_at` / `updated_at`.
    async fn put_item(&self, item: &VaultItem) -> RemoteResult<VaultItem>;

    /// Delete an item document; `NotFound` if absent
    async fn delete_item(&self, owner_id: &str, item_id: &str) -> RemoteResult<()>;
}

/// Remote ciphertext store addressed by path
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put_blob(&self, path: &str, data: Vec<u8>) -> RemoteResult<()>;

    async fn get_blob(&self, path: &str) -> RemoteResult<Vec<u8>>;

    /// `NotFound` if absent
    async fn delete_blob(&self, path: &str) -> RemoteResult<()>;

    /// Paths under `prefix`, sorted
    async fn list_blobs(&self, prefix: &str) -> RemoteResult<Vec<String>>;
}

/// Storage address of an item's ciphertext
pub fn blob_path(owner_id: &str, item_id: &str) -> String {
    format!("vault/{owner_id}/{item_id}.enc")
}

/// Prefix holding every blob of `owner_id`
pub fn owner_blob_prefix(owner_id: &str) -> String {
    format!("vault/{owner_id}/")
}

/// Apply server-side timestamps: `created_at` is kept from the stored copy,
/// `updated_at` is always the write time.
pub(crate) fn stamp(item: &VaultItem, existing: Option<&VaultItem>, now: DateTime<Utc>) -> VaultItem {
    let mut stored = item.clone();
    stored.created_at = existing.map(|e| e.created_at).unwrap_or(now);
    stored.updated_at = now;
    stored
}

/// Reject ids and paths that could escape a directory-backed store
pub(crate) fn validate_segment(segment: &str) -> RemoteResult<()> {
    let valid = !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains(['/', '\\', '\0']);
    if valid {
        Ok(())
    } else {
        Err(RemoteError::Rejected(format!("invalid path segment: {segment:?}")))
    }
}

pub(crate) fn validate_path(path: &str) -> RemoteResult<()> {
    if path.starts_with('/') {
        return Err(RemoteError::Rejected(format!("absolute path: {path}")));
    }
    path.split('/').try_for_each(validate_segment)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_path_layout() {
        assert_eq!(blob_path("u1", "abc"), "vault/u1/abc.enc");
        assert!(blob_path("u1", "abc").starts_with(&owner_blob_prefix("u1")));
    }

    #[test]
    fn test_path_validation() {
        assert!(validate_path("vault/u1/abc.enc").is_ok());
        assert!(validate_path("vault/../etc/passwd").is_err());
        assert!(validate_path("/etc/passwd").is_err());
        assert!(validate_path("vault//x").is_err());
    }

    #[test]
    fn test_error_mapping() {
        let e: VaultError = RemoteError::Unavailable("timeout".into()).into();
        assert!(e.is_retryable());
        let e: VaultError = RemoteError::NotFound("x".into()).into();
        assert!(matches!(e, VaultError::NotFound(_)));
    }
}
