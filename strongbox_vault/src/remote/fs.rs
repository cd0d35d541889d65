//! Directory-backed remote
//!
//! ```text
//! <root>/meta/<owner>/<item>.json   one metadata document per item
//! <root>/vault/<owner>/<item>.enc   ciphertext at its storage path
//! ```

use std::io::{self, ErrorKind};
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;

use super::{stamp, validate_path, validate_segment, BlobStore, MetadataRemote, RemoteError, RemoteResult};
use crate::model::VaultItem;
use crate::secure_fs::SecureFs;

const META_DIR: &str = "meta";

fn map_io(what: &str, e: io::Error) -> RemoteError {
    if e.kind() == ErrorKind::NotFound {
        RemoteError::NotFound(what.to_string())
    } else {
        RemoteError::Unavailable(format!("{what}: {e}"))
    }
}

/// Remote metadata + blob store on a local (or mounted) directory.
///
/// Blocking filesystem work runs on the blocking pool.
#[derive(Debug, Clone)]
pub struct FsRemote {
    fs: SecureFs,
}

impl FsRemote {
    pub fn open<P: AsRef<Path>>(root: P) -> RemoteResult<Self> {
        std::fs::create_dir_all(root.as_ref())
            .map_err(|e| map_io(&root.as_ref().display().to_string(), e))?;
        Ok(Self {
            fs: SecureFs::new(root.as_ref()),
        })
    }

    pub fn root(&self) -> &Path {
        self.fs.root()
    }

    async fn blocking<T, F>(&self, op: F) -> RemoteResult<T>
    where
        T: Send + 'static,
        F: FnOnce(SecureFs) -> RemoteResult<T> + Send + 'static,
    {
        let fs = self.fs.clone();
        tokio::task::spawn_blocking(move || op(fs))
            .await
            .map_err(|e| RemoteError::Unavailable(format!("blocking task: {e}")))?
    }
}

fn meta_path(owner_id: &str, item_id: &str) -> String {
    format!("{META_DIR}/{owner_id}/{item_id}.json")
}

fn read_item(fs: &SecureFs, path: &str) -> RemoteResult<Option<VaultItem>> {
    match fs.read_file(path) {
        Ok(data) => serde_json::from_slice(&data)
            .map(Some)
            .map_err(|e| RemoteError::Unavailable(format!("{path}: {e}"))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(map_io(path, e)),
    }
}

#[async_trait]
impl MetadataRemote for FsRemote {
    async fn fetch_items(&self, owner_id: &str) -> RemoteResult<Vec<VaultItem>> {
        validate_segment(owner_id)?;
        let dir = format!("{META_DIR}/{owner_id}");

        self.blocking(move |fs| {
            let mut items = Vec::new();
            for path in fs.list_files(&dir).map_err(|e| map_io(&dir, e))? {
                if !path.ends_with(".json") {
                    continue;
                }
                match read_item(&fs, &path) {
                    Ok(Some(item)) => items.push(item),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(path = %path, error = %e, "skipping unreadable metadata document");
                    }
                }
            }
            Ok(items)
        })
        .await
    }

    async fn put_item(&self, item: &VaultItem) -> RemoteResult<VaultItem> {
        validate_segment(&item.owner_id)?;
        validate_segment(&item.id)?;
        let item = item.clone();

        self.blocking(move |fs| {
            let path = meta_path(&item.owner_id, &item.id);
            let existing = read_item(&fs, &path)?;
            let stored = stamp(&item, existing.as_ref(), Utc::now());

            let data = serde_json::to_vec_pretty(&stored)
                .map_err(|e| RemoteError::Rejected(e.to_string()))?;
            fs.write_file(&path, &data).map_err(|e| map_io(&path, e))?;
            Ok(stored)
        })
        .await
    }

    async fn delete_item(&self, owner_id: &str, item_id: &str) -> RemoteResult<()> {
        validate_segment(owner_id)?;
        validate_segment(item_id)?;
        let path = meta_path(owner_id, item_id);

        self.blocking(move |fs| fs.delete_file(&path).map_err(|e| map_io(&path, e)))
            .await
    }
}

#[async_trait]
impl BlobStore for FsRemote {
    async fn put_blob(&self, path: &str, data: Vec<u8>) -> RemoteResult<()> {
        validate_path(path)?;
        let path = path.to_string();
        self.blocking(move |fs| fs.write_file(&path, &data).map_err(|e| map_io(&path, e)))
            .await
    }

    async fn get_blob(&self, path: &str) -> RemoteResult<Vec<u8>> {
        validate_path(path)?;
        let path = path.to_string();
        self.blocking(move |fs| fs.read_file(&path).map_err(|e| map_io(&path, e)))
            .await
    }

    async fn delete_blob(&self, path: &str) -> RemoteResult<()> {
        validate_path(path)?;
        let path = path.to_string();
        self.blocking(move |fs| fs.delete_file(&path).map_err(|e| map_io(&path, e)))
            .await
    }

    async fn list_blobs(&self, prefix: &str) -> RemoteResult<Vec<String>> {
        // Prefixes are directory-shaped: "vault/<owner>/"
        let dir = prefix.trim_end_matches('/').to_string();
        validate_path(&dir)?;
        let prefix = prefix.to_string();

        self.blocking(move |fs| {
            Ok(fs
                .list_files(&dir)
                .map_err(|e| map_io(&dir, e))?
                .into_iter()
                .filter(|p| p.starts_with(&prefix))
                .collect())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_metadata_documents_persist() {
        let dir = tempdir().unwrap();
        let remote = FsRemote::open(dir.path()).unwrap();

        let item = VaultItem::new_folder("f1".into(), "u1", "Docs".into(), None);
        let stored = remote.put_item(&item).await.unwrap();
        assert!(dir.path().join("meta/u1/f1.json").exists());

        let reopened = FsRemote::open(dir.path()).unwrap();
        let items = reopened.fetch_items("u1").await.unwrap();
        assert_eq!(items, vec![stored]);

        reopened.delete_item("u1", "f1").await.unwrap();
        assert!(reopened.delete_item("u1", "f1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_blobs_and_path_rejection() {
        let dir = tempdir().unwrap();
        let remote = FsRemote::open(dir.path()).unwrap();

        remote.put_blob("vault/u1/a.enc", vec![1, 2, 3]).await.unwrap();
        assert_eq!(remote.get_blob("vault/u1/a.enc").await.unwrap(), vec![1, 2, 3]);
        assert_eq!(remote.list_blobs("vault/u1/").await.unwrap(), vec!["vault/u1/a.enc"]);

        assert!(matches!(
            remote.put_blob("../escape.enc", vec![0]).await,
            Err(RemoteError::Rejected(_))
        ));
        assert!(remote.get_blob("vault/u1/none.enc").await.unwrap_err().is_not_found());
    }
}
