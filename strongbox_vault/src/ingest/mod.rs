//! Strongbox Vault - Ingestion Pipeline
//!
//! ```text
//! ImportSource ──prepare──▶ payload ──▶ key ──▶ hash ──▶ encrypt ──▶ blob ──▶ metadata
//!                                        │                                      │
//!                                        └──────── KeyGuard (rollback) ─────────┘
//! ```
//!
//! A failure or cancellation before the metadata commit deletes the new key.
//! The commit itself runs as its own task, so dropping the caller's future
//! cannot separate a committed item from its key.

pub mod mime;
pub mod pdf;
pub mod scan;
pub mod source;

pub use scan::ScanComposer;
pub use source::{ImportRequest, ImportSource, PreparedPayload};

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use strongbox_keystore::{KeyBytes, KeyStore, KeyStoreError};
use tokio::sync::{OwnedRwLockReadGuard, RwLock, RwLockWriteGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::crypto::CryptoEngine;
use crate::error::{VaultError, VaultResult};
use crate::metadata::MetadataStore;
use crate::model::VaultItem;
use crate::remote::{blob_path, BlobStore};

// ═══════════════════════════════════════════════════════════════════════════
// ROLLBACK
// ═══════════════════════════════════════════════════════════════════════════

/// Deletes a freshly stored key unless disarmed.
///
/// Armed before the key is written: a store still running on the blocking
/// pool when the guard drops sees `abandoned` and removes the key itself.
struct KeyGuard {
    keystore: Arc<dyn KeyStore>,
    key_id: String,
    armed: bool,
    abandoned: Arc<AtomicBool>,
}

impl KeyGuard {
    fn new(keystore: Arc<dyn KeyStore>, key_id: String) -> Self {
        Self {
            keystore,
            key_id,
            armed: true,
            abandoned: Arc::new(AtomicBool::new(false)),
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }

    /// Delete the key on the blocking pool instead of in `drop`
    async fn roll_back(mut self) {
        self.armed = false;
        self.abandoned.store(true, Ordering::SeqCst);
        let keystore = Arc::clone(&self.keystore);
        let key_id = self.key_id.clone();
        match tokio::task::spawn_blocking(move || keystore.delete(&key_id)).await {
            Ok(result) => log_rollback(&self.key_id, result),
            Err(e) => warn!(key_id = %self.key_id, error = %e, "import rollback task failed"),
        }
    }
}

fn log_rollback(key_id: &str, result: Result<(), KeyStoreError>) {
    match result {
        Ok(()) => warn!(key_id, "import rolled back, key deleted"),
        Err(e) if e.is_not_found() => debug!(key_id, "import rolled back before key was stored"),
        Err(e) => warn!(key_id, error = %e, "import rollback could not delete key"),
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.abandoned.store(true, Ordering::SeqCst);
        log_rollback(&self.key_id, self.keystore.delete(&self.key_id));
    }
}

/// Blobs written whose metadata never committed, per owner
#[derive(Default)]
pub struct OrphanLedger {
    entries: Mutex<BTreeMap<String, BTreeSet<String>>>,
}

impl OrphanLedger {
    pub fn record(&self, owner_id: &str, path: &str) {
        self.entries
            .lock()
            .entry(owner_id.to_string())
            .or_default()
            .insert(path.to_string());
    }

    pub fn pending(&self, owner_id: &str) -> Vec<String> {
        self.entries
            .lock()
            .get(owner_id)
            .map(|paths| paths.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&self, owner_id: &str, path: &str) {
        let mut entries = self.entries.lock();
        if let Some(paths) = entries.get_mut(owner_id) {
            paths.remove(path);
            if paths.is_empty() {
                entries.remove(owner_id);
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// PIPELINE
// ═══════════════════════════════════════════════════════════════════════════

/// Ingestion pipeline. Clones share every collaborator.
#[derive(Clone)]
pub struct ImportPipeline {
    /// Imports hold it shared until their metadata commit settles;
    /// `exclusive` waits them out
    ingest_gate: Arc<RwLock<()>>,
    keystore: Arc<dyn KeyStore>,
    blobs: Arc<dyn BlobStore>,
    metadata: Arc<MetadataStore>,
    orphans: Arc<OrphanLedger>,
    crypto: CryptoEngine,
    composer: ScanComposer,
    max_import_bytes: u64,
}

impl ImportPipeline {
    pub fn new(
        keystore: Arc<dyn KeyStore>,
        blobs: Arc<dyn BlobStore>,
        metadata: Arc<MetadataStore>,
        composer: ScanComposer,
        max_import_bytes: u64,
    ) -> Self {
        Self {
            ingest_gate: Arc::new(RwLock::new(())),
            keystore,
            blobs,
            metadata,
            orphans: Arc::new(OrphanLedger::default()),
            crypto: CryptoEngine::new(),
            composer,
            max_import_bytes,
        }
    }

    pub fn orphans(&self) -> &Arc<OrphanLedger> {
        &self.orphans
    }

    /// Wait until no import is in flight and hold new ones off
    pub async fn exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.ingest_gate.write().await
    }

    /// Prepare any source and import it
    pub async fn import(&self, request: ImportRequest, owner_id: &str) -> VaultResult<VaultItem> {
        let payload = request
            .source
            .prepare(&self.composer, self.max_import_bytes)
            .await?;
        self.import_payload(
            payload.bytes,
            &payload.name,
            &payload.mime_type,
            request.parent_id.as_deref(),
            owner_id,
        )
        .await
    }

    /// Import every request as its own task; one result per request, in order
    pub async fn import_batch(
        &self,
        requests: Vec<ImportRequest>,
        owner_id: &str,
    ) -> Vec<VaultResult<VaultItem>> {
        let tasks = requests.into_iter().map(|request| {
            let pipeline = self.clone();
            let owner_id = owner_id.to_string();
            tokio::spawn(async move { pipeline.import(request, &owner_id).await })
        });

        join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.map_err(VaultError::from).and_then(|result| result))
            .collect()
    }

    /// Encrypt and store one payload
    pub async fn import_payload(
        &self,
        bytes: Zeroizing<Vec<u8>>,
        suggested_name: &str,
        mime_type: &str,
        parent_id: Option<&str>,
        owner_id: &str,
    ) -> VaultResult<VaultItem> {
        // 1. Validate before any side effect
        if bytes.is_empty() {
            return Err(VaultError::invalid("cannot import an empty payload"));
        }
        let size_bytes = bytes.len() as u64;
        if size_bytes > self.max_import_bytes {
            return Err(VaultError::invalid(format!(
                "payload of {size_bytes} bytes exceeds the {} byte limit",
                self.max_import_bytes
            )));
        }
        let name = mime::sanitize_name(suggested_name);
        let shared = Arc::clone(&self.ingest_gate).read_owned().await;
        self.metadata.ensure_parent(owner_id, parent_id).await?;

        // 2. Fresh key, stored before anything references it
        let item_id = Uuid::new_v4().to_string();
        let key_id = Uuid::new_v4().to_string();
        let key = self.crypto.generate_key();
        let guard = KeyGuard::new(Arc::clone(&self.keystore), key_id.clone());
        {
            let keystore = Arc::clone(&self.keystore);
            let abandoned = Arc::clone(&guard.abandoned);
            let (key_id, key, owner) = (key_id.clone(), key.clone(), owner_id.to_string());
            let stored = tokio::task::spawn_blocking(move || {
                keystore.store(&key_id, &key, &owner)?;
                if abandoned.load(Ordering::SeqCst) {
                    keystore.delete(&key_id)?;
                }
                Ok::<_, KeyStoreError>(())
            })
            .await?;
            if let Err(e) = stored {
                // Nothing was written under this id
                guard.disarm();
                return Err(VaultError::KeyStorageFailed(e.to_string()));
            }
        }

        // 3-4. Hash the plaintext, then encrypt it
        let (content_hash, ciphertext) = match self.seal_payload(bytes, key).await {
            Ok(sealed) => sealed,
            Err(e) => {
                guard.roll_back().await;
                return Err(e);
            }
        };

        // 5. Blob first, then metadata
        let storage_path = blob_path(owner_id, &item_id);
        if let Err(e) = self.blobs.put_blob(&storage_path, ciphertext).await {
            guard.roll_back().await;
            return Err(e.into());
        }

        let item = VaultItem::new_file(
            item_id,
            owner_id,
            name,
            parent_id.map(str::to_string),
            size_bytes,
            if mime_type.trim().is_empty() {
                mime::OCTET_STREAM.to_string()
            } else {
                mime_type.trim().to_ascii_lowercase()
            },
            key_id,
            content_hash,
            storage_path.clone(),
        );
        let stored = self.commit(item, guard, shared).await?;

        // 6. Listing is rebuilt from the remote on next read
        if let Err(e) = self.metadata.invalidate_cache(owner_id).await {
            warn!(owner_id, error = %e, "cache invalidation after import failed");
        }

        info!(
            owner_id,
            item_id = %stored.id,
            size = stored.size_bytes,
            mime = %stored.mime_type,
            "item imported"
        );
        Ok(stored)
    }

    async fn seal_payload(
        &self,
        bytes: Zeroizing<Vec<u8>>,
        key: KeyBytes,
    ) -> VaultResult<(String, Vec<u8>)> {
        let crypto = self.crypto;
        let sealed = tokio::task::spawn_blocking(move || {
            let hash = crypto.content_hash(&bytes);
            crypto.encrypt(&bytes, &key).map(|ciphertext| (hash, ciphertext))
        })
        .await??;
        Ok(sealed)
    }

    /// Metadata commit; runs to completion even if the caller goes away,
    /// holding the ingest gate until it settles
    async fn commit(
        &self,
        item: VaultItem,
        guard: KeyGuard,
        shared: OwnedRwLockReadGuard<()>,
    ) -> VaultResult<VaultItem> {
        let metadata = Arc::clone(&self.metadata);
        let orphans = Arc::clone(&self.orphans);

        tokio::spawn(async move {
            let _shared = shared;
            let owner_id = item.owner_id.clone();
            let storage_path = item.storage_path.clone().unwrap_or_default();
            match metadata.upsert(item).await {
                Ok(stored) => {
                    guard.disarm();
                    Ok(stored)
                }
                Err(e) => {
                    warn!(
                        owner_id = %owner_id,
                        path = %storage_path,
                        error = %e,
                        "metadata write failed after blob upload, blob left for reconcile"
                    );
                    orphans.record(&owner_id, &storage_path);
                    guard.roll_back().await;
                    Err(e)
                }
            }
        })
        .await?
    }

    /// New folder. No key, blob or hash.
    pub async fn create_folder(
        &self,
        name: &str,
        parent_id: Option<&str>,
        owner_id: &str,
    ) -> VaultResult<VaultItem> {
        if name.trim().is_empty() {
            return Err(VaultError::invalid("folder name must not be empty"));
        }
        self.metadata.ensure_parent(owner_id, parent_id).await?;

        let folder = VaultItem::new_folder(
            Uuid::new_v4().to_string(),
            owner_id,
            mime::sanitize_name(name),
            parent_id.map(str::to_string),
        );
        let stored = self.metadata.upsert(folder).await?;

        if let Err(e) = self.metadata.invalidate_cache(owner_id).await {
            warn!(owner_id, error = %e, "cache invalidation after folder creation failed");
        }
        debug!(owner_id, folder_id = %stored.id, "folder created");
        Ok(stored)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // READ PATH
    // ═══════════════════════════════════════════════════════════════════════

    /// Decrypt an item's payload and check it against its content hash
    pub async fn read_payload(&self, owner_id: &str, item_id: &str) -> VaultResult<Zeroizing<Vec<u8>>> {
        let item = self.metadata.get(owner_id, item_id).await?;
        let (Some(key_id), Some(path)) = (item.encryption_key_id.clone(), item.storage_path.clone())
        else {
            return Err(VaultError::invalid(format!("{item_id} is a folder")));
        };
        if item.purge_pending {
            return Err(VaultError::NotFound(format!("item {item_id}")));
        }

        let ciphertext = self.blobs.get_blob(&path).await?;
        let keystore = Arc::clone(&self.keystore);
        let key = tokio::task::spawn_blocking(move || keystore.load(&key_id)).await??;

        let crypto = self.crypto;
        let expected = item.content_hash.clone();
        tokio::task::spawn_blocking(move || {
            let plaintext = Zeroizing::new(crypto.decrypt(&ciphertext, &key)?);
            if crypto.content_hash(&plaintext) != expected {
                return Err(VaultError::CryptoFailure(format!(
                    "content hash mismatch for {}",
                    item.id
                )));
            }
            Ok(plaintext)
        })
        .await?
    }

    /// Write the decrypted payload to `dest`; returns the byte count
    pub async fn export_item(&self, owner_id: &str, item_id: &str, dest: &Path) -> VaultResult<u64> {
        let plaintext = self.read_payload(owner_id, item_id).await?;
        tokio::fs::write(dest, plaintext.as_slice()).await?;
        debug!(owner_id, item_id, dest = %dest.display(), "item exported");
        Ok(plaintext.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanSettings;
    use crate::model::SortOption;
    use crate::remote::{MemoryRemote, MetadataRemote, RemoteResult};
    use std::time::Duration;
    use strongbox_keystore::MemoryKeyStore;

    fn pipeline() -> (ImportPipeline, Arc<MemoryKeyStore>, MemoryRemote) {
        let keystore = Arc::new(MemoryKeyStore::new());
        let remote = MemoryRemote::new();
        let metadata = Arc::new(MetadataStore::new(Arc::new(remote.clone()), SortOption::Name));
        let pipeline = ImportPipeline::new(
            keystore.clone(),
            Arc::new(remote.clone()),
            metadata,
            ScanComposer::new(ScanSettings::default()),
            1024,
        );
        (pipeline, keystore, remote)
    }

    #[tokio::test]
    async fn test_import_then_read_back() {
        let (pipeline, keystore, remote) = pipeline();
        let item = pipeline
            .import_payload(Zeroizing::new(b"hello".to_vec()), "hello.txt", "text/plain", None, "u1")
            .await
            .unwrap();

        assert_eq!(item.size_bytes, 5);
        assert_eq!(item.content_hash, CryptoEngine::new().hash(b"hello"));
        assert!(keystore.contains(item.encryption_key_id.as_deref().unwrap()).unwrap());
        assert!(remote.has_blob(item.storage_path.as_deref().unwrap()));

        let plaintext = pipeline.read_payload("u1", &item.id).await.unwrap();
        assert_eq!(plaintext.as_slice(), b"hello");
    }

    #[tokio::test]
    async fn test_empty_payload_has_no_side_effects() {
        let (pipeline, keystore, remote) = pipeline();
        let err = pipeline
            .import_payload(Zeroizing::new(Vec::new()), "empty", "", None, "u1")
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::InvalidData(_)));
        assert!(keystore.is_empty());
        assert_eq!(remote.blob_count(), 0);
    }

    #[tokio::test]
    async fn test_bad_parent_has_no_side_effects() {
        let (pipeline, keystore, _) = pipeline();
        let err = pipeline
            .import_payload(Zeroizing::new(b"x".to_vec()), "x", "", Some("nope"), "u1")
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::NotFound(_)));
        assert!(keystore.is_empty());
    }

    #[tokio::test]
    async fn test_tampered_blob_fails_closed() {
        let (pipeline, _, remote) = pipeline();
        let item = pipeline
            .import_payload(Zeroizing::new(b"secret".to_vec()), "s", "", None, "u1")
            .await
            .unwrap();
        let path = item.storage_path.clone().unwrap();

        let mut blob = remote.get_blob(&path).await.unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        remote.put_blob(&path, blob).await.unwrap();

        let err = pipeline.read_payload("u1", &item.id).await.unwrap_err();
        assert!(matches!(err, VaultError::CryptoFailure(_)));
    }

    /// Metadata remote whose `put_item` parks until released
    #[derive(Default)]
    struct ParkedMetadata {
        inner: MemoryRemote,
        started: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl MetadataRemote for ParkedMetadata {
        async fn fetch_items(&self, owner_id: &str) -> RemoteResult<Vec<VaultItem>> {
            self.inner.fetch_items(owner_id).await
        }

        async fn put_item(&self, item: &VaultItem) -> RemoteResult<VaultItem> {
            self.started.notify_one();
            self.release.notified().await;
            self.inner.put_item(item).await
        }

        async fn delete_item(&self, owner_id: &str, item_id: &str) -> RemoteResult<()> {
            self.inner.delete_item(owner_id, item_id).await
        }
    }

    #[tokio::test]
    async fn test_detached_commit_holds_ingest_gate() {
        let keystore = Arc::new(MemoryKeyStore::new());
        let remote = Arc::new(ParkedMetadata::default());
        let metadata = Arc::new(MetadataStore::new(remote.clone(), SortOption::Name));
        let pipeline = ImportPipeline::new(
            keystore.clone(),
            Arc::new(MemoryRemote::new()),
            metadata,
            ScanComposer::new(ScanSettings::default()),
            1024,
        );

        let caller = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                pipeline
                    .import_payload(Zeroizing::new(b"late".to_vec()), "late.txt", "", None, "u1")
                    .await
            })
        };
        remote.started.notified().await;
        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());

        let waited = tokio::time::timeout(Duration::from_millis(50), pipeline.exclusive()).await;
        assert!(waited.is_err());

        remote.release.notify_one();
        let _exclusive = pipeline.exclusive().await;
        assert_eq!(keystore.key_ids("u1").unwrap().len(), 1);
        assert_eq!(remote.inner.item_count("u1"), 1);
    }

    #[test]
    fn test_orphan_ledger() {
        let ledger = OrphanLedger::default();
        ledger.record("u1", "vault/u1/a.enc");
        assert_eq!(ledger.pending("u1"), vec!["vault/u1/a.enc"]);
        ledger.clear("u1", "vault/u1/a.enc");
        assert!(ledger.pending("u1").is_empty());
    }
}
