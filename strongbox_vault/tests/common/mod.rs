//! Test doubles shared by the integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use strongbox_keystore::MemoryKeyStore;
use strongbox_vault::remote::RemoteResult;
use strongbox_vault::{
    AuthError, BlobStore, MemoryRemote, MetadataRemote, RemoteError, StrongAuthenticator, Vault,
    VaultConfig, VaultItem, VaultServices,
};
use tokio::sync::Notify;

pub const OWNER: &str = "u1";

/// `MemoryRemote` with switchable failures
#[derive(Default)]
pub struct FaultyRemote {
    pub inner: MemoryRemote,
    pub fail_put_blob: AtomicBool,
    /// `put_blob` never completes
    pub stall_put_blob: AtomicBool,
    pub fail_delete_blob: AtomicBool,
    pub fail_put_item: AtomicBool,
    pub fail_fetch_items: AtomicBool,
    /// `put_item` parks until `put_item_release` is signalled
    pub hold_put_item: AtomicBool,
    pub put_item_started: Notify,
    pub put_item_release: Notify,
}

impl FaultyRemote {
    fn check(flag: &AtomicBool, what: &str) -> RemoteResult<()> {
        if flag.load(Ordering::SeqCst) {
            Err(RemoteError::Unavailable(format!("{what} switched off")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MetadataRemote for FaultyRemote {
    async fn fetch_items(&self, owner_id: &str) -> RemoteResult<Vec<VaultItem>> {
        Self::check(&self.fail_fetch_items, "fetch_items")?;
        self.inner.fetch_items(owner_id).await
    }

    async fn put_item(&self, item: &VaultItem) -> RemoteResult<VaultItem> {
        Self::check(&self.fail_put_item, "put_item")?;
        if self.hold_put_item.load(Ordering::SeqCst) {
            self.put_item_started.notify_one();
            self.put_item_release.notified().await;
        }
        self.inner.put_item(item).await
    }

    async fn delete_item(&self, owner_id: &str, item_id: &str) -> RemoteResult<()> {
        self.inner.delete_item(owner_id, item_id).await
    }
}

#[async_trait]
impl BlobStore for FaultyRemote {
    async fn put_blob(&self, path: &str, data: Vec<u8>) -> RemoteResult<()> {
        Self::check(&self.fail_put_blob, "put_blob")?;
        if self.stall_put_blob.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.inner.put_blob(path, data).await
    }

    async fn get_blob(&self, path: &str) -> RemoteResult<Vec<u8>> {
        self.inner.get_blob(path).await
    }

    async fn delete_blob(&self, path: &str) -> RemoteResult<()> {
        Self::check(&self.fail_delete_blob, "delete_blob")?;
        self.inner.delete_blob(path).await
    }

    async fn list_blobs(&self, prefix: &str) -> RemoteResult<Vec<String>> {
        self.inner.list_blobs(prefix).await
    }
}

/// Authenticator that counts challenges, replays scripted answers
/// (success once the script runs out) and can hold a challenge open
#[derive(Default)]
pub struct ScriptedAuthenticator {
    pub calls: AtomicUsize,
    pub unavailable: AtomicBool,
    pub hold: AtomicBool,
    /// Signalled when a challenge starts
    pub started: Notify,
    /// Releases a held challenge
    pub release: Notify,
    script: Mutex<VecDeque<Result<(), AuthError>>>,
}

impl ScriptedAuthenticator {
    pub fn push(&self, answer: Result<(), AuthError>) {
        self.script.lock().push_back(answer);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StrongAuthenticator for ScriptedAuthenticator {
    fn can_authenticate(&self) -> bool {
        !self.unavailable.load(Ordering::SeqCst)
    }

    async fn authenticate(&self, _reason: &str) -> Result<(), AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        if self.hold.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        self.script.lock().pop_front().unwrap_or(Ok(()))
    }
}

pub struct Harness {
    pub vault: Arc<Vault>,
    pub keystore: Arc<MemoryKeyStore>,
    pub remote: Arc<FaultyRemote>,
    pub auth: Arc<ScriptedAuthenticator>,
}

pub fn harness_with(config: VaultConfig) -> Harness {
    let keystore = Arc::new(MemoryKeyStore::new());
    let remote = Arc::new(FaultyRemote::default());
    let auth = Arc::new(ScriptedAuthenticator::default());
    let vault = Vault::new(
        config,
        VaultServices {
            keystore: keystore.clone(),
            metadata_remote: remote.clone(),
            blobs: remote.clone(),
            authenticator: auth.clone(),
        },
    )
    .unwrap();

    Harness {
        vault: Arc::new(vault),
        keystore,
        remote,
        auth,
    }
}

pub fn harness() -> Harness {
    harness_with(VaultConfig::default())
}

/// Signed in as `OWNER` and unlocked
pub async fn unlocked() -> Harness {
    let h = harness();
    h.vault.on_identity_changed(Some(OWNER.to_string()));
    h.vault.unlock().await.unwrap();
    h
}
