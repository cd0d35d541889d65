//! Strongbox Vault - Main Vault Implementation
//!
//! The `Vault` context owns the session, the metadata store, the ingestion
//! pipeline and the recycler. Every item operation passes the lock gate
//! first and fails with `AuthenticationFailed` before touching anything.

use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use strongbox_keystore::KeyStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::auth::{AuthError, StrongAuthenticator};
use crate::config::VaultConfig;
use crate::error::{VaultError, VaultResult};
use crate::ingest::{mime, ImportPipeline, ImportRequest, ScanComposer};
use crate::metadata::{CacheDb, MetadataStore};
use crate::model::{Listing, SortOption, VaultItem, VaultStats};
use crate::recycle::{Recycler, ReconcileReport, SweepReport};
use crate::remote::{BlobStore, MetadataRemote};
use crate::session::{BeginRefused, GateDenied, LockState, VaultSession};

/// Collaborators the vault is built from
#[derive(Clone)]
pub struct VaultServices {
    pub keystore: Arc<dyn KeyStore>,
    pub metadata_remote: Arc<dyn MetadataRemote>,
    pub blobs: Arc<dyn BlobStore>,
    pub authenticator: Arc<dyn StrongAuthenticator>,
}

/// Result of a successful `unlock` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnlockOutcome {
    Unlocked,
    AlreadyUnlocked,
    /// Another caller's challenge is outstanding; nothing was issued
    AlreadyInProgress,
}

/// Strongbox vault - main entry point
pub struct Vault {
    config: VaultConfig,
    session: VaultSession,
    authenticator: Arc<dyn StrongAuthenticator>,
    metadata: Arc<MetadataStore>,
    pipeline: ImportPipeline,
    recycler: Recycler,
}

impl Vault {
    // ═══════════════════════════════════════════════════════════════════════
    // INITIALIZATION
    // ═══════════════════════════════════════════════════════════════════════

    /// Build a vault over in-memory metadata caching only. Starts `Locked`.
    pub fn new(config: VaultConfig, services: VaultServices) -> VaultResult<Self> {
        Self::build(config, services, None)
    }

    /// Build a vault whose metadata cache survives restarts in `cache_db`
    pub fn with_cache_db(
        config: VaultConfig,
        services: VaultServices,
        cache_db: Arc<CacheDb>,
    ) -> VaultResult<Self> {
        Self::build(config, services, Some(cache_db))
    }

    fn build(
        config: VaultConfig,
        services: VaultServices,
        cache_db: Option<Arc<CacheDb>>,
    ) -> VaultResult<Self> {
        config.validate()?;

        let mut metadata = MetadataStore::new(services.metadata_remote, config.default_sort);
        if let Some(db) = cache_db {
            metadata = metadata.with_cache_db(db);
        }
        let metadata = Arc::new(metadata);

        let pipeline = ImportPipeline::new(
            Arc::clone(&services.keystore),
            Arc::clone(&services.blobs),
            Arc::clone(&metadata),
            ScanComposer::new(config.scan.clone()),
            config.max_import_bytes,
        );
        let recycler = Recycler::new(
            Arc::clone(&metadata),
            services.blobs,
            services.keystore,
            Arc::clone(pipeline.orphans()),
        );

        Ok(Self {
            session: VaultSession::new(config.max_failed_attempts, config.lockout_seconds),
            config,
            authenticator: services.authenticator,
            metadata,
            pipeline,
            recycler,
        })
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    // ═══════════════════════════════════════════════════════════════════════
    // UNLOCK / LOCK
    // ═══════════════════════════════════════════════════════════════════════

    pub fn state(&self) -> LockState {
        self.session.state()
    }

    pub fn is_unlocked(&self) -> bool {
        self.session.state() == LockState::Unlocked
    }

    /// Observe lock state changes
    pub fn subscribe(&self) -> watch::Receiver<LockState> {
        self.session.subscribe()
    }

    pub fn current_user(&self) -> Option<String> {
        self.session.current_user()
    }

    /// Run one strong-authentication challenge for the current user.
    ///
    /// Concurrent callers coalesce: only the first issues a challenge, the
    /// rest get `AlreadyInProgress`. Dropping the returned future while the
    /// challenge is outstanding leaves the vault `Locked`.
    pub async fn unlock(&self) -> VaultResult<UnlockOutcome> {
        let Some(user) = self.session.current_user() else {
            return Err(VaultError::auth_failed("no signed-in user"));
        };

        if let Some(remaining) = self.session.lockout_remaining(Utc::now()) {
            return Err(VaultError::auth_failed(format!(
                "too many failed attempts, try again in {}s",
                remaining.num_seconds().max(1)
            )));
        }

        let guard = match self.session.begin_authentication() {
            Ok(guard) => guard,
            Err(BeginRefused::AlreadyUnlocked) => return Ok(UnlockOutcome::AlreadyUnlocked),
            Err(BeginRefused::AlreadyInProgress) => {
                debug!("unlock already in progress");
                return Ok(UnlockOutcome::AlreadyInProgress);
            }
        };

        if !self.authenticator.can_authenticate() {
            guard.cancel();
            warn!("strong authentication unavailable");
            return Err(VaultError::auth_failed("strong authentication is not available"));
        }

        match self.authenticator.authenticate(&self.config.auth_reason).await {
            Ok(()) => {
                if guard.complete() {
                    info!(owner_id = %user, "vault unlocked");
                    Ok(UnlockOutcome::Unlocked)
                } else {
                    debug!("vault locked while authenticating");
                    Err(VaultError::AuthenticationCancelled)
                }
            }
            Err(AuthError::Cancelled) => {
                guard.cancel();
                debug!("authentication cancelled");
                Err(VaultError::AuthenticationCancelled)
            }
            Err(AuthError::Failed(reason)) => {
                if guard.fail() {
                    warn!(
                        lockout_seconds = self.config.lockout_seconds,
                        "failed attempt limit reached, unlock suspended"
                    );
                } else {
                    warn!(%reason, "authentication failed");
                }
                Err(VaultError::AuthenticationFailed(reason))
            }
            Err(e @ AuthError::Unavailable(_)) => {
                guard.cancel();
                warn!(error = %e, "authentication unavailable");
                Err(e.into())
            }
        }
    }

    /// Lock the vault and drop all in-memory metadata
    pub fn lock(&self) {
        if self.session.lock() {
            info!("vault locked");
        }
        self.metadata.clear_memory();
    }

    /// Apply a sign-in, sign-out or account switch.
    ///
    /// Sign-out and switching users both lock; the session then belongs to
    /// the new identity.
    pub fn on_identity_changed(&self, identity: Option<String>) {
        if self.session.current_user() == identity {
            return;
        }
        // Lock before the user changes so no gated call sees the new owner
        // on the old session
        self.lock();
        self.session.set_user(identity.clone());
        match identity {
            Some(user) => info!(owner_id = %user, "signed-in user changed"),
            None => info!("signed out"),
        }
    }

    /// Follow an identity provider: apply every change and start an unlock
    /// whenever a user is present. A change arriving mid-prompt abandons
    /// the prompt.
    pub fn watch_identity(self: &Arc<Self>, mut identity: watch::Receiver<Option<String>>) -> JoinHandle<()> {
        let vault = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let current = identity.borrow_and_update().clone();
                vault.on_identity_changed(current.clone());

                if current.is_some() && vault.state() == LockState::Locked {
                    tokio::select! {
                        result = vault.unlock() => {
                            if let Err(e) = result {
                                if !e.is_silent() {
                                    warn!(error = %e, "unlock after sign-in failed");
                                }
                            }
                        }
                        changed = identity.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            continue;
                        }
                    }
                }

                if identity.changed().await.is_err() {
                    break;
                }
            }
            debug!("identity watcher stopped");
        })
    }

    /// App moved to the background: lock unconditionally
    pub fn on_app_background(&self) {
        debug!("app backgrounded");
        self.lock();
    }

    /// App returned to the foreground: unlock if a user is signed in and
    /// the vault is locked. `None` when nothing was attempted.
    pub async fn on_app_foreground(&self) -> VaultResult<Option<UnlockOutcome>> {
        if self.session.current_user().is_none() || self.state() != LockState::Locked {
            return Ok(None);
        }
        self.unlock().await.map(Some)
    }

    fn gate(&self, owner_id: &str) -> VaultResult<()> {
        let relock_after = self
            .config
            .relock_after_seconds
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(Duration::try_seconds);

        match self.session.authorize(owner_id, relock_after) {
            Ok(()) => Ok(()),
            Err(GateDenied::Locked) => Err(VaultError::auth_failed("vault is locked")),
            Err(GateDenied::OwnerMismatch) => {
                Err(VaultError::auth_failed("owner does not match the signed-in user"))
            }
            Err(GateDenied::IdleTimeout) => {
                self.metadata.clear_memory();
                info!("vault re-locked after inactivity");
                Err(VaultError::auth_failed("vault re-locked after inactivity"))
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // IMPORT
    // ═══════════════════════════════════════════════════════════════════════

    /// Import from any source
    pub async fn import(&self, request: ImportRequest, owner_id: &str) -> VaultResult<VaultItem> {
        self.gate(owner_id)?;
        self.pipeline.import(request, owner_id).await
    }

    /// Import several sources concurrently; one result per request, in order
    pub async fn import_batch(
        &self,
        requests: Vec<ImportRequest>,
        owner_id: &str,
    ) -> VaultResult<Vec<VaultResult<VaultItem>>> {
        self.gate(owner_id)?;
        Ok(self.pipeline.import_batch(requests, owner_id).await)
    }

    /// Import raw bytes. The MIME type falls back to the name, then the
    /// content.
    pub async fn import_payload(
        &self,
        bytes: Vec<u8>,
        suggested_name: &str,
        mime_type: Option<&str>,
        parent_id: Option<&str>,
        owner_id: &str,
    ) -> VaultResult<VaultItem> {
        let bytes = Zeroizing::new(bytes);
        self.gate(owner_id)?;
        let mime_type = mime::resolve_mime(mime_type, suggested_name, &bytes);
        self.pipeline
            .import_payload(bytes, suggested_name, &mime_type, parent_id, owner_id)
            .await
    }

    pub async fn create_folder(
        &self,
        name: &str,
        parent_id: Option<&str>,
        owner_id: &str,
    ) -> VaultResult<VaultItem> {
        self.gate(owner_id)?;
        self.pipeline.create_folder(name, parent_id, owner_id).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // READ
    // ═══════════════════════════════════════════════════════════════════════

    /// Children of `parent_id` (root when `None`) in the active sort order
    pub async fn list(
        &self,
        owner_id: &str,
        parent_id: Option<&str>,
        include_deleted: bool,
    ) -> VaultResult<Listing> {
        self.gate(owner_id)?;
        self.metadata.list(owner_id, parent_id, include_deleted).await
    }

    pub async fn get_item(&self, owner_id: &str, item_id: &str) -> VaultResult<VaultItem> {
        self.gate(owner_id)?;
        self.metadata.get(owner_id, item_id).await
    }

    /// Decrypted content, verified against its content hash
    pub async fn read_payload(&self, owner_id: &str, item_id: &str) -> VaultResult<Zeroizing<Vec<u8>>> {
        self.gate(owner_id)?;
        self.pipeline.read_payload(owner_id, item_id).await
    }

    /// Decrypt to a file outside the vault. Returns bytes written.
    pub async fn export_item(&self, owner_id: &str, item_id: &str, dest: &Path) -> VaultResult<u64> {
        self.gate(owner_id)?;
        self.pipeline.export_item(owner_id, item_id, dest).await
    }

    /// Groups of live files with identical content. Never merged.
    pub async fn find_duplicates(&self, owner_id: &str) -> VaultResult<Vec<Vec<VaultItem>>> {
        self.gate(owner_id)?;
        self.metadata.find_duplicates(owner_id).await
    }

    pub async fn stats(&self, owner_id: &str) -> VaultResult<VaultStats> {
        self.gate(owner_id)?;
        self.metadata.stats(owner_id).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ORGANIZE
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn rename(&self, owner_id: &str, item_id: &str, name: &str) -> VaultResult<VaultItem> {
        self.gate(owner_id)?;
        let item = self.metadata.rename(owner_id, item_id, name).await?;
        self.metadata.invalidate_cache(owner_id).await?;
        Ok(item)
    }

    /// Move under `new_parent` (root when `None`)
    pub async fn move_item(
        &self,
        owner_id: &str,
        item_id: &str,
        new_parent: Option<&str>,
    ) -> VaultResult<VaultItem> {
        self.gate(owner_id)?;
        let item = self.metadata.move_item(owner_id, item_id, new_parent).await?;
        self.metadata.invalidate_cache(owner_id).await?;
        Ok(item)
    }

    pub fn sort_option(&self) -> SortOption {
        self.metadata.sort_option()
    }

    pub fn set_sort_option(&self, sort: SortOption) {
        self.metadata.set_sort(sort);
    }

    /// Explicit refresh: the next read goes to the remote
    pub async fn invalidate_cache(&self, owner_id: &str) -> VaultResult<()> {
        self.gate(owner_id)?;
        self.metadata.invalidate_cache(owner_id).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // RECYCLE BIN
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn soft_delete(&self, owner_id: &str, item_id: &str) -> VaultResult<VaultItem> {
        self.gate(owner_id)?;
        self.recycler.soft_delete(owner_id, item_id).await
    }

    pub async fn restore(&self, owner_id: &str, item_id: &str) -> VaultResult<VaultItem> {
        self.gate(owner_id)?;
        self.recycler.restore(owner_id, item_id).await
    }

    /// Irreversibly remove an item with its blob and key
    pub async fn purge(&self, owner_id: &str, item_id: &str) -> VaultResult<()> {
        self.gate(owner_id)?;
        self.recycler.purge(owner_id, item_id).await
    }

    /// Purge soft-deleted items past the configured retention
    pub async fn sweep_recycle_bin(&self, owner_id: &str) -> VaultResult<SweepReport> {
        let retention = Duration::days(i64::from(self.config.retention_days));
        self.sweep_with_retention(owner_id, retention).await
    }

    pub async fn sweep_with_retention(&self, owner_id: &str, retention: Duration) -> VaultResult<SweepReport> {
        self.gate(owner_id)?;
        self.recycler.sweep_with_retention(owner_id, retention).await
    }

    /// Delete blobs and keys no item references
    pub async fn reconcile(&self, owner_id: &str) -> VaultResult<ReconcileReport> {
        self.gate(owner_id)?;
        // A key stored by an in-flight import is not an orphan
        let _exclusive = self.pipeline.exclusive().await;
        self.recycler.reconcile(owner_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemote;
    use async_trait::async_trait;
    use strongbox_keystore::MemoryKeyStore;

    struct AlwaysYes;

    #[async_trait]
    impl StrongAuthenticator for AlwaysYes {
        fn can_authenticate(&self) -> bool {
            true
        }

        async fn authenticate(&self, _reason: &str) -> Result<(), AuthError> {
            Ok(())
        }
    }

    fn vault() -> Vault {
        let remote = Arc::new(MemoryRemote::new());
        Vault::new(
            VaultConfig::default(),
            VaultServices {
                keystore: Arc::new(MemoryKeyStore::new()),
                metadata_remote: remote.clone(),
                blobs: remote,
                authenticator: Arc::new(AlwaysYes),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_unlock_requires_user() {
        let vault = vault();
        assert!(matches!(vault.unlock().await, Err(VaultError::AuthenticationFailed(_))));
        assert_eq!(vault.state(), LockState::Locked);

        vault.on_identity_changed(Some("u1".into()));
        assert_eq!(vault.unlock().await.unwrap(), UnlockOutcome::Unlocked);
        assert_eq!(vault.unlock().await.unwrap(), UnlockOutcome::AlreadyUnlocked);
    }

    #[tokio::test]
    async fn test_switching_user_locks() {
        let vault = vault();
        vault.on_identity_changed(Some("u1".into()));
        vault.unlock().await.unwrap();

        vault.on_identity_changed(Some("u2".into()));
        assert_eq!(vault.state(), LockState::Locked);
        assert_eq!(vault.current_user().as_deref(), Some("u2"));
        assert!(vault.list("u1", None, false).await.is_err());
    }

    #[tokio::test]
    async fn test_gate_rejects_other_owner() {
        let vault = vault();
        vault.on_identity_changed(Some("u1".into()));
        vault.unlock().await.unwrap();

        assert!(vault.list("u1", None, false).await.is_ok());
        assert!(matches!(
            vault.create_folder("x", None, "u2").await,
            Err(VaultError::AuthenticationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_foreground_unlocks_only_when_locked() {
        let vault = vault();
        assert_eq!(vault.on_app_foreground().await.unwrap(), None);

        vault.on_identity_changed(Some("u1".into()));
        assert_eq!(vault.on_app_foreground().await.unwrap(), Some(UnlockOutcome::Unlocked));
        assert_eq!(vault.on_app_foreground().await.unwrap(), None);

        vault.on_app_background();
        assert_eq!(vault.state(), LockState::Locked);
    }
}
