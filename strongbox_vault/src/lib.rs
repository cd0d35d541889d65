//! # Strongbox Vault
//!
//! Encrypted content vault: files, photos and scanned documents stored
//! under per-item keys, behind a strong-authentication lock.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                         VAULT                            │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────┐  │
//! │  │  SESSION    │  │  INGEST     │  │  RECYCLE BIN    │  │
//! │  │  lock gate  │  │  AES-256-GCM│  │  purge / sweep  │  │
//! │  └──────┬──────┘  └──────┬──────┘  └────────┬────────┘  │
//! │         │                │                   │           │
//! │  ┌──────┴────────────────┴───────────────────┴────────┐ │
//! │  │      METADATA STORE (cache, CacheDb snapshot)       │ │
//! │  └─────────────────────────────────────────────────────┘ │
//! │                                                          │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────┐  │
//! │  │  KEYSTORE   │  │  BLOB STORE │  │  METADATA REMOTE│  │
//! │  │  (per item) │  │  ciphertext │  │  item documents │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────┘  │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Model
//!
//! - Every file encrypted with its own AES-256-GCM key
//! - Keys live only in the KeyStore, referenced by id from metadata
//! - SHA-256 content hash verified on every read
//! - Local metadata snapshot sealed with XChaCha20-Poly1305
//! - Every operation gated on `Unlocked` and the signed-in owner
//! - Plaintext buffers zeroized after use

pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod ingest;
pub mod metadata;
pub mod model;
pub mod recycle;
pub mod remote;
pub mod secure_fs;
pub mod session;
pub mod vault;

pub use auth::{hash_pin, AuthError, PinAuthenticator, StrongAuthenticator};
pub use config::{ScanSettings, VaultConfig};
pub use crypto::CryptoEngine;
pub use error::{CryptoError, VaultError, VaultResult};
pub use ingest::{ImportRequest, ImportSource};
pub use metadata::{CacheDb, MetadataStore};
pub use model::{ItemKind, Listing, SortOption, VaultItem, VaultStats};
pub use recycle::{ReconcileReport, SweepReport};
pub use remote::{BlobStore, FsRemote, MemoryRemote, MetadataRemote, RemoteError};
pub use session::LockState;
pub use vault::{UnlockOutcome, Vault, VaultServices};

/// Strongbox Vault version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
