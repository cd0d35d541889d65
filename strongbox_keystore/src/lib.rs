//! # Strongbox KeyStore
//!
//! Per-device storage for the per-item keys of a Strongbox vault.
//!
//! - One key record per key id, never overwritten (`DuplicateKey`)
//! - Records sealed with XChaCha20-Poly1305 under HKDF(device key, key id)
//! - Owner and key id bound as associated data
//! - Device key from a passphrase (Argon2id) or the OS keyring
//! - Key material zeroized on drop

pub mod crypto;
pub mod device;
pub mod error;
pub mod file_store;
pub mod store;

// Re-exports
pub use crypto::{Argon2Config, KeyBytes, KEY_LEN};
pub use device::device_key_from_passphrase;
#[cfg(feature = "os-keyring")]
pub use device::device_key_from_os_keyring;
pub use error::{KeyStoreError, Result};
pub use file_store::FileKeyStore;
pub use store::{KeyStore, MemoryKeyStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
