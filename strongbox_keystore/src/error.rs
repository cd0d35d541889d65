//! Error types for the Strongbox KeyStore

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Key already exists: {0} (refusing to overwrite)")]
    DuplicateKey(String),

    #[error("Invalid key id: {0:?}")]
    InvalidKeyId(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Device key does not match this keystore")]
    DeviceKeyMismatch,

    #[error("Key record failed authentication: {0}")]
    RecordTampered(String),

    #[error("Key record corrupted: {0}")]
    Corrupted(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Keyring error: {0}")]
    Keyring(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid record JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, KeyStoreError>;

impl KeyStoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Errors that mean the stored material can no longer be trusted.
    pub fn is_security_critical(&self) -> bool {
        matches!(
            self,
            Self::DeviceKeyMismatch | Self::RecordTampered(_) | Self::Corrupted(_)
        )
    }
}
