//! Strongbox Vault - Error Types

use strongbox_keystore::KeyStoreError;
use thiserror::Error;

/// Result type for vault operations
pub type VaultResult<T> = Result<T, VaultError>;

/// Vault error types
#[derive(Error, Debug)]
pub enum VaultError {
    // ═══════════════════════════════════════════════════════════════
    // LOCK / AUTHENTICATION
    // ═══════════════════════════════════════════════════════════════
    /// User declined or dismissed the prompt. Not shown as an error.
    #[error("Authentication cancelled")]
    AuthenticationCancelled,

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    // ═══════════════════════════════════════════════════════════════
    // INPUT
    // ═══════════════════════════════════════════════════════════════
    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // ═══════════════════════════════════════════════════════════════
    // KEYS / CRYPTO
    // ═══════════════════════════════════════════════════════════════
    #[error("Key storage failed: {0}")]
    KeyStorageFailed(String),

    #[error("Crypto failure: {0}")]
    CryptoFailure(String),

    // ═══════════════════════════════════════════════════════════════
    // REMOTE / LIFECYCLE
    // ═══════════════════════════════════════════════════════════════
    #[error("Remote store unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Purge of {item_id} incomplete: {reason}")]
    PurgeFailed { item_id: String, reason: String },

    // ═══════════════════════════════════════════════════════════════
    // LOCAL
    // ═══════════════════════════════════════════════════════════════
    #[error("Metadata cache error: {0}")]
    Cache(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VaultError {
    pub fn auth_failed(reason: impl Into<String>) -> Self {
        Self::AuthenticationFailed(reason.into())
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidData(reason.into())
    }

    /// Cancellation re-locks quietly; everything else gets a message.
    pub fn is_silent(&self) -> bool {
        matches!(self, VaultError::AuthenticationCancelled)
    }

    /// Worth retrying unchanged (backoff is the caller's call)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VaultError::RemoteUnavailable(_)
                | VaultError::KeyStorageFailed(_)
                | VaultError::PurgeFailed { .. }
        )
    }

    pub fn is_security_critical(&self) -> bool {
        matches!(
            self,
            VaultError::AuthenticationFailed(_) | VaultError::CryptoFailure(_)
        )
    }

    /// Human-readable text for the caller's UI
    pub fn user_message(&self) -> Option<String> {
        match self {
            VaultError::AuthenticationCancelled => None,
            VaultError::AuthenticationFailed(reason) => {
                Some(format!("Could not unlock the vault: {reason}"))
            }
            VaultError::KeyStorageFailed(_) | VaultError::CryptoFailure(_) => {
                Some("Something went wrong while securing your file. Please retry.".into())
            }
            VaultError::RemoteUnavailable(_) => {
                Some("The vault server is unreachable. Please retry later.".into())
            }
            VaultError::PurgeFailed { .. } => Some(
                "The item could not be removed completely. It will be retried.".into(),
            ),
            other => Some(other.to_string()),
        }
    }
}

/// Crypto engine failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Wrong key, tag mismatch or corrupted input. No plaintext escapes.
    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
}

impl From<CryptoError> for VaultError {
    fn from(e: CryptoError) -> Self {
        VaultError::CryptoFailure(e.to_string())
    }
}

impl From<KeyStoreError> for VaultError {
    fn from(e: KeyStoreError) -> Self {
        match e {
            KeyStoreError::NotFound(key_id) => VaultError::NotFound(format!("key {key_id}")),
            other => VaultError::KeyStorageFailed(other.to_string()),
        }
    }
}

impl From<rusqlite::Error> for VaultError {
    fn from(e: rusqlite::Error) -> Self {
        VaultError::Cache(e.to_string())
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(e: serde_json::Error) -> Self {
        VaultError::Serialization(e.to_string())
    }
}

impl From<image::ImageError> for VaultError {
    fn from(e: image::ImageError) -> Self {
        VaultError::InvalidData(format!("image: {e}"))
    }
}

impl From<tokio::task::JoinError> for VaultError {
    fn from(e: tokio::task::JoinError) -> Self {
        VaultError::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keystore_error_mapping() {
        let not_found: VaultError = KeyStoreError::NotFound("k1".into()).into();
        assert!(matches!(not_found, VaultError::NotFound(_)));

        let dup: VaultError = KeyStoreError::DuplicateKey("k1".into()).into();
        assert!(matches!(dup, VaultError::KeyStorageFailed(_)));
    }

    #[test]
    fn test_cancellation_is_silent() {
        assert!(VaultError::AuthenticationCancelled.is_silent());
        assert!(VaultError::AuthenticationCancelled.user_message().is_none());
        assert!(VaultError::auth_failed("no sensor").user_message().is_some());
        assert!(VaultError::RemoteUnavailable("timeout".into()).is_retryable());
        assert!(!VaultError::invalid("empty").is_retryable());
    }
}
