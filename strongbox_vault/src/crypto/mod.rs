//! Strongbox Vault - Cryptographic Core
//!
//! Per-item AES-256-GCM, SHA-256 content hashes, sealed cache rows.

pub mod aead;
pub mod keys;

pub use aead::*;
pub use keys::*;

use sha2::{Digest, Sha256};
use strongbox_keystore::KeyBytes;

use crate::error::CryptoError;

/// Stateless crypto engine used by the ingestion and read paths
#[derive(Debug, Clone, Copy, Default)]
pub struct CryptoEngine;

impl CryptoEngine {
    pub fn new() -> Self {
        Self
    }

    /// 256-bit key from the CSPRNG
    pub fn generate_key(&self) -> KeyBytes {
        generate_key()
    }

    /// AES-256-GCM with a random 96-bit nonce prepended
    pub fn encrypt(&self, plaintext: &[u8], key: &KeyBytes) -> Result<Vec<u8>, CryptoError> {
        encrypt_aes_gcm(key, plaintext)
    }

    pub fn decrypt(&self, ciphertext: &[u8], key: &KeyBytes) -> Result<Vec<u8>, CryptoError> {
        decrypt_aes_gcm(key, ciphertext)
    }

    /// SHA-256, lowercase hex
    pub fn hash(&self, bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    /// Item content hash: empty for zero-byte payloads
    pub fn content_hash(&self, bytes: &[u8]) -> String {
        if bytes.is_empty() {
            String::new()
        } else {
            self.hash(bytes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic_hex() {
        let engine = CryptoEngine::new();
        let digest = engine.hash(b"hello");
        assert_eq!(
            digest,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(digest, engine.hash(b"hello"));
        assert_eq!(engine.content_hash(b""), "");
    }

    #[test]
    fn test_engine_roundtrip() {
        let engine = CryptoEngine::new();
        let key = engine.generate_key();
        let ct = engine.encrypt(b"payload", &key).unwrap();
        assert_eq!(engine.decrypt(&ct, &key).unwrap(), b"payload");
    }
}
