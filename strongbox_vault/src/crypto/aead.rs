//! Strongbox Vault - AEAD Encryption
//!
//! AES-256-GCM for item payloads, XChaCha20-Poly1305 for cache rows.
//! Both produce `nonce || ciphertext || tag`.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use strongbox_keystore::KeyBytes;

use super::keys::{generate_nonce, generate_xchacha_nonce, NONCE_LEN, TAG_LEN, XCHACHA_NONCE_LEN};
use crate::error::CryptoError;

// ═══════════════════════════════════════════════════════════════════════════
// AES-256-GCM (item payloads)
// ═══════════════════════════════════════════════════════════════════════════

/// Encrypt with AES-256-GCM under a random nonce, returning `nonce || ciphertext`
pub fn encrypt_aes_gcm(key: &KeyBytes, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key.expose())
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let nonce_bytes = generate_nonce();
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt `nonce || ciphertext`. Any tag mismatch or truncation fails closed.
pub fn decrypt_aes_gcm(key: &KeyBytes, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::AuthenticationFailed);
    }
    let cipher =
        Aes256Gcm::new_from_slice(key.expose()).map_err(|_| CryptoError::AuthenticationFailed)?;

    let (nonce, ciphertext) = data.split_at(NONCE_LEN);
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::AuthenticationFailed)
}

// ═══════════════════════════════════════════════════════════════════════════
// XChaCha20-Poly1305 (local metadata cache)
// ═══════════════════════════════════════════════════════════════════════════

/// Seal `plaintext` with XChaCha20-Poly1305, binding `aad`
pub fn seal_xchacha(key: &KeyBytes, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new_from_slice(key.expose())
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let nonce_bytes = generate_xchacha_nonce();
    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce_bytes),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut out = Vec::with_capacity(XCHACHA_NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

pub fn open_xchacha(key: &KeyBytes, data: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < XCHACHA_NONCE_LEN + TAG_LEN {
        return Err(CryptoError::AuthenticationFailed);
    }
    let cipher = XChaCha20Poly1305::new_from_slice(key.expose())
        .map_err(|_| CryptoError::AuthenticationFailed)?;

    let (nonce, ciphertext) = data.split_at(XCHACHA_NONCE_LEN);
    cipher
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::AuthenticationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aes_gcm_roundtrip() {
        let key = KeyBytes::generate();
        let plaintext = b"Strongbox - scanned tax return, page 1";

        let encrypted = encrypt_aes_gcm(&key, plaintext).unwrap();
        assert_eq!(encrypted.len(), NONCE_LEN + plaintext.len() + TAG_LEN);

        let decrypted = decrypt_aes_gcm(&key, &encrypted).unwrap();
        assert_eq!(plaintext.as_slice(), decrypted.as_slice());
    }

    #[test]
    fn test_wrong_key_fails() {
        let encrypted = encrypt_aes_gcm(&KeyBytes::generate(), b"Secret data").unwrap();
        assert_eq!(
            decrypt_aes_gcm(&KeyBytes::generate(), &encrypted),
            Err(CryptoError::AuthenticationFailed)
        );
    }

    #[test]
    fn test_truncated_input_fails() {
        let key = KeyBytes::generate();
        assert_eq!(
            decrypt_aes_gcm(&key, &[0u8; NONCE_LEN + TAG_LEN - 1]),
            Err(CryptoError::AuthenticationFailed)
        );
        assert_eq!(decrypt_aes_gcm(&key, &[]), Err(CryptoError::AuthenticationFailed));
    }

    #[test]
    fn test_xchacha_binds_aad() {
        let key = KeyBytes::generate();
        let sealed = seal_xchacha(&key, b"{\"name\":\"a\"}", b"u1|item-1").unwrap();

        assert_eq!(open_xchacha(&key, &sealed, b"u1|item-1").unwrap(), b"{\"name\":\"a\"}");
        assert!(open_xchacha(&key, &sealed, b"u2|item-1").is_err());
    }
}
