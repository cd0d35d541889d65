//! AEAD sealing of key records - XChaCha20-Poly1305 (default) or AES-256-GCM

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use serde::{Deserialize, Serialize};

use super::key_bytes::KeyBytes;
use crate::error::{KeyStoreError, Result};

/// AEAD cipher used for a sealed record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AeadCipher {
    /// XChaCha20-Poly1305 (24-byte nonce)
    #[default]
    #[serde(rename = "xchacha20-poly1305")]
    XChaCha20Poly1305,
}

impl AeadCipher {
    pub fn nonce_len(&self) -> usize {
        match self {
            Self::XChaCha20Poly1305 => 24,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::XChaCha20Poly1305 => "XChaCha20-Poly1305",
        }
    }
}

/// Nonce and ciphertext (tag appended) of a sealed payload
#[derive(Debug, Clone)]
pub struct Sealed {
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

/// Seal `plaintext` under `key`, binding `aad` into the tag
pub fn seal(key: &KeyBytes, plaintext: &[u8], aad: &[u8], cipher: AeadCipher) -> Result<Sealed> {
    let mut nonce = vec![0u8; cipher.nonce_len()];
    getrandom::getrandom(&mut nonce)
        .map_err(|e| KeyStoreError::Crypto(format!("RNG failed: {e}")))?;

    let ciphertext = match cipher {
        AeadCipher::XChaCha20Poly1305 => {
            let c = XChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(key.expose()));
            c.encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|e| KeyStoreError::Crypto(format!("XChaCha20 seal failed: {e}")))?
        }
    };

    Ok(Sealed { nonce, ciphertext })
}

/// Open a sealed payload. Any tag mismatch (wrong key, wrong aad, flipped
/// bit) is reported as `RecordTampered`.
pub fn open(key: &KeyBytes, sealed: &Sealed, aad: &[u8], cipher: AeadCipher) -> Result<Vec<u8>> {
    if sealed.nonce.len() != cipher.nonce_len() {
        return Err(KeyStoreError::Corrupted(format!(
            "invalid {} nonce length {}",
            cipher.name(),
            sealed.nonce.len()
        )));
    }

    match cipher {
        AeadCipher::XChaCha20Poly1305 => {
            let c = XChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(key.expose()));
            c.decrypt(
                XNonce::from_slice(&sealed.nonce),
                Payload {
                    msg: &sealed.ciphertext,
                    aad,
                },
            )
            .map_err(|_| KeyStoreError::RecordTampered("authentication tag mismatch".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let kek = KeyBytes::from_array([1u8; 32]);
        let sealed = seal(&kek, b"item key material", b"owner|key", AeadCipher::default()).unwrap();
        let opened = open(&kek, &sealed, b"owner|key", AeadCipher::default()).unwrap();
        assert_eq!(opened, b"item key material");
    }

    #[test]
    fn test_wrong_kek_fails() {
        let kek1 = KeyBytes::from_array([1u8; 32]);
        let kek2 = KeyBytes::from_array([2u8; 32]);
        let sealed = seal(&kek1, b"secret", b"", AeadCipher::default()).unwrap();
        let result = open(&kek2, &sealed, b"", AeadCipher::default());
        assert!(matches!(result, Err(KeyStoreError::RecordTampered(_))));
    }

    #[test]
    fn test_swapped_aad_fails() {
        let kek = KeyBytes::from_array([7u8; 32]);
        let sealed = seal(&kek, b"secret", b"alice|k1", AeadCipher::default()).unwrap();
        assert!(open(&kek, &sealed, b"bob|k1", AeadCipher::default()).is_err());
    }
}
