//! Zeroize-on-drop wrapper for raw 256-bit key material

use std::fmt;

use rand::RngCore;
use secrecy::{ExposeSecret, SecretBox};

use crate::error::{KeyStoreError, Result};

/// Key length in bytes (256 bits)
pub const KEY_LEN: usize = 32;

/// Raw symmetric key material.
///
/// The bytes live in a `SecretBox`, so they are wiped when the value is
/// dropped and never show up in `Debug` output.
pub struct KeyBytes {
    inner: SecretBox<[u8; KEY_LEN]>,
}

impl KeyBytes {
    pub fn from_array(bytes: [u8; KEY_LEN]) -> Self {
        Self {
            inner: SecretBox::new(Box::new(bytes)),
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; KEY_LEN] =
            bytes
                .try_into()
                .map_err(|_| KeyStoreError::InvalidKeyLength {
                    expected: KEY_LEN,
                    actual: bytes.len(),
                })?;
        Ok(Self::from_array(array))
    }

    /// Fresh key from the OS CSPRNG
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let key = Self::from_array(bytes);
        zeroize::Zeroize::zeroize(&mut bytes);
        key
    }

    pub fn expose(&self) -> &[u8; KEY_LEN] {
        self.inner.expose_secret()
    }
}

impl Clone for KeyBytes {
    fn clone(&self) -> Self {
        Self::from_array(*self.expose())
    }
}

impl PartialEq for KeyBytes {
    fn eq(&self, other: &Self) -> bool {
        // Constant-time over the full width
        self.expose()
            .iter()
            .zip(other.expose().iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl Eq for KeyBytes {}

impl fmt::Debug for KeyBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyBytes([REDACTED])")
    }
}
