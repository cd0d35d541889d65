//! HKDF-SHA256 derivation of per-record sealing keys

use hkdf::Hkdf;
use sha2::Sha256;

use super::key_bytes::{KeyBytes, KEY_LEN};
use crate::error::{KeyStoreError, Result};

/// Derivation purposes
pub mod purposes {
    /// Per-record sealing key, suffixed with the key id
    pub const RECORD: &str = "STRONGBOX:keystore:record:v1:";
    /// Sealing key for the device-key check record
    pub const CHECK: &str = "STRONGBOX:keystore:check:v1";
}

/// Derive a 32-byte subkey of `device_key` for `purpose`
pub fn derive_subkey(device_key: &KeyBytes, purpose: &str) -> Result<KeyBytes> {
    let hk = Hkdf::<Sha256>::new(None, device_key.expose());
    let mut okm = [0u8; KEY_LEN];
    hk.expand(purpose.as_bytes(), &mut okm)
        .map_err(|e| KeyStoreError::Crypto(format!("HKDF expand failed: {e}")))?;
    let key = KeyBytes::from_array(okm);
    zeroize::Zeroize::zeroize(&mut okm);
    Ok(key)
}

/// Sealing key for the record holding `key_id`
pub fn derive_record_key(device_key: &KeyBytes, key_id: &str) -> Result<KeyBytes> {
    derive_subkey(device_key, &format!("{}{}", purposes::RECORD, key_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_deterministic() {
        let device = KeyBytes::from_array([42u8; 32]);
        let k1 = derive_record_key(&device, "k-1").unwrap();
        let k2 = derive_record_key(&device, "k-1").unwrap();
        assert_eq!(k1, k2);
    }

    #[test]
    fn test_distinct_ids_distinct_keys() {
        let device = KeyBytes::from_array([42u8; 32]);
        let k1 = derive_record_key(&device, "k-1").unwrap();
        let k2 = derive_record_key(&device, "k-2").unwrap();
        let check = derive_subkey(&device, purposes::CHECK).unwrap();
        assert_ne!(k1, k2);
        assert_ne!(k1, check);
    }
}
