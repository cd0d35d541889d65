//! Strongbox Vault - Key and nonce generation

use rand::RngCore;
use strongbox_keystore::KeyBytes;

pub use strongbox_keystore::KEY_LEN;

/// Nonce length for AES-GCM (96 bits)
pub const NONCE_LEN: usize = 12;

/// Nonce length for XChaCha20
pub const XCHACHA_NONCE_LEN: usize = 24;

/// Poly1305 / GCM tag length
pub const TAG_LEN: usize = 16;

/// Fresh 256-bit item key from the OS CSPRNG
pub fn generate_key() -> KeyBytes {
    KeyBytes::generate()
}

/// Generate a random nonce for AES-GCM
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Generate a random nonce for XChaCha20
pub fn generate_xchacha_nonce() -> [u8; XCHACHA_NONCE_LEN] {
    let mut nonce = [0u8; XCHACHA_NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_and_nonces_are_fresh() {
        assert_ne!(generate_key(), generate_key());
        assert_ne!(generate_nonce(), generate_nonce());
        assert_ne!(generate_xchacha_nonce(), generate_xchacha_nonce());
    }
}
