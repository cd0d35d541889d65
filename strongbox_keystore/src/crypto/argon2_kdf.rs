//! Argon2id derivation of the device key from a passphrase

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};

use super::key_bytes::{KeyBytes, KEY_LEN};
use crate::error::{KeyStoreError, Result};

/// Salt length in bytes
pub const SALT_LEN: usize = 16;

/// Argon2id parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Argon2Config {
    /// Iterations (time cost)
    pub time_cost: u32,
    /// Memory in KiB
    pub memory_cost_kib: u32,
    /// Lanes
    pub parallelism: u32,
}

impl Default for Argon2Config {
    fn default() -> Self {
        Self {
            time_cost: 3,
            memory_cost_kib: 64 * 1024, // 64 MiB
            parallelism: 2,
        }
    }
}

impl Argon2Config {
    /// Parameters for constrained devices
    pub fn low_memory() -> Self {
        Self {
            time_cost: 4,
            memory_cost_kib: 16 * 1024, // 16 MiB
            parallelism: 1,
        }
    }

    /// Minimal cost, for tests only
    pub fn insecure_fast() -> Self {
        Self {
            time_cost: 1,
            memory_cost_kib: 8,
            parallelism: 1,
        }
    }
}

/// Derive a 256-bit key from `passphrase` and `salt`
pub fn derive_kek(passphrase: &str, salt: &[u8], config: &Argon2Config) -> Result<KeyBytes> {
    let params = Params::new(
        config.memory_cost_kib,
        config.time_cost,
        config.parallelism,
        Some(KEY_LEN),
    )
    .map_err(|e| KeyStoreError::Crypto(format!("Invalid Argon2 params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut output = [0u8; KEY_LEN];
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut output)
        .map_err(|e| KeyStoreError::Crypto(format!("Argon2 hashing failed: {e}")))?;

    let key = KeyBytes::from_array(output);
    zeroize::Zeroize::zeroize(&mut output);
    Ok(key)
}

/// Random salt
pub fn generate_salt() -> Result<[u8; SALT_LEN]> {
    let mut salt = [0u8; SALT_LEN];
    getrandom::getrandom(&mut salt)
        .map_err(|e| KeyStoreError::Crypto(format!("RNG failed: {e}")))?;
    Ok(salt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_kek_deterministic() {
        let config = Argon2Config::insecure_fast();
        let salt = [1u8; SALT_LEN];

        let kek1 = derive_kek("correct horse", &salt, &config).unwrap();
        let kek2 = derive_kek("correct horse", &salt, &config).unwrap();
        assert_eq!(kek1, kek2);

        let other = derive_kek("battery staple", &salt, &config).unwrap();
        assert_ne!(kek1, other);
    }
}
