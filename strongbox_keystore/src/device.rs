//! Sources for the device key that seals a `FileKeyStore`

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use tracing::info;

use crate::crypto::{derive_kek, generate_salt, Argon2Config, KeyBytes, SALT_LEN};
use crate::error::{KeyStoreError, Result};

const SALT_FILE: &str = "keystore.salt";

/// Derive the device key from a passphrase.
///
/// The salt is kept next to the keystore in `keystore.salt` and created on
/// first use.
pub fn device_key_from_passphrase<P: AsRef<Path>>(
    root: P,
    passphrase: &str,
    config: &Argon2Config,
) -> Result<KeyBytes> {
    let root = root.as_ref();
    fs::create_dir_all(root)?;
    let salt_path = root.join(SALT_FILE);

    let salt = match fs::read_to_string(&salt_path) {
        Ok(encoded) => {
            let salt = hex::decode(encoded.trim())
                .map_err(|e| KeyStoreError::Corrupted(format!("salt: {e}")))?;
            if salt.len() != SALT_LEN {
                return Err(KeyStoreError::Corrupted(format!(
                    "salt length {} (expected {SALT_LEN})",
                    salt.len()
                )));
            }
            salt
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            let salt = generate_salt()?;
            fs::write(&salt_path, hex::encode(salt))?;
            info!(path = %salt_path.display(), "created keystore salt");
            salt.to_vec()
        }
        Err(e) => return Err(e.into()),
    };

    derive_kek(passphrase, &salt, config)
}

/// Load the device key from the OS credential store, creating a random one
/// on first use.
#[cfg(feature = "os-keyring")]
pub fn device_key_from_os_keyring(service: &str, account: &str) -> Result<KeyBytes> {
    let entry = keyring::Entry::new(service, account)
        .map_err(|e| KeyStoreError::Keyring(format!("failed to create keyring entry: {e}")))?;

    match entry.get_password() {
        Ok(encoded) => {
            let bytes = zeroize::Zeroizing::new(
                hex::decode(encoded.trim())
                    .map_err(|e| KeyStoreError::Keyring(format!("stored key is not hex: {e}")))?,
            );
            KeyBytes::from_slice(&bytes)
        }
        Err(keyring::Error::NoEntry) => {
            let key = KeyBytes::generate();
            let encoded = zeroize::Zeroizing::new(hex::encode(key.expose()));
            entry.set_password(&encoded).map_err(|e| {
                KeyStoreError::Keyring(format!("failed to store device key in keyring: {e}"))
            })?;
            info!(service, account, "created device key in OS keyring");
            Ok(key)
        }
        Err(e) => Err(KeyStoreError::Keyring(format!(
            "failed to read from keyring: {e}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_passphrase_key_stable_across_calls() {
        let dir = tempdir().unwrap();
        let config = Argon2Config::insecure_fast();

        let k1 = device_key_from_passphrase(dir.path(), "1234", &config).unwrap();
        let k2 = device_key_from_passphrase(dir.path(), "1234", &config).unwrap();
        let other = device_key_from_passphrase(dir.path(), "4321", &config).unwrap();

        assert_eq!(k1, k2);
        assert_ne!(k1, other);
        assert!(dir.path().join(SALT_FILE).exists());
    }
}
