//! KeyStore contract and the in-memory implementation

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::crypto::KeyBytes;
use crate::error::{KeyStoreError, Result};

/// Durable per-device storage for per-item symmetric keys.
///
/// Every operation is atomic per key id and callable from any thread.
/// `store` never overwrites: an existing id fails with `DuplicateKey`.
pub trait KeyStore: Send + Sync {
    /// Store `key` under `key_id` for `owner_id`
    fn store(&self, key_id: &str, key: &KeyBytes, owner_id: &str) -> Result<()>;

    /// Load the key stored under `key_id`
    fn load(&self, key_id: &str) -> Result<KeyBytes>;

    /// Delete one key; `NotFound` if absent
    fn delete(&self, key_id: &str) -> Result<()>;

    /// Delete every key held for `owner_id`, returning how many were removed
    fn delete_all(&self, owner_id: &str) -> Result<usize>;

    /// Ids of all keys held for `owner_id`
    fn key_ids(&self, owner_id: &str) -> Result<Vec<String>>;

    fn contains(&self, key_id: &str) -> Result<bool> {
        match self.load(key_id) {
            Ok(_) => Ok(true),
            Err(KeyStoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Key ids double as file names, so only a path-safe alphabet is accepted.
pub fn validate_key_id(key_id: &str) -> Result<()> {
    let valid = !key_id.is_empty()
        && key_id.len() <= 128
        && key_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');

    if valid {
        Ok(())
    } else {
        Err(KeyStoreError::InvalidKeyId(key_id.to_string()))
    }
}

struct MemoryRecord {
    owner_id: String,
    key: KeyBytes,
}

/// Process-local KeyStore. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryKeyStore {
    records: RwLock<HashMap<String, MemoryRecord>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl KeyStore for MemoryKeyStore {
    fn store(&self, key_id: &str, key: &KeyBytes, owner_id: &str) -> Result<()> {
        validate_key_id(key_id)?;

        let mut records = self.records.write();
        if records.contains_key(key_id) {
            return Err(KeyStoreError::DuplicateKey(key_id.to_string()));
        }
        records.insert(
            key_id.to_string(),
            MemoryRecord {
                owner_id: owner_id.to_string(),
                key: key.clone(),
            },
        );
        Ok(())
    }

    fn load(&self, key_id: &str) -> Result<KeyBytes> {
        self.records
            .read()
            .get(key_id)
            .map(|record| record.key.clone())
            .ok_or_else(|| KeyStoreError::NotFound(key_id.to_string()))
    }

    fn delete(&self, key_id: &str) -> Result<()> {
        self.records
            .write()
            .remove(key_id)
            .map(|_| ())
            .ok_or_else(|| KeyStoreError::NotFound(key_id.to_string()))
    }

    fn delete_all(&self, owner_id: &str) -> Result<usize> {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|_, record| record.owner_id != owner_id);
        Ok(before - records.len())
    }

    fn key_ids(&self, owner_id: &str) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .records
            .read()
            .iter()
            .filter(|(_, record)| record.owner_id == owner_id)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_load_delete() {
        let store = MemoryKeyStore::new();
        let key = KeyBytes::generate();

        store.store("k1", &key, "u1").unwrap();
        assert_eq!(store.load("k1").unwrap(), key);

        store.delete("k1").unwrap();
        assert!(store.load("k1").unwrap_err().is_not_found());
        assert!(store.delete("k1").unwrap_err().is_not_found());
    }

    #[test]
    fn test_duplicate_key_refused() {
        let store = MemoryKeyStore::new();
        let first = KeyBytes::generate();
        store.store("k1", &first, "u1").unwrap();

        let err = store.store("k1", &KeyBytes::generate(), "u1").unwrap_err();
        assert!(matches!(err, KeyStoreError::DuplicateKey(_)));
        // Original key untouched
        assert_eq!(store.load("k1").unwrap(), first);
    }

    #[test]
    fn test_delete_all_scoped_to_owner() {
        let store = MemoryKeyStore::new();
        store.store("a1", &KeyBytes::generate(), "alice").unwrap();
        store.store("a2", &KeyBytes::generate(), "alice").unwrap();
        store.store("b1", &KeyBytes::generate(), "bob").unwrap();

        assert_eq!(store.key_ids("alice").unwrap(), vec!["a1", "a2"]);
        assert_eq!(store.delete_all("alice").unwrap(), 2);
        assert!(store.key_ids("alice").unwrap().is_empty());
        assert!(store.contains("b1").unwrap());
    }

    #[test]
    fn test_key_id_validation() {
        assert!(validate_key_id("0b7c-11_ab").is_ok());
        assert!(validate_key_id("").is_err());
        assert!(validate_key_id("../etc/passwd").is_err());
        assert!(validate_key_id("a/b").is_err());
    }
}
