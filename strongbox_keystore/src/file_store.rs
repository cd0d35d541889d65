//! Sealed, file-backed KeyStore
//!
//! Layout under the root directory:
//!
//! ```text
//! keystore.check        sealed marker, detects a wrong device key at open
//! records/<key_id>.key  one JSON record per key
//! ```
//!
//! Each record holds the key sealed with XChaCha20-Poly1305 under
//! `HKDF(device_key, key_id)`, with `owner_id|key_id` as associated data.

use std::collections::hash_map::DefaultHasher;
use std::fs::{self, OpenOptions};
use std::hash::{Hash, Hasher};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::crypto::{
    derive_record_key, derive_subkey, open, purposes, seal, AeadCipher, KeyBytes, Sealed,
};
use crate::error::{KeyStoreError, Result};
use crate::store::{validate_key_id, KeyStore};

const RECORD_VERSION: u32 = 1;
const RECORD_EXT: &str = "key";
const RECORDS_DIR: &str = "records";
const CHECK_FILE: &str = "keystore.check";
const CHECK_MARKER: &[u8] = b"strongbox-keystore-v1";
const CHECK_AAD: &[u8] = b"strongbox:check";
const LOCK_STRIPES: usize = 16;

/// On-disk key record
#[derive(Debug, Serialize, Deserialize)]
struct KeyRecordFile {
    version: u32,
    key_id: String,
    owner_id: String,
    created_at: DateTime<Utc>,
    cipher: AeadCipher,
    /// hex
    nonce: String,
    /// hex, tag appended
    ciphertext: String,
}

impl KeyRecordFile {
    fn sealed(&self) -> Result<Sealed> {
        Ok(Sealed {
            nonce: hex::decode(&self.nonce)
                .map_err(|e| KeyStoreError::Corrupted(format!("nonce: {e}")))?,
            ciphertext: hex::decode(&self.ciphertext)
                .map_err(|e| KeyStoreError::Corrupted(format!("ciphertext: {e}")))?,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckFile {
    version: u32,
    nonce: String,
    ciphertext: String,
}

fn record_aad(owner_id: &str, key_id: &str) -> Vec<u8> {
    format!("{owner_id}|{key_id}").into_bytes()
}

/// KeyStore persisting one sealed record per key id
pub struct FileKeyStore {
    root: PathBuf,
    device_key: KeyBytes,
    stripes: Vec<Mutex<()>>,
}

impl FileKeyStore {
    /// Open (or initialise) a keystore at `root` sealed under `device_key`.
    ///
    /// Fails with `DeviceKeyMismatch` if the directory was initialised with
    /// a different device key.
    pub fn open<P: AsRef<Path>>(root: P, device_key: KeyBytes) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(RECORDS_DIR))?;

        let store = Self {
            root,
            device_key,
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        };
        store.verify_or_write_check()?;

        debug!(root = %store.root.display(), "keystore opened");
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Remove every key record (full wipe). The check record is kept so the
    /// directory stays bound to the same device key.
    pub fn wipe(&self) -> Result<usize> {
        let mut removed = 0;
        for path in self.record_paths()? {
            remove_securely(&path)?;
            removed += 1;
        }
        warn!(removed, "keystore wiped");
        Ok(removed)
    }

    fn verify_or_write_check(&self) -> Result<()> {
        let check_key = derive_subkey(&self.device_key, purposes::CHECK)?;
        let path = self.root.join(CHECK_FILE);

        if path.exists() {
            let check: CheckFile = serde_json::from_slice(&fs::read(&path)?)?;
            let sealed = Sealed {
                nonce: hex::decode(&check.nonce)
                    .map_err(|e| KeyStoreError::Corrupted(format!("check nonce: {e}")))?,
                ciphertext: hex::decode(&check.ciphertext)
                    .map_err(|e| KeyStoreError::Corrupted(format!("check ciphertext: {e}")))?,
            };
            let marker = open(&check_key, &sealed, CHECK_AAD, AeadCipher::default())
                .map_err(|_| KeyStoreError::DeviceKeyMismatch)?;
            if marker != CHECK_MARKER {
                return Err(KeyStoreError::DeviceKeyMismatch);
            }
            return Ok(());
        }

        let sealed = seal(&check_key, CHECK_MARKER, CHECK_AAD, AeadCipher::default())?;
        let check = CheckFile {
            version: RECORD_VERSION,
            nonce: hex::encode(&sealed.nonce),
            ciphertext: hex::encode(&sealed.ciphertext),
        };
        write_atomic(&path, &serde_json::to_vec_pretty(&check)?)
    }

    fn record_path(&self, key_id: &str) -> PathBuf {
        self.root
            .join(RECORDS_DIR)
            .join(format!("{key_id}.{RECORD_EXT}"))
    }

    fn stripe(&self, key_id: &str) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        key_id.hash(&mut hasher);
        &self.stripes[(hasher.finish() as usize) % self.stripes.len()]
    }

    fn record_paths(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(self.root.join(RECORDS_DIR))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(RECORD_EXT) {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    fn read_record(path: &Path) -> Result<KeyRecordFile> {
        let record: KeyRecordFile = serde_json::from_slice(&fs::read(path)?)?;
        if record.version != RECORD_VERSION {
            return Err(KeyStoreError::Corrupted(format!(
                "unsupported record version {}",
                record.version
            )));
        }
        Ok(record)
    }

    /// Read a listed record under its stripe lock; `None` if it was deleted
    /// since the directory was read
    fn listed_record(&self, path: &Path) -> Result<Option<KeyRecordFile>> {
        let Some(key_id) = path.file_stem().and_then(|s| s.to_str()) else {
            return Ok(None);
        };
        let _guard = self.stripe(key_id).lock();
        match Self::read_record(path) {
            Ok(record) => Ok(Some(record)),
            Err(KeyStoreError::Io(e)) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl KeyStore for FileKeyStore {
    fn store(&self, key_id: &str, key: &KeyBytes, owner_id: &str) -> Result<()> {
        validate_key_id(key_id)?;

        let record_key = derive_record_key(&self.device_key, key_id)?;
        let sealed = seal(
            &record_key,
            key.expose(),
            &record_aad(owner_id, key_id),
            AeadCipher::default(),
        )?;
        let record = KeyRecordFile {
            version: RECORD_VERSION,
            key_id: key_id.to_string(),
            owner_id: owner_id.to_string(),
            created_at: Utc::now(),
            cipher: AeadCipher::default(),
            nonce: hex::encode(&sealed.nonce),
            ciphertext: hex::encode(&sealed.ciphertext),
        };
        let bytes = serde_json::to_vec_pretty(&record)?;

        let path = self.record_path(key_id);
        let _guard = self.stripe(key_id).lock();
        if path.exists() {
            return Err(KeyStoreError::DuplicateKey(key_id.to_string()));
        }
        write_atomic(&path, &bytes)?;

        debug!(key_id, owner_id, "key stored");
        Ok(())
    }

    fn load(&self, key_id: &str) -> Result<KeyBytes> {
        validate_key_id(key_id)?;

        let path = self.record_path(key_id);
        let record = {
            let _guard = self.stripe(key_id).lock();
            match Self::read_record(&path) {
                Ok(record) => record,
                Err(KeyStoreError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                    return Err(KeyStoreError::NotFound(key_id.to_string()));
                }
                Err(e) => return Err(e),
            }
        };

        if record.key_id != key_id {
            return Err(KeyStoreError::Corrupted(format!(
                "record {key_id} claims id {}",
                record.key_id
            )));
        }

        let record_key = derive_record_key(&self.device_key, key_id)?;
        let plaintext = zeroize::Zeroizing::new(open(
            &record_key,
            &record.sealed()?,
            &record_aad(&record.owner_id, key_id),
            record.cipher,
        )?);
        KeyBytes::from_slice(&plaintext)
    }

    fn delete(&self, key_id: &str) -> Result<()> {
        validate_key_id(key_id)?;

        let path = self.record_path(key_id);
        let _guard = self.stripe(key_id).lock();
        if !path.exists() {
            return Err(KeyStoreError::NotFound(key_id.to_string()));
        }
        remove_securely(&path)?;

        debug!(key_id, "key deleted");
        Ok(())
    }

    fn delete_all(&self, owner_id: &str) -> Result<usize> {
        let mut removed = 0;
        for path in self.record_paths()? {
            let Some(record) = self.listed_record(&path)? else {
                continue;
            };
            if record.owner_id != owner_id {
                continue;
            }
            let _guard = self.stripe(&record.key_id).lock();
            match remove_securely(&path) {
                Ok(()) => removed += 1,
                // Deleted concurrently
                Err(KeyStoreError::Io(e)) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }

        debug!(owner_id, removed, "owner keys deleted");
        Ok(removed)
    }

    fn key_ids(&self, owner_id: &str) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for path in self.record_paths()? {
            match self.listed_record(&path)? {
                Some(record) if record.owner_id == owner_id => ids.push(record.key_id),
                _ => {}
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Write to a temp file, fsync, then rename over `path`
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let mut suffix = [0u8; 8];
    getrandom::getrandom(&mut suffix)
        .map_err(|e| KeyStoreError::Crypto(format!("RNG failed: {e}")))?;
    let temp_path = path.with_extension(format!("tmp-{}", hex::encode(suffix)));

    let result = (|| -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    Ok(result?)
}

/// Overwrite with zeros before unlinking
fn remove_securely(path: &Path) -> Result<()> {
    let len = fs::metadata(path)?.len() as usize;
    if len > 0 {
        let mut file = OpenOptions::new().write(true).open(path)?;
        file.write_all(&vec![0u8; len])?;
        file.sync_all()?;
    }
    fs::remove_file(path)?;
    Ok(())
}
