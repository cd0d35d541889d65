//! Persisted metadata cache (encrypted SQLite)
//!
//! One row per item, sealed with XChaCha20-Poly1305 under a cache key held
//! in the KeyStore. `owner|item` is bound as associated data so rows cannot
//! be moved between owners. A row in `owners` marks a complete snapshot.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use strongbox_keystore::{KeyBytes, KeyStore, KeyStoreError, MemoryKeyStore};
use tracing::{debug, warn};

use crate::crypto::{generate_key, open_xchacha, seal_xchacha};
use crate::error::{VaultError, VaultResult};
use crate::model::VaultItem;

/// KeyStore id of the cache key
pub const CACHE_KEY_ID: &str = "strongbox-metadata-cache";

/// Owner recorded for device-level keys
pub const DEVICE_OWNER: &str = "strongbox:device";

fn row_aad(owner_id: &str, item_id: &str) -> Vec<u8> {
    format!("{owner_id}|{item_id}").into_bytes()
}

/// Encrypted on-disk snapshot of remote metadata.
///
/// The cache key is read from the KeyStore for each operation and dropped
/// when it returns.
pub struct CacheDb {
    conn: Mutex<Connection>,
    keystore: Arc<dyn KeyStore>,
}

impl CacheDb {
    /// Open or create the cache at `path`, creating the cache key on first use
    pub fn open<P: AsRef<Path>>(path: P, keystore: Arc<dyn KeyStore>) -> VaultResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        Self::init(conn, keystore)
    }

    /// Cache that lives only as long as the process, keyed from its own
    /// in-memory KeyStore
    pub fn in_memory() -> VaultResult<Self> {
        Self::init(Connection::open_in_memory()?, Arc::new(MemoryKeyStore::new()))
    }

    fn init(conn: Connection, keystore: Arc<dyn KeyStore>) -> VaultResult<Self> {
        match keystore.load(CACHE_KEY_ID) {
            Ok(_) => {}
            Err(KeyStoreError::NotFound(_)) => {
                keystore.store(CACHE_KEY_ID, &generate_key(), DEVICE_OWNER)?;
                debug!("metadata cache key created");
            }
            Err(e) => return Err(e.into()),
        }

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                owner_id TEXT NOT NULL,
                item_id TEXT NOT NULL,
                data BLOB NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (owner_id, item_id)
            );

            CREATE TABLE IF NOT EXISTS owners (
                owner_id TEXT PRIMARY KEY,
                loaded_at TEXT NOT NULL
            );
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            keystore,
        })
    }

    fn cache_key(&self) -> VaultResult<KeyBytes> {
        Ok(self.keystore.load(CACHE_KEY_ID)?)
    }

    fn seal_item(key: &KeyBytes, item: &VaultItem) -> VaultResult<Vec<u8>> {
        let json = zeroize::Zeroizing::new(serde_json::to_vec(item)?);
        Ok(seal_xchacha(key, &json, &row_aad(&item.owner_id, &item.id))?)
    }

    /// Replace the owner's snapshot wholesale
    pub fn replace_owner(&self, owner_id: &str, items: &[VaultItem]) -> VaultResult<()> {
        let key = self.cache_key()?;
        let sealed = items
            .iter()
            .map(|item| -> VaultResult<_> { Ok((item, Self::seal_item(&key, item)?)) })
            .collect::<VaultResult<Vec<_>>>()?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM items WHERE owner_id = ?1", params![owner_id])?;
        for (item, data) in &sealed {
            tx.execute(
                "INSERT INTO items (owner_id, item_id, data, updated_at) VALUES (?1, ?2, ?3, ?4)",
                params![owner_id, item.id, data, item.updated_at.to_rfc3339()],
            )?;
        }
        tx.execute(
            "INSERT OR REPLACE INTO owners (owner_id, loaded_at) VALUES (?1, ?2)",
            params![owner_id, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;

        debug!(owner_id, items = items.len(), "metadata cache snapshot stored");
        Ok(())
    }

    /// Write one row; ignored unless the owner has a complete snapshot
    pub fn put_item(&self, item: &VaultItem) -> VaultResult<()> {
        let data = Self::seal_item(&self.cache_key()?, item)?;
        let conn = self.conn.lock();
        if !Self::has_snapshot(&conn, &item.owner_id)? {
            return Ok(());
        }
        conn.execute(
            "INSERT OR REPLACE INTO items (owner_id, item_id, data, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![item.owner_id, item.id, data, item.updated_at.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn remove_item(&self, owner_id: &str, item_id: &str) -> VaultResult<()> {
        self.conn.lock().execute(
            "DELETE FROM items WHERE owner_id = ?1 AND item_id = ?2",
            params![owner_id, item_id],
        )?;
        Ok(())
    }

    /// The owner's snapshot, or `None` if there is none.
    ///
    /// A row that fails to open invalidates the whole snapshot.
    pub fn load_owner(&self, owner_id: &str) -> VaultResult<Option<Vec<VaultItem>>> {
        let rows = {
            let conn = self.conn.lock();
            if !Self::has_snapshot(&conn, owner_id)? {
                return Ok(None);
            }
            let mut stmt = conn.prepare("SELECT item_id, data FROM items WHERE owner_id = ?1")?;
            let rows = stmt
                .query_map(params![owner_id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let key = self.cache_key()?;
        let mut items = Vec::with_capacity(rows.len());
        for (item_id, data) in rows {
            let opened = open_xchacha(&key, &data, &row_aad(owner_id, &item_id))
                .map_err(VaultError::from)
                .and_then(|json| {
                    let json = zeroize::Zeroizing::new(json);
                    Ok(serde_json::from_slice::<VaultItem>(&json)?)
                });
            match opened {
                Ok(item) => items.push(item),
                Err(e) => {
                    warn!(owner_id, item_id = %item_id, error = %e, "unreadable cache row, dropping snapshot");
                    self.invalidate_owner(owner_id)?;
                    return Ok(None);
                }
            }
        }
        Ok(Some(items))
    }

    pub fn invalidate_owner(&self, owner_id: &str) -> VaultResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM items WHERE owner_id = ?1", params![owner_id])?;
        tx.execute("DELETE FROM owners WHERE owner_id = ?1", params![owner_id])?;
        tx.commit()?;
        Ok(())
    }

    fn has_snapshot(conn: &Connection, owner_id: &str) -> VaultResult<bool> {
        Ok(conn
            .query_row(
                "SELECT 1 FROM owners WHERE owner_id = ?1",
                params![owner_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn folder(id: &str, owner: &str) -> VaultItem {
        VaultItem::new_folder(id.into(), owner, format!("folder {id}"), None)
    }

    #[test]
    fn test_snapshot_roundtrip_across_reopen() {
        let dir = tempdir().unwrap();
        let keystore = Arc::new(MemoryKeyStore::new());
        let path = dir.path().join("cache.db");

        let cache = CacheDb::open(&path, keystore.clone()).unwrap();
        assert!(cache.load_owner("u1").unwrap().is_none());
        cache.replace_owner("u1", &[folder("a", "u1"), folder("b", "u1")]).unwrap();
        drop(cache);

        let cache = CacheDb::open(&path, keystore.clone()).unwrap();
        let mut items = cache.load_owner("u1").unwrap().unwrap();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(items, vec![folder("a", "u1"), folder("b", "u1")]);
        assert!(keystore.contains(CACHE_KEY_ID).unwrap());
    }

    #[test]
    fn test_invalidate_and_put_without_snapshot() {
        let cache = CacheDb::in_memory().unwrap();
        cache.put_item(&folder("a", "u1")).unwrap();
        assert!(cache.load_owner("u1").unwrap().is_none());

        cache.replace_owner("u1", &[]).unwrap();
        cache.put_item(&folder("a", "u1")).unwrap();
        assert_eq!(cache.load_owner("u1").unwrap().unwrap().len(), 1);

        cache.invalidate_owner("u1").unwrap();
        assert!(cache.load_owner("u1").unwrap().is_none());
    }

    #[test]
    fn test_wrong_key_drops_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.db");

        let cache = CacheDb::open(&path, Arc::new(MemoryKeyStore::new())).unwrap();
        cache.replace_owner("u1", &[folder("a", "u1")]).unwrap();
        drop(cache);

        // Fresh keystore means a fresh cache key
        let cache = CacheDb::open(&path, Arc::new(MemoryKeyStore::new())).unwrap();
        assert!(cache.load_owner("u1").unwrap().is_none());
    }

    #[test]
    fn test_cache_key_read_from_keystore_each_time() {
        let keystore = Arc::new(MemoryKeyStore::new());
        let dir = tempdir().unwrap();
        let cache = CacheDb::open(dir.path().join("cache.db"), keystore.clone()).unwrap();
        cache.replace_owner("u1", &[folder("a", "u1")]).unwrap();

        keystore.delete(CACHE_KEY_ID).unwrap();

        assert!(cache.load_owner("u1").is_err());
        assert!(cache.put_item(&folder("b", "u1")).is_err());
    }
}
