//! Ordered key/value persistence used by the id allocator and the KV registry backend.

use crate::error::Result;
use parking_lot::RwLock;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::{Path, PathBuf};

pub type KeyValue = (Vec<u8>, Vec<u8>);

pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Returns whether the key was present.
    fn delete(&self, key: &[u8]) -> Result<bool>;

    /// All entries whose key starts with `prefix`, in ascending key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<KeyValue>>;

    /// Remove all entries under `prefix`, returning how many were removed.
    fn delete_prefix(&self, prefix: &[u8]) -> Result<u64>;
}

/// Smallest key strictly greater than every key starting with `prefix`.
///
/// `None` when no such bound exists (empty or all-0xFF prefix).
pub fn prefix_end_key(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.last_mut() {
        if *last < 0xFF {
            *last += 1;
            return Some(end);
        }
        end.pop();
    }
    None
}

/// In-memory store over a `BTreeMap`.
#[derive(Debug, Default)]
pub struct MemKvStore {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    fn prefix_keys(map: &BTreeMap<Vec<u8>, Vec<u8>>, prefix: &[u8]) -> Vec<Vec<u8>> {
        Self::prefix_range(map, prefix).map(|(k, _)| k.clone()).collect()
    }

    fn prefix_range<'a>(
        map: &'a BTreeMap<Vec<u8>, Vec<u8>>,
        prefix: &[u8],
    ) -> std::collections::btree_map::Range<'a, Vec<u8>, Vec<u8>> {
        let start = Bound::Included(prefix.to_vec());
        let end = match prefix_end_key(prefix) {
            Some(end) => Bound::Excluded(end),
            None => Bound::Unbounded,
        };
        map.range((start, end))
    }
}

impl KvStore for MemKvStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.data.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<bool> {
        Ok(self.data.write().remove(key).is_some())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<KeyValue>> {
        let data = self.data.read();
        Ok(Self::prefix_range(&data, prefix)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn delete_prefix(&self, prefix: &[u8]) -> Result<u64> {
        let mut data = self.data.write();
        let keys = Self::prefix_keys(&data, prefix);
        for key in &keys {
            data.remove(key);
        }
        Ok(keys.len() as u64)
    }
}

/// Durable store backed by a single ordered SQLite table.
pub struct SqliteKvStore {
    db_path: PathBuf,
}

impl SqliteKvStore {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let store = Self {
            db_path: db_path.as_ref().to_path_buf(),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn get_conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        Ok(conn)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key BLOB PRIMARY KEY,
                value BLOB NOT NULL
            ) WITHOUT ROWID",
            [],
        )?;
        Ok(())
    }
}

impl KvStore for SqliteKvStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let conn = self.get_conn()?;
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<bool> {
        let conn = self.get_conn()?;
        let affected = conn.execute("DELETE FROM kv WHERE key = ?1", [key])?;
        Ok(affected > 0)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<KeyValue>> {
        let conn = self.get_conn()?;
        let mut rows_out = Vec::new();

        match prefix_end_key(prefix) {
            Some(end) => {
                let mut stmt = conn.prepare(
                    "SELECT key, value FROM kv WHERE key >= ?1 AND key < ?2 ORDER BY key",
                )?;
                let rows = stmt.query_map(params![prefix, end], |row| Ok((row.get(0)?, row.get(1)?)))?;
                for row in rows {
                    rows_out.push(row?);
                }
            }
            None => {
                let mut stmt =
                    conn.prepare("SELECT key, value FROM kv WHERE key >= ?1 ORDER BY key")?;
                let rows = stmt.query_map([prefix], |row| Ok((row.get(0)?, row.get(1)?)))?;
                for row in rows {
                    rows_out.push(row?);
                }
            }
        }

        Ok(rows_out)
    }

    fn delete_prefix(&self, prefix: &[u8]) -> Result<u64> {
        let conn = self.get_conn()?;
        let affected = match prefix_end_key(prefix) {
            Some(end) => conn.execute(
                "DELETE FROM kv WHERE key >= ?1 AND key < ?2",
                params![prefix, end],
            )?,
            None => conn.execute("DELETE FROM kv WHERE key >= ?1", [prefix])?,
        };
        Ok(affected as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise_store(store: &dyn KvStore) {
        store.put(b"a/1", b"one").unwrap();
        store.put(b"a/2", b"two").unwrap();
        store.put(b"b/1", b"other").unwrap();

        assert_eq!(store.get(b"a/1").unwrap(), Some(b"one".to_vec()));
        assert_eq!(store.get(b"missing").unwrap(), None);

        let scanned = store.scan_prefix(b"a/").unwrap();
        let keys: Vec<&[u8]> = scanned.iter().map(|(k, _)| k.as_slice()).collect();
        assert_eq!(keys, vec![&b"a/1"[..], &b"a/2"[..]]);

        store.put(b"a/1", b"uno").unwrap();
        assert_eq!(store.get(b"a/1").unwrap(), Some(b"uno".to_vec()));

        assert!(store.delete(b"a/2").unwrap());
        assert!(!store.delete(b"a/2").unwrap());

        assert_eq!(store.delete_prefix(b"a/").unwrap(), 1);
        assert!(store.scan_prefix(b"a/").unwrap().is_empty());
        assert_eq!(store.scan_prefix(b"").unwrap().len(), 1);
    }

    #[test]
    fn test_prefix_end_key() {
        assert_eq!(prefix_end_key(b"abc"), Some(b"abd".to_vec()));
        assert_eq!(prefix_end_key(b"a\xff"), Some(b"b".to_vec()));
        assert_eq!(prefix_end_key(b"\xff\xff"), None);
        assert_eq!(prefix_end_key(b""), None);
    }

    #[test]
    fn test_mem_store() {
        let store = MemKvStore::new();
        exercise_store(&store);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_sqlite_store() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = SqliteKvStore::new(temp_dir.path().join("kv.db")).unwrap();
        exercise_store(&store);
    }

    #[test]
    fn test_sqlite_store_binary_keys_are_ordered() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = SqliteKvStore::new(temp_dir.path().join("kv.db")).unwrap();

        store.put(&[1, 0, 0xFF], b"c").unwrap();
        store.put(&[1, 0, 0x01], b"a").unwrap();
        store.put(&[1, 0, 0x80], b"b").unwrap();
        store.put(&[2], b"outside").unwrap();

        let values: Vec<Vec<u8>> = store
            .scan_prefix(&[1, 0])
            .unwrap()
            .into_iter()
            .map(|(_, v)| v)
            .collect();
        assert_eq!(values, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }
}
