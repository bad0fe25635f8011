use super::{BlockDescriptor, BlockKey, KeyPrefix, MetadataRegistry};
use crate::error::{BlockError, Result};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::{Path, PathBuf};

const SELECT_COLUMNS: &str = "cluster_id, file_id, batch_id, block_id, block_size, batch_size,
     batch_count, data_size, path, hash_alg, hash_value, store_id, node_id, created_at";

/// Key columns are stored with the sign bit flipped so SQLite's signed integer order
/// matches unsigned key order.
fn key_column(value: u64) -> i64 {
    (value ^ (1 << 63)) as i64
}

fn from_key_column(value: i64) -> u64 {
    (value as u64) ^ (1 << 63)
}

/// Registry backend over a SQLite database.
///
/// Uniqueness of the composite key is enforced by a unique index; updates run as
/// delete + insert inside one transaction.
pub struct SqlRegistry {
    db_path: PathBuf,
}

impl SqlRegistry {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let registry = Self {
            db_path: db_path.as_ref().to_path_buf(),
        };
        registry.init_schema()?;
        Ok(registry)
    }

    fn get_conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        Ok(conn)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS blocks (
                pk INTEGER PRIMARY KEY AUTOINCREMENT,
                cluster_id INTEGER NOT NULL,
                file_id INTEGER NOT NULL,
                batch_id INTEGER NOT NULL,
                block_id INTEGER NOT NULL,
                block_size INTEGER NOT NULL,
                batch_size INTEGER NOT NULL,
                batch_count INTEGER NOT NULL,
                data_size INTEGER NOT NULL,
                path TEXT NOT NULL,
                hash_alg TEXT,
                hash_value TEXT,
                store_id INTEGER,
                node_id TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_blocks_key
             ON blocks(cluster_id, file_id, batch_id, block_id)",
            [],
        )?;

        Ok(())
    }

    fn insert_with(conn: &Connection, descriptor: &BlockDescriptor) -> Result<()> {
        let key = &descriptor.key;
        let result = conn.execute(
            "INSERT INTO blocks (
                cluster_id, file_id, batch_id, block_id, block_size, batch_size,
                batch_count, data_size, path, hash_alg, hash_value, store_id, node_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                key_column(key.cluster_id),
                key_column(key.file_id),
                key_column(key.batch_id),
                key_column(key.block_id),
                descriptor.block_size as i64,
                descriptor.batch_size as i64,
                descriptor.batch_count as i64,
                descriptor.data_size as i64,
                descriptor.path,
                descriptor.hash_alg,
                descriptor.hash_value,
                descriptor.store_id.map(|id| id as i64),
                descriptor.node_id,
                descriptor.created_at.to_rfc3339(),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(BlockError::AlreadyExists(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn delete_with(conn: &Connection, key: &BlockKey) -> Result<bool> {
        let affected = conn.execute(
            "DELETE FROM blocks
             WHERE cluster_id = ?1 AND file_id = ?2 AND batch_id = ?3 AND block_id = ?4",
            params![
                key_column(key.cluster_id),
                key_column(key.file_id),
                key_column(key.batch_id),
                key_column(key.block_id),
            ],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_descriptor(row: &Row<'_>) -> rusqlite::Result<BlockDescriptor> {
    let created_at: String = row.get(13)?;
    let store_id: Option<i64> = row.get(11)?;

    Ok(BlockDescriptor {
        key: BlockKey {
            cluster_id: from_key_column(row.get(0)?),
            file_id: from_key_column(row.get(1)?),
            batch_id: from_key_column(row.get(2)?),
            block_id: from_key_column(row.get(3)?),
        },
        block_size: row.get::<_, i64>(4)? as u64,
        batch_size: row.get::<_, i64>(5)? as usize,
        batch_count: row.get::<_, i64>(6)? as u64,
        data_size: row.get::<_, i64>(7)? as u64,
        path: row.get(8)?,
        hash_alg: row.get(9)?,
        hash_value: row.get(10)?,
        store_id: store_id.map(|id| id as u64),
        node_id: row.get(12)?,
        created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(13, Type::Text, Box::new(e)))?
            .with_timezone(&chrono::Utc),
    })
}

impl MetadataRegistry for SqlRegistry {
    fn insert(&self, descriptor: &BlockDescriptor) -> Result<()> {
        let conn = self.get_conn()?;
        Self::insert_with(&conn, descriptor)
    }

    fn get(&self, key: &BlockKey) -> Result<Option<BlockDescriptor>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM blocks
             WHERE cluster_id = ?1 AND file_id = ?2 AND batch_id = ?3 AND block_id = ?4",
            SELECT_COLUMNS
        );

        let descriptor = conn
            .query_row(
                &sql,
                params![
                    key_column(key.cluster_id),
                    key_column(key.file_id),
                    key_column(key.batch_id),
                    key_column(key.block_id),
                ],
                row_to_descriptor,
            )
            .optional()?;

        Ok(descriptor)
    }

    fn update(&self, descriptor: &BlockDescriptor) -> Result<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        if !Self::delete_with(&tx, &descriptor.key)? {
            return Err(BlockError::NotFound(descriptor.key.to_string()));
        }
        Self::insert_with(&tx, descriptor)?;

        tx.commit()?;
        Ok(())
    }

    fn delete(&self, key: &BlockKey) -> Result<bool> {
        let conn = self.get_conn()?;
        Self::delete_with(&conn, key)
    }

    fn list(&self, prefix: &KeyPrefix) -> Result<Vec<BlockDescriptor>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM blocks
             WHERE cluster_id = ?1
               AND (?2 IS NULL OR file_id = ?2)
               AND (?2 IS NULL OR ?3 IS NULL OR batch_id = ?3)
             ORDER BY cluster_id, file_id, batch_id, block_id",
            SELECT_COLUMNS
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                key_column(prefix.cluster_id),
                prefix.file_id.map(key_column),
                prefix.batch_id.map(key_column),
            ],
            row_to_descriptor,
        )?;

        let mut descriptors = Vec::new();
        for row in rows {
            descriptors.push(row?);
        }

        Ok(descriptors)
    }

    fn purge_by_file(&self, cluster_id: u64, file_id: u64) -> Result<u64> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "DELETE FROM blocks WHERE cluster_id = ?1 AND file_id = ?2",
            params![key_column(cluster_id), key_column(file_id)],
        )?;
        Ok(affected as u64)
    }

    fn purge_by_cluster(&self, cluster_id: u64) -> Result<u64> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "DELETE FROM blocks WHERE cluster_id = ?1",
            params![key_column(cluster_id)],
        )?;
        Ok(affected as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::contract;

    fn temp_registry() -> (tempfile::TempDir, SqlRegistry) {
        let temp_dir = tempfile::tempdir().unwrap();
        let registry = SqlRegistry::new(temp_dir.path().join("meta.db")).unwrap();
        (temp_dir, registry)
    }

    #[test]
    fn test_insert_get_exists() {
        let (_dir, registry) = temp_registry();
        contract::check_insert_get_exists(&registry);
    }

    #[test]
    fn test_update() {
        let (_dir, registry) = temp_registry();
        contract::check_update(&registry);
    }

    #[test]
    fn test_list_and_purge() {
        let (_dir, registry) = temp_registry();
        contract::check_list_and_purge(&registry);
    }

    #[test]
    fn test_rows_survive_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db = temp_dir.path().join("meta.db");
        let key = BlockKey::new(3, 3, 3, 3);

        {
            let registry = SqlRegistry::new(&db).unwrap();
            let mut descriptor = crate::registry::sample_descriptor(key);
            registry.insert(&descriptor).unwrap();
            descriptor.data_size = 1;
            registry.update(&descriptor).unwrap();
        }

        let registry = SqlRegistry::new(&db).unwrap();
        let stored = registry.get(&key).unwrap().unwrap();
        assert_eq!(stored.data_size, 1);
        assert_eq!(stored.store_id, Some(103));
    }

    #[test]
    fn test_key_columns_keep_unsigned_order() {
        for value in [0, 1, i64::MAX as u64, 1 << 63, u64::MAX] {
            assert_eq!(from_key_column(key_column(value)), value);
        }
        assert!(key_column(i64::MAX as u64) < key_column(1 << 63));
        assert!(key_column(0) < key_column(u64::MAX));
    }

    #[test]
    fn test_bad_timestamp_is_conversion_error() {
        let (_dir, registry) = temp_registry();
        let key = BlockKey::new(1, 1, 1, 1);
        registry
            .insert(&crate::registry::sample_descriptor(key))
            .unwrap();
        registry
            .get_conn()
            .unwrap()
            .execute("UPDATE blocks SET created_at = 'yesterday'", [])
            .unwrap();

        let err = registry.get(&key).unwrap_err();
        assert!(matches!(
            err,
            BlockError::Database(rusqlite::Error::FromSqlConversionFailure(13, Type::Text, _))
        ));
    }
}
