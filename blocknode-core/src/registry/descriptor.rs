use crate::error::Result;
use crate::storage::FileLayout;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

const BLOCK_KEY_PREFIX: &[u8] = b"blk/";

/// Composite key identifying one stored block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockKey {
    pub cluster_id: u64,
    pub file_id: u64,
    pub batch_id: u64,
    pub block_id: u64,
}

impl BlockKey {
    pub fn new(cluster_id: u64, file_id: u64, batch_id: u64, block_id: u64) -> Self {
        Self {
            cluster_id,
            file_id,
            batch_id,
            block_id,
        }
    }

    /// Big-endian encoding so byte order equals key order.
    pub fn encode(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(BLOCK_KEY_PREFIX.len() + 32);
        key.extend_from_slice(BLOCK_KEY_PREFIX);
        for part in [self.cluster_id, self.file_id, self.batch_id, self.block_id] {
            key.extend_from_slice(&part.to_be_bytes());
        }
        key
    }
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.cluster_id, self.file_id, self.batch_id, self.block_id
        )
    }
}

/// Leading components of a [`BlockKey`], used for listing and purging.
///
/// `batch_id` is only honored when `file_id` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyPrefix {
    pub cluster_id: u64,
    pub file_id: Option<u64>,
    pub batch_id: Option<u64>,
}

impl KeyPrefix {
    pub fn cluster(cluster_id: u64) -> Self {
        Self {
            cluster_id,
            file_id: None,
            batch_id: None,
        }
    }

    pub fn file(cluster_id: u64, file_id: u64) -> Self {
        Self {
            cluster_id,
            file_id: Some(file_id),
            batch_id: None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut key = BLOCK_KEY_PREFIX.to_vec();
        key.extend_from_slice(&self.cluster_id.to_be_bytes());
        if let Some(file_id) = self.file_id {
            key.extend_from_slice(&file_id.to_be_bytes());
            if let Some(batch_id) = self.batch_id {
                key.extend_from_slice(&batch_id.to_be_bytes());
            }
        }
        key
    }
}

/// Registry record describing where and how a block is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDescriptor {
    #[serde(flatten)]
    pub key: BlockKey,
    /// Capacity of one on-disk segment.
    pub block_size: u64,
    /// Segments per batch.
    pub batch_size: usize,
    pub batch_count: u64,
    pub data_size: u64,
    pub path: String,
    #[serde(default)]
    pub hash_alg: Option<String>,
    #[serde(default)]
    pub hash_value: Option<String>,
    /// Local storage id the data lives under.
    #[serde(default)]
    pub store_id: Option<u64>,
    #[serde(default)]
    pub node_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl BlockDescriptor {
    pub fn pack(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn unpack(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Layout of the chunked file holding this block, if it has a storage id.
    pub fn layout(&self) -> Option<FileLayout> {
        self.store_id.map(|file_id| FileLayout {
            file_id,
            batch_size: self.batch_size,
            block_size: self.block_size,
            batch_count: self.batch_count,
        })
    }
}

#[cfg(test)]
pub(crate) fn sample_descriptor(key: BlockKey) -> BlockDescriptor {
    BlockDescriptor {
        key,
        block_size: 1024,
        batch_size: 4,
        batch_count: 2,
        data_size: 5000,
        path: format!("/data/{}", key.block_id),
        hash_alg: Some("sha256".to_string()),
        hash_value: Some("ab".repeat(32)),
        store_id: Some(key.block_id + 100),
        node_id: Some("node-1".to_string()),
        created_at: DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack_lossless() {
        let full = sample_descriptor(BlockKey::new(1, 2, 3, 4));
        assert_eq!(BlockDescriptor::unpack(&full.pack().unwrap()).unwrap(), full);

        let sparse = BlockDescriptor {
            hash_alg: None,
            hash_value: None,
            store_id: None,
            node_id: None,
            ..full
        };
        assert_eq!(
            BlockDescriptor::unpack(&sparse.pack().unwrap()).unwrap(),
            sparse
        );
    }

    #[test]
    fn test_wire_field_names() {
        let descriptor = sample_descriptor(BlockKey::new(1, 2, 3, 4));
        let value = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(value["clusterId"], 1);
        assert_eq!(value["blockId"], 4);
        assert_eq!(value["dataSize"], 5000);
    }

    #[test]
    fn test_key_encoding_preserves_order() {
        let a = BlockKey::new(1, 2, 3, 255);
        let b = BlockKey::new(1, 2, 4, 0);
        let c = BlockKey::new(1, 256, 0, 0);
        assert!(a.encode() < b.encode());
        assert!(b.encode() < c.encode());
    }

    #[test]
    fn test_prefix_encoding_covers_key() {
        let key = BlockKey::new(7, 8, 9, 10);
        for prefix in [
            KeyPrefix::cluster(7),
            KeyPrefix::file(7, 8),
            KeyPrefix {
                cluster_id: 7,
                file_id: Some(8),
                batch_id: Some(9),
            },
        ] {
            assert!(key.encode().starts_with(&prefix.encode()));
        }

        assert!(!key.encode().starts_with(&KeyPrefix::cluster(6).encode()));
        assert!(!key.encode().starts_with(&KeyPrefix::file(7, 9).encode()));
    }
}
