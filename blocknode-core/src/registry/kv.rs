use super::{BlockDescriptor, BlockKey, KeyPrefix, MetadataRegistry};
use crate::error::{BlockError, Result};
use crate::kv::KvStore;
use std::sync::Arc;

/// Registry backend over an ordered key/value store.
///
/// There are no multi-key transactions here: `insert` checks for an existing key before
/// writing, and `update` is a single-key overwrite.
pub struct KvRegistry {
    store: Arc<dyn KvStore>,
}

impl KvRegistry {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    fn delete_under(&self, prefix: &KeyPrefix) -> Result<u64> {
        let removed = self.store.delete_prefix(&prefix.encode())?;
        tracing::debug!(
            "Purged {} descriptors under cluster {} file {:?}",
            removed,
            prefix.cluster_id,
            prefix.file_id
        );
        Ok(removed)
    }
}

impl MetadataRegistry for KvRegistry {
    fn insert(&self, descriptor: &BlockDescriptor) -> Result<()> {
        let key = descriptor.key.encode();
        if self.store.get(&key)?.is_some() {
            return Err(BlockError::AlreadyExists(descriptor.key.to_string()));
        }
        self.store.put(&key, &descriptor.pack()?)
    }

    fn get(&self, key: &BlockKey) -> Result<Option<BlockDescriptor>> {
        self.store
            .get(&key.encode())?
            .map(|bytes| BlockDescriptor::unpack(&bytes))
            .transpose()
    }

    fn update(&self, descriptor: &BlockDescriptor) -> Result<()> {
        let key = descriptor.key.encode();
        if self.store.get(&key)?.is_none() {
            return Err(BlockError::NotFound(descriptor.key.to_string()));
        }
        self.store.put(&key, &descriptor.pack()?)
    }

    fn delete(&self, key: &BlockKey) -> Result<bool> {
        self.store.delete(&key.encode())
    }

    fn list(&self, prefix: &KeyPrefix) -> Result<Vec<BlockDescriptor>> {
        self.store
            .scan_prefix(&prefix.encode())?
            .into_iter()
            .map(|(_, value)| BlockDescriptor::unpack(&value))
            .collect()
    }

    fn purge_by_file(&self, cluster_id: u64, file_id: u64) -> Result<u64> {
        self.delete_under(&KeyPrefix::file(cluster_id, file_id))
    }

    fn purge_by_cluster(&self, cluster_id: u64) -> Result<u64> {
        self.delete_under(&KeyPrefix::cluster(cluster_id))
    }
}
