//! Metadata registry: maps composite block keys to stored-block descriptors.

mod descriptor;
mod kv;
mod sql;

pub use descriptor::{BlockDescriptor, BlockKey, KeyPrefix};
pub use kv::KvRegistry;
pub use sql::SqlRegistry;

#[cfg(test)]
pub(crate) use descriptor::sample_descriptor;

use crate::error::Result;

/// Contract shared by every registry backend.
///
/// `insert` fails with `AlreadyExists` on a duplicate key; `update` fails with `NotFound`
/// when the key is absent.
pub trait MetadataRegistry: Send + Sync {
    fn insert(&self, descriptor: &BlockDescriptor) -> Result<()>;

    fn get(&self, key: &BlockKey) -> Result<Option<BlockDescriptor>>;

    fn exists(&self, key: &BlockKey) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    fn update(&self, descriptor: &BlockDescriptor) -> Result<()>;

    /// Returns whether a descriptor was removed.
    fn delete(&self, key: &BlockKey) -> Result<bool>;

    /// Descriptors under `prefix`, in ascending key order.
    fn list(&self, prefix: &KeyPrefix) -> Result<Vec<BlockDescriptor>>;

    fn purge_by_file(&self, cluster_id: u64, file_id: u64) -> Result<u64>;

    fn purge_by_cluster(&self, cluster_id: u64) -> Result<u64>;
}
