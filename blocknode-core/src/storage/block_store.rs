use crate::alloc::IdAllocator;
use crate::error::{BlockError, Result};
use crate::protocol::stream::{COPY_BUFFER_SIZE, HashingReader};
use crate::registry::{BlockDescriptor, BlockKey, KeyPrefix, MetadataRegistry};
use crate::storage::chunked_file::{ChunkedFile, file_dir};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

pub const HASH_ALG_SHA256: &str = "sha256";

#[derive(Debug, Clone)]
pub struct BlockStoreConfig {
    pub data_dir: PathBuf,
    /// Segments per batch.
    pub batch_size: usize,
    /// Bytes per segment.
    pub block_size: u64,
    pub node_id: Option<String>,
}

/// Node-level storage controller.
///
/// Each saved block is written into its own chunked file, named by an id from the
/// allocator, and recorded in the registry once the data is on disk.
pub struct BlockStore {
    config: BlockStoreConfig,
    registry: Arc<dyn MetadataRegistry>,
    allocator: Arc<IdAllocator>,
}

impl BlockStore {
    pub fn new(
        config: BlockStoreConfig,
        registry: Arc<dyn MetadataRegistry>,
        allocator: Arc<IdAllocator>,
    ) -> Result<Self> {
        if config.batch_size == 0 || config.block_size == 0 {
            return Err(BlockError::Config(
                "batch_size and block_size must be positive".to_string(),
            ));
        }
        std::fs::create_dir_all(&config.data_dir)?;
        Ok(Self {
            config,
            registry,
            allocator,
        })
    }

    /// Persist exactly `size` bytes from `source` under `key`.
    pub async fn save_block<R>(&self, key: &BlockKey, source: &mut R, size: u64) -> Result<BlockDescriptor>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        if self.registry.exists(key)? {
            return Err(BlockError::AlreadyExists(key.to_string()));
        }

        let store_id = self.allocator.new_id()?;
        let mut file = match ChunkedFile::create(
            &self.config.data_dir,
            store_id,
            self.config.batch_size,
            self.config.block_size,
        )
        .await
        {
            Ok(file) => file,
            Err(e) => {
                self.release_store_id(store_id);
                return Err(e);
            }
        };

        match self.write_and_record(key, &mut file, source, size).await {
            Ok(descriptor) => {
                tracing::info!(
                    "Saved block {} ({} bytes, {} batches, store id {})",
                    key,
                    descriptor.data_size,
                    descriptor.batch_count,
                    store_id
                );
                Ok(descriptor)
            }
            Err(e) => {
                tracing::warn!("Save of block {} failed: {}", key, e);
                if let Err(purge_err) = file.purge().await {
                    tracing::warn!("Failed to purge partial file {}: {}", store_id, purge_err);
                }
                self.release_store_id(store_id);
                Err(e)
            }
        }
    }

    async fn write_and_record<R>(
        &self,
        key: &BlockKey,
        file: &mut ChunkedFile,
        source: &mut R,
        size: u64,
    ) -> Result<BlockDescriptor>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let limited = source.take(size);
        let mut reader = BufReader::with_capacity(COPY_BUFFER_SIZE, HashingReader::new(limited));

        let written = file.write(&mut reader).await?;
        if written != size {
            return Err(BlockError::ShortStream {
                expected: size,
                actual: written,
            });
        }
        file.close().await?;

        let layout = file.layout();
        let descriptor = BlockDescriptor {
            key: *key,
            block_size: layout.block_size,
            batch_size: layout.batch_size,
            batch_count: layout.batch_count,
            data_size: written,
            path: file.dir().to_string_lossy().to_string(),
            hash_alg: Some(HASH_ALG_SHA256.to_string()),
            hash_value: Some(reader.get_ref().hex_digest()),
            store_id: Some(layout.file_id),
            node_id: self.config.node_id.clone(),
            created_at: chrono::Utc::now(),
        };

        self.registry.insert(&descriptor)?;
        Ok(descriptor)
    }

    /// Descriptor for `key`, or `NotFound`.
    pub fn lookup(&self, key: &BlockKey) -> Result<BlockDescriptor> {
        self.registry
            .get(key)?
            .ok_or_else(|| BlockError::NotFound(key.to_string()))
    }

    /// Stream the data behind `descriptor` into `sink`.
    pub async fn stream_block<W>(&self, descriptor: &BlockDescriptor, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let layout = descriptor.layout().ok_or_else(|| {
            BlockError::Internal(format!("block {} has no storage id", descriptor.key))
        })?;

        let mut file = ChunkedFile::open_existing(&self.config.data_dir, &layout).await?;
        let read = file.read(sink).await?;
        file.close().await?;
        sink.flush().await?;

        if read != descriptor.data_size {
            return Err(BlockError::ShortStream {
                expected: descriptor.data_size,
                actual: read,
            });
        }
        Ok(read)
    }

    pub async fn load_block<W>(&self, key: &BlockKey, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let descriptor = self.lookup(key)?;
        self.stream_block(&descriptor, sink).await
    }

    pub async fn delete_block(&self, key: &BlockKey) -> Result<()> {
        let descriptor = self.lookup(key)?;
        self.release(&descriptor).await?;
        tracing::info!("Deleted block {}", key);
        Ok(())
    }

    pub fn block_exists(&self, key: &BlockKey) -> Result<bool> {
        self.registry.exists(key)
    }

    pub fn list_blocks(&self, prefix: &KeyPrefix) -> Result<Vec<BlockDescriptor>> {
        self.registry.list(prefix)
    }

    /// Remove every block of one file. Returns how many were removed.
    pub async fn purge_file(&self, cluster_id: u64, file_id: u64) -> Result<u64> {
        let descriptors = self.registry.list(&KeyPrefix::file(cluster_id, file_id))?;
        self.release_all(&descriptors).await
    }

    /// Remove every block of one cluster. Returns how many were removed.
    pub async fn purge_cluster(&self, cluster_id: u64) -> Result<u64> {
        let descriptors = self.registry.list(&KeyPrefix::cluster(cluster_id))?;
        self.release_all(&descriptors).await
    }

    async fn release_all(&self, descriptors: &[BlockDescriptor]) -> Result<u64> {
        let mut released = 0;
        for descriptor in descriptors {
            self.release(descriptor).await?;
            released += 1;
        }
        Ok(released)
    }

    /// Unregister a block, then drop its data, then hand its storage id back.
    ///
    /// A failure part way leaves orphaned data or a leaked id, never a descriptor that
    /// points at a reusable id.
    async fn release(&self, descriptor: &BlockDescriptor) -> Result<()> {
        self.registry.delete(&descriptor.key)?;

        if let Some(layout) = descriptor.layout() {
            ChunkedFile::from_layout(&self.config.data_dir, &layout)?
                .purge()
                .await?;
        }
        if let Some(store_id) = descriptor.store_id {
            self.allocator.free_id(store_id)?;
        }
        Ok(())
    }

    fn release_store_id(&self, store_id: u64) {
        if let Err(e) = self.allocator.free_id(store_id) {
            tracing::warn!("Failed to release store id {}: {}", store_id, e);
        }
    }

    /// Directory a storage id's segments live in.
    pub fn store_dir(&self, store_id: u64) -> PathBuf {
        file_dir(&self.config.data_dir, store_id)
    }
}
