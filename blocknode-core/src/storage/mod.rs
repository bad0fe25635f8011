//! Chunked storage engine: segments grouped into batches, batches chained into files.

pub mod batch;
pub mod block_store;
pub mod chunked_file;
pub mod segment;

pub use batch::Batch;
pub use block_store::{BlockStore, BlockStoreConfig};
pub use chunked_file::{ChunkedFile, FileLayout, file_dir};
pub use segment::{Segment, WriteOutcome, segment_path};
