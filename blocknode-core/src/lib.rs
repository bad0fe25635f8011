//! Blocknode Core - storage node for a distributed block store
//!
//! Clients push opaque blocks over a framed TCP protocol:
//! - length-prefixed JSON envelopes followed by an unframed binary stream
//! - blocks laid out as chunked files of batches of capacity-bounded segments
//! - block locations recorded in a SQLite or key/value metadata registry
//! - local storage ids issued by a persistent allocator

pub mod alloc;
pub mod error;
pub mod kv;
pub mod node;
pub mod protocol;
pub mod registry;
pub mod rpc;
pub mod storage;

pub use alloc::{AllocatorState, IdAllocator};
pub use error::{BlockError, Result};
pub use kv::{KvStore, MemKvStore, SqliteKvStore};
pub use node::build_service;
pub use protocol::{Auth, Credentials, Request, RequestEnvelope, ResponseEnvelope, Transport};
pub use registry::{BlockDescriptor, BlockKey, KeyPrefix, KvRegistry, MetadataRegistry, SqlRegistry};
pub use rpc::{Client, Server, ServerHandle, Service};
pub use storage::{Batch, BlockStore, BlockStoreConfig, ChunkedFile, FileLayout, Segment};
