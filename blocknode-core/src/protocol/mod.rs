//! Wire protocol: length-prefixed JSON envelopes with an optional raw binary stream.

pub mod auth;
pub mod envelope;
pub mod frame;
pub mod stream;
pub mod transport;

pub use auth::{Auth, Credentials, compute_hash};
pub use envelope::{
    Empty, HelloParams, ListParams, ListResult, LoadResult, METHOD_DELETE, METHOD_HELLO,
    METHOD_LIST, METHOD_LOAD, METHOD_SAVE, Request, RequestEnvelope, ResponseEnvelope,
    SaveParams,
};
pub use frame::{FRAME_HEADER_SIZE, MAX_FRAME_SIZE, read_frame, write_frame};
pub use stream::{COPY_BUFFER_SIZE, HashingReader, copy_exact, drain};
pub use transport::{AsyncStream, Transport};
