use thiserror::Error;

pub type Result<T> = std::result::Result<T, BlockError>;

#[derive(Debug, Error)]
pub enum BlockError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Segment not open: {0}")]
    NotOpen(String),

    /// A single read/write pair during a copy did not move the same number of bytes.
    #[error("Write mismatch: read {read} bytes, wrote {written}")]
    WriteMismatch { read: usize, written: usize },

    #[error("Capacity exhausted: {0}")]
    CapacityExhausted(String),

    /// The peer closed the binary stream before the declared length was transferred.
    #[error("Short stream: expected {expected} bytes, got {actual}")]
    ShortStream { expected: u64, actual: u64 },

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u64, max: u64 },

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    /// Error string returned by the remote side in a response envelope.
    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BlockError {
    /// Framing faults close the connection without a structured reply.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            BlockError::FrameTooLarge { .. }
                | BlockError::MalformedEnvelope(_)
                | BlockError::ConnectionClosed
        )
    }
}
