use crate::types::Rank;

pub type Result<T> = std::result::Result<T, StratumError>;

#[derive(Debug, thiserror::Error)]
pub enum StratumError {
    #[error("no collective layer available: {op} requires a transport")]
    Unsupported { op: &'static str },

    #[error("unknown group handle {id}")]
    UnknownGroup { id: u64 },

    #[error("rank {rank} is not a member of group {id}")]
    NotInGroup { rank: Rank, id: u64 },

    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("buffer of {len} bytes is not a whole number of {dtype} elements")]
    MisalignedBuffer {
        len: usize,
        dtype: crate::types::DataType,
    },

    #[error("topology error: {reason}")]
    Topology { reason: String },

    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("transport already finalized")]
    Finalized,
}

impl StratumError {
    /// Create a `Transport` error with just a message.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a `Transport` error with a message and a source error.
    pub fn transport_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }
}
