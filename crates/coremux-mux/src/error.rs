use coremux_channel::ChannelError;
use coremux_frame::{EndpointId, FrameError};

/// Errors returned by multiplexer operations.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// Every endpoint slot is occupied.
    #[error("no free endpoint slot (capacity {capacity})")]
    ResourceExhausted { capacity: usize },

    /// The identifier is outside the slot table.
    #[error("endpoint id {id} out of range (capacity {capacity})")]
    NotFound { id: EndpointId, capacity: usize },

    /// Header plus payload exceeds the staging buffer.
    #[error("message too large ({size} bytes, max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Frame-level error other than size.
    #[error("frame error: {0}")]
    Frame(FrameError),

    /// Failure reported by the underlying channel, unchanged.
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// The multiplexer configuration is unusable.
    #[error("invalid multiplexer config: {0}")]
    InvalidConfig(String),

    /// `open` was called twice on one instance.
    #[error("multiplexer already open")]
    AlreadyOpen,
}

impl From<FrameError> for MuxError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::MessageTooLarge { size, max } => MuxError::MessageTooLarge { size, max },
            other => MuxError::Frame(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, MuxError>;
