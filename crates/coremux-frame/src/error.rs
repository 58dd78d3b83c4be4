/// Errors that can occur while building or parsing frames.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Header plus payload does not fit the destination buffer.
    #[error("frame too large ({size} bytes, max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// A raw message too short to carry an endpoint header.
    #[error("empty frame (no endpoint header)")]
    Empty,
}

pub type Result<T> = std::result::Result<T, FrameError>;
