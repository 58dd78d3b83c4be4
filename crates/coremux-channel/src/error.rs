use std::path::PathBuf;

/// Errors reported by an underlying message channel.
///
/// Upper layers forward these verbatim; they never reinterpret a channel
/// failure.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Failed to bind the reference socket link to the specified path.
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect the reference socket link to the specified path.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to accept an incoming link.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the link.
    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// The channel has not completed its own bind yet.
    #[error("channel not bound")]
    NotBound,

    /// `open` was called on a channel end that is already open.
    #[error("channel already open")]
    AlreadyOpen,

    /// The raw message does not fit the channel's message limit.
    #[error("raw message too large ({size} bytes, max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// The remote side is gone or the channel was shut down.
    #[error("channel closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, ChannelError>;
