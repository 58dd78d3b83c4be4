use std::time::Duration;

/// Errors that can occur in session and endpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Multiplexer-level error, including channel failures.
    #[error("multiplexer error: {0}")]
    Mux(#[from] coremux_mux::MuxError),

    /// Control message could not be encoded or decoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Handshake input rejected before anything was sent.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// No bind or acknowledgement arrived in time.
    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),

    /// The remote side closed the endpoint.
    #[error("endpoint disconnected: {0}")]
    Disconnected(String),

    /// An endpoint with this name is already registered on the session.
    #[error("endpoint '{0}' already registered")]
    DuplicateEndpoint(String),
}

pub type Result<T> = std::result::Result<T, PeerError>;
