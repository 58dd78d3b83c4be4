use std::time::Duration;

use crate::error::{PeerError, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_MAX_NAME_LEN: usize = 32;

/// Which side of the handshake a session plays.
///
/// The initiator picks identifiers from its own slot table and offers them;
/// the follower adopts whatever identifier the initiator offered for a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Follower,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Initiator => "initiator",
            Role::Follower => "follower",
        }
    }
}

/// Configuration for endpoint handshakes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeConfig {
    /// Upper bound for each blocking wait (bind, offer, acknowledgement).
    /// `None` waits forever.
    pub timeout: Option<Duration>,
    /// Maximum endpoint name length in bytes.
    pub max_name_len: usize,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timeout: Some(DEFAULT_TIMEOUT),
            max_name_len: DEFAULT_MAX_NAME_LEN,
        }
    }
}

pub(crate) fn validate_name(name: &str, max_len: usize) -> Result<()> {
    if name.is_empty() {
        return Err(PeerError::HandshakeFailed(
            "endpoint name must not be empty".to_string(),
        ));
    }
    if name.len() > max_len {
        return Err(PeerError::HandshakeFailed(format!(
            "endpoint name exceeds {max_len} bytes ({})",
            name.len()
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(PeerError::HandshakeFailed(
            "endpoint name must not contain control characters".to_string(),
        ));
    }
    Ok(())
}
