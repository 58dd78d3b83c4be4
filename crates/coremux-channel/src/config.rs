/// Default upper bound on a single raw message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024;

/// Default number of undelivered messages a loopback end may hold.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// Configuration shared by the reference channel implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Largest raw message accepted by `send`, in bytes.
    pub max_message_size: usize,
    /// Bounded inbound queue depth. A sender blocks while the remote queue is full.
    pub queue_depth: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}
