use coremux_frame::{HEADER_SIZE, MAX_SLOTS};

use crate::error::{MuxError, Result};

/// Sizing of one multiplexer instance. Fixed for the instance's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MuxConfig {
    /// Number of endpoint slots. Must be in `1..=255`.
    pub slots: usize,
    /// Staging buffer capacity in bytes, endpoint header included.
    pub send_buffer_size: usize,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            slots: 8,
            send_buffer_size: 256,
        }
    }
}

impl MuxConfig {
    /// Largest payload one `send` can carry.
    pub fn max_payload(&self) -> usize {
        self.send_buffer_size.saturating_sub(HEADER_SIZE)
    }

    pub fn validate(&self) -> Result<()> {
        if self.slots == 0 || self.slots > MAX_SLOTS {
            return Err(MuxError::InvalidConfig(format!(
                "slots must be in 1..={MAX_SLOTS}, got {}",
                self.slots
            )));
        }
        if self.send_buffer_size < HEADER_SIZE {
            return Err(MuxError::InvalidConfig(format!(
                "send_buffer_size must be at least {HEADER_SIZE}, got {}",
                self.send_buffer_size
            )));
        }
        Ok(())
    }
}
