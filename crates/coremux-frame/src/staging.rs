use crate::codec::encode_frame;
use crate::endpoint::EndpointId;
use crate::error::Result;

/// Fixed-capacity buffer one outgoing frame is assembled in.
///
/// Allocated once at construction and never resized. Holds at most one
/// frame at a time; staging a new frame overwrites the previous one.
pub struct StagingBuffer {
    buf: Box<[u8]>,
}

impl StagingBuffer {
    /// Create a zeroed buffer of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
        }
    }

    /// Total capacity, header included.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Assemble one frame and return the bytes to hand to the channel.
    pub fn stage(&mut self, endpoint: EndpointId, payload: &[u8]) -> Result<&[u8]> {
        let len = encode_frame(endpoint, payload, &mut self.buf)?;
        Ok(&self.buf[..len])
    }
}

impl std::fmt::Debug for StagingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingBuffer")
            .field("capacity", &self.buf.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FrameError;

    #[test]
    fn stage_returns_complete_frame() {
        let mut staging = StagingBuffer::new(16);
        let frame = staging.stage(0, b"hi").unwrap();
        assert_eq!(frame, &[0x00, b'h', b'i']);
    }

    #[test]
    fn restaging_overwrites_previous_frame() {
        let mut staging = StagingBuffer::new(16);
        staging.stage(1, b"longer payload").unwrap();
        let frame = staging.stage(2, b"x").unwrap();
        assert_eq!(frame, &[0x02, b'x']);
    }

    #[test]
    fn capacity_bounds() {
        let mut staging = StagingBuffer::new(4);
        assert_eq!(staging.capacity(), 4);
        assert!(staging.stage(3, b"abc").is_ok());
        assert_eq!(
            staging.stage(3, b"abcd"),
            Err(FrameError::MessageTooLarge { size: 5, max: 4 })
        );
    }

    #[test]
    fn zero_capacity_accepts_nothing() {
        let mut staging = StagingBuffer::new(0);
        assert!(staging.stage(0, b"").is_err());
    }
}
