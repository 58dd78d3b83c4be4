use crate::endpoint::EndpointId;
use crate::error::{FrameError, Result};

/// Frame header: endpoint id (1) = 1 byte.
pub const HEADER_SIZE: usize = 1;

/// Write one frame into the front of `dst`.
///
/// Wire format:
/// ```text
/// ┌──────────────┬─────────────────────┐
/// │ Endpoint (1B)│ Payload (N bytes)   │
/// └──────────────┴─────────────────────┘
/// ```
///
/// Returns the number of bytes written. `dst` is left untouched if the frame
/// does not fit.
pub fn encode_frame(endpoint: EndpointId, payload: &[u8], dst: &mut [u8]) -> Result<usize> {
    let size = HEADER_SIZE + payload.len();
    if size > dst.len() {
        return Err(FrameError::MessageTooLarge {
            size,
            max: dst.len(),
        });
    }
    dst[0] = endpoint;
    dst[HEADER_SIZE..size].copy_from_slice(payload);
    Ok(size)
}

/// Split a raw channel message into its endpoint id and payload.
pub fn split_frame(raw: &[u8]) -> Result<(EndpointId, &[u8])> {
    match raw.split_first() {
        Some((&endpoint, payload)) => Ok((endpoint, payload)),
        None => Err(FrameError::Empty),
    }
}
