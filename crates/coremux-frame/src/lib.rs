//! Endpoint-addressed framing for a shared inter-core channel.
//!
//! Every frame is exactly one raw channel message:
//! - a 1-byte endpoint identifier
//! - the endpoint's payload, unmodified
//!
//! Identifiers `0..MAX_SLOTS` address data-plane endpoints. [`CONTROL_ID`]
//! is reserved for endpoint handshake traffic and never names a slot.

pub mod codec;
pub mod endpoint;
pub mod error;
pub mod staging;

pub use codec::{encode_frame, split_frame, HEADER_SIZE};
pub use endpoint::{endpoint_label, is_control, EndpointId, CONTROL_ID, MAX_SLOTS};
pub use error::{FrameError, Result};
pub use staging::StagingBuffer;
