//! Many logical endpoints over one inter-core message channel.
//!
//! coremux multiplexes independent endpoints over a single reliable,
//! ordered, message-oriented link by prefixing every message with a
//! one-byte endpoint identifier. Peers agree on identifiers with a small
//! handshake on a reserved control endpoint.
//!
//! # Crate Structure
//!
//! - [`channel`]: the channel boundary plus loopback and Unix socket links
//! - [`frame`]: endpoint identifiers, frame format, staging buffer
//! - [`mux`]: slot table, bind gate, send path and receive dispatcher
//! - [`peer`]: endpoint handshake and sessions (behind `peer` feature)

/// Re-export channel types.
pub mod channel {
    pub use coremux_channel::*;
}

/// Re-export frame types.
pub mod frame {
    pub use coremux_frame::*;
}

/// Re-export multiplexer types.
pub mod mux {
    pub use coremux_mux::*;
}

/// Re-export session types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use coremux_peer::*;
}
