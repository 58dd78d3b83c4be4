//! Boundary with the raw inter-core message channel.
//!
//! The multiplexer layers above only ever see the [`Channel`] trait: one
//! reliable, ordered, message-oriented link that can be opened, reports when
//! it is bound, delivers every inbound message to a callback and accepts
//! outbound messages.
//!
//! Two reference links implement the boundary for hosted builds:
//! - [`LoopbackChannel`]: an in-process pair, one delivery thread per end
//! - [`SocketChannel`]: a Unix domain socket between two processes (Unix only)

pub mod config;
pub mod error;
pub mod loopback;
pub mod traits;

#[cfg(unix)]
pub mod link;
#[cfg(unix)]
pub mod uds;

pub use config::ChannelConfig;
pub use error::{ChannelError, Result};
pub use loopback::LoopbackChannel;
pub use traits::{Channel, ChannelEvents};

#[cfg(unix)]
pub use uds::{SocketChannel, SocketListener};
