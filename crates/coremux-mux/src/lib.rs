//! Multi-endpoint multiplexer over a single message channel.
//!
//! Many logical endpoints share one [`Channel`](coremux_channel::Channel).
//! Every outgoing message is prefixed with a one-byte endpoint identifier;
//! incoming messages are routed to the endpoint registered at that
//! identifier, or dropped.
//!
//! ```no_run
//! use std::sync::Arc;
//! use coremux_channel::{ChannelConfig, LoopbackChannel};
//! use coremux_mux::{EndpointConfig, Multiplexer, MuxConfig};
//!
//! # fn main() -> coremux_mux::Result<()> {
//! let (local, _remote) = LoopbackChannel::pair(ChannelConfig::default());
//! let mux = Multiplexer::init(local, MuxConfig::default())?;
//! mux.open()?;
//!
//! let endpoint = Arc::new(EndpointConfig::new("telemetry", |payload: &[u8]| {
//!     println!("got {} bytes", payload.len());
//! }));
//! let id = mux.allocate_slot(&endpoint)?;
//! mux.send(id, b"hello")?;
//! # Ok(())
//! # }
//! ```

mod bind;
mod config;
mod endpoint;
mod error;
mod mux;
mod stats;
mod table;

pub use bind::BindGate;
pub use config::MuxConfig;
pub use endpoint::{EndpointConfig, ReceiveFn};
pub use error::{MuxError, Result};
pub use mux::{Dispatch, Multiplexer};
pub use stats::{DropReason, StatsSnapshot};
pub use table::SlotTable;

pub use coremux_frame::{EndpointId, CONTROL_ID, MAX_SLOTS};
