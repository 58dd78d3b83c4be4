//! Endpoint handshake and session management.
//!
//! This is the layer applications talk to. A [`Session`] owns one
//! multiplexer and its control endpoint; [`Session::register`] agrees on an
//! endpoint identifier with the remote side and hands back an [`Endpoint`]
//! that sends and receives on it.
//!
//! One side of a link runs as [`Role::Initiator`] and picks identifiers, the
//! other as [`Role::Follower`] and adopts them. Control messages are small
//! JSON objects on the reserved control endpoint.

pub mod control;
pub mod error;
pub mod handshake;
pub mod session;

pub use control::{ControlMessage, OfferSeq, CONTROL_BIND, CONTROL_BIND_ACK, CONTROL_UNBIND};
pub use error::{PeerError, Result};
pub use handshake::{HandshakeConfig, Role};
pub use session::{Endpoint, Session};
