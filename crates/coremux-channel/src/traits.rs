use std::sync::Weak;

use crate::error::Result;

/// Callbacks a channel raises towards the layer that opened it.
///
/// Both methods run in the channel's delivery context. They must finish in
/// bounded time and must not wait on anything the delivery context itself
/// has to make progress on.
pub trait ChannelEvents: Send + Sync {
    /// The channel finished its own bind and is ready to carry messages.
    ///
    /// Raised exactly once per successful `open`.
    fn bound(&self);

    /// One complete raw message arrived from the remote side.
    fn received(&self, msg: &[u8]);
}

/// A raw, reliable, ordered, message-oriented link between two cores.
pub trait Channel: Send + Sync {
    /// Prepare the link. Must not block.
    fn configure(&self) -> Result<()> {
        Ok(())
    }

    /// Start the link-level bind and register the event target.
    ///
    /// The channel only holds a weak reference to `events`; it never keeps
    /// the layer above alive. Events raised after the target is dropped are
    /// discarded.
    fn open(&self, events: Weak<dyn ChannelEvents>) -> Result<()>;

    /// Transmit one raw message.
    ///
    /// May block while the link applies backpressure.
    fn send(&self, msg: &[u8]) -> Result<()>;

    /// Short name for diagnostics.
    fn name(&self) -> &'static str {
        "channel"
    }
}
