use std::fmt;

/// Receive callback of an endpoint. Runs in the channel's delivery context.
pub type ReceiveFn = dyn Fn(&[u8]) + Send + Sync;

/// Application-owned description of one endpoint.
///
/// The multiplexer only keeps a weak reference to it; the endpoint stops
/// receiving as soon as its owner drops the last `Arc`. Per-endpoint
/// context is whatever the receive closure captures.
pub struct EndpointConfig {
    name: String,
    on_received: Box<ReceiveFn>,
}

impl EndpointConfig {
    pub fn new(
        name: impl Into<String>,
        on_received: impl Fn(&[u8]) + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            on_received: Box::new(on_received),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hand a payload to the receive callback.
    pub fn deliver(&self, payload: &[u8]) {
        (self.on_received)(payload);
    }
}

impl fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
