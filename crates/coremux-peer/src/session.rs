use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

use coremux_channel::Channel;
use coremux_frame::{EndpointId, CONTROL_ID};
use coremux_mux::{EndpointConfig, Multiplexer, MuxConfig, MuxError};
use tracing::{debug, info, warn};

use crate::control::{ControlMessage, OfferSeq};
use crate::error::{PeerError, Result};
use crate::handshake::{validate_name, HandshakeConfig, Role};

/// Handshake-aware connection manager for one multiplexer.
///
/// Owns the control endpoint and all handshake timeouts. Endpoints are
/// registered by name with [`register`](Self::register); both sides must
/// register the same name before data flows.
///
/// Cloning is cheap and yields a handle to the same session.
pub struct Session<C: Channel> {
    inner: Arc<SessionInner<C>>,
}

impl<C: Channel> Clone for Session<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct SessionInner<C: Channel> {
    mux: Arc<Multiplexer<C>>,
    role: Role,
    config: HandshakeConfig,
    control: Arc<EndpointConfig>,
    next_offer: AtomicU32,
    state: Mutex<SessionState>,
    changed: Condvar,
}

#[derive(Default)]
struct SessionState {
    /// Follower only: offers not yet claimed, keyed by endpoint name.
    offers: HashMap<String, (EndpointId, OfferSeq)>,
    /// Initiator only: offers sent and not yet acknowledged.
    pending: HashMap<EndpointId, (String, OfferSeq)>,
    /// Initiator only: acknowledged offers not yet consumed.
    acks: HashSet<EndpointId>,
    /// Local names in use, including registrations still in progress.
    names: HashSet<String>,
    live: HashMap<EndpointId, Arc<EndpointLink>>,
}

/// State shared between an [`Endpoint`] handle and the control handler.
struct EndpointLink {
    config: Weak<EndpointConfig>,
    disconnected: AtomicBool,
}

impl<C: Channel + 'static> Session<C> {
    /// Build a multiplexer over `channel` and open a session on it.
    pub fn connect(
        channel: C,
        mux_config: MuxConfig,
        role: Role,
        config: HandshakeConfig,
    ) -> Result<Self> {
        let mux = Multiplexer::init(channel, mux_config)?;
        Self::open(mux, role, config)
    }

    /// Open `mux` with this session as its control handler.
    ///
    /// Blocks until the channel is bound, or fails with
    /// [`PeerError::Timeout`] once `config.timeout` elapses. A multiplexer
    /// left open by a session that failed or was dropped is taken over, so
    /// opening can be retried on the same instance; one with a live session
    /// is refused with [`MuxError::AlreadyOpen`].
    pub fn open(mux: Arc<Multiplexer<C>>, role: Role, config: HandshakeConfig) -> Result<Self> {
        let inner = Arc::new_cyclic(|weak: &Weak<SessionInner<C>>| {
            let weak = weak.clone();
            let control = EndpointConfig::new("control", move |payload: &[u8]| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_control(payload);
                }
            });
            SessionInner {
                mux,
                role,
                config,
                control: Arc::new(control),
                next_offer: AtomicU32::new(1),
                state: Mutex::new(SessionState::default()),
                changed: Condvar::new(),
            }
        });

        match inner.mux.start(Some(&inner.control)) {
            Err(MuxError::AlreadyOpen) if inner.mux.adopt_control(&inner.control) => {
                debug!(role = role.as_str(), "taking over open multiplexer");
            }
            started => started?,
        }
        match inner.config.timeout {
            Some(timeout) => {
                if !inner.mux.wait_bound_timeout(timeout) {
                    return Err(PeerError::Timeout(timeout));
                }
            }
            None => inner.mux.wait_bound(),
        }

        debug!(role = role.as_str(), "session open");
        Ok(Self { inner })
    }
}

impl<C: Channel> Session<C> {
    /// Run the handshake for `name` and return the connected endpoint.
    ///
    /// `on_received` runs in the channel's delivery context for every frame
    /// addressed to the endpoint.
    pub fn register(
        &self,
        name: &str,
        on_received: impl Fn(&[u8]) + Send + Sync + 'static,
    ) -> Result<Endpoint<C>> {
        let inner = &self.inner;
        validate_name(name, inner.config.max_name_len)?;
        if !inner.lock_state().names.insert(name.to_string()) {
            return Err(PeerError::DuplicateEndpoint(name.to_string()));
        }

        let config = Arc::new(EndpointConfig::new(name, on_received));
        let link = Arc::new(EndpointLink {
            config: Arc::downgrade(&config),
            disconnected: AtomicBool::new(false),
        });

        let bound = match inner.role {
            Role::Initiator => inner.bind_as_initiator(&config, &link),
            Role::Follower => inner.bind_as_follower(&config, &link),
        };
        let id = match bound {
            Ok(id) => id,
            Err(err) => {
                inner.lock_state().names.remove(name);
                return Err(err);
            }
        };

        info!(role = inner.role.as_str(), endpoint = name, id, "endpoint connected");
        Ok(Endpoint {
            session: Arc::clone(inner),
            id,
            config,
            link,
            closed: false,
        })
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn config(&self) -> &HandshakeConfig {
        &self.inner.config
    }

    pub fn multiplexer(&self) -> &Arc<Multiplexer<C>> {
        &self.inner.mux
    }

    /// Names offered by the initiator that no local endpoint has claimed yet.
    pub fn pending_offers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock_state().offers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl<C: Channel> fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("role", &self.inner.role)
            .field("config", &self.inner.config)
            .field("mux", &self.inner.mux)
            .finish()
    }
}

impl<C: Channel> SessionInner<C> {
    fn bind_as_initiator(
        &self,
        config: &Arc<EndpointConfig>,
        link: &Arc<EndpointLink>,
    ) -> Result<EndpointId> {
        let name = config.name();
        // The table's write lock makes allocation atomic across registering threads.
        let id = self.mux.allocate_slot(config)?;
        let offer = self.next_offer.fetch_add(1, Ordering::Relaxed);
        {
            let mut state = self.lock_state();
            state.acks.remove(&id);
            state.pending.insert(id, (name.to_string(), offer));
            state.live.insert(id, Arc::clone(link));
        }

        let acked = self
            .send_control(&ControlMessage::bind(id, name, offer))
            .and_then(|()| {
                self.wait_until(|state| {
                    if state.acks.remove(&id) {
                        Some(Ok(()))
                    } else if link.disconnected.load(Ordering::Acquire) {
                        Some(Err(PeerError::HandshakeFailed(format!(
                            "peer refused endpoint '{name}' at id {id}"
                        ))))
                    } else {
                        None
                    }
                })
            })
            .and_then(|outcome| outcome);

        if let Err(err) = acked {
            warn!(endpoint = name, id, offer, error = %err, "endpoint bind failed");
            self.forget(id, link);
            if matches!(err, PeerError::Timeout(_)) {
                // Withdrawn while the slot is still ours, so the unbind cannot
                // overtake an offer for a new owner of the id.
                if let Err(unbind_err) = self.send_control(&ControlMessage::unbind(id)) {
                    debug!(id, error = %unbind_err, "could not withdraw offer");
                }
            }
            self.release(id, config);
            return Err(err);
        }
        Ok(id)
    }

    fn bind_as_follower(
        &self,
        config: &Arc<EndpointConfig>,
        link: &Arc<EndpointLink>,
    ) -> Result<EndpointId> {
        let name = config.name();
        let (id, offer) = self.wait_until(|state| state.offers.remove(name))?;

        if let Err(err) = self.mux.set_slot(id, config) {
            warn!(endpoint = name, id, error = %err, "offer refused");
            // Lets the initiator fail now instead of waiting for an acknowledgement.
            if let Err(unbind_err) = self.send_control(&ControlMessage::unbind(id)) {
                debug!(id, error = %unbind_err, "could not refuse offer");
            }
            return Err(err.into());
        }
        self.lock_state().live.insert(id, Arc::clone(link));

        if let Err(err) = self.send_control(&ControlMessage::bind_ack(id, name, offer)) {
            warn!(endpoint = name, id, error = %err, "endpoint acknowledgement failed");
            self.forget(id, link);
            self.release(id, config);
            return Err(err);
        }
        Ok(id)
    }

    /// Control endpoint callback. Runs in the channel's delivery context:
    /// only records state and wakes waiters, never sends.
    fn on_control(&self, payload: &[u8]) {
        let msg = match ControlMessage::from_payload(payload) {
            Ok(msg) => msg,
            Err(err) => {
                warn!(error = %err, size = payload.len(), "malformed control message dropped");
                return;
            }
        };
        debug!(
            role = self.role.as_str(),
            msg_type = msg.msg_type(),
            id = msg.id(),
            "control message received"
        );

        match (self.role, msg) {
            (Role::Follower, ControlMessage::Bind { id, name, offer }) => {
                let replaced = self.lock_state().offers.insert(name.clone(), (id, offer));
                if let Some((previous, _)) = replaced {
                    debug!(endpoint = %name, previous, id, "offer replaced");
                }
            }
            (Role::Initiator, ControlMessage::BindAck { id, name, offer }) => {
                let mut state = self.lock_state();
                let expected = state
                    .pending
                    .get(&id)
                    .is_some_and(|(pending, seq)| *pending == name && *seq == offer);
                if !expected {
                    drop(state);
                    warn!(id, endpoint = %name, offer, "acknowledgement matches no pending offer");
                    return;
                }
                state.pending.remove(&id);
                state.acks.insert(id);
            }
            (_, ControlMessage::Unbind { id }) => self.remote_unbind(id),
            (role, msg) => {
                warn!(
                    role = role.as_str(),
                    msg_type = msg.msg_type(),
                    "unexpected control message for role"
                );
                return;
            }
        }
        self.changed.notify_all();
    }

    fn remote_unbind(&self, id: EndpointId) {
        let link = {
            let mut state = self.lock_state();
            state.offers.retain(|_, (offered, _)| *offered != id);
            state.pending.remove(&id);
            state.acks.remove(&id);
            let link = state.live.remove(&id);
            // Set under the state lock: a registration waiting on the condvar
            // checks this flag.
            if let Some(link) = &link {
                link.disconnected.store(true, Ordering::Release);
            }
            link
        };
        let Some(link) = link else {
            debug!(id, "unbind for unknown endpoint");
            return;
        };

        if let Some(config) = link.config.upgrade() {
            self.release(id, &config);
            info!(endpoint = config.name(), id, "endpoint disconnected by peer");
        }
    }

    fn send_control(&self, msg: &ControlMessage) -> Result<()> {
        let payload = msg.to_payload()?;
        self.mux.send(CONTROL_ID, &payload)?;
        debug!(msg_type = msg.msg_type(), id = msg.id(), "control message sent");
        Ok(())
    }

    /// Drop handshake state for `id` while it still belongs to `link`.
    fn forget(&self, id: EndpointId, link: &Arc<EndpointLink>) {
        let mut state = self.lock_state();
        if state
            .live
            .get(&id)
            .is_some_and(|live| Arc::ptr_eq(live, link))
        {
            state.live.remove(&id);
            state.pending.remove(&id);
            state.acks.remove(&id);
        }
    }

    fn release(&self, id: EndpointId, config: &Arc<EndpointConfig>) {
        if let Err(err) = self.mux.release_slot(id, config) {
            warn!(id, error = %err, "failed to release endpoint slot");
        }
    }

    /// Wait until `take` yields a value, bounded by the handshake timeout.
    fn wait_until<T>(&self, mut take: impl FnMut(&mut SessionState) -> Option<T>) -> Result<T> {
        let deadline = self.config.timeout.map(|timeout| (timeout, Instant::now() + timeout));
        let mut state = self.lock_state();
        loop {
            if let Some(value) = take(&mut *state) {
                return Ok(value);
            }
            state = match deadline {
                None => self
                    .changed
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some((timeout, deadline)) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(PeerError::Timeout(timeout));
                    }
                    self.changed
                        .wait_timeout(state, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    // Every update is a single map insert or remove; a poisoned lock still
    // guards consistent maps.
    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A connected endpoint.
///
/// Owns the endpoint configuration the multiplexer routes to. Dropping the
/// handle closes the endpoint.
pub struct Endpoint<C: Channel> {
    session: Arc<SessionInner<C>>,
    id: EndpointId,
    config: Arc<EndpointConfig>,
    link: Arc<EndpointLink>,
    closed: bool,
}

impl<C: Channel> Endpoint<C> {
    /// Identifier agreed during the handshake.
    pub fn id(&self) -> EndpointId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.config.name()
    }

    /// False once the remote side has unbound the endpoint.
    pub fn is_connected(&self) -> bool {
        !self.link.disconnected.load(Ordering::Acquire)
    }

    /// Send `payload` to the remote endpoint.
    pub fn send(&self, payload: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(PeerError::Disconnected(self.name().to_string()));
        }
        self.session.mux.send(self.id, payload)?;
        Ok(())
    }

    /// Release the slot and tell the remote side.
    ///
    /// The local slot is released even if notifying the remote side fails.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let remote_closed = self.link.disconnected.swap(true, Ordering::AcqRel);
        {
            let mut state = self.session.lock_state();
            if state
                .live
                .get(&self.id)
                .is_some_and(|link| Arc::ptr_eq(link, &self.link))
            {
                state.live.remove(&self.id);
            }
            state.names.remove(self.config.name());
        }
        self.session.release(self.id, &self.config);
        info!(endpoint = self.name(), id = self.id, "endpoint closed");

        if !remote_closed {
            self.session.send_control(&ControlMessage::unbind(self.id))?;
        }
        Ok(())
    }
}

impl<C: Channel> Drop for Endpoint<C> {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            debug!(id = self.id, error = %err, "unbind not delivered");
        }
    }
}

impl<C: Channel> fmt::Debug for Endpoint<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.id)
            .field("name", &self.config.name())
            .field("connected", &self.is_connected())
            .finish()
    }
}
