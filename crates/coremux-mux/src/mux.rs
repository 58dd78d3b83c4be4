use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use coremux_channel::{Channel, ChannelEvents};
use coremux_frame::{endpoint_label, is_control, split_frame, EndpointId, StagingBuffer, HEADER_SIZE};
use tracing::{debug, info, trace, warn};

use crate::bind::BindGate;
use crate::config::MuxConfig;
use crate::endpoint::EndpointConfig;
use crate::error::{MuxError, Result};
use crate::stats::{DropReason, MuxStats, StatsSnapshot};
use crate::table::SlotTable;

/// Outcome of dispatching one inbound raw message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Handed to the endpoint registered at this id.
    Delivered(EndpointId),
    /// Handed to the control handler.
    Control,
    /// Dropped; never reported to the sender.
    Dropped(DropReason),
}

/// Many logical endpoints sharing one underlying channel.
///
/// Lifecycle: [`init`](Self::init) wires the channel without blocking,
/// [`open`](Self::open) registers with the channel and blocks until it is
/// bound, after which endpoints exchange frames through
/// [`send`](Self::send) and the receive dispatcher.
///
/// The channel only holds a weak back-reference; the owner of the returned
/// `Arc` keeps the instance alive.
pub struct Multiplexer<C> {
    channel: C,
    config: MuxConfig,
    slots: RwLock<SlotTable<EndpointConfig>>,
    staging: Mutex<StagingBuffer>,
    gate: BindGate,
    control: RwLock<Option<Weak<EndpointConfig>>>,
    opened: AtomicBool,
    stats: MuxStats,
}

impl<C: Channel + 'static> Multiplexer<C> {
    /// Validate `config`, configure the channel and build the instance.
    pub fn init(channel: C, config: MuxConfig) -> Result<Arc<Self>> {
        config.validate()?;
        channel.configure()?;

        debug!(
            channel = channel.name(),
            slots = config.slots,
            send_buffer_size = config.send_buffer_size,
            "multiplexer initialized"
        );

        Ok(Arc::new(Self {
            slots: RwLock::new(SlotTable::new(config.slots)?),
            staging: Mutex::new(StagingBuffer::new(config.send_buffer_size)),
            gate: BindGate::new(),
            control: RwLock::new(None),
            opened: AtomicBool::new(false),
            stats: MuxStats::default(),
            channel,
            config,
        }))
    }

    /// Register with the channel and block until it is bound.
    ///
    /// Control frames are dropped; use [`open_with_control`](Self::open_with_control)
    /// when the endpoint handshake runs on top of this instance.
    pub fn open(self: &Arc<Self>) -> Result<()> {
        self.start(None)?;
        self.wait_bound();
        Ok(())
    }

    /// Like [`open`](Self::open), routing control frames to `control`.
    pub fn open_with_control(self: &Arc<Self>, control: &Arc<EndpointConfig>) -> Result<()> {
        self.start(Some(control))?;
        self.wait_bound();
        Ok(())
    }

    /// Register with the channel without waiting for the bind.
    ///
    /// Pair with [`wait_bound`](Self::wait_bound) or
    /// [`wait_bound_timeout`](Self::wait_bound_timeout).
    pub fn start(self: &Arc<Self>, control: Option<&Arc<EndpointConfig>>) -> Result<()> {
        if self.opened.swap(true, Ordering::AcqRel) {
            return Err(MuxError::AlreadyOpen);
        }

        *self.control.write().unwrap_or_else(PoisonError::into_inner) = control.map(Arc::downgrade);

        let events: Arc<dyn ChannelEvents> = self.clone();
        if let Err(err) = self.channel.open(Arc::downgrade(&events)) {
            self.opened.store(false, Ordering::Release);
            return Err(err.into());
        }

        debug!(channel = self.channel.name(), "multiplexer registered with channel");
        Ok(())
    }
}

impl<C: Channel> Multiplexer<C> {
    /// Install `control` on an instance that is already open, provided the
    /// previous control handler has been dropped. Returns whether it did.
    pub fn adopt_control(&self, control: &Arc<EndpointConfig>) -> bool {
        if !self.opened.load(Ordering::Acquire) {
            return false;
        }
        let mut current = self.control.write().unwrap_or_else(PoisonError::into_inner);
        if current.as_ref().and_then(Weak::upgrade).is_some() {
            return false;
        }
        *current = Some(Arc::downgrade(control));
        debug!(handler = control.name(), "control handler replaced");
        true
    }

    /// Block until the underlying channel is bound.
    pub fn wait_bound(&self) {
        self.gate.wait_bound();
    }

    /// Block until bound or `timeout` elapses. Returns whether bound.
    pub fn wait_bound_timeout(&self, timeout: Duration) -> bool {
        self.gate.wait_bound_timeout(timeout)
    }

    /// Wait for the bind from an async task.
    #[cfg(feature = "async")]
    pub async fn wait_bound_async(&self) {
        self.gate.wait_bound_async().await;
    }

    pub fn is_bound(&self) -> bool {
        self.gate.is_bound()
    }

    /// Send `payload` to the remote endpoint `id`.
    ///
    /// Concurrent callers serialize on the staging buffer; every frame is
    /// complete before the next one is staged. Channel failures are returned
    /// unchanged as [`MuxError::Channel`].
    pub fn send(&self, id: EndpointId, payload: &[u8]) -> Result<()> {
        let size = HEADER_SIZE + payload.len();
        if size > self.config.send_buffer_size {
            return Err(MuxError::MessageTooLarge {
                size,
                max: self.config.send_buffer_size,
            });
        }

        // Staging fully overwrites the frame, so a poisoned buffer is still usable.
        let mut staging = self.staging.lock().unwrap_or_else(PoisonError::into_inner);
        let frame = staging.stage(id, payload)?;
        self.channel.send(frame)?;
        drop(staging);

        self.stats.record_sent();
        trace!(endpoint = %endpoint_label(id), size, "frame sent");
        Ok(())
    }

    /// Claim the first free slot for `config` and return its id.
    pub fn allocate_slot(&self, config: &Arc<EndpointConfig>) -> Result<EndpointId> {
        let id = self.slots_mut().allocate_slot(config)?;
        debug!(endpoint = config.name(), id, "slot allocated");
        Ok(id)
    }

    /// Register `config` at a peer-chosen `id`.
    pub fn set_slot(&self, id: EndpointId, config: &Arc<EndpointConfig>) -> Result<()> {
        self.slots_mut().set_slot(id, config)?;
        debug!(endpoint = config.name(), id, "slot set");
        Ok(())
    }

    pub fn get_slot(&self, id: EndpointId) -> Result<Option<Arc<EndpointConfig>>> {
        self.slots().get_slot(id)
    }

    /// Vacate the slot at `id`. Frames for it are dropped from now on.
    pub fn clear_slot(&self, id: EndpointId) -> Result<()> {
        self.slots_mut().clear_slot(id)?;
        debug!(id, "slot cleared");
        Ok(())
    }

    /// Vacate `id` only while it still holds `config`. Returns whether it did.
    pub fn release_slot(&self, id: EndpointId, config: &Arc<EndpointConfig>) -> Result<bool> {
        let released = self.slots_mut().release_slot(id, config)?;
        if released {
            debug!(endpoint = config.name(), id, "slot released");
        }
        Ok(released)
    }

    /// Identifiers currently registered, ascending.
    pub fn occupied_ids(&self) -> Vec<EndpointId> {
        self.slots().occupied_ids().collect()
    }

    /// Route one inbound raw message.
    ///
    /// Called from the channel's receive callback; also usable directly to
    /// inject frames. The endpoint callback runs synchronously, after the
    /// slot table lock has been released.
    pub fn dispatch(&self, raw: &[u8]) -> Dispatch {
        let Ok((id, payload)) = split_frame(raw) else {
            return self.drop_frame(None, DropReason::Empty);
        };

        if is_control(id) {
            let control = self
                .control
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .as_ref()
                .and_then(Weak::upgrade);
            return match control {
                Some(handler) => {
                    self.stats.record_control();
                    handler.deliver(payload);
                    Dispatch::Control
                }
                None => self.drop_frame(Some(id), DropReason::NoControlHandler),
            };
        }

        let target = self.slots().get_slot(id);
        match target {
            Ok(Some(endpoint)) => {
                self.stats.record_delivered();
                trace!(id, endpoint = endpoint.name(), size = payload.len(), "frame delivered");
                endpoint.deliver(payload);
                Dispatch::Delivered(id)
            }
            Ok(None) => self.drop_frame(Some(id), DropReason::Unoccupied),
            Err(_) => self.drop_frame(Some(id), DropReason::OutOfRange),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn config(&self) -> &MuxConfig {
        &self.config
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    fn drop_frame(&self, id: Option<EndpointId>, reason: DropReason) -> Dispatch {
        self.stats.record_drop(reason);
        match reason {
            // Normal while a disconnect races with in-flight frames.
            DropReason::Unoccupied => debug!(?id, reason = reason.as_str(), "frame dropped"),
            _ => warn!(?id, reason = reason.as_str(), "frame dropped"),
        }
        Dispatch::Dropped(reason)
    }

    // Table operations are single slot assignments; a poisoned lock still
    // guards a consistent table.
    fn slots(&self) -> std::sync::RwLockReadGuard<'_, SlotTable<EndpointConfig>> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn slots_mut(&self) -> std::sync::RwLockWriteGuard<'_, SlotTable<EndpointConfig>> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C: Channel> ChannelEvents for Multiplexer<C> {
    fn bound(&self) {
        info!(channel = self.channel.name(), "channel bound");
        self.gate.signal_bound();
    }

    fn received(&self, msg: &[u8]) {
        self.dispatch(msg);
    }
}

impl<C> std::fmt::Debug for Multiplexer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("config", &self.config)
            .field("bound", &self.gate.is_bound())
            .field("opened", &self.opened.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}
