use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex, Weak};
use std::thread;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::config::ChannelConfig;
use crate::error::{ChannelError, Result};
use crate::traits::{Channel, ChannelEvents};

enum Delivery {
    Bound,
    Message(Bytes),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

impl Side {
    fn index(self) -> usize {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }

    fn remote(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

#[derive(Default)]
struct LinkState {
    opened: [bool; 2],
    bound: bool,
}

struct Link {
    state: Mutex<LinkState>,
    inboxes: [SyncSender<Delivery>; 2],
}

/// One end of an in-process channel pair.
///
/// Each end owns a delivery thread that plays the role of the interrupt or
/// work-queue context on a real target: `bound` and `received` callbacks run
/// there, in arrival order. The link binds once both ends are opened.
pub struct LoopbackChannel {
    side: Side,
    config: ChannelConfig,
    link: Arc<Link>,
    inbox: Mutex<Option<Receiver<Delivery>>>,
}

impl LoopbackChannel {
    /// Create two connected ends sharing `config`.
    pub fn pair(config: ChannelConfig) -> (Self, Self) {
        let depth = config.queue_depth.max(1);
        let (left_tx, left_rx) = mpsc::sync_channel(depth);
        let (right_tx, right_rx) = mpsc::sync_channel(depth);

        let link = Arc::new(Link {
            state: Mutex::new(LinkState::default()),
            inboxes: [left_tx, right_tx],
        });

        let left = Self {
            side: Side::Left,
            config,
            link: Arc::clone(&link),
            inbox: Mutex::new(Some(left_rx)),
        };
        let right = Self {
            side: Side::Right,
            config,
            link,
            inbox: Mutex::new(Some(right_rx)),
        };
        (left, right)
    }

    /// Whether both ends have been opened.
    pub fn is_bound(&self) -> bool {
        self.link
            .state
            .lock()
            .map(|state| state.bound)
            .unwrap_or(false)
    }

    /// Channel configuration of this end.
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }
}

impl Channel for LoopbackChannel {
    fn open(&self, events: Weak<dyn ChannelEvents>) -> Result<()> {
        let inbox = self
            .inbox
            .lock()
            .map_err(|_| ChannelError::Closed)?
            .take()
            .ok_or(ChannelError::AlreadyOpen)?;

        let side = self.side;
        thread::Builder::new()
            .name(format!("coremux-loopback-{}", side.label()))
            .spawn(move || delivery_loop(side, inbox, events))?;

        let mut state = self.link.state.lock().map_err(|_| ChannelError::Closed)?;
        state.opened[side.index()] = true;
        let bind_now = state.opened.iter().all(|opened| *opened) && !state.bound;
        if bind_now {
            // Queued under the state lock so no message can overtake the bind
            // notification. Both inboxes are empty: nothing is sent before bind.
            for inbox in &self.link.inboxes {
                inbox.send(Delivery::Bound).map_err(|_| ChannelError::Closed)?;
            }
            state.bound = true;
        }
        drop(state);

        debug!(side = side.label(), bind_now, "loopback end opened");
        Ok(())
    }

    fn send(&self, msg: &[u8]) -> Result<()> {
        if msg.len() > self.config.max_message_size {
            return Err(ChannelError::MessageTooLarge {
                size: msg.len(),
                max: self.config.max_message_size,
            });
        }

        let bound = self
            .link
            .state
            .lock()
            .map_err(|_| ChannelError::Closed)?
            .bound;
        if !bound {
            return Err(ChannelError::NotBound);
        }

        self.link.inboxes[self.side.remote().index()]
            .send(Delivery::Message(Bytes::copy_from_slice(msg)))
            .map_err(|_| ChannelError::Closed)
    }

    fn name(&self) -> &'static str {
        "loopback"
    }
}

impl std::fmt::Debug for LoopbackChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackChannel")
            .field("side", &self.side.label())
            .field("config", &self.config)
            .finish()
    }
}

fn delivery_loop(side: Side, inbox: Receiver<Delivery>, events: Weak<dyn ChannelEvents>) {
    while let Ok(delivery) = inbox.recv() {
        let Some(target) = events.upgrade() else {
            trace!(side = side.label(), "event target gone; discarding delivery");
            continue;
        };
        match delivery {
            Delivery::Bound => target.bound(),
            Delivery::Message(msg) => target.received(&msg),
        }
    }
    debug!(side = side.label(), "loopback delivery thread exiting");
}
