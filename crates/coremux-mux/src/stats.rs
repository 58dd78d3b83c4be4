use std::sync::atomic::{AtomicU64, Ordering};

/// Why the receive dispatcher dropped a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Raw message without an endpoint header.
    Empty,
    /// Identifier outside the slot table.
    OutOfRange,
    /// Identifier inside the table, but nothing registered there.
    Unoccupied,
    /// Control frame with no control handler installed.
    NoControlHandler,
}

impl DropReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::Empty => "empty",
            DropReason::OutOfRange => "out_of_range",
            DropReason::Unoccupied => "unoccupied",
            DropReason::NoControlHandler => "no_control_handler",
        }
    }
}

/// Traffic counters for one multiplexer instance.
#[derive(Debug, Default)]
pub(crate) struct MuxStats {
    frames_sent: AtomicU64,
    frames_delivered: AtomicU64,
    control_frames: AtomicU64,
    dropped_empty: AtomicU64,
    dropped_out_of_range: AtomicU64,
    dropped_unoccupied: AtomicU64,
    dropped_no_control: AtomicU64,
}

impl MuxStats {
    pub(crate) fn record_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self) {
        self.frames_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_control(&self) {
        self.control_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_drop(&self, reason: DropReason) {
        let counter = match reason {
            DropReason::Empty => &self.dropped_empty,
            DropReason::OutOfRange => &self.dropped_out_of_range,
            DropReason::Unoccupied => &self.dropped_unoccupied,
            DropReason::NoControlHandler => &self.dropped_no_control,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            control_frames: self.control_frames.load(Ordering::Relaxed),
            dropped_empty: self.dropped_empty.load(Ordering::Relaxed),
            dropped_out_of_range: self.dropped_out_of_range.load(Ordering::Relaxed),
            dropped_unoccupied: self.dropped_unoccupied.load(Ordering::Relaxed),
            dropped_no_control: self.dropped_no_control.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of an instance's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_sent: u64,
    pub frames_delivered: u64,
    pub control_frames: u64,
    pub dropped_empty: u64,
    pub dropped_out_of_range: u64,
    pub dropped_unoccupied: u64,
    pub dropped_no_control: u64,
}

impl StatsSnapshot {
    pub fn dropped_total(&self) -> u64 {
        self.dropped_empty
            + self.dropped_out_of_range
            + self.dropped_unoccupied
            + self.dropped_no_control
    }
}
