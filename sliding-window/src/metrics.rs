//! Structured run events for an external observer.
//!
//! The run loops report window changes, per-id send/drop/receive outcomes
//! and goodput samples as [`MetricEvent`]s handed to a [`MetricsSink`].  Rendering (plots, stats
//! files) is the observer's business; nothing here writes to disk.
//!
//! # Timestamps
//!
//! Events carry the time elapsed since the run started, taken from a
//! [`RunClock`] created when the transfer phase begins.
//!
//! # Thread Safety
//!
//! Sinks are shared between the send loop and the ACK task, so
//! [`MetricsSink::record`] takes `&self` and implementations must be
//! `Send + Sync`.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::SeqId;

/// One observation.  `at` is the offset from the start of the run.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricEvent {
    /// Sender window capacity after an admission or a slide.
    WindowSize { at: Duration, size: usize },
    /// An id was put on the wire (first send or retransmission).
    Sent { at: Duration, id: SeqId, retransmission: bool },
    /// A transmission attempt was dropped by the loss model.
    Dropped { at: Duration, id: SeqId, retransmission: bool },
    /// An id was counted as received for the first time (or recovered).
    Received { at: Duration, id: SeqId },
    /// The receiver found `id` missing below its highest id.
    Missing { at: Duration, id: SeqId },
    /// Periodic `received / expected` sample.
    Goodput { at: Duration, value: f64 },
    /// Receiver-side window estimate after a batch.
    ReceiverWindow { at: Duration, size: u64 },
    /// Final number of successful retransmissions for an id that was lost.
    Retransmissions { id: SeqId, count: u32 },
}

/// Consumer of [`MetricEvent`]s.
pub trait MetricsSink: Send + Sync {
    fn record(&self, event: MetricEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl MetricsSink for NullSink {
    fn record(&self, _event: MetricEvent) {}
}

/// Writes every event to the `log` facade at `trace` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl MetricsSink for LogSink {
    fn record(&self, event: MetricEvent) {
        log::trace!(target: "sliding_window::metrics", "{event:?}");
    }
}

/// Keeps every event in memory, in arrival order.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<MetricEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far.
    pub fn events(&self) -> Vec<MetricEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of events for which `pred` holds.
    pub fn count(&self, pred: impl Fn(&MetricEvent) -> bool) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| pred(e))
            .count()
    }
}

impl MetricsSink for MemorySink {
    fn record(&self, event: MetricEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

/// Start-of-run reference for event timestamps.
#[derive(Debug, Clone, Copy)]
pub struct RunClock {
    start: Instant,
}

impl RunClock {
    pub fn start() -> Self {
        Self { start: Instant::now() }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
