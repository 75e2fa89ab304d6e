//! Receive-side gap tracking.
//!
//! [`ReceiverTracker`] accepts sequence ids in any order:
//!
//! - Every arrival is counted as *expected*, duplicates included.
//! - A first-time id is counted as *received*.
//! - An id previously recorded as missing moves back to *received* and its
//!   recovery counter is bumped.
//! - After each batch, [`reconcile_gaps`](ReceiverTracker::reconcile_gaps)
//!   marks every id below the highest seen that has not arrived as missing.
//! - Every arrival, duplicates included, is echoed in the ACK batch.
//!
//! This module only manages state; reading batches and writing ACKs is the
//! caller's responsibility (see [`crate::receiver`]).

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::frame::Frame;
use crate::SeqId;

/// How one arrival was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// First time this id was seen.
    New,
    /// The id had been recorded as missing and has now arrived.
    Recovered,
    /// The id had already been received.
    Duplicate,
}

/// Acknowledgement batch for one processed arrival batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckBatch(pub Vec<SeqId>);

impl From<AckBatch> for Frame {
    fn from(batch: AckBatch) -> Self {
        Frame::Ack(batch.0)
    }
}

/// Everything the caller needs after processing one arrival batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Ids to acknowledge, in arrival order.
    pub ack: AckBatch,
    /// Ids counted as received by this batch (new or recovered).
    pub delivered: Vec<SeqId>,
    /// Gaps discovered while reconciling after this batch.
    pub new_gaps: Vec<SeqId>,
}

/// Receive-side state for one run.
#[derive(Debug, Default)]
pub struct ReceiverTracker {
    received: HashSet<SeqId>,
    missing: BTreeSet<SeqId>,
    /// `None` until the first arrival.
    highest_seq_received: Option<SeqId>,
    total_received: u64,
    total_expected: u64,
    /// Times each id was recovered from the missing set.
    recoveries: BTreeMap<SeqId, u32>,
}

impl ReceiverTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one arriving id.
    pub fn on_arrival(&mut self, id: SeqId) -> Arrival {
        self.total_expected += 1;
        self.highest_seq_received = Some(match self.highest_seq_received {
            Some(highest) => highest.max(id),
            None => id,
        });

        if self.missing.remove(&id) {
            self.received.insert(id);
            self.total_received += 1;
            *self.recoveries.entry(id).or_insert(0) += 1;
            Arrival::Recovered
        } else if self.received.insert(id) {
            self.total_received += 1;
            Arrival::New
        } else {
            Arrival::Duplicate
        }
    }

    /// Mark every id in `[0, highest_seq_received]` that is neither received
    /// nor already missing as missing.  Returns the newly marked ids.
    ///
    /// Scans the full range on every call, so the cost of a batch grows with
    /// the highest id seen.
    pub fn reconcile_gaps(&mut self) -> Vec<SeqId> {
        let Some(highest) = self.highest_seq_received else {
            return Vec::new();
        };
        let mut new_gaps = Vec::new();
        for id in 0..=highest {
            if !self.received.contains(&id) && self.missing.insert(id) {
                new_gaps.push(id);
            }
        }
        new_gaps
    }

    /// Wrap processed ids, in arrival order, for transmission to the sender.
    pub fn build_ack_batch(&self, ids: &[SeqId]) -> AckBatch {
        AckBatch(ids.to_vec())
    }

    /// Process a whole arrival batch: every arrival, then gap
    /// reconciliation, then the ACK batch.
    pub fn process_batch(&mut self, ids: &[SeqId]) -> BatchOutcome {
        let mut delivered = Vec::new();
        for &id in ids {
            match self.on_arrival(id) {
                Arrival::New | Arrival::Recovered => delivered.push(id),
                Arrival::Duplicate => {}
            }
        }
        let new_gaps = self.reconcile_gaps();
        BatchOutcome {
            ack: self.build_ack_batch(ids),
            delivered,
            new_gaps,
        }
    }

    /// `total_received / total_expected`, or `None` before any arrival.
    pub fn goodput(&self) -> Option<f64> {
        if self.total_expected == 0 {
            return None;
        }
        Some(self.total_received as f64 / self.total_expected as f64)
    }

    /// Rough receive-window estimate: distance from the lowest missing id to
    /// the highest received one, or the highest id when nothing is missing.
    pub fn window_estimate(&self) -> u64 {
        let Some(highest) = self.highest_seq_received else {
            return 0;
        };
        match self.missing.first() {
            Some(&lowest_missing) => u64::from(highest.saturating_sub(lowest_missing)),
            None => u64::from(highest),
        }
    }

    pub fn highest_seq_received(&self) -> Option<SeqId> {
        self.highest_seq_received
    }

    pub fn total_received(&self) -> u64 {
        self.total_received
    }

    pub fn total_expected(&self) -> u64 {
        self.total_expected
    }

    pub fn is_received(&self, id: SeqId) -> bool {
        self.received.contains(&id)
    }

    pub fn is_missing(&self, id: SeqId) -> bool {
        self.missing.contains(&id)
    }

    /// Currently missing ids, ascending.
    pub fn missing(&self) -> impl Iterator<Item = SeqId> + '_ {
        self.missing.iter().copied()
    }

    pub fn missing_count(&self) -> usize {
        self.missing.len()
    }

    pub fn received_count(&self) -> usize {
        self.received.len()
    }

    /// Recovery count per id that was ever missing and later arrived.
    pub fn recoveries(&self) -> &BTreeMap<SeqId, u32> {
        &self.recoveries
    }

    /// Histogram: number of recoveries → number of ids.
    pub fn recovery_histogram(&self) -> BTreeMap<u32, u64> {
        let mut histogram = BTreeMap::new();
        for &count in self.recoveries.values() {
            *histogram.entry(count).or_insert(0) += 1;
        }
        histogram
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
