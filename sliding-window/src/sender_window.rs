//! Send-side sliding-window state machine.
//!
//! [`SenderWindow`] admits new sequence ids while the window has room,
//! records which attempts were lost, consumes ACK batches, and grows the
//! window when everything outstanding has been acknowledged.
//!
//! # Protocol contract
//!
//! - At most `window_size` ids lie in `[base, next_seq)` at any time.
//! - ACKs are **selective**: an ACK batch names individual ids.  `base` still
//!   only advances across a *contiguous* run of acknowledged ids, so a hole at
//!   `base` stalls the window even when later ids are acknowledged.
//! - A lost attempt is still recorded as sent; it is distinguished only by
//!   sitting in the retransmission queue until it is re-sent or acknowledged.
//! - Window growth is additive and bounded: +1 each time a slide leaves no
//!   unacknowledged id behind, never beyond `max_window`, never shrinking.
//! - Ids are not wrapped.  Production stops at `min(total_packets, max_seq)`.
//!
//! This module only manages state; the loss decision and all I/O belong to
//! the caller (see [`crate::sender`]).
//!
//! Entries are never evicted from the window map.  Memory grows with the
//! number of ids admitted in a run, which is bounded by `max_seq`.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::config::{SenderConfig, DEFAULT_MAX_SEQ, DEFAULT_MAX_WINDOW};
use crate::simulator::LossModel;
use crate::SeqId;

// ---------------------------------------------------------------------------
// WindowEntry
// ---------------------------------------------------------------------------

/// Per-id bookkeeping for one admitted sequence id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowEntry {
    /// A transmission was attempted (set on admission, even when dropped).
    pub sent: bool,
    /// A matching ACK has been processed.
    pub acked: bool,
}

// ---------------------------------------------------------------------------
// RetransmitRound
// ---------------------------------------------------------------------------

/// Outcome of one pass over the retransmission queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetransmitRound {
    /// Ids whose retransmission survived the loss model; they must be put on
    /// the wire by the caller and have left the queue.
    pub resent: Vec<SeqId>,
    /// Ids lost again; they stay queued for the next round.
    pub dropped: Vec<SeqId>,
}

impl RetransmitRound {
    pub fn is_empty(&self) -> bool {
        self.resent.is_empty() && self.dropped.is_empty()
    }
}

// ---------------------------------------------------------------------------
// SenderWindow
// ---------------------------------------------------------------------------

/// Sliding-window send state for one run.
///
/// # Sequence-id layout
///
/// ```text
///   base                 next_seq         base + window_size
///     │                     │                    │
///  ───┼─────────────────────┼────────────────────┼──────▶ id space
///     │ <── outstanding ──▶ │ <── admissible ──▶ │
/// ```
#[derive(Debug)]
pub struct SenderWindow {
    /// Oldest id not yet known to be acknowledged (left window edge).
    base: SeqId,
    /// Id handed out by the next successful [`admit_next`](Self::admit_next).
    next_seq: SeqId,
    /// Current window capacity.
    window_size: usize,
    /// Growth ceiling for `window_size`.
    max_window: usize,
    /// Size of the sequence space.
    max_seq: SeqId,
    /// Ids `0..total_packets` make up the run.
    total_packets: SeqId,

    window: HashMap<SeqId, WindowEntry>,
    retransmission_queue: BTreeSet<SeqId>,
    /// Successful retransmissions per id; 0 for an id lost but not yet re-sent.
    retransmission_counts: BTreeMap<SeqId, u32>,
    /// Every id whose first attempt was dropped.
    dropped: HashSet<SeqId>,

    sent_packets: u64,
    acked_packets: u64,
}

impl SenderWindow {
    /// Create a window with the default cap and sequence space.
    ///
    /// The initial size is clamped to the default cap.
    ///
    /// # Panics
    ///
    /// Panics if `window_size` is 0.
    pub fn new(window_size: usize, total_packets: SeqId) -> Self {
        Self::with_limits(window_size, DEFAULT_MAX_WINDOW, DEFAULT_MAX_SEQ, total_packets)
    }

    /// Create a window with explicit limits.
    ///
    /// An initial `window_size` above `max_window` is clamped to the cap.
    ///
    /// # Panics
    ///
    /// Panics if `window_size` or `max_window` is 0.
    pub fn with_limits(
        window_size: usize,
        max_window: usize,
        max_seq: SeqId,
        total_packets: SeqId,
    ) -> Self {
        assert!(window_size >= 1, "window_size must be at least 1");
        assert!(max_window >= 1, "max_window must be at least 1");
        Self {
            base: 0,
            next_seq: 0,
            window_size: window_size.min(max_window),
            max_window,
            max_seq,
            total_packets,
            window: HashMap::new(),
            retransmission_queue: BTreeSet::new(),
            retransmission_counts: BTreeMap::new(),
            dropped: HashSet::new(),
            sent_packets: 0,
            acked_packets: 0,
        }
    }

    /// Create a window from a validated [`SenderConfig`].
    pub fn from_config(config: &SenderConfig) -> Self {
        Self::with_limits(
            config.window_size,
            config.max_window,
            config.max_seq,
            config.total_packets,
        )
    }

    // -----------------------------------------------------------------------
    // Admission
    // -----------------------------------------------------------------------

    /// Last id (exclusive) this run will ever produce.
    pub fn limit(&self) -> SeqId {
        self.total_packets.min(self.max_seq)
    }

    /// `true` when [`admit_next`](Self::admit_next) would hand out an id.
    pub fn can_admit(&self) -> bool {
        self.outstanding() < self.window_size && self.next_seq < self.limit()
    }

    /// Admit the next sequence id into the window.
    ///
    /// Returns `None` when the window is full or the run has produced every
    /// id.  The returned id is recorded as sent; if the caller's loss model
    /// then drops the attempt it must call [`mark_lost`](Self::mark_lost).
    pub fn admit_next(&mut self) -> Option<SeqId> {
        if !self.can_admit() {
            return None;
        }
        let id = self.next_seq;
        self.window.insert(id, WindowEntry { sent: true, acked: false });
        self.next_seq += 1;
        self.sent_packets += 1;
        Some(id)
    }

    /// Record that the transmission attempt for `id` was dropped.
    ///
    /// Ids that were never admitted, or are already acknowledged, are ignored.
    pub fn mark_lost(&mut self, id: SeqId) {
        match self.window.get(&id) {
            Some(entry) if !entry.acked => {}
            _ => return,
        }
        self.retransmission_queue.insert(id);
        self.dropped.insert(id);
        self.retransmission_counts.entry(id).or_insert(0);
    }

    // -----------------------------------------------------------------------
    // Acknowledgement
    // -----------------------------------------------------------------------

    /// Process one ACK batch.
    ///
    /// Marks every listed, admitted, not-yet-acknowledged id as acknowledged
    /// and removes it from the retransmission queue.  Unknown and repeated ids
    /// are ignored.  When the batch acknowledged anything new the window is
    /// slid and possibly grown.
    ///
    /// Returns the number of newly acknowledged ids; `0` means the batch was
    /// a no-op.
    pub fn on_ack_batch<I>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = SeqId>,
    {
        let mut newly_acked = 0usize;
        for id in ids {
            let Some(entry) = self.window.get_mut(&id) else {
                continue;
            };
            if entry.acked {
                continue;
            }
            entry.acked = true;
            self.acked_packets += 1;
            self.retransmission_queue.remove(&id);
            newly_acked += 1;
        }
        if newly_acked > 0 {
            self.slide_and_grow();
        }
        newly_acked
    }

    /// Advance `base` over acknowledged ids, then grow the window by one if
    /// every id in `[base, next_seq)` is acknowledged.
    ///
    /// The all-acknowledged check re-scans the whole outstanding range on
    /// every call.  Returns `true` if the window grew.
    pub fn slide_and_grow(&mut self) -> bool {
        while self.is_acked(self.base) {
            self.base += 1;
        }

        let all_acked = (self.base..self.next_seq).all(|id| self.is_acked(id));
        if all_acked && self.window_size < self.max_window {
            self.window_size += 1;
            return true;
        }
        false
    }

    // -----------------------------------------------------------------------
    // Retransmission
    // -----------------------------------------------------------------------

    /// Attempt to resend every queued id, consulting `loss` once per id.
    ///
    /// Queued ids are visited in ascending order.  Survivors leave the queue
    /// and have their retransmission counter incremented; the caller must put
    /// them on the wire.  Ids lost again stay queued.
    pub fn drain_retransmissions<L>(&mut self, loss: &mut L) -> RetransmitRound
    where
        L: LossModel + ?Sized,
    {
        let mut round = RetransmitRound::default();
        let queued: Vec<SeqId> = self.retransmission_queue.iter().copied().collect();
        for id in queued {
            if loss.should_drop() {
                round.dropped.push(id);
                continue;
            }
            self.retransmission_queue.remove(&id);
            *self.retransmission_counts.entry(id).or_insert(0) += 1;
            round.resent.push(id);
        }
        round
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn base(&self) -> SeqId {
        self.base
    }

    pub fn next_seq(&self) -> SeqId {
        self.next_seq
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn max_window(&self) -> usize {
        self.max_window
    }

    /// Ids admitted but not yet slid past (`next_seq - base`).
    pub fn outstanding(&self) -> usize {
        (self.next_seq - self.base) as usize
    }

    /// Distinct ids admitted so far.
    pub fn sent_packets(&self) -> u64 {
        self.sent_packets
    }

    /// Distinct ids acknowledged so far.
    pub fn acked_packets(&self) -> u64 {
        self.acked_packets
    }

    /// Distinct ids whose first attempt was dropped.
    pub fn dropped_count(&self) -> usize {
        self.dropped.len()
    }

    pub fn entry(&self, id: SeqId) -> Option<WindowEntry> {
        self.window.get(&id).copied()
    }

    pub fn is_queued(&self, id: SeqId) -> bool {
        self.retransmission_queue.contains(&id)
    }

    /// Ids waiting for retransmission, ascending.
    pub fn retransmission_queue(&self) -> impl Iterator<Item = SeqId> + '_ {
        self.retransmission_queue.iter().copied()
    }

    /// Successful retransmissions per id, for every id that was ever lost.
    pub fn retransmission_counts(&self) -> &BTreeMap<SeqId, u32> {
        &self.retransmission_counts
    }

    /// Histogram: number of retransmissions → number of ids.
    pub fn retransmission_histogram(&self) -> BTreeMap<u32, u64> {
        let mut histogram = BTreeMap::new();
        for &count in self.retransmission_counts.values() {
            *histogram.entry(count).or_insert(0) += 1;
        }
        histogram
    }

    /// `true` once every id of the run was admitted and acknowledged.
    pub fn is_complete(&self) -> bool {
        let limit = self.limit();
        self.next_seq == limit && self.base == limit
    }

    fn is_acked(&self, id: SeqId) -> bool {
        self.window.get(&id).is_some_and(|e| e.acked)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::ScriptedLoss;

    /// Helper: admit ids until the window refuses.
    fn fill(w: &mut SenderWindow) -> Vec<SeqId> {
        std::iter::from_fn(|| w.admit_next()).collect()
    }

    #[test]
    fn initial_state() {
        let w = SenderWindow::new(10, 1000);
        assert_eq!(w.base(), 0);
        assert_eq!(w.next_seq(), 0);
        assert_eq!(w.window_size(), 10);
        assert!(w.can_admit());
        assert_eq!(w.outstanding(), 0);
        assert!(!w.is_complete());
    }

    #[test]
    fn admission_stops_at_window_size() {
        let mut w = SenderWindow::new(4, 1000);
        assert_eq!(fill(&mut w), vec![0, 1, 2, 3]);
        assert!(!w.can_admit());
        assert_eq!(w.admit_next(), None);
        assert_eq!(w.sent_packets(), 4);
        assert_eq!(w.entry(2), Some(WindowEntry { sent: true, acked: false }));
    }

    #[test]
    fn admission_stops_at_total_packets() {
        let mut w = SenderWindow::new(10, 3);
        assert_eq!(fill(&mut w), vec![0, 1, 2]);
        assert_eq!(w.next_seq(), 3);
    }

    #[test]
    fn admission_stops_at_max_seq() {
        let mut w = SenderWindow::with_limits(10, 100, 5, 1_000_000);
        assert_eq!(fill(&mut w), vec![0, 1, 2, 3, 4]);
        assert_eq!(w.limit(), 5);
    }

    #[test]
    fn full_ack_slides_and_grows() {
        let mut w = SenderWindow::new(10, 1000);
        fill(&mut w);
        let acked = w.on_ack_batch(0..10);
        assert_eq!(acked, 10);
        assert_eq!(w.base(), 10);
        assert_eq!(w.window_size(), 11);
        assert_eq!(w.acked_packets(), 10);
    }

    #[test]
    fn gap_at_base_blocks_slide() {
        let mut w = SenderWindow::new(10, 1000);
        fill(&mut w);
        w.on_ack_batch([1, 2, 3]);
        assert_eq!(w.base(), 0);
        assert_eq!(w.window_size(), 10);
        assert!(!w.can_admit());

        w.on_ack_batch([0]);
        assert_eq!(w.base(), 4);
        assert_eq!(w.window_size(), 10); // 4..10 still outstanding
        assert_eq!(fill(&mut w), vec![10, 11, 12, 13]);
    }

    #[test]
    fn partial_slide_does_not_grow() {
        let mut w = SenderWindow::new(4, 1000);
        fill(&mut w);
        w.on_ack_batch([0, 1]);
        assert_eq!(w.base(), 2);
        assert_eq!(w.window_size(), 4);
    }

    #[test]
    fn repeated_ack_is_noop() {
        let mut w = SenderWindow::new(4, 1000);
        fill(&mut w);
        assert_eq!(w.on_ack_batch([0]), 1);
        let (base, size, acked) = (w.base(), w.window_size(), w.acked_packets());

        assert_eq!(w.on_ack_batch([0]), 0);
        assert_eq!(w.base(), base);
        assert_eq!(w.window_size(), size);
        assert_eq!(w.acked_packets(), acked);
    }

    #[test]
    fn unknown_ack_ignored() {
        let mut w = SenderWindow::new(4, 1000);
        fill(&mut w);
        assert_eq!(w.on_ack_batch([500, 9999]), 0);
        assert_eq!(w.base(), 0);
        assert_eq!(w.acked_packets(), 0);
    }

    #[test]
    fn window_size_capped() {
        let mut w = SenderWindow::with_limits(98, 100, 1 << 16, 10_000);
        for _ in 0..5 {
            let ids = fill(&mut w);
            w.on_ack_batch(ids);
        }
        assert_eq!(w.window_size(), 100);
    }

    #[test]
    fn initial_window_clamped_to_cap() {
        let mut w = SenderWindow::new(150, 10_000);
        assert_eq!(w.window_size(), DEFAULT_MAX_WINDOW);
        let ids = fill(&mut w);
        assert_eq!(ids.len(), DEFAULT_MAX_WINDOW);
        w.on_ack_batch(ids);
        assert_eq!(w.base(), DEFAULT_MAX_WINDOW as SeqId);
        assert_eq!(w.window_size(), DEFAULT_MAX_WINDOW);

        let w = SenderWindow::with_limits(8, 5, 1 << 16, 100);
        assert_eq!((w.window_size(), w.max_window()), (5, 5));
    }

    #[test]
    fn mark_lost_queues_and_keeps_sent_flag() {
        let mut w = SenderWindow::new(4, 1000);
        fill(&mut w);
        w.mark_lost(2);
        assert!(w.is_queued(2));
        assert_eq!(w.entry(2), Some(WindowEntry { sent: true, acked: false }));
        assert_eq!(w.dropped_count(), 1);
        assert_eq!(w.retransmission_counts().get(&2), Some(&0));
    }

    #[test]
    fn mark_lost_ignores_unknown_id() {
        let mut w = SenderWindow::new(4, 1000);
        w.mark_lost(7);
        assert!(!w.is_queued(7));
        assert_eq!(w.dropped_count(), 0);
    }

    #[test]
    fn ack_clears_retransmission_queue() {
        let mut w = SenderWindow::new(4, 1000);
        fill(&mut w);
        w.mark_lost(1);
        w.on_ack_batch([1]);
        assert!(!w.is_queued(1));
    }

    #[test]
    fn drain_keeps_lost_and_removes_resent() {
        let mut w = SenderWindow::new(4, 1000);
        fill(&mut w);
        w.mark_lost(1);
        w.mark_lost(3);

        // First attempt (id 1) delivered, second (id 3) lost again.
        let mut loss = ScriptedLoss::dropping([2]);
        let round = w.drain_retransmissions(&mut loss);
        assert_eq!(round.resent, vec![1]);
        assert_eq!(round.dropped, vec![3]);
        assert!(!w.is_queued(1));
        assert!(w.is_queued(3));
        assert_eq!(w.retransmission_counts().get(&1), Some(&1));
        assert_eq!(w.retransmission_counts().get(&3), Some(&0));

        let round = w.drain_retransmissions(&mut loss);
        assert_eq!(round.resent, vec![3]);
        assert_eq!(loss.attempts(), 3);
    }

    #[test]
    fn drain_on_empty_queue_consults_nothing() {
        let mut w = SenderWindow::new(4, 1000);
        let mut loss = ScriptedLoss::lossless();
        assert!(w.drain_retransmissions(&mut loss).is_empty());
        assert_eq!(loss.attempts(), 0);
    }

    #[test]
    fn histogram_groups_by_count() {
        let mut w = SenderWindow::new(4, 1000);
        fill(&mut w);
        w.mark_lost(0);
        w.mark_lost(1);
        w.mark_lost(2);
        let mut loss = ScriptedLoss::dropping([3]); // id 2 lost again
        w.drain_retransmissions(&mut loss);

        let hist = w.retransmission_histogram();
        assert_eq!(hist.get(&0), Some(&1));
        assert_eq!(hist.get(&1), Some(&2));
    }

    #[test]
    fn completes_after_last_ack() {
        let mut w = SenderWindow::new(10, 3);
        let ids = fill(&mut w);
        assert!(!w.is_complete());
        w.on_ack_batch(ids);
        assert!(w.is_complete());
        assert!(!w.can_admit());
    }

    #[test]
    #[should_panic(expected = "window_size must be at least 1")]
    fn zero_window_rejected() {
        SenderWindow::new(0, 10);
    }
}
