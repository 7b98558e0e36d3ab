//! Per-run ordering and duplicate suppression
//!
//! The producer numbers events 1, 2, 3, ... within each `run_id`. The
//! network may reorder, duplicate, or drop them around reconnects. The
//! [`RunSequencer`] releases events to the reconciler exactly once and in
//! sequence order:
//!
//! - an event for a new `run_id` discards all ordering state of the old run
//! - an already-applied key, or a sequence at or below the last applied one,
//!   is dropped
//! - an event ahead of its turn waits in a buffer until the gap fills
//!
//! A gap that never fills leaves later events buffered indefinitely. That
//! state is visible through [`RunSequencer::pending_len`].

use std::collections::{BTreeMap, HashSet, VecDeque};

use serde::Serialize;

use crate::envelope::EventEnvelope;

/// Default number of applied keys remembered per run
pub const DEFAULT_DEDUP_WINDOW: usize = 1000;

/// Counters describing what the sequencer has done with its input
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SequencerStats {
    /// Events handed to the reconciler
    pub released: u64,
    /// Events dropped because their key was already applied or buffered
    pub duplicates: u64,
    /// Events dropped because their sequence was already passed
    pub stale: u64,
    /// Events parked ahead of a gap
    pub buffered: u64,
    /// Times a new run_id discarded the ordering state
    pub run_resets: u64,
}

/// Insertion-ordered set of applied keys with FIFO eviction
#[derive(Debug)]
struct AppliedKeys {
    order: VecDeque<String>,
    members: HashSet<String>,
    capacity: usize,
}

impl AppliedKeys {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            members: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.members.contains(key)
    }

    fn insert(&mut self, key: String) {
        if !self.members.insert(key.clone()) {
            return;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }
}

/// Ordering state for the currently active run
#[derive(Debug)]
pub struct RunSequencer {
    current_run_id: Option<String>,
    last_applied: u64,
    applied: AppliedKeys,
    pending: BTreeMap<u64, EventEnvelope>,
    stats: SequencerStats,
}

impl Default for RunSequencer {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_WINDOW)
    }
}

impl RunSequencer {
    /// Create a sequencer remembering at most `dedup_window` applied keys
    pub fn new(dedup_window: usize) -> Self {
        Self {
            current_run_id: None,
            last_applied: 0,
            applied: AppliedKeys::new(dedup_window),
            pending: BTreeMap::new(),
            stats: SequencerStats::default(),
        }
    }

    /// Accept one envelope and return the envelopes that may now be applied,
    /// in sequence order. Never fails.
    pub fn ingest(&mut self, envelope: EventEnvelope) -> Vec<EventEnvelope> {
        if self.current_run_id.as_deref() != Some(envelope.run_id.as_str()) {
            self.reset_for_run(&envelope.run_id);
        }

        let key = envelope.dedup_key();
        if self.applied.contains(&key) {
            self.stats.duplicates += 1;
            tracing::debug!(key = %key, "Dropping duplicate event");
            return Vec::new();
        }

        let seq = envelope.sequence_id;
        if seq <= self.last_applied {
            self.stats.stale += 1;
            tracing::debug!(
                run_id = %envelope.run_id,
                sequence_id = seq,
                last_applied = self.last_applied,
                "Dropping stale event"
            );
            return Vec::new();
        }

        if seq > self.last_applied + 1 {
            if self.pending.contains_key(&seq) {
                self.stats.duplicates += 1;
                tracing::debug!(key = %key, "Dropping duplicate of buffered event");
            } else {
                self.stats.buffered += 1;
                tracing::debug!(
                    run_id = %envelope.run_id,
                    sequence_id = seq,
                    waiting_for = self.last_applied + 1,
                    "Buffering out-of-order event"
                );
                self.pending.insert(seq, envelope);
            }
            return Vec::new();
        }

        let mut released = vec![envelope];
        self.mark_applied(key, seq);

        while let Some(next) = self.pending.remove(&(self.last_applied + 1)) {
            self.mark_applied(next.dedup_key(), next.sequence_id);
            released.push(next);
        }

        self.stats.released += released.len() as u64;
        released
    }

    fn mark_applied(&mut self, key: String, seq: u64) {
        self.last_applied = seq;
        self.applied.insert(key);
    }

    fn reset_for_run(&mut self, run_id: &str) {
        if let Some(previous) = &self.current_run_id {
            self.stats.run_resets += 1;
            tracing::info!(
                previous_run = %previous,
                new_run = %run_id,
                dropped_pending = self.pending.len(),
                "New run detected, resetting ordering state"
            );
        }
        self.current_run_id = Some(run_id.to_string());
        self.last_applied = 0;
        self.applied.clear();
        self.pending.clear();
    }

    /// Run currently being ordered, if any event has arrived yet
    pub fn current_run_id(&self) -> Option<&str> {
        self.current_run_id.as_deref()
    }

    /// Highest sequence handed to the reconciler in this run (0 if none)
    pub fn last_applied(&self) -> u64 {
        self.last_applied
    }

    /// Number of events waiting for a missing predecessor
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Sequence the buffer is waiting for, when anything is buffered
    pub fn waiting_for(&self) -> Option<u64> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.last_applied + 1)
        }
    }

    /// Number of applied keys currently remembered
    pub fn applied_key_count(&self) -> usize {
        self.applied.len()
    }

    pub fn stats(&self) -> SequencerStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env(run: &str, seq: u64) -> EventEnvelope {
        EventEnvelope {
            event_type: "story_status".to_string(),
            timestamp: 1760000000.0,
            run_id: run.to_string(),
            sequence_id: seq,
            data: json!({}),
        }
    }

    fn seqs(events: &[EventEnvelope]) -> Vec<u64> {
        events.iter().map(|e| e.sequence_id).collect()
    }

    #[test]
    fn test_in_order_events_release_immediately() {
        let mut seq = RunSequencer::default();
        assert_eq!(seqs(&seq.ingest(env("r1", 1))), vec![1]);
        assert_eq!(seqs(&seq.ingest(env("r1", 2))), vec![2]);
        assert_eq!(seq.last_applied(), 2);
        assert_eq!(seq.current_run_id(), Some("r1"));
    }

    #[test]
    fn test_out_of_order_pair_is_buffered_then_released() {
        let mut seq = RunSequencer::default();
        assert!(seq.ingest(env("r1", 2)).is_empty());
        assert_eq!(seq.pending_len(), 1);
        assert_eq!(seq.waiting_for(), Some(1));

        assert_eq!(seqs(&seq.ingest(env("r1", 1))), vec![1, 2]);
        assert_eq!(seq.pending_len(), 0);
        assert_eq!(seq.waiting_for(), None);
    }

    #[test]
    fn test_every_permutation_releases_in_order() {
        fn permutations(items: Vec<u64>) -> Vec<Vec<u64>> {
            if items.len() <= 1 {
                return vec![items];
            }
            let mut out = Vec::new();
            for i in 0..items.len() {
                let mut rest = items.clone();
                let head = rest.remove(i);
                for mut tail in permutations(rest) {
                    tail.insert(0, head);
                    out.push(tail);
                }
            }
            out
        }

        for order in permutations(vec![1, 2, 3, 4, 5]) {
            let mut seq = RunSequencer::default();
            let released: Vec<u64> = order
                .iter()
                .flat_map(|s| seqs(&seq.ingest(env("r1", *s))))
                .collect();
            assert_eq!(released, vec![1, 2, 3, 4, 5], "order {:?}", order);
        }
    }

    #[test]
    fn test_duplicate_is_never_released_twice() {
        let mut seq = RunSequencer::default();
        assert_eq!(seq.ingest(env("r1", 1)).len(), 1);
        assert!(seq.ingest(env("r1", 1)).is_empty());
        assert_eq!(seq.stats().duplicates, 1);
        assert_eq!(seq.stats().released, 1);
    }

    #[test]
    fn test_duplicate_of_buffered_event_keeps_first_copy() {
        let mut seq = RunSequencer::default();
        let mut first = env("r1", 3);
        first.data = json!({"copy": 1});
        let mut second = env("r1", 3);
        second.data = json!({"copy": 2});

        assert!(seq.ingest(first).is_empty());
        assert!(seq.ingest(second).is_empty());
        seq.ingest(env("r1", 1));
        let released = seq.ingest(env("r1", 2));

        assert_eq!(seqs(&released), vec![2, 3]);
        assert_eq!(released[1].data, json!({"copy": 1}));
    }

    #[test]
    fn test_stale_sequence_with_different_key_is_dropped() {
        let mut seq = RunSequencer::default();
        seq.ingest(env("r1", 1));
        seq.ingest(env("r1", 2));

        let mut other_kind = env("r1", 1);
        other_kind.event_type = "workflow_status".to_string();
        assert!(seq.ingest(other_kind).is_empty());
        assert_eq!(seq.stats().stale, 1);
        assert_eq!(seq.last_applied(), 2);
    }

    #[test]
    fn test_new_run_resets_ordering() {
        let mut seq = RunSequencer::default();
        for s in 1..=7 {
            seq.ingest(env("A", s));
        }
        seq.ingest(env("A", 9));
        assert_eq!(seq.pending_len(), 1);

        assert_eq!(seqs(&seq.ingest(env("B", 1))), vec![1]);
        assert_eq!(seq.current_run_id(), Some("B"));
        assert_eq!(seq.pending_len(), 0);
        assert_eq!(seq.last_applied(), 1);
        assert_eq!(seq.stats().run_resets, 1);
    }

    #[test]
    fn test_new_run_starting_mid_sequence_waits_for_its_first_event() {
        let mut seq = RunSequencer::default();
        seq.ingest(env("A", 1));

        assert!(seq.ingest(env("B", 3)).is_empty());
        assert_eq!(seq.last_applied(), 0);
        assert_eq!(seqs(&seq.ingest(env("B", 1))), vec![1]);
        assert_eq!(seqs(&seq.ingest(env("B", 2))), vec![2, 3]);
    }

    #[test]
    fn test_returning_to_old_run_is_a_fresh_run() {
        let mut seq = RunSequencer::default();
        seq.ingest(env("A", 1));
        seq.ingest(env("B", 1));
        assert_eq!(seqs(&seq.ingest(env("A", 1))), vec![1]);
    }

    #[test]
    fn test_applied_keys_stay_bounded() {
        let mut seq = RunSequencer::default();
        for s in 1..=1500 {
            seq.ingest(env("r1", s));
            assert!(seq.applied_key_count() <= DEFAULT_DEDUP_WINDOW);
        }
        assert_eq!(seq.applied_key_count(), DEFAULT_DEDUP_WINDOW);
        assert_eq!(seq.last_applied(), 1500);
    }

    #[test]
    fn test_eviction_is_fifo_by_insertion() {
        let mut keys = AppliedKeys::new(2);
        keys.insert("b".to_string());
        keys.insert("a".to_string());
        keys.insert("c".to_string());

        assert!(!keys.contains("b"));
        assert!(keys.contains("a"));
        assert!(keys.contains("c"));
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_gap_that_never_fills_stays_buffered() {
        let mut seq = RunSequencer::new(10);
        seq.ingest(env("r1", 1));
        for s in 3..=6 {
            assert!(seq.ingest(env("r1", s)).is_empty());
        }
        assert_eq!(seq.pending_len(), 4);
        assert_eq!(seq.waiting_for(), Some(2));
        assert_eq!(seq.stats().buffered, 4);
    }
}
