//! # Pending Queue
//!
//! Per-stream, insertion-ordered buffer of entries awaiting upload.
//!
//! ## Entry Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   push ──► pending [e1 e2 e3 e4]                                        │
//! │                      │                                                  │
//! │            take_batch(2)                                                │
//! │                      ▼                                                  │
//! │            in_flight [e1 e2]     pending [e3 e4]                        │
//! │                 │                                                       │
//! │       ┌─────────┴──────────┐                                            │
//! │       │ ack                │ requeue                                    │
//! │       ▼                    ▼                                            │
//! │   dropped, or          pending [e1 e2 e3 e4]                            │
//! │   sent buffer          (front, original order)                          │
//! │                                                                         │
//! │   Beyond max_len the oldest pending entries are evicted.                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! At most one snapshot is in flight, so an entry is never sent twice
//! concurrently and never reordered relative to its neighbours.

use std::collections::VecDeque;

use lumen_core::BatchEntry;

#[derive(Debug, Default)]
pub struct PendingQueue {
    pending: VecDeque<BatchEntry>,
    in_flight: Option<Vec<BatchEntry>>,
    sent: Vec<BatchEntry>,
    /// 0 = unbounded.
    max_len: usize,
    evicted_total: u64,
}

impl PendingQueue {
    pub fn new(max_len: usize) -> Self {
        PendingQueue {
            max_len,
            ..Default::default()
        }
    }

    /// Applies a new bound; takes effect on the next push or requeue.
    pub fn set_max_len(&mut self, max_len: usize) {
        self.max_len = max_len;
    }

    /// Appends `entry`, returning how many old entries were evicted.
    pub fn push(&mut self, entry: BatchEntry) -> usize {
        self.pending.push_back(entry);
        self.enforce_bound()
    }

    fn enforce_bound(&mut self) -> usize {
        if self.max_len == 0 || self.pending.len() <= self.max_len {
            return 0;
        }
        let excess = self.pending.len() - self.max_len;
        self.pending.drain(..excess);
        self.evicted_total += excess as u64;
        excess
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn has_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.as_ref().map_or(0, Vec::len)
    }

    pub fn evicted_total(&self) -> u64 {
        self.evicted_total
    }

    /// Moves up to `max` entries from the front into the in-flight slot.
    ///
    /// Returns `None` when nothing is pending or a snapshot is already out.
    pub fn take_batch(&mut self, max: usize) -> Option<Vec<BatchEntry>> {
        if self.in_flight.is_some() || self.pending.is_empty() || max == 0 {
            return None;
        }
        let count = max.min(self.pending.len());
        let batch: Vec<BatchEntry> = self.pending.drain(..count).collect();
        self.in_flight = Some(batch.clone());
        Some(batch)
    }

    /// Confirms the in-flight snapshot, returning its size.
    pub fn ack(&mut self, retain: bool) -> usize {
        let Some(batch) = self.in_flight.take() else {
            return 0;
        };
        let count = batch.len();
        if retain {
            self.sent.extend(batch);
        }
        count
    }

    /// Puts the in-flight snapshot back at the front in its original
    /// order. Returns `(requeued, evicted)`.
    pub fn requeue(&mut self) -> (usize, usize) {
        let Some(batch) = self.in_flight.take() else {
            return (0, 0);
        };
        let count = batch.len();
        for entry in batch.into_iter().rev() {
            self.pending.push_front(entry);
        }
        (count, self.enforce_bound())
    }

    /// Confirmed entries kept when retention is on.
    pub fn take_sent(&mut self) -> Vec<BatchEntry> {
        std::mem::take(&mut self.sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn entry(name: &str) -> BatchEntry {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        BatchEntry::new(name, json!({ "n": name }), ts)
    }

    fn names(queue: &mut PendingQueue) -> Vec<String> {
        let batch = queue.take_batch(usize::MAX).unwrap_or_default();
        queue.requeue();
        batch.into_iter().map(|e| e.name).collect()
    }

    #[test]
    fn test_failed_batch_requeued_in_order() {
        let mut queue = PendingQueue::new(0);
        for name in ["e1", "e2", "e3"] {
            queue.push(entry(name));
        }

        let batch = queue.take_batch(2).unwrap();
        assert_eq!(batch.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(), ["e1", "e2"]);
        assert_eq!(queue.len(), 1);

        queue.push(entry("e4"));
        assert_eq!(queue.requeue(), (2, 0));
        assert_eq!(names(&mut queue), ["e1", "e2", "e3", "e4"]);
    }

    #[test]
    fn test_single_snapshot_in_flight() {
        let mut queue = PendingQueue::new(0);
        queue.push(entry("a"));
        queue.push(entry("b"));

        assert!(queue.take_batch(1).is_some());
        assert!(queue.take_batch(1).is_none());
        assert_eq!(queue.in_flight_len(), 1);

        assert_eq!(queue.ack(false), 1);
        assert!(!queue.has_in_flight());
        assert_eq!(queue.take_batch(5).unwrap()[0].name, "b");
    }

    #[test]
    fn test_eviction_drops_oldest() {
        let mut queue = PendingQueue::new(3);
        let evicted: usize = ["a", "b", "c", "d", "e"].iter().map(|n| queue.push(entry(n))).sum();

        assert_eq!(evicted, 2);
        assert_eq!(queue.evicted_total(), 2);
        assert_eq!(names(&mut queue), ["c", "d", "e"]);
    }

    #[test]
    fn test_requeue_respects_bound() {
        let mut queue = PendingQueue::new(3);
        queue.push(entry("a"));
        queue.push(entry("b"));
        queue.take_batch(2).unwrap();
        for name in ["c", "d", "e"] {
            queue.push(entry(name));
        }

        assert_eq!(queue.requeue(), (2, 2));
        assert_eq!(names(&mut queue), ["c", "d", "e"]);
    }

    #[test]
    fn test_retained_after_ack() {
        let mut queue = PendingQueue::new(0);
        queue.push(entry("kept"));
        queue.take_batch(10).unwrap();
        queue.ack(true);

        let sent = queue.take_sent();
        assert_eq!(sent.len(), 1);
        assert!(queue.take_sent().is_empty());
    }
}
