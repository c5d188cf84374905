//! Throttled persistence scheduling.
//!
//! Save requests inside a replicant's persistence interval collapse into
//! one tail write at `last_save + interval`. The state loop polls
//! `next_deadline` for its select timer and drains due keys when the
//! timer fires.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

use crate::core::{NamespaceId, ReplicantName};

#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct SaveKey {
    pub namespace: NamespaceId,
    pub name: ReplicantName,
}

#[derive(Default)]
pub struct SaveScheduler {
    last_save: HashMap<SaveKey, Instant>,
    pending: HashMap<SaveKey, Instant>,
    heap: BinaryHeap<Reverse<(Instant, SaveKey)>>,
}

impl SaveScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a save. Requests for a key already pending are squashed.
    pub fn request_save(&mut self, key: SaveKey, interval: Duration, now: Instant) {
        if self.pending.contains_key(&key) {
            return;
        }
        let fire_at = match self.last_save.get(&key) {
            Some(last) if *last + interval > now => *last + interval,
            _ => now,
        };
        self.pending.insert(key.clone(), fire_at);
        self.heap.push(Reverse((fire_at, key)));
    }

    /// Re-arm after a failed write: one full interval from now, so a
    /// persistently failing key cannot spin the loop.
    pub fn request_retry(&mut self, key: SaveKey, interval: Duration, now: Instant) {
        if self.pending.contains_key(&key) {
            return;
        }
        let fire_at = now + interval;
        self.pending.insert(key.clone(), fire_at);
        self.heap.push(Reverse((fire_at, key)));
    }

    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.pop_stale();
        self.heap.peek().map(|Reverse((t, _))| *t)
    }

    /// Keys whose deadline has passed. The caller performs the writes and
    /// reports back via `mark_saved`.
    pub fn drain_due(&mut self, now: Instant) -> Vec<SaveKey> {
        let mut due = Vec::new();
        loop {
            self.pop_stale();
            let Some(Reverse((fire_at, key))) = self.heap.peek().cloned() else {
                break;
            };
            if fire_at > now {
                break;
            }
            let _ = self.heap.pop();
            if self.pending.get(&key).copied() == Some(fire_at) {
                self.pending.remove(&key);
                due.push(key);
            }
        }
        due
    }

    pub fn mark_saved(&mut self, key: &SaveKey, now: Instant) {
        self.last_save.insert(key.clone(), now);
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    // Heap entries whose pending slot was consumed or rescheduled.
    fn pop_stale(&mut self) {
        while let Some(Reverse((fire_at, key))) = self.heap.peek() {
            if self.pending.get(key).copied() == Some(*fire_at) {
                break;
            }
            let _ = self.heap.pop();
        }
    }
}
