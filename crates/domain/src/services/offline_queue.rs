//! Bounded, ordered offline queue.
//!
//! Entries are kept ordered by capture time (stable for equal times). When
//! the queue grows past its capacity, synced entries are evicted oldest
//! first, then unsynced ones. Evictions are counted and reported.

use std::collections::HashSet;

use uuid::Uuid;

use crate::models::{QueueEntry, QueueSnapshot, QueueStats};

/// Default capacity bound.
pub const DEFAULT_QUEUE_CAPACITY: usize = 2000;

/// Entries dropped because the queue exceeded its capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueOverflow {
    pub evicted_synced: usize,
    pub evicted_unsynced: usize,
}

impl QueueOverflow {
    pub fn total(&self) -> usize {
        self.evicted_synced + self.evicted_unsynced
    }
}

/// Result of an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    pub id: Uuid,
    pub overflow: Option<QueueOverflow>,
}

#[derive(Debug, Clone)]
pub struct OfflineQueue {
    entries: Vec<QueueEntry>,
    capacity: usize,
    evicted_synced: u64,
    evicted_unsynced: u64,
}

impl Default for OfflineQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl OfflineQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity: capacity.max(1),
            evicted_synced: 0,
            evicted_unsynced: 0,
        }
    }

    /// Rebuilds a queue from a persisted snapshot, re-applying order and
    /// the capacity bound.
    pub fn from_snapshot(snapshot: QueueSnapshot, capacity: usize) -> Self {
        let mut queue = Self::new(capacity);
        queue.evicted_synced = snapshot.evicted_synced;
        queue.evicted_unsynced = snapshot.evicted_unsynced;
        queue.entries = snapshot.entries;
        queue.entries.sort_by_key(|e| e.captured_at);
        queue.evict_oldest_beyond(queue.capacity);
        queue
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            entries: self.entries.clone(),
            evicted_synced: self.evicted_synced,
            evicted_unsynced: self.evicted_unsynced,
        }
    }

    /// Inserts an entry at its capture-time position, then enforces the
    /// capacity bound.
    pub fn append(&mut self, entry: QueueEntry) -> AppendOutcome {
        let id = entry.id;
        let idx = self
            .entries
            .partition_point(|e| e.captured_at <= entry.captured_at);
        self.entries.insert(idx, entry);

        let overflow = self.evict_oldest_beyond(self.capacity);
        AppendOutcome { id, overflow }
    }

    /// Unsynced entries in capture order.
    pub fn pending(&self) -> Vec<QueueEntry> {
        self.entries.iter().filter(|e| !e.synced).cloned().collect()
    }

    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.synced).count()
    }

    /// Flags the given entries as synced. Unknown ids are ignored; returns
    /// the number of entries newly flagged.
    pub fn mark_synced(&mut self, ids: &[Uuid]) -> usize {
        let ids: HashSet<&Uuid> = ids.iter().collect();
        let mut marked = 0;
        for entry in self.entries.iter_mut() {
            if !entry.synced && ids.contains(&entry.id) {
                entry.synced = true;
                marked += 1;
            }
        }
        marked
    }

    /// Drops entries until at most `capacity` remain: synced oldest first,
    /// then unsynced oldest first.
    pub fn evict_oldest_beyond(&mut self, capacity: usize) -> Option<QueueOverflow> {
        let excess = self.entries.len().saturating_sub(capacity);
        if excess == 0 {
            return None;
        }

        let synced_victims = excess.min(self.entries.iter().filter(|e| e.synced).count());
        let unsynced_victims = excess - synced_victims;

        let mut synced_left = synced_victims;
        let mut unsynced_left = unsynced_victims;
        self.entries.retain(|e| {
            if e.synced && synced_left > 0 {
                synced_left -= 1;
                false
            } else if !e.synced && unsynced_left > 0 {
                unsynced_left -= 1;
                false
            } else {
                true
            }
        });

        self.evicted_synced += synced_victims as u64;
        self.evicted_unsynced += unsynced_victims as u64;

        let overflow = QueueOverflow {
            evicted_synced: synced_victims,
            evicted_unsynced: unsynced_victims,
        };
        tracing::warn!(
            evicted_synced = overflow.evicted_synced,
            evicted_unsynced = overflow.evicted_unsynced,
            capacity,
            "Offline queue overflow, oldest entries evicted"
        );
        Some(overflow)
    }

    /// Removes all synced entries; returns how many were removed.
    pub fn purge_synced(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| !e.synced);
        before - self.entries.len()
    }

    pub fn stats(&self) -> QueueStats {
        let synced = self.entries.iter().filter(|e| e.synced).count();
        QueueStats {
            total: self.entries.len(),
            synced,
            unsynced: self.entries.len() - synced,
            oldest: self.entries.first().map(|e| e.captured_at),
            newest: self.entries.last().map(|e| e.captured_at),
            evicted_synced: self.evicted_synced,
            evicted_unsynced: self.evicted_unsynced,
            capacity: self.capacity,
        }
    }

    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
