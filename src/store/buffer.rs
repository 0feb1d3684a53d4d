use std::collections::VecDeque;

use crate::model::{Account, Priority, Snapshot};

/// Number of snapshots the write-back buffer can hold.
pub const BUFFER_CAPACITY: usize = 64;

/// Bounded queue of snapshots waiting to be persisted.
///
/// Entries are kept in descending priority order. Equal priorities keep their
/// insertion order, so two snapshots of the same account are written back in
/// the order they were taken. A push against a full buffer is discarded.
#[derive(Debug)]
pub struct WriteBackBuffer {
    entries: VecDeque<Snapshot>,
    capacity: usize,
    dropped: u64,
}

impl WriteBackBuffer {
    pub fn new() -> Self {
        Self::with_capacity(BUFFER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Queue a copy of `account`. Returns `false` if the buffer was full and
    /// the snapshot was discarded.
    pub fn push(&mut self, account: &Account, priority: Priority) -> bool {
        if self.entries.len() >= self.capacity {
            self.dropped += 1;
            return false;
        }

        // first slot holding a strictly lower priority
        let at = self
            .entries
            .iter()
            .position(|entry| entry.priority < priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(at, Snapshot::new(account, priority));
        true
    }

    /// Remove the highest priority, oldest snapshot.
    pub fn pop_front(&mut self) -> Option<Snapshot> {
        self.entries.pop_front()
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

    /// Snapshots discarded because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> {
        self.entries.iter()
    }
}

impl Default for WriteBackBuffer {
    fn default() -> Self {
        Self::new()
    }
}
