//! Pending block hash queue
//!
//! FIFO of header-advertised block hashes awaiting slot assignment. Header
//! sync enqueues in ascending height; slots dequeue from the front.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::chain::Hash;

/// A block hash paired with its header height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashEntry {
    pub hash: Hash,
    pub height: u64,
}

/// Thread-safe FIFO of pending block hashes.
///
/// Every operation is atomic with respect to concurrent enqueue, dequeue and
/// size observers.
#[derive(Debug, Default)]
pub struct HashQueue {
    entries: Mutex<VecDeque<HashEntry>>,
}

impl HashQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hash at the given height.
    pub fn enqueue(&self, hash: Hash, height: u64) {
        let mut entries = self.entries.lock().expect("hash queue poisoned");
        entries.push_back(HashEntry { hash, height });
    }

    /// Pop the front entry, or `None` when drained.
    pub fn dequeue(&self) -> Option<HashEntry> {
        let mut entries = self.entries.lock().expect("hash queue poisoned");
        entries.pop_front()
    }

    /// Return residual entries from a stopped slot to the head of the queue.
    ///
    /// Entries are reinserted sorted by height so that reassignment preserves
    /// height-ordered scheduling.
    pub fn restore(&self, mut returned: Vec<HashEntry>) {
        if returned.is_empty() {
            return;
        }

        returned.sort_by_key(|entry| entry.height);
        let mut entries = self.entries.lock().expect("hash queue poisoned");
        for entry in returned.into_iter().rev() {
            entries.push_front(entry);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("hash queue poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
