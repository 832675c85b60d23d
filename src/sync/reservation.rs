//! Per-peer download slot
//!
//! A reservation holds the block hashes assigned to one peer channel, tracks
//! that channel's import rate, and detects stalls. Slots are owned by the
//! [`Reservations`] table and shared with one protocol instance at a time.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::chain::Hash;
use crate::network::protocol::{GetDataMessage, InventoryItem};
use crate::sync::hash_queue::{HashEntry, HashQueue};
use crate::sync::performance::RateSample;
use crate::sync::reservations::Reservations;

/// How far below the table mean a slot's rate may fall, in standard
/// deviations, before the slot is considered expired.
const STALL_DEVIATION_FACTOR: f64 = 1.5;

/// Insertion-ordered hash set with O(1) height lookup.
///
/// Erased hashes leave tombstones in the order ring; tombstones are compacted
/// lazily so every hash is popped at most once.
#[derive(Debug, Default)]
struct PendingMap {
    heights: HashMap<Hash, u64>,
    order: VecDeque<Hash>,
}

impl PendingMap {
    fn len(&self) -> usize {
        self.heights.len()
    }

    fn insert(&mut self, hash: Hash, height: u64) {
        if self.heights.insert(hash, height).is_none() {
            self.order.push_back(hash);
        }
    }

    fn erase(&mut self, hash: &Hash) -> Option<u64> {
        let height = self.heights.remove(hash);
        self.compact_front();
        height
    }

    fn compact_front(&mut self) {
        while let Some(front) = self.order.front() {
            if self.heights.contains_key(front) {
                break;
            }
            self.order.pop_front();
        }
    }

    fn iter_live(&self) -> impl Iterator<Item = (Hash, u64)> + '_ {
        self.order
            .iter()
            .filter_map(|hash| self.heights.get(hash).map(|height| (*hash, *height)))
    }

    /// Remove up to `count` of the most recently inserted live hashes,
    /// returned in their original insertion order.
    fn split_back(&mut self, count: usize) -> Vec<(Hash, u64)> {
        let mut moved = Vec::with_capacity(count);
        while moved.len() < count {
            let Some(hash) = self.order.pop_back() else {
                break;
            };
            if let Some(height) = self.heights.remove(&hash) {
                moved.push((hash, height));
            }
        }
        moved.reverse();
        self.compact_front();
        moved
    }

    fn drain(&mut self) -> Vec<(Hash, u64)> {
        let mut drained: Vec<(Hash, u64)> = self.iter_live().collect();
        drained.sort_by_key(|(_, height)| *height);
        self.heights.clear();
        self.order.clear();
        drained
    }
}

/// One import observation inside the rolling rate window.
#[derive(Debug, Clone, Copy)]
struct ImportRecord {
    events: u64,
    database: Duration,
    at: Instant,
}

#[derive(Debug)]
struct History {
    records: VecDeque<ImportRecord>,
    last_progress: Instant,
}

/// One parallel block-download work unit, typically bound to a single peer.
pub struct Reservation {
    slot: u32,
    timeout: Duration,
    table: Weak<Reservations>,
    hashes: Arc<HashQueue>,
    pending: Mutex<PendingMap>,
    rate: Mutex<RateSample>,
    history: Mutex<History>,
    stopped: AtomicBool,
    attached: AtomicBool,
}

impl Reservation {
    pub(crate) fn new(
        table: Weak<Reservations>,
        hashes: Arc<HashQueue>,
        slot: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            slot,
            timeout,
            table,
            hashes,
            pending: Mutex::new(PendingMap::default()),
            rate: Mutex::new(RateSample::default()),
            history: Mutex::new(History {
                records: VecDeque::new(),
                last_progress: Instant::now(),
            }),
            stopped: AtomicBool::new(false),
            attached: AtomicBool::new(false),
        }
    }

    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub fn size(&self) -> usize {
        self.pending.lock().expect("pending poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn rate(&self) -> RateSample {
        *self.rate.lock().expect("rate poisoned")
    }

    /// Replace the cached rate sample.
    pub fn set_rate(&self, sample: RateSample) {
        *self.rate.lock().expect("rate poisoned") = sample;
    }

    pub fn idle(&self) -> bool {
        self.rate().idle()
    }

    /// Build a `getdata` request for the pending hashes, populating from the
    /// parent table first when the slot is empty.
    pub fn request(&self) -> GetDataMessage {
        if self.is_empty() && !self.stopped() {
            if let Some(table) = self.table.upgrade() {
                table.populate(self);
            }
        }

        let pending = self.pending.lock().expect("pending poisoned");
        let inventory = pending
            .iter_live()
            .map(|(hash, _)| InventoryItem::block(hash))
            .collect();
        GetDataMessage { inventory }
    }

    /// Assign a hash to this slot. Callers must not insert into a stopped
    /// slot.
    pub fn insert(&self, hash: Hash, height: u64) {
        debug_assert!(!self.stopped(), "insert on stopped slot");
        self.pending
            .lock()
            .expect("pending poisoned")
            .insert(hash, height);
        self.touch_progress();
    }

    /// Atomically look up and remove a received block's height.
    ///
    /// A miss means the block was never requested here or was partitioned to
    /// another slot.
    pub fn find_height_and_erase(&self, hash: &Hash) -> Option<u64> {
        let height = self.pending.lock().expect("pending poisoned").erase(hash);
        if height.is_some() {
            self.touch_progress();
        }
        height
    }

    /// Record an import and recompute the rolling rate.
    ///
    /// `events` is the imported block's input count; `database` is the time
    /// spent inside the chain store for it.
    pub fn update_history(&self, events: u64, database: Duration) {
        let now = Instant::now();
        let mut history = self.history.lock().expect("history poisoned");
        history.records.push_back(ImportRecord {
            events,
            database,
            at: now,
        });

        // Retain only the trailing timeout window.
        while let Some(front) = history.records.front() {
            if now.duration_since(front.at) <= self.timeout {
                break;
            }
            history.records.pop_front();
        }

        let mut total_events = 0u64;
        let mut database_ns = 0u64;
        for record in &history.records {
            total_events += record.events;
            database_ns += record.database.as_nanos() as u64;
        }
        let window_ns = history
            .records
            .front()
            .map(|front| now.duration_since(front.at).as_nanos() as u64)
            .unwrap_or(0);
        history.last_progress = now;
        drop(history);

        self.set_rate(RateSample {
            events: total_events,
            database_ns,
            window_ns,
        });
    }

    /// Whether this slot should be abandoned by its channel.
    ///
    /// Expired when the slot holds work with no progress across a full
    /// timeout window, or when it holds work and imports far below the
    /// other active slots. A drained slot is never expired: its cached
    /// rate is stale, and the channel should wait quietly for new work.
    pub fn expired(&self) -> bool {
        let pending = self.size();
        if pending > 0 && self.progress_elapsed() >= self.timeout {
            return true;
        }

        // Only slots still holding work are eligible for the statistical
        // test; nothing refreshes the rate of a slot that ran dry.
        if pending == 0 {
            return false;
        }

        let rate = self.rate();
        if rate.idle() {
            return false;
        }

        let Some(table) = self.table.upgrade() else {
            return false;
        };
        let statistics = table.rates();
        if statistics.active_rows < 2 {
            return false;
        }

        let deviation = rate.normal() - statistics.mean;
        deviation < 0.0 && -deviation > STALL_DEVIATION_FACTOR * statistics.standard_deviation
    }

    /// Move the most recent half (rounded up) of this slot's pending hashes
    /// into `other` and mark this slot stopped.
    ///
    /// Returns whether at least one hash moved. Slot locks are taken in slot
    /// order; callers serialize cross-slot transfers through the table lock.
    pub fn partition(&self, other: &Reservation) -> bool {
        debug_assert_ne!(self.slot, other.slot, "partition into the same slot");

        let (mut donor, mut recipient) = if self.slot < other.slot {
            let donor = self.pending.lock().expect("pending poisoned");
            let recipient = other.pending.lock().expect("pending poisoned");
            (donor, recipient)
        } else {
            let recipient = other.pending.lock().expect("pending poisoned");
            let donor = self.pending.lock().expect("pending poisoned");
            (donor, recipient)
        };

        if donor.len() < 2 {
            return false;
        }

        let count = (donor.len() + 1) / 2;
        let moved = donor.split_back(count);
        debug!(
            "Moved {} hashes from slot ({}) to slot ({})",
            moved.len(),
            self.slot,
            other.slot
        );
        for (hash, height) in moved {
            recipient.insert(hash, height);
        }
        drop(donor);
        drop(recipient);

        // The in-flight request on this slot is now partially invalid.
        self.stopped.store(true, Ordering::SeqCst);
        other.touch_progress();
        true
    }

    /// Stop the slot and return its residual hashes to the head of the
    /// queue, sorted by height.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let drained = self.pending.lock().expect("pending poisoned").drain();
        if drained.is_empty() {
            return;
        }

        debug!(
            "Returning {} hashes from slot ({}) to the queue",
            drained.len(),
            self.slot
        );
        self.hashes.restore(
            drained
                .into_iter()
                .map(|(hash, height)| HashEntry { hash, height })
                .collect(),
        );
    }

    /// Recycle a stopped slot for a new peer: Stopped becomes Empty.
    pub fn reset(&self) {
        self.stopped.store(false, Ordering::SeqCst);
        self.set_rate(RateSample::default());
        let mut history = self.history.lock().expect("history poisoned");
        history.records.clear();
        history.last_progress = Instant::now();
    }

    /// Bind this slot to a channel. Returns false if already bound.
    pub(crate) fn try_attach(&self) -> bool {
        self.attached
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Release the channel binding.
    pub(crate) fn release(&self) {
        self.attached.store(false, Ordering::SeqCst);
    }

    fn touch_progress(&self) {
        self.history.lock().expect("history poisoned").last_progress = Instant::now();
    }

    fn progress_elapsed(&self) -> Duration {
        self.history
            .lock()
            .expect("history poisoned")
            .last_progress
            .elapsed()
    }
}
