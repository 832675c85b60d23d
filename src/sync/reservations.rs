//! Reservation table
//!
//! Owns all download slots and performs the reserve/partition rebalancing
//! that keeps every connected peer supplied with disjoint work.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::debug;

use crate::chain::{Block, Chain};
use crate::config::SyncConfig;
use crate::error::ChainError;
use crate::network::protocol::MAX_INV_ENTRIES;
use crate::sync::hash_queue::HashQueue;
use crate::sync::performance::divide;
use crate::sync::reservation::Reservation;

/// Statistical summary of block import rates across non-idle slots.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateStatistics {
    pub active_rows: usize,
    pub mean: f64,
    pub standard_deviation: f64,
}

/// The set of per-peer work slots, with disjoint pending hash sets.
///
/// Observers take the table lock shared; `populate` and `remove` take it
/// exclusive. Per-slot mutation happens under each slot's own lock.
pub struct Reservations {
    hashes: Arc<HashQueue>,
    chain: Arc<dyn Chain>,
    max_request: usize,
    timeout: Duration,
    table: RwLock<Vec<Arc<Reservation>>>,
}

impl Reservations {
    /// Build the table and distribute the queued hashes across
    /// `config.download_connections` slots.
    pub fn new(hashes: Arc<HashQueue>, chain: Arc<dyn Chain>, config: &SyncConfig) -> Arc<Self> {
        let this = Arc::new(Self {
            hashes,
            chain,
            max_request: MAX_INV_ENTRIES,
            timeout: Duration::from_secs(config.block_timeout_seconds as u64),
            table: RwLock::new(Vec::new()),
        });
        this.initialize(config.download_connections as usize);
        this
    }

    /// Create the slots and round-robin the first `(blocks / rows) * rows`
    /// queued hashes across them. The remainder stays queued for later
    /// reservation.
    fn initialize(self: &Arc<Self>, size: usize) {
        // Guard against allocation overflow by capping the row count.
        let max_rows = usize::MAX / self.max_request;
        let mut rows = size.min(max_rows);

        let mut table = self.table.write().expect("table poisoned");

        // At least one block per row.
        let blocks = self.hashes.len();
        rows = rows.min(blocks);
        if rows == 0 {
            return;
        }

        // No more than max_request hashes per row.
        let max_allocation = rows * self.max_request;
        let allocation = blocks.min(max_allocation);

        table.reserve(rows);
        for row in 0..rows {
            table.push(Arc::new(Reservation::new(
                Arc::downgrade(self),
                self.hashes.clone(),
                row as u32,
                self.timeout,
            )));
        }

        for _base in 0..(allocation / rows) {
            for row in table.iter() {
                if let Some(entry) = self.hashes.dequeue() {
                    row.insert(entry.hash, entry.height);
                }
            }
        }
        drop(table);

        debug!("Reserved {} blocks to {} slots", allocation, rows);
    }

    /// Snapshot of the slot table.
    pub fn table(&self) -> Vec<Arc<Reservation>> {
        self.table.read().expect("table poisoned").clone()
    }

    /// Remove a slot on permanent teardown. Normal peer churn stops and
    /// recycles slots instead.
    pub fn remove(&self, slot: &Arc<Reservation>) {
        let mut table = self.table.write().expect("table poisoned");
        if let Some(position) = table.iter().position(|row| Arc::ptr_eq(row, slot)) {
            table.remove(position);
        }
    }

    /// Supply an empty slot with work, from the unreserved queue or by
    /// partitioning the maximal slot.
    pub fn populate(&self, minimal: &Reservation) -> bool {
        let table = self.table.write().expect("table poisoned");
        let populated = self.reserve(minimal) || Self::partition(&table, minimal);
        drop(table);

        if populated {
            debug!(
                "Populated {} blocks to slot ({})",
                minimal.size(),
                minimal.slot()
            );
        }
        populated
    }

    /// Drain up to `max_request - slot.size()` queue entries into the slot,
    /// preserving queue order.
    fn reserve(&self, minimal: &Reservation) -> bool {
        let existing = minimal.size();
        let allocation = self
            .hashes
            .len()
            .min(self.max_request.saturating_sub(existing));

        for _ in 0..allocation {
            let Some(entry) = self.hashes.dequeue() else {
                break;
            };
            minimal.insert(entry.hash, entry.height);
        }

        !minimal.is_empty()
    }

    /// Halve the maximal slot into `minimal`. The maximal slot's channel is
    /// implicitly restarted by the transfer.
    fn partition(table: &[Arc<Reservation>], minimal: &Reservation) -> bool {
        let Some(maximal) = Self::find_maximal(table) else {
            return false;
        };
        maximal.slot() != minimal.slot() && maximal.size() >= 2 && maximal.partition(minimal)
    }

    /// The slot with the most reserved hashes; ties go to the lowest slot id.
    fn find_maximal(table: &[Arc<Reservation>]) -> Option<&Arc<Reservation>> {
        let mut best: Option<(&Arc<Reservation>, usize)> = None;
        for row in table {
            let size = row.size();
            match best {
                Some((_, best_size)) if size <= best_size => {}
                _ => best = Some((row, size)),
            }
        }
        best.map(|(row, _)| row)
    }

    /// Mean and standard deviation of `normal()` rates over non-idle slots.
    ///
    /// Rates are cached per slot, so the snapshot is not synchronized across
    /// rows.
    pub fn rates(&self) -> RateStatistics {
        let rows = self.table();
        let rates: Vec<f64> = rows
            .iter()
            .map(|row| row.rate())
            .filter(|rate| !rate.idle())
            .map(|rate| rate.normal())
            .collect();

        let active_rows = rates.len();
        let total: f64 = rates.iter().sum();
        let mean = divide(total, active_rows as f64);
        let squares: f64 = rates
            .iter()
            .map(|rate| {
                let difference = mean - rate;
                difference * difference
            })
            .sum();
        let standard_deviation = divide(squares, active_rows as f64).sqrt();

        RateStatistics {
            active_rows,
            mean,
            standard_deviation,
        }
    }

    /// Forward a downloaded block to the chain organizer.
    pub fn import(&self, block: &Block, height: u64) -> Result<(), ChainError> {
        self.chain.organize(block, height)
    }
}
