//! Block download protocol for one peer channel
//!
//! Requests reserved hashes, feeds received blocks into the chain organizer
//! in header order, and abandons the channel when its slot stalls or is
//! partitioned away.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::chain::{Block, Chain, NODE_WITNESS};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::network::protocol::ProtocolMessage;
use crate::network::PeerChannel;
use crate::sync::reservation::Reservation;

/// The moving window in which the block download rate is measured.
pub const MONITOR_INTERVAL: Duration = Duration::from_secs(5);

fn is_witness(services: u64) -> bool {
    (services & NODE_WITNESS) != 0
}

/// Per-channel state machine driving block requests and ingestion.
///
/// Runs as a single task, so all handlers on one channel are serialized;
/// different channels run in parallel.
pub struct BlockInProtocol<C: Chain, P: PeerChannel> {
    chain: Arc<C>,
    channel: Arc<P>,
    reservation: Arc<Reservation>,
    require_witness: bool,
    peer_witness: bool,
    monitor_interval: Duration,
}

impl<C: Chain, P: PeerChannel> BlockInProtocol<C, P> {
    pub fn new(
        chain: Arc<C>,
        channel: Arc<P>,
        reservation: Arc<Reservation>,
        config: &SyncConfig,
    ) -> Self {
        let peer_witness = is_witness(channel.services());
        Self {
            chain,
            channel,
            reservation,
            require_witness: config.require_witness(),
            peer_witness,
            monitor_interval: MONITOR_INTERVAL,
        }
    }

    /// Override the monitor interval (shortened in tests).
    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    /// Drive the protocol until the channel stops; returns the stop code.
    ///
    /// On exit the reservation is freed back to the queue and the channel is
    /// stopped with the same code.
    pub async fn run(self) -> SyncError {
        let mut blocks = self.channel.subscribe_blocks();
        let mut reindex = self.chain.subscribe_headers();
        let mut monitor = tokio::time::interval(self.monitor_interval);
        monitor.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        monitor.tick().await;

        self.send_get_blocks().await;

        let code = loop {
            tokio::select! {
                event = blocks.recv() => match event {
                    Some(Ok(block)) => {
                        if let Err(code) = self.handle_receive_block(&block).await {
                            break code;
                        }
                    }
                    Some(Err(SyncError::ChannelTimeout)) => {
                        debug!(
                            "Timeout on slot ({}) peer {}",
                            self.reservation.slot(),
                            self.channel.address()
                        );
                    }
                    Some(Err(code)) => {
                        error!(
                            "Failure in block receive for slot ({}): {}",
                            self.reservation.slot(),
                            code
                        );
                        break code;
                    }
                    None => break SyncError::ChannelStopped,
                },
                event = reindex.recv() => match event {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        self.send_get_blocks().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break SyncError::ServiceStopped,
                },
                _ = monitor.tick() => {
                    if self.reservation.stopped() {
                        debug!(
                            "Restarting partitioned slot ({}) : [{}]",
                            self.reservation.slot(),
                            self.reservation.size()
                        );
                        break SyncError::ChannelStopped;
                    }
                    if self.reservation.expired() {
                        debug!(
                            "Restarting slow slot ({}) : [{}]",
                            self.reservation.slot(),
                            self.reservation.size()
                        );
                        break SyncError::SlotStalled(self.reservation.slot());
                    }
                }
            }
        };

        debug!(
            "Stopping block sync on slot ({}) peer {}: {}",
            self.reservation.slot(),
            self.channel.address(),
            code
        );

        // Free the reservation so the slot can be recycled to another peer.
        self.reservation.stop();
        self.channel.stop(code.clone()).await;
        code
    }

    /// Request the slot's pending hashes from the peer.
    ///
    /// Delivery failure is logged but does not stop the channel.
    async fn send_get_blocks(&self) {
        if self.reservation.stopped() {
            return;
        }

        // Don't start downloading blocks until the header chain is current.
        // This protects against disk fill and lets hashes be distributed.
        if self.chain.is_candidates_stale() {
            return;
        }

        // Repopulates from the table if empty and new work has arrived.
        let mut request = self.reservation.request();
        if request.inventory.is_empty() {
            return;
        }

        if self.require_witness {
            request.to_witness();
        }

        debug!(
            "Sending request of {} hashes for slot ({})",
            request.inventory.len(),
            self.reservation.slot()
        );

        if let Err(code) = self.channel.send(ProtocolMessage::GetData(request)).await {
            warn!(
                "Failure sending get data to slot ({}) peer {}: {}",
                self.reservation.slot(),
                self.channel.address(),
                code
            );
        }
    }

    async fn handle_receive_block(&self, block: &Block) -> Result<(), SyncError> {
        // Stop if required witness is unavailable.
        if self.require_witness && !self.peer_witness {
            return Err(SyncError::ChannelStopped);
        }

        // This channel was slowest, so half of its reservation was taken.
        if self.reservation.stopped() {
            debug!(
                "Restarting partitioned slot ({}) : [{}]",
                self.reservation.slot(),
                self.reservation.size()
            );
            return Err(SyncError::ChannelStopped);
        }

        // The block may be unrequested or moved to another slot; there is no
        // way to tell the difference here.
        let hash = block.hash();
        let Some(height) = self.reservation.find_height_and_erase(&hash) else {
            debug!(
                "Unrequested or partitioned block on slot ({})",
                self.reservation.slot()
            );
            return Err(SyncError::ChannelStopped);
        };

        let clock = Instant::now();
        if let Err(code) = self.chain.organize(block, height) {
            error!(
                "Failure organizing block for slot ({}), store is now corrupted: {}",
                self.reservation.slot(),
                code
            );
            return Err(code.into());
        }
        let database = clock.elapsed();

        // Recompute rate performance, excluding store cost.
        self.reservation
            .update_history(block.total_inputs().max(1) as u64, database);

        // Only log every 100th block until the block chain is current.
        let period = if self.chain.is_blocks_stale() { 100 } else { 1 };
        if height % period == 0 {
            self.report(block, height);
        }

        self.send_get_blocks().await;
        Ok(())
    }

    fn report(&self, block: &Block, height: u64) {
        let transactions = block.transactions.len();
        let inputs = block.total_inputs().max(1);
        let metadata = &block.metadata;

        info!(
            "Block #{:06} [{}] {:>4} txs {:>4} ins {:>3} des {:>3} chk {:>3} dep ({:02})",
            height,
            hex::encode(block.hash()),
            transactions,
            inputs,
            per_input_micros(metadata.deserialize, inputs),
            per_input_micros(metadata.check, inputs),
            per_input_micros(metadata.associate, inputs),
            self.reservation.slot()
        );
    }
}

fn per_input_micros(duration: Duration, inputs: usize) -> u64 {
    (duration.as_micros() as f64 / inputs as f64).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_witness() {
        assert!(is_witness(NODE_WITNESS));
        assert!(is_witness(NODE_WITNESS | 1));
        assert!(!is_witness(1));
        assert!(!is_witness(0));
    }

    #[test]
    fn test_per_input_micros_rounds() {
        assert_eq!(per_input_micros(Duration::from_micros(10), 4), 3);
        assert_eq!(per_input_micros(Duration::from_micros(9), 4), 2);
        assert_eq!(per_input_micros(Duration::ZERO, 1), 0);
    }
}
