//! Outbound session
//!
//! Attaches block download duties to each established outbound channel by
//! binding it to a free reservation slot.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::chain::Chain;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::network::PeerChannel;
use crate::sync::block_in::{BlockInProtocol, MONITOR_INTERVAL};
use crate::sync::reservation::Reservation;
use crate::sync::reservations::Reservations;

/// Binds block download protocols to outbound channels.
pub struct OutboundSession<C: Chain> {
    chain: Arc<C>,
    reservations: Arc<Reservations>,
    config: SyncConfig,
    monitor_interval: Duration,
}

impl<C: Chain> OutboundSession<C> {
    pub fn new(chain: Arc<C>, reservations: Arc<Reservations>, config: SyncConfig) -> Self {
        Self {
            chain,
            reservations,
            config,
            monitor_interval: MONITOR_INTERVAL,
        }
    }

    /// Override the protocol monitor interval (shortened in tests).
    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    pub fn reservations(&self) -> &Arc<Reservations> {
        &self.reservations
    }

    /// Attach block download duties to a new outbound channel.
    ///
    /// Picks the lowest-indexed free slot, recycling stopped slots from
    /// departed peers. Returns `None` when every slot is occupied; the
    /// channel remains useful for relay protocols outside this crate.
    pub fn attach<P: PeerChannel>(&self, channel: Arc<P>) -> Option<JoinHandle<SyncError>> {
        let Some(slot) = self.select_slot() else {
            debug!(
                "No free download slot for peer {}, attaching without block sync",
                channel.address()
            );
            return None;
        };

        slot.reset();
        info!(
            "Attaching block sync for peer {} on slot ({})",
            channel.address(),
            slot.slot()
        );

        let protocol = BlockInProtocol::new(
            self.chain.clone(),
            channel,
            slot.clone(),
            &self.config,
        )
        .with_monitor_interval(self.monitor_interval);

        Some(tokio::spawn(async move {
            let code = protocol.run().await;
            slot.release();
            code
        }))
    }

    /// The lowest-indexed slot not currently bound to a channel.
    fn select_slot(&self) -> Option<Arc<Reservation>> {
        self.reservations
            .table()
            .into_iter()
            .find(|slot| slot.try_attach())
    }
}
