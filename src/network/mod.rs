//! Peer channel interface
//!
//! The scheduler drives peers through the [`PeerChannel`] trait; the concrete
//! transport (TCP framing, handshake, demultiplexing) lives outside this
//! crate.

pub mod protocol;

use std::net::SocketAddr;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::chain::Block;
use crate::error::SyncError;
use crate::network::protocol::ProtocolMessage;

/// One inbound event on a channel's block stream.
///
/// Network-layer failures are delivered in-band so the protocol can treat
/// `ChannelTimeout` as transient and everything else as a stop condition.
pub type BlockEvent = Result<Arc<Block>, SyncError>;

/// An established peer channel, as seen by the download protocol.
///
/// Handlers on one channel are serialized by the protocol task; a channel
/// implementation only needs to be safe to share across that task and the
/// session.
#[async_trait]
pub trait PeerChannel: Send + Sync + 'static {
    /// Remote peer address, for log association.
    fn address(&self) -> SocketAddr;

    /// Service bits the peer advertised in its version handshake.
    fn services(&self) -> u64;

    /// Deliver a message to the peer.
    async fn send(&self, message: ProtocolMessage) -> Result<(), SyncError>;

    /// Stream of inbound `block` messages and channel-level errors.
    fn subscribe_blocks(&self) -> mpsc::UnboundedReceiver<BlockEvent>;

    /// Stop the channel with the given code.
    async fn stop(&self, reason: SyncError);
}
