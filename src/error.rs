//! Error codes for the block download subsystem
//!
//! All failures cross component boundaries as explicit codes; handlers
//! return them rather than panicking.

use thiserror::Error;

/// Errors returned by the chain organizer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// The block was rejected by validation. Recoverable at the host level.
    #[error("block rejected: {0}")]
    BlockRejected(String),

    /// The store failed while appending. Fatal for the host node.
    #[error("store corrupted: {0}")]
    StoreCorrupted(String),
}

/// Stop and failure codes surfaced through channel and protocol handlers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// The channel was stopped locally: unrequested block, partitioned
    /// reservation, or a witness requirement the peer cannot satisfy.
    #[error("channel stopped")]
    ChannelStopped,

    /// A network-layer timeout surfaced on the channel. Transient.
    #[error("channel timeout")]
    ChannelTimeout,

    /// The slot made no download progress within its configured window.
    #[error("slot ({0}) stalled")]
    SlotStalled(u32),

    /// A message could not be delivered to the peer.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The chain service shut down while the protocol was subscribed.
    #[error("service stopped")]
    ServiceStopped,

    /// The chain organizer failed; the channel stops with this code.
    #[error(transparent)]
    Chain(#[from] ChainError),
}
