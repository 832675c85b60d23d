//! blocksync - Parallel multi-peer block download scheduler
//!
//! The core of a Bitcoin full node's initial block download: given a growing
//! queue of header-advertised block hashes, coordinate N concurrent peer
//! channels to fetch the blocks, detect slow or idle peers, rebalance work
//! between fast and slow slots, and feed downloaded blocks into a chain
//! organizer.
//!
//! ## Architecture
//!
//! Header sync (external) pushes hashes into the [`sync::HashQueue`]. The
//! [`sync::Reservations`] table distributes them across per-peer
//! [`sync::Reservation`] slots. Each established outbound channel gets a
//! [`sync::BlockInProtocol`] from the [`sync::OutboundSession`], which
//! requests its slot's hashes, hands received blocks to the [`chain::Chain`]
//! organizer, and hands the slot back when the peer departs or stalls.
//!
//! Validation, storage, peer discovery, and relay protocols are external
//! collaborators behind the [`chain::Chain`] and [`network::PeerChannel`]
//! interfaces.

pub mod chain;
pub mod config;
pub mod error;
pub mod network;
pub mod sync;
pub mod utils;

pub use chain::{Block, BlockHeader, Chain, Hash, Reindexed, NODE_WITNESS};
pub use config::SyncConfig;
pub use error::{ChainError, SyncError};
