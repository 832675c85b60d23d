//! Chain organizer interface and block types
//!
//! The download scheduler does not validate or store blocks; it hands them to
//! a [`Chain`] implementation and reacts to its staleness predicates and
//! reindex notifications.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;

use crate::error::ChainError;

/// 32-byte block identifier.
pub type Hash = [u8; 32];

/// Service bit advertising segregated witness support.
pub const NODE_WITNESS: u64 = 1 << 3;

/// Block header (80 bytes on the wire).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block_hash: Hash,
    pub merkle_root: Hash,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    /// Double-SHA256 of the serialized header.
    pub fn hash(&self) -> Hash {
        let mut data = Vec::with_capacity(80);
        data.extend_from_slice(&self.version.to_le_bytes());
        data.extend_from_slice(&self.prev_block_hash);
        data.extend_from_slice(&self.merkle_root);
        data.extend_from_slice(&self.timestamp.to_le_bytes());
        data.extend_from_slice(&self.bits.to_le_bytes());
        data.extend_from_slice(&self.nonce.to_le_bytes());
        double_sha256(&data)
    }
}

/// Transaction input reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutPoint {
    pub hash: Hash,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInput {
    pub previous_output: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub value: u64,
    pub script_pubkey: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub lock_time: u32,
}

/// Per-message processing costs observed while receiving a block.
///
/// Populated by the deserializer and checker on the way in; the download
/// protocol reports them per input in its progress line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMetadata {
    pub deserialize: Duration,
    pub check: Duration,
    pub associate: Duration,
}

/// A full block as received from a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    #[serde(default)]
    pub metadata: BlockMetadata,
}

impl Block {
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// Total input count across all transactions.
    pub fn total_inputs(&self) -> usize {
        self.transactions.iter().map(|tx| tx.inputs.len()).sum()
    }
}

/// Double-SHA256, the block identity function.
pub fn double_sha256(data: &[u8]) -> Hash {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    second.into()
}

/// Header reindex notification.
///
/// Emitted by the chain when the candidate header index advances or
/// reorganizes. Header lists are shared so broadcast clones stay cheap.
#[derive(Debug, Clone)]
pub struct Reindexed {
    pub fork_height: u64,
    pub incoming: Arc<Vec<BlockHeader>>,
    pub outgoing: Arc<Vec<BlockHeader>>,
}

/// Chain organizer consumed by the download scheduler.
///
/// Implementations are internally thread safe. `organize` is synchronous and
/// may block briefly on disk and validation; it is called from a single
/// channel task at a time.
pub trait Chain: Send + Sync + 'static {
    /// Append a downloaded block at the given height.
    fn organize(&self, block: &Block, height: u64) -> Result<(), ChainError>;

    /// True while the candidate header chain is not yet current. Downloads
    /// are gated until this clears.
    fn is_candidates_stale(&self) -> bool;

    /// True while the block chain lags far behind the header chain. Controls
    /// progress log cadence.
    fn is_blocks_stale(&self) -> bool;

    /// Subscribe to header reindex notifications. Dropping the receiver
    /// unsubscribes.
    fn subscribe_headers(&self) -> broadcast::Receiver<Reindexed>;
}
