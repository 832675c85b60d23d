//! Shared fixtures for scheduler integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use blocksync::chain::{
    double_sha256, Block, BlockHeader, Chain, Hash, OutPoint, Reindexed, Transaction,
    TransactionInput,
};
use blocksync::error::{ChainError, SyncError};
use blocksync::network::protocol::ProtocolMessage;
use blocksync::network::{BlockEvent, PeerChannel};

/// Chain organizer fixture recording every organized block.
pub struct MockChain {
    organized: Mutex<Vec<(u64, Hash)>>,
    candidates_stale: AtomicBool,
    blocks_stale: AtomicBool,
    organize_error: Mutex<Option<ChainError>>,
    reindex: broadcast::Sender<Reindexed>,
}

impl MockChain {
    pub fn new() -> Arc<Self> {
        let (reindex, _) = broadcast::channel(64);
        Arc::new(Self {
            organized: Mutex::new(Vec::new()),
            candidates_stale: AtomicBool::new(false),
            blocks_stale: AtomicBool::new(false),
            organize_error: Mutex::new(None),
            reindex,
        })
    }

    pub fn set_candidates_stale(&self, stale: bool) {
        self.candidates_stale.store(stale, Ordering::SeqCst);
    }

    pub fn set_blocks_stale(&self, stale: bool) {
        self.blocks_stale.store(stale, Ordering::SeqCst);
    }

    /// Make every subsequent organize call fail with the given code.
    pub fn fail_organize(&self, error: ChainError) {
        *self.organize_error.lock().unwrap() = Some(error);
    }

    pub fn notify_reindexed(&self, fork_height: u64) {
        let _ = self.reindex.send(Reindexed {
            fork_height,
            incoming: Arc::new(Vec::new()),
            outgoing: Arc::new(Vec::new()),
        });
    }

    pub fn organized(&self) -> Vec<(u64, Hash)> {
        self.organized.lock().unwrap().clone()
    }

    pub fn organized_heights(&self) -> Vec<u64> {
        self.organized().iter().map(|(height, _)| *height).collect()
    }
}

impl Chain for MockChain {
    fn organize(&self, block: &Block, height: u64) -> Result<(), ChainError> {
        if let Some(error) = self.organize_error.lock().unwrap().clone() {
            return Err(error);
        }
        self.organized.lock().unwrap().push((height, block.hash()));
        Ok(())
    }

    fn is_candidates_stale(&self) -> bool {
        self.candidates_stale.load(Ordering::SeqCst)
    }

    fn is_blocks_stale(&self) -> bool {
        self.blocks_stale.load(Ordering::SeqCst)
    }

    fn subscribe_headers(&self) -> broadcast::Receiver<Reindexed> {
        self.reindex.subscribe()
    }
}

/// Peer channel fixture capturing outbound messages and feeding inbound
/// blocks from the test body.
pub struct MockChannel {
    address: SocketAddr,
    services: u64,
    sent: Mutex<Vec<ProtocolMessage>>,
    block_tx: Mutex<Option<mpsc::UnboundedSender<BlockEvent>>>,
    block_rx: Mutex<Option<mpsc::UnboundedReceiver<BlockEvent>>>,
    stopped: Mutex<Option<SyncError>>,
}

impl MockChannel {
    pub fn new(services: u64) -> Arc<Self> {
        Self::with_address(services, "127.0.0.1:8333".parse().unwrap())
    }

    pub fn with_address(services: u64, address: SocketAddr) -> Arc<Self> {
        let (block_tx, block_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            address,
            services,
            sent: Mutex::new(Vec::new()),
            block_tx: Mutex::new(Some(block_tx)),
            block_rx: Mutex::new(Some(block_rx)),
            stopped: Mutex::new(None),
        })
    }

    /// Feed a block to the protocol, as if received from the peer.
    pub fn deliver(&self, block: Block) {
        if let Some(tx) = self.block_tx.lock().unwrap().as_ref() {
            let _ = tx.send(Ok(Arc::new(block)));
        }
    }

    /// Surface a channel-level error on the block stream.
    pub fn deliver_error(&self, error: SyncError) {
        if let Some(tx) = self.block_tx.lock().unwrap().as_ref() {
            let _ = tx.send(Err(error));
        }
    }

    /// Close the inbound stream, as on peer disconnect.
    pub fn disconnect(&self) {
        self.block_tx.lock().unwrap().take();
    }

    pub fn sent(&self) -> Vec<ProtocolMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn stop_code(&self) -> Option<SyncError> {
        self.stopped.lock().unwrap().clone()
    }
}

#[async_trait]
impl PeerChannel for MockChannel {
    fn address(&self) -> SocketAddr {
        self.address
    }

    fn services(&self) -> u64 {
        self.services
    }

    async fn send(&self, message: ProtocolMessage) -> Result<(), SyncError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    fn subscribe_blocks(&self) -> mpsc::UnboundedReceiver<BlockEvent> {
        self.block_rx
            .lock()
            .unwrap()
            .take()
            .expect("block stream already taken")
    }

    async fn stop(&self, reason: SyncError) {
        *self.stopped.lock().unwrap() = Some(reason);
    }
}

/// A minimal block at the given height, with a height-unique hash.
pub fn make_block(height: u64) -> Block {
    Block {
        header: BlockHeader {
            version: 1,
            prev_block_hash: [0u8; 32],
            merkle_root: [0u8; 32],
            timestamp: 1231006505,
            bits: 0x1d00ffff,
            nonce: height as u32,
        },
        transactions: vec![Transaction {
            version: 1,
            inputs: vec![TransactionInput {
                previous_output: OutPoint {
                    hash: [0u8; 32],
                    index: 0xffffffff,
                },
                script_sig: vec![0x51],
                sequence: 0xffffffff,
            }],
            outputs: Vec::new(),
            lock_time: 0,
        }],
        metadata: Default::default(),
    }
}

/// Blocks for an inclusive height range.
pub fn make_blocks(first: u64, last: u64) -> Vec<Block> {
    (first..=last).map(make_block).collect()
}

/// Synthetic hash for queue-level tests that never materialize blocks.
pub fn synthetic_hash(seed: u64) -> Hash {
    double_sha256(&seed.to_le_bytes())
}

/// Poll until the condition holds, failing after about a second.
pub async fn wait_until<F: Fn() -> bool>(predicate: F) {
    for _ in 0..200 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within timeout");
}
