//! Tests for outbound session slot binding

mod common;

use std::sync::Arc;
use std::time::Duration;

use blocksync::chain::{Chain, NODE_WITNESS};
use blocksync::error::SyncError;
use blocksync::sync::{HashQueue, OutboundSession, Reservations};
use blocksync::SyncConfig;

use common::{make_block, make_blocks, wait_until, MockChain, MockChannel};

fn config(connections: u32) -> SyncConfig {
    SyncConfig {
        download_connections: connections,
        ..Default::default()
    }
}

fn build_session(
    connections: u32,
    hashes: u64,
) -> (
    Arc<HashQueue>,
    Arc<MockChain>,
    OutboundSession<MockChain>,
) {
    let blocks = make_blocks(1, hashes);
    let queue = Arc::new(HashQueue::new());
    for (offset, block) in blocks.iter().enumerate() {
        queue.enqueue(block.hash(), 1 + offset as u64);
    }

    let chain = MockChain::new();
    let dyn_chain: Arc<dyn Chain> = chain.clone();
    let table = Reservations::new(queue.clone(), dyn_chain, &config(connections));
    let session = OutboundSession::new(chain.clone(), table, config(connections))
        .with_monitor_interval(Duration::from_secs(60));
    (queue, chain, session)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_attach_binds_lowest_free_slots() {
    let (_, _, session) = build_session(3, 6);

    let first = MockChannel::new(NODE_WITNESS);
    let second = MockChannel::new(NODE_WITNESS);
    let third = MockChannel::new(NODE_WITNESS);

    let handle_first = session.attach(first.clone());
    let handle_second = session.attach(second.clone());
    let handle_third = session.attach(third.clone());
    assert!(handle_first.is_some());
    assert!(handle_second.is_some());
    assert!(handle_third.is_some());

    // All slots taken: the fourth channel gets no block-in duties.
    let fourth = MockChannel::new(NODE_WITNESS);
    assert!(session.attach(fourth.clone()).is_none());

    // Each bound channel requested its slot's two hashes.
    for channel in [&first, &second, &third] {
        wait_until(|| channel.sent_count() >= 1).await;
    }
    assert_eq!(fourth.sent_count(), 0);

    for channel in [&first, &second, &third] {
        channel.disconnect();
    }
    for handle in [handle_first, handle_second, handle_third].into_iter().flatten() {
        handle.await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_departed_peer_slot_is_recycled() {
    let (_, chain, session) = build_session(1, 2);
    let blocks = make_blocks(1, 2);

    let first = MockChannel::new(NODE_WITNESS);
    let handle = session.attach(first.clone()).expect("slot available");

    // No second slot while the first channel is alive.
    let blocked = MockChannel::new(NODE_WITNESS);
    assert!(session.attach(blocked.clone()).is_none());

    // The peer departs; the protocol exits and frees the binding.
    first.disconnect();
    assert_eq!(handle.await.unwrap(), SyncError::ChannelStopped);

    // The recycled slot serves a new peer end to end.
    let second = MockChannel::new(NODE_WITNESS);
    let handle = session.attach(second.clone()).expect("slot recycled");
    wait_until(|| second.sent_count() >= 1).await;

    for block in &blocks {
        second.deliver(block.clone());
    }
    wait_until(|| chain.organized().len() == 2).await;

    second.disconnect();
    assert_eq!(handle.await.unwrap(), SyncError::ChannelStopped);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_recycled_slot_state_is_reset() {
    let (queue, _, session) = build_session(1, 3);

    let first = MockChannel::new(NODE_WITNESS);
    let handle = session.attach(first.clone()).expect("slot available");
    wait_until(|| first.sent_count() >= 1).await;

    first.disconnect();
    handle.await.unwrap();

    // The departed peer's reservation went back to the queue.
    assert_eq!(queue.len(), 3);

    // A fresh channel starts from Empty and re-reserves the same work.
    let second = MockChannel::new(NODE_WITNESS);
    let handle = session.attach(second.clone()).expect("slot recycled");
    wait_until(|| second.sent_count() >= 1).await;
    let reservations = session.reservations().table();
    assert!(!reservations[0].stopped());
    assert_eq!(reservations[0].size(), 3);
    assert!(queue.is_empty());

    // One block delivered: the delivering channel made progress.
    second.deliver(make_block(1));
    wait_until(|| reservations[0].size() == 2).await;

    second.disconnect();
    handle.await.unwrap();
}
