//! Subscriber ordering and acknowledgement through the public API

mod common;

use common::{child, open};
use consensus::{ConsensusUpdate, SubscriberTier, Subscription};
use ledger_core::MemoryStore;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

type Log = Arc<Mutex<Vec<(String, u64)>>>;

/// Acknowledge everything after recording (name, height)
fn spawn_recorder(mut sub: Subscription, log: Log) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(n) = sub.recv().await {
            log.lock().push((sub.name.clone(), n.update.height));
            n.ack();
        }
    })
}

#[tokio::test]
async fn test_subscribers_notified_in_tier_order() {
    let set = open(Arc::new(MemoryStore::new())).await;
    let genesis = set.current_block().unwrap();
    let log: Log = Arc::default();

    let mut handles = Vec::new();
    for (name, tier) in [
        ("wallet", SubscriberTier::PoolDependent),
        ("tpool", SubscriberTier::TransactionPool),
        ("explorer", SubscriberTier::Consensus),
    ] {
        let mut sub = set.subscribe(name, tier).await.unwrap();
        // Catch-up replays the genesis block
        let catch_up = sub.try_recv().unwrap();
        assert_eq!(catch_up.update.height, 0);
        assert_eq!(catch_up.update.applied_blocks[0].id, genesis);
        handles.push(spawn_recorder(sub, log.clone()));
    }

    let b1 = child(genesis, 1, 1, vec![]);
    set.accept_block(b1.clone()).await.unwrap();

    // accept_block returns only after the whole round is acknowledged
    assert_eq!(
        *log.lock(),
        vec![
            ("explorer".to_string(), 1),
            ("tpool".to_string(), 1),
            ("wallet".to_string(), 1),
        ]
    );

    // Side branches change nothing and notify nobody
    set.accept_block(child(genesis, 1, 2, vec![])).await.unwrap();
    assert_eq!(log.lock().len(), 3);

    set.close().await.unwrap();
    for handle in handles {
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn test_acceptance_waits_for_acknowledgement() {
    let set = open(Arc::new(MemoryStore::new())).await;
    let genesis = set.current_block().unwrap();

    let mut sub = set
        .subscribe("slow", SubscriberTier::TransactionPool)
        .await
        .unwrap();
    drop(sub.try_recv());

    let accepting = {
        let set = set.clone();
        tokio::spawn(async move { set.accept_block(child(genesis, 1, 1, vec![])).await })
    };

    let notification = sub.recv().await.unwrap();
    assert_eq!(notification.update.height, 1);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!accepting.is_finished());

    notification.ack();
    accepting.await.unwrap().unwrap();
    set.close().await.unwrap();
}

#[tokio::test]
async fn test_reorg_delivered_as_one_update() {
    let set = open(Arc::new(MemoryStore::new())).await;
    let genesis = set.current_block().unwrap();

    let b1 = child(genesis, 1, 1, vec![]);
    let b2 = child(b1.id(), 2, 2, vec![]);
    let b3 = child(b1.id(), 2, 3, vec![]);
    let b4 = child(b3.id(), 3, 4, vec![]);
    for block in [b1, b2.clone(), b3.clone()] {
        set.accept_block(block).await.unwrap();
    }

    let updates: Arc<Mutex<Vec<Arc<ConsensusUpdate>>>> = Arc::default();
    let mut sub = set
        .subscribe("indexer", SubscriberTier::Consensus)
        .await
        .unwrap();
    let catch_up = sub.try_recv().unwrap();
    assert_eq!(catch_up.update.applied_blocks.len(), 3);
    drop(catch_up);

    let received = updates.clone();
    let handle = tokio::spawn(async move {
        while let Some(n) = sub.recv().await {
            received.lock().push(n.update.clone());
            n.ack();
        }
    });

    set.accept_block(b4.clone()).await.unwrap();

    {
        let updates = updates.lock();
        assert_eq!(updates.len(), 1);
        let update = &updates[0];
        assert_eq!(update.height, 3);
        assert_eq!(update.tip, b4.id());
        assert_eq!(update.reverted_blocks.len(), 1);
        assert_eq!(update.reverted_blocks[0].id, b2.id());
        assert_eq!(
            update.applied_blocks.iter().map(|b| b.id).collect::<Vec<_>>(),
            vec![b3.id(), b4.id()]
        );
    }

    set.close().await.unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_unsubscribed_module_gets_nothing() {
    let set = open(Arc::new(MemoryStore::new())).await;
    let genesis = set.current_block().unwrap();

    let mut sub = set
        .subscribe("miner", SubscriberTier::PoolDependent)
        .await
        .unwrap();
    drop(sub.try_recv());
    assert!(set.unsubscribe(sub.id).await.unwrap());

    set.accept_block(child(genesis, 1, 1, vec![])).await.unwrap();
    // Channel closed without delivering the update
    assert!(sub.recv().await.is_none());
    set.close().await.unwrap();
}
