//! Subscriber notification bus
//!
//! After each committed change of the best path, every subscriber receives
//! exactly one [`Notification`], in tier order, and the bus waits for each
//! acknowledgement before moving on. Block processing does not resume until
//! the whole round is acknowledged, so a downstream module never sees a
//! height its upstream modules have not reconciled yet.

use chrono::{DateTime, Utc};
use ledger_core::{BlockHeight, BlockId, Diff};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

/// Delivery order group. Lower tiers are notified first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SubscriberTier {
    /// Ledger-state mirrors (indexers, explorers)
    Consensus,
    /// The transaction pool
    TransactionPool,
    /// Modules that read the transaction pool (wallet, miner)
    PoolDependent,
}

/// Diffs of one block in a [`ConsensusUpdate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDiffs {
    /// Block ID
    pub id: BlockId,
    /// Block height
    pub height: BlockHeight,
    /// Ordered diffs
    pub diffs: Vec<Diff>,
}

/// One completed change of the best path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusUpdate {
    /// Blocks removed from the best path, tip first
    pub reverted_blocks: Vec<BlockDiffs>,
    /// Blocks added to the best path, lowest first
    pub applied_blocks: Vec<BlockDiffs>,
    /// Height after the change
    pub height: BlockHeight,
    /// Tip after the change
    pub tip: BlockId,
    /// When the change was committed
    pub committed_at: DateTime<Utc>,
}

/// A delivered update awaiting acknowledgement
///
/// Dropping a notification acknowledges it.
#[derive(Debug)]
pub struct Notification {
    /// The update
    pub update: Arc<ConsensusUpdate>,
    ack: Option<oneshot::Sender<()>>,
}

impl Notification {
    /// Signal that the update has been processed
    pub fn ack(mut self) {
        if let Some(ack) = self.ack.take() {
            let _ = ack.send(());
        }
    }
}

/// Receiving end held by a subscriber
#[derive(Debug)]
pub struct Subscription {
    /// Subscriber ID
    pub id: Uuid,
    /// Subscriber name
    pub name: String,
    /// Delivery tier
    pub tier: SubscriberTier,
    receiver: mpsc::Receiver<Notification>,
}

impl Subscription {
    /// Wait for the next notification. `None` once the consensus set closes.
    pub async fn recv(&mut self) -> Option<Notification> {
        self.receiver.recv().await
    }

    /// Next notification, if one is already queued
    pub fn try_recv(&mut self) -> Option<Notification> {
        self.receiver.try_recv().ok()
    }
}

#[derive(Debug)]
struct Subscriber {
    id: Uuid,
    name: String,
    tier: SubscriberTier,
    sender: mpsc::Sender<Notification>,
}

/// Ordered list of subscribers
#[derive(Debug)]
pub struct NotificationBus {
    subscribers: Vec<Subscriber>,
    channel_capacity: usize,
}

impl NotificationBus {
    /// Create empty bus
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            subscribers: Vec::new(),
            channel_capacity: channel_capacity.max(2),
        }
    }

    /// Number of live subscribers
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// Whether there are no subscribers
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Register a subscriber
    ///
    /// `catch_up` is queued first so the subscriber can synchronize with
    /// the current path; it needs no acknowledgement.
    pub fn subscribe(
        &mut self,
        name: impl Into<String>,
        tier: SubscriberTier,
        catch_up: Option<Arc<ConsensusUpdate>>,
    ) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.channel_capacity);
        let id = Uuid::now_v7();
        let name = name.into();

        if let Some(update) = catch_up {
            // Fresh channel with capacity >= 2 cannot be full
            let _ = sender.try_send(Notification { update, ack: None });
        }

        // Stable within a tier: insert after the last subscriber of the
        // same or a lower tier
        let position = self
            .subscribers
            .iter()
            .position(|s| s.tier > tier)
            .unwrap_or(self.subscribers.len());
        self.subscribers.insert(
            position,
            Subscriber {
                id,
                name: name.clone(),
                tier,
                sender,
            },
        );

        debug!(subscriber = %name, ?tier, "Subscriber registered");

        Subscription {
            id,
            name,
            tier,
            receiver,
        }
    }

    /// Remove a subscriber
    pub fn unsubscribe(&mut self, id: Uuid) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id != id);
        self.subscribers.len() != before
    }

    /// Deliver one update to every subscriber in order, waiting for each
    /// acknowledgement. Subscribers whose receiver is gone are dropped.
    pub async fn notify(&mut self, update: Arc<ConsensusUpdate>) {
        let mut closed = Vec::new();

        for subscriber in &self.subscribers {
            let (ack_tx, ack_rx) = oneshot::channel();
            let notification = Notification {
                update: update.clone(),
                ack: Some(ack_tx),
            };

            if subscriber.sender.send(notification).await.is_err() {
                warn!(subscriber = %subscriber.name, "Subscriber went away, dropping it");
                closed.push(subscriber.id);
                continue;
            }

            // A dropped notification counts as acknowledged
            let _ = ack_rx.await;
            debug!(subscriber = %subscriber.name, height = update.height, "Update acknowledged");
        }

        if !closed.is_empty() {
            self.subscribers.retain(|s| !closed.contains(&s.id));
        }
    }

    /// Drop every subscriber, closing their channels
    pub fn close(&mut self) {
        self.subscribers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn update(height: BlockHeight) -> Arc<ConsensusUpdate> {
        Arc::new(ConsensusUpdate {
            reverted_blocks: vec![],
            applied_blocks: vec![],
            height,
            tip: BlockId::default(),
            committed_at: Utc::now(),
        })
    }

    fn spawn_recorder(
        mut sub: Subscription,
        log: Arc<Mutex<Vec<String>>>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(n) = sub.recv().await {
                log.lock().push(sub.name.clone());
                n.ack();
            }
        })
    }

    #[tokio::test]
    async fn test_delivery_follows_tier_order() {
        let mut bus = NotificationBus::new(4);
        let log = Arc::new(Mutex::new(Vec::new()));

        // Registered out of order on purpose
        let wallet = bus.subscribe("wallet", SubscriberTier::PoolDependent, None);
        let tpool = bus.subscribe("tpool", SubscriberTier::TransactionPool, None);
        let miner = bus.subscribe("miner", SubscriberTier::PoolDependent, None);
        let explorer = bus.subscribe("explorer", SubscriberTier::Consensus, None);

        let handles: Vec<_> = [wallet, tpool, miner, explorer]
            .into_iter()
            .map(|s| spawn_recorder(s, log.clone()))
            .collect();

        bus.notify(update(1)).await;
        assert_eq!(
            *log.lock(),
            vec!["explorer", "tpool", "wallet", "miner"]
        );

        bus.close();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_notify_waits_for_ack() {
        let mut bus = NotificationBus::new(4);
        let mut sub = bus.subscribe("slow", SubscriberTier::Consensus, None);
        let acked = Arc::new(Mutex::new(false));

        let flag = acked.clone();
        let handle = tokio::spawn(async move {
            let n = sub.recv().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            *flag.lock() = true;
            n.ack();
            sub
        });

        bus.notify(update(1)).await;
        assert!(*acked.lock());
        drop(handle.await.unwrap());
    }

    #[tokio::test]
    async fn test_dead_subscriber_is_dropped() {
        let mut bus = NotificationBus::new(4);
        let sub = bus.subscribe("gone", SubscriberTier::Consensus, None);
        drop(sub);

        bus.notify(update(1)).await;
        assert!(bus.is_empty());
    }

    #[tokio::test]
    async fn test_catch_up_is_queued_first() {
        let mut bus = NotificationBus::new(4);
        let mut sub = bus.subscribe("late", SubscriberTier::Consensus, Some(update(7)));

        let first = sub.try_recv().unwrap();
        assert_eq!(first.update.height, 7);
        // Catch-up needs no ack; dropping it is fine
        drop(first);
        assert!(sub.try_recv().is_none());
    }
}
