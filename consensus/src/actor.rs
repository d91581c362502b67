//! Single-writer actor for block acceptance
//!
//! Every mutation of the consensus state goes through one Tokio task:
//! - Acceptance calls from any number of callers serialize in the mailbox
//! - The state write lock is held only while the processor commits, so
//!   lookups never observe a partially applied diff list
//! - The next message is not taken until every subscriber has acknowledged
//!   the previous update
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │        Block relay / miner / tests (any task)        │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │             ConsensusHandle (Clone)                  │
//! │         Sends messages to actor mailbox              │
//! └─────────────────────┬────────────────────────────────┘
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │            ConsensusActor (Single Task)              │
//! │  validate → commit (write lock) → persist            │
//! │                       │                              │
//! │                       ▼                              │
//! │      NotificationBus::notify (awaits every ack)      │
//! └──────────────────────────────────────────────────────┘
//! ```

use crate::consensus_set::PeerPenalizer;
use crate::metrics::Metrics;
use crate::processor::{AcceptOutcome, BlockProcessor, Phase};
use crate::subscribers::{NotificationBus, SubscriberTier, Subscription};
use crate::{Error, Result};
use ledger_core::{Block, ConsensusState};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Message sent to the consensus actor
#[derive(Debug)]
pub enum ConsensusMessage {
    /// Accept a candidate block
    AcceptBlock {
        block: Block,
        peer: Option<String>,
        response: oneshot::Sender<Result<AcceptOutcome>>,
    },

    /// Register a subscriber
    Subscribe {
        name: String,
        tier: SubscriberTier,
        response: oneshot::Sender<Subscription>,
    },

    /// Remove a subscriber
    Unsubscribe {
        id: Uuid,
        response: oneshot::Sender<bool>,
    },

    /// Flush the store, drop subscribers and stop
    Close {
        response: oneshot::Sender<Result<()>>,
    },
}

/// Actor that owns the block processor
pub struct ConsensusActor {
    processor: BlockProcessor,
    state: Arc<RwLock<ConsensusState>>,
    bus: NotificationBus,
    metrics: Metrics,
    penalizer: Arc<dyn PeerPenalizer>,
    mailbox: mpsc::Receiver<ConsensusMessage>,
}

impl std::fmt::Debug for ConsensusActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusActor")
            .field("processor", &self.processor)
            .field("subscribers", &self.bus.len())
            .finish()
    }
}

impl ConsensusActor {
    /// Create new actor
    pub fn new(
        processor: BlockProcessor,
        state: Arc<RwLock<ConsensusState>>,
        bus: NotificationBus,
        metrics: Metrics,
        penalizer: Arc<dyn PeerPenalizer>,
        mailbox: mpsc::Receiver<ConsensusMessage>,
    ) -> Self {
        Self {
            processor,
            state,
            bus,
            metrics,
            penalizer,
            mailbox,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        let mut closed = None;

        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                ConsensusMessage::AcceptBlock {
                    block,
                    peer,
                    response,
                } => {
                    let result = self.accept_block(block, peer).await;
                    let _ = response.send(result);
                }

                ConsensusMessage::Subscribe {
                    name,
                    tier,
                    response,
                } => {
                    let catch_up = {
                        let state = self.state.read();
                        self.processor.catch_up_update(&state).map(Arc::new)
                    };
                    let subscription = self.bus.subscribe(name, tier, catch_up);
                    let _ = response.send(subscription);
                }

                ConsensusMessage::Unsubscribe { id, response } => {
                    let _ = response.send(self.bus.unsubscribe(id));
                }

                ConsensusMessage::Close { response } => {
                    let result = self.processor.flush();
                    if let Err(e) = &result {
                        error!("Error flushing store on close: {}", e);
                    }
                    self.bus.close();
                    closed = Some((response, result));
                    break;
                }
            }
        }

        // Release the store before confirming the close, so the caller
        // can reopen it right away
        drop(self);
        info!("Consensus actor stopped");
        if let Some((response, result)) = closed {
            let _ = response.send(result);
        }
    }

    async fn accept_block(
        &mut self,
        block: Block,
        peer: Option<String>,
    ) -> Result<AcceptOutcome> {
        let block_id = block.id();
        let result = {
            let mut state = self.state.write();
            self.processor.accept_block(&mut state, block)
        };

        match &result {
            Ok(outcome) => {
                self.metrics.record_accepted(outcome);
                if let Some(update) = outcome.update() {
                    self.processor.set_phase(Phase::Notifying);
                    let started = Instant::now();
                    self.bus.notify(Arc::new(update.clone())).await;
                    self.metrics
                        .record_notify_duration(started.elapsed().as_secs_f64());
                    self.processor.set_phase(Phase::Idle);
                }
            }
            Err(Error::Rejected(rejection)) => {
                self.metrics.record_rejected(rejection.is_dos());
                debug!(%block_id, reason = %rejection, "Block rejected");
                if rejection.is_dos() {
                    if let Some(peer) = &peer {
                        warn!(%block_id, peer = %peer, "Penalizing peer for denial-of-service block");
                        self.penalizer.penalize(peer, rejection);
                    }
                }
            }
            Err(_) => {}
        }

        result
    }
}

/// Handle for sending messages to the actor
#[derive(Clone, Debug)]
pub struct ConsensusHandle {
    sender: mpsc::Sender<ConsensusMessage>,
}

impl ConsensusHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<ConsensusMessage>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        msg: impl FnOnce(oneshot::Sender<T>) -> ConsensusMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(msg(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))
    }

    /// Accept a block, optionally naming the peer that relayed it
    pub async fn accept_block(&self, block: Block, peer: Option<String>) -> Result<AcceptOutcome> {
        self.request(|response| ConsensusMessage::AcceptBlock {
            block,
            peer,
            response,
        })
        .await?
    }

    /// Register a subscriber
    pub async fn subscribe(&self, name: String, tier: SubscriberTier) -> Result<Subscription> {
        self.request(|response| ConsensusMessage::Subscribe {
            name,
            tier,
            response,
        })
        .await
    }

    /// Remove a subscriber
    pub async fn unsubscribe(&self, id: Uuid) -> Result<bool> {
        self.request(|response| ConsensusMessage::Unsubscribe { id, response })
            .await
    }

    /// Stop the actor
    pub async fn close(&self) -> Result<()> {
        self.request(|response| ConsensusMessage::Close { response })
            .await?
    }
}

/// Spawn the consensus actor
pub fn spawn_consensus_actor(
    processor: BlockProcessor,
    state: Arc<RwLock<ConsensusState>>,
    bus: NotificationBus,
    metrics: Metrics,
    penalizer: Arc<dyn PeerPenalizer>,
    mailbox_capacity: usize,
) -> ConsensusHandle {
    let (tx, rx) = mpsc::channel(mailbox_capacity.max(1)); // Bounded channel for backpressure
    let actor = ConsensusActor::new(processor, state, bus, metrics, penalizer, rx);

    tokio::spawn(async move {
        actor.run().await;
    });

    ConsensusHandle::new(tx)
}
