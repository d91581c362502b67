//! Public consensus set API
//!
//! [`ConsensusSet`] ties the pieces together: the processor runs inside the
//! consensus actor, lookups read the shared state under a read lock, and
//! subscribers register through the actor so their catch-up update and the
//! live updates that follow cannot interleave.

use crate::actor::{spawn_consensus_actor, ConsensusHandle};
use crate::config::Config;
use crate::error::{Error, Rejection, Result};
use crate::metrics::Metrics;
use crate::processor::{AcceptOutcome, BlockProcessor};
use crate::subscribers::{NotificationBus, SubscriberTier, Subscription};
use crate::validation::{BlockValidator, StandardValidator};
use ledger_core::{
    Block, BlockHeight, BlockId, BlockStore, ConsensusState, FileContract, FileContractId,
    RocksStore, SiacoinOutput, SiacoinOutputId, SiafundOutput, SiafundOutputId,
};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Hook invoked when a peer relays a denial-of-service block
pub trait PeerPenalizer: Send + Sync {
    /// Penalize `peer` for the block behind `rejection`
    fn penalize(&self, peer: &str, rejection: &Rejection);
}

/// Penalizer that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPenalizer;

impl PeerPenalizer for NoopPenalizer {
    fn penalize(&self, _peer: &str, _rejection: &Rejection) {}
}

/// The consensus set
#[derive(Debug, Clone)]
pub struct ConsensusSet {
    handle: ConsensusHandle,
    state: Arc<RwLock<ConsensusState>>,
    metrics: Metrics,
}

impl ConsensusSet {
    /// Load the chain from `store` (or create genesis) and start the actor
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn open(
        config: Config,
        validator: Arc<dyn BlockValidator>,
        store: Arc<dyn BlockStore>,
        penalizer: Arc<dyn PeerPenalizer>,
    ) -> Result<Self> {
        let mut state = ConsensusState::new();
        let processor = BlockProcessor::open(config.chain.clone(), validator, store, &mut state)?;

        let metrics = Metrics::new()
            .map_err(|e| Error::Other(format!("Failed to create metrics: {}", e)))?;
        metrics.height.set(state.height() as i64);

        info!(
            node_id = %config.node_id,
            height = state.height(),
            "Consensus set opened"
        );

        let state = Arc::new(RwLock::new(state));
        let handle = spawn_consensus_actor(
            processor,
            state.clone(),
            NotificationBus::new(config.notifications.channel_capacity),
            metrics.clone(),
            penalizer,
            config.mailbox_capacity,
        );

        Ok(Self {
            handle,
            state,
            metrics,
        })
    }

    /// Open with a RocksDB store at `config.ledger.data_dir`, the standard
    /// validator and no peer penalization
    pub async fn open_default(config: Config) -> Result<Self> {
        let store = Arc::new(RocksStore::open(&config.ledger)?);
        Self::open(
            config,
            Arc::new(StandardValidator::new()),
            store,
            Arc::new(NoopPenalizer),
        )
        .await
    }

    /// Accept a block from a local source
    pub async fn accept_block(&self, block: Block) -> Result<AcceptOutcome> {
        self.handle.accept_block(block, None).await
    }

    /// Accept a block relayed by `peer`, who is penalized if the block
    /// turns out to be a denial-of-service block
    pub async fn accept_block_from(
        &self,
        block: Block,
        peer: impl Into<String>,
    ) -> Result<AcceptOutcome> {
        self.handle.accept_block(block, Some(peer.into())).await
    }

    /// Register a subscriber. The first notification on the returned
    /// subscription replays the current path.
    pub async fn subscribe(
        &self,
        name: impl Into<String>,
        tier: SubscriberTier,
    ) -> Result<Subscription> {
        self.handle.subscribe(name.into(), tier).await
    }

    /// Remove a subscriber
    pub async fn unsubscribe(&self, id: Uuid) -> Result<bool> {
        self.handle.unsubscribe(id).await
    }

    /// Flush the store and stop processing. Subscriptions see their
    /// channel close.
    pub async fn close(&self) -> Result<()> {
        self.handle.close().await
    }

    /// Run `f` against a read-only view of the state
    pub fn read<R>(&self, f: impl FnOnce(&ConsensusState) -> R) -> R {
        f(&self.state.read())
    }

    /// Copy of the whole state
    pub fn snapshot(&self) -> ConsensusState {
        self.state.read().clone()
    }

    /// Height of the best path
    pub fn height(&self) -> BlockHeight {
        self.state.read().height()
    }

    /// Block IDs of the best path, genesis first
    pub fn current_path(&self) -> Vec<BlockId> {
        self.state.read().current_path().to_vec()
    }

    /// Tip of the best path
    pub fn current_block(&self) -> Option<BlockId> {
        self.state.read().current_block()
    }

    /// Look up an unspent coin output
    pub fn get_siacoin_output(&self, id: &SiacoinOutputId) -> Option<SiacoinOutput> {
        self.state.read().siacoin_output(id).cloned()
    }

    /// Look up an unspent fund output
    pub fn get_siafund_output(&self, id: &SiafundOutputId) -> Option<SiafundOutput> {
        self.state.read().siafund_output(id).cloned()
    }

    /// Look up an open file contract
    pub fn get_file_contract(&self, id: &FileContractId) -> Option<FileContract> {
        self.state.read().file_contract(id).cloned()
    }

    /// Coin outputs that mature at `height`
    pub fn get_delayed_siacoin_outputs(
        &self,
        height: BlockHeight,
    ) -> Vec<(SiacoinOutputId, SiacoinOutput)> {
        self.state
            .read()
            .delayed_siacoin_outputs()
            .bucket(height)
            .map(|bucket| bucket.iter().map(|(id, o)| (*id, o.clone())).collect())
            .unwrap_or_default()
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}
