//! Shared helpers for consensus integration tests

#![allow(dead_code)]

use consensus::{
    BlockValidator, ChainParams, Config, ConsensusSet, NoopPenalizer, PeerPenalizer, Rejection,
    StandardValidator,
};
use ledger_core::{
    Block, BlockHeight, BlockId, Currency, Hash, MemoryStore, SiacoinOutput, Transaction,
    UnlockHash,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// Config with a short maturity delay so payouts mature within a few blocks
pub fn config() -> Config {
    Config {
        chain: ChainParams {
            maturity_delay: 2,
            ..Default::default()
        },
        notifications: consensus::NotificationConfig {
            channel_capacity: 4,
        },
        ..Default::default()
    }
}

/// Consensus set over a memory store
pub async fn open(store: Arc<MemoryStore>) -> ConsensusSet {
    open_with_penalizer(store, Arc::new(NoopPenalizer)).await
}

/// Consensus set over a memory store with a custom penalizer
pub async fn open_with_penalizer(
    store: Arc<MemoryStore>,
    penalizer: Arc<dyn PeerPenalizer>,
) -> ConsensusSet {
    let validator: Arc<dyn BlockValidator> = Arc::new(StandardValidator::new());
    ConsensusSet::open(config(), validator, store, penalizer)
        .await
        .unwrap()
}

/// Block at `height` on top of `parent`, paying exactly subsidy plus fees
///
/// `salt` goes into the timestamp so siblings get distinct IDs.
pub fn child(parent: BlockId, height: BlockHeight, salt: u64, txns: Vec<Transaction>) -> Block {
    let fees = txns.iter().fold(Currency::ZERO, |acc, t| {
        acc.checked_add(t.fee_sum().unwrap()).unwrap()
    });
    Block::new(
        parent,
        salt,
        vec![SiacoinOutput {
            value: config()
                .chain
                .block_subsidy(height)
                .checked_add(fees)
                .unwrap(),
            unlock_hash: UnlockHash(Hash([salt as u8; 32])),
        }],
        txns,
    )
}

/// Penalizer that records every peer it is asked to penalize
#[derive(Debug, Default)]
pub struct RecordingPenalizer {
    pub penalized: Mutex<Vec<(String, BlockId)>>,
}

impl PeerPenalizer for RecordingPenalizer {
    fn penalize(&self, peer: &str, rejection: &Rejection) {
        self.penalized
            .lock()
            .push((peer.to_string(), rejection.block_id()));
    }
}
