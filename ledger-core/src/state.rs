//! Consensus state
//!
//! The single owner of the ledger registries, the maturity queue and the
//! best path. Every accessor here is read-only; registry mutation goes
//! through the commit engine in [`crate::commit`].

use crate::error::ConsistencyFault;
use crate::maturity::MaturityQueue;
use crate::registry::Registry;
use crate::types::{
    BlockHeight, BlockId, FileContract, FileContractId, SiacoinOutput, SiacoinOutputId,
    SiafundOutput, SiafundOutputId,
};
use serde::{Deserialize, Serialize};

/// Ledger state at the tip of the best path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusState {
    current_path: Vec<BlockId>,
    pub(crate) siacoin_outputs: Registry<SiacoinOutputId, SiacoinOutput>,
    pub(crate) siafund_outputs: Registry<SiafundOutputId, SiafundOutput>,
    pub(crate) file_contracts: Registry<FileContractId, FileContract>,
    pub(crate) delayed_siacoin_outputs: MaturityQueue,
}

impl ConsensusState {
    /// Create empty state (no genesis applied)
    pub fn new() -> Self {
        Self::default()
    }

    /// Height of the tip. Genesis and the empty path are both height 0.
    pub fn height(&self) -> BlockHeight {
        self.current_path.len().saturating_sub(1) as BlockHeight
    }

    /// Best path from genesis to tip
    pub fn current_path(&self) -> &[BlockId] {
        &self.current_path
    }

    /// Tip of the best path
    pub fn current_block(&self) -> Option<BlockId> {
        self.current_path.last().copied()
    }

    /// Block at `height` on the best path
    pub fn block_at(&self, height: BlockHeight) -> Option<BlockId> {
        self.current_path.get(height as usize).copied()
    }

    /// Whether `id` is on the best path
    pub fn on_current_path(&self, id: &BlockId, height: BlockHeight) -> bool {
        self.block_at(height).as_ref() == Some(id)
    }

    /// Unspent coin output
    pub fn siacoin_output(&self, id: &SiacoinOutputId) -> Option<&SiacoinOutput> {
        self.siacoin_outputs.get(id)
    }

    /// Unspent fund output
    pub fn siafund_output(&self, id: &SiafundOutputId) -> Option<&SiafundOutput> {
        self.siafund_outputs.get(id)
    }

    /// Active file contract
    pub fn file_contract(&self, id: &FileContractId) -> Option<&FileContract> {
        self.file_contracts.get(id)
    }

    /// Coin output registry
    pub fn siacoin_outputs(&self) -> &Registry<SiacoinOutputId, SiacoinOutput> {
        &self.siacoin_outputs
    }

    /// Fund output registry
    pub fn siafund_outputs(&self) -> &Registry<SiafundOutputId, SiafundOutput> {
        &self.siafund_outputs
    }

    /// Contract registry
    pub fn file_contracts(&self) -> &Registry<FileContractId, FileContract> {
        &self.file_contracts
    }

    /// Maturity queue
    pub fn delayed_siacoin_outputs(&self) -> &MaturityQueue {
        &self.delayed_siacoin_outputs
    }

    /// Contracts whose proof window closes at `height`, in ID order
    pub fn expiring_contracts(&self, height: BlockHeight) -> Vec<(FileContractId, FileContract)> {
        self.file_contracts
            .iter()
            .filter(|(_, fc)| fc.window_end == height)
            .map(|(id, fc)| (*id, fc.clone()))
            .collect()
    }

    /// Sum of every fund output
    pub fn siafund_total(&self) -> u128 {
        self.siafund_outputs
            .iter()
            .fold(0u128, |acc, (_, o)| acc.saturating_add(o.value.0))
    }

    /// Append a block to the best path
    pub fn push_block(&mut self, id: BlockId) {
        self.current_path.push(id);
    }

    /// Drop the tip of the best path
    pub fn pop_block(&mut self) -> Option<BlockId> {
        self.current_path.pop()
    }

    /// Structural checks that must hold between blocks
    ///
    /// No maturity bucket may remain at or below the current height, and,
    /// when `expected_siafunds` is given, the fund registry must hold exactly
    /// that many funds.
    pub fn check_consistency(
        &self,
        expected_siafunds: Option<u128>,
    ) -> Result<(), ConsistencyFault> {
        let height = self.height();
        if let Some(bucket) = self.delayed_siacoin_outputs.first_stale_bucket(height) {
            return Err(ConsistencyFault::StaleMaturityBucket { bucket, height });
        }

        if let Some(expected) = expected_siafunds {
            let actual = self.siafund_total();
            if actual != expected {
                return Err(ConsistencyFault::SiafundCountMismatch { expected, actual });
            }
        }

        Ok(())
    }
}
