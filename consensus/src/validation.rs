//! Block and transaction validity oracle
//!
//! The processor never decides validity on its own; it asks a
//! [`BlockValidator`]. [`StandardValidator`] covers the ledger-level rules
//! (existence of spent outputs, balance, contract windows and the miner
//! payout). Signature, difficulty and timestamp rules belong to a
//! validator layered in front of it.

use crate::config::ChainParams;
use crate::error::{Rejection, TxnError};
use ledger_core::{
    Block, BlockHeight, BlockId, ConsensusState, Currency, ProcessedBlock, Transaction, Work,
};
use std::collections::HashSet;

/// Validity oracle consulted during block acceptance
pub trait BlockValidator: Send + Sync {
    /// Check block-level rules against the parent. Returns the work the
    /// block adds to its chain.
    fn validate_block(
        &self,
        block: &Block,
        id: BlockId,
        parent: &ProcessedBlock,
        params: &ChainParams,
    ) -> Result<Work, Rejection>;

    /// Check a transaction against the state it will be applied to
    fn validate_transaction(
        &self,
        txn: &Transaction,
        state: &ConsensusState,
        height: BlockHeight,
    ) -> Result<(), TxnError>;
}

/// Ledger-level rules, one unit of work per block
#[derive(Debug, Clone, Default)]
pub struct StandardValidator;

impl StandardValidator {
    /// Create validator
    pub fn new() -> Self {
        Self
    }

    fn sum(values: impl IntoIterator<Item = Currency>) -> Result<Currency, TxnError> {
        Currency::checked_sum(values).ok_or(TxnError::Overflow)
    }
}

impl BlockValidator for StandardValidator {
    fn validate_block(
        &self,
        block: &Block,
        id: BlockId,
        parent: &ProcessedBlock,
        params: &ChainParams,
    ) -> Result<Work, Rejection> {
        let invalid = |reason: &str| Rejection::InvalidBlock {
            block: id,
            reason: reason.to_string(),
        };

        let height = parent.height + 1;
        let fees = block.total_fees().ok_or_else(|| invalid("fee overflow"))?;
        let expected = params
            .block_subsidy(height)
            .checked_add(fees)
            .ok_or_else(|| invalid("payout overflow"))?;
        let paid = block.payout_sum().ok_or_else(|| invalid("payout overflow"))?;

        if paid != expected {
            return Err(Rejection::InvalidBlock {
                block: id,
                reason: format!("miner payouts total {}, expected {}", paid, expected),
            });
        }

        Ok(Work(1))
    }

    fn validate_transaction(
        &self,
        txn: &Transaction,
        state: &ConsensusState,
        height: BlockHeight,
    ) -> Result<(), TxnError> {
        // Coin inputs
        let mut spent = HashSet::new();
        let mut coin_in = Vec::with_capacity(txn.siacoin_inputs.len());
        for input in &txn.siacoin_inputs {
            if !spent.insert(input.parent_id) {
                return Err(TxnError::DoubleSpend(input.parent_id.to_string()));
            }
            let output = state
                .siacoin_output(&input.parent_id)
                .ok_or(TxnError::MissingSiacoinOutput(input.parent_id))?;
            coin_in.push(output.value);
        }

        // Created entities: non-zero value and fresh IDs. IDs derive from
        // the transaction alone, so a repeated transaction collides here.
        for (i, output) in txn.siacoin_outputs.iter().enumerate() {
            if output.value == Currency::ZERO {
                return Err(TxnError::ZeroValueOutput);
            }
            let id = txn.siacoin_output_id(i);
            if state.siacoin_output(&id).is_some() {
                return Err(TxnError::OutputExists(id.to_string()));
            }
        }
        for (i, output) in txn.siafund_outputs.iter().enumerate() {
            if output.value == Currency::ZERO {
                return Err(TxnError::ZeroValueOutput);
            }
            let id = txn.siafund_output_id(i);
            if state.siafund_output(&id).is_some() {
                return Err(TxnError::OutputExists(id.to_string()));
            }
        }
        for (i, fc) in txn.file_contracts.iter().enumerate() {
            let zero_payout = fc
                .valid_proof_outputs
                .iter()
                .chain(&fc.missed_proof_outputs)
                .any(|o| o.value == Currency::ZERO);
            if fc.payout == Currency::ZERO || zero_payout {
                return Err(TxnError::ZeroValueOutput);
            }
            let id = txn.file_contract_id(i);
            if state.file_contract(&id).is_some() {
                return Err(TxnError::OutputExists(id.to_string()));
            }
        }

        // New contracts
        for fc in &txn.file_contracts {
            if fc.window_start <= height || fc.window_end <= fc.window_start {
                return Err(TxnError::BadContractWindow);
            }
            let valid = Self::sum(fc.valid_proof_outputs.iter().map(|o| o.value))?;
            let missed = Self::sum(fc.missed_proof_outputs.iter().map(|o| o.value))?;
            if valid != fc.payout || missed != fc.payout {
                return Err(TxnError::ContractPayoutMismatch);
            }
        }

        // Storage proofs
        let mut proven = HashSet::new();
        for proof in &txn.storage_proofs {
            if !proven.insert(proof.parent_id) {
                return Err(TxnError::DoubleSpend(proof.parent_id.to_string()));
            }
            let fc = state
                .file_contract(&proof.parent_id)
                .ok_or(TxnError::MissingFileContract(proof.parent_id))?;
            if height < fc.window_start {
                return Err(TxnError::StorageProofWindow);
            }
        }

        // Fund inputs and outputs
        let mut fund_spent = HashSet::new();
        let mut fund_in = Vec::with_capacity(txn.siafund_inputs.len());
        for input in &txn.siafund_inputs {
            if !fund_spent.insert(input.parent_id) {
                return Err(TxnError::DoubleSpend(input.parent_id.to_string()));
            }
            let output = state
                .siafund_output(&input.parent_id)
                .ok_or(TxnError::MissingSiafundOutput(input.parent_id))?;
            fund_in.push(output.value);
        }
        let fund_out = Self::sum(txn.siafund_outputs.iter().map(|o| o.value))?;
        if Self::sum(fund_in)? != fund_out {
            return Err(TxnError::SiafundMismatch);
        }

        // Coin balance: inputs == outputs + fees + contract payouts
        let coin_in = Self::sum(coin_in)?;
        let coin_out = Self::sum(
            txn.siacoin_outputs
                .iter()
                .map(|o| o.value)
                .chain(txn.miner_fees.iter().copied())
                .chain(txn.file_contracts.iter().map(|fc| fc.payout)),
        )?;
        if coin_in > coin_out {
            return Err(TxnError::UnspentFunds);
        }
        if coin_in < coin_out {
            return Err(TxnError::SiacoinMismatch);
        }

        Ok(())
    }
}
