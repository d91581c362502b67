//! Diff generation
//!
//! Turns a block into the ordered diff list it implies, committing each
//! diff as it is produced so later transactions in the block see the
//! effects of earlier ones. The order is part of the contract: reverting a
//! block walks the same list backwards.
//!
//! For a block at height `H` the state sits at `H - 1` while diffs are
//! generated, and the list is:
//!
//! 1. per transaction: spent coin outputs, new coin outputs, new contracts,
//!    proven contracts with their delayed valid-proof payouts, spent fund
//!    outputs, new fund outputs
//! 2. miner payouts, delayed to `H + maturity_delay`
//! 3. the drain of maturity bucket `H` into the coin-output registry
//! 4. contracts whose window closes at `H`, with their delayed missed-proof
//!    payouts

use crate::config::ChainParams;
use crate::error::Rejection;
use crate::validation::BlockValidator;
use ledger_core::{
    Block, BlockHeight, ConsensusState, ConsistencyFault, DelayedSiacoinOutputDiff, Diff,
    Direction, FileContractDiff, ProcessedBlock, SiacoinOutputDiff, SiafundOutputDiff,
    Transaction,
};
use tracing::debug;

/// Why diff generation stopped
#[derive(Debug)]
pub enum GenerateError {
    /// The block is invalid. Every diff generated so far has been reverted.
    Rejected(Rejection),
    /// The registries disagree with the diffs; the state is untrustworthy
    Fault(ConsistencyFault),
}

impl From<ConsistencyFault> for GenerateError {
    fn from(fault: ConsistencyFault) -> Self {
        GenerateError::Fault(fault)
    }
}

/// Accumulates diffs, committing each one as it is recorded
struct DiffBuilder<'a> {
    state: &'a mut ConsensusState,
    diffs: Vec<Diff>,
}

impl<'a> DiffBuilder<'a> {
    fn new(state: &'a mut ConsensusState) -> Self {
        Self {
            state,
            diffs: Vec::new(),
        }
    }

    fn push(&mut self, diff: impl Into<Diff>) -> Result<(), ConsistencyFault> {
        let diff = diff.into();
        self.state.commit_diff(&diff, Direction::Apply)?;
        self.diffs.push(diff);
        Ok(())
    }

    /// Undo everything recorded so far
    fn abort(self) -> Result<(), ConsistencyFault> {
        self.state.commit_diffs(&self.diffs, Direction::Revert)
    }

    fn apply_transaction(
        &mut self,
        txn: &Transaction,
        maturity_height: BlockHeight,
    ) -> Result<(), ConsistencyFault> {
        // Transaction validity was checked against this same state, so a
        // missing entity here is a fault rather than a rejection.
        for input in &txn.siacoin_inputs {
            let output = self.state.siacoin_output(&input.parent_id).cloned().ok_or(
                ConsistencyFault::MissingEntity {
                    kind: ledger_core::DiffKind::SiacoinOutput,
                    id: input.parent_id.into(),
                },
            )?;
            self.push(SiacoinOutputDiff {
                direction: Direction::Revert,
                id: input.parent_id,
                siacoin_output: output,
            })?;
        }

        for (i, output) in txn.siacoin_outputs.iter().enumerate() {
            self.push(SiacoinOutputDiff {
                direction: Direction::Apply,
                id: txn.siacoin_output_id(i),
                siacoin_output: output.clone(),
            })?;
        }

        for (i, fc) in txn.file_contracts.iter().enumerate() {
            self.push(FileContractDiff {
                direction: Direction::Apply,
                id: txn.file_contract_id(i),
                file_contract: fc.clone(),
            })?;
        }

        for proof in &txn.storage_proofs {
            let fc = self.state.file_contract(&proof.parent_id).cloned().ok_or(
                ConsistencyFault::MissingEntity {
                    kind: ledger_core::DiffKind::FileContract,
                    id: proof.parent_id.into(),
                },
            )?;
            for (i, output) in fc.valid_proof_outputs.iter().enumerate() {
                self.push(DelayedSiacoinOutputDiff {
                    direction: Direction::Apply,
                    id: proof.parent_id.storage_proof_output_id(true, i),
                    siacoin_output: output.clone(),
                    maturity_height,
                })?;
            }
            self.push(FileContractDiff {
                direction: Direction::Revert,
                id: proof.parent_id,
                file_contract: fc,
            })?;
        }

        for input in &txn.siafund_inputs {
            let output = self.state.siafund_output(&input.parent_id).cloned().ok_or(
                ConsistencyFault::MissingEntity {
                    kind: ledger_core::DiffKind::SiafundOutput,
                    id: input.parent_id.into(),
                },
            )?;
            self.push(SiafundOutputDiff {
                direction: Direction::Revert,
                id: input.parent_id,
                siafund_output: output,
            })?;
        }

        for (i, output) in txn.siafund_outputs.iter().enumerate() {
            self.push(SiafundOutputDiff {
                direction: Direction::Apply,
                id: txn.siafund_output_id(i),
                siafund_output: output.clone(),
            })?;
        }

        Ok(())
    }

    fn apply_miner_payouts(
        &mut self,
        block: &Block,
        maturity_height: BlockHeight,
    ) -> Result<(), ConsistencyFault> {
        for (i, payout) in block.miner_payouts.iter().enumerate() {
            self.push(DelayedSiacoinOutputDiff {
                direction: Direction::Apply,
                id: block.miner_payout_id(i),
                siacoin_output: payout.clone(),
                maturity_height,
            })?;
        }
        Ok(())
    }

    /// Move bucket `height` into the coin-output registry
    fn apply_matured_outputs(&mut self, height: BlockHeight) -> Result<(), ConsistencyFault> {
        let matured: Vec<_> = match self.state.delayed_siacoin_outputs().bucket(height) {
            Some(bucket) => bucket.iter().map(|(id, o)| (*id, o.clone())).collect(),
            None => return Ok(()),
        };

        debug!(height, outputs = matured.len(), "Draining maturity bucket");

        for (id, output) in matured {
            self.push(SiacoinOutputDiff {
                direction: Direction::Apply,
                id,
                siacoin_output: output.clone(),
            })?;
            self.push(DelayedSiacoinOutputDiff {
                direction: Direction::Revert,
                id,
                siacoin_output: output,
                maturity_height: height,
            })?;
        }
        Ok(())
    }

    /// Resolve contracts whose window closes at `height` as missed
    fn apply_missed_proofs(
        &mut self,
        height: BlockHeight,
        maturity_height: BlockHeight,
    ) -> Result<(), ConsistencyFault> {
        for (id, fc) in self.state.expiring_contracts(height) {
            for (i, output) in fc.missed_proof_outputs.iter().enumerate() {
                self.push(DelayedSiacoinOutputDiff {
                    direction: Direction::Apply,
                    id: id.storage_proof_output_id(false, i),
                    siacoin_output: output.clone(),
                    maturity_height,
                })?;
            }
            self.push(FileContractDiff {
                direction: Direction::Revert,
                id,
                file_contract: fc,
            })?;
        }
        Ok(())
    }
}

/// Generate and commit the diffs of `pb`, which must extend the tip of
/// `state`. On a rejection the state is left as it was found.
pub fn generate_and_apply(
    state: &mut ConsensusState,
    pb: &ProcessedBlock,
    params: &ChainParams,
    validator: &dyn BlockValidator,
) -> Result<Vec<Diff>, GenerateError> {
    let height = pb.height;
    let maturity_height = height + params.maturity_delay;
    let mut builder = DiffBuilder::new(state);

    for (index, txn) in pb.block.transactions.iter().enumerate() {
        if let Err(reason) = validator.validate_transaction(txn, &*builder.state, height) {
            builder.abort()?;
            return Err(GenerateError::Rejected(Rejection::InvalidTransaction {
                block: pb.id,
                index,
                reason,
            }));
        }
        builder.apply_transaction(txn, maturity_height)?;
    }

    builder.apply_miner_payouts(&pb.block, maturity_height)?;
    builder.apply_matured_outputs(height)?;
    builder.apply_missed_proofs(height, maturity_height)?;

    Ok(builder.diffs)
}

/// Diffs of the genesis block: its fund allocation
///
/// The genesis block is trusted and not validated, but the allocation
/// still goes through the commit engine like every other change.
pub fn genesis_diffs(genesis: &Block) -> Vec<Diff> {
    genesis
        .transactions
        .iter()
        .flat_map(|txn| {
            txn.siafund_outputs
                .iter()
                .enumerate()
                .map(move |(i, output)| {
                    Diff::from(SiafundOutputDiff {
                        direction: Direction::Apply,
                        id: txn.siafund_output_id(i),
                        siafund_output: output.clone(),
                    })
                })
        })
        .collect()
}
