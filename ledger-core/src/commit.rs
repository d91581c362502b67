//! Diff commit engine
//!
//! The only code path that mutates the registries and the maturity queue.
//! Each diff is committed with a direction; the effective operation is an
//! add when that direction equals the diff's own, a remove otherwise (see
//! [`Effect::of`]). Any precondition failure is a [`ConsistencyFault`].

use crate::diff::{
    DelayedSiacoinOutputDiff, Diff, DiffKind, Direction, Effect, FileContractDiff,
    SiacoinOutputDiff, SiafundOutputDiff,
};
use crate::error::ConsistencyFault;
use crate::registry::{Registry, RemoveError};
use crate::state::ConsensusState;
use crate::types::Hash;
use tracing::trace;

fn commit_to_registry<K, V>(
    registry: &mut Registry<K, V>,
    kind: DiffKind,
    id: K,
    value: &V,
    effect: Effect,
) -> Result<(), ConsistencyFault>
where
    K: Ord + Copy + Into<Hash>,
    V: PartialEq + Clone,
{
    match effect {
        Effect::Add => {
            if !registry.insert_if_absent(id, value.clone()) {
                return Err(ConsistencyFault::DuplicateEntity {
                    kind,
                    id: id.into(),
                });
            }
        }
        Effect::Remove => {
            registry
                .remove_matching(&id, value)
                .map_err(|e| remove_fault(e, kind, id.into()))?;
        }
    }
    Ok(())
}

fn remove_fault(err: RemoveError, kind: DiffKind, id: Hash) -> ConsistencyFault {
    match err {
        RemoveError::Missing => ConsistencyFault::MissingEntity { kind, id },
        RemoveError::Mismatch => ConsistencyFault::ValueMismatch { kind, id },
    }
}

impl ConsensusState {
    /// Commit a coin output diff
    pub fn commit_siacoin_output_diff(
        &mut self,
        diff: &SiacoinOutputDiff,
        dir: Direction,
    ) -> Result<(), ConsistencyFault> {
        commit_to_registry(
            &mut self.siacoin_outputs,
            DiffKind::SiacoinOutput,
            diff.id,
            &diff.siacoin_output,
            Effect::of(diff.direction, dir),
        )
    }

    /// Commit a fund output diff
    pub fn commit_siafund_output_diff(
        &mut self,
        diff: &SiafundOutputDiff,
        dir: Direction,
    ) -> Result<(), ConsistencyFault> {
        commit_to_registry(
            &mut self.siafund_outputs,
            DiffKind::SiafundOutput,
            diff.id,
            &diff.siafund_output,
            Effect::of(diff.direction, dir),
        )
    }

    /// Commit a file contract diff
    pub fn commit_file_contract_diff(
        &mut self,
        diff: &FileContractDiff,
        dir: Direction,
    ) -> Result<(), ConsistencyFault> {
        commit_to_registry(
            &mut self.file_contracts,
            DiffKind::FileContract,
            diff.id,
            &diff.file_contract,
            Effect::of(diff.direction, dir),
        )
    }

    /// Commit a delayed coin output diff
    ///
    /// The maturity height must lie strictly above the current height in
    /// both directions. That check runs before the existence check.
    pub fn commit_delayed_siacoin_output_diff(
        &mut self,
        diff: &DelayedSiacoinOutputDiff,
        dir: Direction,
    ) -> Result<(), ConsistencyFault> {
        let height = self.height();
        if diff.maturity_height <= height {
            return Err(ConsistencyFault::BadMaturityHeight {
                id: diff.id.into(),
                maturity_height: diff.maturity_height,
                height,
            });
        }

        let kind = DiffKind::DelayedSiacoinOutput;
        match Effect::of(diff.direction, dir) {
            Effect::Add => {
                if !self.delayed_siacoin_outputs.insert_if_absent(
                    diff.maturity_height,
                    diff.id,
                    diff.siacoin_output.clone(),
                ) {
                    return Err(ConsistencyFault::DuplicateEntity {
                        kind,
                        id: diff.id.into(),
                    });
                }
            }
            Effect::Remove => {
                self.delayed_siacoin_outputs
                    .remove_matching(diff.maturity_height, &diff.id, &diff.siacoin_output)
                    .map_err(|e| remove_fault(e, kind, diff.id.into()))?;
            }
        }
        Ok(())
    }

    /// Commit any diff
    pub fn commit_diff(&mut self, diff: &Diff, dir: Direction) -> Result<(), ConsistencyFault> {
        trace!(kind = %diff.kind(), id = %diff.id(), ?dir, "Committing diff");
        match diff {
            Diff::SiacoinOutput(d) => self.commit_siacoin_output_diff(d, dir),
            Diff::SiafundOutput(d) => self.commit_siafund_output_diff(d, dir),
            Diff::FileContract(d) => self.commit_file_contract_diff(d, dir),
            Diff::DelayedSiacoinOutput(d) => self.commit_delayed_siacoin_output_diff(d, dir),
        }
    }

    /// Commit a block's diff list: forward for `Apply`, backward for `Revert`
    ///
    /// Stops at the first fault. The registries are then mid-sequence and
    /// must not be trusted.
    pub fn commit_diffs(&mut self, diffs: &[Diff], dir: Direction) -> Result<(), ConsistencyFault> {
        match dir {
            Direction::Apply => diffs.iter().try_for_each(|d| self.commit_diff(d, dir)),
            Direction::Revert => diffs.iter().rev().try_for_each(|d| self.commit_diff(d, dir)),
        }
    }
}
