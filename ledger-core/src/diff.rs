//! Reversible ledger diffs
//!
//! A diff names one atomic mutation of the ledger together with its
//! face-value [`Direction`]. The direction a diff is *committed* with is
//! supplied separately; combining the two gives the effective operation:
//!
//! | diff direction | commit direction | effect |
//! |----------------|------------------|--------|
//! | Apply          | Apply            | add    |
//! | Apply          | Revert           | remove |
//! | Revert         | Apply            | remove |
//! | Revert         | Revert           | add    |

use crate::types::{
    BlockHeight, FileContract, FileContractId, Hash, SiacoinOutput, SiacoinOutputId,
    SiafundOutput, SiafundOutputId,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Face-value intent of a diff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Creation
    Apply,
    /// Removal
    Revert,
}

impl Direction {
    /// The other direction
    pub fn opposite(self) -> Direction {
        match self {
            Direction::Apply => Direction::Revert,
            Direction::Revert => Direction::Apply,
        }
    }
}

/// Mutation a diff performs for a given commit direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Insert, ID must be absent
    Add,
    /// Delete, ID must be present with an equal value
    Remove,
}

impl Effect {
    /// Combine the diff's own direction with the commit direction
    pub fn of(diff_direction: Direction, commit_direction: Direction) -> Effect {
        if diff_direction == commit_direction {
            Effect::Add
        } else {
            Effect::Remove
        }
    }
}

/// Registry a diff targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiffKind {
    /// Spendable coin outputs
    SiacoinOutput,
    /// Fund (share) outputs
    SiafundOutput,
    /// Active file contracts
    FileContract,
    /// Maturity queue
    DelayedSiacoinOutput,
}

impl fmt::Display for DiffKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiffKind::SiacoinOutput => "siacoin output",
            DiffKind::SiafundOutput => "siafund output",
            DiffKind::FileContract => "file contract",
            DiffKind::DelayedSiacoinOutput => "delayed siacoin output",
        };
        f.write_str(name)
    }
}

/// Creation or removal of a spendable coin output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiacoinOutputDiff {
    /// Face-value direction
    pub direction: Direction,
    /// Output ID
    pub id: SiacoinOutputId,
    /// Output value and owner
    pub siacoin_output: SiacoinOutput,
}

/// Creation or removal of a fund output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiafundOutputDiff {
    /// Face-value direction
    pub direction: Direction,
    /// Output ID
    pub id: SiafundOutputId,
    /// Output value and owner
    pub siafund_output: SiafundOutput,
}

/// Creation or resolution of a file contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContractDiff {
    /// Face-value direction
    pub direction: Direction,
    /// Contract ID
    pub id: FileContractId,
    /// Contract terms
    pub file_contract: FileContract,
}

/// Creation or removal of a coin output in the maturity queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayedSiacoinOutputDiff {
    /// Face-value direction
    pub direction: Direction,
    /// Output ID
    pub id: SiacoinOutputId,
    /// Output value and owner
    pub siacoin_output: SiacoinOutput,
    /// Height at which the output becomes spendable
    pub maturity_height: BlockHeight,
}

/// Any of the four diff kinds, in the order a block produced them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Diff {
    /// Coin output
    SiacoinOutput(SiacoinOutputDiff),
    /// Fund output
    SiafundOutput(SiafundOutputDiff),
    /// File contract
    FileContract(FileContractDiff),
    /// Delayed coin output
    DelayedSiacoinOutput(DelayedSiacoinOutputDiff),
}

impl Diff {
    /// Targeted registry
    pub fn kind(&self) -> DiffKind {
        match self {
            Diff::SiacoinOutput(_) => DiffKind::SiacoinOutput,
            Diff::SiafundOutput(_) => DiffKind::SiafundOutput,
            Diff::FileContract(_) => DiffKind::FileContract,
            Diff::DelayedSiacoinOutput(_) => DiffKind::DelayedSiacoinOutput,
        }
    }

    /// Face-value direction
    pub fn direction(&self) -> Direction {
        match self {
            Diff::SiacoinOutput(d) => d.direction,
            Diff::SiafundOutput(d) => d.direction,
            Diff::FileContract(d) => d.direction,
            Diff::DelayedSiacoinOutput(d) => d.direction,
        }
    }

    /// ID of the targeted entity
    pub fn id(&self) -> Hash {
        match self {
            Diff::SiacoinOutput(d) => d.id.into(),
            Diff::SiafundOutput(d) => d.id.into(),
            Diff::FileContract(d) => d.id.into(),
            Diff::DelayedSiacoinOutput(d) => d.id.into(),
        }
    }

    /// Same diff with its face-value direction flipped
    pub fn inverted(&self) -> Diff {
        let mut diff = self.clone();
        match &mut diff {
            Diff::SiacoinOutput(d) => d.direction = d.direction.opposite(),
            Diff::SiafundOutput(d) => d.direction = d.direction.opposite(),
            Diff::FileContract(d) => d.direction = d.direction.opposite(),
            Diff::DelayedSiacoinOutput(d) => d.direction = d.direction.opposite(),
        }
        diff
    }
}

impl From<SiacoinOutputDiff> for Diff {
    fn from(diff: SiacoinOutputDiff) -> Self {
        Diff::SiacoinOutput(diff)
    }
}

impl From<SiafundOutputDiff> for Diff {
    fn from(diff: SiafundOutputDiff) -> Self {
        Diff::SiafundOutput(diff)
    }
}

impl From<FileContractDiff> for Diff {
    fn from(diff: FileContractDiff) -> Self {
        Diff::FileContract(diff)
    }
}

impl From<DelayedSiacoinOutputDiff> for Diff {
    fn from(diff: DelayedSiacoinOutputDiff) -> Self {
        Diff::DelayedSiacoinOutput(diff)
    }
}
