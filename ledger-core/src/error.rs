//! Error types for the ledger

use crate::diff::DiffKind;
use crate::types::{BlockHeight, Hash};
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Registry history does not match the diffs being committed
    #[error("Consistency fault: {0}")]
    Consistency(#[from] ConsistencyFault),

    /// Block not found
    #[error("Block not found: {0}")]
    BlockNotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

/// Fatal violation of a structural ledger invariant.
///
/// A fault means the diff list being replayed does not correspond to the
/// actual registry history. It is never retried and never healed: the
/// consensus set stops mutating the ledger once one is raised.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyFault {
    /// ADD of an ID that is already present
    #[error("{kind} {id} already exists")]
    DuplicateEntity {
        /// Registry targeted by the diff
        kind: DiffKind,
        /// Offending ID
        id: Hash,
    },

    /// REMOVE of an ID that is absent
    #[error("{kind} {id} does not exist")]
    MissingEntity {
        /// Registry targeted by the diff
        kind: DiffKind,
        /// Offending ID
        id: Hash,
    },

    /// REMOVE of an ID whose stored value differs from the diff
    #[error("{kind} {id} does not match the recorded value")]
    ValueMismatch {
        /// Registry targeted by the diff
        kind: DiffKind,
        /// Offending ID
        id: Hash,
    },

    /// Delayed output committed against an elapsed or present height
    #[error("delayed output {id} matures at {maturity_height}, current height is {height}")]
    BadMaturityHeight {
        /// Offending ID
        id: Hash,
        /// Maturity height recorded on the diff
        maturity_height: BlockHeight,
        /// Consensus height at commit time
        height: BlockHeight,
    },

    /// A maturity bucket at or below the current height still holds outputs
    #[error("maturity bucket {bucket} is non-empty at height {height}")]
    StaleMaturityBucket {
        /// Height of the stale bucket
        bucket: BlockHeight,
        /// Consensus height
        height: BlockHeight,
    },

    /// Total siafunds drifted from the genesis allocation
    #[error("siafund total is {actual}, expected {expected}")]
    SiafundCountMismatch {
        /// Genesis allocation
        expected: u128,
        /// Sum over the fund-output registry
        actual: u128,
    },

    /// A best-path block is missing the diffs needed to revert or replay it
    #[error("block {0} has no recorded diffs")]
    MissingBlockDiffs(Hash),

    /// A block expected at the tip of the best path is not there
    #[error("block {0} is not the tip of the best path")]
    NotTip(Hash),
}
