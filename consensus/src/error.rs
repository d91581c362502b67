//! Error types for consensus
//!
//! Two classes of failure leave block processing:
//! - [`Rejection`]: the candidate block is discarded and the state is
//!   untouched. Expected under normal network conditions.
//! - Fatal errors ([`Error::is_fatal`]): a consistency fault or a failed
//!   persistence write. The processor halts and never mutates the ledger
//!   again in this process.

use ledger_core::{BlockId, ConsistencyFault, FileContractId, SiacoinOutputId, SiafundOutputId};
use thiserror::Error;

/// Result type for consensus operations
pub type Result<T> = std::result::Result<T, Error>;

/// Consensus errors
#[derive(Error, Debug)]
pub enum Error {
    /// Candidate block rejected, state unchanged
    #[error("Block rejected: {0}")]
    Rejected(#[from] Rejection),

    /// Ledger integrity violation, processing halted
    #[error("Consistency fault: {0}")]
    Fault(ConsistencyFault),

    /// Processing was halted by an earlier fatal error
    #[error("Block processing halted after a fatal error")]
    Halted,

    /// Per-block persistence failed, processing halted
    #[error("Persistence failure: {0}")]
    Persistence(ledger_core::Error),

    /// Ledger error outside block processing (opening, loading)
    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger_core::Error),

    /// Actor or channel failure
    #[error("Concurrency error: {0}")]
    Concurrency(String),

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

impl Error {
    /// Whether the error halts block processing for the process lifetime
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fault(_) | Error::Persistence(_) | Error::Halted)
    }

    /// The rejection, if this is one
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Error::Rejected(r) => Some(r),
            _ => None,
        }
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

/// Why a candidate block was turned away
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Already in the block tree
    #[error("block {0} is already known")]
    BlockKnown(BlockId),

    /// Parent not in the block tree
    #[error("parent {parent} of block {block} is unknown")]
    Orphan {
        /// Rejected block
        block: BlockId,
        /// Missing parent
        parent: BlockId,
    },

    /// Previously identified as a denial-of-service block
    #[error("block {0} is a known denial-of-service block")]
    KnownDoSBlock(BlockId),

    /// Block-level rule violation
    #[error("invalid block {block}: {reason}")]
    InvalidBlock {
        /// Rejected block
        block: BlockId,
        /// Violated rule
        reason: String,
    },

    /// A transaction in the block is invalid
    #[error("transaction {index} of block {block} is invalid: {reason}")]
    InvalidTransaction {
        /// Rejected block
        block: BlockId,
        /// Position of the transaction in the block
        index: usize,
        /// Violated rule
        reason: TxnError,
    },
}

impl Rejection {
    /// Whether the rejection carries the denial-of-service signature, so
    /// the sending peer should be penalized
    pub fn is_dos(&self) -> bool {
        match self {
            Rejection::KnownDoSBlock(_) => true,
            Rejection::InvalidTransaction { reason, .. } => reason.is_dos_signature(),
            _ => false,
        }
    }

    /// Block the rejection is about
    pub fn block_id(&self) -> BlockId {
        match self {
            Rejection::BlockKnown(id) | Rejection::KnownDoSBlock(id) => *id,
            Rejection::Orphan { block, .. }
            | Rejection::InvalidBlock { block, .. }
            | Rejection::InvalidTransaction { block, .. } => *block,
        }
    }
}

/// Transaction validity failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxnError {
    /// Spent coin output does not exist
    #[error("siacoin output {0} does not exist")]
    MissingSiacoinOutput(SiacoinOutputId),

    /// Spent fund output does not exist
    #[error("siafund output {0} does not exist")]
    MissingSiafundOutput(SiafundOutputId),

    /// Proven contract does not exist
    #[error("file contract {0} does not exist")]
    MissingFileContract(FileContractId),

    /// Same output spent or contract proven twice
    #[error("{0} is spent more than once")]
    DoubleSpend(String),

    /// Inputs are funded but the funds are never spent
    #[error("inputs exceed outputs: funded but never spent")]
    UnspentFunds,

    /// Coin outputs exceed coin inputs
    #[error("siacoin outputs exceed inputs")]
    SiacoinMismatch,

    /// Fund inputs and outputs differ
    #[error("siafund inputs and outputs differ")]
    SiafundMismatch,

    /// Contract window already open or empty
    #[error("file contract window is invalid")]
    BadContractWindow,

    /// Contract payouts do not add up to the contract payout
    #[error("file contract payouts do not match the payout")]
    ContractPayoutMismatch,

    /// Storage proof submitted before the window opened
    #[error("storage proof submitted outside the proof window")]
    StorageProofWindow,

    /// Currency arithmetic overflowed
    #[error("currency overflow")]
    Overflow,

    /// An output, fund output or contract payout carries no value
    #[error("zero-value output")]
    ZeroValueOutput,

    /// A derived output or contract ID is already in the ledger
    #[error("{0} already exists")]
    OutputExists(String),
}

impl TxnError {
    /// The "funded but never spent" pattern that marks a
    /// denial-of-service block
    pub fn is_dos_signature(&self) -> bool {
        matches!(self, TxnError::UnspentFunds)
    }
}
