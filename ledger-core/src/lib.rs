//! Ledger Core
//!
//! Reversible, diff-based ledger state for a proof-of-work full node.
//!
//! # Architecture
//!
//! - **Diffs**: every ledger mutation is a typed, directional [`diff::Diff`]
//! - **Registries**: keyed stores for coin outputs, fund outputs and contracts
//! - **Maturity queue**: height-indexed buckets of delayed coin outputs
//! - **Commit engine**: the only code path that mutates the registries
//!
//! # Invariants
//!
//! - IDs are unique within every registry and maturity bucket
//! - Replaying the diffs of the best path from genesis reproduces the state
//! - A delayed output is never committed against an elapsed or present height
//! - Committing a diff in the opposite direction undoes it exactly

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod commit;
pub mod config;
pub mod crypto;
pub mod diff;
pub mod error;
pub mod maturity;
pub mod registry;
pub mod state;
pub mod storage;
pub mod types;

// Re-exports
pub use config::{Config, RocksDBConfig};
pub use diff::{
    DelayedSiacoinOutputDiff, Diff, DiffKind, Direction, FileContractDiff, SiacoinOutputDiff,
    SiafundOutputDiff,
};
pub use error::{ConsistencyFault, Error, Result};
pub use maturity::MaturityQueue;
pub use registry::Registry;
pub use state::ConsensusState;
pub use storage::{BlockStore, ChainWrite, MemoryStore, PathUpdate, RocksStore, StoredChain};
pub use types::{
    Block, BlockHeight, BlockId, Currency, FileContract, FileContractId, Hash, ProcessedBlock,
    SiacoinInput, SiacoinOutput, SiacoinOutputId, SiafundInput, SiafundOutput, SiafundOutputId,
    StorageProof, Transaction, TransactionId, UnlockHash, Work, SIACOIN_PRECISION,
};
