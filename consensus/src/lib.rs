//! Consensus set
//!
//! Accepts blocks, resolves forks and keeps the ledger state of the best
//! path, changing it only through the reversible diffs of `ledger-core`.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │        ConsensusSet  (lookups, accept, subscribe)    │
//! └────────────────────┬────────────────────────────────┘
//!                      │ mailbox
//!                      ↓
//! ┌─────────────────────────────────────────────────────┐
//! │   ConsensusActor → BlockProcessor → diff generator   │
//! │   BlockTree (all branches)   BlockValidator (oracle) │
//! └──────────┬──────────────────────────────┬───────────┘
//!            │ commit diffs                  │ after persist
//!            ↓                               ↓
//! ┌────────────────────────────┐  ┌─────────────────────┐
//! │ ledger-core ConsensusState │  │  NotificationBus     │
//! │ registries, maturity queue │  │  tiered, acked       │
//! └────────────────────────────┘  └─────────────────────┘
//! ```
//!
//! # Guarantees
//!
//! - One block is processed at a time, from validation to the last
//!   subscriber acknowledgement
//! - A rejected block leaves the state untouched
//! - Every path change is persisted atomically before it is announced
//! - A consistency fault halts processing for the rest of the process

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod actor;
pub mod blocktree;
pub mod config;
pub mod consensus_set;
pub mod error;
pub mod generator;
pub mod metrics;
pub mod processor;
pub mod subscribers;
pub mod validation;

// Re-exports
pub use config::{ChainParams, Config, NotificationConfig, SiafundAllocation};
pub use consensus_set::{ConsensusSet, NoopPenalizer, PeerPenalizer};
pub use error::{Error, Rejection, Result, TxnError};
pub use metrics::Metrics;
pub use processor::{AcceptOutcome, BlockProcessor, Phase};
pub use subscribers::{
    BlockDiffs, ConsensusUpdate, Notification, NotificationBus, SubscriberTier, Subscription,
};
pub use validation::{BlockValidator, StandardValidator};
