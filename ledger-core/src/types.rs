//! Core types for the ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode), so persisted diffs and blocks
//!   re-decode bit-identically
//! - Content addressing (every identifier is a SHA-256 digest)
//! - Exact arithmetic (integer base units, checked)

use crate::crypto::{hash_all, hash_object, merkle_root};
use crate::diff::Diff;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;

/// Height of a block on the best path (genesis is 0)
pub type BlockHeight = u64;

/// Base units per siacoin
pub const SIACOIN_PRECISION: u128 = 1_000_000_000_000_000_000_000_000;

/// Specifiers mixed into child identifiers so that different kinds of
/// object derived from the same parent never collide.
const SPECIFIER_SIACOIN_OUTPUT: &[u8; 16] = b"siacoin output\0\0";
const SPECIFIER_SIAFUND_OUTPUT: &[u8; 16] = b"siafund output\0\0";
const SPECIFIER_FILE_CONTRACT: &[u8; 16] = b"file contract\0\0\0";
const SPECIFIER_STORAGE_PROOF: &[u8; 16] = b"storage proof\0\0\0";
const SPECIFIER_MINER_PAYOUT: &[u8; 16] = b"miner payout\0\0\0\0";

/// 32-byte SHA-256 digest
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, std::hash::Hash, Serialize, Deserialize,
)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// Get bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First 8 bytes are plenty to tell IDs apart in logs
        for byte in &self.0[..8] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, std::hash::Hash,
            Serialize, Deserialize,
        )]
        pub struct $name(pub Hash);

        impl $name {
            /// Underlying digest
            pub fn as_hash(&self) -> Hash {
                self.0
            }
        }

        impl From<Hash> for $name {
            fn from(hash: Hash) -> Self {
                Self(hash)
            }
        }

        impl From<$name> for Hash {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:?})", stringify!($name), self.0)
            }
        }
    };
}

define_id!(
    /// Block identifier
    BlockId
);
define_id!(
    /// Transaction identifier
    TransactionId
);
define_id!(
    /// Coin output identifier
    SiacoinOutputId
);
define_id!(
    /// Fund (share) output identifier
    SiafundOutputId
);
define_id!(
    /// File contract identifier
    FileContractId
);
define_id!(
    /// Hash of the conditions that unlock an output
    UnlockHash
);

/// Amount of coins or funds in base units
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, std::hash::Hash, Serialize,
    Deserialize,
)]
pub struct Currency(pub u128);

impl Currency {
    /// Zero
    pub const ZERO: Currency = Currency(0);

    /// Create from base units
    pub fn new(base_units: u128) -> Self {
        Self(base_units)
    }

    /// Whole coins scaled by [`SIACOIN_PRECISION`]
    pub fn from_coins(coins: u64) -> Self {
        Self(coins as u128 * SIACOIN_PRECISION)
    }

    /// Checked addition
    pub fn checked_add(self, other: Currency) -> Option<Currency> {
        self.0.checked_add(other.0).map(Currency)
    }

    /// Checked subtraction
    pub fn checked_sub(self, other: Currency) -> Option<Currency> {
        self.0.checked_sub(other.0).map(Currency)
    }

    /// Sum of a sequence, `None` on overflow
    pub fn checked_sum<I>(values: I) -> Option<Currency>
    where
        I: IntoIterator<Item = Currency>,
    {
        values
            .into_iter()
            .try_fold(Currency::ZERO, |acc, v| acc.checked_add(v))
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cumulative proof-of-work weight
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Work(pub u128);

impl Work {
    /// No work
    pub const ZERO: Work = Work(0);
}

impl Add for Work {
    type Output = Work;

    fn add(self, rhs: Work) -> Work {
        Work(self.0.saturating_add(rhs.0))
    }
}

/// Spendable coin balance unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiacoinOutput {
    /// Amount
    pub value: Currency,
    /// Owner
    pub unlock_hash: UnlockHash,
}

/// Fund (share) balance unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiafundOutput {
    /// Number of funds
    pub value: Currency,
    /// Owner
    pub unlock_hash: UnlockHash,
}

/// Storage agreement with payouts depending on whether a proof lands
/// inside the proof window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContract {
    /// Size of the stored file (bytes)
    pub file_size: u64,
    /// Merkle root of the stored file
    pub file_merkle_root: Hash,
    /// First height at which a storage proof is accepted
    pub window_start: BlockHeight,
    /// Height at which the contract expires unproven
    pub window_end: BlockHeight,
    /// Total locked into the contract
    pub payout: Currency,
    /// Paid out when a storage proof is submitted in the window
    pub valid_proof_outputs: Vec<SiacoinOutput>,
    /// Paid out when the window closes without a proof
    pub missed_proof_outputs: Vec<SiacoinOutput>,
    /// Conditions for revising the contract
    pub unlock_hash: UnlockHash,
    /// Revision counter
    pub revision_number: u64,
}

/// Spends a coin output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiacoinInput {
    /// Output being spent
    pub parent_id: SiacoinOutputId,
}

/// Spends a fund output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiafundInput {
    /// Output being spent
    pub parent_id: SiafundOutputId,
}

/// Resolves a file contract as fulfilled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageProof {
    /// Contract being proven
    pub parent_id: FileContractId,
    /// Opaque proof payload, checked by the validation collaborator
    pub proof: Vec<u8>,
}

/// Ledger transaction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Coin outputs spent
    pub siacoin_inputs: Vec<SiacoinInput>,
    /// Coin outputs created
    pub siacoin_outputs: Vec<SiacoinOutput>,
    /// Contracts created
    pub file_contracts: Vec<FileContract>,
    /// Contracts resolved as fulfilled
    pub storage_proofs: Vec<StorageProof>,
    /// Fund outputs spent
    pub siafund_inputs: Vec<SiafundInput>,
    /// Fund outputs created
    pub siafund_outputs: Vec<SiafundOutput>,
    /// Fees collected by the miner
    pub miner_fees: Vec<Currency>,
    /// Uninterpreted payload
    pub arbitrary_data: Vec<Vec<u8>>,
}

impl Transaction {
    /// Content-addressed transaction ID
    pub fn id(&self) -> TransactionId {
        TransactionId(hash_object(self))
    }

    /// ID of the coin output at `index`
    pub fn siacoin_output_id(&self, index: usize) -> SiacoinOutputId {
        let id = self.id();
        SiacoinOutputId(hash_all(&[
            SPECIFIER_SIACOIN_OUTPUT,
            id.0.as_bytes(),
            &(index as u64).to_le_bytes(),
        ]))
    }

    /// ID of the fund output at `index`
    pub fn siafund_output_id(&self, index: usize) -> SiafundOutputId {
        let id = self.id();
        SiafundOutputId(hash_all(&[
            SPECIFIER_SIAFUND_OUTPUT,
            id.0.as_bytes(),
            &(index as u64).to_le_bytes(),
        ]))
    }

    /// ID of the file contract at `index`
    pub fn file_contract_id(&self, index: usize) -> FileContractId {
        let id = self.id();
        FileContractId(hash_all(&[
            SPECIFIER_FILE_CONTRACT,
            id.0.as_bytes(),
            &(index as u64).to_le_bytes(),
        ]))
    }

    /// Sum of the coin outputs created
    pub fn siacoin_output_sum(&self) -> Option<Currency> {
        Currency::checked_sum(self.siacoin_outputs.iter().map(|o| o.value))
    }

    /// Sum of the miner fees
    pub fn fee_sum(&self) -> Option<Currency> {
        Currency::checked_sum(self.miner_fees.iter().copied())
    }
}

impl FileContractId {
    /// ID of the `index`-th payout created when the contract resolves
    pub fn storage_proof_output_id(&self, proof_valid: bool, index: usize) -> SiacoinOutputId {
        SiacoinOutputId(hash_all(&[
            SPECIFIER_STORAGE_PROOF,
            self.0.as_bytes(),
            &[proof_valid as u8],
            &(index as u64).to_le_bytes(),
        ]))
    }
}

/// Block of transactions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Parent block
    pub parent_id: BlockId,
    /// Proof-of-work nonce
    pub nonce: u64,
    /// Unix timestamp (seconds)
    pub timestamp: u64,
    /// Subsidy and fee payouts, delayed by the maturity window
    pub miner_payouts: Vec<SiacoinOutput>,
    /// Transactions in application order
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Create block with a zero nonce
    pub fn new(
        parent_id: BlockId,
        timestamp: u64,
        miner_payouts: Vec<SiacoinOutput>,
        transactions: Vec<Transaction>,
    ) -> Self {
        Self {
            parent_id,
            nonce: 0,
            timestamp,
            miner_payouts,
            transactions,
        }
    }

    /// Merkle root over the timestamp, payouts and transactions
    pub fn merkle_root(&self) -> Hash {
        let mut leaves = Vec::with_capacity(1 + self.miner_payouts.len() + self.transactions.len());
        leaves.push(hash_object(&self.timestamp).0);
        leaves.extend(self.miner_payouts.iter().map(|p| hash_object(p).0));
        leaves.extend(self.transactions.iter().map(|t| hash_object(t).0));
        Hash(merkle_root(&leaves))
    }

    /// Content-addressed block ID
    pub fn id(&self) -> BlockId {
        BlockId(hash_all(&[
            self.parent_id.0.as_bytes(),
            &self.nonce.to_le_bytes(),
            self.merkle_root().as_bytes(),
        ]))
    }

    /// ID of the miner payout at `index`
    pub fn miner_payout_id(&self, index: usize) -> SiacoinOutputId {
        SiacoinOutputId(hash_all(&[
            SPECIFIER_MINER_PAYOUT,
            self.id().0.as_bytes(),
            &(index as u64).to_le_bytes(),
        ]))
    }

    /// Sum of every transaction fee in the block
    pub fn total_fees(&self) -> Option<Currency> {
        self.transactions
            .iter()
            .try_fold(Currency::ZERO, |acc, t| acc.checked_add(t.fee_sum()?))
    }

    /// Sum of the miner payouts
    pub fn payout_sum(&self) -> Option<Currency> {
        Currency::checked_sum(self.miner_payouts.iter().map(|p| p.value))
    }
}

/// Block known to the block tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedBlock {
    /// The block itself
    pub block: Block,
    /// Cached ID
    pub id: BlockId,
    /// Height (genesis is 0)
    pub height: BlockHeight,
    /// Work of the chain ending in this block
    pub total_work: Work,
    /// Ordered diffs, present once the block has been on the best path
    pub diffs: Option<Vec<Diff>>,
}

impl ProcessedBlock {
    /// Parent ID
    pub fn parent_id(&self) -> BlockId {
        self.block.parent_id
    }

    /// Whether the diffs have been generated
    pub fn diffs_generated(&self) -> bool {
        self.diffs.is_some()
    }
}
