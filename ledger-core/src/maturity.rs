//! Maturity queue
//!
//! Coin outputs that are not yet spendable (miner payouts, contract
//! resolutions) wait here in a bucket keyed by the height at which they
//! mature. A bucket exists only while it holds at least one output.

use crate::registry::{Registry, RemoveError};
use crate::types::{BlockHeight, SiacoinOutput, SiacoinOutputId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Height-indexed buckets of delayed coin outputs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaturityQueue {
    buckets: BTreeMap<BlockHeight, Registry<SiacoinOutputId, SiacoinOutput>>,
}

impl MaturityQueue {
    /// Create empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Outputs maturing at `height`, if any
    pub fn bucket(&self, height: BlockHeight) -> Option<&Registry<SiacoinOutputId, SiacoinOutput>> {
        self.buckets.get(&height)
    }

    /// Delayed output by ID within a bucket
    pub fn get(&self, height: BlockHeight, id: &SiacoinOutputId) -> Option<&SiacoinOutput> {
        self.buckets.get(&height).and_then(|b| b.get(id))
    }

    /// Number of non-empty buckets
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Total outputs across all buckets
    pub fn len(&self) -> usize {
        self.buckets.values().map(Registry::len).sum()
    }

    /// Whether no outputs are waiting
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Lowest bucket height at or below `height`, i.e. a bucket that should
    /// already have been drained
    pub fn first_stale_bucket(&self, height: BlockHeight) -> Option<BlockHeight> {
        self.buckets.range(..=height).next().map(|(h, _)| *h)
    }

    pub(crate) fn insert_if_absent(
        &mut self,
        height: BlockHeight,
        id: SiacoinOutputId,
        output: SiacoinOutput,
    ) -> bool {
        self.buckets
            .entry(height)
            .or_default()
            .insert_if_absent(id, output)
    }

    pub(crate) fn remove_matching(
        &mut self,
        height: BlockHeight,
        id: &SiacoinOutputId,
        expected: &SiacoinOutput,
    ) -> Result<SiacoinOutput, RemoveError> {
        let bucket = self.buckets.get_mut(&height).ok_or(RemoveError::Missing)?;
        let removed = bucket.remove_matching(id, expected)?;
        if bucket.is_empty() {
            self.buckets.remove(&height);
        }
        Ok(removed)
    }
}
