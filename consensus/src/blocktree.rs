//! Block tree
//!
//! Every block the node has accepted into any branch, keyed by ID. Blocks
//! on the best path carry their generated diffs; side-branch blocks get
//! theirs when their branch wins.

use ledger_core::{BlockHeight, BlockId, ConsensusState, ConsistencyFault, Diff, ProcessedBlock};
use std::collections::HashMap;

/// Blocks to revert and apply to move the best path onto another tip
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForkPath {
    /// Height of the last block shared by both paths
    pub fork_height: BlockHeight,
    /// Current-path blocks above the fork, tip first
    pub revert: Vec<BlockId>,
    /// New-branch blocks above the fork, lowest first
    pub apply: Vec<BlockId>,
}

/// All known blocks
#[derive(Debug, Default)]
pub struct BlockTree {
    blocks: HashMap<BlockId, ProcessedBlock>,
}

impl BlockTree {
    /// Create empty tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a block
    pub fn insert(&mut self, pb: ProcessedBlock) {
        self.blocks.insert(pb.id, pb);
    }

    /// Look up a block
    pub fn get(&self, id: &BlockId) -> Option<&ProcessedBlock> {
        self.blocks.get(id)
    }

    /// Whether the block is known
    pub fn contains(&self, id: &BlockId) -> bool {
        self.blocks.contains_key(id)
    }

    /// Number of known blocks
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the tree is empty
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Record the diffs generated for a block
    pub fn set_diffs(&mut self, id: &BlockId, diffs: Vec<Diff>) {
        if let Some(pb) = self.blocks.get_mut(id) {
            pb.diffs = Some(diffs);
        }
    }

    /// Diffs of a block that has been on the best path
    pub fn diffs(&self, id: &BlockId) -> Result<&[Diff], ConsistencyFault> {
        self.blocks
            .get(id)
            .and_then(|pb| pb.diffs.as_deref())
            .ok_or(ConsistencyFault::MissingBlockDiffs(id.as_hash()))
    }

    /// Walk back from `tip` to the current path
    ///
    /// Returns `None` if `tip`'s ancestry is broken, which cannot happen for
    /// blocks admitted through the processor.
    pub fn fork_path(&self, state: &ConsensusState, tip: BlockId) -> Option<ForkPath> {
        let mut apply = Vec::new();
        let mut cursor = self.blocks.get(&tip)?;
        while !state.on_current_path(&cursor.id, cursor.height) {
            apply.push(cursor.id);
            cursor = self.blocks.get(&cursor.parent_id())?;
        }
        apply.reverse();

        let fork_height = cursor.height;
        let revert = state.current_path()[fork_height as usize + 1..]
            .iter()
            .rev()
            .copied()
            .collect();

        Some(ForkPath {
            fork_height,
            revert,
            apply,
        })
    }

    /// Remove a block and every descendant, returning the removed IDs
    pub fn remove_branch(&mut self, root: BlockId) -> Vec<BlockId> {
        let mut removed = Vec::new();
        let mut pending = vec![root];
        while let Some(id) = pending.pop() {
            if self.blocks.remove(&id).is_none() {
                continue;
            }
            pending.extend(
                self.blocks
                    .values()
                    .filter(|pb| pb.parent_id() == id)
                    .map(|pb| pb.id),
            );
            removed.push(id);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::{Block, Work};

    fn block(parent: BlockId, height: BlockHeight, salt: u64) -> ProcessedBlock {
        let block = Block::new(parent, salt, vec![], vec![]);
        ProcessedBlock {
            id: block.id(),
            block,
            height,
            total_work: Work(height as u128 + 1),
            diffs: Some(vec![]),
        }
    }

    #[test]
    fn test_fork_path() {
        let genesis = block(BlockId::default(), 0, 0);
        let b1 = block(genesis.id, 1, 1);
        let b2 = block(b1.id, 2, 2);
        let b3 = block(b1.id, 2, 3);
        let b4 = block(b3.id, 3, 4);

        let mut tree = BlockTree::new();
        let mut state = ConsensusState::new();
        for pb in [&genesis, &b1, &b2] {
            state.push_block(pb.id);
        }
        for pb in [genesis, b1.clone(), b2.clone(), b3.clone(), b4.clone()] {
            tree.insert(pb);
        }

        let fork = tree.fork_path(&state, b4.id).unwrap();
        assert_eq!(fork.fork_height, 1);
        assert_eq!(fork.revert, vec![b2.id]);
        assert_eq!(fork.apply, vec![b3.id, b4.id]);

        // Extending the tip needs no revert
        let b5 = block(b2.id, 3, 5);
        tree.insert(b5.clone());
        let fork = tree.fork_path(&state, b5.id).unwrap();
        assert!(fork.revert.is_empty());
        assert_eq!(fork.apply, vec![b5.id]);
    }

    #[test]
    fn test_remove_branch() {
        let genesis = block(BlockId::default(), 0, 0);
        let b1 = block(genesis.id, 1, 1);
        let b2 = block(b1.id, 2, 2);
        let b3 = block(b1.id, 2, 3);
        let mut tree = BlockTree::new();
        for pb in [genesis.clone(), b1.clone(), b2.clone(), b3.clone()] {
            tree.insert(pb);
        }

        let mut removed = tree.remove_branch(b1.id);
        removed.sort();
        let mut expected = vec![b1.id, b2.id, b3.id];
        expected.sort();
        assert_eq!(removed, expected);
        assert_eq!(tree.len(), 1);
        assert!(tree.contains(&genesis.id));
    }

    #[test]
    fn test_missing_diffs_is_a_fault() {
        let mut pb = block(BlockId::default(), 0, 0);
        pb.diffs = None;
        let id = pb.id;
        let mut tree = BlockTree::new();
        tree.insert(pb);
        assert_eq!(
            tree.diffs(&id),
            Err(ConsistencyFault::MissingBlockDiffs(id.as_hash()))
        );
    }
}
