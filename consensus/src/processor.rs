//! Block processor and fork resolver
//!
//! The processor is the single writer of the consensus state. For every
//! candidate block it validates, generates the ordered diff list, commits
//! it (or reverts to the fork point and applies the winning branch), then
//! persists the change atomically.
//!
//! # Failure semantics
//!
//! - A rejected block leaves the state exactly as it was found. When the
//!   invalid block sits on a branch that was being switched to, the branch
//!   is unwound and the previous best path restored first.
//! - A consistency fault or a failed persistence write halts the
//!   processor. Every later call returns [`Error::Halted`].

use crate::blocktree::{BlockTree, ForkPath};
use crate::config::ChainParams;
use crate::error::{Error, Rejection, Result};
use crate::generator::{genesis_diffs, generate_and_apply, GenerateError};
use crate::subscribers::{BlockDiffs, ConsensusUpdate};
use crate::validation::BlockValidator;
use chrono::Utc;
use ledger_core::{
    Block, BlockId, BlockStore, ChainWrite, ConsensusState, ConsistencyFault, Direction,
    PathUpdate, ProcessedBlock, Work,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Where the processor is in handling a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for a block
    Idle,
    /// Checking the block against its parent
    Validating,
    /// Mutating the ledger
    Committing,
    /// Delivering the update to subscribers
    Notifying,
}

/// Result of a successful acceptance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// The block extended the best path
    Extended(ConsensusUpdate),
    /// The block's branch replaced part of the best path
    Reorganized(ConsensusUpdate),
    /// The block was stored on a branch without enough work
    SideBranch,
}

impl AcceptOutcome {
    /// The path change to notify, if any
    pub fn update(&self) -> Option<&ConsensusUpdate> {
        match self {
            AcceptOutcome::Extended(u) | AcceptOutcome::Reorganized(u) => Some(u),
            AcceptOutcome::SideBranch => None,
        }
    }
}

/// Single writer of the consensus state
pub struct BlockProcessor {
    tree: BlockTree,
    dos_blocks: HashSet<BlockId>,
    validator: Arc<dyn BlockValidator>,
    params: ChainParams,
    store: Arc<dyn BlockStore>,
    expected_siafunds: u128,
    phase: Phase,
    halted: bool,
}

impl std::fmt::Debug for BlockProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockProcessor")
            .field("blocks", &self.tree.len())
            .field("dos_blocks", &self.dos_blocks.len())
            .field("phase", &self.phase)
            .field("halted", &self.halted)
            .finish()
    }
}

impl BlockProcessor {
    /// Load the persisted chain into `state`, or create the genesis block
    /// if the store is empty. `state` must be empty.
    pub fn open(
        params: ChainParams,
        validator: Arc<dyn BlockValidator>,
        store: Arc<dyn BlockStore>,
        state: &mut ConsensusState,
    ) -> Result<Self> {
        params.validate()?;

        let mut processor = Self {
            tree: BlockTree::new(),
            dos_blocks: HashSet::new(),
            validator,
            expected_siafunds: params.total_siafunds(),
            params,
            store,
            phase: Phase::Idle,
            halted: false,
        };

        let stored = processor.store.load()?;
        if stored.is_empty() {
            processor.init_genesis(state)?;
        } else {
            processor.replay(state, stored)?;
        }

        Ok(processor)
    }

    fn init_genesis(&mut self, state: &mut ConsensusState) -> Result<()> {
        let block = self.params.genesis_block();
        let diffs = genesis_diffs(&block);
        state
            .commit_diffs(&diffs, Direction::Apply)
            .map_err(Error::Fault)?;

        let genesis = ProcessedBlock {
            id: block.id(),
            block,
            height: 0,
            total_work: Work(1),
            diffs: Some(diffs),
        };
        state.push_block(genesis.id);
        self.check_consistency(state).map_err(Error::Fault)?;

        self.store.commit(&ChainWrite {
            blocks: vec![genesis.clone()],
            path: Some(PathUpdate {
                start: 0,
                tail: vec![genesis.id],
            }),
            ..Default::default()
        })?;

        info!(genesis = %genesis.id, "Created genesis block");
        self.tree.insert(genesis);
        Ok(())
    }

    fn replay(
        &mut self,
        state: &mut ConsensusState,
        stored: ledger_core::StoredChain,
    ) -> Result<()> {
        let genesis_id = self.params.genesis_block().id();
        if stored.path.first() != Some(&genesis_id) {
            return Err(Error::Config(format!(
                "stored chain does not start at genesis {}",
                genesis_id
            )));
        }

        for pb in stored.blocks {
            self.tree.insert(pb);
        }
        self.dos_blocks.extend(stored.dos_blocks);

        for id in &stored.path {
            let diffs = self.tree.diffs(id).map_err(Error::Fault)?;
            state
                .commit_diffs(diffs, Direction::Apply)
                .map_err(Error::Fault)?;
            state.push_block(*id);
        }
        self.check_consistency(state).map_err(Error::Fault)?;

        info!(
            height = state.height(),
            blocks = self.tree.len(),
            "Replayed stored chain"
        );
        Ok(())
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Move to another phase
    pub fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    /// Whether a fatal error stopped processing
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Chain parameters
    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    /// Look up a known block
    pub fn block(&self, id: &BlockId) -> Option<&ProcessedBlock> {
        self.tree.get(id)
    }

    /// Whether the block was rejected as a denial-of-service block
    pub fn is_dos_block(&self, id: &BlockId) -> bool {
        self.dos_blocks.contains(id)
    }

    /// Update describing the whole current path, for late subscribers
    pub fn catch_up_update(&self, state: &ConsensusState) -> Option<ConsensusUpdate> {
        let applied_blocks = state
            .current_path()
            .iter()
            .map(|id| {
                let pb = self.tree.get(id)?;
                Some(BlockDiffs {
                    id: *id,
                    height: pb.height,
                    diffs: pb.diffs.clone()?,
                })
            })
            .collect::<Option<Vec<_>>>()?;

        Some(ConsensusUpdate {
            reverted_blocks: vec![],
            applied_blocks,
            height: state.height(),
            tip: state.current_block()?,
            committed_at: Utc::now(),
        })
    }

    /// Accept a candidate block
    pub fn accept_block(
        &mut self,
        state: &mut ConsensusState,
        block: Block,
    ) -> Result<AcceptOutcome> {
        if self.halted {
            return Err(Error::Halted);
        }

        self.phase = Phase::Validating;
        let result = self.validate_and_commit(state, block);
        self.phase = Phase::Idle;

        if let Err(e) = &result {
            if e.is_fatal() && !self.halted {
                self.halted = true;
                error!(error = %e, "Fatal error, block processing halted");
            }
        }
        result
    }

    fn validate_and_commit(
        &mut self,
        state: &mut ConsensusState,
        block: Block,
    ) -> Result<AcceptOutcome> {
        let id = block.id();

        if self.dos_blocks.contains(&id) {
            return Err(Rejection::KnownDoSBlock(id).into());
        }
        if self.tree.contains(&id) {
            return Err(Rejection::BlockKnown(id).into());
        }
        let parent = self.tree.get(&block.parent_id).ok_or(Rejection::Orphan {
            block: id,
            parent: block.parent_id,
        })?;

        let work = self
            .validator
            .validate_block(&block, id, parent, &self.params)?;
        let pb = ProcessedBlock {
            id,
            height: parent.height + 1,
            total_work: parent.total_work + work,
            diffs: None,
            block,
        };

        let current_work = state
            .current_block()
            .and_then(|tip| self.tree.get(&tip))
            .map(|tip| tip.total_work)
            .unwrap_or(Work::ZERO);

        if pb.total_work <= current_work {
            debug!(block_id = %id, height = pb.height, "Block stored on side branch");
            self.persist(&ChainWrite {
                blocks: vec![pb.clone()],
                ..Default::default()
            })?;
            self.tree.insert(pb);
            return Ok(AcceptOutcome::SideBranch);
        }

        self.tree.insert(pb);
        self.phase = Phase::Committing;

        let fork = self
            .tree
            .fork_path(state, id)
            .ok_or_else(|| Error::Other(format!("block {} has a broken ancestry", id)))?;

        self.switch_to(state, fork)
    }

    /// Revert to the fork point, then apply the new branch
    fn switch_to(&mut self, state: &mut ConsensusState, fork: ForkPath) -> Result<AcceptOutcome> {
        let mut reverted_blocks = Vec::with_capacity(fork.revert.len());
        for id in &fork.revert {
            reverted_blocks.push(self.revert_tip(state, id)?);
        }

        let mut applied_blocks = Vec::with_capacity(fork.apply.len());
        for id in &fork.apply {
            match self.apply_block(state, id) {
                Ok(applied) => applied_blocks.push(applied),
                Err(ApplyError::Fault(fault)) => return Err(Error::Fault(fault)),
                Err(ApplyError::Rejected(rejection)) => {
                    return self.unwind_branch(state, &fork, &applied_blocks, rejection);
                }
            }
        }

        // Persist the blocks that gained diffs together with the new path
        let blocks = fork
            .apply
            .iter()
            .filter_map(|id| self.tree.get(id).cloned())
            .collect();
        self.persist(&ChainWrite {
            blocks,
            path: Some(PathUpdate {
                start: fork.fork_height + 1,
                tail: fork.apply.clone(),
            }),
            ..Default::default()
        })?;

        let tip = state
            .current_block()
            .ok_or_else(|| Error::Other("best path is empty".to_string()))?;
        let update = ConsensusUpdate {
            reverted_blocks,
            applied_blocks,
            height: state.height(),
            tip,
            committed_at: Utc::now(),
        };

        if update.reverted_blocks.is_empty() {
            info!(block_id = %tip, height = update.height, "Best path extended");
            Ok(AcceptOutcome::Extended(update))
        } else {
            info!(
                block_id = %tip,
                height = update.height,
                fork_height = fork.fork_height,
                reverted = update.reverted_blocks.len(),
                applied = update.applied_blocks.len(),
                "Reorganized best path"
            );
            Ok(AcceptOutcome::Reorganized(update))
        }
    }

    /// Pop the tip and revert its diffs
    fn revert_tip(&mut self, state: &mut ConsensusState, id: &BlockId) -> Result<BlockDiffs> {
        let pb = self
            .tree
            .get(id)
            .ok_or(Error::Fault(ConsistencyFault::MissingBlockDiffs(id.as_hash())))?;
        let diffs = pb
            .diffs
            .clone()
            .ok_or(Error::Fault(ConsistencyFault::MissingBlockDiffs(id.as_hash())))?;
        let height = pb.height;

        if state.current_block() != Some(*id) {
            return Err(Error::Fault(ConsistencyFault::NotTip(id.as_hash())));
        }
        state.pop_block();
        state
            .commit_diffs(&diffs, Direction::Revert)
            .map_err(Error::Fault)?;

        debug!(block_id = %id, height, "Reverted block");
        Ok(BlockDiffs {
            id: *id,
            height,
            diffs,
        })
    }

    /// Commit a block's diffs and push it, generating the diffs if needed
    fn apply_block(
        &mut self,
        state: &mut ConsensusState,
        id: &BlockId,
    ) -> std::result::Result<BlockDiffs, ApplyError> {
        let missing = || ApplyError::Fault(ConsistencyFault::MissingBlockDiffs(id.as_hash()));
        let (height, known_diffs) = {
            let pb = self.tree.get(id).ok_or_else(missing)?;
            (pb.height, pb.diffs.clone())
        };

        let diffs = match known_diffs {
            Some(diffs) => {
                state
                    .commit_diffs(&diffs, Direction::Apply)
                    .map_err(ApplyError::Fault)?;
                diffs
            }
            None => {
                let pb = self.tree.get(id).ok_or_else(missing)?;
                let diffs = generate_and_apply(state, pb, &self.params, self.validator.as_ref())
                    .map_err(|e| match e {
                        GenerateError::Rejected(r) => ApplyError::Rejected(r),
                        GenerateError::Fault(f) => ApplyError::Fault(f),
                    })?;
                self.tree.set_diffs(id, diffs.clone());
                diffs
            }
        };

        state.push_block(*id);
        self.check_consistency(state).map_err(ApplyError::Fault)?;

        debug!(block_id = %id, height, diffs = diffs.len(), "Applied block");
        Ok(BlockDiffs {
            id: *id,
            height,
            diffs,
        })
    }

    /// Undo a partially applied branch after one of its blocks proved
    /// invalid, restore the previous best path and drop the invalid block
    /// with its descendants
    fn unwind_branch(
        &mut self,
        state: &mut ConsensusState,
        fork: &ForkPath,
        applied: &[BlockDiffs],
        rejection: Rejection,
    ) -> Result<AcceptOutcome> {
        for block in applied.iter().rev() {
            self.revert_tip(state, &block.id)?;
        }
        for id in fork.revert.iter().rev() {
            self.apply_block(state, id).map_err(|e| match e {
                ApplyError::Fault(f) => Error::Fault(f),
                // Blocks that were on the path carry their diffs, so only
                // missing diffs can send one back through validation
                ApplyError::Rejected(_) => {
                    Error::Fault(ConsistencyFault::MissingBlockDiffs(id.as_hash()))
                }
            })?;
        }

        let invalid = rejection.block_id();
        let removed_blocks = self.tree.remove_branch(invalid);
        let mut dos_blocks = Vec::new();
        if rejection.is_dos() {
            self.dos_blocks.insert(invalid);
            dos_blocks.push(invalid);
        }

        // Blocks of the branch that applied cleanly keep their diffs
        let blocks = applied
            .iter()
            .filter_map(|b| self.tree.get(&b.id).cloned())
            .collect();
        self.persist(&ChainWrite {
            blocks,
            removed_blocks,
            dos_blocks,
            ..Default::default()
        })?;

        warn!(
            block_id = %invalid,
            dos = rejection.is_dos(),
            reason = %rejection,
            "Rejected invalid block"
        );
        Err(Error::Rejected(rejection))
    }

    fn check_consistency(&self, state: &ConsensusState) -> std::result::Result<(), ConsistencyFault> {
        if self.params.consistency_checks {
            state.check_consistency(Some(self.expected_siafunds))
        } else {
            Ok(())
        }
    }

    fn persist(&self, write: &ChainWrite) -> Result<()> {
        self.store.commit(write).map_err(Error::Persistence)
    }

    /// Flush the store
    pub fn flush(&self) -> Result<()> {
        self.store.flush().map_err(Error::Persistence)
    }
}

enum ApplyError {
    Rejected(Rejection),
    Fault(ConsistencyFault),
}
