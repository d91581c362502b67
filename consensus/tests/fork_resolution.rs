//! Block acceptance and fork resolution through the public API

mod common;

use common::{child, config, open, open_with_penalizer, RecordingPenalizer};
use consensus::{AcceptOutcome, ConsensusSet, Error, Rejection, TxnError};
use ledger_core::{
    BlockHeight, BlockId, Currency, Direction, FileContract, FileContractId, Hash, MemoryStore,
    SiacoinInput, SiacoinOutput, SiacoinOutputId, StorageProof, Transaction, UnlockHash,
};
use std::sync::Arc;

/// Accept empty blocks at heights `from..=to` on top of `tip`
async fn extend(
    set: &ConsensusSet,
    mut tip: BlockId,
    from: BlockHeight,
    to: BlockHeight,
    outcomes: &mut Vec<AcceptOutcome>,
) -> BlockId {
    for height in from..=to {
        let block = child(tip, height, height, vec![]);
        tip = block.id();
        outcomes.push(set.accept_block(block).await.unwrap());
    }
    tip
}

fn owner(tag: u8) -> UnlockHash {
    UnlockHash(Hash([tag; 32]))
}

/// Height 3 chain whose first payout has matured, plus a height 4 block
/// locking that payout into a contract over `window_start..window_end`
async fn chain_with_contract(
    set: &ConsensusSet,
    window_start: BlockHeight,
    window_end: BlockHeight,
    outcomes: &mut Vec<AcceptOutcome>,
) -> (BlockId, FileContractId, FileContract) {
    let genesis = set.current_block().unwrap();
    let b1 = child(genesis, 1, 1, vec![]);
    let funds = b1.miner_payout_id(0);
    let value = b1.miner_payouts[0].value;
    outcomes.push(set.accept_block(b1.clone()).await.unwrap());
    let tip = extend(set, b1.id(), 2, 3, outcomes).await;

    let contract = FileContract {
        file_size: 64,
        file_merkle_root: Hash([7u8; 32]),
        window_start,
        window_end,
        payout: value,
        valid_proof_outputs: vec![SiacoinOutput {
            value,
            unlock_hash: owner(0xa),
        }],
        missed_proof_outputs: vec![SiacoinOutput {
            value,
            unlock_hash: owner(0xb),
        }],
        unlock_hash: UnlockHash::default(),
        revision_number: 0,
    };
    let txn = Transaction {
        siacoin_inputs: vec![SiacoinInput { parent_id: funds }],
        file_contracts: vec![contract.clone()],
        ..Default::default()
    };
    let fcid = txn.file_contract_id(0);
    let b4 = child(tip, 4, 4, vec![txn]);
    outcomes.push(set.accept_block(b4.clone()).await.unwrap());

    assert!(set.get_siacoin_output(&funds).is_none());
    assert_eq!(set.get_file_contract(&fcid), Some(contract.clone()));
    (b4.id(), fcid, contract)
}

fn delayed_at(
    set: &ConsensusSet,
    height: BlockHeight,
    id: &SiacoinOutputId,
) -> Option<SiacoinOutput> {
    set.get_delayed_siacoin_outputs(height)
        .into_iter()
        .find(|(delayed, _)| delayed == id)
        .map(|(_, output)| output)
}

#[tokio::test]
async fn test_heavier_branch_replaces_best_path() {
    let set = open(Arc::new(MemoryStore::new())).await;
    let genesis = set.current_block().unwrap();

    let b1 = child(genesis, 1, 1, vec![]);
    let b2 = child(b1.id(), 2, 2, vec![]);
    let b3 = child(b1.id(), 2, 3, vec![]);
    let b4 = child(b3.id(), 3, 4, vec![]);

    set.accept_block(b1.clone()).await.unwrap();
    set.accept_block(b2.clone()).await.unwrap();

    // Equal work does not displace the current tip
    let outcome = set.accept_block(b3.clone()).await.unwrap();
    assert_eq!(outcome, AcceptOutcome::SideBranch);
    assert_eq!(set.current_block(), Some(b2.id()));

    let outcome = set.accept_block(b4.clone()).await.unwrap();
    let update = match outcome {
        AcceptOutcome::Reorganized(update) => update,
        other => panic!("expected a reorganization, got {:?}", other),
    };
    assert_eq!(
        update.reverted_blocks.iter().map(|b| b.id).collect::<Vec<_>>(),
        vec![b2.id()]
    );
    assert_eq!(
        update.applied_blocks.iter().map(|b| b.id).collect::<Vec<_>>(),
        vec![b3.id(), b4.id()]
    );
    assert_eq!(set.current_path(), vec![genesis, b1.id(), b3.id(), b4.id()]);
    assert_eq!(set.height(), 3);

    // Same registries as replaying the winning branch directly
    let direct = open(Arc::new(MemoryStore::new())).await;
    for block in [b1, b3, b4] {
        direct.accept_block(block).await.unwrap();
    }
    assert_eq!(set.snapshot(), direct.snapshot());
    assert_eq!(set.metrics().reorganizations.get(), 1);
}

#[tokio::test]
async fn test_maturity_drain_and_revert() {
    let set = open(Arc::new(MemoryStore::new())).await;
    let genesis = set.current_block().unwrap();

    let b1 = child(genesis, 1, 1, vec![]);
    let b2 = child(b1.id(), 2, 2, vec![]);
    let b3 = child(b2.id(), 3, 3, vec![]);
    let payout = b1.miner_payout_id(0);

    set.accept_block(b1.clone()).await.unwrap();
    set.accept_block(b2).await.unwrap();

    // Delay 2: the height 1 payout waits in bucket 3
    let waiting = set.get_delayed_siacoin_outputs(3);
    assert_eq!(waiting.len(), 1);
    assert_eq!(waiting[0].0, payout);
    assert!(set.get_siacoin_output(&payout).is_none());
    let before = set.snapshot();

    let outcome = set.accept_block(b3).await.unwrap();
    assert!(set.get_siacoin_output(&payout).is_some());
    assert!(set.get_delayed_siacoin_outputs(3).is_empty());

    // Reverting the block puts the payout back in its bucket
    let update = outcome.update().unwrap();
    let mut reverted = set.snapshot();
    reverted.pop_block();
    reverted
        .commit_diffs(&update.applied_blocks[0].diffs, Direction::Revert)
        .unwrap();
    assert_eq!(reverted, before);
    assert_eq!(
        reverted.delayed_siacoin_outputs().get(3, &payout),
        Some(&b1.miner_payouts[0])
    );
}

#[tokio::test]
async fn test_reverting_whole_path_restores_genesis_state() {
    let set = open(Arc::new(MemoryStore::new())).await;
    let genesis_state = set.snapshot();

    let mut tip = set.current_block().unwrap();
    let mut updates = Vec::new();
    for height in 1..=5 {
        let block = child(tip, height, height, vec![]);
        tip = block.id();
        updates.push(set.accept_block(block).await.unwrap());
    }

    let mut state = set.snapshot();
    for outcome in updates.iter().rev() {
        let applied = &outcome.update().unwrap().applied_blocks[0];
        assert_eq!(state.pop_block(), Some(applied.id));
        state.commit_diffs(&applied.diffs, Direction::Revert).unwrap();
    }
    assert_eq!(state, genesis_state);
}

#[tokio::test]
async fn test_dos_block_rejected_and_peer_penalized() {
    let penalizer = Arc::new(RecordingPenalizer::default());
    let set = open_with_penalizer(Arc::new(MemoryStore::new()), penalizer.clone()).await;

    let mut tip = set.current_block().unwrap();
    let mut first = None;
    for height in 1..=3 {
        let block = child(tip, height, height, vec![]);
        tip = block.id();
        first.get_or_insert(block.miner_payout_id(0));
        set.accept_block(block).await.unwrap();
    }
    let matured = first.unwrap();
    assert!(set.get_siacoin_output(&matured).is_some());
    let before = set.snapshot();

    // Spends a real output and creates nothing
    let hoarder = Transaction {
        siacoin_inputs: vec![SiacoinInput { parent_id: matured }],
        ..Default::default()
    };
    let bad = child(tip, 4, 4, vec![hoarder]);

    let err = set.accept_block_from(bad.clone(), "peer-1").await.unwrap_err();
    match err.rejection() {
        Some(Rejection::InvalidTransaction { index, reason, .. }) => {
            assert_eq!(*index, 0);
            assert_eq!(*reason, TxnError::UnspentFunds);
        }
        other => panic!("unexpected rejection: {:?}", other),
    }
    assert_eq!(set.snapshot(), before);

    // Remembered and turned away without validation
    let err = set.accept_block_from(bad.clone(), "peer-2").await.unwrap_err();
    assert_eq!(err.rejection(), Some(&Rejection::KnownDoSBlock(bad.id())));

    assert_eq!(
        *penalizer.penalized.lock(),
        vec![("peer-1".to_string(), bad.id()), ("peer-2".to_string(), bad.id())]
    );

    // The valid sibling is still accepted
    set.accept_block(child(tip, 4, 40, vec![])).await.unwrap();
    assert_eq!(set.height(), 4);
}

#[tokio::test]
async fn test_repeated_transactions_rejected_without_halting() {
    let set = open(Arc::new(MemoryStore::new())).await;
    let genesis = set.current_block().unwrap();
    let mut outcomes = Vec::new();
    let b1 = child(genesis, 1, 1, vec![]);
    let matured = b1.miner_payout_id(0);
    let value = b1.miner_payouts[0].value;
    set.accept_block(b1.clone()).await.unwrap();
    let tip = extend(&set, b1.id(), 2, 3, &mut outcomes).await;
    let before = set.snapshot();

    // Identical transactions derive identical IDs; creating nothing from
    // nothing is refused outright
    let empty = Transaction {
        siacoin_outputs: vec![SiacoinOutput {
            value: Currency::ZERO,
            unlock_hash: UnlockHash::default(),
        }],
        ..Default::default()
    };
    let err = set
        .accept_block(child(tip, 4, 4, vec![empty.clone(), empty]))
        .await
        .unwrap_err();
    match err {
        Error::Rejected(Rejection::InvalidTransaction { index, reason, .. }) => {
            assert_eq!(index, 0);
            assert_eq!(reason, TxnError::ZeroValueOutput);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(set.snapshot(), before);

    // A funded copy fails on its already spent input
    let spend = Transaction {
        siacoin_inputs: vec![SiacoinInput { parent_id: matured }],
        siacoin_outputs: vec![SiacoinOutput {
            value,
            unlock_hash: owner(0xc),
        }],
        ..Default::default()
    };
    let err = set
        .accept_block(child(tip, 4, 5, vec![spend.clone(), spend]))
        .await
        .unwrap_err();
    match err {
        Error::Rejected(Rejection::InvalidTransaction { index, reason, .. }) => {
            assert_eq!(index, 1);
            assert!(matches!(reason, TxnError::MissingSiacoinOutput(_)));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(set.snapshot(), before);

    // Still accepting blocks
    set.accept_block(child(tip, 4, 6, vec![])).await.unwrap();
    assert_eq!(set.height(), 4);
}

#[tokio::test]
async fn test_contract_expiry_and_revert() {
    let set = open(Arc::new(MemoryStore::new())).await;
    let genesis_state = set.snapshot();
    let mut outcomes = Vec::new();
    let (tip, fcid, contract) = chain_with_contract(&set, 6, 8, &mut outcomes).await;
    let missed = fcid.storage_proof_output_id(false, 0);

    let tip = extend(&set, tip, 5, 7, &mut outcomes).await;
    assert!(set.get_file_contract(&fcid).is_some());

    // Window closes at 8 without a proof; delay 2 puts the payout in bucket 10
    let tip = extend(&set, tip, 8, 8, &mut outcomes).await;
    assert!(set.get_file_contract(&fcid).is_none());
    assert_eq!(
        delayed_at(&set, 10, &missed),
        Some(contract.missed_proof_outputs[0].clone())
    );
    assert!(delayed_at(&set, 10, &fcid.storage_proof_output_id(true, 0)).is_none());

    extend(&set, tip, 9, 10, &mut outcomes).await;
    assert_eq!(
        set.get_siacoin_output(&missed),
        Some(contract.missed_proof_outputs[0].clone())
    );
    assert!(delayed_at(&set, 10, &missed).is_none());

    let mut state = set.snapshot();
    for outcome in outcomes.iter().rev() {
        let applied = &outcome.update().unwrap().applied_blocks[0];
        assert_eq!(state.pop_block(), Some(applied.id));
        state.commit_diffs(&applied.diffs, Direction::Revert).unwrap();
        match applied.height {
            8 => assert_eq!(state.file_contract(&fcid), Some(&contract)),
            4 => assert!(state.file_contract(&fcid).is_none()),
            _ => {}
        }
    }
    assert_eq!(state, genesis_state);
}

#[tokio::test]
async fn test_storage_proof_pays_valid_outputs() {
    let set = open(Arc::new(MemoryStore::new())).await;
    let mut outcomes = Vec::new();
    let (tip, fcid, contract) = chain_with_contract(&set, 6, 10, &mut outcomes).await;
    let valid = fcid.storage_proof_output_id(true, 0);
    let missed = fcid.storage_proof_output_id(false, 0);

    let proof = Transaction {
        storage_proofs: vec![StorageProof {
            parent_id: fcid,
            proof: vec![],
        }],
        ..Default::default()
    };

    // Window opens at 6
    let err = set
        .accept_block(child(tip, 5, 50, vec![proof.clone()]))
        .await
        .unwrap_err();
    assert!(matches!(
        err.rejection(),
        Some(Rejection::InvalidTransaction {
            reason: TxnError::StorageProofWindow,
            ..
        })
    ));
    let tip = extend(&set, tip, 5, 5, &mut outcomes).await;
    let before_proof = set.snapshot();

    let b6 = child(tip, 6, 6, vec![proof]);
    let mut later = vec![set.accept_block(b6.clone()).await.unwrap()];
    assert!(set.get_file_contract(&fcid).is_none());
    assert_eq!(
        delayed_at(&set, 8, &valid),
        Some(contract.valid_proof_outputs[0].clone())
    );

    // Proven contracts never reach the missed path
    extend(&set, b6.id(), 7, 10, &mut later).await;
    assert_eq!(
        set.get_siacoin_output(&valid),
        Some(contract.valid_proof_outputs[0].clone())
    );
    assert!(set.get_siacoin_output(&missed).is_none());
    assert!(delayed_at(&set, 12, &missed).is_none());

    // Undoing the proof reopens the contract
    let mut state = set.snapshot();
    for outcome in later.iter().rev() {
        let applied = &outcome.update().unwrap().applied_blocks[0];
        assert_eq!(state.pop_block(), Some(applied.id));
        state.commit_diffs(&applied.diffs, Direction::Revert).unwrap();
    }
    assert_eq!(state.file_contract(&fcid), Some(&contract));
    assert_eq!(state, before_proof);
}

#[tokio::test]
async fn test_invalid_block_mid_reorg_restores_best_path() {
    let set = open(Arc::new(MemoryStore::new())).await;
    let genesis = set.current_block().unwrap();

    // Best path g, a1, a2
    let a1 = child(genesis, 1, 1, vec![]);
    let a2 = child(a1.id(), 2, 2, vec![]);
    set.accept_block(a1.clone()).await.unwrap();
    set.accept_block(a2.clone()).await.unwrap();
    let before = set.snapshot();

    // Side branch g, c1, c2, c3 where c2 spends an output that does not exist
    let c1 = child(genesis, 1, 11, vec![]);
    let phantom = Transaction {
        siacoin_inputs: vec![SiacoinInput {
            parent_id: a1.miner_payout_id(0),
        }],
        ..Default::default()
    };
    let c2 = child(c1.id(), 2, 12, vec![phantom]);
    let c3 = child(c2.id(), 3, 13, vec![]);

    assert_eq!(
        set.accept_block(c1.clone()).await.unwrap(),
        AcceptOutcome::SideBranch
    );
    assert_eq!(
        set.accept_block(c2.clone()).await.unwrap(),
        AcceptOutcome::SideBranch
    );

    let err = set.accept_block(c3.clone()).await.unwrap_err();
    match err {
        Error::Rejected(Rejection::InvalidTransaction { block, reason, .. }) => {
            assert_eq!(block, c2.id());
            assert!(matches!(reason, TxnError::MissingSiacoinOutput(_)));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(set.snapshot(), before);
    assert_eq!(set.current_path(), vec![genesis, a1.id(), a2.id()]);

    // c2 and c3 are gone, c1 stays
    assert!(matches!(
        set.accept_block(c3).await.unwrap_err().rejection(),
        Some(Rejection::Orphan { .. })
    ));
    assert!(matches!(
        set.accept_block(c1).await.unwrap_err().rejection(),
        Some(Rejection::BlockKnown(_))
    ));
}

#[tokio::test]
async fn test_rocks_store_survives_restart() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut cfg = config();
    cfg.ledger.data_dir = temp_dir.path().to_path_buf();

    let (expected, side) = {
        let set = ConsensusSet::open_default(cfg.clone()).await.unwrap();
        let genesis = set.current_block().unwrap();
        let b1 = child(genesis, 1, 1, vec![]);
        let b2 = child(b1.id(), 2, 2, vec![]);
        let b3 = child(b2.id(), 3, 3, vec![]);
        let side = child(b1.id(), 2, 20, vec![]);
        for block in [b1, b2, b3, side.clone()] {
            set.accept_block(block).await.unwrap();
        }
        let snapshot = set.snapshot();
        set.close().await.unwrap();
        (snapshot, side)
    };

    let reopened = ConsensusSet::open_default(cfg).await.unwrap();
    assert_eq!(reopened.snapshot(), expected);
    assert_eq!(reopened.height(), 3);

    // Side branches are persisted too
    assert!(matches!(
        reopened.accept_block(side).await.unwrap_err().rejection(),
        Some(Rejection::BlockKnown(_))
    ));
    reopened.close().await.unwrap();
}

#[tokio::test]
async fn test_closed_set_refuses_blocks() {
    let set = open(Arc::new(MemoryStore::new())).await;
    let genesis = set.current_block().unwrap();
    set.close().await.unwrap();

    let err = set
        .accept_block(child(genesis, 1, 1, vec![]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Concurrency(_)));
}
