//! Reorg, rollback, and atomicity tests for the chain event processor.

use std::thread;

use tally_core::error::LedgerError;
use tally_core::events::{ChainEvent, ChainUpdate};
use tally_core::types::*;
use tally_tests::helpers::*;
use tally_wallet::{WalletError, WatchSet};

fn watching(seed: u8, delay: u64) -> TestChain {
    TestChain::new(delay, WatchSet::single(addr(seed)))
}

// ------------------------------------------------------------------
// Reorgs
// ------------------------------------------------------------------

#[test]
fn reorg_replaces_fork_blocks() {
    let me = addr(1);
    let mut chain = watching(1, 2);
    chain.mine_empty(me, 3);
    assert_eq!(chain.wallet.transaction_count().unwrap(), 3);

    let outcomes = chain.reorg(2, 3, addr(9)).unwrap();
    assert_eq!(outcomes.len(), 5);
    assert_eq!(outcomes.iter().filter(|o| o.records > 0).count(), 2);

    assert_eq!(chain.wallet.tip().unwrap().height, 4);
    assert_eq!(chain.wallet.tip().unwrap().block_id, chain.tip_id());
    let records = chain.wallet.transactions(10, 0).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].height, 1);

    // Only the height-1 payout survives; it matured at 3.
    let balance = chain.wallet.balance(&me).unwrap();
    assert_eq!(balance.amount, REWARD);
    assert_eq!(balance.immature, Currency::ZERO);
}

#[test]
fn reorg_restores_spent_outputs() {
    let me = addr(1);
    let mut chain = watching(1, 1);
    let first = chain.mine(me, vec![]);
    chain.mine_empty(addr(9), 1);
    let payout = output_of(&first.transactions[0], 0);

    let spend = make_tx(vec![payout], vec![(REWARD, addr(2))]);
    chain.mine(addr(9), vec![spend]);
    assert_eq!(chain.wallet.balance(&me).unwrap().amount, Currency::ZERO);

    chain.reorg(1, 2, addr(9)).unwrap();
    let unspent = chain.wallet.unspent_outputs(&me).unwrap();
    assert_eq!(unspent.len(), 1);
    assert_eq!(unspent[0].0, payout);
    assert_eq!(chain.wallet.balance(&me).unwrap().amount, REWARD);
    assert_eq!(chain.wallet.transaction_count().unwrap(), 1);
}

#[test]
fn reorg_moves_spend_to_new_block() {
    let me = addr(1);
    let mut chain = watching(1, 1);
    let first = chain.mine(me, vec![]);
    chain.mine_empty(addr(9), 1);
    let payout = output_of(&first.transactions[0], 0);
    let spend = make_tx(vec![payout], vec![(coins(20), addr(2)), (coins(30), me)]);
    chain.mine(addr(9), vec![spend.clone()]);

    // The same spend confirms one block later on the winning branch.
    chain.reorg_with(1, vec![vec![], vec![spend.clone()]], addr(9)).unwrap();

    let latest = &chain.wallet.transactions(1, 0).unwrap()[0];
    assert_eq!(latest.txid, spend.txid().unwrap());
    assert_eq!(latest.height, 4);
    assert_eq!(chain.wallet.balance(&me).unwrap().amount, coins(30));
    assert!(chain.wallet.records_at_height(3).unwrap().is_empty());
}

#[test]
fn contract_payout_is_delayed() {
    let me = addr(1);
    let mut chain = watching(1, 3);
    chain.mine(addr(9), vec![make_contract_payout(coins(7), me, 1)]);

    let record = &chain.wallet.transactions(1, 0).unwrap()[0];
    assert_eq!(record.source, TransactionSource::ContractPayout);
    assert_eq!(record.inflow, coins(7));
    assert_eq!(chain.wallet.balance(&me).unwrap().immature, coins(7));

    chain.mine_empty(addr(9), 2);
    assert_eq!(chain.wallet.balance(&me).unwrap().amount, Currency::ZERO);
    chain.mine_empty(addr(9), 1);
    assert_eq!(chain.wallet.balance(&me).unwrap().amount, coins(7));
}

#[test]
fn multiple_watched_addresses() {
    let watch = WatchSet::new([addr(1), addr(2)]).unwrap();
    let mut chain = TestChain::new(0, watch);
    let first = chain.mine(addr(1), vec![]);

    // Moving value between two watched addresses is one record.
    let payout = output_of(&first.transactions[0], 0);
    chain.mine(addr(9), vec![make_tx(vec![payout], vec![(REWARD, addr(2))])]);

    assert_eq!(chain.wallet.balance(&addr(1)).unwrap().amount, Currency::ZERO);
    assert_eq!(chain.wallet.balance(&addr(2)).unwrap().amount, REWARD);
    assert_eq!(chain.wallet.transaction_count().unwrap(), 2);
    let latest = &chain.wallet.transactions(1, 0).unwrap()[0];
    assert_eq!((latest.inflow, latest.outflow), (REWARD, REWARD));
}

// ------------------------------------------------------------------
// Desynchronization
// ------------------------------------------------------------------

#[test]
fn reverting_wrong_block_halts() {
    let mut chain = watching(1, 2);
    chain.mine_empty(addr(1), 2);
    let stranger = make_block(Hash256([7; 32]), 2, 99, vec![make_coinbase(REWARD, addr(1), 2)]);

    let err = chain.processor.revert_block(2, &stranger).unwrap_err();
    assert!(matches!(err, WalletError::Ledger(LedgerError::TipMismatch { .. })));
    assert!(chain.processor.is_halted());

    // Nothing moves once halted, even a valid block.
    let next = chain.build_next(addr(1), vec![]);
    assert!(matches!(chain.apply(next), Err(WalletError::Halted(_))));
    assert_eq!(chain.wallet.tip().unwrap().height, 2);
}

#[test]
fn apply_on_wrong_parent_is_fatal() {
    let mut chain = watching(1, 2);
    chain.mine_empty(addr(1), 1);
    let orphan = make_block(Hash256([3; 32]), 2, 0, vec![make_coinbase(REWARD, addr(1), 2)]);

    let err = chain.apply(orphan).unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(err, WalletError::Ledger(LedgerError::ParentMismatch { .. })));
    assert_eq!(chain.wallet.transaction_count().unwrap(), 1);
}

#[test]
fn malformed_update_changes_nothing() {
    let mut chain = watching(1, 2);
    chain.mine_empty(addr(1), 2);
    let before = chain.snapshot();

    // A revert after an apply is out of order.
    let next = chain.build_next(addr(1), vec![]);
    let tip = chain.blocks[1].clone();
    let update = ChainUpdate::new(vec![
        ChainEvent::Apply { height: 3, block: next },
        ChainEvent::Revert { height: 2, block: tip },
    ]);
    let err = chain.processor.process_update(&update).unwrap_err();
    assert!(matches!(err, WalletError::Ledger(LedgerError::MalformedUpdate(_))));
    assert_eq!(chain.snapshot(), before);
}

#[test]
fn update_keeps_blocks_before_failure() {
    let mut chain = watching(1, 2);
    chain.mine_empty(addr(1), 1);

    let good = chain.build_next(addr(1), vec![]);
    let bad = make_block(Hash256([5; 32]), 3, 0, vec![make_coinbase(REWARD, addr(1), 3)]);
    let update = ChainUpdate::new(vec![
        ChainEvent::Apply { height: 2, block: good.clone() },
        ChainEvent::Apply { height: 3, block: bad },
    ]);

    assert!(chain.processor.process_update(&update).is_err());
    let tip = chain.wallet.tip().unwrap();
    assert_eq!((tip.height, tip.block_id), (2, good.id()));
    assert_eq!(chain.wallet.transaction_count().unwrap(), 2);
}

// ------------------------------------------------------------------
// Atomicity and round trips
// ------------------------------------------------------------------

#[test]
fn failed_commit_leaves_no_trace() {
    let me = addr(1);
    let mut chain = watching(1, 0);
    let first = chain.mine(me, vec![]);
    let payout = output_of(&first.transactions[0], 0);
    let before = chain.snapshot();

    let piece = REWARD.div_floor(10).unwrap();
    let split = make_tx(vec![payout], (0..10).map(|_| (piece, me)).collect());
    let block = chain.build_next(me, vec![split]);

    // Fail part-way through the block's writes.
    chain.processor.with_store_mut(|store| store.inject_commit_failure(5));
    let err = chain.apply(block.clone()).unwrap_err();
    assert!(err.is_retryable());
    assert!(!chain.processor.is_halted());
    assert_eq!(chain.snapshot(), before);

    // The same block goes through on retry.
    chain.apply(block).unwrap();
    assert_eq!(chain.wallet.transaction_count().unwrap(), 3);
    assert_eq!(chain.wallet.unspent_outputs(&me).unwrap().len(), 11);
}

#[test]
fn revert_of_apply_restores_every_table() {
    let me = addr(1);
    let mut chain = watching(1, 2);
    let first = chain.mine(me, vec![]);
    chain.mine_empty(me, 2);
    let before = chain.snapshot();

    let payout = output_of(&first.transactions[0], 0);
    let spend = make_tx(vec![payout], vec![(coins(1), addr(2)), (coins(49), me)]);
    chain.mine(me, vec![spend]);
    assert_ne!(chain.snapshot(), before);

    chain.revert_tip().unwrap();
    assert_eq!(chain.snapshot(), before);
}

#[test]
fn readers_see_whole_blocks() {
    let me = addr(1);
    let mut chain = watching(1, 0);
    let wallet = chain.wallet.clone();
    const BLOCKS: u64 = 200;

    thread::scope(|scope| {
        for _ in 0..4 {
            let wallet = wallet.clone();
            scope.spawn(move || loop {
                let (height, amount, count) = wallet.with_view(|view| {
                    let height = view.cursor().unwrap().height;
                    let amount = view.balance(&me).unwrap().amount;
                    let count = view.index().count().unwrap();
                    (height, amount, count)
                });
                assert_eq!(amount.0, REWARD.0 * height as u128);
                assert_eq!(count, height);
                if height == BLOCKS {
                    break;
                }
            });
        }
        chain.mine_empty(me, BLOCKS);
    });
}
