//! End-to-end wallet ledger scenario.
//!
//! Walks one watched address through the full lifecycle: a miner payout that
//! matures, a self-split into twenty outputs, twenty sends confirmed in one
//! block, and finally a reorg all the way back to genesis. The same chain is
//! then replayed through a RocksDB-backed node.

use tally_core::events::{ChainEvent, ChainUpdate};
use tally_core::params::NetworkType;
use tally_core::types::*;
use tally_node_lib::config::NodeConfig;
use tally_node_lib::node::Node;
use tally_tests::helpers::*;

const WATCHED: u8 = 1;
const MINER: u8 = 9;
const PAYEE: u8 = 2;
const DELAY: u64 = 6;

#[test]
fn wallet_lifecycle() {
    let me = addr(WATCHED);
    let mut chain = TestChain::new(DELAY, tally_wallet::WatchSet::single(me));

    // Payout to the wallet: recorded immediately, spendable only after DELAY blocks.
    let payout_block = chain.mine(me, vec![]);
    let payout = output_of(&payout_block.transactions[0], 0);
    let balance = chain.wallet.balance(&me).unwrap();
    assert_eq!(balance.amount, Currency::ZERO);
    assert_eq!(balance.immature, REWARD);
    assert_eq!(chain.wallet.transaction_count().unwrap(), 1);

    chain.mine_empty(addr(MINER), DELAY - 1);
    assert_eq!(chain.wallet.balance(&me).unwrap().amount, Currency::ZERO);
    chain.mine_empty(addr(MINER), 1);
    let balance = chain.wallet.balance(&me).unwrap();
    assert_eq!(balance.height, 1 + DELAY);
    assert_eq!(balance.amount, REWARD);
    assert_eq!(chain.wallet.transaction_count().unwrap(), 1);

    // Split the payout into twenty outputs back to ourselves.
    let piece = REWARD.div_floor(20).unwrap();
    let split = make_tx(vec![payout], (0..20).map(|_| (piece, me)).collect());
    chain.mine(addr(MINER), vec![split.clone()]);

    assert_eq!(chain.wallet.balance(&me).unwrap().amount, REWARD);
    assert_eq!(chain.wallet.transaction_count().unwrap(), 2);
    let latest = &chain.wallet.transactions(1, 0).unwrap()[0];
    assert_eq!(latest.txid, split.txid().unwrap());
    assert_eq!(latest.source, TransactionSource::Transaction);
    assert!(latest.outflow > Currency::ZERO);
    assert_eq!(latest.outflow, REWARD);
    assert_eq!(latest.inflow, REWARD);

    // Twenty sends, each spending one split output, all in one block.
    let sent = coins(1);
    let change = piece.checked_sub(sent).unwrap();
    let sends: Vec<Transaction> = (0..20)
        .map(|i| make_tx(vec![output_of(&split, i)], vec![(sent, addr(PAYEE)), (change, me)]))
        .collect();
    let send_block = chain.mine(addr(MINER), sends.clone());
    let send_height = chain.height();

    assert_eq!(chain.wallet.transaction_count().unwrap(), 22);
    let expected = REWARD.checked_sub(coins(20)).unwrap();
    assert_eq!(chain.wallet.balance(&me).unwrap().amount, expected);
    assert_eq!(chain.wallet.records_at_height(send_height).unwrap().len(), 20);

    // transactions(1, i) walks the block from the last transaction backwards.
    for i in 0..20 {
        let page = chain.wallet.transactions(1, i as i64).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].txid, sends[19 - i].txid().unwrap(), "offset {i}");
        assert_eq!(page[0].height, send_height);
        assert_eq!(page[0].block_id, send_block.id());
        assert_eq!(page[0].outflow, piece);
        assert_eq!(page[0].inflow, change);
    }
    assert_eq!(chain.wallet.transactions(1, 20).unwrap()[0].txid, split.txid().unwrap());
    let oldest = &chain.wallet.transactions(1, 21).unwrap()[0];
    assert_eq!(oldest.source, TransactionSource::MinerPayout);
    assert!(chain.wallet.transactions(1, 22).unwrap().is_empty());

    // Reorg from genesis to a longer chain that never paid us.
    let depth = chain.blocks.len();
    chain.reorg(depth, 2 * DELAY, addr(MINER)).unwrap();

    assert_eq!(chain.height(), 2 * DELAY);
    assert_eq!(chain.wallet.tip().unwrap().block_id, chain.tip_id());
    let balance = chain.wallet.balance(&me).unwrap();
    assert_eq!(balance.amount, Currency::ZERO);
    assert_eq!(balance.immature, Currency::ZERO);
    assert_eq!(balance.outputs, 0);
    assert!(chain.wallet.transactions(0, 100).unwrap().is_empty());
    assert!(chain.wallet.transactions(100, 0).unwrap().is_empty());
    assert_eq!(chain.wallet.transaction_count().unwrap(), 0);
    assert!(chain.wallet.unspent_outputs(&me).unwrap().is_empty());
}

#[test]
fn negative_pagination_is_rejected() {
    let me = addr(WATCHED);
    let mut chain = TestChain::regtest(me);
    chain.mine(me, vec![]);

    let err = chain.wallet.transactions(-1, 0).unwrap_err();
    assert!(matches!(err, tally_wallet::WalletError::Query(_)));
    assert!(!err.is_fatal());
    assert!(chain.wallet.transactions(1, -5).is_err());
    assert!(chain.wallet.transactions(10, 5).unwrap().is_empty());
}

#[test]
fn unwatched_balance_is_rejected() {
    let chain = TestChain::regtest(addr(WATCHED));
    assert!(chain.wallet.balance(&addr(PAYEE)).is_err());
    assert_eq!(chain.wallet.address(), addr(WATCHED));
    assert_eq!(chain.wallet.addresses(), vec![addr(WATCHED)]);
}

#[tokio::test]
async fn node_replays_lifecycle_from_disk() {
    let me = addr(WATCHED);
    let dir = tempfile::tempdir().unwrap();
    let config = NodeConfig {
        data_dir: dir.path().to_path_buf(),
        network: NetworkType::Regtest,
        maturity_delay: Some(DELAY),
        watch_addresses: vec![me],
        retry_delay_ms: 1,
        ..NodeConfig::default()
    };

    // Build the chain on the memory store, then stream it to the node.
    let mut chain = TestChain::new(DELAY, tally_wallet::WatchSet::single(me));
    let first = chain.mine(me, vec![]);
    chain.mine_empty(addr(MINER), DELAY);
    let payout = output_of(&first.transactions[0], 0);
    let spend = make_tx(vec![payout], vec![(coins(10), addr(PAYEE)), (coins(40), me)]);
    chain.mine(addr(MINER), vec![spend]);

    let node = Node::start(config.clone()).unwrap();
    for (i, block) in chain.blocks.iter().enumerate() {
        let event = ChainEvent::Apply { height: i as u64 + 1, block: block.clone() };
        node.submit(ChainUpdate::new(vec![event])).await.unwrap();
    }
    let summary = node.finish().await.unwrap();
    assert_eq!(summary.applied, chain.height());

    let node = Node::start(config).unwrap();
    let wallet = node.wallet().clone();
    assert_eq!(wallet.tip().unwrap(), chain.wallet.tip().unwrap());
    assert_eq!(wallet.balance(&me).unwrap(), chain.wallet.balance(&me).unwrap());
    assert_eq!(wallet.balance(&me).unwrap().amount, coins(40));
    assert_eq!(
        wallet.transactions(10, 0).unwrap(),
        chain.wallet.transactions(10, 0).unwrap()
    );
    node.shutdown().await.unwrap();
}
