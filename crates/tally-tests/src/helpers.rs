//! Shared test helpers for end-to-end, reorg, and property tests.

use tally_core::events::{ChainEvent, ChainUpdate};
use tally_core::params::{ChainParams, NetworkType, COIN};
use tally_core::types::*;
use tally_wallet::{
    ChainEventProcessor, LedgerSnapshot, MemoryLedgerStore, ProcessOutcome, Wallet, WalletError,
    WatchSet,
};

/// Payout paid by every block built through [`TestChain`].
pub const REWARD: Currency = Currency::new(50 * COIN.0);

/// Simple address from a seed byte.
pub fn addr(seed: u8) -> Address {
    Address(Hash256([seed; 32]))
}

/// `n` whole coins.
pub fn coins(n: u128) -> Currency {
    Currency::new(n * COIN.0)
}

/// Create a coinbase transaction with a unique height marker.
///
/// The height goes into the witness so each coinbase has a distinct txid
/// even when value and address repeat.
pub fn make_coinbase(value: Currency, to: Address, height: u64) -> Transaction {
    Transaction {
        version: 1,
        tx_type: TxType::Standard,
        inputs: vec![TxInput {
            previous_output: OutputId::null(),
            witness: height.to_le_bytes().to_vec(),
        }],
        outputs: vec![TxOutput { value, address: to }],
        lock_time: 0,
    }
}

/// Create a contract payout. Matures like a miner payout.
pub fn make_contract_payout(value: Currency, to: Address, height: u64) -> Transaction {
    Transaction {
        version: 1,
        tx_type: TxType::ContractPayout,
        inputs: vec![],
        outputs: vec![TxOutput { value, address: to }],
        lock_time: height,
    }
}

/// Create a simple spending transaction.
pub fn make_tx(inputs: Vec<OutputId>, outputs: Vec<(Currency, Address)>) -> Transaction {
    Transaction {
        version: 1,
        tx_type: TxType::Standard,
        inputs: inputs
            .into_iter()
            .map(|previous_output| TxInput { previous_output, witness: vec![0; 64] })
            .collect(),
        outputs: outputs
            .into_iter()
            .map(|(value, address)| TxOutput { value, address })
            .collect(),
        lock_time: 0,
    }
}

/// Create a block with a correct transaction root.
///
/// `salt` distinguishes competing blocks at the same height.
pub fn make_block(prev_hash: Hash256, height: u64, salt: u64, txs: Vec<Transaction>) -> Block {
    Block {
        header: BlockHeader {
            version: 1,
            prev_hash,
            tx_root: Block::compute_tx_root(&txs).unwrap(),
            timestamp: 1_700_000_000 + height * 600,
            nonce: (salt << 32) | height,
        },
        transactions: txs,
    }
}

/// Output `index` of `tx`.
pub fn output_of(tx: &Transaction, index: u64) -> OutputId {
    OutputId::new(tx.txid().unwrap(), index)
}

/// A wallet on the in-memory store plus the chain it has applied.
///
/// `blocks[i]` sits at height `i + 1`.
pub struct TestChain {
    pub wallet: Wallet<MemoryLedgerStore>,
    pub processor: ChainEventProcessor<MemoryLedgerStore>,
    pub blocks: Vec<Block>,
    salt: u64,
}

impl TestChain {
    pub fn new(maturity_delay: u64, watch: WatchSet) -> Self {
        let params =
            ChainParams::for_network(NetworkType::Regtest).with_maturity_delay(maturity_delay);
        let (wallet, processor) = Wallet::open(MemoryLedgerStore::new(), params, watch);
        Self {
            wallet,
            processor,
            blocks: Vec::new(),
            salt: 0,
        }
    }

    /// Regtest delay, watching only `address`.
    pub fn regtest(address: Address) -> Self {
        let delay = ChainParams::for_network(NetworkType::Regtest).maturity_delay;
        Self::new(delay, WatchSet::single(address))
    }

    pub fn height(&self) -> u64 {
        self.blocks.len() as u64
    }

    pub fn tip_id(&self) -> Hash256 {
        self.blocks.last().map(Block::id).unwrap_or(Hash256::ZERO)
    }

    /// Build, but do not apply, the next block: a [`REWARD`] coinbase to
    /// `miner` followed by `txs`.
    pub fn build_next(&self, miner: Address, txs: Vec<Transaction>) -> Block {
        let height = self.height() + 1;
        let mut all = vec![make_coinbase(REWARD, miner, height)];
        all.extend(txs);
        make_block(self.tip_id(), height, self.salt, all)
    }

    /// Build and apply the next block.
    pub fn mine(&mut self, miner: Address, txs: Vec<Transaction>) -> Block {
        let block = self.build_next(miner, txs);
        self.apply(block.clone()).unwrap();
        block
    }

    /// Mine `count` blocks with nothing but the coinbase.
    pub fn mine_empty(&mut self, miner: Address, count: u64) {
        for _ in 0..count {
            self.mine(miner, vec![]);
        }
    }

    /// Apply `block` at the next height, keeping it only if it commits.
    pub fn apply(&mut self, block: Block) -> Result<ProcessOutcome, WalletError> {
        let outcome = self.processor.apply_block(self.height() + 1, &block)?;
        self.blocks.push(block);
        Ok(outcome)
    }

    /// Revert the tip block.
    pub fn revert_tip(&mut self) -> Result<ProcessOutcome, WalletError> {
        let height = self.height();
        let block = self.blocks.last().cloned().expect("no blocks to revert");
        let outcome = self.processor.revert_block(height, &block)?;
        self.blocks.pop();
        Ok(outcome)
    }

    /// Replace the top `depth` blocks with `count` coinbase-only blocks
    /// paying `miner`, delivered as one chain update.
    pub fn reorg(
        &mut self,
        depth: usize,
        count: u64,
        miner: Address,
    ) -> Result<Vec<ProcessOutcome>, WalletError> {
        self.reorg_with(depth, (0..count).map(|_| Vec::new()).collect(), miner)
    }

    /// Like [`TestChain::reorg`], with the given transactions in each
    /// replacement block after its coinbase.
    pub fn reorg_with(
        &mut self,
        depth: usize,
        replacement: Vec<Vec<Transaction>>,
        miner: Address,
    ) -> Result<Vec<ProcessOutcome>, WalletError> {
        let fork = self.blocks.len() - depth;
        let mut events = Vec::new();
        for (i, block) in self.blocks[fork..].iter().enumerate().rev() {
            events.push(ChainEvent::Revert {
                height: (fork + i + 1) as u64,
                block: block.clone(),
            });
        }

        self.salt += 1;
        let mut prev = if fork == 0 { Hash256::ZERO } else { self.blocks[fork - 1].id() };
        let mut new_blocks = Vec::new();
        for (i, txs) in replacement.into_iter().enumerate() {
            let height = (fork + i + 1) as u64;
            let mut all = vec![make_coinbase(REWARD, miner, height)];
            all.extend(txs);
            let block = make_block(prev, height, self.salt, all);
            prev = block.id();
            events.push(ChainEvent::Apply { height, block: block.clone() });
            new_blocks.push(block);
        }

        let outcomes = self.processor.process_update(&ChainUpdate::new(events))?;
        self.blocks.truncate(fork);
        self.blocks.extend(new_blocks);
        Ok(outcomes)
    }

    /// Every table of the ledger.
    pub fn snapshot(&self) -> LedgerSnapshot {
        self.wallet.with_store(|store| store.snapshot())
    }
}
