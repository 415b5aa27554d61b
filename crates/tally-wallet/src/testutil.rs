//! Fixtures shared by the unit tests of this crate.

use tally_core::types::{
    Address, Block, BlockHeader, Currency, Hash256, OutputId, Transaction, TransactionSource,
    TxInput, TxOutput, TxType,
};

use crate::history::TxRecord;

pub fn addr(seed: u8) -> Address {
    Address(Hash256([seed; 32]))
}

/// A standalone record whose txid is unique per `(height, index)`.
pub fn record(height: u64, index: u64) -> TxRecord {
    let mut seed = [0u8; 32];
    seed[..8].copy_from_slice(&height.to_be_bytes());
    seed[8..16].copy_from_slice(&index.to_be_bytes());
    TxRecord {
        txid: Hash256(seed),
        height,
        index,
        block_id: Hash256([height as u8; 32]),
        timestamp: 1_700_000_000 + height,
        source: TransactionSource::Transaction,
        inflow: Currency::new(1),
        outflow: Currency::ZERO,
        transaction: make_tx(vec![], vec![]),
    }
}

pub fn coinbase(value: u128, to: Address, height: u64) -> Transaction {
    Transaction {
        version: 1,
        tx_type: TxType::Standard,
        inputs: vec![TxInput {
            previous_output: OutputId::null(),
            witness: height.to_le_bytes().to_vec(),
        }],
        outputs: vec![TxOutput { value: Currency::new(value), address: to }],
        lock_time: 0,
    }
}

pub fn make_tx(inputs: Vec<OutputId>, outputs: Vec<(u128, Address)>) -> Transaction {
    Transaction {
        version: 1,
        tx_type: TxType::Standard,
        inputs: inputs
            .into_iter()
            .map(|previous_output| TxInput { previous_output, witness: vec![0u8; 64] })
            .collect(),
        outputs: outputs
            .into_iter()
            .map(|(value, address)| TxOutput { value: Currency::new(value), address })
            .collect(),
        lock_time: 0,
    }
}

pub fn make_block(prev_hash: Hash256, height: u64, transactions: Vec<Transaction>) -> Block {
    Block {
        header: BlockHeader {
            version: 1,
            prev_hash,
            tx_root: Block::compute_tx_root(&transactions).unwrap(),
            timestamp: 1_700_000_000 + height * 600,
            nonce: height,
        },
        transactions,
    }
}
