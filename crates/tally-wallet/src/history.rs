//! Transaction index: wallet-relevant transactions keyed by
//! `(height, index)` and presented most recent first.

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use tally_core::error::{LedgerError, QueryError};
use tally_core::types::{Currency, Hash256, Transaction, TransactionSource};

use crate::error::WalletError;
use crate::store::LedgerStore;
use crate::txn::LedgerTxn;

/// Pagination key of a record. Orders by height, then within-block index.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    bincode::Encode, bincode::Decode,
)]
pub struct RecordKey {
    pub height: u64,
    pub index: u64,
}

impl RecordKey {
    pub fn new(height: u64, index: u64) -> Self {
        Self { height, index }
    }

    /// Every key at `height`.
    pub fn height_range(height: u64) -> RangeInclusive<RecordKey> {
        Self::new(height, 0)..=Self::new(height, u64::MAX)
    }
}

/// A confirmed transaction touching a watched address.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxRecord {
    pub txid: Hash256,
    pub height: u64,
    /// Position of the transaction within its block.
    pub index: u64,
    pub block_id: Hash256,
    /// Block timestamp, Unix seconds.
    pub timestamp: u64,
    pub source: TransactionSource,
    /// Sum of watched outputs the transaction created.
    pub inflow: Currency,
    /// Sum of watched outputs the transaction consumed.
    pub outflow: Currency,
    pub transaction: Transaction,
}

impl TxRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.height, self.index)
    }
}

impl LedgerTxn<'_> {
    /// Append a record.
    ///
    /// Fails if a record already holds the same key, or the same txid is
    /// already recorded at the same height.
    pub fn record_transaction(&mut self, record: TxRecord) -> Result<(), WalletError> {
        let key = record.key();
        let duplicate = LedgerError::DuplicateTransaction {
            txid: record.txid,
            height: record.height,
        };
        if self.get_record(&key)?.is_some() {
            return Err(duplicate.into());
        }
        if self
            .records_at_height(record.height)?
            .iter()
            .any(|existing| existing.txid == record.txid)
        {
            return Err(duplicate.into());
        }
        self.records.insert(key, Some(record));
        self.record_count += 1;
        Ok(())
    }

    /// Delete every record at `height`. Returns how many were removed;
    /// calling it again removes nothing.
    pub fn remove_transactions_for_block(&mut self, height: u64) -> Result<usize, WalletError> {
        let removed = self.records_at_height(height)?;
        for record in &removed {
            self.records.insert(record.key(), None);
        }
        self.record_count = self.record_count.saturating_sub(removed.len() as u64);
        Ok(removed.len())
    }
}

/// Validated pagination arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageRequest {
    pub limit: usize,
    pub offset: usize,
}

impl PageRequest {
    pub fn new(limit: usize, offset: usize) -> Self {
        Self { limit, offset }
    }

    /// Build from signed arguments as received at an outer boundary.
    pub fn from_signed(limit: i64, offset: i64) -> Result<Self, QueryError> {
        let limit = usize::try_from(limit).map_err(|_| QueryError::NegativeLimit(limit))?;
        let offset = usize::try_from(offset).map_err(|_| QueryError::NegativeOffset(offset))?;
        Ok(Self { limit, offset })
    }
}

/// Read view over the committed transaction index.
pub struct TransactionIndex<'a> {
    store: &'a dyn LedgerStore,
}

impl<'a> TransactionIndex<'a> {
    pub fn new(store: &'a dyn LedgerStore) -> Self {
        Self { store }
    }

    /// Records most recent first: height descending, then index descending.
    pub fn page(&self, request: PageRequest) -> Result<Vec<TxRecord>, WalletError> {
        if request.limit == 0 {
            return Ok(Vec::new());
        }
        Ok(self.store.page_records(request.limit, request.offset)?)
    }

    pub fn count(&self) -> Result<u64, WalletError> {
        Ok(self.store.record_count()?)
    }

    pub fn at_height(&self, height: u64) -> Result<Vec<TxRecord>, WalletError> {
        Ok(self.store.records_at_height(height)?)
    }
}
