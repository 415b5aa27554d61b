//! Ledger persistence interface and the in-memory store.
//!
//! A [`LedgerStore`] exposes point reads over the three ledger tables and a
//! single write entry point, [`LedgerStore::commit`], which applies a whole
//! [`LedgerBatch`] or nothing. The processor produces exactly one batch per
//! block, so a block is the unit of atomicity readers observe.

use std::collections::BTreeMap;

use tally_core::error::StoreError;
use tally_core::types::{Address, Hash256, OutputId};

use crate::cursor::ChainCursor;
use crate::history::{RecordKey, TxRecord};
use crate::outputs::OutputEntry;

/// Persistent storage for the ledger.
///
/// Implemented by [`MemoryLedgerStore`] here and by the RocksDB store in
/// the node crate.
pub trait LedgerStore: Send + Sync {
    /// Look up an output by id. `None` if it was never created or has been
    /// reverted.
    fn get_output(&self, id: &OutputId) -> Result<Option<OutputEntry>, StoreError>;

    /// All outputs (spent or not) owned by `address`, ordered by id.
    fn outputs_by_address(&self, address: &Address)
        -> Result<Vec<(OutputId, OutputEntry)>, StoreError>;

    /// Number of outputs currently held.
    fn output_count(&self) -> Result<u64, StoreError>;

    /// Look up a transaction record by its pagination key.
    fn get_record(&self, key: &RecordKey) -> Result<Option<TxRecord>, StoreError>;

    /// All records at `height`, ordered by within-block index.
    fn records_at_height(&self, height: u64) -> Result<Vec<TxRecord>, StoreError>;

    /// Up to `limit` records, most recent first, after skipping `offset`.
    fn page_records(&self, limit: usize, offset: usize) -> Result<Vec<TxRecord>, StoreError>;

    /// Number of transaction records.
    fn record_count(&self) -> Result<u64, StoreError>;

    /// The last committed cursor.
    fn cursor(&self) -> Result<ChainCursor, StoreError>;

    /// ID of the block applied at `height`, if it is on the wallet's chain.
    fn block_id_at(&self, height: u64) -> Result<Option<Hash256>, StoreError>;

    /// Apply every operation in `batch` and persist the new cursor and
    /// counters, or change nothing.
    fn commit(&mut self, batch: LedgerBatch) -> Result<(), StoreError>;
}

/// One write in a [`LedgerBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    PutOutput(OutputId, OutputEntry),
    /// Carries the removed entry so stores can drop secondary index rows.
    DeleteOutput(OutputId, OutputEntry),
    PutRecord(TxRecord),
    DeleteRecord(RecordKey),
    PutBlockId(u64, Hash256),
    DeleteBlockId(u64),
}

/// Every change produced by processing one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerBatch {
    pub ops: Vec<BatchOp>,
    pub cursor: ChainCursor,
    pub record_count: u64,
    pub output_count: u64,
}

impl LedgerBatch {
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// A full copy of the ledger's tables. Used for field-for-field comparisons.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub outputs: BTreeMap<OutputId, OutputEntry>,
    pub records: BTreeMap<RecordKey, TxRecord>,
    pub block_index: BTreeMap<u64, Hash256>,
    pub cursor: ChainCursor,
    pub record_count: u64,
    pub output_count: u64,
}

impl LedgerSnapshot {
    fn apply(&mut self, op: BatchOp) {
        match op {
            BatchOp::PutOutput(id, entry) => {
                self.outputs.insert(id, entry);
            }
            BatchOp::DeleteOutput(id, _) => {
                self.outputs.remove(&id);
            }
            BatchOp::PutRecord(record) => {
                self.records.insert(record.key(), record);
            }
            BatchOp::DeleteRecord(key) => {
                self.records.remove(&key);
            }
            BatchOp::PutBlockId(height, id) => {
                self.block_index.insert(height, id);
            }
            BatchOp::DeleteBlockId(height) => {
                self.block_index.remove(&height);
            }
        }
    }
}

/// In-memory ledger backed by ordered maps.
///
/// Applying a batch cannot fail, so commits write straight into the tables.
/// An injected failure is decided before the first write.
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    tables: LedgerSnapshot,
    #[cfg(any(test, feature = "testing"))]
    fail_after: Option<usize>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the committed state.
    pub fn snapshot(&self) -> LedgerSnapshot {
        self.tables.clone()
    }

    /// Make the next commit fail at operation `after_ops`, leaving the
    /// tables untouched. The hook fires once, and only for a batch with more
    /// than `after_ops` operations.
    #[cfg(any(test, feature = "testing"))]
    pub fn inject_commit_failure(&mut self, after_ops: usize) {
        self.fail_after = Some(after_ops);
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn get_output(&self, id: &OutputId) -> Result<Option<OutputEntry>, StoreError> {
        Ok(self.tables.outputs.get(id).cloned())
    }

    fn outputs_by_address(
        &self,
        address: &Address,
    ) -> Result<Vec<(OutputId, OutputEntry)>, StoreError> {
        Ok(self
            .tables
            .outputs
            .iter()
            .filter(|(_, entry)| entry.address == *address)
            .map(|(id, entry)| (*id, entry.clone()))
            .collect())
    }

    fn output_count(&self) -> Result<u64, StoreError> {
        Ok(self.tables.output_count)
    }

    fn get_record(&self, key: &RecordKey) -> Result<Option<TxRecord>, StoreError> {
        Ok(self.tables.records.get(key).cloned())
    }

    fn records_at_height(&self, height: u64) -> Result<Vec<TxRecord>, StoreError> {
        Ok(self
            .tables
            .records
            .range(RecordKey::height_range(height))
            .map(|(_, record)| record.clone())
            .collect())
    }

    fn page_records(&self, limit: usize, offset: usize) -> Result<Vec<TxRecord>, StoreError> {
        Ok(self
            .tables
            .records
            .values()
            .rev()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    fn record_count(&self) -> Result<u64, StoreError> {
        Ok(self.tables.record_count)
    }

    fn cursor(&self) -> Result<ChainCursor, StoreError> {
        Ok(self.tables.cursor)
    }

    fn block_id_at(&self, height: u64) -> Result<Option<Hash256>, StoreError> {
        Ok(self.tables.block_index.get(&height).copied())
    }

    fn commit(&mut self, batch: LedgerBatch) -> Result<(), StoreError> {
        #[cfg(any(test, feature = "testing"))]
        if let Some(at) = self.fail_after.take() {
            if at < batch.ops.len() {
                return Err(StoreError::Backend(format!(
                    "injected failure after {at} operations"
                )));
            }
        }

        for op in batch.ops {
            self.tables.apply(op);
        }
        self.tables.cursor = batch.cursor;
        self.tables.record_count = batch.record_count;
        self.tables.output_count = batch.output_count;
        Ok(())
    }
}
