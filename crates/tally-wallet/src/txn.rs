//! Scoped per-block transaction over a [`LedgerStore`].
//!
//! A [`LedgerTxn`] reads through to the committed store and stages every
//! write in an overlay. [`LedgerTxn::into_batch`] turns the overlay into a
//! [`LedgerBatch`] for a single commit. Dropping the txn without converting
//! it discards the overlay, so every early return rolls back.

use std::collections::BTreeMap;

use tally_core::types::{Hash256, OutputId};

use crate::cursor::ChainCursor;
use crate::error::WalletError;
use crate::history::{RecordKey, TxRecord};
use crate::outputs::OutputEntry;
use crate::store::{BatchOp, LedgerBatch, LedgerStore};

/// Staged state of one output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StagedOutput {
    Put(OutputEntry),
    Deleted(OutputEntry),
}

/// Write overlay for a single block.
pub struct LedgerTxn<'s> {
    store: &'s dyn LedgerStore,
    pub(crate) outputs: BTreeMap<OutputId, StagedOutput>,
    pub(crate) records: BTreeMap<RecordKey, Option<TxRecord>>,
    pub(crate) block_index: BTreeMap<u64, Option<Hash256>>,
    pub(crate) cursor: ChainCursor,
    pub(crate) record_count: u64,
    pub(crate) output_count: u64,
}

impl<'s> LedgerTxn<'s> {
    /// Begin a txn on top of the committed state of `store`.
    pub fn begin(store: &'s dyn LedgerStore) -> Result<Self, WalletError> {
        Ok(Self {
            store,
            outputs: BTreeMap::new(),
            records: BTreeMap::new(),
            block_index: BTreeMap::new(),
            cursor: store.cursor()?,
            record_count: store.record_count()?,
            output_count: store.output_count()?,
        })
    }

    /// The cursor as staged so far.
    pub fn cursor(&self) -> ChainCursor {
        self.cursor
    }

    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    pub fn output_count(&self) -> u64 {
        self.output_count
    }

    /// Look up an output, seeing staged writes first.
    pub fn get_output(&self, id: &OutputId) -> Result<Option<OutputEntry>, WalletError> {
        match self.outputs.get(id) {
            Some(StagedOutput::Put(entry)) => Ok(Some(entry.clone())),
            Some(StagedOutput::Deleted(_)) => Ok(None),
            None => Ok(self.store.get_output(id)?),
        }
    }

    /// Look up a record, seeing staged writes first.
    pub fn get_record(&self, key: &RecordKey) -> Result<Option<TxRecord>, WalletError> {
        match self.records.get(key) {
            Some(staged) => Ok(staged.clone()),
            None => Ok(self.store.get_record(key)?),
        }
    }

    /// Records at `height` as staged so far, ordered by index.
    pub fn records_at_height(&self, height: u64) -> Result<Vec<TxRecord>, WalletError> {
        let mut merged: BTreeMap<RecordKey, TxRecord> = self
            .store
            .records_at_height(height)?
            .into_iter()
            .map(|record| (record.key(), record))
            .collect();
        for (key, staged) in self.records.range(RecordKey::height_range(height)) {
            match staged {
                Some(record) => {
                    merged.insert(*key, record.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_values().collect())
    }

    /// Block id at `height`, seeing staged writes first.
    pub fn block_id_at(&self, height: u64) -> Result<Option<Hash256>, WalletError> {
        match self.block_index.get(&height) {
            Some(staged) => Ok(*staged),
            None => Ok(self.store.block_id_at(height)?),
        }
    }

    /// Number of staged writes.
    pub fn staged_len(&self) -> usize {
        self.outputs.len() + self.records.len() + self.block_index.len()
    }

    /// Consume the txn into a batch for a single commit.
    pub fn into_batch(self) -> LedgerBatch {
        let mut ops = Vec::with_capacity(self.staged_len());
        for (id, staged) in self.outputs {
            ops.push(match staged {
                StagedOutput::Put(entry) => BatchOp::PutOutput(id, entry),
                StagedOutput::Deleted(entry) => BatchOp::DeleteOutput(id, entry),
            });
        }
        for (key, staged) in self.records {
            ops.push(match staged {
                Some(record) => BatchOp::PutRecord(record),
                None => BatchOp::DeleteRecord(key),
            });
        }
        for (height, staged) in self.block_index {
            ops.push(match staged {
                Some(id) => BatchOp::PutBlockId(height, id),
                None => BatchOp::DeleteBlockId(height),
            });
        }
        LedgerBatch {
            ops,
            cursor: self.cursor,
            record_count: self.record_count,
            output_count: self.output_count,
        }
    }
}
