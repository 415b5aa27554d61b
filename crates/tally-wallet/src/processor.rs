//! Chain event processor: the single writer of the ledger.
//!
//! Every block is staged in a [`LedgerTxn`] under an upgradable read lock
//! and committed as one [`LedgerBatch`](crate::store::LedgerBatch) after
//! upgrading to a write lock. Readers therefore only ever observe block
//! boundaries.
//!
//! A desynchronization error halts the processor. Persistence errors leave
//! the ledger exactly as it was before the block, so the caller may retry.

use std::sync::Arc;

use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use serde::Serialize;
use tally_core::error::LedgerError;
use tally_core::events::{ChainEvent, ChainUpdate};
use tally_core::params::ChainParams;
use tally_core::traits::ConsensusView;
use tally_core::types::{Block, Currency, Hash256, OutputId, TransactionSource};
use tracing::{debug, info, warn};

use crate::error::WalletError;
use crate::history::TxRecord;
use crate::store::LedgerStore;
use crate::txn::LedgerTxn;
use crate::wallet::WatchSet;

/// Direction of a processed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Apply,
    Revert,
}

/// Summary of one committed block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProcessOutcome {
    pub kind: EventKind,
    pub height: u64,
    pub block_id: Hash256,
    /// Outputs created (apply) or deleted (revert).
    pub outputs: usize,
    /// Outputs flagged spent (apply) or restored (revert).
    pub inputs: usize,
    /// Records written (apply) or removed (revert).
    pub records: usize,
}

impl ProcessOutcome {
    fn new(kind: EventKind, height: u64, block_id: Hash256) -> Self {
        Self {
            kind,
            height,
            block_id,
            outputs: 0,
            inputs: 0,
            records: 0,
        }
    }
}

/// Applies and reverts blocks against a [`LedgerStore`].
pub struct ChainEventProcessor<S> {
    store: Arc<RwLock<S>>,
    params: ChainParams,
    watch: Arc<WatchSet>,
    consensus: Option<Arc<dyn ConsensusView>>,
    halted: Option<String>,
}

impl<S: LedgerStore> ChainEventProcessor<S> {
    pub(crate) fn new(store: Arc<RwLock<S>>, params: ChainParams, watch: Arc<WatchSet>) -> Self {
        Self {
            store,
            params,
            watch,
            consensus: None,
            halted: None,
        }
    }

    /// Refuse blocks above the consensus tip.
    pub fn with_consensus(mut self, consensus: Arc<dyn ConsensusView>) -> Self {
        self.consensus = Some(consensus);
        self
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    /// Exclusive access to the store outside of block processing.
    pub fn with_store_mut<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.store.write())
    }

    /// Process every event of an update in order.
    ///
    /// Each block commits on its own. When a block fails, the blocks before
    /// it stay committed and the error is returned.
    pub fn process_update(
        &mut self,
        update: &ChainUpdate,
    ) -> Result<Vec<ProcessOutcome>, WalletError> {
        self.ensure_running()?;
        let validated = update.validate().map_err(WalletError::from);
        self.check(validated)?;

        let mut outcomes = Vec::with_capacity(update.events.len());
        for event in &update.events {
            outcomes.push(self.process_event(event)?);
        }
        Ok(outcomes)
    }

    pub fn process_event(&mut self, event: &ChainEvent) -> Result<ProcessOutcome, WalletError> {
        match event {
            ChainEvent::Apply { height, block } => self.apply_block(*height, block),
            ChainEvent::Revert { height, block } => self.revert_block(*height, block),
        }
    }

    /// Apply `block` as the next block after the cursor.
    pub fn apply_block(&mut self, height: u64, block: &Block) -> Result<ProcessOutcome, WalletError> {
        self.ensure_running()?;
        let result = self.commit_block(|txn| self.stage_apply(txn, height, block));
        let outcome = self.check(result)?;
        info!(
            height,
            block_id = %outcome.block_id,
            outputs_created = outcome.outputs,
            outputs_spent = outcome.inputs,
            records = outcome.records,
            "block applied"
        );
        Ok(outcome)
    }

    /// Revert `block`, which must be the cursor tip.
    pub fn revert_block(&mut self, height: u64, block: &Block) -> Result<ProcessOutcome, WalletError> {
        self.ensure_running()?;
        let result = self.commit_block(|txn| self.stage_revert(txn, height, block));
        let outcome = self.check(result)?;
        info!(
            height,
            block_id = %outcome.block_id,
            outputs_removed = outcome.outputs,
            outputs_restored = outcome.inputs,
            records_removed = outcome.records,
            "block reverted"
        );
        Ok(outcome)
    }

    fn ensure_running(&self) -> Result<(), WalletError> {
        match &self.halted {
            Some(reason) => Err(WalletError::Halted(reason.clone())),
            None => Ok(()),
        }
    }

    fn check<T>(&mut self, result: Result<T, WalletError>) -> Result<T, WalletError> {
        if let Err(e) = &result {
            if e.is_fatal() {
                warn!(error = %e, "ledger desynchronized, halting processor");
                self.halted = Some(e.to_string());
            } else {
                warn!(error = %e, "block not committed");
            }
        }
        result
    }

    /// Stage one block and commit it as a single batch.
    fn commit_block<F>(&self, stage: F) -> Result<ProcessOutcome, WalletError>
    where
        F: FnOnce(&mut LedgerTxn<'_>) -> Result<ProcessOutcome, WalletError>,
    {
        let guard = self.store.upgradable_read();
        let mut txn = LedgerTxn::begin(&*guard)?;
        let outcome = stage(&mut txn)?;
        let batch = txn.into_batch();

        let mut writer = RwLockUpgradableReadGuard::upgrade(guard);
        writer.commit(batch)?;
        Ok(outcome)
    }

    fn stage_apply(
        &self,
        txn: &mut LedgerTxn<'_>,
        height: u64,
        block: &Block,
    ) -> Result<ProcessOutcome, WalletError> {
        let cursor = txn.cursor();
        let expected = cursor.height + 1;
        if height != expected {
            return Err(LedgerError::NonSequentialAdvance { expected, got: height }.into());
        }
        if block.header.prev_hash != cursor.block_id {
            return Err(LedgerError::ParentMismatch {
                tip: cursor.block_id,
                parent: block.header.prev_hash,
            }
            .into());
        }
        if let Some(consensus) = &self.consensus {
            let tip = consensus.tip_height();
            if height > tip {
                return Err(LedgerError::AheadOfConsensus { height, consensus: tip }.into());
            }
        }

        let block_id = block.id();
        let mut outcome = ProcessOutcome::new(EventKind::Apply, height, block_id);

        for (index, tx) in block.transactions.iter().enumerate() {
            let txid = tx.txid()?;
            let subsidy = block.is_subsidy(index);
            let source = if subsidy {
                TransactionSource::MinerPayout
            } else {
                tx.source()
            };
            let mut touched = false;

            let mut outflow = Currency::ZERO;
            if !subsidy {
                for input in &tx.inputs {
                    let id = input.previous_output;
                    if txn.get_output(&id)?.is_none() {
                        continue;
                    }
                    let spent = txn.apply_input(id, height)?;
                    outflow = outflow
                        .checked_add(spent.value)
                        .ok_or(LedgerError::ValueOverflow)?;
                    outcome.inputs += 1;
                    touched = true;
                }
            }

            let maturity_height = if source.is_delayed() {
                self.params.payout_maturity(height)
            } else {
                0
            };
            let mut inflow = Currency::ZERO;
            for (vout, output) in tx.outputs.iter().enumerate() {
                if !self.watch.contains(&output.address) {
                    continue;
                }
                txn.apply_output(OutputId::new(txid, vout as u64), output, maturity_height, height)?;
                inflow = inflow
                    .checked_add(output.value)
                    .ok_or(LedgerError::ValueOverflow)?;
                outcome.outputs += 1;
                touched = true;
            }

            if touched {
                debug!(%txid, height, index, %source, %inflow, %outflow, "transaction recorded");
                txn.record_transaction(TxRecord {
                    txid,
                    height,
                    index: index as u64,
                    block_id,
                    timestamp: block.header.timestamp,
                    source,
                    inflow,
                    outflow,
                    transaction: tx.clone(),
                })?;
                outcome.records += 1;
            }
        }

        txn.advance(height, block_id)?;
        Ok(outcome)
    }

    fn stage_revert(
        &self,
        txn: &mut LedgerTxn<'_>,
        height: u64,
        block: &Block,
    ) -> Result<ProcessOutcome, WalletError> {
        let cursor = txn.cursor();
        if cursor.is_empty() {
            return Err(LedgerError::EmptyCursor.into());
        }
        if height != cursor.height {
            return Err(LedgerError::RevertOutOfOrder { tip: cursor.height, got: height }.into());
        }
        let block_id = block.id();
        if block_id != cursor.block_id {
            return Err(LedgerError::TipMismatch { tip: cursor.block_id, got: block_id }.into());
        }

        let mut outcome = ProcessOutcome::new(EventKind::Revert, height, block_id);

        // Driven by what the ledger holds, not by the watch set, which may
        // differ from the one in force when the block was applied.
        for (index, tx) in block.transactions.iter().enumerate().rev() {
            let txid = tx.txid()?;

            for vout in (0..tx.outputs.len() as u64).rev() {
                let id = OutputId::new(txid, vout);
                match txn.get_output(&id)? {
                    Some(entry) if entry.defining_height == height => {}
                    _ => continue,
                }
                txn.revert_output(id)?;
                outcome.outputs += 1;
            }

            if block.is_subsidy(index) {
                continue;
            }
            for input in tx.inputs.iter().rev() {
                let id = input.previous_output;
                if txn.get_output(&id)?.is_none() {
                    continue;
                }
                txn.revert_input(id)?;
                outcome.inputs += 1;
            }
        }

        outcome.records = txn.remove_transactions_for_block(height)?;
        txn.retreat()?;
        Ok(outcome)
    }
}
