//! Output ledger: watched outputs with maturity and spent tracking.
//!
//! An output is created when its defining block is applied, flagged spent
//! when a later block consumes it, and deleted only when its defining block
//! is reverted. Reverting the spending block clears the flag again.

use serde::{Deserialize, Serialize};
use tally_core::error::LedgerError;
use tally_core::types::{Address, Currency, OutputId, TxOutput};

use crate::error::WalletError;
use crate::store::LedgerStore;
use crate::txn::{LedgerTxn, StagedOutput};

/// A watched output as held by the ledger.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct OutputEntry {
    /// Owning address.
    pub address: Address,
    /// Value in the smallest unit.
    pub value: Currency,
    /// First height at which the output may be spent. Zero for ordinary outputs.
    pub maturity_height: u64,
    /// Whether a later applied block consumed this output.
    pub spent: bool,
    /// Height of the block that created the output.
    pub defining_height: u64,
}

impl OutputEntry {
    /// Check if the output is spendable at the given chain height.
    pub fn is_mature(&self, at_height: u64) -> bool {
        at_height >= self.maturity_height
    }

    /// Contributes to balance at `at_height`.
    pub fn is_spendable(&self, at_height: u64) -> bool {
        !self.spent && self.is_mature(at_height)
    }
}

impl LedgerTxn<'_> {
    /// Insert a new unspent output.
    pub fn apply_output(
        &mut self,
        id: OutputId,
        output: &TxOutput,
        maturity_height: u64,
        defining_height: u64,
    ) -> Result<(), WalletError> {
        if self.get_output(&id)?.is_some() {
            return Err(LedgerError::DuplicateOutput(id).into());
        }
        let entry = OutputEntry {
            address: output.address,
            value: output.value,
            maturity_height,
            spent: false,
            defining_height,
        };
        self.outputs.insert(id, StagedOutput::Put(entry));
        self.output_count += 1;
        Ok(())
    }

    /// Mark an output spent. Returns the spent entry.
    pub fn apply_input(
        &mut self,
        id: OutputId,
        spending_height: u64,
    ) -> Result<OutputEntry, WalletError> {
        let mut entry = self
            .get_output(&id)?
            .ok_or(LedgerError::UnknownOutput(id))?;
        if entry.spent {
            return Err(LedgerError::AlreadySpent(id).into());
        }
        tracing::debug!(output = %id, spending_height, "output spent");
        entry.spent = true;
        self.outputs.insert(id, StagedOutput::Put(entry.clone()));
        Ok(entry)
    }

    /// Delete an output whose defining block is being reverted.
    pub fn revert_output(&mut self, id: OutputId) -> Result<OutputEntry, WalletError> {
        let entry = self
            .get_output(&id)?
            .ok_or(LedgerError::UnknownOutput(id))?;
        self.outputs.insert(id, StagedOutput::Deleted(entry.clone()));
        self.output_count = self.output_count.saturating_sub(1);
        Ok(entry)
    }

    /// Clear the spent flag of an output whose spending block is being
    /// reverted.
    pub fn revert_input(&mut self, id: OutputId) -> Result<OutputEntry, WalletError> {
        let mut entry = self
            .get_output(&id)?
            .ok_or(LedgerError::UnknownOutput(id))?;
        if !entry.spent {
            return Err(LedgerError::NotSpent(id).into());
        }
        entry.spent = false;
        self.outputs.insert(id, StagedOutput::Put(entry.clone()));
        Ok(entry)
    }
}

/// Read view over the committed outputs.
pub struct OutputLedger<'a> {
    store: &'a dyn LedgerStore,
}

impl<'a> OutputLedger<'a> {
    pub fn new(store: &'a dyn LedgerStore) -> Self {
        Self { store }
    }

    pub fn get(&self, id: &OutputId) -> Result<Option<OutputEntry>, WalletError> {
        Ok(self.store.get_output(id)?)
    }

    /// Unspent outputs owned by `address` that are mature at `at_height`.
    ///
    /// The returned iterator filters lazily and can be cloned to restart.
    pub fn unspent_mature(
        &self,
        address: &Address,
        at_height: u64,
    ) -> Result<UnspentMature, WalletError> {
        Ok(UnspentMature {
            entries: self.store.outputs_by_address(address)?.into_iter(),
            at_height,
        })
    }

    /// Unspent outputs owned by `address` that have not matured yet.
    pub fn unspent_immature(
        &self,
        address: &Address,
        at_height: u64,
    ) -> Result<Vec<(OutputId, OutputEntry)>, WalletError> {
        Ok(self
            .store
            .outputs_by_address(address)?
            .into_iter()
            .filter(|(_, entry)| !entry.spent && !entry.is_mature(at_height))
            .collect())
    }
}

/// Iterator returned by [`OutputLedger::unspent_mature`].
#[derive(Debug, Clone)]
pub struct UnspentMature {
    entries: std::vec::IntoIter<(OutputId, OutputEntry)>,
    at_height: u64,
}

impl Iterator for UnspentMature {
    type Item = (OutputId, OutputEntry);

    fn next(&mut self) -> Option<Self::Item> {
        let at_height = self.at_height;
        self.entries
            .by_ref()
            .find(|(_, entry)| entry.is_spendable(at_height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLedgerStore;
    use crate::testutil::addr;
    use tally_core::types::Hash256;

    fn oid(seed: u8, index: u64) -> OutputId {
        OutputId::new(Hash256([seed; 32]), index)
    }

    fn out(seed: u8, value: u128) -> TxOutput {
        TxOutput {
            value: Currency::new(value),
            address: addr(seed),
        }
    }

    fn commit(store: &mut MemoryLedgerStore, f: impl FnOnce(&mut LedgerTxn<'_>)) {
        let mut txn = LedgerTxn::begin(&*store).unwrap();
        f(&mut txn);
        let batch = txn.into_batch();
        store.commit(batch).unwrap();
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    #[test]
    fn apply_output_rejects_duplicates() {
        let mut store = MemoryLedgerStore::new();
        commit(&mut store, |txn| {
            txn.apply_output(oid(1, 0), &out(1, 10), 0, 1).unwrap();
        });
        assert_eq!(store.output_count().unwrap(), 1);

        let mut txn = LedgerTxn::begin(&store).unwrap();
        let err = txn.apply_output(oid(1, 0), &out(1, 10), 0, 2).unwrap_err();
        assert_eq!(err, WalletError::Ledger(LedgerError::DuplicateOutput(oid(1, 0))));
    }

    #[test]
    fn apply_input_errors() {
        let mut store = MemoryLedgerStore::new();
        commit(&mut store, |txn| {
            txn.apply_output(oid(1, 0), &out(1, 10), 0, 1).unwrap();
        });

        let mut txn = LedgerTxn::begin(&store).unwrap();
        assert_eq!(
            txn.apply_input(oid(9, 0), 2).unwrap_err(),
            WalletError::Ledger(LedgerError::UnknownOutput(oid(9, 0)))
        );
        txn.apply_input(oid(1, 0), 2).unwrap();
        assert_eq!(
            txn.apply_input(oid(1, 0), 2).unwrap_err(),
            WalletError::Ledger(LedgerError::AlreadySpent(oid(1, 0)))
        );
    }

    #[test]
    fn revert_input_requires_spent() {
        let mut store = MemoryLedgerStore::new();
        commit(&mut store, |txn| {
            txn.apply_output(oid(1, 0), &out(1, 10), 0, 1).unwrap();
        });

        let mut txn = LedgerTxn::begin(&store).unwrap();
        assert_eq!(
            txn.revert_input(oid(1, 0)).unwrap_err(),
            WalletError::Ledger(LedgerError::NotSpent(oid(1, 0)))
        );
        txn.apply_input(oid(1, 0), 2).unwrap();
        let restored = txn.revert_input(oid(1, 0)).unwrap();
        assert!(!restored.spent);
    }

    #[test]
    fn revert_output_deletes() {
        let mut store = MemoryLedgerStore::new();
        commit(&mut store, |txn| {
            txn.apply_output(oid(1, 0), &out(1, 10), 0, 1).unwrap();
        });
        commit(&mut store, |txn| {
            txn.revert_output(oid(1, 0)).unwrap();
        });
        assert!(store.get_output(&oid(1, 0)).unwrap().is_none());
        assert_eq!(store.output_count().unwrap(), 0);

        let mut txn = LedgerTxn::begin(&store).unwrap();
        assert!(txn.revert_output(oid(1, 0)).is_err());
    }

    // ------------------------------------------------------------------
    // unspent_mature
    // ------------------------------------------------------------------

    #[test]
    fn unspent_mature_filters_and_restarts() {
        let mut store = MemoryLedgerStore::new();
        commit(&mut store, |txn| {
            txn.apply_output(oid(1, 0), &out(1, 10), 0, 1).unwrap();
            txn.apply_output(oid(1, 1), &out(1, 20), 7, 1).unwrap();
            txn.apply_output(oid(1, 2), &out(1, 40), 0, 1).unwrap();
            txn.apply_output(oid(1, 3), &out(2, 80), 0, 1).unwrap();
        });
        commit(&mut store, |txn| {
            txn.apply_input(oid(1, 2), 2).unwrap();
        });

        let ledger = OutputLedger::new(&store);
        let iter = ledger.unspent_mature(&addr(1), 6).unwrap();
        let restart = iter.clone();
        let values: Vec<u128> = iter.map(|(_, e)| e.value.0).collect();
        assert_eq!(values, vec![10]);
        assert_eq!(restart.count(), 1);

        let at_seven: Vec<u128> = ledger
            .unspent_mature(&addr(1), 7)
            .unwrap()
            .map(|(_, e)| e.value.0)
            .collect();
        assert_eq!(at_seven, vec![10, 20]);

        let immature = ledger.unspent_immature(&addr(1), 6).unwrap();
        assert_eq!(immature.len(), 1);
        assert_eq!(immature[0].0, oid(1, 1));
    }

    #[test]
    fn maturity_boundary() {
        let entry = OutputEntry {
            address: addr(1),
            value: Currency::new(1),
            maturity_height: 10,
            spent: false,
            defining_height: 4,
        };
        assert!(!entry.is_mature(9));
        assert!(entry.is_mature(10));
        assert!(entry.is_spendable(11));
    }
}
