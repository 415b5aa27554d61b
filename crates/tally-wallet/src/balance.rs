//! Balance calculator: read-side aggregation over the output ledger.

use serde::{Deserialize, Serialize};
use tally_core::error::LedgerError;
use tally_core::types::{Address, Currency};

use crate::error::WalletError;
use crate::outputs::OutputLedger;
use crate::store::LedgerStore;

/// Balance of one address at one cursor height.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Balance {
    /// Cursor height used for the maturity filter.
    pub height: u64,
    /// Sum of unspent, mature outputs.
    pub amount: Currency,
    /// Sum of unspent outputs still waiting for maturity.
    pub immature: Currency,
    /// Number of outputs counted in `amount`.
    pub outputs: usize,
}

impl Balance {
    /// Compute from one consistent view of the store. The height is read
    /// first and every output is judged against it.
    pub fn compute(store: &dyn LedgerStore, address: &Address) -> Result<Self, WalletError> {
        let height = store.cursor()?.height;
        let ledger = OutputLedger::new(store);

        let mature: Vec<Currency> = ledger
            .unspent_mature(address, height)?
            .map(|(_, entry)| entry.value)
            .collect();
        let immature = ledger
            .unspent_immature(address, height)?
            .into_iter()
            .map(|(_, entry)| entry.value);

        Ok(Balance {
            height,
            outputs: mature.len(),
            amount: Currency::checked_sum(mature).ok_or(LedgerError::ValueOverflow)?,
            immature: Currency::checked_sum(immature).ok_or(LedgerError::ValueOverflow)?,
        })
    }
}
