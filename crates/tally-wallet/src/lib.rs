//! # tally-wallet: reorg-safe wallet ledger.
//!
//! Maintains the spendable balance and transaction history of a set of
//! watched addresses from an ordered stream of apply/revert chain events.
//! Every block is one all-or-nothing unit: the output ledger, the
//! transaction index, and the chain cursor move together or not at all.
//!
//! # Modules
//!
//! - [`error`]: `WalletError` enum
//! - [`store`]: `LedgerStore` trait, `LedgerBatch`, in-memory store
//! - [`txn`]: Scoped per-block `LedgerTxn` staging overlay
//! - [`outputs`]: Output ledger with maturity tracking
//! - [`history`]: Transaction index with stable pagination
//! - [`cursor`]: Chain cursor
//! - [`balance`]: Balance calculator
//! - [`processor`]: Chain event processor (apply, revert, reorg)
//! - [`wallet`]: Read handles and the watch set

pub mod balance;
pub mod cursor;
pub mod error;
pub mod history;
pub mod outputs;
pub mod processor;
pub mod store;
pub mod txn;
pub mod wallet;

#[cfg(test)]
pub(crate) mod testutil;

// Re-exports for convenient access
pub use balance::Balance;
pub use cursor::ChainCursor;
pub use error::WalletError;
pub use history::{PageRequest, RecordKey, TransactionIndex, TxRecord};
pub use outputs::{OutputEntry, OutputLedger, UnspentMature};
pub use processor::{ChainEventProcessor, EventKind, ProcessOutcome};
pub use store::{BatchOp, LedgerBatch, LedgerSnapshot, LedgerStore, MemoryLedgerStore};
pub use txn::LedgerTxn;
pub use wallet::{LedgerView, SyncStatus, Wallet, WatchSet};
