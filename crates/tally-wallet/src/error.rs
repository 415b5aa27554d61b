//! Wallet error types.

use tally_core::error::{LedgerError, QueryError, StoreError, TransactionError};
use thiserror::Error;

/// Errors that can occur while maintaining or querying the ledger.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// The event stream disagrees with the ledger.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The persistence backend failed. The block's changes were not applied.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A query argument was rejected.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// A transaction could not be encoded for hashing.
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// The processor stopped after an earlier fatal error.
    #[error("processor halted: {0}")]
    Halted(String),

    /// A wallet needs at least one watched address.
    #[error("watch set is empty")]
    EmptyWatchSet,
}

impl WalletError {
    /// Fatal errors stop the processing loop for good.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Ledger(_) | Self::Transaction(_) | Self::Halted(_))
    }

    /// Persistence failures leave the ledger untouched, so the same block
    /// may be offered again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(StoreError::Backend(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let desync: WalletError = LedgerError::EmptyCursor.into();
        assert!(desync.is_fatal());
        assert!(!desync.is_retryable());

        let io: WalletError = StoreError::Backend("disk full".into()).into();
        assert!(!io.is_fatal());
        assert!(io.is_retryable());

        let corrupt: WalletError = StoreError::Corrupt("bad key".into()).into();
        assert!(!corrupt.is_retryable());

        let query: WalletError = QueryError::NegativeOffset(-3).into();
        assert!(!query.is_fatal());
        assert!(!query.is_retryable());
    }

    #[test]
    fn transparent_display() {
        let err: WalletError = LedgerError::EmptyCursor.into();
        assert_eq!(err.to_string(), "cursor is empty");
    }
}
