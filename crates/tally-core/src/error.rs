//! Error types for the Tally ledger.
use thiserror::Error;

use crate::types::{Hash256, OutputId};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("serialization: {0}")] Serialization(String),
}

/// Violations of the ledger's state machine. Any of these means the event
/// stream disagrees with what the ledger already holds, so processing stops.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("duplicate output: {0}")] DuplicateOutput(OutputId),
    #[error("unknown output: {0}")] UnknownOutput(OutputId),
    #[error("output already spent: {0}")] AlreadySpent(OutputId),
    #[error("output not spent: {0}")] NotSpent(OutputId),
    #[error("duplicate transaction {txid} at height {height}")] DuplicateTransaction { txid: Hash256, height: u64 },
    #[error("non-sequential advance: expected {expected}, got {got}")] NonSequentialAdvance { expected: u64, got: u64 },
    #[error("cursor is empty")] EmptyCursor,
    #[error("parent mismatch: tip {tip}, block parent {parent}")] ParentMismatch { tip: Hash256, parent: Hash256 },
    #[error("tip mismatch: tip {tip}, reverted block {got}")] TipMismatch { tip: Hash256, got: Hash256 },
    #[error("revert out of order: tip {tip}, got {got}")] RevertOutOfOrder { tip: u64, got: u64 },
    #[error("block index missing for height {0}")] MissingBlockIndex(u64),
    #[error("malformed update: {0}")] MalformedUpdate(String),
    #[error("block {height} ahead of consensus tip {consensus}")] AheadOfConsensus { height: u64, consensus: u64 },
    #[error("value overflow")] ValueOverflow,
}

/// Failures of the persistence backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("backend: {0}")] Backend(String),
    #[error("codec: {0}")] Codec(String),
    #[error("corrupt: {0}")] Corrupt(String),
}

/// Rejected read-side arguments. Never changes state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("negative limit: {0}")] NegativeLimit(i64),
    #[error("negative offset: {0}")] NegativeOffset(i64),
    #[error("address not watched: {0}")] UnwatchedAddress(String),
}
