//! Chain events delivered by the consensus layer.
//!
//! A [`ChainUpdate`] is a batch of events: zero or more reverts walking the
//! tip backwards, followed by zero or more applies walking it forwards. A
//! reorganization is one update with both.

use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::types::{Block, Hash256};

/// A single block-level change to the best chain.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChainEvent {
    /// `block` was connected at `height`.
    Apply { height: u64, block: Block },
    /// `block`, previously connected at `height`, was disconnected.
    Revert { height: u64, block: Block },
}

impl ChainEvent {
    pub fn height(&self) -> u64 {
        match self {
            Self::Apply { height, .. } | Self::Revert { height, .. } => *height,
        }
    }

    pub fn block(&self) -> &Block {
        match self {
            Self::Apply { block, .. } | Self::Revert { block, .. } => block,
        }
    }

    pub fn is_revert(&self) -> bool {
        matches!(self, Self::Revert { .. })
    }

    /// ID of the block this event carries.
    pub fn block_id(&self) -> Hash256 {
        self.block().id()
    }
}

/// An ordered batch of chain events.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ChainUpdate {
    pub events: Vec<ChainEvent>,
}

impl ChainUpdate {
    pub fn new(events: Vec<ChainEvent>) -> Self {
        Self { events }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of revert events in the update.
    pub fn revert_count(&self) -> usize {
        self.events.iter().filter(|e| e.is_revert()).count()
    }

    /// Check the shape of the update without touching any ledger state.
    ///
    /// Reverts must precede applies, revert heights must descend by one,
    /// apply heights must ascend by one, and after a revert of height `h`
    /// the first apply must be at `h`.
    pub fn validate(&self) -> Result<(), LedgerError> {
        let mut seen_apply = false;
        let mut last_revert: Option<u64> = None;
        let mut last_apply: Option<u64> = None;

        for event in &self.events {
            match event {
                ChainEvent::Revert { height, .. } => {
                    if seen_apply {
                        return Err(LedgerError::MalformedUpdate(format!(
                            "revert at height {height} follows an apply"
                        )));
                    }
                    if let Some(prev) = last_revert {
                        if prev.checked_sub(1) != Some(*height) {
                            return Err(LedgerError::MalformedUpdate(format!(
                                "revert heights not descending: {prev} then {height}"
                            )));
                        }
                    }
                    last_revert = Some(*height);
                }
                ChainEvent::Apply { height, .. } => {
                    match (last_apply, last_revert) {
                        (Some(prev), _) if prev.checked_add(1) != Some(*height) => {
                            return Err(LedgerError::MalformedUpdate(format!(
                                "apply heights not ascending: {prev} then {height}"
                            )));
                        }
                        (None, Some(reverted)) if reverted != *height => {
                            return Err(LedgerError::MalformedUpdate(format!(
                                "first apply at {height} after reverting to {reverted}"
                            )));
                        }
                        _ => {}
                    }
                    seen_apply = true;
                    last_apply = Some(*height);
                }
            }
        }
        Ok(())
    }
}
