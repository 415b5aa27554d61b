//! Chain cursor: the last block the ledger has applied.

use std::fmt;

use serde::{Deserialize, Serialize};
use tally_core::error::LedgerError;
use tally_core::types::Hash256;

use crate::error::WalletError;
use crate::txn::LedgerTxn;

/// Height and id of the most recently applied block.
///
/// Height zero with the zero id means nothing has been applied yet. Wallet
/// blocks start at height one.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct ChainCursor {
    pub height: u64,
    pub block_id: Hash256,
}

impl ChainCursor {
    pub fn new(height: u64, block_id: Hash256) -> Self {
        Self { height, block_id }
    }

    pub fn is_empty(&self) -> bool {
        self.height == 0
    }
}

impl fmt::Display for ChainCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.block_id, self.height)
    }
}

impl LedgerTxn<'_> {
    /// Move the cursor exactly one block forward and index the block id.
    pub fn advance(&mut self, height: u64, block_id: Hash256) -> Result<(), WalletError> {
        let expected = self.cursor.height + 1;
        if height != expected {
            return Err(LedgerError::NonSequentialAdvance { expected, got: height }.into());
        }
        self.block_index.insert(height, Some(block_id));
        self.cursor = ChainCursor::new(height, block_id);
        Ok(())
    }

    /// Move the cursor exactly one block back. Returns the new cursor.
    pub fn retreat(&mut self) -> Result<ChainCursor, WalletError> {
        let height = self.cursor.height;
        if height == 0 {
            return Err(LedgerError::EmptyCursor.into());
        }
        let parent = height - 1;
        let parent_id = if parent == 0 {
            Hash256::ZERO
        } else {
            self.block_id_at(parent)?
                .ok_or(LedgerError::MissingBlockIndex(parent))?
        };
        self.block_index.insert(height, None);
        self.cursor = ChainCursor::new(parent, parent_id);
        Ok(self.cursor)
    }
}
