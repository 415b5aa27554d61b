//! Integration test suite for the Tally ledger.
//!
//! The tests drive the wallet ledger through realistic chains: payouts that
//! mature, self-splits, busy blocks, reorgs back to genesis, and simulated
//! persistence failures. Shared fixtures live in [`helpers`].

pub mod helpers;
