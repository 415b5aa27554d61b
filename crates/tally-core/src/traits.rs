//! Trait interfaces between the ledger and its surroundings.

/// Read-only view of the consensus layer's best chain.
///
/// The processor consults it to refuse blocks the consensus layer has not
/// reached yet, and the wallet uses it to report sync progress.
pub trait ConsensusView: Send + Sync {
    /// Height of the consensus best tip.
    fn tip_height(&self) -> u64;
}

/// A fixed consensus height. Handy for offline replays and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedConsensus(pub u64);

impl ConsensusView for FixedConsensus {
    fn tip_height(&self) -> u64 {
        self.0
    }
}
