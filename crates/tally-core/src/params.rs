//! Network parameters. All monetary values in the smallest unit
//! (1 coin = 10^24 units).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::Currency;

pub const COIN: Currency = Currency::new(1_000_000_000_000_000_000_000_000);

/// Blocks a miner or contract payout waits before it becomes spendable.
pub const MAINNET_MATURITY_DELAY: u64 = 144;

/// Regtest keeps the delay short so local chains mature quickly.
pub const REGTEST_MATURITY_DELAY: u64 = 6;

/// Network type: Mainnet, Testnet, or Regtest.
///
/// Controls the data directory suffix and the default maturity delay.
///
/// # Examples
///
/// ```
/// use tally_core::params::NetworkType;
/// let net = NetworkType::default();
/// assert_eq!(net, NetworkType::Mainnet);
/// assert_eq!(net.data_dir_suffix(), "mainnet");
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    /// Production network.
    #[default]
    Mainnet,
    /// Public test network.
    Testnet,
    /// Local regression-test network.
    Regtest,
}

impl NetworkType {
    /// Subdirectory appended to the base data directory.
    ///
    /// # Examples
    ///
    /// ```
    /// use tally_core::params::NetworkType;
    /// assert_eq!(NetworkType::Testnet.data_dir_suffix(), "testnet");
    /// assert_eq!(NetworkType::Regtest.data_dir_suffix(), "regtest");
    /// ```
    pub fn data_dir_suffix(&self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Regtest => "regtest",
        }
    }

    pub fn default_maturity_delay(&self) -> u64 {
        match self {
            Self::Mainnet | Self::Testnet => MAINNET_MATURITY_DELAY,
            Self::Regtest => REGTEST_MATURITY_DELAY,
        }
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.data_dir_suffix())
    }
}

impl FromStr for NetworkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Self::Mainnet),
            "testnet" => Ok(Self::Testnet),
            "regtest" => Ok(Self::Regtest),
            other => Err(format!("unknown network: {other}")),
        }
    }
}

/// Parameters the ledger needs from consensus.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainParams {
    pub network: NetworkType,
    /// Payout maturity delay in blocks.
    pub maturity_delay: u64,
}

impl ChainParams {
    pub fn for_network(network: NetworkType) -> Self {
        Self {
            network,
            maturity_delay: network.default_maturity_delay(),
        }
    }

    pub fn with_maturity_delay(mut self, delay: u64) -> Self {
        self.maturity_delay = delay;
        self
    }

    /// Height at which a delayed payout created at `height` becomes spendable.
    pub fn payout_maturity(&self, height: u64) -> u64 {
        height.saturating_add(self.maturity_delay)
    }
}

impl Default for ChainParams {
    fn default() -> Self {
        Self::for_network(NetworkType::Mainnet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets() {
        assert_eq!(ChainParams::for_network(NetworkType::Mainnet).maturity_delay, 144);
        assert_eq!(ChainParams::for_network(NetworkType::Testnet).maturity_delay, 144);
        assert_eq!(ChainParams::for_network(NetworkType::Regtest).maturity_delay, 6);
    }

    #[test]
    fn override_delay() {
        let params = ChainParams::for_network(NetworkType::Regtest).with_maturity_delay(10);
        assert_eq!(params.maturity_delay, 10);
        assert_eq!(params.payout_maturity(5), 15);
        assert_eq!(params.payout_maturity(u64::MAX), u64::MAX);
    }

    #[test]
    fn network_parse() {
        assert_eq!("Regtest".parse::<NetworkType>().unwrap(), NetworkType::Regtest);
        assert!("devnet".parse::<NetworkType>().is_err());
    }

    #[test]
    fn coin_scale() {
        assert_eq!(COIN.0, 10u128.pow(24));
    }
}
