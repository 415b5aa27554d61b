//! Node configuration for the Tally ledger node.
//!
//! Provides [`NodeConfig`] with defaults for the data directory, network,
//! watched addresses, logging, and feed behavior. Values are layered: built-in
//! defaults, then an optional TOML file, then `TALLY__*` environment
//! variables. The binary applies command-line flags on top.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tally_core::params::{ChainParams, NetworkType};
use tally_core::types::Address;
use tally_wallet::{WalletError, WatchSet};

use crate::feed::FeedPolicy;

/// Environment variable prefix, e.g. `TALLY__LOG_LEVEL=debug`.
pub const ENV_PREFIX: &str = "TALLY";

/// Configuration for a ledger node instance.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Root directory for all persistent data. The network name is appended.
    pub data_dir: PathBuf,
    /// Network whose parameters apply.
    pub network: NetworkType,
    /// Overrides the network's payout maturity delay.
    pub maturity_delay: Option<u64>,
    /// Watched addresses. The first one is the primary address.
    pub watch_addresses: Vec<Address>,
    /// Log level filter string (e.g. "info", "debug", "tally_wallet=trace").
    pub log_level: String,
    /// Log output format ("text" or "json").
    pub log_format: String,
    /// How many times a failed commit is retried before the feed stops.
    pub commit_retries: u32,
    /// Pause between commit retries, in milliseconds.
    pub retry_delay_ms: u64,
    /// Capacity of the chain update channel.
    pub feed_capacity: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tally");

        Self {
            data_dir,
            network: NetworkType::Mainnet,
            maturity_delay: None,
            watch_addresses: Vec::new(),
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            commit_retries: 3,
            retry_delay_ms: 250,
            feed_capacity: 64,
        }
    }
}

impl NodeConfig {
    /// Load defaults, then `path` if given and present, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("watch_addresses"),
            )
            .build()?
            .try_deserialize()
    }

    /// Directory holding this network's data.
    pub fn network_dir(&self) -> PathBuf {
        self.data_dir.join(self.network.data_dir_suffix())
    }

    /// Path to the RocksDB ledger directory.
    pub fn db_path(&self) -> PathBuf {
        self.network_dir().join("ledger")
    }

    /// Network parameters with the maturity override applied.
    pub fn chain_params(&self) -> ChainParams {
        let params = ChainParams::for_network(self.network);
        match self.maturity_delay {
            Some(delay) => params.with_maturity_delay(delay),
            None => params,
        }
    }

    pub fn watch_set(&self) -> Result<WatchSet, WalletError> {
        WatchSet::new(self.watch_addresses.iter().copied())
    }

    pub fn feed_policy(&self) -> FeedPolicy {
        FeedPolicy {
            commit_retries: self.commit_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}
