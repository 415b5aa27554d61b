//! # tally-node: persistent ledger node: RocksDB, configuration, event feed.
//!
//! Composes the ledger into a running service:
//! - [`storage::RocksStore`]: persistent `LedgerStore` backed by RocksDB
//! - [`feed`]: async consumer of chain updates with retry and shutdown
//! - [`node::Node`]: wires storage, wallet, and feed together
//! - [`config::NodeConfig`]: node configuration

pub mod config;
pub mod feed;
pub mod node;
pub mod storage;

pub use config::NodeConfig;
pub use feed::{spawn_feed, FeedPolicy, FeedSummary};
pub use node::{bind_watch_set, Node, NodeError};
pub use storage::RocksStore;
