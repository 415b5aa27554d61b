//! Ledger node: RocksDB store, wallet read handle, and the feed task.

use std::sync::Arc;

use tally_core::error::StoreError;
use tally_core::events::ChainUpdate;
use tally_core::traits::ConsensusView;
use tally_core::types::Address;
use tally_wallet::{Wallet, WalletError, WatchSet};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::NodeConfig;
use crate::feed::{spawn_feed, FeedSummary};
use crate::storage::RocksStore;

/// Errors surfaced at the node boundary.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error(transparent)]
    Wallet(#[from] WalletError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("config: {0}")]
    Config(#[from] config::ConfigError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid update on line {line}: {source}")]
    InvalidUpdate {
        line: usize,
        source: serde_json::Error,
    },
    #[error("chain feed is closed")]
    FeedClosed,
    #[error("feed task failed: {0}")]
    Join(String),
    #[error(
        "watch set differs from the one this ledger was built with \
         ({stored} stored, {requested} requested)"
    )]
    WatchSetChanged {
        stored: usize,
        requested: usize,
    },
}

/// Record the watch set on a ledger that has none yet, or check it against
/// the recorded one.
pub fn bind_watch_set(store: &RocksStore, watch: &WatchSet) -> Result<(), NodeError> {
    let requested: Vec<Address> = watch.iter().copied().collect();
    match store.watch_addresses()? {
        None => Ok(store.set_watch_addresses(&requested)?),
        Some(stored) if stored == requested => Ok(()),
        Some(stored) => Err(NodeError::WatchSetChanged {
            stored: stored.len(),
            requested: requested.len(),
        }),
    }
}

/// A running ledger node.
///
/// Owns the update channel and the feed task; hands out cloneable
/// [`Wallet`] read handles.
pub struct Node {
    config: NodeConfig,
    wallet: Wallet<RocksStore>,
    updates: mpsc::Sender<ChainUpdate>,
    shutdown: watch::Sender<bool>,
    feed: JoinHandle<Result<FeedSummary, WalletError>>,
}

impl Node {
    /// Open the ledger at `config.db_path()` and start the feed task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: NodeConfig) -> Result<Self, NodeError> {
        Self::start_with_consensus(config, None)
    }

    /// Like [`Node::start`], refusing blocks above the consensus tip.
    pub fn start_with_consensus(
        config: NodeConfig,
        consensus: Option<Arc<dyn ConsensusView>>,
    ) -> Result<Self, NodeError> {
        let watch_set = config.watch_set()?;
        std::fs::create_dir_all(config.network_dir())?;
        let store = RocksStore::open(config.db_path())?;
        bind_watch_set(&store, &watch_set)?;

        let (wallet, mut processor) = Wallet::open(store, config.chain_params(), watch_set);
        if let Some(consensus) = consensus {
            processor = processor.with_consensus(consensus);
        }

        let tip = wallet.tip()?;
        info!(
            network = %config.network,
            tip_height = tip.height,
            tip_id = %tip.block_id,
            watched = wallet.addresses().len(),
            "ledger opened"
        );

        let (updates, rx) = mpsc::channel(config.feed_capacity.max(1));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let feed = spawn_feed(processor, rx, shutdown_rx, config.feed_policy());

        Ok(Self {
            config,
            wallet,
            updates,
            shutdown,
            feed,
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Read handle to the ledger.
    pub fn wallet(&self) -> &Wallet<RocksStore> {
        &self.wallet
    }

    /// Queue an update for the feed task. Waits while the channel is full.
    pub async fn submit(&self, update: ChainUpdate) -> Result<(), NodeError> {
        self.updates
            .send(update)
            .await
            .map_err(|_| NodeError::FeedClosed)
    }

    /// Close the channel, let the feed drain what is queued, then flush.
    pub async fn finish(self) -> Result<FeedSummary, NodeError> {
        let Node { wallet, updates, feed, .. } = self;
        drop(updates);
        Self::join(wallet, feed).await
    }

    /// Stop the feed at the next block boundary, then flush.
    pub async fn shutdown(self) -> Result<FeedSummary, NodeError> {
        let Node { wallet, updates, shutdown, feed, .. } = self;
        // The feed may already have stopped, closing the receiver.
        let _ = shutdown.send(true);
        drop(updates);
        Self::join(wallet, feed).await
    }

    async fn join(
        wallet: Wallet<RocksStore>,
        feed: JoinHandle<Result<FeedSummary, WalletError>>,
    ) -> Result<FeedSummary, NodeError> {
        let summary = feed.await.map_err(|e| NodeError::Join(e.to_string()))??;
        wallet.with_store(|store| store.flush())?;
        info!(applied = summary.applied, reverted = summary.reverted, "node stopped");
        Ok(summary)
    }
}
