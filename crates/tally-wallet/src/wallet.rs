//! Read handles over the ledger and the watch set.
//!
//! [`Wallet::open`] splits a store into a cloneable read handle and the
//! single [`ChainEventProcessor`] allowed to write to it. Every read takes
//! the shared lock once, so it sees exactly one committed block boundary.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tally_core::error::QueryError;
use tally_core::params::ChainParams;
use tally_core::traits::ConsensusView;
use tally_core::types::{Address, OutputId};

use crate::balance::Balance;
use crate::cursor::ChainCursor;
use crate::error::WalletError;
use crate::history::{PageRequest, TransactionIndex, TxRecord};
use crate::outputs::{OutputEntry, OutputLedger};
use crate::processor::ChainEventProcessor;
use crate::store::LedgerStore;

/// The addresses whose outputs the ledger tracks.
///
/// Fixed for the lifetime of a ledger: reverting a block only removes
/// outputs that were watched when it was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSet {
    primary: Address,
    addresses: BTreeSet<Address>,
}

impl WatchSet {
    /// Build from a list of addresses. The first one is the primary address.
    pub fn new(addresses: impl IntoIterator<Item = Address>) -> Result<Self, WalletError> {
        let mut iter = addresses.into_iter();
        let primary = iter.next().ok_or(WalletError::EmptyWatchSet)?;
        let mut set: BTreeSet<Address> = iter.collect();
        set.insert(primary);
        Ok(Self {
            primary,
            addresses: set,
        })
    }

    pub fn single(address: Address) -> Self {
        Self {
            primary: address,
            addresses: BTreeSet::from([address]),
        }
    }

    pub fn primary(&self) -> Address {
        self.primary
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.addresses.contains(address)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Address> {
        self.addresses.iter()
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

/// How far the ledger is behind the consensus tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub ledger_height: u64,
    pub consensus_height: u64,
}

impl SyncStatus {
    pub fn is_synced(&self) -> bool {
        self.ledger_height >= self.consensus_height
    }

    pub fn blocks_behind(&self) -> u64 {
        self.consensus_height.saturating_sub(self.ledger_height)
    }
}

/// A consistent read of the committed ledger. Borrowed from
/// [`Wallet::with_view`].
pub struct LedgerView<'a> {
    store: &'a dyn LedgerStore,
    watch: &'a WatchSet,
}

impl<'a> LedgerView<'a> {
    pub fn cursor(&self) -> Result<ChainCursor, WalletError> {
        Ok(self.store.cursor()?)
    }

    pub fn outputs(&self) -> OutputLedger<'a> {
        OutputLedger::new(self.store)
    }

    pub fn index(&self) -> TransactionIndex<'a> {
        TransactionIndex::new(self.store)
    }

    pub fn balance(&self, address: &Address) -> Result<Balance, WalletError> {
        self.ensure_watched(address)?;
        Balance::compute(self.store, address)
    }

    /// Spendable outputs of `address` at the cursor height.
    pub fn unspent_outputs(
        &self,
        address: &Address,
    ) -> Result<Vec<(OutputId, OutputEntry)>, WalletError> {
        self.ensure_watched(address)?;
        let height = self.store.cursor()?.height;
        Ok(self.outputs().unspent_mature(address, height)?.collect())
    }

    fn ensure_watched(&self, address: &Address) -> Result<(), WalletError> {
        if !self.watch.contains(address) {
            return Err(QueryError::UnwatchedAddress(address.to_string()).into());
        }
        Ok(())
    }
}

/// Cloneable read-only handle to a ledger.
pub struct Wallet<S> {
    store: Arc<RwLock<S>>,
    params: ChainParams,
    watch: Arc<WatchSet>,
}

impl<S> Clone for Wallet<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            params: self.params,
            watch: Arc::clone(&self.watch),
        }
    }
}

impl<S: LedgerStore> Wallet<S> {
    /// Take ownership of `store` and return the read handle together with
    /// the only processor that may write to it.
    pub fn open(store: S, params: ChainParams, watch: WatchSet) -> (Self, ChainEventProcessor<S>) {
        let store = Arc::new(RwLock::new(store));
        let watch = Arc::new(watch);
        let processor = ChainEventProcessor::new(Arc::clone(&store), params, Arc::clone(&watch));
        let wallet = Self {
            store,
            params,
            watch,
        };
        (wallet, processor)
    }

    /// Primary watched address.
    pub fn address(&self) -> Address {
        self.watch.primary()
    }

    /// Every watched address.
    pub fn addresses(&self) -> Vec<Address> {
        self.watch.iter().copied().collect()
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    /// Run `f` against one committed state of the ledger.
    pub fn with_view<R>(&self, f: impl FnOnce(&LedgerView<'_>) -> R) -> R {
        let guard = self.store.read();
        let view = LedgerView {
            store: &*guard,
            watch: &self.watch,
        };
        f(&view)
    }

    /// Direct read access to the store.
    pub fn with_store<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.store.read())
    }

    /// Balance of a watched address, with the height it was computed at.
    pub fn balance(&self, address: &Address) -> Result<Balance, WalletError> {
        self.with_view(|view| view.balance(address))
    }

    pub fn transaction_count(&self) -> Result<u64, WalletError> {
        self.with_view(|view| view.index().count())
    }

    /// Records most recent first. Negative arguments are rejected.
    pub fn transactions(&self, limit: i64, offset: i64) -> Result<Vec<TxRecord>, WalletError> {
        self.transactions_page(PageRequest::from_signed(limit, offset)?)
    }

    pub fn transactions_page(&self, request: PageRequest) -> Result<Vec<TxRecord>, WalletError> {
        self.with_view(|view| view.index().page(request))
    }

    /// Records confirmed in the block at `height`.
    pub fn records_at_height(&self, height: u64) -> Result<Vec<TxRecord>, WalletError> {
        self.with_view(|view| view.index().at_height(height))
    }

    pub fn unspent_outputs(
        &self,
        address: &Address,
    ) -> Result<Vec<(OutputId, OutputEntry)>, WalletError> {
        self.with_view(|view| view.unspent_outputs(address))
    }

    /// Last applied block.
    pub fn tip(&self) -> Result<ChainCursor, WalletError> {
        self.with_view(|view| view.cursor())
    }

    pub fn sync_status(&self, consensus: &dyn ConsensusView) -> Result<SyncStatus, WalletError> {
        Ok(SyncStatus {
            ledger_height: self.tip()?.height,
            consensus_height: consensus.tip_height(),
        })
    }
}
