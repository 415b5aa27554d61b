//! Async chain update feed.
//!
//! A single task owns the [`ChainEventProcessor`] and consumes updates from
//! a bounded channel in arrival order. Shutdown is honored only between
//! blocks. A failed commit leaves the ledger untouched, so the same block is
//! retried a bounded number of times. Desynchronization stops the task.
//!
//! Block commits run on the blocking pool: they wait on disk writes and on
//! readers draining from the store lock.

use std::io::BufRead;
use std::time::Duration;

use serde::Serialize;
use tally_core::events::{ChainEvent, ChainUpdate};
use tally_wallet::{ChainEventProcessor, EventKind, LedgerStore, ProcessOutcome, WalletError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::node::NodeError;

/// Retry behavior for failed commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedPolicy {
    pub commit_retries: u32,
    pub retry_delay: Duration,
}

impl Default for FeedPolicy {
    fn default() -> Self {
        Self {
            commit_retries: 3,
            retry_delay: Duration::from_millis(250),
        }
    }
}

/// What a feed task did before it stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeedSummary {
    pub updates: u64,
    pub applied: u64,
    pub reverted: u64,
    pub retries: u64,
    /// True if the task stopped on a shutdown signal rather than a closed channel.
    pub interrupted: bool,
}

/// Processor and event handed back from the blocking pool with the result.
type Processed<S> = (ChainEventProcessor<S>, ChainEvent, Result<ProcessOutcome, WalletError>);

async fn process_blocking<S: LedgerStore + 'static>(
    mut processor: ChainEventProcessor<S>,
    event: ChainEvent,
) -> Result<Processed<S>, WalletError> {
    tokio::task::spawn_blocking(move || {
        let result = processor.process_event(&event);
        (processor, event, result)
    })
    .await
    .map_err(|e| WalletError::Halted(format!("block processing task failed: {e}")))
}

/// Consume `updates` until the channel closes or `shutdown` flips to true.
pub async fn run_feed<S: LedgerStore + 'static>(
    mut processor: ChainEventProcessor<S>,
    mut updates: mpsc::Receiver<ChainUpdate>,
    mut shutdown: watch::Receiver<bool>,
    policy: FeedPolicy,
) -> Result<FeedSummary, WalletError> {
    let mut summary = FeedSummary::default();

    loop {
        if *shutdown.borrow() {
            summary.interrupted = true;
            break;
        }
        let update = tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() {
                    // Sender gone: nobody can ask for shutdown any more.
                    match updates.recv().await {
                        Some(update) => update,
                        None => break,
                    }
                } else {
                    continue;
                }
            }
            next = updates.recv() => match next {
                Some(update) => update,
                None => break,
            },
        };

        if let Err(e) = update.validate() {
            error!(error = %e, "rejecting malformed chain update");
            return Err(e.into());
        }
        summary.updates += 1;
        debug!(events = update.events.len(), reverts = update.revert_count(), "chain update received");

        for mut event in update.events {
            if *shutdown.borrow() {
                info!(height = event.height(), "shutdown requested, stopping between blocks");
                summary.interrupted = true;
                return Ok(summary);
            }

            let mut attempt = 0u32;
            let outcome = loop {
                let (returned, retained, result) = process_blocking(processor, event).await?;
                processor = returned;
                event = retained;
                match result {
                    Ok(outcome) => break outcome,
                    Err(e) if e.is_retryable() && attempt < policy.commit_retries => {
                        attempt += 1;
                        summary.retries += 1;
                        warn!(
                            height = event.height(),
                            block_id = %event.block_id(),
                            attempt,
                            error = %e,
                            "commit failed, retrying block"
                        );
                        tokio::time::sleep(policy.retry_delay).await;
                    }
                    Err(e) => {
                        error!(
                            height = event.height(),
                            block_id = %event.block_id(),
                            error = %e,
                            "chain feed stopped"
                        );
                        return Err(e);
                    }
                }
            };
            match outcome.kind {
                EventKind::Apply => summary.applied += 1,
                EventKind::Revert => summary.reverted += 1,
            }
        }
    }

    info!(
        updates = summary.updates,
        applied = summary.applied,
        reverted = summary.reverted,
        "chain feed finished"
    );
    Ok(summary)
}

/// Spawn [`run_feed`] on the current tokio runtime.
pub fn spawn_feed<S: LedgerStore + 'static>(
    processor: ChainEventProcessor<S>,
    updates: mpsc::Receiver<ChainUpdate>,
    shutdown: watch::Receiver<bool>,
    policy: FeedPolicy,
) -> JoinHandle<Result<FeedSummary, WalletError>> {
    tokio::spawn(run_feed(processor, updates, shutdown, policy))
}

/// Read chain updates stored one JSON object per line. Blank lines are skipped.
pub fn read_updates(reader: impl BufRead) -> Result<Vec<ChainUpdate>, NodeError> {
    let mut updates = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let update = serde_json::from_str(&line).map_err(|source| NodeError::InvalidUpdate {
            line: number + 1,
            source,
        })?;
        updates.push(update);
    }
    Ok(updates)
}
