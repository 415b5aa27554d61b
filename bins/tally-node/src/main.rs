//! Tally ledger node binary.
//!
//! Replays chain updates into the RocksDB-backed wallet ledger and answers
//! balance, history, and tip queries against it.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tally_core::params::{NetworkType, COIN};
use tally_core::types::{Address, Currency};
use tally_node_lib::feed::read_updates;
use tally_node_lib::{bind_watch_set, Node, NodeConfig, RocksStore};
use tally_wallet::{TxRecord, Wallet};
use tracing::{info, warn};

/// Tally ledger node.
#[derive(Parser, Debug)]
#[command(
    name = "tally-node",
    version,
    about = "Reorg-safe wallet ledger over a stream of chain events"
)]
struct Args {
    /// Configuration file (TOML). Missing files are ignored.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory for ledger storage
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Use testnet parameters and data directory.
    #[arg(long, global = true, conflicts_with = "regtest")]
    testnet: bool,

    /// Use regtest parameters and data directory.
    #[arg(long, global = true, conflicts_with = "testnet")]
    regtest: bool,

    /// Watched addresses (comma-separated hex). The first is the primary.
    #[arg(long, global = true, value_delimiter = ',')]
    watch: Vec<Address>,

    /// Override the payout maturity delay, in blocks.
    #[arg(long, global = true)]
    maturity_delay: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log output format ("text" or "json")
    #[arg(long, global = true)]
    log_format: Option<String>,

    /// Print query results as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply chain updates read one JSON object per line ("-" for stdin).
    Replay {
        #[arg(long)]
        events: PathBuf,
    },
    /// Show the balance of a watched address.
    Balance {
        /// Defaults to the primary watched address.
        #[arg(long)]
        address: Option<Address>,
    },
    /// List transactions, most recent first.
    Transactions {
        #[arg(long, default_value_t = 20, allow_negative_numbers = true)]
        limit: i64,
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        offset: i64,
    },
    /// Show the last applied block.
    Tip,
}

impl Args {
    /// Layer command-line flags over the file and environment configuration.
    fn into_config(self) -> Result<(NodeConfig, Command, bool)> {
        let mut config = NodeConfig::load(self.config.as_deref())
            .context("failed to load configuration")?;

        if self.regtest {
            config.network = NetworkType::Regtest;
        } else if self.testnet {
            config.network = NetworkType::Testnet;
        }
        if let Some(data_dir) = self.data_dir {
            config.data_dir = data_dir;
        }
        if !self.watch.is_empty() {
            config.watch_addresses = self.watch;
        }
        if self.maturity_delay.is_some() {
            config.maturity_delay = self.maturity_delay;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }

        Ok((config, self.command, self.json))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let (config, command, json) = Args::parse().into_config()?;
    init_logging(&config.log_level, &config.log_format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        network = %config.network,
        data_dir = %config.data_dir.display(),
        "tally node"
    );

    match command {
        Command::Replay { events } => replay(config, &events, json).await,
        Command::Balance { address } => {
            let wallet = open_wallet(&config)?;
            let address = address.unwrap_or_else(|| wallet.address());
            let balance = wallet.balance(&address)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&balance)?);
            } else {
                println!("Address:   {address}");
                println!("Height:    {}", balance.height);
                println!("Spendable: {} TLY", format_coins(balance.amount));
                println!("Immature:  {} TLY", format_coins(balance.immature));
                println!("Outputs:   {}", balance.outputs);
            }
            Ok(())
        }
        Command::Transactions { limit, offset } => {
            let wallet = open_wallet(&config)?;
            let records = wallet.transactions(limit, offset)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                println!("{} of {} transactions", records.len(), wallet.transaction_count()?);
                for record in &records {
                    print_record(record);
                }
            }
            Ok(())
        }
        Command::Tip => {
            let wallet = open_wallet(&config)?;
            let tip = wallet.tip()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tip)?);
            } else if tip.is_empty() {
                println!("No blocks applied");
            } else {
                println!("Height: {}", tip.height);
                println!("Block:  {}", tip.block_id);
            }
            Ok(())
        }
    }
}

async fn replay(config: NodeConfig, events: &Path, json: bool) -> Result<()> {
    let updates = if events == Path::new("-") {
        read_updates(std::io::stdin().lock())
    } else {
        let file = File::open(events)
            .with_context(|| format!("failed to open {}", events.display()))?;
        read_updates(BufReader::new(file))
    }
    .context("failed to read chain updates")?;

    let node = Node::start(config).context("failed to start node")?;
    info!(updates = updates.len(), "replaying chain updates");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;
    for update in updates {
        tokio::select! {
            sent = node.submit(update) => {
                // A closed feed reports its error from finish().
                if sent.is_err() {
                    break;
                }
            }
            _ = &mut ctrl_c => {
                warn!("received Ctrl+C, stopping at the next block boundary");
                interrupted = true;
                break;
            }
        }
    }

    let summary = if interrupted {
        node.shutdown().await
    } else {
        node.finish().await
    }
    .context("chain feed failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "Applied {} blocks, reverted {} blocks across {} updates ({} retries){}",
            summary.applied,
            summary.reverted,
            summary.updates,
            summary.retries,
            if summary.interrupted { ", interrupted" } else { "" }
        );
    }
    Ok(())
}

/// Open the ledger for reading. Queries never create a database.
fn open_wallet(config: &NodeConfig) -> Result<Wallet<RocksStore>> {
    let path = config.db_path();
    if !path.exists() {
        bail!("no ledger at {}; run `tally-node replay` first", path.display());
    }
    let watch = config.watch_set().context("no watched addresses configured")?;
    let store = RocksStore::open(&path)
        .with_context(|| format!("failed to open ledger at {}", path.display()))?;
    bind_watch_set(&store, &watch)?;
    let (wallet, _processor) = Wallet::open(store, config.chain_params(), watch);
    Ok(wallet)
}

fn print_record(record: &TxRecord) {
    let when = i64::try_from(record.timestamp)
        .ok()
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| record.timestamp.to_string());
    println!(
        "{:>8}:{:<4} {}  {:<11} +{} -{}  {}",
        record.height,
        record.index,
        when,
        record.source,
        format_coins(record.inflow),
        format_coins(record.outflow),
        record.txid,
    );
}

/// Base units as whole coins with trailing zeros trimmed.
fn format_coins(amount: Currency) -> String {
    let whole = amount.0 / COIN.0;
    let frac = amount.0 % COIN.0;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{frac:024}");
    format!("{whole}.{}", frac.trim_end_matches('0'))
}

/// Initialize tracing subscriber with the given log level and output format.
///
/// Logs go to stderr so query output on stdout stays machine readable.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn network_flags_conflict() {
        assert!(Args::try_parse_from(["tally-node", "--regtest", "--testnet", "tip"]).is_err());
    }

    #[test]
    fn negative_limit_parses_and_is_rejected_later() {
        let args =
            Args::try_parse_from(["tally-node", "transactions", "--limit", "-1"]).unwrap();
        assert!(matches!(args.command, Command::Transactions { limit: -1, offset: 0 }));
    }

    #[test]
    fn flags_override_config() {
        let a = "ab".repeat(32);
        let b = "cd".repeat(32);
        let watch = format!("{a},{b}");
        let args = Args::try_parse_from([
            "tally-node",
            "--regtest",
            "--data-dir",
            "/tmp/tally-cli",
            "--watch",
            watch.as_str(),
            "--maturity-delay",
            "3",
            "balance",
        ])
        .unwrap();
        let (config, command, json) = args.into_config().unwrap();
        assert_eq!(config.network, NetworkType::Regtest);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/tally-cli"));
        assert_eq!(config.watch_addresses.len(), 2);
        assert_eq!(config.watch_addresses[0], a.parse().unwrap());
        assert_eq!(config.chain_params().maturity_delay, 3);
        assert!(matches!(command, Command::Balance { address: None }));
        assert!(!json);
    }

    #[test]
    fn coins_format() {
        assert_eq!(format_coins(Currency::ZERO), "0");
        assert_eq!(format_coins(Currency::new(50 * COIN.0)), "50");
        assert_eq!(format_coins(Currency::new(COIN.0 + COIN.0 / 4)), "1.25");
        assert_eq!(format_coins(Currency::new(1)), "0.000000000000000000000001");
    }
}
