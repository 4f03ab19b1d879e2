//! satindex CLI — inspect an ordinal index and validate indexer configs.
//!
//! # Commands
//! ```text
//! satindex info
//! satindex stats  --db <path>
//! satindex block  --db <path> <height>
//! satindex utxo   --db <path> <txid:vout>
//! satindex config --file <path.json>
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use bitcoin::OutPoint;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use satindex_bitcoin::keys;
use satindex_bitcoin::reader::{read_block, read_schema, read_stats, read_utxo};
use satindex_core::indexer::IndexerConfig;
use satindex_core::prefetch::DEFAULT_PREFETCH_DEPTH;
use satindex_core::types::Network;
use satindex_storage::SqliteStorage;

#[derive(Parser)]
#[command(
    name = "satindex",
    about = "Ordinal sat-range indexer — SatIndex CLI",
    long_about = "
SatIndex CLI: inspect a SatIndex SQLite database and validate configs.

ENVIRONMENT VARIABLES:
  RUST_LOG    Log filter directives, e.g. \"info,satindex_bitcoin=debug\"
",
    version
)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON structured logs
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show defaults and storage layout
    Info,

    /// Print the sync stats of an index
    Stats {
        /// Path to the SQLite database
        #[arg(long)]
        db: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the stored summary of a block
    Block {
        /// Path to the SQLite database
        #[arg(long)]
        db: PathBuf,
        /// Block height
        height: u64,
    },

    /// Print an unspent output and its sat ranges
    Utxo {
        /// Path to the SQLite database
        #[arg(long)]
        db: PathBuf,
        /// Outpoint as <txid>:<vout>
        outpoint: String,
    },

    /// Validate an indexer config file and print it with defaults filled in
    Config {
        /// Path to the JSON config
        #[arg(short, long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    match cli.command {
        Commands::Info => cmd_info(),
        Commands::Stats { db, json } => cmd_stats(&db, json).await,
        Commands::Block { db, height } => cmd_block(&db, height).await,
        Commands::Utxo { db, outpoint } => cmd_utxo(&db, &outpoint).await,
        Commands::Config { file } => cmd_config(&file),
    }
}

/// `RUST_LOG` wins; otherwise `info`, or `debug` with `--verbose`.
fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

// ─── Commands ────────────────────────────────────────────────────────────────

fn cmd_info() -> Result<()> {
    let mainnet = IndexerConfig::for_network(Network::Mainnet);
    println!("SatIndex v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Defaults:");
    println!("  Reorg history:     {} blocks (testnet: {})", mainnet.keep_block_history, Network::Testnet.default_keep_block_history());
    println!("  Prefetch depth:    {DEFAULT_PREFETCH_DEPTH} blocks");
    println!("  Flush interval:    every {} blocks", mainnet.flush_interval);
    println!("  Buffered UTXOs:    flush above {}", mainnet.max_buffered_utxos);
    println!("  Fetch retries:     {} (backoff from {} ms)", mainnet.fetch_retries, mainnet.fetch_backoff_ms);
    println!();
    println!("Storage:");
    println!("  Backends:          memory, SQLite (feature: sqlite)");
    println!("  Schema version:    {}", keys::SCHEMA_VERSION);
    println!("  Networks:          mainnet, testnet, signet, regtest");
    Ok(())
}

async fn open_db(path: &Path) -> Result<SqliteStorage> {
    if !path.exists() {
        bail!("database {} does not exist", path.display());
    }
    let path_str = path
        .to_str()
        .with_context(|| format!("non UTF-8 path {}", path.display()))?;
    let store = SqliteStorage::open(path_str)
        .await
        .with_context(|| format!("opening {}", path.display()))?;

    match read_schema(&store).await? {
        Some(version) if version == keys::SCHEMA_VERSION => Ok(store),
        Some(version) => bail!(
            "schema version {version} is not supported (expected {})",
            keys::SCHEMA_VERSION
        ),
        None => bail!("{} is not a SatIndex database", path.display()),
    }
}

async fn cmd_stats(db: &Path, json: bool) -> Result<()> {
    let store = open_db(db).await?;
    let Some(stats) = read_stats(&store).await? else {
        println!("Nothing indexed yet");
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let height = stats
        .sync_height
        .map_or_else(|| "-".to_string(), |h| h.to_string());
    println!("Sync height:   {height}");
    println!("Block hash:    {}", stats.sync_block_hash.as_deref().unwrap_or("-"));
    println!("Chain tip:     {}", stats.chain_tip);
    println!("Total sats:    {}", stats.total_sats);
    println!("UTXOs:         {} ({} ever created)", stats.utxo_count, stats.all_utxo_count);
    println!("Addresses:     {}", stats.address_count);
    println!("Reorgs:        {:?}", stats.reorgs_detected);
    if let Some(at) = stats.updated_at {
        println!("Updated:       {}", at.to_rfc3339());
    }
    Ok(())
}

async fn cmd_block(db: &Path, height: u64) -> Result<()> {
    let store = open_db(db).await?;
    match read_block(&store, height).await? {
        Some(block) => println!("{}", serde_json::to_string_pretty(&block)?),
        None => bail!("block {height} is not indexed"),
    }
    Ok(())
}

async fn cmd_utxo(db: &Path, outpoint: &str) -> Result<()> {
    let outpoint = parse_outpoint(outpoint)?;
    let store = open_db(db).await?;
    match read_utxo(&store, &outpoint).await? {
        Some(utxo) => println!("{}", serde_json::to_string_pretty(&utxo)?),
        None => bail!("{outpoint} is spent or was never indexed"),
    }
    Ok(())
}

fn cmd_config(file: &Path) -> Result<()> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let config = IndexerConfig::from_json(&json)
        .with_context(|| format!("invalid config {}", file.display()))?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn parse_outpoint(s: &str) -> Result<OutPoint> {
    OutPoint::from_str(s).with_context(|| format!("expected <txid>:<vout>, got {s:?}"))
}
