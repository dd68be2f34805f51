//! RelayCache CLI - Inspect and maintain a relay record cache
//!
//! A command-line interface over the cache database: load records, read
//! them back, browse aggregates and run the maintenance passes.
//!
//! # Usage
//!
//! ```bash
//! # Load records from a JSON file (object, array or JSON lines)
//! relaycache put records.json
//!
//! # Read the current profile of an author
//! relaycache get profile <pubkey>
//!
//! # Collapse superseded versions and expire old rows
//! relaycache compact --all
//! relaycache sweep
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use relaycache_config::{ConfigOverrides, LogFormat, LoggingConfig};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod commands;

/// RelayCache - Persistent client-side cache for versioned relay records
#[derive(Parser, Debug)]
#[command(name = "relaycache")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOptions,
}

/// Global options available to all commands
#[derive(Args, Debug, Clone)]
struct GlobalOptions {
    /// Working directory (holds `.relaycache/`)
    #[arg(long, short = 'C', global = true, env = "RELAYCACHE_DIR")]
    dir: Option<PathBuf>,

    /// Path to configuration file
    #[arg(long, short = 'c', global = true, env = "RELAYCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the database
    #[arg(long, global = true, env = "RELAYCACHE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Database file name inside the data directory
    #[arg(long, global = true, env = "RELAYCACHE_DB_FILE")]
    db_file: Option<String>,

    /// Schema version to open the database at
    #[arg(long, global = true, env = "RELAYCACHE_SCHEMA_VERSION")]
    schema_version: Option<u32>,

    /// Fail instead of upgrading when a partition is missing
    #[arg(long, global = true)]
    no_auto_upgrade: bool,

    /// Log format (text, json)
    #[arg(long, global = true, env = "RELAYCACHE_LOG_FORMAT", value_parser = parse_log_format)]
    log_format: Option<LogFormat>,

    /// Global config directory (default: ~/.relaycache)
    #[arg(long, global = true, env = "RELAYCACHE_GLOBAL_DIR", hide = true)]
    global_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Suppress non-essential output
    #[arg(long, short = 'q', global = true)]
    quiet: bool,
}

fn parse_log_format(s: &str) -> Result<LogFormat, String> {
    s.parse()
        .map_err(|e: relaycache_config::ConfigError| e.to_string())
}

impl GlobalOptions {
    /// Convert global options to config overrides
    pub fn to_config_overrides(&self) -> ConfigOverrides {
        let log_level = if self.quiet {
            Some("error".to_string())
        } else if self.verbose {
            Some("debug".to_string())
        } else {
            None
        };

        ConfigOverrides {
            data_dir: self.data_dir.clone(),
            database_file: self.db_file.clone(),
            schema_version: self.schema_version,
            auto_upgrade: self.no_auto_upgrade.then_some(false),
            log_level,
            log_format: self.log_format,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show database location, schema version and sweep state
    Status(commands::status::StatusArgs),

    /// List partitions and their row counts
    Partitions(commands::partitions::PartitionsArgs),

    /// Read a record by logical key or by id
    Get(commands::get::GetArgs),

    /// Store records from a JSON file or stdin
    Put(commands::put::PutArgs),

    /// Record that a key was confirmed to have no record
    MarkAbsent(commands::put::MarkAbsentArgs),

    /// List aggregate roots of a category, or show one aggregate
    Aggregates(commands::aggregates::AggregatesArgs),

    /// Delete an aggregate root and every row that references it
    DeleteAggregate(commands::aggregates::DeleteAggregateArgs),

    /// Collapse superseded versions of versioned categories
    Compact(commands::compact::CompactArgs),

    /// Remove rows older than their partition's TTL
    Sweep(commands::sweep::SweepArgs),

    /// Delete rows from one partition or all of them
    Clear(commands::clear::ClearArgs),

    /// Bump the schema version to create missing partitions
    Upgrade(commands::upgrade::UpgradeArgs),

    /// View and manage configuration
    #[command(subcommand)]
    Config(commands::config::ConfigCommand),
}

/// Install the global subscriber. Falls back to defaults when the config
/// cannot be loaded so that the command itself reports the error.
fn init_logging(global: &GlobalOptions) -> Result<()> {
    let logging = commands::resolve_root(global)
        .and_then(|root| commands::load_config(global, &root))
        .map(|config| config.logging)
        .unwrap_or_else(|_| {
            let mut fallback = LoggingConfig::default();
            let overrides = global.to_config_overrides();
            if let Some(level) = overrides.log_level {
                fallback.level = level;
            }
            if let Some(format) = overrides.log_format {
                fallback.format = format;
            }
            fallback
        });

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match logging.format {
        LogFormat::Text => {
            tracing::subscriber::set_global_default(builder.with_ansi(true).finish())?
        }
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.global)?;

    match cli.command {
        Commands::Status(args) => commands::status::execute(args, cli.global).await,
        Commands::Partitions(args) => commands::partitions::execute(args, cli.global).await,
        Commands::Get(args) => commands::get::execute(args, cli.global).await,
        Commands::Put(args) => commands::put::execute(args, cli.global).await,
        Commands::MarkAbsent(args) => commands::put::execute_mark_absent(args, cli.global).await,
        Commands::Aggregates(args) => commands::aggregates::execute(args, cli.global).await,
        Commands::DeleteAggregate(args) => {
            commands::aggregates::execute_delete(args, cli.global).await
        }
        Commands::Compact(args) => commands::compact::execute(args, cli.global).await,
        Commands::Sweep(args) => commands::sweep::execute(args, cli.global).await,
        Commands::Clear(args) => commands::clear::execute(args, cli.global).await,
        Commands::Upgrade(args) => commands::upgrade::execute(args, cli.global).await,
        Commands::Config(cmd) => commands::config::execute(cmd, cli.global).await,
    }
}
