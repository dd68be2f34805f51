//! Status command - Show database location, schema and sweep state

use anyhow::Result;
use clap::Args;
use relaycache_core::{CURRENT_SCHEMA_VERSION, LAST_SWEEP_KEY};

use super::{open_store, print_json};
use crate::GlobalOptions;

/// Arguments for the status command
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Show configuration details
    #[arg(long = "show-config")]
    show_config: bool,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

/// Execute the status command
pub async fn execute(args: StatusArgs, global: GlobalOptions) -> Result<()> {
    let (store, config) = open_store(&global).await?;
    let db = store.database();

    let schema_version = db.schema_version().await?;
    let last_sweep_at = db
        .metadata(LAST_SWEEP_KEY)
        .await?
        .and_then(|v| v.parse::<i64>().ok());
    let partitions = store.list_partitions().await?;
    let total_rows: usize = partitions.values().sum();

    if args.json {
        let mut status = serde_json::json!({
            "database": db.path(),
            "state": format!("{:?}", db.state()).to_lowercase(),
            "schema_version": schema_version,
            "registry_version": CURRENT_SCHEMA_VERSION,
            "partition_count": partitions.len(),
            "total_rows": total_rows,
            "last_sweep_at": last_sweep_at,
        });

        if args.show_config {
            status["config"] = serde_json::to_value(&config)?;
        }

        print_json(&status)?;
        store.close().await?;
        return Ok(());
    }

    // Human-readable output
    println!("RelayCache Status");
    println!("=================\n");

    println!("Database:    {}", db.path().display());
    println!("Schema:      v{} (registry v{})", schema_version, CURRENT_SCHEMA_VERSION);
    println!("Partitions:  {}", partitions.len());
    println!("Rows:        {}", total_rows);
    match last_sweep_at {
        Some(at) => println!("Last sweep:  {} (unix ms)", at),
        None => println!("Last sweep:  never"),
    }

    if args.show_config {
        println!("\nConfiguration:");
        println!("  Auto upgrade:     {}", config.storage.auto_upgrade);
        println!("  Ready timeout:    {}ms", config.storage.ready_timeout_ms);
        println!(
            "  Startup sweep:    {} (after {}s)",
            config.expiration.sweep_on_startup, config.expiration.startup_delay_secs
        );
        for (partition, ttl) in &config.expiration.ttl {
            println!("  TTL {:<14} {}", partition, ttl);
        }
        println!("  Log level:        {}", config.logging.level);
    }

    store.close().await?;
    Ok(())
}
