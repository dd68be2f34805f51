//! Partitions command - List partitions and their row counts

use anyhow::Result;
use clap::Args;
use relaycache_core::registry;
use serde::Serialize;

use super::{open_store, print_json};
use crate::GlobalOptions;

/// Arguments for the partitions command
#[derive(Args, Debug)]
pub struct PartitionsArgs {
    /// Also list registered partitions not yet created on disk
    #[arg(long)]
    all: bool,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct PartitionRow {
    name: &'static str,
    category: Option<String>,
    semantics: String,
    since_version: u32,
    /// `None` when the table does not exist yet
    rows: Option<usize>,
}

/// Execute the partitions command
pub async fn execute(args: PartitionsArgs, global: GlobalOptions) -> Result<()> {
    let (store, _config) = open_store(&global).await?;
    let counts = store.list_partitions().await?;
    store.close().await?;

    let rows: Vec<PartitionRow> = registry::partitions()
        .iter()
        .map(|spec| PartitionRow {
            name: spec.name,
            category: spec.category.map(|c| c.to_string()),
            semantics: format!("{:?}", spec.semantics).to_lowercase(),
            since_version: spec.since_version,
            rows: counts.get(spec.name).copied(),
        })
        .filter(|row| args.all || row.rows.is_some())
        .collect();

    if args.json {
        return print_json(&rows);
    }

    println!(
        "{:<24} {:<22} {:<14} {:>5} {:>8}",
        "PARTITION", "CATEGORY", "SEMANTICS", "SINCE", "ROWS"
    );
    for row in &rows {
        println!(
            "{:<24} {:<22} {:<14} {:>5} {:>8}",
            row.name,
            row.category.as_deref().unwrap_or("-"),
            row.semantics,
            format!("v{}", row.since_version),
            row.rows.map_or_else(|| "-".to_string(), |n| n.to_string()),
        );
    }
    Ok(())
}
