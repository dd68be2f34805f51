//! Clear command - Delete rows from one partition or all of them
//!
//! Partition tables and the schema version are left in place.

use std::io::{self, Write};

use anyhow::{bail, Result};
use clap::Args;

use super::{open_store, print_json};
use crate::GlobalOptions;

/// Arguments for the clear command
#[derive(Args, Debug)]
pub struct ClearArgs {
    /// Partition to clear (e.g. `notes`)
    partition: Option<String>,

    /// Clear every partition
    #[arg(long, conflicts_with = "partition")]
    all: bool,

    /// Skip confirmation prompt
    #[arg(long, short = 'f')]
    force: bool,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

/// Execute the clear command
pub async fn execute(args: ClearArgs, global: GlobalOptions) -> Result<()> {
    let target = match (args.partition.as_deref(), args.all) {
        (Some(name), false) => name.to_string(),
        (None, true) => "all partitions".to_string(),
        _ => bail!("Name a partition or pass --all"),
    };

    if !args.force {
        print!("Delete every row in {}? [y/N] ", target);
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            if args.json {
                return print_json(&serde_json::json!({"cancelled": true}));
            }
            println!("Clear cancelled.");
            return Ok(());
        }
    }

    let (store, _config) = open_store(&global).await?;
    let removed = match args.partition {
        Some(ref name) => store.clear_partition(name).await?,
        None => store.clear_all().await?,
    };
    store.close().await?;

    if args.json {
        return print_json(&serde_json::json!({
            "target": target,
            "removed": removed,
        }));
    }
    println!("Removed {} rows from {}", removed, target);
    Ok(())
}
