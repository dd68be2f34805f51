//! Upgrade command - Bump the schema version to create missing partitions

use anyhow::Result;
use clap::Args;

use super::{open_store, print_json};
use crate::GlobalOptions;

/// Arguments for the upgrade command
#[derive(Args, Debug)]
pub struct UpgradeArgs {
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

/// Execute the upgrade command
pub async fn execute(args: UpgradeArgs, global: GlobalOptions) -> Result<()> {
    let (store, _config) = open_store(&global).await?;
    let before = store.database().schema_version().await?;
    let after = store.force_upgrade().await?;
    let partitions = store.database().existing_partitions().await?;
    store.close().await?;

    if args.json {
        return print_json(&serde_json::json!({
            "from": before,
            "to": after,
            "partitions": partitions,
        }));
    }
    println!(
        "Schema v{} -> v{} ({} partitions on disk)",
        before,
        after,
        partitions.len()
    );
    Ok(())
}
