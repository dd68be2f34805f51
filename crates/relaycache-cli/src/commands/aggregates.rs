//! Aggregate commands - Browse and delete master/nested aggregates

use std::io::{self, Write};

use anyhow::Result;
use clap::Args;
use relaycache_core::RecordCategory;

use super::{open_store, print_info, print_json};
use crate::GlobalOptions;

/// Arguments for the aggregates command
#[derive(Args, Debug)]
pub struct AggregatesArgs {
    /// Category of the aggregate roots
    category: RecordCategory,

    /// Show the aggregate rooted at this owner instead of listing
    #[arg(long)]
    owner: Option<String>,

    /// Discriminator of the root (parameterized categories)
    #[arg(long, short = 'd', requires = "owner")]
    discriminator: Option<String>,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

/// Arguments for the delete-aggregate command
#[derive(Args, Debug)]
pub struct DeleteAggregateArgs {
    /// Category of the aggregate root
    category: RecordCategory,

    /// Owner of the aggregate root
    owner: String,

    /// Discriminator of the root (parameterized categories)
    #[arg(long, short = 'd')]
    discriminator: Option<String>,

    /// Skip confirmation prompt
    #[arg(long, short = 'f')]
    force: bool,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

/// Execute the aggregates command
pub async fn execute(args: AggregatesArgs, global: GlobalOptions) -> Result<()> {
    let (store, _config) = open_store(&global).await?;

    if let Some(ref owner) = args.owner {
        let aggregate = store
            .get_aggregate(args.category, owner, args.discriminator.as_deref())
            .await?;
        store.close().await?;

        if args.json {
            return print_json(&aggregate);
        }
        let Some(aggregate) = aggregate else {
            println!("No aggregate rooted at {} in {}", owner, args.category);
            return Ok(());
        };

        println!("Master {}", aggregate.master.key);
        if let Some(ref record) = aggregate.master.value {
            println!("  id={} created_at={}", record.id, record.created_at);
        }
        println!("Nested ({}):", aggregate.nested.len());
        for nested in &aggregate.nested {
            let detail = match nested.row.value {
                Some(ref record) => format!("kind={} id={}", record.kind, record.id),
                None => "absent".to_string(),
            };
            println!("  {:<24} {:<40} {}", nested.partition, nested.row.key, detail);
        }
        return Ok(());
    }

    let summaries = store.get_aggregate_summaries(args.category).await?;
    store.close().await?;

    if args.json {
        return print_json(&summaries);
    }
    if summaries.is_empty() {
        println!("No aggregate roots in {}", args.category);
        return Ok(());
    }

    println!("{:<48} {:>12} {:>7}", "KEY", "CREATED_AT", "NESTED");
    for summary in &summaries {
        println!(
            "{:<48} {:>12} {:>7}",
            summary.key, summary.value.created_at, summary.nested_count
        );
    }
    Ok(())
}

/// Execute the delete-aggregate command
pub async fn execute_delete(args: DeleteAggregateArgs, global: GlobalOptions) -> Result<()> {
    if !args.force {
        print!(
            "Delete the {} aggregate of {} and every row linked to it? [y/N] ",
            args.category, args.owner
        );
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            if args.json {
                return print_json(&serde_json::json!({"cancelled": true}));
            }
            println!("Delete cancelled.");
            return Ok(());
        }
    }

    let (store, _config) = open_store(&global).await?;
    let report = store
        .delete_aggregate(args.category, &args.owner, args.discriminator.as_deref())
        .await?;
    store.close().await?;

    if args.json {
        return print_json(&report);
    }
    print_info(
        &format!("Deleted {} rows", report.deleted),
        global.quiet,
    );
    Ok(())
}
