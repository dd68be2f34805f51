//! Compact command - Collapse superseded versions of versioned categories

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use clap::Args;
use relaycache_core::{CompactionReport, RecordCategory};

use super::{open_store, print_json};
use crate::GlobalOptions;

/// Arguments for the compact command
#[derive(Args, Debug)]
pub struct CompactArgs {
    /// Categories to compact
    categories: Vec<RecordCategory>,

    /// Compact every versioned category
    #[arg(long, conflicts_with = "categories")]
    all: bool,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

/// Execute the compact command
pub async fn execute(args: CompactArgs, global: GlobalOptions) -> Result<()> {
    let categories: Vec<RecordCategory> = if args.all {
        RecordCategory::ALL
            .iter()
            .copied()
            .filter(|c| c.semantics().is_versioned())
            .collect()
    } else {
        args.categories
    };
    if categories.is_empty() {
        bail!("Name at least one category or pass --all");
    }

    let (store, _config) = open_store(&global).await?;
    let mut reports: BTreeMap<String, CompactionReport> = BTreeMap::new();
    for category in categories {
        let report = store.compact(category).await?;
        reports.insert(category.partition().name.to_string(), report);
    }
    store.close().await?;

    if args.json {
        return print_json(&reports);
    }

    println!(
        "{:<24} {:>8} {:>8} {:>8} {:>8} {:>8}",
        "PARTITION", "SCANNED", "KEPT", "DELETED", "SKIPPED", "REKEYED"
    );
    for (partition, report) in &reports {
        println!(
            "{:<24} {:>8} {:>8} {:>8} {:>8} {:>8}",
            partition, report.scanned, report.kept, report.deleted, report.skipped, report.rekeyed
        );
    }
    Ok(())
}
