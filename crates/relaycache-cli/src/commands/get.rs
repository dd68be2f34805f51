//! Get command - Read records by logical key or by id
//!
//! Versioned categories are addressed by owner (plus a discriminator for
//! parameterized ones); append-only records by kind and id.

use anyhow::{bail, Result};
use clap::Args;
use relaycache_core::{Lookup, Record, RecordCategory};
use serde::Serialize;

use super::{open_store, print_json};
use crate::GlobalOptions;

/// Arguments for the get command
#[derive(Args, Debug)]
pub struct GetArgs {
    /// Record category (name or kind number)
    #[arg(required_unless_present = "id")]
    category: Option<RecordCategory>,

    /// Owners to read; several owners are read as one batch
    owners: Vec<String>,

    /// Discriminator for parameterized categories
    #[arg(long, short = 'd')]
    discriminator: Option<String>,

    /// Kind of an append-only record (with --id)
    #[arg(long, requires = "id")]
    kind: Option<u32>,

    /// Id of an append-only record
    #[arg(long, requires = "kind", conflicts_with = "category")]
    id: Option<String>,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct OwnerLookup<'a> {
    owner: &'a str,
    #[serde(flatten)]
    lookup: &'a Lookup,
}

/// Execute the get command
pub async fn execute(args: GetArgs, global: GlobalOptions) -> Result<()> {
    let (store, _config) = open_store(&global).await?;

    if let (Some(kind), Some(id)) = (args.kind, args.id.as_deref()) {
        let lookup = store.get_by_id(kind, id).await?;
        store.close().await?;
        return print_lookup(&lookup, args.json);
    }

    let Some(category) = args.category else {
        bail!("a category or --kind/--id is required");
    };

    match args.owners.as_slice() {
        [] => bail!("at least one owner is required"),
        [owner] => {
            let lookup = store
                .get(category, owner, args.discriminator.as_deref())
                .await?;
            store.close().await?;
            print_lookup(&lookup, args.json)
        }
        owners => {
            if args.discriminator.is_some() {
                bail!("--discriminator reads a single owner");
            }
            let lookups = store.get_many(owners, category).await?;
            store.close().await?;

            let rows: Vec<OwnerLookup<'_>> = owners
                .iter()
                .zip(&lookups)
                .map(|(owner, lookup)| OwnerLookup { owner, lookup })
                .collect();

            if args.json {
                return print_json(&rows);
            }
            for row in &rows {
                println!("{:<20} {}", row.owner, summarize(row.lookup));
            }
            Ok(())
        }
    }
}

fn print_lookup(lookup: &Lookup, json: bool) -> Result<()> {
    if json {
        return print_json(lookup);
    }
    match lookup {
        Lookup::Present(record) => print_json(record),
        other => {
            println!("{}", summarize(other));
            Ok(())
        }
    }
}

/// One-line rendering of a lookup.
fn summarize(lookup: &Lookup) -> String {
    match lookup {
        Lookup::Unknown => "unknown (never fetched)".to_string(),
        Lookup::Absent => "absent (confirmed missing)".to_string(),
        Lookup::Present(Record { id, created_at, .. }) => {
            format!("present id={} created_at={}", id, created_at)
        }
    }
}
