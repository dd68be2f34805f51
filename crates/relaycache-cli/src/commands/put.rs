//! Put command - Store records from a JSON file or stdin
//!
//! Input may be a single object, an array of objects, or a stream of
//! objects (JSON lines). Malformed candidates are counted and skipped.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use relaycache_core::{Lookup, Record, RecordCategory};
use serde::Deserialize;
use serde_json::Value;

use super::{open_store, print_info, print_json};
use crate::GlobalOptions;

/// Arguments for the put command
#[derive(Args, Debug)]
pub struct PutArgs {
    /// Input file (reads stdin when omitted or "-")
    file: Option<PathBuf>,

    /// Treat each input object as `{"master": ..., "nested": [...]}`
    #[arg(long)]
    aggregate: bool,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

/// Arguments for the mark-absent command
#[derive(Args, Debug)]
pub struct MarkAbsentArgs {
    /// Record category (name or kind number)
    category: RecordCategory,

    /// Owner confirmed to have no record
    owner: String,

    /// Discriminator for parameterized categories
    #[arg(long, short = 'd')]
    discriminator: Option<String>,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

/// One aggregate in `--aggregate` input.
#[derive(Debug, Deserialize)]
struct AggregateInput {
    master: Value,
    #[serde(default)]
    nested: Vec<Value>,
}

/// Execute the put command
pub async fn execute(args: PutArgs, global: GlobalOptions) -> Result<()> {
    let text = read_input(args.file.as_deref())?;
    let values = parse_candidates(&text)?;
    let (store, _config) = open_store(&global).await?;

    if args.aggregate {
        let mut stored = Vec::with_capacity(values.len());
        for (i, value) in values.into_iter().enumerate() {
            let input: AggregateInput = serde_json::from_value(value)
                .with_context(|| format!("Aggregate #{} is not {{master, nested}}", i + 1))?;
            let master = Record::from_value(&input.master)
                .with_context(|| format!("Aggregate #{} has a malformed master", i + 1))?;
            let nested = input
                .nested
                .iter()
                .map(Record::from_value)
                .collect::<Result<Vec<_>, _>>()
                .with_context(|| format!("Aggregate #{} has a malformed nested record", i + 1))?;
            let nested_count = nested.len();
            let row = store.put_aggregate(master, nested).await?;
            print_info(
                &format!("Stored aggregate {} ({} nested)", row.key, nested_count),
                global.quiet,
            );
            stored.push(row.key);
        }
        store.close().await?;

        if args.json {
            return print_json(&serde_json::json!({ "aggregates": stored }));
        }
        println!("Stored {} aggregates", stored.len());
        return Ok(());
    }

    let report = store.ingest(values).await?;
    store.close().await?;

    if args.json {
        return print_json(&report);
    }
    println!(
        "Stored {}, superseded {}, skipped {}",
        report.stored, report.superseded, report.skipped
    );
    Ok(())
}

/// Execute the mark-absent command
pub async fn execute_mark_absent(args: MarkAbsentArgs, global: GlobalOptions) -> Result<()> {
    let (store, _config) = open_store(&global).await?;
    let resident = store
        .put_tombstone(args.category, &args.owner, args.discriminator.as_deref())
        .await?;
    store.close().await?;

    if args.json {
        return print_json(&resident);
    }
    match resident {
        Lookup::Present(record) => println!(
            "{} already has a record (id={}), left in place",
            args.owner, record.id
        ),
        _ => println!("Marked {} absent in {}", args.owner, args.category),
    }
    Ok(())
}

fn read_input(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        _ => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read stdin")?;
            Ok(text)
        }
    }
}

/// Split input into candidates. Top-level arrays are flattened one level.
fn parse_candidates(text: &str) -> Result<Vec<Value>> {
    let mut values = Vec::new();
    for (i, item) in serde_json::Deserializer::from_str(text)
        .into_iter::<Value>()
        .enumerate()
    {
        match item.with_context(|| format!("Invalid JSON in input value #{}", i + 1))? {
            Value::Array(items) => values.extend(items),
            other => values.push(other),
        }
    }
    if values.is_empty() {
        bail!("No records in input");
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_single_object() {
        let values = parse_candidates(r#"{"id": "1"}"#).unwrap();
        assert_eq!(values, vec![json!({"id": "1"})]);
    }

    #[test]
    fn test_parse_array_and_lines() {
        let text = "[{\"id\": \"1\"}, {\"id\": \"2\"}]\n{\"id\": \"3\"}\n";
        let values = parse_candidates(text).unwrap();
        assert_eq!(values.len(), 3);
        assert_eq!(values[2], json!({"id": "3"}));
    }

    #[test]
    fn test_parse_keeps_non_objects_for_validation() {
        // Validation happens at ingest, so scalars are passed through
        let values = parse_candidates("\"garbage\"\n{\"id\": \"1\"}").unwrap();
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_parse_rejects_broken_json_and_empty_input() {
        assert!(parse_candidates("{\"id\": ").is_err());
        assert!(parse_candidates("  \n").is_err());
    }
}
