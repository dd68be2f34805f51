//! Sweep command - Remove rows older than their partition's TTL
//!
//! TTLs come from `[expiration.ttl]` and may be overridden per run with
//! `--ttl partition=seconds` (or `partition=never`).

use anyhow::{Context, Result};
use clap::Args;
use relaycache_config::TtlSetting;

use super::{open_store, print_info, print_json, sweeper_from_config};
use crate::GlobalOptions;

/// Arguments for the sweep command
#[derive(Args, Debug)]
pub struct SweepArgs {
    /// Override a partition's TTL (e.g. `notes=3600`, `profiles=never`)
    #[arg(long = "ttl", value_name = "PARTITION=TTL", value_parser = parse_ttl_override)]
    ttl: Vec<(String, TtlSetting)>,

    /// Run as the startup sweep: honor `sweep_on_startup` and wait
    /// `startup_delay_secs` first
    #[arg(long)]
    startup: bool,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

fn parse_ttl_override(s: &str) -> Result<(String, TtlSetting), String> {
    let (name, ttl) = s
        .split_once('=')
        .ok_or_else(|| format!("expected PARTITION=TTL, got '{}'", s))?;
    let ttl = ttl
        .parse::<TtlSetting>()
        .map_err(|e| e.to_string())?;
    Ok((name.trim().to_string(), ttl))
}

/// Execute the sweep command
pub async fn execute(args: SweepArgs, global: GlobalOptions) -> Result<()> {
    let (store, mut config) = open_store(&global).await?;

    if args.startup && !config.expiration.sweep_on_startup {
        store.close().await?;
        print_info("Startup sweep disabled in configuration", global.quiet);
        return Ok(());
    }

    config.expiration.ttl.extend(args.ttl);
    config
        .expiration
        .validate()
        .context("Invalid --ttl override")?;
    let sweeper = sweeper_from_config(&config.expiration);

    let report = if args.startup {
        let delay = config.expiration.startup_delay();
        print_info(
            &format!("Running startup sweep in {}s", delay.as_secs()),
            global.quiet,
        );
        sweeper
            .spawn_startup(store.clone(), delay)
            .await
            .context("Startup sweep task failed")??
    } else {
        sweeper.sweep(&store).await?
    };
    store.close().await?;

    if args.json {
        return print_json(&report);
    }

    for (partition, removed) in &report.removed {
        println!("{:<24} {:>8} removed", partition, removed);
    }
    for partition in &report.missing {
        println!("{:<24} {:>8}", partition, "missing");
    }
    println!("Removed {} rows", report.total_removed());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ttl_override() {
        assert_eq!(
            parse_ttl_override("notes=3600").unwrap(),
            ("notes".to_string(), TtlSetting::Seconds(3600))
        );
        assert_eq!(
            parse_ttl_override("profiles=never").unwrap(),
            ("profiles".to_string(), TtlSetting::Never)
        );
        assert!(parse_ttl_override("notes").is_err());
        assert!(parse_ttl_override("notes=soon").is_err());
    }
}
