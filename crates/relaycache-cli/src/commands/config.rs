//! Config command - View and manage configuration
//!
//! Provides commands for viewing and modifying RelayCache configuration:
//! - Show the effective configuration
//! - Get or set a value by dotted key (e.g. `expiration.ttl.notes`)
//! - Create default config files and show their paths

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use relaycache_config::{CacheConfig, ConfigLayer};
use serde::Serialize;
use serde_json::Value;

use super::{config_loader, load_config, print_json, resolve_root};
use crate::GlobalOptions;

/// Config management commands
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show(ShowArgs),

    /// Get a specific configuration value
    Get(GetArgs),

    /// Set a value in the local config file
    Set(SetArgs),

    /// Create a config file with defaults
    Init(InitArgs),

    /// Show configuration file paths
    Path(PathArgs),
}

/// Arguments for the show command
#[derive(clap::Args, Debug)]
pub struct ShowArgs {
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

/// Arguments for the get command
#[derive(clap::Args, Debug)]
pub struct GetArgs {
    /// Configuration key (e.g., "storage.database_file")
    key: String,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

/// Arguments for the set command
#[derive(clap::Args, Debug)]
pub struct SetArgs {
    /// Configuration key (e.g., "expiration.ttl.notes")
    key: String,

    /// Value to set (parsed as JSON when possible, else a string)
    value: String,
}

/// Arguments for the init command
#[derive(clap::Args, Debug)]
pub struct InitArgs {
    /// Create the global config (~/.relaycache/config.toml) instead of local
    #[arg(long)]
    global: bool,
}

/// Arguments for the path command
#[derive(clap::Args, Debug)]
pub struct PathArgs {
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

/// Configuration paths
#[derive(Debug, Clone, Serialize)]
pub struct ConfigPaths {
    /// Global config file path
    pub global: Option<PathBuf>,
    /// Local config file path
    pub local: PathBuf,
    /// Whether global config exists
    pub global_exists: bool,
    /// Whether local config exists
    pub local_exists: bool,
}

/// Execute the config command
pub async fn execute(cmd: ConfigCommand, global: GlobalOptions) -> Result<()> {
    match cmd {
        ConfigCommand::Show(args) => execute_show(args, global),
        ConfigCommand::Get(args) => execute_get(args, global),
        ConfigCommand::Set(args) => execute_set(args, global),
        ConfigCommand::Init(args) => execute_init(args, global),
        ConfigCommand::Path(args) => execute_path(args, global),
    }
}

fn execute_show(args: ShowArgs, global: GlobalOptions) -> Result<()> {
    let root = resolve_root(&global)?;
    let config = load_config(&global, &root)?;

    if args.json {
        return print_json(&config);
    }
    let text = toml::to_string_pretty(&config).context("Failed to render configuration")?;
    print!("{}", text);
    Ok(())
}

fn execute_get(args: GetArgs, global: GlobalOptions) -> Result<()> {
    let root = resolve_root(&global)?;
    let config = load_config(&global, &root)?;

    let value = get_config_value(&config, &args.key)?
        .ok_or_else(|| anyhow::anyhow!("Unknown configuration key: {}", args.key))?;

    if args.json {
        return print_json(&value);
    }
    match value {
        Value::String(s) => println!("{}", s),
        Value::Null => println!("null"),
        other => println!("{}", other),
    }
    Ok(())
}

fn execute_set(args: SetArgs, global: GlobalOptions) -> Result<()> {
    let root = resolve_root(&global)?;
    let loader = config_loader(&global);
    let layer = loader.load_local(&root)?.unwrap_or_default();

    let updated = set_config_value(&layer, &args.key, &args.value)
        .with_context(|| format!("Failed to set configuration key: {}", args.key))?;
    updated.resolve().validate()?;

    loader.save_local(&root, &updated)?;
    println!("Set {} = {} in local config", args.key, args.value);
    Ok(())
}

fn execute_init(args: InitArgs, global: GlobalOptions) -> Result<()> {
    let loader = config_loader(&global);
    let path = if args.global {
        loader.init_global()?
    } else {
        loader.init_local(&resolve_root(&global)?)?
    };
    println!("Config file: {}", path.display());
    Ok(())
}

fn execute_path(args: PathArgs, global: GlobalOptions) -> Result<()> {
    let root = resolve_root(&global)?;
    let loader = config_loader(&global);

    let global_path = loader.global_config_path();
    let local_path = loader.local_config_path(&root);
    let paths = ConfigPaths {
        global_exists: global_path.as_ref().is_some_and(|p| p.exists()),
        global: global_path,
        local_exists: local_path.exists(),
        local: local_path,
    };

    if args.json {
        return print_json(&paths);
    }
    match paths.global {
        Some(ref path) => println!(
            "Global: {} ({})",
            path.display(),
            if paths.global_exists { "exists" } else { "not created" }
        ),
        None => println!("Global: unavailable (no home directory)"),
    }
    println!(
        "Local:  {} ({})",
        paths.local.display(),
        if paths.local_exists { "exists" } else { "not created" }
    );
    Ok(())
}

/// JSON pointer for a dotted key.
fn pointer(key: &str) -> String {
    key.split('.').fold(String::new(), |mut acc, part| {
        acc.push('/');
        acc.push_str(part);
        acc
    })
}

/// Look up a dotted key in the configuration.
fn get_config_value(config: &CacheConfig, key: &str) -> Result<Option<Value>> {
    let tree = serde_json::to_value(config)?;
    Ok(tree.pointer(&pointer(key)).cloned())
}

/// Return a copy of `layer` with `key` set to `raw`.
///
/// Only keys under a table of the full configuration may be set; new entries
/// are allowed in map-valued tables such as `expiration.ttl`. Tables the
/// layer does not set yet are created.
fn set_config_value(layer: &ConfigLayer, key: &str, raw: &str) -> Result<ConfigLayer> {
    let (parent, leaf) = match key.rsplit_once('.') {
        Some(split) => split,
        None => bail!("Keys have the form section.field"),
    };
    let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));

    // Check the key and value against the full configuration first
    let mut full = serde_json::to_value(layer.resolve())?;
    full.pointer_mut(&pointer(parent))
        .and_then(Value::as_object_mut)
        .ok_or_else(|| anyhow::anyhow!("Unknown configuration section: {}", parent))?
        .insert(leaf.to_string(), value.clone());
    let checked: CacheConfig =
        serde_json::from_value(full).context("Value does not fit the configuration")?;
    // Unknown fields are dropped on the way through
    if get_config_value(&checked, key)?.is_none() {
        bail!("Unknown configuration key: {}", key);
    }

    let mut tree = serde_json::to_value(layer)?;
    let mut table = &mut tree;
    for part in parent.split('.') {
        let object = table
            .as_object_mut()
            .ok_or_else(|| anyhow::anyhow!("Unknown configuration section: {}", parent))?;
        table = object
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
    }
    table
        .as_object_mut()
        .ok_or_else(|| anyhow::anyhow!("Unknown configuration section: {}", parent))?
        .insert(leaf.to_string(), value);

    serde_json::from_value(tree).context("Value does not fit the configuration")
}
