//! Stored extension config commands.

use anyhow::{bail, Result};
use clap::{Args, Subcommand};
use panel_ext_core::db::Connection;
use panel_ext_core::{AppContext, ConfigMap, LifecycleManager};
use serde_json::Value;

use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show schema entries merged with stored values
    Get { code: String },
    /// Store `key=value` pairs; values parse as JSON, else as plain strings
    Set {
        code: String,
        #[arg(required = true)]
        pairs: Vec<String>,
    },
}

pub fn execute(
    ctx: &AppContext,
    conn: &Connection,
    args: &ConfigArgs,
    format: OutputFormat,
) -> Result<()> {
    let manager = LifecycleManager::new(ctx, conn);
    match &args.command {
        ConfigCommand::Get { code } => {
            output::print_item(&manager.get_config(code)?, format);
        }
        ConfigCommand::Set { code, pairs } => {
            let changes = parse_pairs(pairs)?;
            let stored = manager.update_config(code, changes)?;
            output::print_item(&stored, format);
        }
    }
    Ok(())
}

fn parse_pairs(pairs: &[String]) -> Result<ConfigMap> {
    let mut changes = ConfigMap::new();
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("expected key=value, got `{pair}`");
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("empty config key in `{pair}`");
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        changes.insert(key.to_string(), value);
    }
    Ok(changes)
}
