//! CLI command definitions and dispatch.

pub mod config;
pub mod lifecycle;
pub mod runtime;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::warn;
use panel_ext_core::{init_logging, AppContext, RecordingHost, RuntimeConfig};

use crate::builtin;
use crate::output::OutputFormat;

/// Extension runtime administration.
#[derive(Debug, Parser)]
#[command(name = "panel-ext", version, about, long_about = None)]
pub struct Cli {
    /// Path to the runtime config; defaults apply when the file is absent.
    #[arg(short, long, default_value = "panel_ext.toml")]
    pub config: PathBuf,

    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List extension types
    Types,
    /// List on-disk packages with their registry state
    List(lifecycle::ListArgs),
    /// Install a package (stays disabled)
    Install(lifecycle::CodeArgs),
    /// Disable, roll back migrations and drop the registry record
    Uninstall(lifecycle::CodeArgs),
    /// Upgrade an installed extension to its on-disk package version
    Upgrade(lifecycle::CodeArgs),
    Enable(lifecycle::CodeArgs),
    Disable(lifecycle::CodeArgs),
    /// Uninstall if needed, then remove the package from disk
    Delete(lifecycle::CodeArgs),
    /// Upload a .tar.gz package
    Upload(lifecycle::UploadArgs),
    /// Read or change stored extension config
    Config(config::ConfigArgs),
    /// Install missing protected extensions and boot enabled ones
    Bootstrap,
    /// Print jobs contributed by enabled extensions
    Schedule,
    /// List enabled payment methods
    Payments,
    /// Boot enabled extensions, then broadcast an action hook
    Fire(runtime::FireArgs),
}

impl Cli {
    pub fn execute(&self) -> Result<()> {
        let config = load_config(&self.config)?;
        if let Some(dir) = &config.log.dir {
            if let Err(err) = init_logging(&config.log.level, dir) {
                eprintln!("logging disabled: {err}");
            }
        }

        let ctx = AppContext::new(config, builtin::factories(), Arc::new(RecordingHost::new()));
        let conn = ctx
            .open_db()
            .with_context(|| format!("failed to open {}", ctx.config().database_path.display()))?;

        match &self.command {
            Commands::Types => lifecycle::types(&ctx, &conn, self.format),
            Commands::List(args) => lifecycle::list(&ctx, &conn, args, self.format),
            Commands::Install(args) => lifecycle::install(&ctx, &conn, args, self.format),
            Commands::Uninstall(args) => lifecycle::uninstall(&ctx, &conn, args),
            Commands::Upgrade(args) => lifecycle::upgrade(&ctx, &conn, args, self.format),
            Commands::Enable(args) => lifecycle::enable(&ctx, &conn, args),
            Commands::Disable(args) => lifecycle::disable(&ctx, &conn, args),
            Commands::Delete(args) => lifecycle::delete(&ctx, &conn, args),
            Commands::Upload(args) => lifecycle::upload(&ctx, &conn, args, self.format),
            Commands::Config(args) => config::execute(&ctx, &conn, args, self.format),
            Commands::Bootstrap => runtime::bootstrap(&ctx, &conn),
            Commands::Schedule => runtime::schedule(&ctx, &conn, self.format),
            Commands::Payments => runtime::payments(&ctx, &conn, self.format),
            Commands::Fire(args) => runtime::fire(&ctx, &conn, args),
        }
    }
}

fn load_config(path: &Path) -> Result<RuntimeConfig> {
    if path.is_file() {
        return RuntimeConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()));
    }
    warn!("event=config_load module=core status=skipped path={}", path.display());
    let mut config = RuntimeConfig::default();
    let cwd = std::env::current_dir().context("failed to resolve working directory")?;
    config.resolve_relative_to(&cwd);
    Ok(config)
}
