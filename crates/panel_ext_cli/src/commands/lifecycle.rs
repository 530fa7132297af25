//! Install/enable/upgrade style commands.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use panel_ext_core::{AppContext, ExtensionType, LifecycleManager, PackageRow};
use panel_ext_core::db::Connection;
use serde::Serialize;
use tabled::Tabled;

use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct CodeArgs {
    /// Extension code
    pub code: String,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Only show packages of this type (feature or payment)
    #[arg(short = 't', long = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Args)]
pub struct UploadArgs {
    /// Path to a .tar.gz package
    pub file: PathBuf,
}

#[derive(Debug, Serialize, Tabled)]
struct TypeLine {
    value: String,
    label: String,
}

#[derive(Debug, Serialize, Tabled)]
struct PackageLine {
    code: String,
    name: String,
    version: String,
    kind: String,
    installed: String,
    enabled: bool,
    protected: bool,
}

impl From<&PackageRow> for PackageLine {
    fn from(row: &PackageRow) -> Self {
        let installed = match (&row.installed_version, row.upgrade_available) {
            (Some(version), true) => format!("{version} (upgrade available)"),
            (Some(version), false) => version.clone(),
            (None, _) => "-".to_string(),
        };
        Self {
            code: row.code.clone(),
            name: row.name.clone(),
            version: row.version.clone(),
            kind: row.kind.clone(),
            installed,
            enabled: row.enabled,
            protected: row.protected,
        }
    }
}

pub fn types(ctx: &AppContext, conn: &Connection, format: OutputFormat) -> Result<()> {
    let lines: Vec<TypeLine> = LifecycleManager::new(ctx, conn)
        .list_types()
        .into_iter()
        .map(|kind| TypeLine {
            value: kind.as_str().to_string(),
            label: kind.label().to_string(),
        })
        .collect();
    output::print_list(&lines, format);
    Ok(())
}

pub fn list(ctx: &AppContext, conn: &Connection, args: &ListArgs, format: OutputFormat) -> Result<()> {
    let filter = args
        .kind
        .as_deref()
        .map(|raw| {
            ExtensionType::parse(raw)
                .with_context(|| format!("unknown extension type `{raw}`; expected feature or payment"))
        })
        .transpose()?;
    let rows = LifecycleManager::new(ctx, conn).list_packages(filter)?;
    match format {
        OutputFormat::Json => output::print_item(&rows, format),
        OutputFormat::Table => {
            let lines: Vec<PackageLine> = rows.iter().map(PackageLine::from).collect();
            output::print_list(&lines, format);
        }
    }
    Ok(())
}

pub fn install(ctx: &AppContext, conn: &Connection, args: &CodeArgs, format: OutputFormat) -> Result<()> {
    let record = LifecycleManager::new(ctx, conn).install(&args.code)?;
    output::print_item(&record, format);
    Ok(())
}

pub fn uninstall(ctx: &AppContext, conn: &Connection, args: &CodeArgs) -> Result<()> {
    LifecycleManager::new(ctx, conn).uninstall(&args.code)?;
    output::print_success(&format!("uninstalled {}", args.code));
    Ok(())
}

pub fn upgrade(ctx: &AppContext, conn: &Connection, args: &CodeArgs, format: OutputFormat) -> Result<()> {
    let record = LifecycleManager::new(ctx, conn).upgrade(&args.code)?;
    output::print_item(&record, format);
    Ok(())
}

pub fn enable(ctx: &AppContext, conn: &Connection, args: &CodeArgs) -> Result<()> {
    LifecycleManager::new(ctx, conn).enable(&args.code)?;
    output::print_success(&format!("enabled {}", args.code));
    Ok(())
}

pub fn disable(ctx: &AppContext, conn: &Connection, args: &CodeArgs) -> Result<()> {
    LifecycleManager::new(ctx, conn).disable(&args.code)?;
    output::print_success(&format!("disabled {}", args.code));
    Ok(())
}

pub fn delete(ctx: &AppContext, conn: &Connection, args: &CodeArgs) -> Result<()> {
    LifecycleManager::new(ctx, conn).delete(&args.code)?;
    output::print_success(&format!("deleted {}", args.code));
    Ok(())
}

pub fn upload(ctx: &AppContext, conn: &Connection, args: &UploadArgs, format: OutputFormat) -> Result<()> {
    let bytes = std::fs::read(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let outcome = LifecycleManager::new(ctx, conn).upload(&bytes)?;
    output::print_item(&outcome, format);
    Ok(())
}
