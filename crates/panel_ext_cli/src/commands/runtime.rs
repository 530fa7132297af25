//! Process-level passes: bootstrap, scheduling and hook smoke checks.

use anyhow::{Context, Result};
use clap::Args;
use panel_ext_core::db::Connection;
use panel_ext_core::{AppContext, LifecycleManager, Schedule, ScheduledJob};
use serde::Serialize;
use serde_json::Value;
use tabled::Tabled;

use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct FireArgs {
    /// Action hook name, e.g. `user.login.after`
    pub hook: String,
    /// JSON arguments passed to every listener
    pub args: Vec<String>,
}

#[derive(Debug, Serialize, Tabled)]
struct JobLine {
    extension: String,
    name: String,
    cron: String,
}

impl From<&ScheduledJob> for JobLine {
    fn from(job: &ScheduledJob) -> Self {
        Self {
            extension: job.extension.clone(),
            name: job.name.clone(),
            cron: job.cron.clone(),
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
struct PaymentLine {
    code: String,
    label: String,
    fields: String,
}

pub fn bootstrap(ctx: &AppContext, conn: &Connection) -> Result<()> {
    let manager = LifecycleManager::new(ctx, conn);
    let installed = manager.install_default_plugins()?;
    let booted = manager.boot_enabled()?;
    output::print_success(&format!(
        "installed [{}], booted [{}]",
        installed.join(", "),
        booted.join(", ")
    ));
    Ok(())
}

pub fn schedule(ctx: &AppContext, conn: &Connection, format: OutputFormat) -> Result<()> {
    let mut schedule = Schedule::new();
    LifecycleManager::new(ctx, conn).schedule_enabled(&mut schedule)?;
    let lines: Vec<JobLine> = schedule.jobs().iter().map(JobLine::from).collect();
    output::print_list(&lines, format);
    Ok(())
}

pub fn payments(ctx: &AppContext, conn: &Connection, format: OutputFormat) -> Result<()> {
    let methods = LifecycleManager::new(ctx, conn).payment_methods()?;
    let lines: Vec<PaymentLine> = methods
        .into_iter()
        .map(|method| PaymentLine {
            fields: method.form.keys().cloned().collect::<Vec<_>>().join(", "),
            code: method.code,
            label: method.label,
        })
        .collect();
    output::print_list(&lines, format);
    Ok(())
}

pub fn fire(ctx: &AppContext, conn: &Connection, args: &FireArgs) -> Result<()> {
    let hook_args = args
        .args
        .iter()
        .map(|raw| serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone())))
        .collect::<Vec<Value>>();

    LifecycleManager::new(ctx, conn).boot_enabled()?;
    let listeners = ctx.hooks().listener_count(&args.hook);
    match ctx.hooks().call(&args.hook, &hook_args) {
        Ok(()) => output::print_success(&format!("{} reached {listeners} listener(s)", args.hook)),
        Err(signal) => {
            let response = serde_json::to_string(signal.response())
                .context("failed to render intercepted response")?;
            println!("intercepted: {response}");
        }
    }
    Ok(())
}
