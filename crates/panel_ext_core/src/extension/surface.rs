//! Narrow contracts towards the host: routes/commands/views mounting and
//! scheduled job registration.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

/// A route an extension wants mounted. Routing syntax is the host's concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteDecl {
    pub method: String,
    pub path: String,
    pub handler: String,
}

impl RouteDecl {
    pub fn new(method: &str, path: &str, handler: &str) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            handler: handler.to_string(),
        }
    }
}

/// A console command contributed by an extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandDecl {
    pub name: String,
    pub description: String,
}

/// What gets mounted into the host when an extension is enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtensionSurface {
    pub routes: Vec<RouteDecl>,
    pub commands: Vec<CommandDecl>,
    pub views_dir: Option<PathBuf>,
}

impl ExtensionSurface {
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty() && self.commands.is_empty() && self.views_dir.is_none()
    }
}

/// Host-side registration target for extension surfaces.
pub trait HostSurface: Send + Sync {
    fn mount(&self, code: &str, surface: &ExtensionSurface);
    fn unmount(&self, code: &str);
}

/// In-memory host that records what is mounted.
#[derive(Debug, Default)]
pub struct RecordingHost {
    mounted: Mutex<BTreeMap<String, ExtensionSurface>>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mounted(&self, code: &str) -> Option<ExtensionSurface> {
        self.mounted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(code)
            .cloned()
    }

    pub fn mounted_codes(&self) -> Vec<String> {
        self.mounted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

impl HostSurface for RecordingHost {
    fn mount(&self, code: &str, surface: &ExtensionSurface) {
        self.mounted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(code.to_string(), surface.clone());
    }

    fn unmount(&self, code: &str) {
        self.mounted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(code);
    }
}

/// A time-based job contributed by an extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledJob {
    pub extension: String,
    pub name: String,
    /// Cron expression, interpreted by the external scheduler.
    pub cron: String,
}

/// Jobs collected during a scheduler startup pass.
#[derive(Debug, Default)]
pub struct Schedule {
    jobs: Vec<ScheduledJob>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registrar that stamps jobs with the extension code.
    pub fn for_extension<'a>(&'a mut self, code: &'a str) -> ScheduleRegistrar<'a> {
        ScheduleRegistrar {
            schedule: self,
            code,
        }
    }

    pub fn jobs(&self) -> &[ScheduledJob] {
        &self.jobs
    }
}

pub struct ScheduleRegistrar<'a> {
    schedule: &'a mut Schedule,
    code: &'a str,
}

impl ScheduleRegistrar<'_> {
    pub fn job(&mut self, name: &str, cron: &str) {
        self.schedule.jobs.push(ScheduledJob {
            extension: self.code.to_string(),
            name: name.to_string(),
            cron: cron.to_string(),
        });
    }
}
