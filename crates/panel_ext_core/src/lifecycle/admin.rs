//! Read-mostly administrative views over packages and stored config.

use super::error::{LifecycleError, LifecycleResult};
use super::manager::{check_code, merged_config, LifecycleManager};
use crate::extension::contract::ConfigMap;
use crate::extension::manifest::ExtensionType;
use crate::extension::version::parse_version;
use crate::registry::Registry;
use log::{info, warn};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One on-disk package merged with its registry state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackageRow {
    pub code: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub installed: bool,
    pub enabled: bool,
    pub installed_version: Option<String>,
    pub upgrade_available: bool,
    pub protected: bool,
}

/// One config key as shown in the admin form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigEntry {
    pub value: Value,
    pub default: Value,
    /// Schema metadata (`type`, `label`, `options`, ...).
    #[serde(flatten)]
    pub meta: Map<String, Value>,
}

impl LifecycleManager<'_> {
    pub fn list_types(&self) -> Vec<ExtensionType> {
        ExtensionType::ALL.to_vec()
    }

    pub fn list_packages(&self, filter: Option<ExtensionType>) -> LifecycleResult<Vec<PackageRow>> {
        let mut rows = Vec::new();
        for entry in self.ctx.packages().list()? {
            let manifest = entry.manifest;
            if let Some(wanted) = filter {
                if manifest.extension_type().ok() != Some(wanted) {
                    continue;
                }
            }

            let record = self.registry.find(&manifest.code)?;
            let upgrade_available = record.as_ref().is_some_and(|record| {
                match (parse_version(&record.version), parse_version(&manifest.version)) {
                    (Some(installed), Some(available)) => available > installed,
                    _ => false,
                }
            });
            rows.push(PackageRow {
                protected: self.registry.is_protected(&manifest.code),
                installed: record.is_some(),
                enabled: record.as_ref().is_some_and(|record| record.enabled),
                installed_version: record.map(|record| record.version),
                upgrade_available,
                code: manifest.code,
                name: manifest.name,
                version: manifest.version,
                description: manifest.description,
                author: manifest.author,
                kind: manifest.kind,
            });
        }
        Ok(rows)
    }

    /// Schema entries merged with stored values, keyed by config key.
    pub fn get_config(&self, code: &str) -> LifecycleResult<BTreeMap<String, ConfigEntry>> {
        check_code(code)?;
        let record = self.require_record(code)?;
        let manifest = self.ctx.packages().read_manifest(code)?;

        let mut entries: BTreeMap<String, ConfigEntry> = manifest
            .config
            .iter()
            .map(|(key, field)| {
                let value = record
                    .config
                    .get(key)
                    .cloned()
                    .unwrap_or_else(|| field.default.clone());
                let entry = ConfigEntry {
                    value,
                    default: field.default.clone(),
                    meta: field.meta.clone(),
                };
                (key.clone(), entry)
            })
            .collect();
        for (key, value) in record.config {
            entries.entry(key).or_insert_with(|| ConfigEntry {
                value,
                default: Value::Null,
                meta: Map::new(),
            });
        }
        Ok(entries)
    }

    /// Persists `changes` over the stored config and re-injects it into the
    /// live instance when enabled. Returns the stored config.
    pub fn update_config(&self, code: &str, changes: ConfigMap) -> LifecycleResult<ConfigMap> {
        check_code(code)?;
        let record = self.require_record(code)?;
        let manifest = self.ctx.packages().read_manifest(code)?;
        if !manifest.config.is_empty() {
            if let Some(unknown) = changes.keys().find(|key| !manifest.config.contains_key(*key)) {
                return Err(LifecycleError::InvalidConfig(format!(
                    "`{code}` has no config key `{unknown}`"
                )));
            }
        }

        let mut config = merged_config(&manifest, &record.config);
        let changed = changes.len();
        config.extend(changes);
        self.registry.update_config(code, &config)?;

        if record.enabled {
            match self.load_or_heal(code) {
                Ok(extension) => extension.set_config(config.clone()),
                Err(err) => warn!(
                    "event=ext_config_inject module=lifecycle status=skipped code={code} error={err}"
                ),
            }
        }
        info!("event=ext_config_update module=lifecycle status=ok code={code} keys={changed}");
        Ok(config)
    }
}
