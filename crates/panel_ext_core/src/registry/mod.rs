//! Persisted table of installed extensions.
//!
//! # Responsibility
//! - Source of truth for what is installed and what is enabled.
//! - Keep SQL details inside the registry boundary.
//!
//! # Invariants
//! - `code` is unique; the primary key serialises concurrent installs.
//! - Every mutation is a single-row statement.
//! - Protected codes are never removed through [`Registry::delete`].

mod sqlite;

pub use sqlite::SqliteRegistry;

use crate::db::DbError;
use crate::extension::contract::ConfigMap;
use crate::extension::manifest::{ExtensionType, Manifest, ManifestError};
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("extension `{0}` is already registered")]
    DuplicateCode(String),
    #[error("extension `{0}` is not registered")]
    NotFound(String),
    #[error("extension `{0}` is protected and cannot be removed")]
    Protected(String),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("invalid persisted extension data: {0}")]
    InvalidData(String),
}

impl From<rusqlite::Error> for RegistryError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// One installed extension.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtensionRecord {
    pub code: String,
    pub name: String,
    pub version: String,
    #[serde(rename = "type")]
    pub kind: ExtensionType,
    pub enabled: bool,
    pub config: ConfigMap,
    /// Unix epoch milliseconds.
    pub installed_at: i64,
}

impl ExtensionRecord {
    /// Disabled record for a freshly installed package.
    pub fn from_manifest(manifest: &Manifest, config: ConfigMap) -> Result<Self, ManifestError> {
        Ok(Self {
            code: manifest.code.clone(),
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            kind: manifest.extension_type()?,
            enabled: false,
            config,
            installed_at: now_millis(),
        })
    }
}

/// Registry contract over durable storage.
pub trait Registry {
    fn find(&self, code: &str) -> RegistryResult<Option<ExtensionRecord>>;
    fn exists_enabled(&self, code: &str) -> RegistryResult<bool>;
    fn list(&self) -> RegistryResult<Vec<ExtensionRecord>>;
    fn list_enabled(&self) -> RegistryResult<Vec<ExtensionRecord>>;
    fn create(&self, record: &ExtensionRecord) -> RegistryResult<()>;
    fn set_enabled(&self, code: &str, enabled: bool) -> RegistryResult<()>;
    fn update_version(&self, code: &str, version: &str) -> RegistryResult<()>;
    fn update_config(&self, code: &str, config: &ConfigMap) -> RegistryResult<()>;
    /// Removes a record; protected codes are rejected.
    fn delete(&self, code: &str) -> RegistryResult<()>;
    /// Removes a record whose package no longer resolves. Skips the
    /// protected check; returns whether a row was removed.
    fn delete_orphan(&self, code: &str) -> RegistryResult<bool>;
    fn is_protected(&self, code: &str) -> bool;
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
        })
}
