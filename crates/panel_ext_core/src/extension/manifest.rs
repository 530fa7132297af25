//! Extension package manifest declaration and validation.

use crate::extension::version::{is_semver_triplet, parse_version, Constraint};
use once_cell::sync::Lazy;
use regex::Regex;
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name of the manifest inside each package root.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

static CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9_]+$").expect("valid code regex"));

/// Returns whether `value` is a valid extension code (`^[a-z0-9_]+$`).
pub fn is_valid_code(value: &str) -> bool {
    CODE_RE.is_match(value)
}

/// Extension category shown in the admin panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionType {
    Feature,
    Payment,
}

impl ExtensionType {
    pub const ALL: [ExtensionType; 2] = [ExtensionType::Feature, ExtensionType::Payment];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Feature => "feature",
            Self::Payment => "payment",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "feature" => Some(Self::Feature),
            "payment" => Some(Self::Payment),
            _ => None,
        }
    }

    /// User-facing label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Feature => "Feature",
            Self::Payment => "Payment method",
        }
    }
}

impl std::fmt::Display for ExtensionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a manifest's `config` schema.
///
/// Only `default` is interpreted; everything else (`type`, `label`,
/// `options`, ...) is carried through for the admin view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigField {
    #[serde(default)]
    pub default: Value,
    #[serde(flatten)]
    pub meta: Map<String, Value>,
}

/// Declarative extension package manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    /// Raw `type` value; see [`Manifest::extension_type`].
    #[serde(rename = "type", default = "default_type")]
    pub kind: String,
    #[serde(default)]
    pub config: BTreeMap<String, ConfigField>,
    /// Dependency name -> version constraint.
    #[serde(default, alias = "requires")]
    pub require: BTreeMap<String, String>,
    /// Factory symbol resolving the implementation; defaults to `code`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
}

fn default_type() -> String {
    ExtensionType::Feature.as_str().to_string()
}

impl Manifest {
    pub fn from_json(raw: &str) -> Result<Self, ManifestError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Reads `manifest.json` from a package root. Does not validate.
    pub fn load(package_dir: &Path) -> Result<Self, ManifestError> {
        let path = package_dir.join(MANIFEST_FILE_NAME);
        let raw = std::fs::read_to_string(&path)
            .map_err(|source| ManifestError::Read { path, source })?;
        Self::from_json(&raw)
    }

    /// Validates declaration-level manifest invariants.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.name.trim().is_empty() {
            return Err(ManifestError::MissingField("name"));
        }
        if self.code.is_empty() {
            return Err(ManifestError::MissingField("code"));
        }
        if !is_valid_code(&self.code) {
            return Err(ManifestError::InvalidCode(self.code.clone()));
        }
        if self.version.is_empty() {
            return Err(ManifestError::MissingField("version"));
        }
        if !is_semver_triplet(&self.version) {
            return Err(ManifestError::InvalidVersion(self.version.clone()));
        }
        self.extension_type()?;

        if self.config.keys().any(|key| key.trim().is_empty()) {
            return Err(ManifestError::EmptyConfigKey);
        }
        if let Some(entry) = &self.entry {
            if entry.trim().is_empty() {
                return Err(ManifestError::MissingField("entry"));
            }
        }
        self.constraints()?;
        Ok(())
    }

    pub fn extension_type(&self) -> Result<ExtensionType, ManifestError> {
        ExtensionType::parse(&self.kind)
            .ok_or_else(|| ManifestError::UnsupportedType(self.kind.clone()))
    }

    pub fn parsed_version(&self) -> Result<Version, ManifestError> {
        parse_version(&self.version).ok_or_else(|| ManifestError::InvalidVersion(self.version.clone()))
    }

    /// Parsed `require` map, in dependency-name order.
    pub fn constraints(&self) -> Result<Vec<(String, Constraint)>, ManifestError> {
        self.require
            .iter()
            .map(|(dependency, raw)| {
                Constraint::parse(raw)
                    .map(|constraint| (dependency.clone(), constraint))
                    .map_err(|_| ManifestError::InvalidConstraint {
                        dependency: dependency.clone(),
                        constraint: raw.clone(),
                    })
            })
            .collect()
    }

    /// Initial stored config: every schema key mapped to its default.
    pub fn default_config(&self) -> Map<String, Value> {
        self.config
            .iter()
            .map(|(key, field)| (key.clone(), field.default.clone()))
            .collect()
    }

    pub fn entry_symbol(&self) -> &str {
        self.entry.as_deref().unwrap_or(&self.code)
    }
}

/// Manifest read and validation errors.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("manifest is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("manifest missing required field: {0}")]
    MissingField(&'static str),
    #[error("manifest code is invalid: {0} (expected [a-z0-9_]+)")]
    InvalidCode(String),
    #[error("manifest version is invalid: {0} (expected major.minor.patch)")]
    InvalidVersion(String),
    #[error("manifest type is unsupported: {0}")]
    UnsupportedType(String),
    #[error("manifest requirement `{dependency}` has invalid constraint `{constraint}`")]
    InvalidConstraint {
        dependency: String,
        constraint: String,
    },
    #[error("manifest config contains an empty key")]
    EmptyConfigKey,
    #[error("manifest code `{found}` does not match package directory `{expected}`")]
    CodeMismatch { expected: String, found: String },
}

#[cfg(test)]
mod tests {
    use super::{is_valid_code, ExtensionType, Manifest, ManifestError};
    use serde_json::json;

    fn valid_manifest() -> Manifest {
        serde_json::from_value(json!({
            "name": "Telegram Notify",
            "code": "telegram_notify",
            "version": "1.2.0",
            "description": "Pushes order events to Telegram",
            "author": "ops",
            "type": "feature",
            "config": {
                "bot_token": { "default": "", "type": "string", "label": "Bot token" },
                "retries": { "default": 3 }
            },
            "require": { "panel": ">=0.1.0" }
        }))
        .unwrap()
    }

    #[test]
    fn validates_full_manifest() {
        let manifest = valid_manifest();
        manifest.validate().unwrap();
        assert_eq!(manifest.extension_type().unwrap(), ExtensionType::Feature);
        assert_eq!(manifest.entry_symbol(), "telegram_notify");
    }

    #[test]
    fn type_defaults_to_feature() {
        let manifest = Manifest::from_json(
            r#"{"name":"A","code":"a","version":"1.0.0","description":"","author":""}"#,
        )
        .unwrap();
        assert_eq!(manifest.extension_type().unwrap(), ExtensionType::Feature);
    }

    #[test]
    fn default_config_keeps_schema_defaults_and_metadata_stays_aside() {
        let manifest = valid_manifest();
        let defaults = manifest.default_config();
        assert_eq!(defaults.get("bot_token"), Some(&json!("")));
        assert_eq!(defaults.get("retries"), Some(&json!(3)));
        assert_eq!(manifest.config["bot_token"].meta.get("label"), Some(&json!("Bot token")));
    }

    #[test]
    fn rejects_missing_name() {
        let mut manifest = valid_manifest();
        manifest.name = "  ".to_string();
        assert!(matches!(
            manifest.validate().unwrap_err(),
            ManifestError::MissingField("name")
        ));
    }

    #[test]
    fn rejects_invalid_code_format() {
        let mut manifest = valid_manifest();
        manifest.code = "Telegram-Notify".to_string();
        assert!(matches!(manifest.validate().unwrap_err(), ManifestError::InvalidCode(_)));
    }

    #[test]
    fn rejects_invalid_version_format() {
        let mut manifest = valid_manifest();
        manifest.version = "1.2".to_string();
        assert!(matches!(manifest.validate().unwrap_err(), ManifestError::InvalidVersion(_)));
    }

    #[test]
    fn rejects_versions_semver_cannot_compare() {
        for version in ["01.0.0", "1.02.0", "\u{0661}.0.0"] {
            let mut manifest = valid_manifest();
            manifest.version = version.to_string();
            assert!(
                matches!(manifest.validate().unwrap_err(), ManifestError::InvalidVersion(_)),
                "{version}"
            );
            assert!(manifest.parsed_version().is_err(), "{version}");
        }
    }

    #[test]
    fn rejects_unsupported_type() {
        let mut manifest = valid_manifest();
        manifest.kind = "theme".to_string();
        assert!(matches!(manifest.validate().unwrap_err(), ManifestError::UnsupportedType(_)));
    }

    #[test]
    fn rejects_unparseable_requirement() {
        let mut manifest = valid_manifest();
        manifest.require.insert("panel".to_string(), "newest please".to_string());
        assert!(matches!(
            manifest.validate().unwrap_err(),
            ManifestError::InvalidConstraint { .. }
        ));
    }

    #[test]
    fn accepts_requires_alias() {
        let manifest = Manifest::from_json(
            r#"{"name":"A","code":"a","version":"1.0.0","requires":{"panel":"^1.0"}}"#,
        )
        .unwrap();
        assert_eq!(manifest.require.get("panel").map(String::as_str), Some("^1.0"));
    }

    #[test]
    fn code_pattern_is_lowercase_alnum_underscore() {
        assert!(is_valid_code("epay_v2"));
        assert!(!is_valid_code(""));
        assert!(!is_valid_code("e.pay"));
        assert!(!is_valid_code("EPay"));
    }
}
