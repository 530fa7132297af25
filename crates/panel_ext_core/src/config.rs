//! Runtime configuration loaded from TOML.
//!
//! Every key has a default, so an empty file (or no file) is a valid
//! configuration. Relative paths resolve against the config file's directory.

use crate::extension::manifest::is_valid_code;
use crate::extension::version::parse_version;
use crate::logging::default_log_level;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_MAX_ARCHIVE_BYTES: u64 = 32 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Dependency key that names the host in manifest `require` maps.
    pub host_name: String,
    pub host_version: String,
    pub database_path: PathBuf,
    pub packages_dir: PathBuf,
    pub public_dir: PathBuf,
    /// Codes that can never be deleted and are reinstalled at bootstrap.
    pub protected_codes: Vec<String>,
    pub max_archive_bytes: u64,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    /// Absolute log directory; file logging stays off when unset.
    pub dir: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            host_name: "panel".to_string(),
            host_version: env!("CARGO_PKG_VERSION").to_string(),
            database_path: PathBuf::from("data/panel_ext.sqlite3"),
            packages_dir: PathBuf::from("plugins"),
            public_dir: PathBuf::from("public/plugins"),
            protected_codes: Vec::new(),
            max_archive_bytes: DEFAULT_MAX_ARCHIVE_BYTES,
            log: LogConfig::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level().to_string(),
            dir: None,
        }
    }
}

impl RuntimeConfig {
    /// Reads, resolves and validates the config at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = toml::from_str(&raw)?;
        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }
        config.validate()?;
        Ok(config)
    }

    /// Rebases every relative path onto `base`.
    pub fn resolve_relative_to(&mut self, base: &Path) {
        for path in [
            &mut self.database_path,
            &mut self.packages_dir,
            &mut self.public_dir,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        if let Some(dir) = self.log.dir.as_mut().filter(|dir| dir.is_relative()) {
            *dir = base.join(&*dir);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host_name.trim().is_empty() {
            return Err(ConfigError::Invalid("host_name cannot be empty".to_string()));
        }
        if parse_version(&self.host_version).is_none() {
            return Err(ConfigError::Invalid(format!(
                "host_version `{}` is not major.minor.patch",
                self.host_version
            )));
        }
        if let Some(code) = self.protected_codes.iter().find(|code| !is_valid_code(code)) {
            return Err(ConfigError::Invalid(format!(
                "protected code `{code}` is not a valid extension code"
            )));
        }
        if self.max_archive_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_archive_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn host_version(&self) -> Option<semver::Version> {
        parse_version(&self.host_version)
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, RuntimeConfig};
    use std::path::Path;

    #[test]
    fn empty_document_yields_defaults() {
        let config: RuntimeConfig = toml::from_str("").unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_resolves_relative_paths_against_file_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("panel_ext.toml");
        std::fs::write(
            &path,
            r#"
host_version = "2.4.0"
packages_dir = "ext"
public_dir = "/srv/public/plugins"
protected_codes = ["core_auth"]

[log]
dir = "logs"
"#,
        )
        .unwrap();

        let config = RuntimeConfig::load(&path).unwrap();
        assert_eq!(config.packages_dir, dir.path().join("ext"));
        assert_eq!(config.public_dir, Path::new("/srv/public/plugins"));
        assert_eq!(config.log.dir, Some(dir.path().join("logs")));
        assert_eq!(config.protected_codes, vec!["core_auth".to_string()]);
        assert_eq!(config.host_version().unwrap().minor, 4);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = RuntimeConfig {
            host_version: "2.4".to_string(),
            ..RuntimeConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.host_version = "2.4.0".to_string();
        config.protected_codes = vec!["Bad-Code".to_string()];
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.protected_codes.clear();
        config.max_archive_bytes = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
