use crate::db::DbError;
use crate::extension::contract::ExtensionError;
use crate::extension::loader::LoadError;
use crate::extension::manifest::ManifestError;
use crate::extension::package_store::PackageError;
use crate::migration::MigrationError;
use crate::registry::RegistryError;
use thiserror::Error;

pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Typed failure of an administrative operation.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("`{code}` requires {dependency} {constraint}, found {}", .found.as_deref().unwrap_or("nothing"))]
    Dependency {
        code: String,
        dependency: String,
        constraint: String,
        found: Option<String>,
    },
    #[error("extension `{0}` is already installed")]
    DuplicateInstall(String),
    #[error("no package resolves extension `{0}`")]
    PackageNotFound(String),
    #[error("extension `{0}` is not installed")]
    NotInstalled(String),
    #[error("extension `{0}` is protected")]
    ProtectedPlugin(String),
    #[error("`{code}` version {candidate} is not newer than {installed}")]
    UpgradeVersion {
        code: String,
        installed: String,
        candidate: String,
    },
    #[error("archive rejected: {0}")]
    ArchiveFormat(String),
    #[error("`{code}` partially applied during {stage}; manual reconciliation required: {source}")]
    PartialLifecycle {
        code: String,
        stage: &'static str,
        #[source]
        source: Box<LifecycleError>,
    },
    #[error("`{expected}` resolved to an implementation reporting `{found}`")]
    ContractMismatch { expected: String, found: String },
    #[error(transparent)]
    Registry(RegistryError),
    #[error(transparent)]
    Package(PackageError),
    #[error(transparent)]
    Migration(#[from] MigrationError),
    #[error("extension `{code}` failed: {source}")]
    Extension {
        code: String,
        #[source]
        source: ExtensionError,
    },
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl LifecycleError {
    /// Stable identifier for client-visible error mapping.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Manifest(_) => "manifest_error",
            Self::Dependency { .. } => "dependency_error",
            Self::DuplicateInstall(_) => "duplicate_install",
            Self::PackageNotFound(_) => "package_not_found",
            Self::NotInstalled(_) => "not_installed",
            Self::ProtectedPlugin(_) => "protected_plugin",
            Self::UpgradeVersion { .. } => "upgrade_version",
            Self::ArchiveFormat(_) => "archive_format",
            Self::PartialLifecycle { .. } => "partial_lifecycle",
            Self::ContractMismatch { .. } => "contract_mismatch",
            Self::Registry(_) => "registry_error",
            Self::Package(_) => "package_error",
            Self::Migration(_) => "migration_error",
            Self::Extension { .. } => "extension_error",
            Self::InvalidConfig(_) => "invalid_config",
        }
    }

    pub(crate) fn extension(code: &str, source: ExtensionError) -> Self {
        Self::Extension {
            code: code.to_string(),
            source,
        }
    }
}

impl From<RegistryError> for LifecycleError {
    fn from(value: RegistryError) -> Self {
        match value {
            RegistryError::DuplicateCode(code) => Self::DuplicateInstall(code),
            RegistryError::NotFound(code) => Self::NotInstalled(code),
            RegistryError::Protected(code) => Self::ProtectedPlugin(code),
            other => Self::Registry(other),
        }
    }
}

impl From<DbError> for LifecycleError {
    fn from(value: DbError) -> Self {
        Self::Registry(RegistryError::Db(value))
    }
}

impl From<rusqlite::Error> for LifecycleError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Registry(value.into())
    }
}

impl From<PackageError> for LifecycleError {
    fn from(value: PackageError) -> Self {
        match value {
            PackageError::NotFound(code) => Self::PackageNotFound(code),
            PackageError::Manifest(err) => Self::Manifest(err),
            other => Self::Package(other),
        }
    }
}

impl From<LoadError> for LifecycleError {
    fn from(value: LoadError) -> Self {
        match value {
            LoadError::PackageNotFound(code) => Self::PackageNotFound(code),
            LoadError::Package(err) => err.into(),
            LoadError::ContractMismatch { expected, found } => {
                Self::ContractMismatch { expected, found }
            }
        }
    }
}
