//! Extension runtime for the admin panel: named hook dispatch plus the
//! lifecycle of installable extension packages.
//!
//! Host code owns one [`AppContext`] and drives transitions through a
//! [`LifecycleManager`] bound to a registry connection.

pub mod config;
pub mod context;
pub mod db;
pub mod extension;
pub mod hooks;
pub mod lifecycle;
pub mod logging;
pub mod migration;
pub mod registry;

pub use config::{ConfigError, LogConfig, RuntimeConfig};
pub use context::AppContext;
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use extension::contract::{
    BootContext, ConfigMap, Extension, ExtensionBase, ExtensionError, PaymentMethod,
};
pub use extension::loader::{ExtensionFactory, ExtensionLoader, FactoryTable, LoadError};
pub use extension::manifest::{ConfigField, ExtensionType, Manifest, ManifestError};
pub use extension::surface::{
    CommandDecl, ExtensionSurface, HostSurface, RecordingHost, RouteDecl, Schedule, ScheduledJob,
};
pub use hooks::{
    catch_intercept, intercept, HookDispatcher, HookError, InterceptSignal, RequestOutcome,
    DEFAULT_PRIORITY,
};
pub use lifecycle::{
    ConfigEntry, LifecycleError, LifecycleManager, LifecycleResult, PackageRow, PaymentMethodInfo,
    UploadOutcome,
};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use migration::{MigrationError, MigrationRunner, SqlMigrationRunner};
pub use registry::{ExtensionRecord, Registry, RegistryError, SqliteRegistry};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
