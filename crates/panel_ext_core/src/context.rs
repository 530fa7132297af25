//! Application context: the single owner of process-wide runtime state.

use crate::config::RuntimeConfig;
use crate::db::{open_db, DbResult};
use crate::extension::assets::AssetPublisher;
use crate::extension::loader::{ExtensionLoader, FactoryTable};
use crate::extension::package_store::PackageStore;
use crate::extension::surface::HostSurface;
use crate::hooks::HookDispatcher;
use rusqlite::Connection;
use std::sync::Arc;

/// Owns the dispatcher, package store, asset publisher, loader and host
/// surface. Components receive it by reference.
pub struct AppContext {
    config: RuntimeConfig,
    hooks: Arc<HookDispatcher>,
    packages: PackageStore,
    assets: AssetPublisher,
    loader: ExtensionLoader,
    host: Arc<dyn HostSurface>,
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("config", &self.config)
            .field("hooks", &self.hooks)
            .field("loader", &self.loader)
            .finish_non_exhaustive()
    }
}

impl AppContext {
    pub fn new(config: RuntimeConfig, factories: FactoryTable, host: Arc<dyn HostSurface>) -> Self {
        let packages = PackageStore::new(config.packages_dir.clone());
        let assets = AssetPublisher::new(config.public_dir.clone());
        let loader = ExtensionLoader::new(packages.clone(), factories);
        Self {
            config,
            hooks: Arc::new(HookDispatcher::new()),
            packages,
            assets,
            loader,
            host,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn hooks(&self) -> &Arc<HookDispatcher> {
        &self.hooks
    }

    pub fn packages(&self) -> &PackageStore {
        &self.packages
    }

    pub fn assets(&self) -> &AssetPublisher {
        &self.assets
    }

    pub fn loader(&self) -> &ExtensionLoader {
        &self.loader
    }

    pub fn host(&self) -> &dyn HostSurface {
        self.host.as_ref()
    }

    /// Opens the registry database named by the config.
    pub fn open_db(&self) -> DbResult<Connection> {
        open_db(&self.config.database_path)
    }
}
