//! Code -> implementation resolution through an explicit factory table, with
//! a per-process instance cache.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use log::{info, warn};
use thiserror::Error;

use crate::extension::contract::Extension;
use crate::extension::manifest::Manifest;
use crate::extension::package_store::{PackageError, PackageStore};

/// Builds an extension instance from its (validated) manifest.
pub type ExtensionFactory = Arc<dyn Fn(&Manifest) -> Arc<dyn Extension> + Send + Sync>;

#[derive(Debug, Error)]
pub enum LoadError {
    /// No package on disk, or no factory for its entry symbol.
    #[error("no implementation resolves extension `{0}`")]
    PackageNotFound(String),
    #[error(transparent)]
    Package(PackageError),
    #[error("factory for `{expected}` produced an extension reporting code `{found}`")]
    ContractMismatch { expected: String, found: String },
}

impl From<PackageError> for LoadError {
    fn from(value: PackageError) -> Self {
        match value {
            PackageError::NotFound(code) => Self::PackageNotFound(code),
            other => Self::Package(other),
        }
    }
}

/// Entry symbol -> factory lookup table, built once at startup.
#[derive(Clone, Default)]
pub struct FactoryTable {
    factories: BTreeMap<String, ExtensionFactory>,
}

impl std::fmt::Debug for FactoryTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryTable")
            .field("entries", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FactoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` under `entry`, replacing any earlier one.
    pub fn register<F>(&mut self, entry: &str, factory: F)
    where
        F: Fn(&Manifest) -> Arc<dyn Extension> + Send + Sync + 'static,
    {
        if self
            .factories
            .insert(entry.to_string(), Arc::new(factory))
            .is_some()
        {
            warn!("event=factory_register module=loader status=replaced entry={entry}");
        }
    }

    pub fn with<F>(mut self, entry: &str, factory: F) -> Self
    where
        F: Fn(&Manifest) -> Arc<dyn Extension> + Send + Sync + 'static,
    {
        self.register(entry, factory);
        self
    }

    pub fn get(&self, entry: &str) -> Option<&ExtensionFactory> {
        self.factories.get(entry)
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

/// Resolves and caches extension instances.
pub struct ExtensionLoader {
    packages: PackageStore,
    factories: FactoryTable,
    cache: Mutex<HashMap<String, Arc<dyn Extension>>>,
}

impl std::fmt::Debug for ExtensionLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionLoader")
            .field("packages", &self.packages)
            .field("factories", &self.factories)
            .field("cached", &self.lock_cache().len())
            .finish()
    }
}

impl ExtensionLoader {
    pub fn new(packages: PackageStore, factories: FactoryTable) -> Self {
        Self {
            packages,
            factories,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached instance for `code`, instantiating it on first use.
    pub fn load(&self, code: &str) -> Result<Arc<dyn Extension>, LoadError> {
        if let Some(instance) = self.lock_cache().get(code) {
            return Ok(Arc::clone(instance));
        }

        let manifest = self.packages.read_manifest(code)?;
        manifest
            .validate()
            .map_err(|err| LoadError::Package(err.into()))?;
        let Some(factory) = self.factories.get(manifest.entry_symbol()) else {
            warn!(
                "event=ext_load module=loader status=error code={code} entry={} error_code=factory_missing",
                manifest.entry_symbol()
            );
            return Err(LoadError::PackageNotFound(code.to_string()));
        };

        let instance = factory(&manifest);
        if instance.code() != code {
            return Err(LoadError::ContractMismatch {
                expected: code.to_string(),
                found: instance.code().to_string(),
            });
        }

        // A concurrent load may have won; keep the first instance.
        let instance = Arc::clone(
            self.lock_cache()
                .entry(code.to_string())
                .or_insert(instance),
        );
        info!(
            "event=ext_load module=loader status=ok code={code} version={} payment={}",
            manifest.version,
            instance.as_payment().is_some()
        );
        Ok(instance)
    }

    /// Drops the cached instance so the next `load` re-reads the package.
    pub fn forget(&self, code: &str) -> bool {
        self.lock_cache().remove(code).is_some()
    }

    pub fn is_cached(&self, code: &str) -> bool {
        self.lock_cache().contains_key(code)
    }

    pub fn factories(&self) -> &FactoryTable {
        &self.factories
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<dyn Extension>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
