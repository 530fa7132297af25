//! The contract every extension implementation satisfies.

use std::sync::{Arc, PoisonError, RwLock};

use semver::Version;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::extension::manifest::{ConfigField, Manifest};
use crate::extension::surface::{CommandDecl, RouteDecl, ScheduleRegistrar};
use crate::hooks::{BoxError, HookDispatcher, HookError, HookRegistrar};

/// Stored extension configuration (key -> value).
pub type ConfigMap = Map<String, Value>;

/// Failure reported by an extension callback.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ExtensionError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl ExtensionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

impl From<HookError> for ExtensionError {
    fn from(value: HookError) -> Self {
        Self::with_source("hook dispatch failed", value)
    }
}

/// Identity and configuration state shared by every extension.
///
/// Implementations embed one and return it from [`Extension::base`]; the
/// config accessors of the trait delegate here.
#[derive(Debug)]
pub struct ExtensionBase {
    code: String,
    config: RwLock<ConfigMap>,
}

impl ExtensionBase {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            config: RwLock::new(ConfigMap::new()),
        }
    }

    pub fn from_manifest(manifest: &Manifest) -> Self {
        let base = Self::new(manifest.code.clone());
        base.set_config(manifest.default_config());
        base
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn config(&self) -> ConfigMap {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_config(&self, config: ConfigMap) {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}

/// Everything an extension may touch while booting.
pub struct BootContext<'a> {
    hooks: HookRegistrar<'a>,
    dispatcher: &'a Arc<HookDispatcher>,
}

impl<'a> BootContext<'a> {
    pub fn new(code: &str, dispatcher: &'a Arc<HookDispatcher>) -> Self {
        Self {
            hooks: dispatcher.registrar(code),
            dispatcher,
        }
    }

    /// Registrar whose listeners are owned by the booting extension.
    pub fn hooks(&self) -> &HookRegistrar<'a> {
        &self.hooks
    }

    /// Shared dispatcher handle, for listeners that dispatch other hooks.
    pub fn dispatcher(&self) -> Arc<HookDispatcher> {
        Arc::clone(self.dispatcher)
    }
}

/// Payment capability, exposed through the host's payment-method listing.
pub trait PaymentMethod: Send + Sync {
    /// Name shown to customers at checkout.
    fn label(&self) -> String;

    /// Gateway settings form rendered by the admin panel.
    fn form(&self) -> Vec<(String, ConfigField)> {
        Vec::new()
    }
}

/// Extension contract.
///
/// Lifecycle callbacks default to no-ops so simple extensions only implement
/// [`Extension::base`] and [`Extension::boot`].
pub trait Extension: Send + Sync {
    fn base(&self) -> &ExtensionBase;

    fn code(&self) -> &str {
        self.base().code()
    }

    fn config(&self) -> ConfigMap {
        self.base().config()
    }

    fn set_config(&self, config: ConfigMap) {
        self.base().set_config(config);
    }

    /// Registers hooks. Runs on enable and at every process start.
    fn boot(&self, _ctx: &mut BootContext<'_>) -> Result<(), ExtensionError> {
        Ok(())
    }

    /// Runs once, inside the install transaction.
    fn install(&self) -> Result<(), ExtensionError> {
        Ok(())
    }

    /// Runs after the extension was disabled.
    fn cleanup(&self) -> Result<(), ExtensionError> {
        Ok(())
    }

    /// Runs inside the upgrade transaction, after forward migrations.
    fn update(&self, _from: &Version, _to: &Version) -> Result<(), ExtensionError> {
        Ok(())
    }

    /// Registers time-based jobs; called by the scheduler without `boot`.
    fn schedule(&self, _schedule: &mut ScheduleRegistrar<'_>) {}

    fn routes(&self) -> Vec<RouteDecl> {
        Vec::new()
    }

    fn commands(&self) -> Vec<CommandDecl> {
        Vec::new()
    }

    fn as_payment(&self) -> Option<&dyn PaymentMethod> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::{Extension, ExtensionBase};
    use serde_json::json;

    struct Bare {
        base: ExtensionBase,
    }

    impl Extension for Bare {
        fn base(&self) -> &ExtensionBase {
            &self.base
        }
    }

    #[test]
    fn config_accessors_delegate_to_base() {
        let ext = Bare {
            base: ExtensionBase::new("bare"),
        };
        let mut config = super::ConfigMap::new();
        config.insert("limit".to_string(), json!(5));
        ext.set_config(config);

        assert_eq!(ext.code(), "bare");
        assert_eq!(ext.base().get("limit"), Some(json!(5)));
        assert!(ext.as_payment().is_none());
        assert!(ext.install().is_ok());
    }
}
