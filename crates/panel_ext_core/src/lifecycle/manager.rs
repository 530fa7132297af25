//! State machine over not installed, installed/disabled and
//! installed/enabled.
//!
//! # Invariants
//! - Registry writes of a transition and its extension callback commit
//!   together or not at all.
//! - A failure after package migrations changed the schema surfaces as
//!   [`LifecycleError::PartialLifecycle`].
//! - A record whose package no longer resolves is removed on first load.
//! - Codes outside `[a-z0-9_]+` are rejected before touching disk or registry.

use super::error::{LifecycleError, LifecycleResult};
use crate::context::AppContext;
use crate::extension::contract::{BootContext, ConfigMap, Extension, ExtensionError};
use crate::extension::loader::LoadError;
use crate::extension::manifest::{is_valid_code, ConfigField, Manifest, ManifestError};
use crate::extension::package_store::PackageError;
use crate::extension::surface::{ExtensionSurface, Schedule};
use crate::extension::version::parse_version;
use crate::migration::{MigrationRunner, SqlMigrationRunner};
use crate::registry::{ExtensionRecord, Registry, RegistryError, SqliteRegistry};
use log::{error, info, warn};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

const VIEWS_DIR: &str = "views";

/// Result of an archive upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadOutcome {
    pub code: String,
    pub version: String,
    /// Whether the code was installed and got upgraded in place.
    pub upgraded: bool,
}

/// An enabled extension exposing the payment capability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentMethodInfo {
    pub code: String,
    pub label: String,
    pub form: BTreeMap<String, ConfigField>,
}

/// Orchestrates lifecycle transitions against one registry connection.
pub struct LifecycleManager<'a> {
    pub(super) ctx: &'a AppContext,
    pub(super) registry: SqliteRegistry<'a>,
    migrations: Box<dyn MigrationRunner + 'a>,
}

impl<'a> LifecycleManager<'a> {
    /// Manager using [`SqlMigrationRunner`] on the same connection.
    pub fn new(ctx: &'a AppContext, conn: &'a Connection) -> Self {
        Self {
            ctx,
            registry: SqliteRegistry::new(conn, ctx.config().protected_codes.iter().cloned()),
            migrations: Box::new(SqlMigrationRunner::new(conn)),
        }
    }

    pub fn with_migration_runner(mut self, runner: impl MigrationRunner + 'a) -> Self {
        self.migrations = Box::new(runner);
        self
    }

    pub fn registry(&self) -> &SqliteRegistry<'a> {
        &self.registry
    }

    pub fn install(&self, code: &str) -> LifecycleResult<ExtensionRecord> {
        self.track("ext_install", code, || {
            self.install_inner(code).inspect_err(|_| {
                self.ctx.loader().forget(code);
            })
        })
    }

    pub fn enable(&self, code: &str) -> LifecycleResult<()> {
        self.track("ext_enable", code, || self.enable_inner(code))
    }

    pub fn disable(&self, code: &str) -> LifecycleResult<()> {
        self.track("ext_disable", code, || self.disable_inner(code))
    }

    pub fn uninstall(&self, code: &str) -> LifecycleResult<()> {
        self.track("ext_uninstall", code, || self.uninstall_inner(code))
    }

    /// Moves an installed extension to the version of its on-disk package.
    pub fn upgrade(&self, code: &str) -> LifecycleResult<ExtensionRecord> {
        self.track("ext_upgrade", code, || self.upgrade_inner(code))
    }

    /// Stages a `.tar.gz` package and swaps it into the packages dir.
    pub fn upload(&self, archive: &[u8]) -> LifecycleResult<UploadOutcome> {
        let started_at = Instant::now();
        info!(
            "event=ext_upload module=lifecycle status=start bytes={}",
            archive.len()
        );
        let result = self.upload_inner(archive);
        match &result {
            Ok(outcome) => info!(
                "event=ext_upload module=lifecycle status=ok code={} version={} upgraded={} duration_ms={}",
                outcome.code,
                outcome.version,
                outcome.upgraded,
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=ext_upload module=lifecycle status=error error_code={} duration_ms={} error={err}",
                err.code(),
                started_at.elapsed().as_millis()
            ),
        }
        result
    }

    /// Uninstalls if needed, then removes the on-disk package.
    pub fn delete(&self, code: &str) -> LifecycleResult<()> {
        self.track("ext_delete", code, || self.delete_inner(code))
    }

    /// Installs and enables every protected code missing from the registry.
    /// Safe to run on every start; returns the codes it installed.
    pub fn install_default_plugins(&self) -> LifecycleResult<Vec<String>> {
        let mut installed = Vec::new();
        for code in &self.ctx.config().protected_codes {
            if self.registry.find(code)?.is_some() {
                continue;
            }
            match self.install(code).and_then(|_| self.enable(code)) {
                Ok(()) => installed.push(code.clone()),
                Err(err) => error!(
                    "event=default_plugin_install module=lifecycle status=error code={code} error_code={} error={err}",
                    err.code()
                ),
            }
        }
        Ok(installed)
    }

    /// Boots every enabled extension for this process. A failing extension
    /// is logged and skipped; returns the codes that booted.
    pub fn boot_enabled(&self) -> LifecycleResult<Vec<String>> {
        let mut booted = Vec::new();
        for record in self.registry.list_enabled()? {
            let code = record.code.as_str();
            let extension = match self.load_or_heal(code) {
                Ok(extension) => extension,
                Err(err) => {
                    warn!(
                        "event=ext_boot module=lifecycle status=skipped code={code} error_code={} error={err}",
                        err.code()
                    );
                    continue;
                }
            };
            extension.set_config(record.config.clone());
            self.ctx.host().mount(code, &self.surface_of(code, extension.as_ref()));
            match self.boot_instance(code, extension.as_ref()) {
                Ok(()) => booted.push(record.code.clone()),
                Err(err) => {
                    self.ctx.hooks().remove_owner(code);
                    self.ctx.host().unmount(code);
                    error!(
                        "event=ext_boot module=lifecycle status=error code={code} error={err}"
                    );
                }
            }
        }
        info!(
            "event=ext_boot_all module=lifecycle status=ok booted={}",
            booted.len()
        );
        Ok(booted)
    }

    /// Scheduler startup pass: injects config and collects jobs from every
    /// enabled extension without booting it. Returns how many contributed.
    pub fn schedule_enabled(&self, schedule: &mut Schedule) -> LifecycleResult<usize> {
        let mut scheduled = 0;
        for record in self.registry.list_enabled()? {
            let extension = match self.load_or_heal(&record.code) {
                Ok(extension) => extension,
                Err(err) => {
                    warn!(
                        "event=ext_schedule module=lifecycle status=skipped code={} error_code={}",
                        record.code,
                        err.code()
                    );
                    continue;
                }
            };
            extension.set_config(record.config.clone());
            let before = schedule.jobs().len();
            extension.schedule(&mut schedule.for_extension(&record.code));
            if schedule.jobs().len() > before {
                scheduled += 1;
            }
        }
        Ok(scheduled)
    }

    /// Enabled extensions exposing the payment capability, in code order.
    pub fn payment_methods(&self) -> LifecycleResult<Vec<PaymentMethodInfo>> {
        let mut methods = Vec::new();
        for record in self.registry.list_enabled()? {
            let extension = match self.load_or_heal(&record.code) {
                Ok(extension) => extension,
                Err(err) => {
                    warn!(
                        "event=payment_list module=lifecycle status=skipped code={} error_code={}",
                        record.code,
                        err.code()
                    );
                    continue;
                }
            };
            if let Some(payment) = extension.as_payment() {
                methods.push(PaymentMethodInfo {
                    code: record.code.clone(),
                    label: payment.label(),
                    form: payment.form().into_iter().collect(),
                });
            }
        }
        Ok(methods)
    }

    fn install_inner(&self, code: &str) -> LifecycleResult<ExtensionRecord> {
        let manifest = self.ctx.packages().read_manifest(code)?;
        manifest.validate()?;
        self.check_requirements(&manifest)?;
        if self.registry.find(code)?.is_some() {
            return Err(LifecycleError::DuplicateInstall(code.to_string()));
        }

        let package_dir = self.ctx.packages().package_dir(code)?;
        let applied = self.migrations.migrate(code, &package_dir)?;

        self.atomic(code, "install", applied > 0, || {
            let record = ExtensionRecord::from_manifest(&manifest, manifest.default_config())?;
            self.registry.create(&record)?;

            let extension = self.ctx.loader().load(code)?;
            extension.set_config(record.config.clone());
            extension
                .install()
                .map_err(|source| LifecycleError::extension(code, source))?;

            let published = self.ctx.assets().publish(code, &package_dir)?;
            info!(
                "event=ext_install_section module=lifecycle status=ok code={code} migrations={applied} assets={published}"
            );
            Ok(record)
        })
    }

    fn enable_inner(&self, code: &str) -> LifecycleResult<()> {
        let record = self.require_record(code)?;
        let extension = self.load_or_heal(code)?;
        extension.set_config(record.config);

        self.ctx.host().mount(code, &self.surface_of(code, extension.as_ref()));
        if let Err(err) = self.registry.set_enabled(code, true) {
            self.ctx.host().unmount(code);
            return Err(err.into());
        }

        // Re-enabling must not stack listeners from an earlier boot.
        self.ctx.hooks().remove_owner(code);
        if let Err(source) = self.boot_instance(code, extension.as_ref()) {
            self.ctx.hooks().remove_owner(code);
            self.ctx.host().unmount(code);
            if let Err(err) = self.registry.set_enabled(code, false) {
                error!(
                    "event=ext_enable_revert module=lifecycle status=error code={code} error={err}"
                );
            }
            return Err(LifecycleError::extension(code, source));
        }
        Ok(())
    }

    fn disable_inner(&self, code: &str) -> LifecycleResult<()> {
        self.require_record(code)?;
        self.registry.set_enabled(code, false)?;
        let removed = self.ctx.hooks().remove_owner(code);
        self.ctx.host().unmount(code);

        match self.load_or_heal(code) {
            Ok(extension) => {
                if let Err(err) = extension.cleanup() {
                    warn!(
                        "event=ext_cleanup module=lifecycle status=error code={code} error={err}"
                    );
                }
            }
            Err(err @ LifecycleError::PackageNotFound(_)) => return Err(err),
            Err(err) => warn!(
                "event=ext_cleanup module=lifecycle status=skipped code={code} error={err}"
            ),
        }
        info!("event=ext_hooks_removed module=lifecycle status=ok code={code} listeners={removed}");
        Ok(())
    }

    fn uninstall_inner(&self, code: &str) -> LifecycleResult<()> {
        if self.registry.is_protected(code) {
            return Err(LifecycleError::ProtectedPlugin(code.to_string()));
        }
        let record = self.require_record(code)?;
        if record.enabled {
            warn!("event=forced_disable module=lifecycle status=ok code={code} reason=uninstall");
            self.disable_inner(code)?;
        }

        let package_dir = self.ctx.packages().package_dir(code)?;
        let reverted = self.migrations.rollback(code, &package_dir)?;
        if let Err(err) = self.registry.delete(code) {
            let err = LifecycleError::from(err);
            if reverted > 0 {
                return Err(self.partial(code, "uninstall", err));
            }
            return Err(err);
        }

        if let Err(err) = self.ctx.assets().unpublish(code) {
            warn!("event=asset_unpublish module=lifecycle status=error code={code} error={err}");
        }
        self.ctx.loader().forget(code);
        Ok(())
    }

    fn upgrade_inner(&self, code: &str) -> LifecycleResult<ExtensionRecord> {
        let record = self.require_record(code)?;
        let manifest = self.ctx.packages().read_manifest(code)?;
        manifest.validate()?;

        let installed = parse_version(&record.version).ok_or_else(|| {
            LifecycleError::Registry(RegistryError::InvalidData(format!(
                "extensions.version `{}` of `{code}` is not major.minor.patch",
                record.version
            )))
        })?;
        let candidate = manifest.parsed_version()?;
        if candidate <= installed {
            return Err(LifecycleError::UpgradeVersion {
                code: code.to_string(),
                installed: record.version,
                candidate: manifest.version,
            });
        }
        self.check_requirements(&manifest)?;

        if record.enabled {
            self.disable_inner(code)?;
        }
        let applied = self.apply_upgrade(code, &manifest, &record.config, &installed, &candidate);
        if let Err(err) = applied {
            if record.enabled {
                self.restore_enabled(code);
            }
            return Err(err);
        }

        self.enable_inner(code)?;
        info!(
            "event=ext_version_change module=lifecycle status=ok code={code} from={installed} to={candidate}"
        );
        self.require_record(code)
    }

    /// Migration, `update()` callback and registry writes of an upgrade.
    fn apply_upgrade(
        &self,
        code: &str,
        manifest: &Manifest,
        stored: &ConfigMap,
        installed: &semver::Version,
        candidate: &semver::Version,
    ) -> LifecycleResult<()> {
        // The cached instance belongs to the previous package.
        self.ctx.loader().forget(code);

        let package_dir = self.ctx.packages().package_dir(code)?;
        let applied = self.migrations.migrate(code, &package_dir)?;
        let config = merged_config(manifest, stored);

        self.atomic(code, "upgrade", applied > 0, || {
            let extension = self.ctx.loader().load(code)?;
            extension.set_config(config.clone());
            extension
                .update(installed, candidate)
                .map_err(|source| LifecycleError::extension(code, source))?;
            self.registry.update_version(code, &manifest.version)?;
            self.registry.update_config(code, &config)?;
            self.ctx.assets().publish(code, &package_dir)?;
            Ok(())
        })
        .inspect_err(|_| {
            self.ctx.loader().forget(code);
        })
    }

    /// Re-enables an extension whose upgrade failed after it was disabled.
    fn restore_enabled(&self, code: &str) {
        match self.enable_inner(code) {
            Ok(()) => warn!("event=ext_upgrade_restore module=lifecycle status=ok code={code}"),
            Err(err) => error!(
                "event=ext_upgrade_restore module=lifecycle status=error code={code} error_code={} error={err}",
                err.code()
            ),
        }
    }

    fn upload_inner(&self, archive: &[u8]) -> LifecycleResult<UploadOutcome> {
        let packages = self.ctx.packages();
        let staged = packages
            .stage_archive(archive, self.ctx.config().max_archive_bytes)
            .map_err(|err| match err {
                PackageError::Io { .. } => LifecycleError::Package(err),
                other => LifecycleError::ArchiveFormat(other.to_string()),
            })?;
        let code = staged.manifest().code.clone();
        let version = staged.manifest().version.clone();
        let candidate = staged.manifest().parsed_version()?;
        let must_exceed = |current: &str| -> LifecycleResult<()> {
            match parse_version(current) {
                Some(current) if candidate > current => Ok(()),
                _ => Err(LifecycleError::UpgradeVersion {
                    code: code.clone(),
                    installed: current.to_string(),
                    candidate: version.clone(),
                }),
            }
        };

        if let Some(record) = self.registry.find(&code)? {
            must_exceed(&record.version)?;
        }
        if packages.contains(&code) {
            match packages.read_manifest(&code) {
                Ok(existing) => must_exceed(&existing.version)?,
                Err(err) => warn!(
                    "event=ext_upload module=lifecycle status=replacing code={code} reason=unreadable_manifest error={err}"
                ),
            }
        }

        packages.commit(staged)?;
        self.ctx.loader().forget(&code);

        let upgraded = if self.registry.find(&code)?.is_some() {
            self.upgrade(&code)?;
            true
        } else {
            false
        };
        Ok(UploadOutcome {
            code,
            version,
            upgraded,
        })
    }

    fn delete_inner(&self, code: &str) -> LifecycleResult<()> {
        if self.registry.is_protected(code) {
            return Err(LifecycleError::ProtectedPlugin(code.to_string()));
        }
        if self.registry.find(code)?.is_some() {
            self.uninstall_inner(code)?;
        }
        self.ctx.packages().remove(code)?;
        self.ctx.loader().forget(code);
        Ok(())
    }

    /// Checks each `require` entry against the host version or the
    /// installed version of another extension.
    fn check_requirements(&self, manifest: &Manifest) -> LifecycleResult<()> {
        let config = self.ctx.config();
        for (dependency, constraint) in manifest.constraints()? {
            let found = if dependency == config.host_name {
                config.host_version()
            } else {
                self.registry
                    .find(&dependency)?
                    .and_then(|record| parse_version(&record.version))
            };
            if !found.as_ref().is_some_and(|version| constraint.matches(version)) {
                return Err(LifecycleError::Dependency {
                    code: manifest.code.clone(),
                    dependency,
                    constraint: constraint.as_str().to_string(),
                    found: found.map(|version| version.to_string()),
                });
            }
        }
        Ok(())
    }

    pub(super) fn require_record(&self, code: &str) -> LifecycleResult<ExtensionRecord> {
        self.registry
            .find(code)?
            .ok_or_else(|| LifecycleError::NotInstalled(code.to_string()))
    }

    /// Loads `code`, deleting its registry record if no package resolves.
    pub(super) fn load_or_heal(&self, code: &str) -> LifecycleResult<Arc<dyn Extension>> {
        match self.ctx.loader().load(code) {
            Ok(extension) => Ok(extension),
            Err(LoadError::PackageNotFound(_)) => {
                self.ctx.hooks().remove_owner(code);
                self.ctx.host().unmount(code);
                match self.registry.delete_orphan(code) {
                    Ok(true) => warn!(
                        "event=orphan_record_removed module=lifecycle status=ok code={code}"
                    ),
                    Ok(false) => {}
                    Err(err) => error!(
                        "event=orphan_record_removed module=lifecycle status=error code={code} error={err}"
                    ),
                }
                Err(LifecycleError::PackageNotFound(code.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn boot_instance(&self, code: &str, extension: &dyn Extension) -> Result<(), ExtensionError> {
        let mut boot = BootContext::new(code, self.ctx.hooks());
        extension.boot(&mut boot)?;
        info!(
            "event=ext_boot module=lifecycle status=ok code={code} hooks={}",
            self.ctx.hooks().hook_names().len()
        );
        Ok(())
    }

    fn surface_of(&self, code: &str, extension: &dyn Extension) -> ExtensionSurface {
        let views_dir = self
            .ctx
            .packages()
            .package_dir(code)
            .ok()
            .map(|dir| dir.join(VIEWS_DIR))
            .filter(|views| views.is_dir());
        ExtensionSurface {
            routes: extension.routes(),
            commands: extension.commands(),
            views_dir,
        }
    }

    /// Runs `body` inside one registry transaction. When package migrations
    /// already changed the schema, a failure becomes `PartialLifecycle`.
    fn atomic<T>(
        &self,
        code: &str,
        stage: &'static str,
        migrated: bool,
        body: impl FnOnce() -> LifecycleResult<T>,
    ) -> LifecycleResult<T> {
        let tx = self.registry.connection().unchecked_transaction()?;
        let result = match body() {
            Ok(value) => tx.commit().map(|()| value).map_err(LifecycleError::from),
            Err(err) => {
                if let Err(rollback) = tx.rollback() {
                    error!(
                        "event=ext_{stage}_rollback module=lifecycle status=error code={code} error={rollback}"
                    );
                }
                Err(err)
            }
        };
        match result {
            Err(err) if migrated && !matches!(err, LifecycleError::DuplicateInstall(_)) => {
                Err(self.partial(code, stage, err))
            }
            other => other,
        }
    }

    fn partial(&self, code: &str, stage: &'static str, source: LifecycleError) -> LifecycleError {
        error!(
            "event=ext_{stage} module=lifecycle status=partial code={code} error_code={} error={source}",
            source.code()
        );
        LifecycleError::PartialLifecycle {
            code: code.to_string(),
            stage,
            source: Box::new(source),
        }
    }

    fn track<T>(
        &self,
        event: &str,
        code: &str,
        operation: impl FnOnce() -> LifecycleResult<T>,
    ) -> LifecycleResult<T> {
        let started_at = Instant::now();
        info!("event={event} module=lifecycle status=start code={code}");
        let result = check_code(code).and_then(|()| operation());
        let duration_ms = started_at.elapsed().as_millis();
        match &result {
            Ok(_) => info!(
                "event={event} module=lifecycle status=ok code={code} duration_ms={duration_ms}"
            ),
            Err(err) => error!(
                "event={event} module=lifecycle status=error code={code} error_code={} duration_ms={duration_ms} error={err}",
                err.code()
            ),
        }
        result
    }
}

pub(super) fn check_code(code: &str) -> LifecycleResult<()> {
    if is_valid_code(code) {
        Ok(())
    } else {
        Err(ManifestError::InvalidCode(code.to_string()).into())
    }
}

/// Stored config layered over the manifest's defaults.
pub(super) fn merged_config(manifest: &Manifest, stored: &ConfigMap) -> ConfigMap {
    let mut config = manifest.default_config();
    config.extend(stored.clone());
    config
}
