//! Shared fixtures: scratch packages dir, registry database and a factory
//! table of test extensions.
#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use flate2::write::GzEncoder;
use flate2::Compression;
use panel_ext_core::extension::surface::ScheduleRegistrar;
use panel_ext_core::{
    AppContext, BootContext, ConfigField, Extension, ExtensionBase, ExtensionError, FactoryTable,
    LifecycleManager, Manifest, PaymentMethod, RecordingHost, RouteDecl, RuntimeConfig,
};
use rusqlite::Connection;
use semver::Version;
use serde_json::{json, Value};
use tempfile::TempDir;

pub const LOGIN_HOOK: &str = "user.login.after";

/// Observable side effects of the test extensions.
#[derive(Debug, Default)]
pub struct Effects {
    pub logins: AtomicUsize,
    pub installs: AtomicUsize,
    pub cleanups: AtomicUsize,
    pub updates: Mutex<Vec<(String, String)>>,
}

impl Effects {
    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }
}

/// Feature extension that counts `user.login.after` broadcasts.
pub struct LoginCounter {
    base: ExtensionBase,
    effects: Arc<Effects>,
    fail_install: bool,
    fail_boot: bool,
}

impl Extension for LoginCounter {
    fn base(&self) -> &ExtensionBase {
        &self.base
    }

    fn boot(&self, ctx: &mut BootContext<'_>) -> Result<(), ExtensionError> {
        if self.fail_boot {
            return Err(ExtensionError::new("boot refused"));
        }
        let effects = Arc::clone(&self.effects);
        ctx.hooks().register(LOGIN_HOOK, move |_args| {
            effects.logins.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        Ok(())
    }

    fn install(&self) -> Result<(), ExtensionError> {
        if self.fail_install {
            return Err(ExtensionError::new("install refused"));
        }
        self.effects.installs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn cleanup(&self) -> Result<(), ExtensionError> {
        self.effects.cleanups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn update(&self, from: &Version, to: &Version) -> Result<(), ExtensionError> {
        self.effects
            .updates
            .lock()
            .unwrap()
            .push((from.to_string(), to.to_string()));
        Ok(())
    }

    fn schedule(&self, schedule: &mut ScheduleRegistrar<'_>) {
        schedule.job("prune_logins", "0 3 * * *");
    }

    fn routes(&self) -> Vec<RouteDecl> {
        vec![RouteDecl::new("get", "/logins", "login_counter.index")]
    }
}

/// Payment extension exposing a checkout label.
pub struct ManualPayment {
    base: ExtensionBase,
}

impl PaymentMethod for ManualPayment {
    fn label(&self) -> String {
        self.base
            .get("label")
            .and_then(|value| value.as_str().map(str::to_string))
            .unwrap_or_else(|| "Manual transfer".to_string())
    }

    fn form(&self) -> Vec<(String, ConfigField)> {
        vec![(
            "account".to_string(),
            ConfigField {
                default: json!(""),
                meta: serde_json::Map::new(),
            },
        )]
    }
}

impl Extension for ManualPayment {
    fn base(&self) -> &ExtensionBase {
        &self.base
    }

    fn as_payment(&self) -> Option<&dyn PaymentMethod> {
        Some(self)
    }
}

pub fn factories(effects: &Arc<Effects>) -> FactoryTable {
    let ok = Arc::clone(effects);
    let sample = Arc::clone(effects);
    let bad_install = Arc::clone(effects);
    let bad_boot = Arc::clone(effects);
    FactoryTable::new()
        .with("login_counter", move |manifest: &Manifest| {
            Arc::new(LoginCounter {
                base: ExtensionBase::from_manifest(manifest),
                effects: Arc::clone(&ok),
                fail_install: false,
                fail_boot: false,
            }) as Arc<dyn Extension>
        })
        .with("sample", move |manifest: &Manifest| {
            Arc::new(LoginCounter {
                base: ExtensionBase::from_manifest(manifest),
                effects: Arc::clone(&sample),
                fail_install: false,
                fail_boot: false,
            }) as Arc<dyn Extension>
        })
        .with("broken_install", move |manifest: &Manifest| {
            Arc::new(LoginCounter {
                base: ExtensionBase::from_manifest(manifest),
                effects: Arc::clone(&bad_install),
                fail_install: true,
                fail_boot: false,
            }) as Arc<dyn Extension>
        })
        .with("broken_boot", move |manifest: &Manifest| {
            Arc::new(LoginCounter {
                base: ExtensionBase::from_manifest(manifest),
                effects: Arc::clone(&bad_boot),
                fail_install: false,
                fail_boot: true,
            }) as Arc<dyn Extension>
        })
        .with("manual_payment", |manifest: &Manifest| {
            Arc::new(ManualPayment {
                base: ExtensionBase::from_manifest(manifest),
            }) as Arc<dyn Extension>
        })
}

// Field order is drop order: the scratch dir goes last.
pub struct Fixture {
    pub conn: Connection,
    pub ctx: AppContext,
    pub host: Arc<RecordingHost>,
    pub effects: Arc<Effects>,
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_protected(&[])
    }

    pub fn with_protected(protected: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig {
            host_version: "1.4.0".to_string(),
            database_path: dir.path().join("registry.sqlite3"),
            packages_dir: dir.path().join("plugins"),
            public_dir: dir.path().join("public/plugins"),
            protected_codes: protected.iter().map(|code| code.to_string()).collect(),
            max_archive_bytes: 64 * 1024,
            ..RuntimeConfig::default()
        };
        fs::create_dir_all(&config.packages_dir).unwrap();

        let effects = Arc::new(Effects::default());
        let host = Arc::new(RecordingHost::new());
        let ctx = AppContext::new(config, factories(&effects), host.clone());
        let conn = ctx.open_db().unwrap();
        Self {
            conn,
            ctx,
            host,
            effects,
            dir,
        }
    }

    pub fn manager(&self) -> LifecycleManager<'_> {
        LifecycleManager::new(&self.ctx, &self.conn)
    }

    /// Fresh context and connection over the same files, as a new process
    /// would see them.
    pub fn restart(&self) -> (AppContext, Connection) {
        let ctx = AppContext::new(
            self.ctx.config().clone(),
            factories(&self.effects),
            Arc::new(RecordingHost::new()),
        );
        let conn = ctx.open_db().unwrap();
        (ctx, conn)
    }

    pub fn packages_dir(&self) -> PathBuf {
        self.ctx.config().packages_dir.clone()
    }

    /// Writes `<packages>/<code>/manifest.json`; `entry` selects the factory.
    pub fn add_package(&self, code: &str, version: &str, entry: &str) -> PathBuf {
        self.add_manifest(json!({
            "name": format!("{code} extension"),
            "code": code,
            "version": version,
            "description": "test package",
            "author": "tests",
            "type": "feature",
            "entry": entry,
        }))
    }

    /// Writes `manifest` as-is, filling in `name` when absent.
    pub fn add_manifest(&self, mut manifest: Value) -> PathBuf {
        let code = manifest["code"].as_str().unwrap().to_string();
        if manifest.get("name").is_none() {
            manifest["name"] = json!(format!("{code} extension"));
        }
        let dir = self.packages_dir().join(code);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("manifest.json"),
            serde_json::to_vec_pretty(&manifest).unwrap(),
        )
        .unwrap();
        dir
    }

    pub fn add_migration(&self, code: &str, name: &str, up: &str, down: &str) {
        let dir = self.packages_dir().join(code).join("migrations");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(format!("{name}.up.sql")), up).unwrap();
        fs::write(dir.join(format!("{name}.down.sql")), down).unwrap();
    }

    pub fn add_asset(&self, code: &str, relative: &str, contents: &str) {
        let path = self.packages_dir().join(code).join("assets").join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    pub fn published_asset(&self, code: &str, relative: &str) -> PathBuf {
        self.ctx.assets().target_dir(code).join(relative)
    }

    pub fn table_exists(&self, table: &str) -> bool {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1;",
                [table],
                |row| row.get::<_, i64>(0),
            )
            .unwrap()
            > 0
    }

    /// Simulates a login request reaching the host.
    pub fn simulate_login(&self) {
        self.ctx
            .hooks()
            .call(LOGIN_HOOK, &[json!({ "user_id": 7 })])
            .unwrap();
    }
}

/// Builds a `.tar.gz` archive from `(path, contents)` pairs.
pub fn tar_gz(files: &[(&str, &[u8])]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (path, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, *contents).unwrap();
    }
    let mut encoder = builder.into_inner().unwrap();
    encoder.flush().unwrap();
    encoder.finish().unwrap()
}

pub fn manifest_bytes(code: &str, version: &str, entry: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "name": format!("{code} extension"),
        "code": code,
        "version": version,
        "type": "feature",
        "entry": entry,
    }))
    .unwrap()
}

pub fn exists(path: &Path) -> bool {
    path.exists()
}
