mod support;

use panel_ext_core::{LifecycleError, Registry};
use support::{manifest_bytes, tar_gz, Fixture, LOGIN_HOOK};

#[test]
fn upload_places_new_package_without_installing_it() {
    let fx = Fixture::new();
    let manifest = manifest_bytes("login_counter", "1.0.0", "login_counter");
    let archive = tar_gz(&[
        ("login_counter/manifest.json", manifest.as_slice()),
        ("login_counter/assets/app.css", b"body {}".as_slice()),
    ]);
    let manager = fx.manager();

    let outcome = manager.upload(&archive).unwrap();

    assert_eq!(outcome.code, "login_counter");
    assert_eq!(outcome.version, "1.0.0");
    assert!(!outcome.upgraded);
    assert!(fx.ctx.packages().contains("login_counter"));
    assert!(fx
        .packages_dir()
        .join("login_counter/assets/app.css")
        .is_file());
    assert!(manager.registry().find("login_counter").unwrap().is_none());

    manager.install("login_counter").unwrap();
    assert!(fx.published_asset("login_counter", "app.css").is_file());
}

#[test]
fn upload_accepts_manifest_at_archive_root() {
    let fx = Fixture::new();
    let manifest = manifest_bytes("sample", "1.0.0", "sample");
    let archive = tar_gz(&[("manifest.json", manifest.as_slice())]);

    let outcome = fx.manager().upload(&archive).unwrap();

    assert_eq!(outcome.code, "sample");
    assert!(fx.ctx.packages().contains("sample"));
}

#[test]
fn upload_of_same_or_older_version_is_rejected() {
    let fx = Fixture::new();
    fx.add_package("login_counter", "1.2.0", "login_counter");
    let manager = fx.manager();

    for version in ["1.2.0", "1.1.9"] {
        let manifest = manifest_bytes("login_counter", version, "login_counter");
        let archive = tar_gz(&[("manifest.json", manifest.as_slice())]);
        let err = manager.upload(&archive).unwrap_err();
        assert!(matches!(err, LifecycleError::UpgradeVersion { .. }), "{version}");
    }
    let existing = fx.ctx.packages().read_manifest("login_counter").unwrap();
    assert_eq!(existing.version, "1.2.0");
}

#[test]
fn upload_of_newer_version_upgrades_installed_extension() {
    let fx = Fixture::new();
    fx.add_package("login_counter", "1.0.0", "login_counter");
    let manager = fx.manager();
    manager.install("login_counter").unwrap();
    manager.enable("login_counter").unwrap();

    let manifest = manifest_bytes("login_counter", "2.0.0", "login_counter");
    let archive = tar_gz(&[("pkg/manifest.json", manifest.as_slice())]);
    let outcome = manager.upload(&archive).unwrap();

    assert!(outcome.upgraded);
    let record = manager.registry().find("login_counter").unwrap().unwrap();
    assert_eq!(record.version, "2.0.0");
    assert!(record.enabled);
    assert_eq!(fx.ctx.hooks().listener_count(LOGIN_HOOK), 1);
}

#[test]
fn malformed_archives_are_rejected_with_archive_format() {
    let fx = Fixture::new();
    let manager = fx.manager();

    let no_manifest = tar_gz(&[("readme.txt", b"hello".as_slice())]);
    let bad_manifest = tar_gz(&[(
        "manifest.json",
        br#"{"name":"X","code":"Bad-Code","version":"1.0.0"}"#.as_slice(),
    )]);
    let not_gzip = b"definitely not a tarball".to_vec();
    let oversized = vec![0_u8; 64 * 1024 + 1];

    for archive in [no_manifest, bad_manifest, not_gzip, oversized] {
        let err = manager.upload(&archive).unwrap_err();
        assert_eq!(err.code(), "archive_format", "{err}");
    }
    assert!(fx.ctx.packages().list().unwrap().is_empty());
}

#[test]
fn delete_uninstalls_then_removes_package() {
    let fx = Fixture::new();
    fx.add_package("login_counter", "1.0.0", "login_counter");
    fx.add_migration(
        "login_counter",
        "0001_login_log",
        "CREATE TABLE ext_login_log (id INTEGER PRIMARY KEY);",
        "DROP TABLE ext_login_log;",
    );
    let manager = fx.manager();
    manager.install("login_counter").unwrap();
    manager.enable("login_counter").unwrap();

    manager.delete("login_counter").unwrap();

    assert!(!fx.ctx.packages().contains("login_counter"));
    assert!(manager.registry().find("login_counter").unwrap().is_none());
    assert!(!fx.table_exists("ext_login_log"));
    assert!(!fx.ctx.loader().is_cached("login_counter"));
}

#[test]
fn delete_of_missing_package_reports_not_found() {
    let fx = Fixture::new();
    let err = fx.manager().delete("nowhere").unwrap_err();
    assert!(matches!(err, LifecycleError::PackageNotFound(ref code) if code == "nowhere"));
}

#[test]
fn codes_outside_the_package_pattern_never_reach_the_filesystem() {
    let fx = Fixture::new();
    let victim = fx.dir.path().join("victim");
    std::fs::create_dir_all(&victim).unwrap();
    std::fs::write(victim.join("keep.txt"), "data").unwrap();
    let manager = fx.manager();

    for code in ["../victim", "..", "Victim", "a/b", ""] {
        let err = manager.delete(code).unwrap_err();
        assert_eq!(err.code(), "manifest_error", "{code:?}");
        assert_eq!(manager.install(code).unwrap_err().code(), "manifest_error");
        assert_eq!(manager.enable(code).unwrap_err().code(), "manifest_error");
        assert_eq!(manager.get_config(code).unwrap_err().code(), "manifest_error");
    }
    assert!(victim.join("keep.txt").is_file());
    assert!(fx.ctx.packages().package_dir("../victim").is_err());
    assert!(!fx.ctx.packages().contains("../victim"));
}

#[test]
fn upload_not_newer_than_registry_version_leaves_disk_untouched() {
    let fx = Fixture::new();
    fx.add_package("login_counter", "1.2.0", "login_counter");
    let manager = fx.manager();
    manager.install("login_counter").unwrap();
    let manifest_path = fx.packages_dir().join("login_counter/manifest.json");
    std::fs::write(&manifest_path, "{ not json").unwrap();

    let manifest = manifest_bytes("login_counter", "1.0.0", "login_counter");
    let archive = tar_gz(&[("manifest.json", manifest.as_slice())]);
    let err = manager.upload(&archive).unwrap_err();

    assert!(matches!(err, LifecycleError::UpgradeVersion { ref installed, .. } if installed == "1.2.0"));
    assert_eq!(std::fs::read_to_string(&manifest_path).unwrap(), "{ not json");
    let record = manager.registry().find("login_counter").unwrap().unwrap();
    assert_eq!(record.version, "1.2.0");
}
