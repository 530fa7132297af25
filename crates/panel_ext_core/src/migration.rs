//! Extension-owned schema migrations.
//!
//! # Invariants
//! - Scripts are `migrations/<name>.up.sql` with an optional matching
//!   `<name>.down.sql`, applied in lexical order of `<name>`.
//! - Each script runs in its own transaction together with its tracking row
//!   in `extension_migrations`, so re-running is a no-op.
//! - A package without a `migrations/` directory has nothing to apply.

use crate::db::DbError;
use log::{info, warn};
use rusqlite::{params, Connection};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MIGRATIONS_DIR: &str = "migrations";
const UP_SUFFIX: &str = ".up.sql";
const DOWN_SUFFIX: &str = ".down.sql";

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("failed to read migrations at `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("migration `{name}` of `{code}` failed: {source}")]
    Sql {
        code: String,
        name: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error(transparent)]
    Db(#[from] DbError),
}

impl From<rusqlite::Error> for MigrationError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Applies and reverts a package's schema changes.
pub trait MigrationRunner {
    /// Applies pending forward migrations; returns how many ran.
    fn migrate(&self, code: &str, package_dir: &Path) -> Result<usize, MigrationError>;

    /// Reverts applied migrations, newest first; returns how many were reverted.
    fn rollback(&self, code: &str, package_dir: &Path) -> Result<usize, MigrationError>;
}

/// Runs plain SQL scripts shipped inside the package.
#[derive(Debug, Clone, Copy)]
pub struct SqlMigrationRunner<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqlMigrationRunner<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Names of migrations recorded as applied for `code`.
    pub fn applied(&self, code: &str) -> Result<BTreeSet<String>, MigrationError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM extension_migrations WHERE code = ?1;")?;
        let names = stmt
            .query_map([code], |row| row.get::<_, String>(0))?
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(names)
    }

    fn run_script(
        &self,
        code: &str,
        name: &str,
        sql: &str,
        tracking_sql: &str,
    ) -> Result<(), MigrationError> {
        let as_sql_error = |source| MigrationError::Sql {
            code: code.to_string(),
            name: name.to_string(),
            source,
        };
        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch(sql).map_err(as_sql_error)?;
        tx.execute(tracking_sql, params![code, name])?;
        tx.commit()?;
        Ok(())
    }
}

impl MigrationRunner for SqlMigrationRunner<'_> {
    fn migrate(&self, code: &str, package_dir: &Path) -> Result<usize, MigrationError> {
        let scripts = list_up_scripts(package_dir)?;
        if scripts.is_empty() {
            return Ok(0);
        }

        let applied = self.applied(code)?;
        let mut count = 0;
        for (name, path) in scripts.iter().filter(|(name, _)| !applied.contains(name)) {
            let sql = read_script(path)?;
            self.run_script(
                code,
                name,
                &sql,
                "INSERT INTO extension_migrations (code, name) VALUES (?1, ?2);",
            )?;
            info!("event=ext_migrate module=migrations status=ok code={code} name={name}");
            count += 1;
        }
        Ok(count)
    }

    fn rollback(&self, code: &str, package_dir: &Path) -> Result<usize, MigrationError> {
        let applied = self.applied(code)?;
        let dir = package_dir.join(MIGRATIONS_DIR);
        let mut count = 0;
        for name in applied.iter().rev() {
            let down = dir.join(format!("{name}{DOWN_SUFFIX}"));
            let sql = if down.is_file() {
                read_script(&down)?
            } else {
                warn!(
                    "event=ext_rollback module=migrations status=skipped code={code} name={name} reason=down_script_missing"
                );
                String::new()
            };
            self.run_script(
                code,
                name,
                &sql,
                "DELETE FROM extension_migrations WHERE code = ?1 AND name = ?2;",
            )?;
            info!("event=ext_rollback module=migrations status=ok code={code} name={name}");
            count += 1;
        }
        Ok(count)
    }
}

fn list_up_scripts(package_dir: &Path) -> Result<Vec<(String, PathBuf)>, MigrationError> {
    let dir = package_dir.join(MIGRATIONS_DIR);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let io_err = |source| MigrationError::Io {
        path: dir.clone(),
        source,
    };
    let mut scripts = Vec::new();
    for entry in fs::read_dir(&dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if let Some(name) = file_name.strip_suffix(UP_SUFFIX) {
            scripts.push((name.to_string(), path.clone()));
        }
    }
    scripts.sort();
    Ok(scripts)
}

fn read_script(path: &Path) -> Result<String, MigrationError> {
    fs::read_to_string(path).map_err(|source| MigrationError::Io {
        path: path.to_path_buf(),
        source,
    })
}
