//! SQLite-backed registry over the `extensions` table.

use super::{ExtensionRecord, Registry, RegistryError, RegistryResult};
use crate::extension::contract::ConfigMap;
use crate::extension::manifest::ExtensionType;
use log::info;
use rusqlite::{params, Connection, ErrorCode, Row};
use serde_json::Value;
use std::collections::BTreeSet;

const RECORD_SELECT_SQL: &str = "SELECT
    code,
    name,
    version,
    type,
    enabled,
    config,
    installed_at
FROM extensions";

/// Registry bound to one connection.
///
/// Writes issued while a transaction is open on the same connection join
/// that transaction.
#[derive(Debug)]
pub struct SqliteRegistry<'conn> {
    conn: &'conn Connection,
    protected: BTreeSet<String>,
}

impl<'conn> SqliteRegistry<'conn> {
    pub fn new<I, S>(conn: &'conn Connection, protected: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            conn,
            protected: protected.into_iter().map(Into::into).collect(),
        }
    }

    pub fn connection(&self) -> &'conn Connection {
        self.conn
    }

    fn query_records(&self, filter: &str) -> RegistryResult<Vec<ExtensionRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{RECORD_SELECT_SQL} {filter} ORDER BY code ASC;"))?;
        let mut rows = stmt.query([])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_record_row(row)?);
        }
        Ok(records)
    }

    fn expect_changed(changed: usize, code: &str) -> RegistryResult<()> {
        if changed == 0 {
            return Err(RegistryError::NotFound(code.to_string()));
        }
        Ok(())
    }
}

impl Registry for SqliteRegistry<'_> {
    fn find(&self, code: &str) -> RegistryResult<Option<ExtensionRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{RECORD_SELECT_SQL} WHERE code = ?1;"))?;
        let mut rows = stmt.query([code])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_record_row(row)?));
        }
        Ok(None)
    }

    fn exists_enabled(&self, code: &str) -> RegistryResult<bool> {
        let found: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM extensions WHERE code = ?1 AND enabled = 1;",
            [code],
            |row| row.get(0),
        )?;
        Ok(found > 0)
    }

    fn list(&self) -> RegistryResult<Vec<ExtensionRecord>> {
        self.query_records("")
    }

    fn list_enabled(&self) -> RegistryResult<Vec<ExtensionRecord>> {
        self.query_records("WHERE enabled = 1")
    }

    fn create(&self, record: &ExtensionRecord) -> RegistryResult<()> {
        let inserted = self.conn.execute(
            "INSERT INTO extensions (
                code,
                name,
                version,
                type,
                enabled,
                config,
                installed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                record.code.as_str(),
                record.name.as_str(),
                record.version.as_str(),
                record.kind.as_str(),
                bool_to_int(record.enabled),
                config_to_db(&record.config),
                record.installed_at,
            ],
        );

        match inserted {
            Ok(_) => {
                info!(
                    "event=registry_create module=registry status=ok code={} version={}",
                    record.code, record.version
                );
                Ok(())
            }
            Err(err) if is_unique_violation(&err) => {
                Err(RegistryError::DuplicateCode(record.code.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn set_enabled(&self, code: &str, enabled: bool) -> RegistryResult<()> {
        let changed = self.conn.execute(
            "UPDATE extensions
             SET
                enabled = ?1,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE code = ?2;",
            params![bool_to_int(enabled), code],
        )?;
        Self::expect_changed(changed, code)
    }

    fn update_version(&self, code: &str, version: &str) -> RegistryResult<()> {
        let changed = self.conn.execute(
            "UPDATE extensions
             SET
                version = ?1,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE code = ?2;",
            params![version, code],
        )?;
        Self::expect_changed(changed, code)
    }

    fn update_config(&self, code: &str, config: &ConfigMap) -> RegistryResult<()> {
        let changed = self.conn.execute(
            "UPDATE extensions
             SET
                config = ?1,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE code = ?2;",
            params![config_to_db(config), code],
        )?;
        Self::expect_changed(changed, code)
    }

    fn delete(&self, code: &str) -> RegistryResult<()> {
        if self.is_protected(code) {
            return Err(RegistryError::Protected(code.to_string()));
        }
        let changed = self
            .conn
            .execute("DELETE FROM extensions WHERE code = ?1;", [code])?;
        Self::expect_changed(changed, code)?;
        info!("event=registry_delete module=registry status=ok code={code}");
        Ok(())
    }

    fn delete_orphan(&self, code: &str) -> RegistryResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM extensions WHERE code = ?1;", [code])?;
        Ok(changed > 0)
    }

    fn is_protected(&self, code: &str) -> bool {
        self.protected.contains(code)
    }
}

fn parse_record_row(row: &Row<'_>) -> RegistryResult<ExtensionRecord> {
    let code: String = row.get("code")?;

    let type_text: String = row.get("type")?;
    let kind = ExtensionType::parse(&type_text).ok_or_else(|| {
        RegistryError::InvalidData(format!(
            "invalid type `{type_text}` in extensions.type for `{code}`"
        ))
    })?;

    let enabled = match row.get::<_, i64>("enabled")? {
        0 => false,
        1 => true,
        other => {
            return Err(RegistryError::InvalidData(format!(
                "invalid enabled value `{other}` in extensions.enabled for `{code}`"
            )));
        }
    };

    let config_text: String = row.get("config")?;
    let config = match serde_json::from_str::<Value>(&config_text) {
        Ok(Value::Object(map)) => map,
        Ok(Value::Null) => ConfigMap::new(),
        _ => {
            return Err(RegistryError::InvalidData(format!(
                "extensions.config for `{code}` is not a JSON object"
            )));
        }
    };

    Ok(ExtensionRecord {
        name: row.get("name")?,
        version: row.get("version")?,
        kind,
        enabled,
        config,
        installed_at: row.get("installed_at")?,
        code,
    })
}

fn config_to_db(config: &ConfigMap) -> String {
    Value::Object(config.clone()).to_string()
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation
                && (failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    || failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE)
    )
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}
