//! SQLite storage bootstrap and host schema migration entry points.
//!
//! # Responsibility
//! - Open and configure the SQLite connection backing the extension registry.
//! - Apply host schema migrations in deterministic order.
//!
//! # Invariants
//! - Host schema version is tracked via `PRAGMA user_version`.
//! - Registry reads/writes must not happen before migrations succeed.
//! - Extension-owned schema changes are tracked separately, see
//!   [`crate::migration`].

use thiserror::Error;

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};
pub use rusqlite::Connection;

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error("database schema version {db_version} is newer than supported {latest_supported}")]
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
}
