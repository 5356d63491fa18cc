//! Database file handling for the record store.
//!
//! Connections handed to `SqliteStore` come from here: opened, configured
//! and migrated to the `records` layout this build understands.
//!
//! # Invariants
//! - The records schema version lives in `PRAGMA user_version`.
//! - A database written by a newer build is refused, never downgraded.

use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

/// Failure to prepare a database for the record store.
#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    /// The file carries a records schema newer than this build knows.
    SchemaTooNew { found: u32, supported: u32 },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "record database error: {err}"),
            Self::SchemaTooNew { found, supported } => write!(
                f,
                "records schema v{found} was written by a newer build; this build reads up to v{supported}"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::SchemaTooNew { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// Records schema version stamped on `conn`; `0` for a fresh database.
pub fn schema_version(conn: &Connection) -> DbResult<u32> {
    Ok(conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?)
}

pub fn table_exists(conn: &Connection, table: &str) -> DbResult<bool> {
    let found: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1);",
        [table],
        |row| row.get(0),
    )?;
    Ok(found == 1)
}
