//! Durable storage contract consumed by the change session.
//!
//! # Responsibility
//! - Define the minimal read/write surface a backing store must offer.
//! - Report missing rows and constraint failures as semantic errors.
//!
//! # Invariants
//! - `Store::apply` is atomic: either every write lands or none does.
//! - Keys are generated by the store on insert, never by callers.

use crate::db::DbError;
use crate::model::entity::RowKey;
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

mod sqlite_store;

pub use sqlite_store::SqliteStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug)]
pub enum StoreError {
    Db(DbError),
    /// An update or delete targeted a row that does not exist.
    RowMissing {
        entity_type: &'static str,
        key: RowKey,
    },
    /// The backend rejected a write.
    Constraint(String),
    /// Persisted payload cannot be decoded.
    InvalidData(String),
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    MissingRequiredTable(&'static str),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::RowMissing { entity_type, key } => {
                write!(f, "no stored {entity_type} row with key {key}")
            }
            Self::Constraint(message) => write!(f, "store constraint violated: {message}"),
            Self::InvalidData(message) => write!(f, "invalid stored record: {message}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "record store requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "record store requires table `{table}`")
            }
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            rusqlite::Error::SqliteFailure(failure, message)
                if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Self::Constraint(message.unwrap_or_else(|| failure.to_string()))
            }
            other => Self::Db(DbError::Sqlite(other)),
        }
    }
}

/// One row as persisted by a store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub key: RowKey,
    pub payload: Value,
}

/// One write inside an atomic `Store::apply` batch.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingWrite {
    Insert {
        entity_type: &'static str,
        payload: Value,
    },
    Update {
        entity_type: &'static str,
        key: RowKey,
        payload: Value,
    },
    Delete {
        entity_type: &'static str,
        key: RowKey,
    },
}

/// Result of an applied batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub affected_rows: usize,
    /// One slot per write, in batch order; `Some` only for inserts.
    pub assigned_keys: Vec<Option<RowKey>>,
}

/// Durable backing store for a change session.
pub trait Store: Send {
    fn fetch(&self, entity_type: &str, key: RowKey) -> StoreResult<Option<StoredRecord>>;

    /// Returns every row of one entity type ordered by key.
    fn scan(&self, entity_type: &str) -> StoreResult<Vec<StoredRecord>>;

    fn contains(&self, entity_type: &str, key: RowKey) -> StoreResult<bool> {
        Ok(self.fetch(entity_type, key)?.is_some())
    }

    /// Applies a batch atomically.
    fn apply(&mut self, writes: &[PendingWrite]) -> StoreResult<ApplyOutcome>;
}
