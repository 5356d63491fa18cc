//! SQLite-backed record store.
//!
//! # Responsibility
//! - Persist entity payloads as JSON documents in the `records` table.
//! - Apply flush batches inside one SQLite transaction.
//!
//! # Invariants
//! - `row_key` is authoritative; key fields inside payloads are not read.
//! - Rows are partitioned by `entity_type`; a key never matches across types.

use super::{ApplyOutcome, PendingWrite, Store, StoreError, StoreResult, StoredRecord};
use crate::db::migrations::latest_version;
use crate::db::{schema_version, table_exists};
use crate::model::entity::RowKey;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};

/// Record store owning one migrated SQLite connection.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Wraps a connection returned by `open_db`/`open_db_in_memory`.
    pub fn try_new(conn: Connection) -> StoreResult<Self> {
        ensure_records_ready(&conn)?;
        Ok(Self { conn })
    }

    /// Raw connection access for diagnostics and tests.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl Store for SqliteStore {
    fn fetch(&self, entity_type: &str, key: RowKey) -> StoreResult<Option<StoredRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT row_key, payload
                 FROM records
                 WHERE entity_type = ?1 AND row_key = ?2;",
                params![entity_type, key],
                read_raw_row,
            )
            .optional()?;

        record.map(parse_raw_row).transpose()
    }

    fn scan(&self, entity_type: &str) -> StoreResult<Vec<StoredRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT row_key, payload
             FROM records
             WHERE entity_type = ?1
             ORDER BY row_key ASC;",
        )?;
        let raw_rows = stmt
            .query_map([entity_type], read_raw_row)?
            .collect::<Result<Vec<_>, _>>()?;

        raw_rows.into_iter().map(parse_raw_row).collect()
    }

    fn contains(&self, entity_type: &str, key: RowKey) -> StoreResult<bool> {
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM records WHERE entity_type = ?1 AND row_key = ?2
            );",
            params![entity_type, key],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    fn apply(&mut self, writes: &[PendingWrite]) -> StoreResult<ApplyOutcome> {
        let tx = self.conn.transaction()?;
        let mut outcome = ApplyOutcome::default();

        for write in writes {
            let assigned = apply_one(&tx, write, &mut outcome.affected_rows)?;
            outcome.assigned_keys.push(assigned);
        }

        tx.commit()?;
        Ok(outcome)
    }
}

fn apply_one(
    tx: &Transaction<'_>,
    write: &PendingWrite,
    affected_rows: &mut usize,
) -> StoreResult<Option<RowKey>> {
    match write {
        PendingWrite::Insert {
            entity_type,
            payload,
        } => {
            *affected_rows += tx.execute(
                "INSERT INTO records (entity_type, payload) VALUES (?1, ?2);",
                params![entity_type, payload.to_string()],
            )?;
            Ok(Some(tx.last_insert_rowid()))
        }
        PendingWrite::Update {
            entity_type,
            key,
            payload,
        } => {
            let changed = tx.execute(
                "UPDATE records
                 SET
                    payload = ?1,
                    updated_at = (strftime('%s', 'now') * 1000)
                 WHERE entity_type = ?2 AND row_key = ?3;",
                params![payload.to_string(), entity_type, key],
            )?;
            if changed == 0 {
                return Err(StoreError::RowMissing {
                    entity_type: *entity_type,
                    key: *key,
                });
            }
            *affected_rows += changed;
            Ok(None)
        }
        PendingWrite::Delete { entity_type, key } => {
            let changed = tx.execute(
                "DELETE FROM records WHERE entity_type = ?1 AND row_key = ?2;",
                params![entity_type, key],
            )?;
            if changed == 0 {
                return Err(StoreError::RowMissing {
                    entity_type: *entity_type,
                    key: *key,
                });
            }
            *affected_rows += changed;
            Ok(None)
        }
    }
}

fn read_raw_row(row: &Row<'_>) -> rusqlite::Result<(RowKey, String)> {
    Ok((row.get("row_key")?, row.get("payload")?))
}

fn parse_raw_row((key, payload): (RowKey, String)) -> StoreResult<StoredRecord> {
    let payload = serde_json::from_str(&payload).map_err(|err| {
        StoreError::InvalidData(format!("payload of row {key} is not valid JSON: {err}"))
    })?;
    Ok(StoredRecord { key, payload })
}

fn ensure_records_ready(conn: &Connection) -> StoreResult<()> {
    let expected_version = latest_version();
    let actual_version = schema_version(conn)?;
    if actual_version != expected_version {
        return Err(StoreError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    if !table_exists(conn, "records")? {
        return Err(StoreError::MissingRequiredTable("records"));
    }

    Ok(())
}
