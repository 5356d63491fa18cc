//! CLI smoke entry point.
//!
//! # Responsibility
//! - Exercise one add/commit/undo round against an in-memory store.
//! - Keep output deterministic for quick local sanity checks.
//!
//! Set `ROWKEEP_LOG_DIR` to an absolute path to capture core log events.

use chrono::{DateTime, Utc};
use rowkeep_core::db::open_db_in_memory;
use rowkeep_core::{
    default_log_level, init_logging, ChangeSession, Entity, EntityValidationError,
    RecordEnvelope, RowKey, ScopedService, SqliteStore, UNASSIGNED_KEY,
};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Task {
    id: RowKey,
    title: String,
    #[serde(flatten)]
    envelope: RecordEnvelope,
}

impl Task {
    fn new(title: &str) -> Self {
        Self {
            id: UNASSIGNED_KEY,
            title: title.to_string(),
            envelope: RecordEnvelope::default(),
        }
    }
}

impl Entity for Task {
    const ENTITY_TYPE: &'static str = "task";

    fn key(&self) -> RowKey {
        self.id
    }

    fn set_key(&mut self, key: RowKey) {
        self.id = key;
    }

    fn envelope(&self) -> &RecordEnvelope {
        &self.envelope
    }

    fn envelope_mut(&mut self) -> &mut RecordEnvelope {
        &mut self.envelope
    }

    fn validate(&self) -> Result<(), EntityValidationError> {
        if self.title.trim().is_empty() {
            return Err(EntityValidationError::new(
                Self::ENTITY_TYPE,
                "title must not be empty",
            ));
        }
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    if let Ok(log_dir) = std::env::var("ROWKEEP_LOG_DIR") {
        init_logging(default_log_level(), &log_dir)?;
    }

    println!("rowkeep_core version={}", rowkeep_core::core_version());

    let store = SqliteStore::try_new(open_db_in_memory()?)?;
    let session = Arc::new(ChangeSession::new(store));
    let tasks = ScopedService::<Task, _>::new(session);

    let task = tasks.add(Task::new("water plants"), false)?;
    println!("added pending key={} pending={}", task.id, tasks.pending_count()?);

    let affected = tasks.commit()?;
    let stored = tasks.get_all().first()?.ok_or("committed task not found")?;
    println!(
        "committed affected_rows={affected} key={} created={}",
        stored.id,
        format_time(stored.envelope.date_created_utc)
    );

    let mut renamed = stored.clone();
    renamed.title = "repot plants".to_string();
    let renamed = tasks.update(renamed, false)?;
    println!("modified title={} pending={}", renamed.title, tasks.pending_count()?);

    tasks.undo_one(&renamed)?;
    let reverted = tasks.get(stored.id)?.ok_or("reverted task not found")?;
    println!(
        "undone title={} pending={}",
        reverted.title,
        tasks.pending_count()?
    );

    let deleted = tasks.delete(reverted, true)?;
    println!(
        "soft-deleted lifecycle={:?} rows={}",
        deleted.envelope.lifecycle(),
        tasks.get_all().count()?
    );

    Ok(())
}

fn format_time(value: DateTime<Utc>) -> String {
    value.to_rfc3339()
}
