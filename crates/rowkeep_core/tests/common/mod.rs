#![allow(dead_code)]

use rowkeep_core::db::open_db_in_memory;
use rowkeep_core::{
    ChangeSession, Entity, EntityValidationError, RecordEnvelope, RowKey, SqliteStore,
    UserStamped, UserStampedEnvelope, UNASSIGNED_KEY,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub type Session = Arc<ChangeSession<SqliteStore>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Widget {
    pub id: RowKey,
    pub name: String,
    #[serde(flatten)]
    pub envelope: RecordEnvelope,
}

impl Widget {
    pub fn new(name: &str) -> Self {
        Self {
            id: UNASSIGNED_KEY,
            name: name.to_string(),
            envelope: RecordEnvelope::default(),
        }
    }
}

impl Entity for Widget {
    const ENTITY_TYPE: &'static str = "widget";

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
        if self.name.trim().is_empty() {
            return Err(EntityValidationError::new(
                Self::ENTITY_TYPE,
                "name must not be empty",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gadget {
    pub id: RowKey,
    pub label: String,
    #[serde(flatten)]
    pub envelope: RecordEnvelope,
}

impl Gadget {
    pub fn new(label: &str) -> Self {
        Self {
            id: UNASSIGNED_KEY,
            label: label.to_string(),
            envelope: RecordEnvelope::default(),
        }
    }
}

impl Entity for Gadget {
    const ENTITY_TYPE: &'static str = "gadget";

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
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: RowKey,
    pub title: String,
    #[serde(flatten)]
    pub meta: UserStampedEnvelope<u32>,
}

impl Document {
    pub fn new(title: &str) -> Self {
        Self {
            id: UNASSIGNED_KEY,
            title: title.to_string(),
            meta: UserStampedEnvelope::default(),
        }
    }
}

impl Entity for Document {
    const ENTITY_TYPE: &'static str = "document";

    fn key(&self) -> RowKey {
        self.id
    }

    fn set_key(&mut self, key: RowKey) {
        self.id = key;
    }

    fn envelope(&self) -> &RecordEnvelope {
        &self.meta.record
    }

    fn envelope_mut(&mut self) -> &mut RecordEnvelope {
        &mut self.meta.record
    }
}

impl UserStamped<u32> for Document {
    fn user_envelope(&self) -> &UserStampedEnvelope<u32> {
        &self.meta
    }

    fn user_envelope_mut(&mut self) -> &mut UserStampedEnvelope<u32> {
        &mut self.meta
    }
}

pub fn open_session() -> Session {
    let conn = open_db_in_memory().unwrap();
    Arc::new(ChangeSession::new(SqliteStore::try_new(conn).unwrap()))
}

pub fn stored_rows(session: &Session, entity_type: &str) -> i64 {
    session
        .lock()
        .unwrap()
        .store()
        .connection()
        .query_row(
            "SELECT COUNT(*) FROM records WHERE entity_type = ?1;",
            [entity_type],
            |row| row.get(0),
        )
        .unwrap()
}

pub fn stored_name(session: &Session, key: RowKey) -> String {
    session
        .lock()
        .unwrap()
        .store()
        .connection()
        .query_row(
            "SELECT json_extract(payload, '$.name') FROM records WHERE row_key = ?1;",
            [key],
            |row| row.get(0),
        )
        .unwrap()
}
