//! Entity contract binding Rust types to the change session.
//!
//! # Responsibility
//! - Name the owning type of every tracked record.
//! - Expose surrogate keys and envelopes to generic service code.
//!
//! # Invariants
//! - `UNASSIGNED_KEY` means "never registered with a session".
//! - Negative keys are provisional: stamped by the session on add and
//!   replaced by the store-generated key on flush.
//! - Positive keys come only from the store.
//! - `ENTITY_TYPE` is unique per Rust type sharing one session.

use super::envelope::{RecordEnvelope, UserStampedEnvelope};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Surrogate primary key generated by the store.
pub type RowKey = i64;

/// Key value carried by entities never handed to a session.
pub const UNASSIGNED_KEY: RowKey = 0;

/// Whether `key` is a session-local key of a record not yet flushed.
pub fn is_provisional_key(key: RowKey) -> bool {
    key < UNASSIGNED_KEY
}

/// Rejection raised by `Entity::validate` before a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityValidationError {
    pub entity_type: &'static str,
    pub message: String,
}

impl EntityValidationError {
    pub fn new(entity_type: &'static str, message: impl Into<String>) -> Self {
        Self {
            entity_type,
            message: message.into(),
        }
    }
}

impl Display for EntityValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid {}: {}", self.entity_type, self.message)
    }
}

impl Error for EntityValidationError {}

/// A persisted record type managed by a scoped service.
pub trait Entity: Clone + PartialEq + Serialize + DeserializeOwned + Send + 'static {
    /// Owning-type name used to partition entries and rows.
    const ENTITY_TYPE: &'static str;

    fn key(&self) -> RowKey;

    fn set_key(&mut self, key: RowKey);

    fn envelope(&self) -> &RecordEnvelope;

    fn envelope_mut(&mut self) -> &mut RecordEnvelope;

    /// Runs before every insert or update reaches the store.
    fn validate(&self) -> Result<(), EntityValidationError> {
        Ok(())
    }

    /// True for stored and provisional keys alike.
    fn has_key(&self) -> bool {
        self.key() != UNASSIGNED_KEY
    }

    fn is_provisional(&self) -> bool {
        is_provisional_key(self.key())
    }
}

/// Entity carrying actor stamps keyed by `K`.
pub trait UserStamped<K>: Entity {
    fn user_envelope(&self) -> &UserStampedEnvelope<K>;

    fn user_envelope_mut(&mut self) -> &mut UserStampedEnvelope<K>;
}
