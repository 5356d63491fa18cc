//! Change entries tracked by a session.

use crate::model::entity::{Entity, EntityValidationError, RowKey};
use serde_json::Value;
use std::any::Any;

/// Session-local entry identifier, stable while the entry is tracked.
pub type EntryId = u64;

/// Pending mutation state of one tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntryState {
    Unchanged,
    Added,
    Modified,
    Deleted,
}

impl EntryState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        }
    }

    pub fn is_pending(self) -> bool {
        self != Self::Unchanged
    }
}

/// Type-erased view over an `Entity` so one session can hold many types.
pub(crate) trait TrackedRecord: Send {
    fn entity_type(&self) -> &'static str;
    fn key(&self) -> RowKey;
    fn set_key(&mut self, key: RowKey);
    fn validate(&self) -> Result<(), EntityValidationError>;
    fn to_payload(&self) -> serde_json::Result<Value>;
    /// Replaces the record with a stored payload and its authoritative key.
    fn load_payload(&mut self, key: RowKey, payload: Value) -> serde_json::Result<()>;
    fn clone_record(&self) -> Box<dyn TrackedRecord>;
    fn as_any(&self) -> &dyn Any;
}

impl<T: Entity> TrackedRecord for T {
    fn entity_type(&self) -> &'static str {
        T::ENTITY_TYPE
    }

    fn key(&self) -> RowKey {
        Entity::key(self)
    }

    fn set_key(&mut self, key: RowKey) {
        Entity::set_key(self, key);
    }

    fn validate(&self) -> Result<(), EntityValidationError> {
        Entity::validate(self)
    }

    fn to_payload(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    fn load_payload(&mut self, key: RowKey, payload: Value) -> serde_json::Result<()> {
        let mut fresh: T = serde_json::from_value(payload)?;
        Entity::set_key(&mut fresh, key);
        *self = fresh;
        Ok(())
    }

    fn clone_record(&self) -> Box<dyn TrackedRecord> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// One pending mutation held by the change session.
pub struct ChangeEntry {
    id: EntryId,
    state: EntryState,
    record: Box<dyn TrackedRecord>,
    /// Last snapshot known to match durable storage.
    original: Option<Box<dyn TrackedRecord>>,
}

impl ChangeEntry {
    pub(crate) fn new(id: EntryId, state: EntryState, record: Box<dyn TrackedRecord>) -> Self {
        Self {
            id,
            state,
            record,
            original: None,
        }
    }

    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn entity_type(&self) -> &'static str {
        self.record.entity_type()
    }

    pub fn key(&self) -> RowKey {
        self.record.key()
    }

    pub fn state(&self) -> EntryState {
        self.state
    }

    /// Overwrites the entry state without touching the tracked values.
    pub fn set_state(&mut self, state: EntryState) {
        self.state = state;
    }

    pub fn is_owned_by(&self, entity_type: &str) -> bool {
        self.entity_type() == entity_type
    }

    /// Typed copy of the tracked values, `None` for another entity type.
    pub fn entity<T: Entity>(&self) -> Option<T> {
        self.record.as_any().downcast_ref::<T>().cloned()
    }

    pub fn has_original(&self) -> bool {
        self.original.is_some()
    }

    pub(crate) fn record(&self) -> &dyn TrackedRecord {
        self.record.as_ref()
    }

    pub(crate) fn replace_record(&mut self, record: Box<dyn TrackedRecord>) {
        self.record = record;
    }

    pub(crate) fn record_mut(&mut self) -> &mut dyn TrackedRecord {
        self.record.as_mut()
    }

    /// Marks the current values as matching durable storage.
    pub(crate) fn accept_current(&mut self) {
        self.original = Some(self.record.clone_record());
        self.state = EntryState::Unchanged;
    }

    /// Drops pending modifications, restoring the persisted snapshot if known.
    pub(crate) fn discard_modifications(&mut self) {
        if let Some(original) = &self.original {
            self.record = original.clone_record();
        }
        self.state = EntryState::Unchanged;
    }

    /// Value equality with `entity`, ignoring the key the session stamped.
    pub(crate) fn matches_unkeyed<T: Entity>(&self, entity: &T) -> bool {
        let Some(tracked) = self.record.as_any().downcast_ref::<T>() else {
            return false;
        };
        let mut tracked = tracked.clone();
        Entity::set_key(&mut tracked, Entity::key(entity));
        &tracked == entity
    }
}

/// Read-only description of one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntrySnapshot {
    pub id: EntryId,
    pub entity_type: &'static str,
    pub key: RowKey,
    pub state: EntryState,
}

impl From<&ChangeEntry> for EntrySnapshot {
    fn from(entry: &ChangeEntry) -> Self {
        Self {
            id: entry.id(),
            entity_type: entry.entity_type(),
            key: entry.key(),
            state: entry.state(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::EntryState;

    #[test]
    fn only_unchanged_is_not_pending() {
        assert!(!EntryState::Unchanged.is_pending());
        assert!(EntryState::Added.is_pending());
        assert!(EntryState::Modified.is_pending());
        assert!(EntryState::Deleted.is_pending());
    }
}
