//! Change session: the shared unit of work behind every scoped service.
//!
//! # Responsibility
//! - Track pending entity mutations (entries) across entity types.
//! - Flush pending entries to a `Store` in one atomic batch.
//! - Hand out an exclusive guard so multi-step sequences run as one
//!   critical section.
//!
//! # Invariants
//! - Entries keep insertion order; flush writes them in that order.
//! - A failed flush leaves every entry in its pre-flush state.
//! - All session state sits behind one mutex; no entry is reachable without
//!   holding the guard.

mod entry;
mod query;

pub use entry::{ChangeEntry, EntryId, EntrySnapshot, EntryState};
pub use query::Query;

use crate::model::entity::{is_provisional_key, Entity, RowKey, UNASSIGNED_KEY};
use crate::store::{PendingWrite, Store, StoreError};
use entry::TrackedRecord;
use log::{debug, error, info};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;
use uuid::Uuid;

pub type SessionResult<T> = Result<T, SessionError>;

/// Errors surfaced by session and service operations.
#[derive(Debug)]
pub enum SessionError {
    /// Lookup or update target is not tracked. `key` is `None` for entities
    /// never registered and `Some` for a provisional key the session no
    /// longer tracks.
    NotFound {
        entity_type: &'static str,
        key: Option<RowKey>,
    },
    /// Validation or a store constraint rejected a write.
    ConstraintViolation(String),
    /// A flushed update/delete found no row to act on.
    ConcurrencyConflict {
        entity_type: &'static str,
        key: RowKey,
    },
    Serialization(serde_json::Error),
    Store(StoreError),
    /// A thread panicked while holding the session guard.
    LockPoisoned,
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound {
                entity_type,
                key: Some(key),
            } => write!(f, "{entity_type} with provisional key {key} is not tracked"),
            Self::NotFound {
                entity_type,
                key: None,
            } => write!(f, "{entity_type} was never added to the session"),
            Self::ConstraintViolation(message) => write!(f, "constraint violation: {message}"),
            Self::ConcurrencyConflict { entity_type, key } => write!(
                f,
                "concurrency conflict: {entity_type} row {key} changed or vanished before flush"
            ),
            Self::Serialization(err) => write!(f, "entity serialization failed: {err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::LockPoisoned => write!(f, "change session lock poisoned"),
        }
    }
}

impl Error for SessionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Serialization(err) => Some(err),
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for SessionError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::RowMissing { entity_type, key } => {
                Self::ConcurrencyConflict { entity_type, key }
            }
            StoreError::Constraint(message) => Self::ConstraintViolation(message),
            other => Self::Store(other),
        }
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}

struct SessionState<S> {
    store: S,
    entries: Vec<ChangeEntry>,
    next_entry_id: EntryId,
}

/// Shared unit of work over one store.
///
/// Share it between services as `Arc<ChangeSession<S>>`.
pub struct ChangeSession<S: Store> {
    id: Uuid,
    state: Mutex<SessionState<S>>,
}

impl<S: Store> ChangeSession<S> {
    pub fn new(store: S) -> Self {
        let id = Uuid::new_v4();
        debug!("event=session_open module=session status=ok session_id={id}");
        Self {
            id,
            state: Mutex::new(SessionState {
                store,
                entries: Vec::new(),
                next_entry_id: 1,
            }),
        }
    }

    /// Stable id used to correlate log events of one unit of work.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Acquires exclusive access to entries and store.
    pub fn lock(&self) -> SessionResult<SessionGuard<'_, S>> {
        let state = self.state.lock().map_err(|_| SessionError::LockPoisoned)?;
        Ok(SessionGuard {
            session_id: self.id,
            state,
        })
    }

    /// Flushes every pending entry regardless of owning type.
    pub fn save_changes(&self) -> SessionResult<usize> {
        self.lock()?.flush()
    }

    pub fn entries(&self) -> SessionResult<Vec<EntrySnapshot>> {
        Ok(self.lock()?.entries())
    }
}

/// Exclusive handle over session state.
///
/// Every multi-step sequence (isolate, flush, restore) must run under a
/// single guard.
pub struct SessionGuard<'a, S: Store> {
    session_id: Uuid,
    state: MutexGuard<'a, SessionState<S>>,
}

impl<S: Store> SessionGuard<'_, S> {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn store(&self) -> &S {
        &self.state.store
    }

    pub fn entries(&self) -> Vec<EntrySnapshot> {
        self.state.entries.iter().map(EntrySnapshot::from).collect()
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut ChangeEntry> + '_ {
        self.state.entries.iter_mut()
    }

    pub fn entry(&self, id: EntryId) -> Option<&ChangeEntry> {
        self.state.entries.iter().find(|entry| entry.id() == id)
    }

    fn entry_mut(&mut self, id: EntryId) -> Option<&mut ChangeEntry> {
        self.state.entries.iter_mut().find(|entry| entry.id() == id)
    }

    /// Typed copy of an entry's current values.
    pub fn tracked<T: Entity>(&self, id: EntryId) -> Option<T> {
        self.entry(id).and_then(ChangeEntry::entity::<T>)
    }

    /// Registers `entity` as a new row.
    ///
    /// Any key it carries is replaced by a provisional key derived from the
    /// entry id, so later calls can find the entry again before it is
    /// flushed. The store assigns the real key on flush.
    pub fn add<T: Entity>(&mut self, mut entity: T) -> EntryId {
        let id = self.state.next_entry_id;
        Entity::set_key(&mut entity, provisional_key(id));
        self.push_entry(EntryState::Added, Box::new(entity))
    }

    pub fn add_range<T: Entity>(&mut self, entities: Vec<T>) -> Vec<EntryId> {
        entities
            .into_iter()
            .map(|entity| self.add(entity))
            .collect()
    }

    /// Registers or merges a modification of a persisted entity.
    ///
    /// An entry that is still `Added` stays `Added`.
    pub fn update<T: Entity>(&mut self, entity: T) -> SessionResult<EntryId> {
        let key = Entity::key(&entity);
        if key == UNASSIGNED_KEY {
            return Err(SessionError::NotFound {
                entity_type: T::ENTITY_TYPE,
                key: None,
            });
        }

        match self.entry_id_for_key(T::ENTITY_TYPE, key) {
            Some(id) => {
                if let Some(entry) = self.entry_mut(id) {
                    entry.replace_record(Box::new(entity));
                    if entry.state() != EntryState::Added {
                        entry.set_state(EntryState::Modified);
                    }
                }
                Ok(id)
            }
            None if is_provisional_key(key) => Err(SessionError::NotFound {
                entity_type: T::ENTITY_TYPE,
                key: Some(key),
            }),
            None => Ok(self.push_entry(EntryState::Modified, Box::new(entity))),
        }
    }

    pub fn update_range<T: Entity>(&mut self, entities: Vec<T>) -> SessionResult<Vec<EntryId>> {
        entities
            .into_iter()
            .map(|entity| self.update(entity))
            .collect()
    }

    /// Queues a hard delete of a persisted row.
    ///
    /// Removing an entry that was never flushed simply detaches it.
    pub fn remove<T: Entity>(&mut self, entity: &T) -> SessionResult<()> {
        if let Some(id) = self.entry_id_for(entity) {
            if self.entry(id).map(ChangeEntry::state) == Some(EntryState::Added) {
                self.detach(id);
            } else if let Some(entry) = self.entry_mut(id) {
                entry.set_state(EntryState::Deleted);
            }
            return Ok(());
        }

        let key = Entity::key(entity);
        if key == UNASSIGNED_KEY || is_provisional_key(key) {
            return Err(SessionError::NotFound {
                entity_type: T::ENTITY_TYPE,
                key: (key != UNASSIGNED_KEY).then_some(key),
            });
        }
        self.push_entry(EntryState::Deleted, Box::new(entity.clone()));
        Ok(())
    }

    /// Looks a row up by key, preferring the tracked copy.
    pub fn find<T: Entity>(&self, key: RowKey) -> SessionResult<Option<T>> {
        if let Some(id) = self.entry_id_for_key(T::ENTITY_TYPE, key) {
            return Ok(self.tracked::<T>(id));
        }

        match self.state.store.fetch(T::ENTITY_TYPE, key)? {
            Some(record) => {
                let mut entity: T = serde_json::from_value(record.payload)?;
                Entity::set_key(&mut entity, record.key);
                Ok(Some(entity))
            }
            None => Ok(None),
        }
    }

    /// True when the key is tracked or present in the store.
    pub fn contains<T: Entity>(&self, key: RowKey) -> SessionResult<bool> {
        if key == UNASSIGNED_KEY {
            return Ok(false);
        }
        if self.entry_id_for_key(T::ENTITY_TYPE, key).is_some() {
            return Ok(true);
        }
        Ok(self.state.store.contains(T::ENTITY_TYPE, key)?)
    }

    /// All stored rows of `T`, identity-resolved against tracked entries.
    pub fn scan<T: Entity>(&self) -> SessionResult<Vec<T>> {
        let records = self.state.store.scan(T::ENTITY_TYPE)?;
        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            let tracked = self
                .entry_id_for_key(T::ENTITY_TYPE, record.key)
                .and_then(|id| self.tracked::<T>(id));
            let entity = match tracked {
                Some(entity) => entity,
                None => {
                    let mut entity: T = serde_json::from_value(record.payload)?;
                    Entity::set_key(&mut entity, record.key);
                    entity
                }
            };
            rows.push(entity);
        }
        Ok(rows)
    }

    /// Finds the entry tracking `entity`.
    ///
    /// Keyed entities (stored or provisional) match by key. Entities still
    /// carrying `UNASSIGNED_KEY` match the first `Added` entry of the same
    /// type holding equal values.
    pub fn entry_id_for<T: Entity>(&self, entity: &T) -> Option<EntryId> {
        let key = Entity::key(entity);
        if key != UNASSIGNED_KEY {
            return self.entry_id_for_key(T::ENTITY_TYPE, key);
        }
        self.state
            .entries
            .iter()
            .find(|entry| entry.state() == EntryState::Added && entry.matches_unkeyed(entity))
            .map(ChangeEntry::id)
    }

    fn entry_id_for_key(&self, entity_type: &str, key: RowKey) -> Option<EntryId> {
        self.state
            .entries
            .iter()
            .find(|entry| entry.is_owned_by(entity_type) && entry.key() == key)
            .map(ChangeEntry::id)
    }

    pub fn state_of(&self, id: EntryId) -> Option<EntryState> {
        self.entry(id).map(ChangeEntry::state)
    }

    /// Stops tracking an entry. Returns whether it was tracked.
    pub fn detach(&mut self, id: EntryId) -> bool {
        let before = self.state.entries.len();
        self.state.entries.retain(|entry| entry.id() != id);
        self.state.entries.len() != before
    }

    /// Reverts an entry to `Unchanged`, restoring its last persisted values
    /// when the session knows them.
    pub fn discard_modifications(&mut self, id: EntryId) {
        if let Some(entry) = self.entry_mut(id) {
            entry.discard_modifications();
        }
    }

    /// Re-fetches an entry from durable storage, dropping pending changes.
    ///
    /// A row that no longer exists is detached.
    pub fn reload(&mut self, id: EntryId) -> SessionResult<()> {
        let Some((entity_type, key)) = self.entry(id).map(|entry| (entry.entity_type(), entry.key()))
        else {
            return Ok(());
        };

        let stored = if key == UNASSIGNED_KEY || is_provisional_key(key) {
            None
        } else {
            self.state.store.fetch(entity_type, key)?
        };

        match stored {
            Some(record) => {
                if let Some(entry) = self.entry_mut(id) {
                    entry.record_mut().load_payload(record.key, record.payload)?;
                    entry.accept_current();
                }
                debug!(
                    "event=session_reload module=session status=ok session_id={} entity_type={entity_type} key={key}",
                    self.session_id
                );
            }
            None => {
                self.detach(id);
                debug!(
                    "event=session_reload module=session status=detached session_id={} entity_type={entity_type} key={key}",
                    self.session_id
                );
            }
        }
        Ok(())
    }

    /// Number of entries that a flush would write.
    pub fn pending_count(&self) -> usize {
        self.state
            .entries
            .iter()
            .filter(|entry| entry.state().is_pending())
            .count()
    }

    /// Writes every pending entry in one atomic batch.
    pub fn flush(&mut self) -> SessionResult<usize> {
        self.flush_limited(None)
    }

    /// Writes at most `limit` pending entries, oldest first, in one atomic
    /// batch. Returns affected rows.
    pub fn flush_limited(&mut self, limit: Option<usize>) -> SessionResult<usize> {
        let started_at = Instant::now();
        let pending: Vec<EntryId> = self
            .state
            .entries
            .iter()
            .filter(|entry| entry.state().is_pending())
            .map(ChangeEntry::id)
            .take(limit.unwrap_or(usize::MAX))
            .collect();
        if pending.is_empty() {
            return Ok(0);
        }

        let writes = match self.build_writes(&pending) {
            Ok(writes) => writes,
            Err(err) => {
                error!(
                    "event=session_flush module=session status=error session_id={} entries={} error={err}",
                    self.session_id,
                    pending.len()
                );
                return Err(err);
            }
        };

        let outcome = match self.state.store.apply(&writes) {
            Ok(outcome) => outcome,
            Err(err) => {
                let err = SessionError::from(err);
                error!(
                    "event=session_flush module=session status=error session_id={} entries={} duration_ms={} error={err}",
                    self.session_id,
                    pending.len(),
                    started_at.elapsed().as_millis()
                );
                return Err(err);
            }
        };

        let mut removed = Vec::new();
        for (id, assigned) in pending.iter().zip(outcome.assigned_keys.iter()) {
            let Some(entry) = self.entry_mut(*id) else {
                continue;
            };
            match entry.state() {
                EntryState::Deleted => removed.push(*id),
                _ => {
                    if let Some(key) = assigned {
                        entry.record_mut().set_key(*key);
                    }
                    entry.accept_current();
                }
            }
        }
        self.state
            .entries
            .retain(|entry| !removed.contains(&entry.id()));

        info!(
            "event=session_flush module=session status=ok session_id={} entries={} affected_rows={} duration_ms={}",
            self.session_id,
            pending.len(),
            outcome.affected_rows,
            started_at.elapsed().as_millis()
        );
        Ok(outcome.affected_rows)
    }

    fn build_writes(&self, pending: &[EntryId]) -> SessionResult<Vec<PendingWrite>> {
        let mut writes = Vec::with_capacity(pending.len());
        for id in pending {
            let Some(entry) = self.entry(*id) else {
                continue;
            };
            let record = entry.record();
            let entity_type = record.entity_type();
            let write = match entry.state() {
                EntryState::Added => {
                    validate_record(record)?;
                    PendingWrite::Insert {
                        entity_type,
                        payload: record.to_payload()?,
                    }
                }
                EntryState::Modified => {
                    validate_record(record)?;
                    PendingWrite::Update {
                        entity_type,
                        key: record.key(),
                        payload: record.to_payload()?,
                    }
                }
                EntryState::Deleted => PendingWrite::Delete {
                    entity_type,
                    key: record.key(),
                },
                EntryState::Unchanged => continue,
            };
            writes.push(write);
        }
        Ok(writes)
    }

    fn push_entry(&mut self, state: EntryState, record: Box<dyn TrackedRecord>) -> EntryId {
        let id = self.state.next_entry_id;
        self.state.next_entry_id += 1;
        self.state.entries.push(ChangeEntry::new(id, state, record));
        id
    }
}

/// Provisional keys mirror entry ids on the negative side.
fn provisional_key(id: EntryId) -> RowKey {
    -RowKey::try_from(id).unwrap_or(RowKey::MAX)
}

fn validate_record(record: &dyn TrackedRecord) -> SessionResult<()> {
    record
        .validate()
        .map_err(|err| SessionError::ConstraintViolation(err.to_string()))
}
