//! Type-scoped record service.
//!
//! # Responsibility
//! - Stamp lifecycle envelopes on add/update/activate/deactivate/delete.
//! - Commit only the pending entries owned by its entity type.
//! - Undo pending entries of its entity type.
//!
//! # Invariants
//! - A commit never writes entries owned by another entity type, and every
//!   such entry leaves the commit in the state it entered with, on success
//!   and on failure.
//! - Soft delete never removes rows.
//! - Range operations share one timestamp and issue at most one commit.

use crate::model::entity::{Entity, RowKey};
use crate::session::{
    ChangeEntry, ChangeSession, EntryId, EntryState, Query, SessionGuard, SessionResult,
};
use crate::store::Store;
use chrono::Utc;
use log::{debug, error, info};
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

/// Entries per store transaction used by `bulk_commit`.
pub const DEFAULT_BULK_CHUNK_SIZE: usize = 500;

/// Original states of foreign entries coerced to `Unchanged`, grouped by
/// state.
type CoercedEntries = BTreeMap<EntryState, Vec<EntryId>>;

/// Service exposing lifecycle operations for one entity type `T`.
pub struct ScopedService<T: Entity, S: Store> {
    session: Arc<ChangeSession<S>>,
    bulk_chunk_size: usize,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity, S: Store> Clone for ScopedService<T, S> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            bulk_chunk_size: self.bulk_chunk_size,
            _entity: PhantomData,
        }
    }
}

impl<T: Entity, S: Store> ScopedService<T, S> {
    pub fn new(session: Arc<ChangeSession<S>>) -> Self {
        Self {
            session,
            bulk_chunk_size: DEFAULT_BULK_CHUNK_SIZE,
            _entity: PhantomData,
        }
    }

    /// Overrides the chunk size used by `bulk_commit`. Zero is treated as one.
    pub fn with_bulk_chunk_size(mut self, chunk_size: usize) -> Self {
        self.bulk_chunk_size = chunk_size.max(1);
        self
    }

    pub fn session(&self) -> &Arc<ChangeSession<S>> {
        &self.session
    }

    /// Registers a new record and optionally commits.
    ///
    /// Returns the tracked entity; after a commit it carries its generated key.
    pub fn add(&self, mut entity: T, save_after: bool) -> SessionResult<T> {
        entity.envelope_mut().mark_created(Utc::now());
        let entry_id = self.session.lock()?.add(entity.clone());
        if save_after {
            self.commit()?;
        }
        self.tracked_or(entry_id, entity)
    }

    /// Registers many new records with one shared timestamp.
    pub fn add_range(&self, mut entities: Vec<T>, save_after: bool) -> SessionResult<()> {
        let now = Utc::now();
        for entity in &mut entities {
            entity.envelope_mut().mark_created(now);
        }
        self.session.lock()?.add_range(entities);
        if save_after {
            self.commit()?;
        }
        Ok(())
    }

    /// Registers a modification of a stored or still pending record.
    ///
    /// # Errors
    /// - `NotFound` when the entity was never added, or its provisional key
    ///   is no longer tracked.
    /// - `ConcurrencyConflict` on commit when a stored key has no row.
    pub fn update(&self, mut entity: T, save_after: bool) -> SessionResult<T> {
        entity.envelope_mut().mark_modified(Utc::now());
        let entry_id = self.session.lock()?.update(entity.clone())?;
        if save_after {
            self.commit()?;
        }
        self.tracked_or(entry_id, entity)
    }

    pub fn update_range(&self, mut entities: Vec<T>, save_after: bool) -> SessionResult<()> {
        let now = Utc::now();
        for entity in &mut entities {
            entity.envelope_mut().mark_modified(now);
        }
        self.session.lock()?.update_range(entities)?;
        if save_after {
            self.commit()?;
        }
        Ok(())
    }

    pub fn activate(&self, mut entity: T, save_after: bool) -> SessionResult<T> {
        entity.envelope_mut().mark_active();
        self.update(entity, save_after)
    }

    pub fn activate_range(&self, mut entities: Vec<T>, save_after: bool) -> SessionResult<()> {
        for entity in &mut entities {
            entity.envelope_mut().mark_active();
        }
        self.update_range(entities, save_after)
    }

    pub fn deactivate(&self, mut entity: T, save_after: bool) -> SessionResult<T> {
        entity.envelope_mut().mark_inactive(Utc::now());
        self.update(entity, save_after)
    }

    pub fn deactivate_range(&self, mut entities: Vec<T>, save_after: bool) -> SessionResult<()> {
        let now = Utc::now();
        for entity in &mut entities {
            entity.envelope_mut().mark_inactive(now);
        }
        self.update_range(entities, save_after)
    }

    /// Soft-deletes a record. The row stays retrievable.
    pub fn delete(&self, mut entity: T, save_after: bool) -> SessionResult<T> {
        entity.envelope_mut().mark_deleted(Utc::now());
        self.update(entity, save_after)
    }

    pub fn delete_range(&self, mut entities: Vec<T>, save_after: bool) -> SessionResult<()> {
        let now = Utc::now();
        for entity in &mut entities {
            entity.envelope_mut().mark_deleted(now);
        }
        self.update_range(entities, save_after)
    }

    /// Updates a tracked or stored record, or adds a new one.
    ///
    /// A record still pending from an earlier `add` is merged into its entry
    /// and stays `Added`.
    pub fn save(&self, entity: T, save_after: bool) -> SessionResult<T> {
        if self.is_persisted(&entity)? {
            self.update(entity, save_after)
        } else {
            self.add(entity, save_after)
        }
    }

    /// Saves each element independently, in input order.
    ///
    /// Costs one round trip per element; not meant for large batches.
    pub fn save_range(&self, entities: Vec<T>, save_after: bool) -> SessionResult<Vec<T>> {
        entities
            .into_iter()
            .map(|entity| self.save(entity, save_after))
            .collect()
    }

    /// Whether `entity` carries a key the session tracks (including a
    /// provisional one) or the store holds.
    pub fn is_persisted(&self, entity: &T) -> SessionResult<bool> {
        if !entity.has_key() {
            return Ok(false);
        }
        self.exists(entity.key())
    }

    pub fn exists(&self, key: RowKey) -> SessionResult<bool> {
        self.session.lock()?.contains::<T>(key)
    }

    /// Flushes pending entries of `T` only. Returns affected rows.
    pub fn commit(&self) -> SessionResult<usize> {
        let started_at = Instant::now();
        let mut guard = self.session.lock()?;
        let coerced = coerce_foreign_entries(&mut guard, T::ENTITY_TYPE);
        let result = guard.flush();
        restore_foreign_entries(&mut guard, coerced);
        log_commit("service_commit", &guard, T::ENTITY_TYPE, started_at, &result);
        result
    }

    /// Flushes pending entries of `T` in chunks of `bulk_chunk_size`, one
    /// store transaction per chunk.
    ///
    /// A failing chunk is rolled back; chunks written before it stay
    /// committed.
    pub fn bulk_commit(&self) -> SessionResult<usize> {
        let started_at = Instant::now();
        let mut guard = self.session.lock()?;
        let coerced = coerce_foreign_entries(&mut guard, T::ENTITY_TYPE);
        let result = flush_in_chunks(&mut guard, self.bulk_chunk_size);
        restore_foreign_entries(&mut guard, coerced);
        log_commit(
            "service_bulk_commit",
            &guard,
            T::ENTITY_TYPE,
            started_at,
            &result,
        );
        result
    }

    /// Undoes every pending entry of `T`.
    pub fn undo_all(&self) -> SessionResult<()> {
        let mut guard = self.session.lock()?;
        let owned: Vec<EntryId> = guard
            .entries()
            .into_iter()
            .filter(|entry| entry.entity_type == T::ENTITY_TYPE)
            .map(|entry| entry.id)
            .collect();
        for id in &owned {
            undo_entry(&mut guard, *id)?;
        }
        debug!(
            "event=service_undo module=service status=ok session_id={} entity_type={} scope=all entries={}",
            guard.session_id(),
            T::ENTITY_TYPE,
            owned.len()
        );
        Ok(())
    }

    /// Undoes the pending entry of one entity. No entry means no-op.
    pub fn undo_one(&self, entity: &T) -> SessionResult<()> {
        let mut guard = self.session.lock()?;
        let Some(id) = guard.entry_id_for(entity) else {
            return Ok(());
        };
        undo_entry(&mut guard, id)?;
        debug!(
            "event=service_undo module=service status=ok session_id={} entity_type={} scope=one key={}",
            guard.session_id(),
            T::ENTITY_TYPE,
            entity.key()
        );
        Ok(())
    }

    pub fn get(&self, key: RowKey) -> SessionResult<Option<T>> {
        self.session.lock()?.find::<T>(key)
    }

    pub fn get_all(&self) -> Query<T, S> {
        Query::new(Arc::clone(&self.session))
    }

    pub fn get_all_active(&self) -> Query<T, S> {
        self.get_all().filter(|entity: &T| entity.envelope().is_active)
    }

    pub fn get_all_matching<F>(&self, predicate: F) -> Query<T, S>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.get_all().filter(predicate)
    }

    /// Pending (non-`Unchanged`) entries owned by `T`.
    pub fn pending_count(&self) -> SessionResult<usize> {
        Ok(self
            .session
            .lock()?
            .entries()
            .iter()
            .filter(|entry| entry.entity_type == T::ENTITY_TYPE && entry.state.is_pending())
            .count())
    }

    fn tracked_or(&self, entry_id: EntryId, fallback: T) -> SessionResult<T> {
        Ok(self
            .session
            .lock()?
            .tracked::<T>(entry_id)
            .unwrap_or(fallback))
    }
}

fn coerce_foreign_entries<S: Store>(guard: &mut SessionGuard<'_, S>, owner: &str) -> CoercedEntries {
    let mut coerced = CoercedEntries::new();
    for entry in guard
        .entries_mut()
        .filter(|entry| !entry.is_owned_by(owner) && entry.state().is_pending())
    {
        coerced.entry(entry.state()).or_default().push(entry.id());
        entry.set_state(EntryState::Unchanged);
    }
    coerced
}

fn restore_foreign_entries<S: Store>(guard: &mut SessionGuard<'_, S>, coerced: CoercedEntries) {
    for (state, ids) in coerced {
        for entry in guard
            .entries_mut()
            .filter(|entry| ids.contains(&entry.id()))
        {
            entry.set_state(state);
        }
    }
}

fn flush_in_chunks<S: Store>(guard: &mut SessionGuard<'_, S>, chunk_size: usize) -> SessionResult<usize> {
    let mut affected = 0;
    while guard.pending_count() > 0 {
        affected += guard.flush_limited(Some(chunk_size))?;
    }
    Ok(affected)
}

fn undo_entry<S: Store>(guard: &mut SessionGuard<'_, S>, id: EntryId) -> SessionResult<()> {
    match guard.state_of(id) {
        Some(EntryState::Modified) => {
            if guard.entry(id).is_some_and(ChangeEntry::has_original) {
                guard.discard_modifications(id);
            } else {
                guard.reload(id)?;
            }
        }
        Some(EntryState::Added) => {
            guard.detach(id);
        }
        Some(EntryState::Deleted) => guard.reload(id)?,
        Some(EntryState::Unchanged) | None => {}
    }
    Ok(())
}

fn log_commit<S: Store>(
    event: &str,
    guard: &SessionGuard<'_, S>,
    entity_type: &str,
    started_at: Instant,
    result: &SessionResult<usize>,
) {
    match result {
        Ok(affected) => info!(
            "event={event} module=service status=ok session_id={} entity_type={entity_type} affected_rows={affected} duration_ms={}",
            guard.session_id(),
            started_at.elapsed().as_millis()
        ),
        Err(err) => error!(
            "event={event} module=service status=error session_id={} entity_type={entity_type} duration_ms={} error={err}",
            guard.session_id(),
            started_at.elapsed().as_millis()
        ),
    }
}
