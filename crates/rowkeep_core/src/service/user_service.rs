//! Actor-stamping decorator over `ScopedService`.
//!
//! # Invariants
//! - `created_by_id` is written only on the add path.
//! - `last_modified_by_id` is written on every mutating call.
//! - Reads, commit and undo are the inner service's, unchanged.

use super::scoped_service::ScopedService;
use crate::model::entity::UserStamped;
use crate::session::{ChangeSession, SessionResult};
use crate::store::Store;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;

/// Scoped service that records which user touched each record.
pub struct UserService<T, K, S>
where
    T: UserStamped<K>,
    S: Store,
{
    inner: ScopedService<T, S>,
    _user_key: PhantomData<fn(K)>,
}

impl<T, K, S> UserService<T, K, S>
where
    T: UserStamped<K>,
    K: Clone,
    S: Store,
{
    pub fn new(session: Arc<ChangeSession<S>>) -> Self {
        Self::from_scoped(ScopedService::new(session))
    }

    pub fn from_scoped(inner: ScopedService<T, S>) -> Self {
        Self {
            inner,
            _user_key: PhantomData,
        }
    }

    pub fn add(&self, mut entity: T, user_id: &K, save_after: bool) -> SessionResult<T> {
        entity.user_envelope_mut().stamp_created_by(user_id);
        self.inner.add(entity, save_after)
    }

    pub fn add_range(&self, mut entities: Vec<T>, user_id: &K, save_after: bool) -> SessionResult<()> {
        for entity in &mut entities {
            entity.user_envelope_mut().stamp_created_by(user_id);
        }
        self.inner.add_range(entities, save_after)
    }

    pub fn update(&self, entity: T, user_id: &K, save_after: bool) -> SessionResult<T> {
        self.inner.update(stamp_modified(entity, user_id), save_after)
    }

    pub fn update_range(&self, entities: Vec<T>, user_id: &K, save_after: bool) -> SessionResult<()> {
        self.inner
            .update_range(stamp_all_modified(entities, user_id), save_after)
    }

    pub fn activate(&self, entity: T, user_id: &K, save_after: bool) -> SessionResult<T> {
        self.inner.activate(stamp_modified(entity, user_id), save_after)
    }

    pub fn activate_range(&self, entities: Vec<T>, user_id: &K, save_after: bool) -> SessionResult<()> {
        self.inner
            .activate_range(stamp_all_modified(entities, user_id), save_after)
    }

    pub fn deactivate(&self, entity: T, user_id: &K, save_after: bool) -> SessionResult<T> {
        self.inner
            .deactivate(stamp_modified(entity, user_id), save_after)
    }

    pub fn deactivate_range(
        &self,
        entities: Vec<T>,
        user_id: &K,
        save_after: bool,
    ) -> SessionResult<()> {
        self.inner
            .deactivate_range(stamp_all_modified(entities, user_id), save_after)
    }

    pub fn delete(&self, entity: T, user_id: &K, save_after: bool) -> SessionResult<T> {
        self.inner.delete(stamp_modified(entity, user_id), save_after)
    }

    pub fn delete_range(&self, entities: Vec<T>, user_id: &K, save_after: bool) -> SessionResult<()> {
        self.inner
            .delete_range(stamp_all_modified(entities, user_id), save_after)
    }

    /// Update-or-add; `created_by_id` is stamped only when adding.
    pub fn save(&self, entity: T, user_id: &K, save_after: bool) -> SessionResult<T> {
        if self.inner.is_persisted(&entity)? {
            self.update(entity, user_id, save_after)
        } else {
            self.add(entity, user_id, save_after)
        }
    }

    pub fn save_range(&self, entities: Vec<T>, user_id: &K, save_after: bool) -> SessionResult<Vec<T>> {
        entities
            .into_iter()
            .map(|entity| self.save(entity, user_id, save_after))
            .collect()
    }
}

impl<T, K, S> Deref for UserService<T, K, S>
where
    T: UserStamped<K>,
    S: Store,
{
    type Target = ScopedService<T, S>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

fn stamp_modified<T, K>(mut entity: T, user_id: &K) -> T
where
    T: UserStamped<K>,
    K: Clone,
{
    entity.user_envelope_mut().stamp_modified_by(user_id);
    entity
}

fn stamp_all_modified<T, K>(entities: Vec<T>, user_id: &K) -> Vec<T>
where
    T: UserStamped<K>,
    K: Clone,
{
    entities
        .into_iter()
        .map(|entity| stamp_modified(entity, user_id))
        .collect()
}
