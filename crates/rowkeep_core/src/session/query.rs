//! Lazily evaluated row sequences over one entity type.

use super::{ChangeSession, SessionResult};
use crate::model::entity::Entity;
use crate::store::Store;
use std::marker::PhantomData;
use std::sync::Arc;

type RowFilter<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Restartable query handle.
///
/// Building a query never touches storage. Each terminal call (`fetch`,
/// `iter`, `count`, `first`) re-reads the store, so later calls observe
/// rows flushed in between.
pub struct Query<T: Entity, S: Store> {
    session: Arc<ChangeSession<S>>,
    filter: Option<RowFilter<T>>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity, S: Store> Clone for Query<T, S> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            filter: self.filter.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity, S: Store> Query<T, S> {
    pub(crate) fn new(session: Arc<ChangeSession<S>>) -> Self {
        Self {
            session,
            filter: None,
            _entity: PhantomData,
        }
    }

    /// Narrows the query; filters compose with logical AND.
    pub fn filter<F>(self, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let filter: RowFilter<T> = match self.filter {
            Some(previous) => Arc::new(move |row: &T| previous(row) && predicate(row)),
            None => Arc::new(predicate),
        };
        Self {
            session: self.session,
            filter: Some(filter),
            _entity: PhantomData,
        }
    }

    pub fn fetch(&self) -> SessionResult<Vec<T>> {
        let rows = self.session.lock()?.scan::<T>()?;
        Ok(match &self.filter {
            Some(filter) => rows.into_iter().filter(|row| filter(row)).collect(),
            None => rows,
        })
    }

    pub fn iter(&self) -> SessionResult<std::vec::IntoIter<T>> {
        Ok(self.fetch()?.into_iter())
    }

    pub fn count(&self) -> SessionResult<usize> {
        Ok(self.fetch()?.len())
    }

    pub fn first(&self) -> SessionResult<Option<T>> {
        Ok(self.fetch()?.into_iter().next())
    }
}
