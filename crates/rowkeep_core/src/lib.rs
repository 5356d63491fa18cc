//! Record services with soft-delete semantics and per-type commit isolation.
//! Every service shares one change session; each commits only its own type.

pub mod auth;
pub mod db;
pub mod logging;
pub mod model;
pub mod service;
pub mod session;
pub mod store;

pub use auth::{AccessError, GuardedValue, Principal};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::entity::{
    is_provisional_key, Entity, EntityValidationError, RowKey, UserStamped, UNASSIGNED_KEY,
};
pub use model::envelope::{Lifecycle, RecordEnvelope, UserStampedEnvelope};
pub use service::scoped_service::{ScopedService, DEFAULT_BULK_CHUNK_SIZE};
pub use service::user_service::UserService;
pub use session::{
    ChangeEntry, ChangeSession, EntryId, EntrySnapshot, EntryState, Query, SessionError,
    SessionGuard, SessionResult,
};
pub use store::{
    ApplyOutcome, PendingWrite, SqliteStore, Store, StoreError, StoreResult, StoredRecord,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
