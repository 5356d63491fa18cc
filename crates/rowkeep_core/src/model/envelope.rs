//! Lifecycle envelopes carried by every persisted entity.
//!
//! # Responsibility
//! - Hold creation/modification timestamps and active/deleted flags.
//! - Provide the stamping helpers used by service write paths.
//!
//! # Invariants
//! - `date_created_utc <= date_last_modified_utc` once an entity was added.
//! - `is_deleted` is never cleared; soft delete is irreversible.
//! - `date_inactivated_utc` is `Some` only while `is_active == false`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Derived lifecycle view over envelope flags.
///
/// `Deleted` wins over `Inactive` because a soft-deleted row is never
/// re-checked for activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Active,
    Inactive,
    Deleted,
}

/// Common lifecycle metadata attached to every persisted entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordEnvelope {
    pub date_created_utc: DateTime<Utc>,
    pub date_last_modified_utc: DateTime<Utc>,
    /// Set on deactivate, cleared on activate.
    pub date_inactivated_utc: Option<DateTime<Utc>>,
    /// Set on soft delete, never cleared.
    pub date_flagged_for_deletion_utc: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub is_deleted: bool,
}

impl Default for RecordEnvelope {
    fn default() -> Self {
        Self {
            date_created_utc: DateTime::<Utc>::UNIX_EPOCH,
            date_last_modified_utc: DateTime::<Utc>::UNIX_EPOCH,
            date_inactivated_utc: None,
            date_flagged_for_deletion_utc: None,
            is_active: true,
            is_deleted: false,
        }
    }
}

impl RecordEnvelope {
    /// Stamps a freshly created record.
    pub fn mark_created(&mut self, now: DateTime<Utc>) {
        self.date_created_utc = now;
        self.date_last_modified_utc = now;
        self.is_active = true;
        self.is_deleted = false;
    }

    pub fn mark_modified(&mut self, now: DateTime<Utc>) {
        self.date_last_modified_utc = now;
    }

    pub fn mark_active(&mut self) {
        self.is_active = true;
        self.date_inactivated_utc = None;
    }

    pub fn mark_inactive(&mut self, now: DateTime<Utc>) {
        self.is_active = false;
        self.date_inactivated_utc = Some(now);
    }

    /// Flags the record as softly deleted. The row itself is kept.
    pub fn mark_deleted(&mut self, now: DateTime<Utc>) {
        self.is_deleted = true;
        self.date_flagged_for_deletion_utc = Some(now);
    }

    pub fn lifecycle(&self) -> Lifecycle {
        if self.is_deleted {
            Lifecycle::Deleted
        } else if self.is_active {
            Lifecycle::Active
        } else {
            Lifecycle::Inactive
        }
    }
}

/// Record envelope extended with actor stamps.
///
/// `K` is the caller's opaque user key. User records themselves are resolved
/// by callers; only keys are stored here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStampedEnvelope<K> {
    #[serde(flatten)]
    pub record: RecordEnvelope,
    /// Set once on add and never rewritten afterwards.
    pub created_by_id: Option<K>,
    /// Overwritten on every mutating call.
    pub last_modified_by_id: Option<K>,
}

impl<K> Default for UserStampedEnvelope<K> {
    fn default() -> Self {
        Self {
            record: RecordEnvelope::default(),
            created_by_id: None,
            last_modified_by_id: None,
        }
    }
}

impl<K: Clone> UserStampedEnvelope<K> {
    pub fn stamp_created_by(&mut self, user_id: &K) {
        self.created_by_id = Some(user_id.clone());
        self.last_modified_by_id = Some(user_id.clone());
    }

    pub fn stamp_modified_by(&mut self, user_id: &K) {
        self.last_modified_by_id = Some(user_id.clone());
    }
}
