//! Record model shared by every managed entity type.
//!
//! # Responsibility
//! - Define lifecycle envelopes and the entity contract.
//! - Keep soft-delete/activation semantics in one place.
//!
//! # Invariants
//! - Deletion is represented by soft-delete flags, not row removal.
//! - Every flushed entity is identified by a store-generated `RowKey`.

pub mod entity;
pub mod envelope;
