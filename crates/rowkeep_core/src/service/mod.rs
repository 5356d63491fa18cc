//! Record services built on a shared change session.
//!
//! # Responsibility
//! - Expose lifecycle operations per entity type.
//! - Keep callers decoupled from session entry bookkeeping.

pub mod scoped_service;
pub mod user_service;
