//! Authentication-gated value holder.
//!
//! # Invariants
//! - Reads by unauthenticated callers yield `T::default()`, never the value.
//! - Writes are refused only when the gate requires authentication and the
//!   caller is absent or unauthenticated.

use log::warn;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Caller identity as seen by the gate.
pub trait Principal {
    fn is_authenticated(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessError {
    Refused,
}

impl Display for AccessError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Refused => write!(f, "write refused: authenticated principal required"),
        }
    }
}

impl Error for AccessError {}

/// Single value guarded by an authentication check.
#[derive(Debug, Clone, Default)]
pub struct GuardedValue<T> {
    write_requires_auth: bool,
    value: T,
}

impl<T: Clone + Default> GuardedValue<T> {
    pub fn new(write_requires_auth: bool) -> Self {
        Self {
            write_requires_auth,
            value: T::default(),
        }
    }

    pub fn write_requires_auth(&self) -> bool {
        self.write_requires_auth
    }

    pub fn read<P: Principal>(&self, principal: Option<&P>) -> T {
        if is_authenticated(principal) {
            self.value.clone()
        } else {
            T::default()
        }
    }

    pub fn write<P: Principal>(&mut self, value: T, principal: Option<&P>) -> Result<(), AccessError> {
        if self.write_requires_auth && !is_authenticated(principal) {
            warn!("event=guarded_write module=auth status=refused");
            return Err(AccessError::Refused);
        }
        self.value = value;
        Ok(())
    }
}

fn is_authenticated<P: Principal>(principal: Option<&P>) -> bool {
    principal.is_some_and(|caller| caller.is_authenticated())
}
