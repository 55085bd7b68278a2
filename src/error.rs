//! Error types for the simulation engine.

use std::collections::TryReserveError;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Allocation failure: {0}")]
    AllocationFailure(String),
}

impl SimError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        SimError::InvalidArgument(msg.into())
    }

    /// Wraps a failed `try_reserve` with the name of what was being allocated.
    pub fn alloc(what: &str, err: TryReserveError) -> Self {
        SimError::AllocationFailure(format!("{}: {}", what, err))
    }
}

pub type Result<T> = std::result::Result<T, SimError>;
