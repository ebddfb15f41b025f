mod context;
mod exit_codes;
mod format;
#[cfg(test)]
mod tests;

pub use context::ErrorContext;
pub use exit_codes::get_exit_code;
pub use format::{format_error_chain, format_error_with_color};

use crate::locking::timeout::LockTimeoutValue;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LeaseError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Coordinator '{coordinator}' is unavailable: {details}")]
    CoordinatorUnavailable { coordinator: String, details: String },

    #[error("Quorum unavailable for '{resource}': {reachable} of {required} required coordinators reachable")]
    QuorumUnavailable {
        resource: String,
        reachable: usize,
        required: usize,
    },

    #[error("Timed out acquiring lock on '{resource}' after {waited_secs:.1}s (timeout: {timeout_value})")]
    LockTimeout {
        resource: String,
        waited_secs: f64,
        timeout_value: LockTimeoutValue,
    },

    #[error("Lock acquisition for '{resource}' cancelled after {waited_secs:.1}s")]
    Cancelled { resource: String, waited_secs: f64 },

    #[error("Lease on '{resource}' was lost; the lock may no longer be held")]
    LeaseLost { resource: String },

    #[error("A lease on '{resource}' is already held by this lock instance")]
    AlreadyHeld { resource: String },

    #[error("Mutual exclusion violated on '{resource}': {holders} simultaneous holders observed")]
    ExclusionViolated { resource: String, holders: usize },

    #[error("Configuration file error: {0}")]
    ConfigFile(String),

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl LeaseError {
    pub(crate) fn unavailable(coordinator: impl Into<String>, details: impl Into<String>) -> Self {
        LeaseError::CoordinatorUnavailable {
            coordinator: coordinator.into(),
            details: details.into(),
        }
    }

    /// True for failures caused by unreachable coordination nodes rather than by the caller.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            LeaseError::CoordinatorUnavailable { .. } | LeaseError::QuorumUnavailable { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, LeaseError>;
