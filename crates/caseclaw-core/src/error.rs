//! CaseClaw error types — one enum for the whole workspace.
//!
//! The variants follow the engine error taxonomy: NotFound / InvalidState /
//! Validation are surfaced synchronously to callers, Dependency covers
//! adapter and notification failures (logged, never fatal to the owning
//! operation), Conflict signals a stale version-checked write.

use thiserror::Error;

/// Result alias used across all CaseClaw crates.
pub type Result<T> = std::result::Result<T, CaseClawError>;

/// Workspace-wide error type.
#[derive(Debug, Error)]
pub enum CaseClawError {
    /// Record or case absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation attempted against a record not in the required status.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Missing reason, non-positive amount, empty required field.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Adapter or notification call failed.
    #[error("external dependency failed: {0}")]
    Dependency(String),

    /// State store (SQLite) failure.
    #[error("store error: {0}")]
    Store(String),

    /// Version-checked update lost the race — reload and retry.
    #[error("stale record: {0}")]
    Conflict(String),

    /// Configuration file missing/invalid.
    #[error("config error: {0}")]
    Config(String),

    /// Outreach channel failure.
    #[error("channel error: {0}")]
    Channel(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CaseClawError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let e = CaseClawError::not_found("case c-1");
        assert_eq!(e.to_string(), "not found: case c-1");

        let e = CaseClawError::invalid_state("workflow is approved, not pending");
        assert!(e.to_string().starts_with("invalid state:"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let e: CaseClawError = io.into();
        assert!(matches!(e, CaseClawError::Io(_)));
    }
}
