//! Error types for the session persistence engine

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Coarse error classification surfaced to hosts.
///
/// Every [`StoreError`] maps to exactly one kind; hosts translate kinds to
/// exit codes or UI affordances without matching on the full enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    ValidationFailed,
    CorruptedData,
    PermissionDenied,
    Io,
    MigrationFailed,
    ProblematicSession,
    Cancelled,
    Timeout,
    ConfigInvalid,
}

/// Failure stage within a migration chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MigrationErrorKind {
    UnsupportedVersion,
    NoMigrationPath,
    MigrationFailed,
    ValidationFailed,
    BackupFailed,
    RollbackFailed,
    CorruptedData,
}

/// Choices offered to the user when a session cannot be restored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOption {
    Retry,
    NewSession,
    SelectDifferent,
    SkipSession,
}

#[derive(Error, Debug)]
pub enum StoreError {
    /// Session not found in storage or index
    #[error("session not found: {0}")]
    NotFound(Uuid),

    /// A file the operation depends on is missing
    #[error("path not found: {0}")]
    PathNotFound(PathBuf),

    /// Duplicate ID on create or import
    #[error("session already exists: {0}")]
    AlreadyExists(Uuid),

    /// Schema or invariant violation
    #[error("validation failed: {0}")]
    Validation(String),

    /// JSON parse failure or checksum mismatch
    #[error("corrupted data: {0}")]
    CorruptedData(String),

    /// Filesystem permissions invalid and not repairable
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Non-retryable filesystem failure, or retries exhausted
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization failure while encoding engine data
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration chain failure with the stage that failed
    #[error("migration failed ({kind:?}): {message}")]
    Migration {
        kind: MigrationErrorKind,
        message: String,
        /// False when the pre-migration backup could not be written.
        rollback_available: bool,
    },

    /// Restoration blocked by the error-recovery policy
    #[error("session {0} is marked problematic; restoration blocked")]
    Problematic(Uuid),

    /// User rejected a confirmation prompt
    #[error("operation cancelled")]
    Cancelled,

    /// Background task exceeded its deadline
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Rejected configuration value
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Auto-save retries exhausted
    #[error("auto-save failed: {0}")]
    AutoSaveFailed(String),
}

impl StoreError {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) | Self::PathNotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::Validation(_) => ErrorKind::ValidationFailed,
            Self::CorruptedData(_) | Self::Json(_) => ErrorKind::CorruptedData,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::Io(_) | Self::AutoSaveFailed(_) => ErrorKind::Io,
            Self::Migration { .. } => ErrorKind::MigrationFailed,
            Self::Problematic(_) => ErrorKind::ProblematicSession,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::ConfigInvalid(_) => ErrorKind::ConfigInvalid,
        }
    }

    /// Recovery choices to surface alongside this error, empty when the
    /// failure is not user-recoverable.
    pub const fn recovery_options(&self) -> &'static [RecoveryOption] {
        match self {
            Self::Problematic(_) => &[
                RecoveryOption::Retry,
                RecoveryOption::NewSession,
                RecoveryOption::SelectDifferent,
                RecoveryOption::SkipSession,
            ],
            Self::CorruptedData(_) | Self::Migration { .. } => &[
                RecoveryOption::NewSession,
                RecoveryOption::SelectDifferent,
                RecoveryOption::SkipSession,
            ],
            _ => &[],
        }
    }

    /// True when a local retry with backoff is worthwhile.
    pub fn is_retryable_io(err: &io::Error) -> bool {
        matches!(
            err.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_cover_taxonomy() {
        let id = Uuid::new_v4();
        assert_eq!(StoreError::NotFound(id).kind(), ErrorKind::NotFound);
        assert_eq!(
            StoreError::CorruptedData("bad".into()).kind(),
            ErrorKind::CorruptedData
        );
        assert_eq!(
            StoreError::Migration {
                kind: MigrationErrorKind::NoMigrationPath,
                message: "0.5.0".into(),
                rollback_available: false,
            }
            .kind(),
            ErrorKind::MigrationFailed
        );
        assert_eq!(StoreError::Cancelled.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn problematic_offers_all_recovery_options() {
        let err = StoreError::Problematic(Uuid::new_v4());
        assert_eq!(err.recovery_options().len(), 4);
        assert!(err.recovery_options().contains(&RecoveryOption::Retry));
    }

    #[test]
    fn io_errors_carry_no_recovery_options() {
        let err = StoreError::Io(io::Error::other("disk gone"));
        assert!(err.recovery_options().is_empty());
    }
}
