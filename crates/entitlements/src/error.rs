//! Error taxonomy for catalog and entitlement operations.

use thiserror::Error;

use modgate_core::{DomainError, ModuleId, RecordId, UserId};

use crate::MigrationPhase;

pub type EntitlementResult<T> = Result<T, EntitlementError>;

/// Every failure a catalog or entitlement operation can surface.
///
/// Each variant maps to a stable machine-readable [`code`](Self::code) used in
/// HTTP error bodies.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EntitlementError {
    /// An identifier in the input was malformed. Raised before any mutation.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid action '{0}' (expected create, update or delete)")]
    InvalidAction(String),

    #[error("user {0} not found")]
    UserNotFound(UserId),

    #[error("module {0} not found")]
    ModuleNotFound(ModuleId),

    #[error("entitlement record not found: {0}")]
    RecordNotFound(String),

    #[error("module {module_id} is already granted to user {user_id}")]
    AlreadyGranted { user_id: UserId, module_id: ModuleId },

    #[error("module {module_id} is not granted to user {user_id}")]
    ModuleNotGranted { user_id: UserId, module_id: ModuleId },

    /// The record kept changing underneath a read-modify-write.
    #[error("entitlement record {0} was modified concurrently; retry the request")]
    ConcurrentModification(RecordId),

    /// Migration committed some phases and then failed. Nothing is rolled back.
    #[error("migration of user {user_id} stopped after phase '{completed}': {reason}")]
    PartialMigration {
        user_id: UserId,
        completed: MigrationPhase,
        reason: String,
    },

    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
}

impl EntitlementError {
    pub fn record_not_found(what: impl core::fmt::Display) -> Self {
        Self::RecordNotFound(what.to_string())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::PersistenceFailure(msg.into())
    }

    /// Stable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidIdentifier(_) => "invalid_identifier",
            Self::Validation(_) => "validation_error",
            Self::InvalidAction(_) => "invalid_action",
            Self::UserNotFound(_) => "user_not_found",
            Self::ModuleNotFound(_) => "module_not_found",
            Self::RecordNotFound(_) => "record_not_found",
            Self::AlreadyGranted { .. } => "already_granted",
            Self::ModuleNotGranted { .. } => "module_not_granted",
            Self::ConcurrentModification(_) => "concurrent_modification",
            Self::PartialMigration { .. } => "partial_migration",
            Self::PersistenceFailure(_) => "persistence_failure",
        }
    }
}

impl From<DomainError> for EntitlementError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::InvalidId(msg) => Self::InvalidIdentifier(msg),
            DomainError::Validation(msg) => Self::Validation(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_id_errors_become_invalid_identifier() {
        let err: EntitlementError = "bogus".parse::<UserId>().unwrap_err().into();
        assert_eq!(err.code(), "invalid_identifier");
    }

    #[test]
    fn partial_migration_message_names_phase() {
        let err = EntitlementError::PartialMigration {
            user_id: UserId::new(),
            completed: MigrationPhase::Detached,
            reason: "db down".to_string(),
        };
        assert!(err.to_string().contains("detached"));
        assert_eq!(err.code(), "partial_migration");
    }
}
