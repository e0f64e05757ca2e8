//! Error types for the primary storage framework
//!
//! Provides structured error types for the type registry, provider factories,
//! the capacity updater, the extension-point dispatcher and the API surface.

use crate::domain::model::ErrorCode;
use thiserror::Error;

/// Unified error type for the framework
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Registry Errors
    // =========================================================================
    #[error("Unknown primary storage type: {storage_type}")]
    UnknownStorageType { storage_type: String },

    #[error("Primary storage type already registered: {storage_type}")]
    DuplicateStorageType { storage_type: String },

    // =========================================================================
    // Persistence Errors
    // =========================================================================
    #[error("Resource not found: {kind}/{id}")]
    NotFound { kind: String, id: String },

    #[error("Resource already exists: {kind}/{id}")]
    PersistenceConflict { kind: String, id: String },

    #[error("Concurrent capacity update on primary storage {id}")]
    CapacityConflict { id: String },

    // =========================================================================
    // Request Errors
    // =========================================================================
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Session id is required")]
    SessionRequired,

    #[error("Session is invalid or expired")]
    SessionInvalid,

    // =========================================================================
    // Extension Point Errors
    // =========================================================================
    #[error("Extension point {hook} aborted the operation: {reason}")]
    HookAborted { hook: String, reason: String },

    // =========================================================================
    // Parse/IO Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    pub fn conflict(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Error::PersistenceConflict {
            kind: kind.into(),
            id: id.into(),
        }
    }

    pub fn unknown_type(storage_type: impl Into<String>) -> Self {
        Error::UnknownStorageType {
            storage_type: storage_type.into(),
        }
    }

    /// Transient errors are retried by the capacity updater
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::CapacityConflict { .. })
    }

    /// Stable machine-readable code for this error
    pub fn code(&self) -> &'static str {
        match self {
            Error::Internal(_) => "SYS.1000",
            Error::Configuration(_) => "SYS.1001",
            Error::UnknownStorageType { .. } => "PS.1000",
            Error::DuplicateStorageType { .. } => "PS.1001",
            Error::NotFound { .. } => "SYS.1006",
            Error::PersistenceConflict { .. } => "SYS.1008",
            Error::CapacityConflict { .. } => "PS.1002",
            Error::Validation(_) => "SYS.1007",
            Error::SessionRequired | Error::SessionInvalid => "ID.1001",
            Error::HookAborted { .. } => "PS.1003",
            Error::JsonParse(_) | Error::YamlParse(_) => "SYS.1002",
            Error::Io(_) => "SYS.1003",
        }
    }

    /// Serializable form handed to failure hooks and API clients
    pub fn to_error_code(&self) -> ErrorCode {
        ErrorCode {
            code: self.code().to_string(),
            description: self.to_string(),
            details: None,
        }
    }
}

/// Result type alias for the framework
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_transient() {
        let transient = Error::CapacityConflict { id: "ps-1".into() };
        assert!(transient.is_transient());

        let conflict = Error::conflict("PrimaryStorage", "ps-1");
        assert!(!conflict.is_transient());

        let validation = Error::Validation("name is required".into());
        assert!(!validation.is_transient());
    }

    #[test]
    fn test_error_code() {
        let err = Error::unknown_type("Ceph");
        let code = err.to_error_code();
        assert_eq!(code.code, "PS.1000");
        assert_eq!(code.description, "Unknown primary storage type: Ceph");
        assert!(code.details.is_none());

        assert_eq!(Error::not_found("PrimaryStorage", "x").code(), "SYS.1006");
    }
}
