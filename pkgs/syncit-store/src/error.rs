//! Error types for document store operations

use sea_orm::DbErr;
use thiserror::Error;

/// Errors that can occur when talking to a document store backend
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The backend could not be reached; the call may be retried
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
    #[error("Document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },
    #[error("Document already exists: {collection}/{id}")]
    AlreadyExists { collection: String, id: String },
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Write failed: {0}")]
    Write(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether the failure is a connectivity problem rather than a rejection
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }

    pub(crate) fn not_found(collection: &str, id: &str) -> Self {
        StoreError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }

    pub(crate) fn already_exists(collection: &str, id: &str) -> Self {
        StoreError::AlreadyExists {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }
}

impl From<DbErr> for StoreError {
    fn from(e: DbErr) -> Self {
        match e {
            DbErr::Conn(_) | DbErr::ConnectionAcquire(_) => StoreError::Unavailable(e.to_string()),
            other => StoreError::Write(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}
