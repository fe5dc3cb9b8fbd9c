//! Error types for group operations

use syncit_store::StoreError;
use thiserror::Error;

use crate::models::{EventId, GroupId, UserId};

pub type Result<T> = std::result::Result<T, GroupError>;

/// Errors surfaced by membership, visibility and session operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GroupError {
    /// The backend could not be reached. When `applied_locally` is set the
    /// mutation was patched into the cached view and will be overwritten by
    /// the next snapshot from the backend.
    #[error("Network error: {message}")]
    TransientNetwork {
        message: String,
        applied_locally: bool,
    },
    #[error("Group not found: {0}")]
    GroupNotFound(GroupId),
    #[error("Member {member_id} not found in group {group_id}")]
    MemberNotFound { group_id: GroupId, member_id: UserId },
    #[error("Event {event_id} not found in group {group_id}")]
    EventNotFound { group_id: GroupId, event_id: EventId },
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Malformed group document {doc_id}: {reason}")]
    MalformedDocument { doc_id: String, reason: String },
    #[error("Storage error: {0}")]
    Storage(String),
}

impl GroupError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GroupError::TransientNetwork { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            GroupError::GroupNotFound(_)
                | GroupError::MemberNotFound { .. }
                | GroupError::EventNotFound { .. }
        )
    }

    /// Convert a failed write to `group_id`. The store only knows the
    /// document is gone; here it is a group that no longer exists.
    pub fn from_group_write(e: StoreError, group_id: GroupId) -> Self {
        match e {
            StoreError::NotFound { .. } => GroupError::GroupNotFound(group_id),
            other => other.into(),
        }
    }

    /// Short text suitable for showing to the person who triggered the error
    pub fn user_message(&self) -> &'static str {
        match self {
            GroupError::TransientNetwork { .. } => "Please check your internet connection.",
            GroupError::GroupNotFound(_) => "Group not found or no longer available.",
            GroupError::MemberNotFound { .. } | GroupError::EventNotFound { .. } => {
                "Data not found."
            }
            GroupError::PermissionDenied(_) => {
                "You don't have permission to perform this action."
            }
            GroupError::Validation(_) => "Please check the details and try again.",
            _ => "Something went wrong. Please try again.",
        }
    }
}

impl From<StoreError> for GroupError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(message) => GroupError::TransientNetwork {
                message,
                applied_locally: false,
            },
            StoreError::PermissionDenied(message) => GroupError::PermissionDenied(message),
            StoreError::AlreadyExists { collection, id } => {
                GroupError::Conflict(format!("{}/{} already exists", collection, id))
            }
            other => GroupError::Storage(other.to_string()),
        }
    }
}
