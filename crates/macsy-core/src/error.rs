//! Blackboard error handling
//!
//! Provides typed errors for blackboard operations. Every variant maps onto
//! one of the coarse [`ErrorKind`]s that callers branch on.

use thiserror::Error;

use crate::models::TagRef;

/// Errors that can occur during blackboard operations
#[derive(Error, Debug)]
pub enum BlackboardError {
    /// A tag reference could not be resolved
    #[error("Tag does not exist: {0}")]
    TagNotFound(TagRef),

    /// No blackboard with this name has been provisioned
    #[error("Blackboard not found: '{0}'")]
    BlackboardNotFound(String),

    /// The counter record of a blackboard is missing
    #[error("Counter record '{record}' not found in '{collection}'")]
    CounterNotFound { collection: String, record: String },

    /// A date-based blackboard has no partition for the year
    #[error("Blackboard '{blackboard}' has no shard for year {year}")]
    ShardNotFound { blackboard: String, year: i32 },

    /// A date-based blackboard has no year partitions at all
    #[error("Blackboard '{0}' has no year shards; it is not date-based")]
    NoShards(String),

    /// Tag name already used by another tag
    #[error("A tag with name '{name}' already exists with id {id}")]
    TagAlreadyExists { name: String, id: i64 },

    /// Malformed input (filter values, dates, names)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation requires admin rights
    #[error("Permission denied: {0}")]
    PermissionDenied(&'static str),

    /// SQLite backing store error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Stored document body could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse classification of [`BlackboardError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    InvalidArgument,
    PermissionDenied,
    Backend,
}

impl BlackboardError {
    /// Shorthand for an [`BlackboardError::InvalidArgument`]
    pub fn invalid(message: impl Into<String>) -> Self {
        BlackboardError::InvalidArgument(message.into())
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            BlackboardError::TagNotFound(_)
            | BlackboardError::BlackboardNotFound(_)
            | BlackboardError::CounterNotFound { .. }
            | BlackboardError::ShardNotFound { .. }
            | BlackboardError::NoShards(_) => ErrorKind::NotFound,
            BlackboardError::TagAlreadyExists { .. } => ErrorKind::AlreadyExists,
            BlackboardError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            BlackboardError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            BlackboardError::Database(_) | BlackboardError::Serialization(_) => {
                ErrorKind::Backend
            }
        }
    }

    /// Check if this error means something was absent
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

/// Result type for blackboard operations
pub type Result<T> = std::result::Result<T, BlackboardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_not_found_classification() {
        let err = BlackboardError::TagNotFound(TagRef::Id(999));
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.is_not_found());
        assert!(err.to_string().contains("999"));
    }

    #[test]
    fn test_already_exists_display() {
        let err = BlackboardError::TagAlreadyExists {
            name: "Tag_1".to_string(),
            id: 1,
        };
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        let msg = err.to_string();
        assert!(msg.contains("Tag_1"));
        assert!(msg.contains("id 1"));
    }

    #[test]
    fn test_permission_denied_classification() {
        let err = BlackboardError::PermissionDenied("Admin rights required to delete tags.");
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_database_errors_are_backend() {
        let err: BlackboardError = rusqlite::Error::QueryReturnedNoRows.into();
        assert_eq!(err.kind(), ErrorKind::Backend);
    }
}
