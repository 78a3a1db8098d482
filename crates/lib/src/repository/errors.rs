//! Repository error types.

use thiserror::Error;

use crate::board::BoardId;

/// Errors raised by a [`Repository`](super::Repository) outside of ordinary
/// mutation conflicts, which are answered with
/// [`MutationResult::Conflict`](crate::mutation::MutationResult::Conflict).
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// No board with this id.
    #[error("Board not found: {board_id}")]
    BoardNotFound {
        /// The requested board
        board_id: BoardId,
    },

    /// A board with this id already exists.
    #[error("Board already exists: {board_id}")]
    BoardExists {
        /// The duplicated board
        board_id: BoardId,
    },

    /// Serialization failed.
    #[error("Serialization failed")]
    SerializationFailed {
        /// The underlying serialization error
        #[source]
        source: serde_json::Error,
    },

    /// Deserialization failed.
    #[error("Deserialization failed")]
    DeserializationFailed {
        /// The underlying deserialization error
        #[source]
        source: serde_json::Error,
    },

    /// File I/O error.
    #[error("File I/O error")]
    FileIo {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl RepositoryError {
    /// Check if this error indicates a board was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RepositoryError::BoardNotFound { .. })
    }

    /// Check if this error indicates the board already exists.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, RepositoryError::BoardExists { .. })
    }

    /// Check if this error is related to I/O operations.
    pub fn is_io_error(&self) -> bool {
        matches!(
            self,
            RepositoryError::FileIo { .. }
                | RepositoryError::SerializationFailed { .. }
                | RepositoryError::DeserializationFailed { .. }
        )
    }
}

impl From<RepositoryError> for crate::Error {
    fn from(err: RepositoryError) -> Self {
        crate::Error::Repository(err)
    }
}
