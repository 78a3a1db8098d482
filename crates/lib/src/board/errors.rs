//! Error types for the board aggregate.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::ListId;
use crate::order::OrderError;

/// Kinds of entity a mutation can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Board,
    List,
    Card,
    Label,
    User,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntityKind::Board => "board",
            EntityKind::List => "list",
            EntityKind::Card => "card",
            EntityKind::Label => "label",
            EntityKind::User => "user",
        })
    }
}

/// Errors raised while applying a structural mutation to a board.
///
/// Every error is raised before any state changes, so a failed mutation leaves
/// the aggregate untouched.
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoardError {
    /// Input rejected before touching state: empty title, malformed date.
    #[error("Invalid {field}: {reason}")]
    Validation {
        /// Name of the offending field
        field: &'static str,
        /// Human readable explanation
        reason: String,
    },

    /// The referenced entity was deleted or never existed on this board.
    #[error("Stale reference to {kind} {id}")]
    StaleReference {
        /// What kind of entity was referenced
        kind: EntityKind,
        /// The id that failed to resolve
        id: String,
    },

    /// A list was deleted while it still holds live cards.
    #[error("List {list_id} still holds {remaining} card(s)")]
    NonEmptyList {
        /// The list that was not deleted
        list_id: ListId,
        /// Number of live cards left in it
        remaining: usize,
    },

    /// A create mutation reused an id already present on the board.
    #[error("{kind} {id} already exists")]
    DuplicateId {
        /// What kind of entity was created
        kind: EntityKind,
        /// The duplicated id
        id: String,
    },

    /// The order key supplied with a mutation does not fit its target gap.
    #[error("Order key {key} does not fit at the requested position")]
    KeyCollision {
        /// The rejected key
        key: String,
    },

    /// A consistency check over the whole board failed.
    #[error("Board invariant violated: {reason}")]
    InvariantViolation {
        /// Description of the violation
        reason: String,
    },

    /// Key allocation failed for a reason a rebalance cannot fix.
    #[error(transparent)]
    Order(#[from] OrderError),
}

impl BoardError {
    pub(crate) fn stale(kind: EntityKind, id: impl fmt::Display) -> Self {
        BoardError::StaleReference {
            kind,
            id: id.to_string(),
        }
    }

    /// Check if this error is an input validation failure.
    pub fn is_validation_error(&self) -> bool {
        matches!(self, BoardError::Validation { .. })
    }

    /// Check if this error names an entity that no longer exists.
    pub fn is_stale_reference(&self) -> bool {
        matches!(self, BoardError::StaleReference { .. })
    }

    /// Check if this error is a refused list deletion.
    pub fn is_non_empty_list(&self) -> bool {
        matches!(self, BoardError::NonEmptyList { .. })
    }

    /// Check if this error was caused by a concurrent change to ordering.
    pub fn is_key_collision(&self) -> bool {
        matches!(self, BoardError::KeyCollision { .. })
    }

    /// Check if this error indicates a bug or corrupted state rather than bad input.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            BoardError::InvariantViolation { .. } | BoardError::Order(_)
        )
    }
}

impl From<BoardError> for crate::Error {
    fn from(err: BoardError) -> Self {
        crate::Error::Board(err)
    }
}
