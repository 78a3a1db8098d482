//! Identifier newtypes for board entities.
//!
//! Every id is an opaque string. Ids minted on a client before the repository
//! confirms the entity carry the [`TENTATIVE_PREFIX`] and are replaced by the
//! repository's authoritative id once the creating mutation commits.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::TENTATIVE_PREFIX;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps an existing identifier.
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Mints a client-side placeholder id.
            pub fn tentative() -> Self {
                Self(format!("{}{}", TENTATIVE_PREFIX, Uuid::new_v4()))
            }

            /// Mints a repository-side id.
            pub fn authoritative() -> Self {
                Self(format!("{}-{}", $kind, Uuid::new_v4()))
            }

            /// True for ids minted by [`tentative`](Self::tentative).
            pub fn is_tentative(&self) -> bool {
                self.0.starts_with(TENTATIVE_PREFIX)
            }

            /// Returns the id as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

entity_id!(
    /// Identifies a board.
    BoardId,
    "board"
);
entity_id!(
    /// Identifies a list within a board.
    ListId,
    "list"
);
entity_id!(
    /// Identifies a card within a list.
    CardId,
    "card"
);
entity_id!(
    /// Identifies a label in the board's catalog.
    LabelId,
    "label"
);
entity_id!(
    /// Identifies a board member.
    UserId,
    "user"
);
