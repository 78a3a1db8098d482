//! Wire vocabulary for board mutations.
//!
//! A [`Mutation`] describes one structural change. Clients wrap it in a
//! [`MutationEnvelope`] carrying an idempotency token and send it to a
//! [`Repository`](crate::repository::Repository), which answers with a
//! [`MutationResult`].
//!
//! ```json
//! {
//!   "idempotency_token": "5b0c…",
//!   "board_id": "board-1",
//!   "mutation": {
//!     "op": "move_card",
//!     "card_id": "card-7",
//!     "to_list": "list-2",
//!     "position": { "after": "card-3" },
//!     "key": "aV"
//!   }
//! }
//! ```

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::board::{
    BoardAggregate, BoardError, BoardId, CardFields, CardId, EntityKind, EntityRef,
    KeyAssignment, LabelId, ListId, UserId,
};
use crate::order::OrderKey;

/// Where an item goes among its siblings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Position<I> {
    /// Before every sibling
    Start,
    /// Directly after the given sibling
    After(I),
    /// After every sibling
    End,
}

impl<I> Default for Position<I> {
    fn default() -> Self {
        Position::End
    }
}

impl<I> Position<I> {
    pub fn map<J>(&self, f: impl FnOnce(&I) -> J) -> Position<J> {
        match self {
            Position::Start => Position::Start,
            Position::After(anchor) => Position::After(f(anchor)),
            Position::End => Position::End,
        }
    }

    pub fn anchor(&self) -> Option<&I> {
        match self {
            Position::After(anchor) => Some(anchor),
            _ => None,
        }
    }
}

/// A structural change to one board.
///
/// Creates carry the client-minted id of the new entity. Creates and moves may
/// carry the key the client derived locally as a hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    CreateList {
        list_id: ListId,
        title: String,
        #[serde(default)]
        position: Position<ListId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<OrderKey>,
    },
    CreateCard {
        card_id: CardId,
        list_id: ListId,
        title: String,
        #[serde(default)]
        fields: CardFields,
        #[serde(default)]
        position: Position<CardId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<OrderKey>,
    },
    MoveList {
        list_id: ListId,
        position: Position<ListId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<OrderKey>,
    },
    MoveCard {
        card_id: CardId,
        to_list: ListId,
        position: Position<CardId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<OrderKey>,
    },
    DeleteList {
        list_id: ListId,
    },
    DeleteCard {
        card_id: CardId,
    },
    /// Sets whether a label is attached. The client turns a toggle into the
    /// target state, so applying it twice is harmless.
    ToggleLabel {
        card_id: CardId,
        label_id: LabelId,
        attached: bool,
    },
    SetAssignee {
        card_id: CardId,
        #[serde(default)]
        user_id: Option<UserId>,
    },
}

impl Mutation {
    /// A list creation under a fresh tentative id.
    pub fn create_list(title: impl Into<String>, position: Position<ListId>) -> Self {
        Mutation::CreateList {
            list_id: ListId::tentative(),
            title: title.into(),
            position,
            key: None,
        }
    }

    /// A card creation under a fresh tentative id.
    pub fn create_card(
        list_id: ListId,
        title: impl Into<String>,
        fields: CardFields,
        position: Position<CardId>,
    ) -> Self {
        Mutation::CreateCard {
            card_id: CardId::tentative(),
            list_id,
            title: title.into(),
            fields,
            position,
            key: None,
        }
    }

    /// Flips `label_id` on a card relative to its state in `board`.
    pub fn toggle_label(
        board: &BoardAggregate,
        card_id: &CardId,
        label_id: &LabelId,
    ) -> Result<Self, BoardError> {
        let card = board
            .card(card_id)
            .filter(|c| c.is_active())
            .ok_or_else(|| BoardError::stale(EntityKind::Card, card_id))?;
        Ok(Mutation::ToggleLabel {
            card_id: card_id.clone(),
            label_id: label_id.clone(),
            attached: !card.labels.contains(label_id),
        })
    }

    /// Wire name of the operation.
    pub fn kind(&self) -> &'static str {
        match self {
            Mutation::CreateList { .. } => "create_list",
            Mutation::CreateCard { .. } => "create_card",
            Mutation::MoveList { .. } => "move_list",
            Mutation::MoveCard { .. } => "move_card",
            Mutation::DeleteList { .. } => "delete_list",
            Mutation::DeleteCard { .. } => "delete_card",
            Mutation::ToggleLabel { .. } => "toggle_label",
            Mutation::SetAssignee { .. } => "set_assignee",
        }
    }

    /// The entity this mutation changes.
    pub fn target(&self) -> EntityRef {
        match self {
            Mutation::CreateList { list_id, .. }
            | Mutation::MoveList { list_id, .. }
            | Mutation::DeleteList { list_id } => EntityRef::List(list_id.clone()),
            Mutation::CreateCard { card_id, .. }
            | Mutation::MoveCard { card_id, .. }
            | Mutation::DeleteCard { card_id }
            | Mutation::ToggleLabel { card_id, .. }
            | Mutation::SetAssignee { card_id, .. } => EntityRef::Card(card_id.clone()),
        }
    }

    /// The entity this mutation brings into existence, if any.
    pub fn created(&self) -> Option<EntityRef> {
        match self {
            Mutation::CreateList { .. } | Mutation::CreateCard { .. } => Some(self.target()),
            _ => None,
        }
    }

    pub fn key_hint(&self) -> Option<&OrderKey> {
        match self {
            Mutation::CreateList { key, .. }
            | Mutation::CreateCard { key, .. }
            | Mutation::MoveList { key, .. }
            | Mutation::MoveCard { key, .. } => key.as_ref(),
            _ => None,
        }
    }

    /// Replaces the key hint. Ignored by mutations that place nothing.
    pub fn set_key_hint(&mut self, hint: Option<OrderKey>) {
        match self {
            Mutation::CreateList { key, .. }
            | Mutation::CreateCard { key, .. }
            | Mutation::MoveList { key, .. }
            | Mutation::MoveCard { key, .. } => *key = hint,
            _ => {}
        }
    }

    /// Replaces every id found in `ids`, position anchors included.
    ///
    /// Returns true if anything changed.
    pub fn rewrite_ids(&mut self, ids: &HashMap<String, String>) -> bool {
        if ids.is_empty() {
            return false;
        }
        let mut changed = false;
        let mut swap = |id: &mut String| {
            if let Some(replacement) = ids.get(id.as_str()) {
                id.clone_from(replacement);
                changed = true;
            }
        };

        match self {
            Mutation::CreateList {
                list_id, position, ..
            }
            | Mutation::MoveList {
                list_id, position, ..
            } => {
                rewrite(list_id, &mut swap);
                if let Position::After(anchor) = position {
                    rewrite(anchor, &mut swap);
                }
            }
            Mutation::CreateCard {
                card_id,
                list_id,
                fields,
                position,
                ..
            } => {
                rewrite(card_id, &mut swap);
                rewrite(list_id, &mut swap);
                if let Position::After(anchor) = position {
                    rewrite(anchor, &mut swap);
                }
                if let Some(user) = &mut fields.assignee {
                    rewrite(user, &mut swap);
                }
            }
            Mutation::MoveCard {
                card_id,
                to_list,
                position,
                ..
            } => {
                rewrite(card_id, &mut swap);
                rewrite(to_list, &mut swap);
                if let Position::After(anchor) = position {
                    rewrite(anchor, &mut swap);
                }
            }
            Mutation::DeleteList { list_id } => rewrite(list_id, &mut swap),
            Mutation::DeleteCard { card_id } => rewrite(card_id, &mut swap),
            Mutation::ToggleLabel {
                card_id, label_id, ..
            } => {
                rewrite(card_id, &mut swap);
                rewrite(label_id, &mut swap);
            }
            Mutation::SetAssignee { card_id, user_id } => {
                rewrite(card_id, &mut swap);
                if let Some(user) = user_id {
                    rewrite(user, &mut swap);
                }
            }
        }
        changed
    }

    /// True if sending `self` makes sending `earlier` pointless.
    ///
    /// Only last-writer-wins changes to the same entity collapse: repeated
    /// moves, assignments, and label changes for one card and label.
    pub fn supersedes(&self, earlier: &Mutation) -> bool {
        match (self, earlier) {
            (Mutation::MoveCard { card_id: a, .. }, Mutation::MoveCard { card_id: b, .. }) => a == b,
            (Mutation::MoveList { list_id: a, .. }, Mutation::MoveList { list_id: b, .. }) => a == b,
            (
                Mutation::SetAssignee { card_id: a, .. },
                Mutation::SetAssignee { card_id: b, .. },
            ) => a == b,
            (
                Mutation::ToggleLabel {
                    card_id: a,
                    label_id: la,
                    ..
                },
                Mutation::ToggleLabel {
                    card_id: b,
                    label_id: lb,
                    ..
                },
            ) => a == b && la == lb,
            _ => false,
        }
    }
}

fn rewrite<T>(id: &mut T, swap: &mut impl FnMut(&mut String))
where
    T: AsRef<str> + From<String>,
{
    let mut raw = id.as_ref().to_string();
    swap(&mut raw);
    if raw != id.as_ref() {
        *id = T::from(raw);
    }
}

/// A mutation addressed to a board, tagged for idempotent delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationEnvelope {
    /// Client-generated; a repeated token is answered from the recorded result
    pub idempotency_token: Uuid,
    pub board_id: BoardId,
    pub mutation: Mutation,
}

impl MutationEnvelope {
    /// Wraps `mutation` under a fresh token.
    pub fn new(board_id: BoardId, mutation: Mutation) -> Self {
        Self::with_token(Uuid::new_v4(), board_id, mutation)
    }

    pub fn with_token(idempotency_token: Uuid, board_id: BoardId, mutation: Mutation) -> Self {
        Self {
            idempotency_token,
            board_id,
            mutation,
        }
    }
}

/// A tentative id and the authoritative id that replaced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdAssignment {
    pub kind: EntityKind,
    pub tentative: String,
    pub authoritative: String,
}

/// Acknowledgment of a committed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub token: Uuid,
    /// Position of the change in the board's change log
    pub sequence: u64,
    #[serde(default)]
    pub ids: Vec<IdAssignment>,
    /// Keys as the repository assigned them
    #[serde(default)]
    pub keys: Vec<KeyAssignment>,
    /// Timestamp the repository gave a created card
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Receipt {
    /// Tentative to authoritative id map, for [`Mutation::rewrite_ids`].
    pub fn id_map(&self) -> HashMap<String, String> {
        self.ids
            .iter()
            .map(|a| (a.tentative.clone(), a.authoritative.clone()))
            .collect()
    }
}

/// Why a repository refused a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    Validation,
    StaleReference,
    /// The order key collided with a concurrent change
    KeyCollision,
    NonEmptyList,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictReason {
    pub kind: ConflictKind,
    pub message: String,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl From<&BoardError> for ConflictReason {
    fn from(err: &BoardError) -> Self {
        let kind = match err {
            BoardError::StaleReference { .. } => ConflictKind::StaleReference,
            BoardError::KeyCollision { .. } => ConflictKind::KeyCollision,
            BoardError::NonEmptyList { .. } => ConflictKind::NonEmptyList,
            _ => ConflictKind::Validation,
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

/// A repository's answer to a [`MutationEnvelope`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MutationResult {
    Committed(Receipt),
    Conflict { reason: ConflictReason },
}

impl MutationResult {
    pub fn is_committed(&self) -> bool {
        matches!(self, MutationResult::Committed(_))
    }
}
