//! Board state and the aggregate that mutates it.
//!
//! A [`BoardAggregate`] holds one board: its lists, its cards and the
//! [`Catalog`] of labels and members that cards may reference. Every
//! structural change goes through [`BoardAggregate::apply`], which validates
//! the whole mutation first and only then touches state, so a failed mutation
//! never leaves a partially applied board behind.
//!
//! Lists and cards are never purged. Deleting one marks it
//! [`Lifecycle::Deleted`]; the tombstone keeps late mutations that still name
//! it from resurrecting it.

mod aggregate;
mod errors;
mod ids;
mod types;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use aggregate::BoardAggregate;
pub use errors::{BoardError, EntityKind};
pub use ids::{BoardId, CardId, LabelId, ListId, UserId};
pub use types::{
    Board, Card, CardFields, Label, Lifecycle, List, Priority, User, normalize_title,
    parse_due_date,
};

use crate::order::OrderKey;

/// Labels and members that cards on a board may reference.
///
/// Both are owned by collaborators outside the board; the aggregate only checks
/// that references resolve.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    labels: BTreeMap<LabelId, Label>,
    #[serde(default)]
    members: BTreeMap<UserId, User>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a label.
    pub fn add_label(&mut self, label: Label) {
        self.labels.insert(label.id.clone(), label);
    }

    /// Adds or replaces a member.
    pub fn add_member(&mut self, user: User) {
        self.members.insert(user.id.clone(), user);
    }

    pub fn label(&self, id: &LabelId) -> Option<&Label> {
        self.labels.get(id)
    }

    pub fn member(&self, id: &UserId) -> Option<&User> {
        self.members.get(id)
    }

    pub fn labels(&self) -> impl Iterator<Item = &Label> {
        self.labels.values()
    }

    pub fn members(&self) -> impl Iterator<Item = &User> {
        self.members.values()
    }
}

/// Serializable state of a board at a given change sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardSnapshot {
    pub board: Board,
    /// All lists, tombstones included
    pub lists: Vec<List>,
    /// All cards, tombstones included
    pub cards: Vec<Card>,
    #[serde(default)]
    pub catalog: Catalog,
    /// Sequence number of the last committed change reflected here
    #[serde(default)]
    pub sequence: u64,
}

/// Reference to an orderable entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EntityRef {
    List(ListId),
    Card(CardId),
}

impl EntityRef {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityRef::List(_) => EntityKind::List,
            EntityRef::Card(_) => EntityKind::Card,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EntityRef::List(id) => id.as_str(),
            EntityRef::Card(id) => id.as_str(),
        }
    }
}

/// An order key given to an entity by a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyAssignment {
    pub entity: EntityRef,
    pub key: OrderKey,
}

/// Outcome of a successfully applied mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Applied {
    /// The entity the mutation targeted
    pub entity: EntityRef,
    /// Every key assigned or changed. Usually just the target's; all siblings
    /// after a rebalance.
    #[serde(default)]
    pub keys: Vec<KeyAssignment>,
}

impl Applied {
    fn unordered(entity: EntityRef) -> Self {
        Self {
            entity,
            keys: Vec::new(),
        }
    }

    /// Key assigned to the target entity, if the mutation placed it.
    pub fn primary_key(&self) -> Option<&OrderKey> {
        self.keys
            .iter()
            .find(|a| a.entity == self.entity)
            .map(|a| &a.key)
    }

    /// True if placing the target forced its siblings to be respaced.
    pub fn rebalanced(&self) -> bool {
        self.keys.len() > 1
    }
}

/// How [`BoardAggregate::apply_with`] treats the key hint carried by a mutation.
#[derive(Debug, Clone, Copy, Default)]
pub enum KeyStrategy<'a> {
    /// Ignore any hint and allocate between the current neighbours.
    #[default]
    Derive,
    /// Use the hint when it still lies strictly between the neighbours,
    /// otherwise allocate.
    PreferHint,
    /// Use the hint; fail with [`BoardError::KeyCollision`] when it does not
    /// fit between the neighbours.
    RequireHint,
    /// Use keys already decided elsewhere. The target's position anchor is not
    /// resolved when its key is listed.
    Pinned(&'a [KeyAssignment]),
}
