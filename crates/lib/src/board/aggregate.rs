//! The board aggregate.

use std::collections::HashMap;
use std::sync::Arc;

use super::errors::{BoardError, EntityKind};
use super::ids::{BoardId, CardId, LabelId, ListId, UserId};
use super::types::{Board, Card, CardFields, Lifecycle, List, normalize_title};
use super::{Applied, BoardSnapshot, Catalog, EntityRef, KeyAssignment, KeyStrategy};
use crate::clock::{Clock, SystemClock};
use crate::mutation::{Mutation, Position, Receipt};
use crate::order::{KeyAllocator, OrderKey};

/// Keys decided for a placement before any state changes.
struct KeyPlan {
    key: OrderKey,
    /// Siblings whose keys change alongside the target
    rekeyed: Vec<KeyAssignment>,
}

/// In-memory shape of one board.
///
/// Cards point at their list and lists at their board by id; membership is
/// derived, never stored. Orderings are computed on demand from the order keys.
#[derive(Debug, Clone)]
pub struct BoardAggregate {
    board: Board,
    lists: HashMap<ListId, List>,
    cards: HashMap<CardId, Card>,
    catalog: Catalog,
    sequence: u64,
    allocator: KeyAllocator,
    clock: Arc<dyn Clock>,
}

impl BoardAggregate {
    /// Creates an aggregate for an empty board.
    pub fn new(board: Board) -> Self {
        Self {
            board,
            lists: HashMap::new(),
            cards: HashMap::new(),
            catalog: Catalog::default(),
            sequence: 0,
            allocator: KeyAllocator::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Rebuilds an aggregate from a snapshot.
    pub fn from_snapshot(snapshot: BoardSnapshot) -> Self {
        let BoardSnapshot {
            board,
            lists,
            cards,
            catalog,
            sequence,
        } = snapshot;
        Self {
            board,
            lists: lists.into_iter().map(|l| (l.id.clone(), l)).collect(),
            cards: cards.into_iter().map(|c| (c.id.clone(), c)).collect(),
            catalog,
            sequence,
            allocator: KeyAllocator::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_allocator(mut self, allocator: KeyAllocator) -> Self {
        self.allocator = allocator;
        self
    }

    /// Use `clock` for card creation timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Captures the full state, tombstones included.
    pub fn snapshot(&self) -> BoardSnapshot {
        let mut lists: Vec<List> = self.lists.values().cloned().collect();
        lists.sort_by(|a, b| a.key.cmp(&b.key).then_with(|| a.id.cmp(&b.id)));
        let mut cards: Vec<Card> = self.cards.values().cloned().collect();
        cards.sort_by(|a, b| {
            (&a.list_id, &a.key, &a.id).cmp(&(&b.list_id, &b.key, &b.id))
        });
        BoardSnapshot {
            board: self.board.clone(),
            lists,
            cards,
            catalog: self.catalog.clone(),
            sequence: self.sequence,
        }
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn id(&self) -> &BoardId {
        &self.board.id
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub(crate) fn catalog_mut(&mut self) -> &mut Catalog {
        &mut self.catalog
    }

    pub fn allocator(&self) -> KeyAllocator {
        self.allocator
    }

    /// Sequence number of the last committed change reflected in this state.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub(crate) fn set_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }

    /// Live lists in board order.
    pub fn lists(&self) -> Vec<&List> {
        let mut lists: Vec<&List> = self.lists.values().filter(|l| l.is_active()).collect();
        lists.sort_by(|a, b| a.key.cmp(&b.key));
        lists
    }

    /// Live cards of `list_id` in list order.
    pub fn cards_in(&self, list_id: &ListId) -> Vec<&Card> {
        let mut cards: Vec<&Card> = self
            .cards
            .values()
            .filter(|c| c.is_active() && &c.list_id == list_id)
            .collect();
        cards.sort_by(|a, b| a.key.cmp(&b.key));
        cards
    }

    /// Looks up a list, tombstones included.
    pub fn list(&self, id: &ListId) -> Option<&List> {
        self.lists.get(id)
    }

    /// Looks up a card, tombstones included.
    pub fn card(&self, id: &CardId) -> Option<&Card> {
        self.cards.get(id)
    }

    fn live_list(&self, id: &ListId) -> Result<&List, BoardError> {
        self.lists
            .get(id)
            .filter(|l| l.is_active())
            .ok_or_else(|| BoardError::stale(EntityKind::List, id))
    }

    fn live_card(&self, id: &CardId) -> Result<&Card, BoardError> {
        self.cards
            .get(id)
            .filter(|c| c.is_active())
            .ok_or_else(|| BoardError::stale(EntityKind::Card, id))
    }

    /// Checks the ordering and reference invariants over the whole board.
    pub fn validate(&self) -> Result<(), BoardError> {
        let violation =
            |reason: String| -> Result<(), BoardError> { Err(BoardError::InvariantViolation { reason }) };

        let lists = self.lists();
        for pair in lists.windows(2) {
            if pair[0].key == pair[1].key {
                return violation(format!(
                    "lists {} and {} share key {}",
                    pair[0].id, pair[1].id, pair[0].key
                ));
            }
        }
        for list in &lists {
            if list.board_id != self.board.id {
                return violation(format!("list {} belongs to board {}", list.id, list.board_id));
            }
            for pair in self.cards_in(&list.id).windows(2) {
                if pair[0].key == pair[1].key {
                    return violation(format!(
                        "cards {} and {} share key {} in list {}",
                        pair[0].id, pair[1].id, pair[0].key, list.id
                    ));
                }
            }
        }

        for card in self.cards.values().filter(|c| c.is_active()) {
            if self.live_list(&card.list_id).is_err() {
                return violation(format!(
                    "card {} references missing list {}",
                    card.id, card.list_id
                ));
            }
            if let Some(user) = &card.assignee {
                if self.catalog.member(user).is_none() {
                    return violation(format!("card {} assigned to unknown {user}", card.id));
                }
            }
            if let Some(label) = card.labels.iter().find(|l| self.catalog.label(l).is_none()) {
                return violation(format!("card {} carries unknown label {label}", card.id));
            }
        }
        Ok(())
    }

    /// Applies a mutation, allocating keys between the current neighbours.
    pub fn apply(&mut self, mutation: &Mutation) -> Result<Applied, BoardError> {
        self.apply_with(mutation, KeyStrategy::Derive)
    }

    /// Applies a mutation committed elsewhere, adopting the keys and creation
    /// time its receipt carries.
    pub fn apply_authoritative(
        &mut self,
        mutation: &Mutation,
        receipt: &Receipt,
    ) -> Result<Applied, BoardError> {
        let applied = self.apply_with(mutation, KeyStrategy::Pinned(&receipt.keys))?;
        if let (Some(EntityRef::Card(id)), Some(at)) = (mutation.created(), receipt.created_at) {
            if let Some(card) = self.cards.get_mut(&id) {
                card.created_at = at;
            }
        }
        Ok(applied)
    }

    /// Applies a mutation using `strategy` to settle order keys.
    ///
    /// The mutation is validated in full before any state changes.
    pub fn apply_with(
        &mut self,
        mutation: &Mutation,
        strategy: KeyStrategy<'_>,
    ) -> Result<Applied, BoardError> {
        let applied = match mutation {
            Mutation::CreateList {
                list_id,
                title,
                position,
                key,
            } => self.apply_create_list(list_id, title, position, key.as_ref(), strategy),
            Mutation::CreateCard {
                card_id,
                list_id,
                title,
                fields,
                position,
                key,
            } => self.apply_create_card(
                card_id,
                list_id,
                title,
                fields,
                position,
                key.as_ref(),
                strategy,
            ),
            Mutation::MoveList {
                list_id,
                position,
                key,
            } => self.apply_move_list(list_id, position, key.as_ref(), strategy),
            Mutation::MoveCard {
                card_id,
                to_list,
                position,
                key,
            } => self.apply_move_card(card_id, to_list, position, key.as_ref(), strategy),
            Mutation::DeleteList { list_id } => self.apply_delete_list(list_id),
            Mutation::DeleteCard { card_id } => self.apply_delete_card(card_id),
            Mutation::ToggleLabel {
                card_id,
                label_id,
                attached,
            } => self.apply_toggle_label(card_id, label_id, *attached),
            Mutation::SetAssignee { card_id, user_id } => {
                self.apply_set_assignee(card_id, user_id.as_ref())
            }
        }?;
        tracing::trace!(
            board_id = %self.board.id,
            op = mutation.kind(),
            entity = applied.entity.as_str(),
            rebalanced = applied.rebalanced(),
            "Applied mutation"
        );
        Ok(applied)
    }

    /// Creates a list at `position`.
    pub fn create_list(
        &mut self,
        title: &str,
        position: Position<ListId>,
    ) -> Result<Applied, BoardError> {
        self.apply(&Mutation::create_list(title, position))
    }

    /// Creates a card in `list_id` at `position`.
    pub fn create_card(
        &mut self,
        list_id: &ListId,
        title: &str,
        fields: CardFields,
        position: Position<CardId>,
    ) -> Result<Applied, BoardError> {
        self.apply(&Mutation::create_card(list_id.clone(), title, fields, position))
    }

    /// Moves a card to `position` within `to_list`, which may be its current list.
    pub fn move_card(
        &mut self,
        card_id: &CardId,
        to_list: &ListId,
        position: Position<CardId>,
    ) -> Result<Applied, BoardError> {
        self.apply(&Mutation::MoveCard {
            card_id: card_id.clone(),
            to_list: to_list.clone(),
            position,
            key: None,
        })
    }

    pub fn move_list(
        &mut self,
        list_id: &ListId,
        position: Position<ListId>,
    ) -> Result<Applied, BoardError> {
        self.apply(&Mutation::MoveList {
            list_id: list_id.clone(),
            position,
            key: None,
        })
    }

    pub fn delete_card(&mut self, card_id: &CardId) -> Result<Applied, BoardError> {
        self.apply(&Mutation::DeleteCard {
            card_id: card_id.clone(),
        })
    }

    /// Deletes a list. Fails with [`BoardError::NonEmptyList`] while it holds live cards.
    pub fn delete_list(&mut self, list_id: &ListId) -> Result<Applied, BoardError> {
        self.apply(&Mutation::DeleteList {
            list_id: list_id.clone(),
        })
    }

    /// Attaches `label_id` if the card lacks it, detaches it otherwise.
    pub fn toggle_label(
        &mut self,
        card_id: &CardId,
        label_id: &LabelId,
    ) -> Result<Applied, BoardError> {
        let mutation = Mutation::toggle_label(self, card_id, label_id)?;
        self.apply(&mutation)
    }

    pub fn set_assignee(
        &mut self,
        card_id: &CardId,
        user_id: Option<UserId>,
    ) -> Result<Applied, BoardError> {
        self.apply(&Mutation::SetAssignee {
            card_id: card_id.clone(),
            user_id,
        })
    }

    fn apply_create_list(
        &mut self,
        list_id: &ListId,
        title: &str,
        position: &Position<ListId>,
        hint: Option<&OrderKey>,
        strategy: KeyStrategy<'_>,
    ) -> Result<Applied, BoardError> {
        let title = normalize_title(title)?;
        if self.lists.contains_key(list_id) {
            return Err(BoardError::DuplicateId {
                kind: EntityKind::List,
                id: list_id.to_string(),
            });
        }
        let target = EntityRef::List(list_id.clone());
        let anchor = position.map(|id| EntityRef::List(id.clone()));
        let plan = self.plan_key(&target, self.list_keys(None), anchor, hint, strategy)?;

        self.lists.insert(
            list_id.clone(),
            List {
                id: list_id.clone(),
                board_id: self.board.id.clone(),
                title,
                key: plan.key.clone(),
                lifecycle: Lifecycle::Active,
            },
        );
        Ok(self.commit_plan(target, plan))
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_create_card(
        &mut self,
        card_id: &CardId,
        list_id: &ListId,
        title: &str,
        fields: &CardFields,
        position: &Position<CardId>,
        hint: Option<&OrderKey>,
        strategy: KeyStrategy<'_>,
    ) -> Result<Applied, BoardError> {
        let title = normalize_title(title)?;
        if self.cards.contains_key(card_id) {
            return Err(BoardError::DuplicateId {
                kind: EntityKind::Card,
                id: card_id.to_string(),
            });
        }
        self.live_list(list_id)?;
        if let Some(user) = &fields.assignee {
            self.check_member(user)?;
        }
        for label in &fields.labels {
            self.check_label(label)?;
        }

        let target = EntityRef::Card(card_id.clone());
        let anchor = position.map(|id| EntityRef::Card(id.clone()));
        let siblings = self.card_keys(list_id, None);
        let plan = self.plan_key(&target, siblings, anchor, hint, strategy)?;

        let description = fields
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);
        self.cards.insert(
            card_id.clone(),
            Card {
                id: card_id.clone(),
                list_id: list_id.clone(),
                title,
                description,
                key: plan.key.clone(),
                priority: fields.priority,
                due_date: fields.due_date,
                assignee: fields.assignee.clone(),
                labels: fields.labels.clone(),
                created_at: self.clock.now(),
                lifecycle: Lifecycle::Active,
            },
        );
        Ok(self.commit_plan(target, plan))
    }

    fn apply_move_list(
        &mut self,
        list_id: &ListId,
        position: &Position<ListId>,
        hint: Option<&OrderKey>,
        strategy: KeyStrategy<'_>,
    ) -> Result<Applied, BoardError> {
        self.live_list(list_id)?;
        let target = EntityRef::List(list_id.clone());
        let anchor = position.map(|id| EntityRef::List(id.clone()));
        let siblings = self.list_keys(Some(list_id));
        let plan = self.plan_key(&target, siblings, anchor, hint, strategy)?;

        if let Some(list) = self.lists.get_mut(list_id) {
            list.key = plan.key.clone();
        }
        Ok(self.commit_plan(target, plan))
    }

    fn apply_move_card(
        &mut self,
        card_id: &CardId,
        to_list: &ListId,
        position: &Position<CardId>,
        hint: Option<&OrderKey>,
        strategy: KeyStrategy<'_>,
    ) -> Result<Applied, BoardError> {
        self.live_card(card_id)?;
        self.live_list(to_list)?;
        let target = EntityRef::Card(card_id.clone());
        let anchor = position.map(|id| EntityRef::Card(id.clone()));
        let siblings = self.card_keys(to_list, Some(card_id));
        let plan = self.plan_key(&target, siblings, anchor, hint, strategy)?;

        if let Some(card) = self.cards.get_mut(card_id) {
            card.list_id = to_list.clone();
            card.key = plan.key.clone();
        }
        Ok(self.commit_plan(target, plan))
    }

    fn apply_delete_list(&mut self, list_id: &ListId) -> Result<Applied, BoardError> {
        self.live_list(list_id)?;
        let remaining = self
            .cards
            .values()
            .filter(|c| c.is_active() && &c.list_id == list_id)
            .count();
        if remaining > 0 {
            return Err(BoardError::NonEmptyList {
                list_id: list_id.clone(),
                remaining,
            });
        }
        if let Some(list) = self.lists.get_mut(list_id) {
            list.lifecycle = Lifecycle::Deleted;
        }
        Ok(Applied::unordered(EntityRef::List(list_id.clone())))
    }

    fn apply_delete_card(&mut self, card_id: &CardId) -> Result<Applied, BoardError> {
        self.live_card(card_id)?;
        if let Some(card) = self.cards.get_mut(card_id) {
            card.lifecycle = Lifecycle::Deleted;
        }
        Ok(Applied::unordered(EntityRef::Card(card_id.clone())))
    }

    fn apply_toggle_label(
        &mut self,
        card_id: &CardId,
        label_id: &LabelId,
        attached: bool,
    ) -> Result<Applied, BoardError> {
        self.live_card(card_id)?;
        // Detaching a label that has since left the catalog is still allowed.
        if attached {
            self.check_label(label_id)?;
        }
        if let Some(card) = self.cards.get_mut(card_id) {
            if attached {
                card.labels.insert(label_id.clone());
            } else {
                card.labels.remove(label_id);
            }
        }
        Ok(Applied::unordered(EntityRef::Card(card_id.clone())))
    }

    fn apply_set_assignee(
        &mut self,
        card_id: &CardId,
        user_id: Option<&UserId>,
    ) -> Result<Applied, BoardError> {
        self.live_card(card_id)?;
        if let Some(user) = user_id {
            self.check_member(user)?;
        }
        if let Some(card) = self.cards.get_mut(card_id) {
            card.assignee = user_id.cloned();
        }
        Ok(Applied::unordered(EntityRef::Card(card_id.clone())))
    }

    fn check_label(&self, id: &LabelId) -> Result<(), BoardError> {
        self.catalog
            .label(id)
            .map(|_| ())
            .ok_or_else(|| BoardError::stale(EntityKind::Label, id))
    }

    fn check_member(&self, id: &UserId) -> Result<(), BoardError> {
        self.catalog
            .member(id)
            .map(|_| ())
            .ok_or_else(|| BoardError::stale(EntityKind::User, id))
    }

    /// Keys of the live lists, ascending, without `excluding`.
    fn list_keys(&self, excluding: Option<&ListId>) -> Vec<(EntityRef, OrderKey)> {
        self.lists()
            .into_iter()
            .filter(|l| Some(&l.id) != excluding)
            .map(|l| (EntityRef::List(l.id.clone()), l.key.clone()))
            .collect()
    }

    /// Keys of the live cards in `list_id`, ascending, without `excluding`.
    fn card_keys(&self, list_id: &ListId, excluding: Option<&CardId>) -> Vec<(EntityRef, OrderKey)> {
        self.cards_in(list_id)
            .into_iter()
            .filter(|c| Some(&c.id) != excluding)
            .map(|c| (EntityRef::Card(c.id.clone()), c.key.clone()))
            .collect()
    }

    /// Settles the key of `target` among `siblings` without touching state.
    fn plan_key(
        &self,
        target: &EntityRef,
        siblings: Vec<(EntityRef, OrderKey)>,
        anchor: Position<EntityRef>,
        hint: Option<&OrderKey>,
        strategy: KeyStrategy<'_>,
    ) -> Result<KeyPlan, BoardError> {
        if let KeyStrategy::Pinned(pinned) = strategy {
            if let Some(found) = pinned.iter().find(|a| &a.entity == target) {
                let mut rekeyed = Vec::new();
                for assignment in pinned.iter().filter(|a| &a.entity != target) {
                    self.check_exists(&assignment.entity)?;
                    rekeyed.push(assignment.clone());
                }
                return Ok(KeyPlan {
                    key: found.key.clone(),
                    rekeyed,
                });
            }
        }

        let index = match &anchor {
            Position::Start => 0,
            Position::End => siblings.len(),
            Position::After(anchor) if anchor == target => {
                return Err(BoardError::Validation {
                    field: "position",
                    reason: format!("{} {} cannot be placed after itself", anchor.kind(), anchor.as_str()),
                });
            }
            Position::After(anchor) => siblings
                .iter()
                .position(|(entity, _)| entity == anchor)
                .map(|i| i + 1)
                .ok_or_else(|| BoardError::stale(anchor.kind(), anchor.as_str()))?,
        };
        let lower = index
            .checked_sub(1)
            .and_then(|i| siblings.get(i))
            .map(|(_, key)| key.clone());
        let upper = siblings.get(index).map(|(_, key)| key.clone());

        if let Some(hint) = hint {
            let fits = lower.as_ref().is_none_or(|l| l < hint)
                && upper.as_ref().is_none_or(|u| hint < u);
            match strategy {
                KeyStrategy::PreferHint | KeyStrategy::RequireHint if fits => {
                    return Ok(KeyPlan {
                        key: hint.clone(),
                        rekeyed: Vec::new(),
                    });
                }
                KeyStrategy::RequireHint => {
                    return Err(BoardError::KeyCollision {
                        key: hint.to_string(),
                    });
                }
                _ => {}
            }
        }

        match self.allocator.key_between(lower.as_ref(), upper.as_ref()) {
            Ok(key) => Ok(KeyPlan {
                key,
                rekeyed: Vec::new(),
            }),
            Err(err) if err.is_exhausted() => {
                let mut order: Vec<EntityRef> =
                    siblings.into_iter().map(|(entity, _)| entity).collect();
                order.insert(index, target.clone());
                let fresh = self.allocator.rebalance(&order)?;
                tracing::debug!(
                    board_id = %self.board.id,
                    entity = target.as_str(),
                    count = fresh.len(),
                    "Gap exhausted, rebalanced sibling keys"
                );

                let mut key = None;
                let mut rekeyed = Vec::with_capacity(fresh.len());
                for (entity, fresh_key) in fresh {
                    if &entity == target {
                        key = Some(fresh_key);
                    } else {
                        rekeyed.push(KeyAssignment {
                            entity,
                            key: fresh_key,
                        });
                    }
                }
                let key = key.ok_or_else(|| BoardError::InvariantViolation {
                    reason: format!("rebalance dropped {}", target.as_str()),
                })?;
                Ok(KeyPlan { key, rekeyed })
            }
            Err(err) => Err(err.into()),
        }
    }

    fn check_exists(&self, entity: &EntityRef) -> Result<(), BoardError> {
        match entity {
            EntityRef::List(id) => self.live_list(id).map(|_| ()),
            EntityRef::Card(id) => self.live_card(id).map(|_| ()),
        }
    }

    /// Writes the sibling keys of `plan` and reports every key it assigned.
    fn commit_plan(&mut self, target: EntityRef, plan: KeyPlan) -> Applied {
        for assignment in &plan.rekeyed {
            match &assignment.entity {
                EntityRef::List(id) => {
                    if let Some(list) = self.lists.get_mut(id) {
                        list.key = assignment.key.clone();
                    }
                }
                EntityRef::Card(id) => {
                    if let Some(card) = self.cards.get_mut(id) {
                        card.key = assignment.key.clone();
                    }
                }
            }
        }

        let mut keys = Vec::with_capacity(plan.rekeyed.len() + 1);
        keys.push(KeyAssignment {
            entity: target.clone(),
            key: plan.key,
        });
        keys.extend(plan.rekeyed);
        Applied {
            entity: target,
            keys,
        }
    }
}
