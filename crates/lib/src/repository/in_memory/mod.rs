//! In-memory repository implementation
//!
//! Holds every board in a process-local map behind a tokio `RwLock` and fans
//! committed changes out through one broadcast channel per board. Suitable for
//! tests, for the CLI (with JSON persistence) and as the reference behaviour
//! for networked repositories.

mod persistence;

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use super::{RemoteChange, Repository, RepositoryError, Subscription};
use crate::Result;
use crate::board::{
    Board, BoardAggregate, BoardId, BoardSnapshot, CardId, EntityRef, KeyStrategy, Label,
    LabelId, ListId, User, UserId, normalize_title,
};
use crate::clock::{Clock, SystemClock};
use crate::constants::{DEFAULT_LOG_RETENTION, FEED_CAPACITY};
use crate::mutation::{
    ConflictReason, IdAssignment, MutationEnvelope, MutationResult, Receipt,
};
use crate::order::KeyAllocator;

/// What the repository does with a key hint that no longer fits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPolicy {
    /// Allocate a fresh key between the current neighbours
    #[default]
    Reallocate,
    /// Refuse the mutation with a key collision conflict
    Strict,
}

/// Server-side state of one board.
#[derive(Debug)]
pub(crate) struct BoardState {
    pub(crate) aggregate: BoardAggregate,
    /// Most recent committed changes, in sequence order
    pub(crate) log: VecDeque<RemoteChange>,
    /// Result recorded for each retained idempotency token
    pub(crate) results: HashMap<Uuid, MutationResult>,
    /// Retained tokens, oldest first
    pub(crate) tokens: VecDeque<Uuid>,
    feed: broadcast::Sender<RemoteChange>,
}

impl BoardState {
    pub(crate) fn new(
        aggregate: BoardAggregate,
        log: impl IntoIterator<Item = RemoteChange>,
        results: impl IntoIterator<Item = (Uuid, MutationResult)>,
    ) -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        let mut state = Self {
            aggregate,
            log: log.into_iter().collect(),
            results: HashMap::new(),
            tokens: VecDeque::new(),
            feed,
        };
        for (token, result) in results {
            state.record(token, result);
        }
        state
    }

    fn record(&mut self, token: Uuid, result: MutationResult) {
        if self.results.insert(token, result).is_none() {
            self.tokens.push_back(token);
        }
    }

    /// Drops the oldest changes and token results beyond `retention`.
    ///
    /// A subscriber whose cursor predates the retained log sees a gap and
    /// refetches the board. A token older than the retained results is
    /// treated as new.
    pub(crate) fn trim(&mut self, retention: usize) {
        let excess = self.log.len().saturating_sub(retention);
        self.log.drain(..excess);
        while self.tokens.len() > retention {
            if let Some(token) = self.tokens.pop_front() {
                self.results.remove(&token);
            }
        }
    }
}

/// A [`Repository`] kept entirely in memory.
///
/// Mints authoritative ids for created entities, records every result by
/// idempotency token and keeps a sequenced change log per board.
#[derive(Debug)]
pub struct InMemoryRepository {
    pub(crate) boards: RwLock<HashMap<BoardId, BoardState>>,
    policy: KeyPolicy,
    /// Delay before each acknowledgment, in milliseconds
    latency_ms: AtomicU64,
    /// Changes and token results kept per board
    retention: usize,
    allocator: KeyAllocator,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            boards: RwLock::new(HashMap::new()),
            policy: KeyPolicy::default(),
            latency_ms: AtomicU64::new(0),
            retention: DEFAULT_LOG_RETENTION,
            allocator: KeyAllocator::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_policy(mut self, policy: KeyPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Delays every acknowledgment by `latency`. The mutation is applied
    /// before the delay, so a caller that gives up early still finds it
    /// committed.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(latency);
        self
    }

    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(millis, Ordering::Relaxed);
    }

    /// Keep at most `retention` committed changes and token results per
    /// board. At least one of each is always kept.
    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention.max(1);
        for state in self.boards.get_mut().values_mut() {
            state.trim(self.retention);
        }
        self
    }

    pub(crate) fn retention(&self) -> usize {
        self.retention
    }

    pub fn with_allocator(mut self, allocator: KeyAllocator) -> Self {
        self.allocator = allocator;
        for state in self.boards.get_mut().values_mut() {
            state.aggregate = state.aggregate.clone().with_allocator(allocator);
        }
        self
    }

    /// Use `clock` for board and card timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        for state in self.boards.get_mut().values_mut() {
            state.aggregate = state.aggregate.clone().with_clock(clock.clone());
        }
        self.clock = clock;
        self
    }

    pub fn policy(&self) -> KeyPolicy {
        self.policy
    }

    fn aggregate_for(&self, board: Board) -> BoardAggregate {
        BoardAggregate::new(board)
            .with_allocator(self.allocator)
            .with_clock(self.clock.clone())
    }

    pub(crate) fn restore(&self, snapshot: BoardSnapshot) -> BoardAggregate {
        BoardAggregate::from_snapshot(snapshot)
            .with_allocator(self.allocator)
            .with_clock(self.clock.clone())
    }

    /// Creates an empty board.
    pub async fn create_board(&self, title: &str) -> Result<Board> {
        let board = Board {
            id: BoardId::authoritative(),
            title: normalize_title(title)?,
            created_at: self.clock.now(),
        };
        let mut boards = self.boards.write().await;
        if boards.contains_key(&board.id) {
            return Err(RepositoryError::BoardExists {
                board_id: board.id.clone(),
            }
            .into());
        }
        boards.insert(
            board.id.clone(),
            BoardState::new(self.aggregate_for(board.clone()), [], []),
        );
        tracing::info!(board_id = %board.id, title = %board.title, "Created board");
        Ok(board)
    }

    /// All boards, oldest first.
    pub async fn boards(&self) -> Vec<Board> {
        let boards = self.boards.read().await;
        let mut all: Vec<Board> = boards
            .values()
            .map(|state| state.aggregate.board().clone())
            .collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    /// Adds a label to the catalog of a board.
    pub async fn register_label(&self, board_id: &BoardId, name: &str, color: &str) -> Result<Label> {
        let label = Label {
            id: LabelId::authoritative(),
            name: normalize_title(name)?,
            color: color.trim().to_string(),
        };
        let mut boards = self.boards.write().await;
        let state = board_state(&mut boards, board_id)?;
        state.aggregate.catalog_mut().add_label(label.clone());
        tracing::debug!(board_id = %board_id, label_id = %label.id, "Registered label");
        Ok(label)
    }

    /// Adds a member to the catalog of a board.
    pub async fn register_member(&self, board_id: &BoardId, name: &str, avatar: &str) -> Result<User> {
        let user = User {
            id: UserId::authoritative(),
            name: normalize_title(name)?,
            avatar: avatar.trim().to_string(),
        };
        let mut boards = self.boards.write().await;
        let state = board_state(&mut boards, board_id)?;
        state.aggregate.catalog_mut().add_member(user.clone());
        tracing::debug!(board_id = %board_id, user_id = %user.id, "Registered member");
        Ok(user)
    }

    /// Saves every board, its change log and recorded results to a JSON file.
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        persistence::save_to_file(self, path.as_ref()).await
    }

    /// Loads a repository saved by [`save_to_file`](Self::save_to_file).
    ///
    /// A missing file yields an empty repository.
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        persistence::load_from_file(path.as_ref()).await
    }

    async fn acknowledge_delay(&self) {
        let millis = self.latency_ms.load(Ordering::Relaxed);
        if millis > 0 {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
    }
}

fn board_state<'a>(
    boards: &'a mut HashMap<BoardId, BoardState>,
    board_id: &BoardId,
) -> Result<&'a mut BoardState> {
    boards.get_mut(board_id).ok_or_else(|| {
        RepositoryError::BoardNotFound {
            board_id: board_id.clone(),
        }
        .into()
    })
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn fetch_board(&self, board_id: &BoardId) -> Result<BoardSnapshot> {
        let boards = self.boards.read().await;
        boards
            .get(board_id)
            .map(|state| state.aggregate.snapshot())
            .ok_or_else(|| {
                RepositoryError::BoardNotFound {
                    board_id: board_id.clone(),
                }
                .into()
            })
    }

    async fn apply_mutation(&self, envelope: &MutationEnvelope) -> Result<MutationResult> {
        let result = {
            let mut boards = self.boards.write().await;
            let state = board_state(&mut boards, &envelope.board_id)?;
            let token = envelope.idempotency_token;

            if let Some(recorded) = state.results.get(&token) {
                tracing::debug!(board_id = %envelope.board_id, %token, "Answering repeated token");
                recorded.clone()
            } else {
                let result = commit(state, envelope, self.policy);
                state.record(token, result.clone());
                state.trim(self.retention);
                result
            }
        };
        self.acknowledge_delay().await;
        Ok(result)
    }

    async fn subscribe(&self, board_id: &BoardId, after: u64) -> Result<Subscription> {
        let boards = self.boards.read().await;
        let state = boards
            .get(board_id)
            .ok_or_else(|| RepositoryError::BoardNotFound {
                board_id: board_id.clone(),
            })?;
        // Backlog and receiver are taken under one lock, so nothing falls between them.
        let backlog: Vec<RemoteChange> = state
            .log
            .iter()
            .filter(|change| change.sequence > after)
            .cloned()
            .collect();
        tracing::debug!(board_id = %board_id, after, backlog = backlog.len(), "New subscription");
        Ok(Subscription::new(after, backlog, state.feed.subscribe()))
    }
}

/// Applies a fresh envelope to `state` and records the change.
fn commit(state: &mut BoardState, envelope: &MutationEnvelope, policy: KeyPolicy) -> MutationResult {
    let mut mutation = envelope.mutation.clone();
    let mut ids = Vec::new();
    if let Some(created) = mutation.created() {
        let authoritative = match &created {
            EntityRef::List(_) => ListId::authoritative().to_string(),
            EntityRef::Card(_) => CardId::authoritative().to_string(),
        };
        let tentative = created.as_str().to_string();
        mutation.rewrite_ids(&HashMap::from([(tentative.clone(), authoritative.clone())]));
        ids.push(IdAssignment {
            kind: created.kind(),
            tentative,
            authoritative,
        });
    }

    let strategy = match policy {
        KeyPolicy::Reallocate => KeyStrategy::PreferHint,
        KeyPolicy::Strict => KeyStrategy::RequireHint,
    };
    match state.aggregate.apply_with(&mutation, strategy) {
        Ok(applied) => {
            let sequence = state.aggregate.sequence() + 1;
            state.aggregate.set_sequence(sequence);
            let created_at = match &applied.entity {
                EntityRef::Card(id) if mutation.created().is_some() => {
                    state.aggregate.card(id).map(|card| card.created_at)
                }
                _ => None,
            };
            let receipt = Receipt {
                token: envelope.idempotency_token,
                sequence,
                ids,
                keys: applied.keys,
                created_at,
            };
            let change = RemoteChange {
                sequence,
                envelope: envelope.clone(),
                receipt: receipt.clone(),
            };
            state.log.push_back(change.clone());
            // Err only means nobody is subscribed right now.
            let _ = state.feed.send(change);
            tracing::debug!(
                board_id = %envelope.board_id,
                token = %envelope.idempotency_token,
                op = mutation.kind(),
                sequence,
                "Committed mutation"
            );
            MutationResult::Committed(receipt)
        }
        Err(err) => {
            tracing::info!(
                board_id = %envelope.board_id,
                token = %envelope.idempotency_token,
                op = mutation.kind(),
                error = %err,
                "Rejected mutation"
            );
            MutationResult::Conflict {
                reason: ConflictReason::from(&err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::CardFields;
    use crate::mutation::{ConflictKind, Mutation, Position};

    async fn seeded() -> (InMemoryRepository, BoardId) {
        let repo = InMemoryRepository::new();
        let board = repo.create_board("Roadmap").await.unwrap();
        (repo, board.id)
    }

    fn receipt(result: MutationResult) -> Receipt {
        match result {
            MutationResult::Committed(receipt) => receipt,
            other => panic!("expected a commit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn creates_get_authoritative_ids() {
        let (repo, board) = seeded().await;
        let mutation = Mutation::create_list("To Do", Position::End);
        let tentative = mutation.target();
        let receipt = receipt(
            repo.apply_mutation(&MutationEnvelope::new(board.clone(), mutation))
                .await
                .unwrap(),
        );

        assert_eq!(receipt.sequence, 1);
        assert_eq!(receipt.ids.len(), 1);
        assert_eq!(receipt.ids[0].tentative, tentative.as_str());
        assert!(receipt.ids[0].authoritative.starts_with("list-"));

        let snapshot = repo.fetch_board(&board).await.unwrap();
        assert_eq!(snapshot.sequence, 1);
        assert_eq!(snapshot.lists[0].id.as_str(), receipt.ids[0].authoritative);
    }

    #[tokio::test]
    async fn repeated_token_is_not_applied_twice() {
        let (repo, board) = seeded().await;
        let envelope = MutationEnvelope::new(board.clone(), Mutation::create_list("A", Position::End));
        let first = repo.apply_mutation(&envelope).await.unwrap();
        let second = repo.apply_mutation(&envelope).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(repo.fetch_board(&board).await.unwrap().lists.len(), 1);
    }

    #[tokio::test]
    async fn rejections_are_conflicts_not_errors() {
        let (repo, board) = seeded().await;
        let envelope = MutationEnvelope::new(
            board.clone(),
            Mutation::create_card(ListId::new("list-gone"), "A", CardFields::default(), Position::End),
        );
        match repo.apply_mutation(&envelope).await.unwrap() {
            MutationResult::Conflict { reason } => {
                assert_eq!(reason.kind, ConflictKind::StaleReference)
            }
            other => panic!("expected a conflict, got {other:?}"),
        }

        let err = repo.fetch_board(&BoardId::new("board-missing")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn strict_policy_rejects_stale_hints() {
        let repo = InMemoryRepository::new().with_policy(KeyPolicy::Strict);
        let board = repo.create_board("Roadmap").await.unwrap().id;
        let mut mutation = Mutation::create_list("A", Position::End);
        mutation.set_key_hint(Some("V".parse().unwrap()));
        receipt(repo.apply_mutation(&MutationEnvelope::new(board.clone(), mutation)).await.unwrap());

        // Same gap, same hint: collides with the list created above
        let mut mutation = Mutation::create_list("B", Position::Start);
        mutation.set_key_hint(Some("V".parse().unwrap()));
        match repo.apply_mutation(&MutationEnvelope::new(board, mutation)).await.unwrap() {
            MutationResult::Conflict { reason } => assert_eq!(reason.kind, ConflictKind::KeyCollision),
            other => panic!("expected a conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn reallocate_policy_replaces_stale_hints() {
        let (repo, board) = seeded().await;
        let mut first = Mutation::create_list("A", Position::End);
        first.set_key_hint(Some("V".parse().unwrap()));
        repo.apply_mutation(&MutationEnvelope::new(board.clone(), first)).await.unwrap();

        let mut second = Mutation::create_list("B", Position::Start);
        second.set_key_hint(Some("V".parse().unwrap()));
        let receipt = receipt(
            repo.apply_mutation(&MutationEnvelope::new(board.clone(), second))
                .await
                .unwrap(),
        );
        assert!(receipt.keys[0].key.as_str() < "V");
    }

    #[tokio::test]
    async fn subscription_replays_backlog_then_follows() {
        let (repo, board) = seeded().await;
        repo.apply_mutation(&MutationEnvelope::new(board.clone(), Mutation::create_list("A", Position::End)))
            .await
            .unwrap();
        let mut sub = repo.subscribe(&board, 0).await.unwrap();
        repo.apply_mutation(&MutationEnvelope::new(board.clone(), Mutation::create_list("B", Position::End)))
            .await
            .unwrap();

        assert_eq!(sub.next().await.map(|c| c.sequence), Some(1));
        assert_eq!(sub.next().await.map(|c| c.sequence), Some(2));
        assert!(sub.try_next().is_none());
        assert!(!sub.is_closed());
    }

    #[tokio::test]
    async fn catalog_registration_requires_board() {
        let (repo, board) = seeded().await;
        let label = repo.register_label(&board, "Bug", "#ef4444").await.unwrap();
        let user = repo.register_member(&board, "Sam", "SA").await.unwrap();
        let snapshot = repo.fetch_board(&board).await.unwrap();
        assert_eq!(snapshot.catalog.label(&label.id), Some(&label));
        assert_eq!(snapshot.catalog.member(&user.id), Some(&user));

        let err = repo
            .register_label(&BoardId::new("board-missing"), "Bug", "#000")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn card_receipts_carry_repository_timestamp() {
        let clock = Arc::new(crate::clock::FixedClock::default());
        let repo = InMemoryRepository::new().with_clock(clock.clone());
        let board = repo.create_board("Roadmap").await.unwrap().id;
        let list = receipt(
            repo.apply_mutation(&MutationEnvelope::new(
                board.clone(),
                Mutation::create_list("To Do", Position::End),
            ))
            .await
            .unwrap(),
        );
        assert_eq!(list.created_at, None);

        let list_id = ListId::new(list.ids[0].authoritative.clone());
        let card = receipt(
            repo.apply_mutation(&MutationEnvelope::new(
                board.clone(),
                Mutation::create_card(list_id, "A", CardFields::default(), Position::End),
            ))
            .await
            .unwrap(),
        );
        assert_eq!(card.created_at, Some(clock.now()));
    }

    #[tokio::test]
    async fn retention_bounds_log_and_results() {
        let repo = InMemoryRepository::new().with_retention(2);
        let board = repo.create_board("Roadmap").await.unwrap().id;
        let mut tokens = Vec::new();
        for title in ["A", "B", "C"] {
            let envelope =
                MutationEnvelope::new(board.clone(), Mutation::create_list(title, Position::End));
            receipt(repo.apply_mutation(&envelope).await.unwrap());
            tokens.push(envelope.idempotency_token);
        }

        {
            let boards = repo.boards.read().await;
            let state = &boards[&board];
            let sequences: Vec<u64> = state.log.iter().map(|c| c.sequence).collect();
            assert_eq!(sequences, [2, 3]);
            assert_eq!(state.results.len(), 2);
            assert!(!state.results.contains_key(&tokens[0]));
            assert!(state.results.contains_key(&tokens[2]));
        }

        // A cursor older than the retained log ends in a gap
        let mut stale = repo.subscribe(&board, 0).await.unwrap();
        assert!(stale.try_next().is_none());
        assert!(stale.is_closed());

        let mut current = repo.subscribe(&board, 1).await.unwrap();
        assert_eq!(current.try_next().map(|c| c.sequence), Some(2));
    }
}
