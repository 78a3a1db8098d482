use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use placard::{
    Clock, Result,
    board::{
        Applied, Board, BoardAggregate, BoardId, BoardSnapshot, Card, CardFields, CardId, Catalog,
        EntityRef, Lifecycle, List, ListId,
    },
    mutation::{MutationEnvelope, MutationResult, Position},
    order::OrderKey,
    pipeline::{MutationPipeline, PipelineConfig},
    repository::{InMemoryRepository, KeyPolicy, Repository, Subscription},
};

/// Clock pinned to 2024-01-01T00:00:00Z.
#[derive(Debug, Default)]
pub struct FrozenClock;

impl Clock for FrozenClock {
    fn now(&self) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }
}

pub fn frozen() -> Arc<dyn Clock> {
    Arc::new(FrozenClock)
}

pub fn key(raw: &str) -> OrderKey {
    OrderKey::parse(raw).unwrap()
}

pub fn list_of(applied: &Applied) -> ListId {
    match &applied.entity {
        EntityRef::List(id) => id.clone(),
        other => panic!("expected a list, got {other:?}"),
    }
}

pub fn card_of(applied: &Applied) -> CardId {
    match &applied.entity {
        EntityRef::Card(id) => id.clone(),
        other => panic!("expected a card, got {other:?}"),
    }
}

pub fn list_titles(board: &BoardAggregate) -> Vec<String> {
    board.lists().iter().map(|l| l.title.clone()).collect()
}

pub fn card_titles(board: &BoardAggregate, list_id: &ListId) -> Vec<String> {
    board.cards_in(list_id).iter().map(|c| c.title.clone()).collect()
}

/// `(id, key)` of every live card in a list, in order.
pub fn card_order(board: &BoardAggregate, list_id: &ListId) -> Vec<(String, String)> {
    board
        .cards_in(list_id)
        .iter()
        .map(|c| (c.id.to_string(), c.key.to_string()))
        .collect()
}

/// A board with one list of keyed cards, built directly from a snapshot.
pub fn board_with_cards(list_title: &str, cards: &[(&str, &str)]) -> (BoardAggregate, ListId) {
    let clock = FrozenClock;
    let board = Board {
        id: BoardId::new("board-1"),
        title: "Roadmap".to_string(),
        created_at: clock.now(),
    };
    let list = List {
        id: ListId::new("list-1"),
        board_id: board.id.clone(),
        title: list_title.to_string(),
        key: key("V"),
        lifecycle: Lifecycle::Active,
    };
    let cards = cards
        .iter()
        .map(|(title, raw_key)| Card {
            id: CardId::new(format!("card-{}", title.to_lowercase())),
            list_id: list.id.clone(),
            title: title.to_string(),
            description: None,
            key: key(raw_key),
            priority: Default::default(),
            due_date: None,
            assignee: None,
            labels: Default::default(),
            created_at: clock.now(),
            lifecycle: Lifecycle::Active,
        })
        .collect();
    let list_id = list.id.clone();
    let snapshot = BoardSnapshot {
        board,
        lists: vec![list],
        cards,
        catalog: Catalog::new(),
        sequence: 0,
    };
    (BoardAggregate::from_snapshot(snapshot).with_clock(frozen()), list_id)
}

/// A repository holding one empty board.
pub async fn setup(policy: KeyPolicy) -> (Arc<InMemoryRepository>, BoardId) {
    let repo = Arc::new(InMemoryRepository::new().with_policy(policy).with_clock(frozen()));
    let board = repo.create_board("Roadmap").await.unwrap();
    (repo, board.id)
}

pub async fn open(repo: &Arc<InMemoryRepository>, board_id: &BoardId) -> MutationPipeline {
    open_with(repo.clone(), board_id, PipelineConfig::default()).await
}

pub async fn open_with(
    repo: Arc<dyn Repository>,
    board_id: &BoardId,
    config: PipelineConfig,
) -> MutationPipeline {
    MutationPipeline::open(repo, board_id.clone(), config)
        .await
        .unwrap()
        .with_clock(frozen())
}

/// Seeds one list with cards through `pipeline`; returns authoritative ids.
pub async fn seed(
    pipeline: &mut MutationPipeline,
    list_title: &str,
    titles: &[&str],
) -> (ListId, Vec<CardId>) {
    let (_, applied) = pipeline.create_list(list_title, Position::End).unwrap();
    let list = list_of(&applied);
    let mut cards = Vec::new();
    for title in titles {
        let (_, applied) = pipeline
            .create_card(&list, title, CardFields::default(), Position::End)
            .unwrap();
        cards.push(card_of(&applied));
    }
    let report = pipeline.flush().await.unwrap();
    assert!(report.is_clean(), "seeding failed: {report:?}");

    let list = ListId::new(pipeline.resolve(list.as_str()).unwrap());
    let cards = cards
        .iter()
        .map(|c| CardId::new(pipeline.resolve(c.as_str()).unwrap()))
        .collect();
    (list, cards)
}

/// Repository that accepts nothing and never answers mutations.
pub struct Unresponsive {
    inner: Arc<InMemoryRepository>,
}

impl Unresponsive {
    pub fn new(inner: Arc<InMemoryRepository>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Repository for Unresponsive {
    async fn fetch_board(&self, board_id: &BoardId) -> Result<BoardSnapshot> {
        self.inner.fetch_board(board_id).await
    }

    async fn apply_mutation(&self, _envelope: &MutationEnvelope) -> Result<MutationResult> {
        std::future::pending().await
    }

    async fn subscribe(&self, board_id: &BoardId, after: u64) -> Result<Subscription> {
        self.inner.subscribe(board_id, after).await
    }
}

pub fn short_timeout() -> PipelineConfig {
    PipelineConfig::default().with_ack_timeout(Duration::from_millis(50))
}
