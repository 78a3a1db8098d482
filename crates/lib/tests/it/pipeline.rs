//! Optimistic pipeline tests
//!
//! Each test drives one or more clients against a shared InMemoryRepository
//! and checks that their views converge with the repository.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use placard::{Clock, Error};
use placard::board::{BoardId, CardFields, CardId, Lifecycle, ListId};
use placard::mutation::{ConflictKind, Position};
use placard::pipeline::{MutationPipeline, PipelineConfig};
use placard::repository::{InMemoryRepository, KeyPolicy, Repository};

use crate::helpers::{
    Unresponsive, card_of, card_order, card_titles, list_of, list_titles, open, open_with, seed,
    setup, short_timeout,
};

/// Client clock running well ahead of the repository's.
#[derive(Debug)]
struct SkewedClock;

impl Clock for SkewedClock {
    fn now(&self) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 6, 1, 12, 0, 0).unwrap()
    }
}

async fn open_skewed(repo: &Arc<InMemoryRepository>, board: &BoardId) -> MutationPipeline {
    MutationPipeline::open(repo.clone(), board.clone(), PipelineConfig::default())
        .await
        .unwrap()
        .with_clock(Arc::new(SkewedClock))
}

fn conflict_kind(err: &Error) -> Option<ConflictKind> {
    match err {
        Error::Pipeline(err) => err.conflict_kind(),
        _ => None,
    }
}

#[tokio::test]
async fn concurrent_moves_into_one_gap_converge() {
    let (repo, board) = setup(KeyPolicy::Strict).await;
    let mut a = open(&repo, &board).await;
    let (list, cards) = seed(&mut a, "To Do", &["Y", "Z", "X", "W"]).await;
    let (y, x, w) = (&cards[0], &cards[2], &cards[3]);
    let mut b = open(&repo, &board).await;

    a.move_card(x, &list, Position::After(y.clone())).unwrap();
    let (ticket, _) = b.move_card(w, &list, Position::After(y.clone())).unwrap();
    // Both clients derived the same tentative key for the gap
    assert_eq!(a.shadow().card(x).unwrap().key, b.shadow().card(w).unwrap().key);

    assert!(a.flush().await.unwrap().is_clean());
    let report = b.flush().await.unwrap();
    assert!(report.is_clean());
    assert!(report.is_committed(ticket));
    assert_eq!(report.replays, 1);
    a.sync_remote().await.unwrap();

    assert_eq!(card_titles(b.shadow(), &list), ["Y", "W", "X", "Z"]);
    assert_eq!(card_order(a.shadow(), &list), card_order(b.shadow(), &list));
    assert_eq!(card_order(a.confirmed(), &list), card_order(b.confirmed(), &list));
    a.confirmed().validate().unwrap();

    let snapshot = repo.fetch_board(&board).await.unwrap();
    assert_eq!(snapshot.sequence, a.confirmed().sequence());
}

#[tokio::test]
async fn same_card_moved_by_two_clients_converges() {
    let (repo, board) = setup(KeyPolicy::Strict).await;
    let mut a = open(&repo, &board).await;
    let (list, cards) = seed(&mut a, "To Do", &["Y", "Z", "X"]).await;
    let (y, x) = (&cards[0], &cards[2]);
    let mut b = open(&repo, &board).await;

    a.move_card(x, &list, Position::After(y.clone())).unwrap();
    b.move_card(x, &list, Position::After(y.clone())).unwrap();
    assert!(a.flush().await.unwrap().is_clean());
    assert!(b.flush().await.unwrap().is_clean());
    a.sync_remote().await.unwrap();

    assert_eq!(card_titles(a.shadow(), &list), ["Y", "X", "Z"]);
    assert_eq!(card_order(a.shadow(), &list), card_order(b.shadow(), &list));
    b.shadow().validate().unwrap();
}

#[tokio::test]
async fn queued_mutations_follow_tentative_ids() {
    let (repo, board) = setup(KeyPolicy::Reallocate).await;
    let mut p = open(&repo, &board).await;

    let todo = list_of(&p.create_list("To Do", Position::End).unwrap().1);
    let done = list_of(&p.create_list("Done", Position::End).unwrap().1);
    let card = card_of(
        &p.create_card(&todo, "P", CardFields::default(), Position::End)
            .unwrap()
            .1,
    );
    p.move_card(&card, &done, Position::Start).unwrap();
    assert_eq!(card_titles(p.shadow(), &done), ["P"]);

    let report = p.flush().await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.committed.len(), 4);

    let done = ListId::new(p.resolve(done.as_str()).unwrap());
    let card = CardId::new(p.resolve(card.as_str()).unwrap());
    let snapshot = repo.fetch_board(&board).await.unwrap();
    let stored = snapshot.cards.iter().find(|c| c.id == card).unwrap();
    assert_eq!(stored.list_id, done);
    assert_eq!(card_titles(p.shadow(), &done), ["P"]);
    assert_eq!(p.shadow().snapshot().cards, snapshot.cards);
}

#[tokio::test]
async fn late_acknowledgment_is_recovered_from_the_feed() {
    let repo = Arc::new(InMemoryRepository::new().with_latency(Duration::from_millis(300)));
    let board = repo.create_board("Roadmap").await.unwrap().id;
    let mut p = open_with(repo.clone(), &board, short_timeout()).await;

    let (ticket, applied) = p.create_list("To Do", Position::End).unwrap();
    let report = p.flush().await.unwrap();

    assert!(report.is_committed(ticket));
    assert_eq!(report.replays, 1);
    assert_eq!(p.pending(), 0);
    assert!(p.resolve(list_of(&applied).as_str()).is_some());
    // Applied exactly once
    assert_eq!(repo.fetch_board(&board).await.unwrap().lists.len(), 1);
    assert_eq!(list_titles(p.shadow()), ["To Do"]);
}

#[tokio::test]
async fn unanswered_mutation_is_abandoned() {
    let (repo, board) = setup(KeyPolicy::Reallocate).await;
    let unresponsive: Arc<dyn Repository> = Arc::new(Unresponsive::new(repo.clone()));
    let config = PipelineConfig::default()
        .with_ack_timeout(Duration::from_millis(20))
        .with_max_attempts(2);
    let mut p = open_with(unresponsive, &board, config).await;

    let (ticket, _) = p.create_list("To Do", Position::End).unwrap();
    assert_eq!(p.shadow().lists().len(), 1);

    let report = p.flush().await.unwrap();
    assert!(report.failure(ticket).unwrap().is_timeout());
    assert_eq!(report.replays, 2);
    assert_eq!(p.pending(), 0);
    // Rolled back to the confirmed state
    assert!(p.shadow().lists().is_empty());
}

#[tokio::test]
async fn rejection_rolls_back_and_replays_the_rest() {
    let (repo, board) = setup(KeyPolicy::Reallocate).await;
    let mut a = open(&repo, &board).await;
    let (list, cards) = seed(&mut a, "To Do", &["Y", "Z"]).await;
    let mut b = open(&repo, &board).await;

    a.delete_card(&cards[0]).unwrap();
    assert!(a.flush().await.unwrap().is_clean());

    let (stale, _) = b
        .create_card(&list, "R", CardFields::default(), Position::After(cards[0].clone()))
        .unwrap();
    let (fine, _) = b
        .create_card(&list, "S", CardFields::default(), Position::End)
        .unwrap();
    assert_eq!(card_titles(b.shadow(), &list), ["Y", "R", "Z", "S"]);

    let report = b.flush().await.unwrap();
    let err = report.failure(stale).unwrap();
    assert!(err.is_conflict());
    assert_eq!(conflict_kind(err), Some(ConflictKind::StaleReference));
    assert!(report.is_committed(fine));
    assert_eq!(card_titles(b.shadow(), &list), ["Z", "S"]);
    assert_eq!(b.shadow().snapshot(), b.confirmed().snapshot());
}

#[tokio::test]
async fn move_into_concurrently_deleted_list_is_reported() {
    let (repo, board) = setup(KeyPolicy::Reallocate).await;
    let mut a = open(&repo, &board).await;
    let (todo, cards) = seed(&mut a, "To Do", &["P"]).await;
    let (done, _) = seed(&mut a, "Done", &[]).await;
    let mut b = open(&repo, &board).await;

    a.delete_list(&done).unwrap();
    assert!(a.flush().await.unwrap().is_clean());

    let (ticket, _) = b.move_card(&cards[0], &done, Position::End).unwrap();
    assert_eq!(card_titles(b.shadow(), &done), ["P"]);

    let report = b.flush().await.unwrap();
    let err = report.failure(ticket).unwrap();
    assert_eq!(conflict_kind(err), Some(ConflictKind::StaleReference));
    assert_eq!(card_titles(b.shadow(), &todo), ["P"]);
    assert_eq!(list_titles(b.shadow()), ["To Do"]);
}

#[tokio::test]
async fn delete_list_waits_for_its_cards() {
    let (repo, board) = setup(KeyPolicy::Reallocate).await;
    let mut p = open(&repo, &board).await;
    let (list, cards) = seed(&mut p, "To Do", &["P"]).await;

    let err = p.delete_list(&list).unwrap_err();
    assert!(err.is_non_empty_list());
    assert_eq!(p.pending(), 0);

    p.delete_card(&cards[0]).unwrap();
    p.delete_list(&list).unwrap();
    assert!(p.flush().await.unwrap().is_clean());

    let snapshot = repo.fetch_board(&board).await.unwrap();
    let stored = snapshot.lists.iter().find(|l| l.id == list).unwrap();
    assert_eq!(stored.lifecycle, Lifecycle::Deleted);
}

#[tokio::test]
async fn remote_changes_fold_under_pending_ones() {
    let (repo, board) = setup(KeyPolicy::Reallocate).await;
    let mut a = open(&repo, &board).await;
    let (list, _) = seed(&mut a, "To Do", &["P"]).await;
    let mut b = open(&repo, &board).await;

    b.create_card(&list, "Q", CardFields::default(), Position::End)
        .unwrap();
    assert!(b.flush().await.unwrap().is_clean());

    a.create_list("Later", Position::End).unwrap();
    let report = a.sync_remote().await.unwrap();
    assert_eq!(report.folded, 1);
    assert_eq!(card_titles(a.shadow(), &list), ["P", "Q"]);
    assert_eq!(list_titles(a.shadow()), ["To Do", "Later"]);
    assert_eq!(list_titles(a.confirmed()), ["To Do"]);
    assert_eq!(a.pending(), 1);
}

#[tokio::test]
async fn refresh_picks_up_catalog_changes() {
    let (repo, board) = setup(KeyPolicy::Reallocate).await;
    let mut p = open(&repo, &board).await;
    let (_, cards) = seed(&mut p, "To Do", &["P"]).await;

    let label = repo.register_label(&board, "bug", "#ef4444").await.unwrap();
    assert!(p.toggle_label(&cards[0], &label.id).unwrap_err().is_stale_reference());

    p.refresh().await.unwrap();
    p.toggle_label(&cards[0], &label.id).unwrap();
    assert!(p.flush().await.unwrap().is_clean());
    assert!(p.confirmed().card(&cards[0]).unwrap().labels.contains(&label.id));
}

#[tokio::test]
async fn folded_cards_keep_repository_timestamps() {
    let (repo, board) = setup(KeyPolicy::Reallocate).await;
    let mut a = open_skewed(&repo, &board).await;
    let mut b = open_skewed(&repo, &board).await;

    let (list, cards) = seed(&mut a, "To Do", &["Y", "Z"]).await;
    b.sync_remote().await.unwrap();

    let snapshot = repo.fetch_board(&board).await.unwrap();
    assert_eq!(snapshot.cards.len(), 2);
    for card in &snapshot.cards {
        assert_ne!(card.created_at, SkewedClock.now());
        assert_eq!(a.confirmed().card(&card.id).unwrap().created_at, card.created_at);
        assert_eq!(b.confirmed().card(&card.id).unwrap().created_at, card.created_at);
        assert_eq!(a.shadow().card(&card.id).unwrap().created_at, card.created_at);
    }
    assert_eq!(card_order(a.confirmed(), &list), card_order(b.confirmed(), &list));
    assert!(cards.iter().all(|id| b.confirmed().card(id).is_some()));
}
