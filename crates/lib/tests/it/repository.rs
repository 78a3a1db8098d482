//! InMemoryRepository tests
//!
//! Covers the change feed, idempotency, key policies and persistence.

use placard::board::{CardFields, ListId};
use placard::mutation::{ConflictKind, Mutation, MutationEnvelope, MutationResult, Position};
use placard::order::OrderKey;
use placard::repository::{KeyPolicy, Repository};

use crate::helpers::setup;

fn committed_list(result: &MutationResult) -> ListId {
    match result {
        MutationResult::Committed(receipt) => ListId::new(receipt.ids[0].authoritative.clone()),
        other => panic!("expected a commit, got {other:?}"),
    }
}

#[tokio::test]
async fn subscription_drains_backlog_then_follows_live_changes() {
    let (repo, board) = setup(KeyPolicy::Reallocate).await;
    for title in ["A", "B"] {
        repo.apply_mutation(&MutationEnvelope::new(
            board.clone(),
            Mutation::create_list(title, Position::End),
        ))
        .await
        .unwrap();
    }

    let mut sub = repo.subscribe(&board, 1).await.unwrap();
    assert_eq!(sub.next().await.map(|c| c.sequence), Some(2));
    assert!(sub.try_next().is_none());
    assert!(!sub.is_closed());

    repo.apply_mutation(&MutationEnvelope::new(
        board.clone(),
        Mutation::create_list("C", Position::End),
    ))
    .await
    .unwrap();
    let live = sub.next().await.unwrap();
    assert_eq!(live.sequence, 3);
    assert_eq!(sub.cursor(), 3);
    assert_eq!(live.receipt.sequence, 3);
}

#[tokio::test]
async fn repeated_token_is_not_applied_twice() {
    let (repo, board) = setup(KeyPolicy::Reallocate).await;
    let envelope = MutationEnvelope::new(board.clone(), Mutation::create_list("A", Position::End));

    let first = repo.apply_mutation(&envelope).await.unwrap();
    let second = repo.apply_mutation(&envelope).await.unwrap();
    assert_eq!(first, second);

    let snapshot = repo.fetch_board(&board).await.unwrap();
    assert_eq!(snapshot.lists.len(), 1);
    assert_eq!(snapshot.sequence, 1);
}

#[tokio::test]
async fn strict_policy_refuses_colliding_hints() {
    let (repo, board) = setup(KeyPolicy::Strict).await;
    let list = committed_list(
        &repo
            .apply_mutation(&MutationEnvelope::new(
                board.clone(),
                Mutation::create_list("To Do", Position::End),
            ))
            .await
            .unwrap(),
    );

    let with_hint = |title: &str| {
        let mut mutation = Mutation::create_card(list.clone(), title, CardFields::default(), Position::End);
        mutation.set_key_hint(Some(OrderKey::parse("V").unwrap()));
        MutationEnvelope::new(board.clone(), mutation)
    };
    assert!(repo.apply_mutation(&with_hint("P")).await.unwrap().is_committed());

    // Same hint again: it no longer lies after the last card
    match repo.apply_mutation(&with_hint("Q")).await.unwrap() {
        MutationResult::Conflict { reason } => assert_eq!(reason.kind, ConflictKind::KeyCollision),
        other => panic!("expected a conflict, got {other:?}"),
    }
}

#[tokio::test]
async fn reallocate_policy_rederives_colliding_hints() {
    let (repo, board) = setup(KeyPolicy::Reallocate).await;
    let hinted = |title: &str| {
        let mut mutation = Mutation::create_list(title, Position::End);
        mutation.set_key_hint(Some(OrderKey::parse("V").unwrap()));
        MutationEnvelope::new(board.clone(), mutation)
    };
    repo.apply_mutation(&hinted("A")).await.unwrap();
    let second = repo.apply_mutation(&hinted("B")).await.unwrap();

    match second {
        MutationResult::Committed(receipt) => {
            assert!(receipt.keys[0].key > OrderKey::parse("V").unwrap());
        }
        other => panic!("expected a commit, got {other:?}"),
    }
}

#[tokio::test]
async fn refused_mutations_are_recorded_but_not_sequenced() {
    let (repo, board) = setup(KeyPolicy::Reallocate).await;
    let blank = MutationEnvelope::new(board.clone(), Mutation::create_list("   ", Position::End));

    let result = repo.apply_mutation(&blank).await.unwrap();
    assert!(!result.is_committed());
    assert_eq!(repo.apply_mutation(&blank).await.unwrap(), result);
    assert_eq!(repo.fetch_board(&board).await.unwrap().sequence, 0);
}

#[tokio::test]
async fn unknown_board_is_not_found() {
    let (repo, _) = setup(KeyPolicy::Reallocate).await;
    let missing = placard::board::BoardId::new("board-missing");
    assert!(repo.fetch_board(&missing).await.unwrap_err().is_not_found());
    assert!(repo.subscribe(&missing, 0).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn saved_catalog_survives_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("boards.json");
    let (repo, board) = setup(KeyPolicy::Reallocate).await;
    let label = repo.register_label(&board, "bug", "#ef4444").await.unwrap();
    let member = repo.register_member(&board, "Ada", "AL").await.unwrap();
    repo.save_to_file(&path).await.unwrap();

    let loaded = placard::repository::InMemoryRepository::load_from_file(&path)
        .await
        .unwrap();
    let snapshot = loaded.fetch_board(&board).await.unwrap();
    assert_eq!(snapshot.catalog.label(&label.id), Some(&label));
    assert_eq!(snapshot.catalog.member(&member.id), Some(&member));
}
