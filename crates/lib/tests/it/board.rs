//! Board aggregate tests
//!
//! Exercises the aggregate directly, without a repository.

use placard::board::{BoardAggregate, CardFields, CardId, Lifecycle, ListId};
use placard::mutation::Position;

use crate::helpers::{board_with_cards, card_of, card_titles, key, list_of, list_titles};

/// Deterministic pseudo-random indices.
struct Lcg(u64);

impl Lcg {
    fn next_below(&mut self, bound: usize) -> usize {
        self.0 = self.0.wrapping_mul(2862933555777941757).wrapping_add(3037000493);
        ((self.0 >> 33) as usize) % bound
    }
}

fn empty_board() -> BoardAggregate {
    let (board, list) = board_with_cards("Inbox", &[]);
    let mut board = board;
    board.delete_list(&list).unwrap();
    board
}

#[test]
fn create_card_between_neighbours() {
    let (mut board, todo) = board_with_cards("To Do", &[("P", "A"), ("Q", "K")]);
    let p = CardId::new("card-p");

    let applied = board
        .create_card(&todo, "R", CardFields::default(), Position::After(p))
        .unwrap();
    let r = card_of(&applied);

    let key_r = &board.card(&r).unwrap().key;
    assert!(&key("A") < key_r && key_r < &key("K"));
    assert_eq!(card_titles(&board, &todo), ["P", "R", "Q"]);
    // Only the new card was keyed
    assert_eq!(applied.keys.len(), 1);
    board.validate().unwrap();
}

#[test]
fn move_list_to_start() {
    let mut board = empty_board();
    let a = list_of(&board.create_list("A", Position::End).unwrap());
    let b = list_of(&board.create_list("B", Position::End).unwrap());
    board.create_list("C", Position::End).unwrap();

    board.move_list(&b, Position::Start).unwrap();

    assert!(board.list(&b).unwrap().key < board.list(&a).unwrap().key);
    assert_eq!(list_titles(&board), ["B", "A", "C"]);
}

#[test]
fn delete_list_after_emptying_it() {
    let (mut board, todo) = board_with_cards("To Do", &[("P", "A")]);
    let err = board.delete_list(&todo).unwrap_err();
    assert!(err.is_non_empty_list());
    assert!(board.list(&todo).unwrap().is_active());

    board.delete_card(&CardId::new("card-p")).unwrap();
    board.delete_list(&todo).unwrap();
    assert_eq!(board.list(&todo).unwrap().lifecycle, Lifecycle::Deleted);
    assert!(board.lists().is_empty());
}

#[test]
fn create_then_delete_keeps_relative_order() {
    let (mut board, todo) = board_with_cards("To Do", &[("P", "A"), ("Q", "K"), ("S", "U")]);
    let before = card_titles(&board, &todo);

    let r = card_of(
        &board
            .create_card(&todo, "R", CardFields::default(), Position::After(CardId::new("card-q")))
            .unwrap(),
    );
    board.delete_card(&r).unwrap();

    assert_eq!(card_titles(&board, &todo), before);
    assert_eq!(board.card(&CardId::new("card-q")).unwrap().key, key("K"));
}

#[test]
fn random_creates_and_moves_keep_invariants() {
    let mut board = empty_board();
    let lists: Vec<ListId> = (0..3)
        .map(|i| list_of(&board.create_list(&format!("L{i}"), Position::End).unwrap()))
        .collect();

    // Shadow model of the intended visual order per list
    let mut model: Vec<Vec<CardId>> = vec![Vec::new(); lists.len()];
    let mut rng = Lcg(42);

    for step in 0..400 {
        let target = rng.next_below(lists.len());
        let at = rng.next_below(model[target].len() + 1);
        let position = match at {
            0 => Position::Start,
            n => Position::After(model[target][n - 1].clone()),
        };

        let all: Vec<(usize, usize)> = model
            .iter()
            .enumerate()
            .flat_map(|(l, cards)| (0..cards.len()).map(move |i| (l, i)))
            .collect();
        if step % 3 == 0 || all.is_empty() {
            let card = card_of(
                &board
                    .create_card(&lists[target], &format!("c{step}"), CardFields::default(), position)
                    .unwrap(),
            );
            model[target].insert(at, card);
        } else {
            let (from, index) = all[rng.next_below(all.len())];
            let card = model[from][index].clone();
            // Moving after itself is refused; skip those draws
            if matches!(&position, Position::After(anchor) if *anchor == card) {
                continue;
            }
            board.move_card(&card, &lists[target], position.clone()).unwrap();
            model[from].remove(index);
            let at = match &position {
                Position::After(anchor) => {
                    model[target].iter().position(|c| c == anchor).unwrap() + 1
                }
                _ => 0,
            };
            model[target].insert(at, card);
        }
    }

    board.validate().unwrap();
    for (list, expected) in lists.iter().zip(&model) {
        let actual: Vec<CardId> = board.cards_in(list).iter().map(|c| c.id.clone()).collect();
        assert_eq!(&actual, expected);
        let cards = board.cards_in(list);
        assert!(cards.windows(2).all(|w| w[0].key < w[1].key));
    }
}

#[test]
fn stale_targets_are_reported() {
    let (mut board, todo) = board_with_cards("To Do", &[("P", "A")]);
    let p = CardId::new("card-p");
    board.delete_card(&p).unwrap();

    let err = board.move_card(&p, &todo, Position::End).unwrap_err();
    assert!(err.is_stale_reference());
    let err = board
        .create_card(&todo, "R", CardFields::default(), Position::After(p))
        .unwrap_err();
    assert!(err.is_stale_reference());
    let err = board
        .create_card(&ListId::new("list-gone"), "R", CardFields::default(), Position::End)
        .unwrap_err();
    assert!(err.is_stale_reference());
}
