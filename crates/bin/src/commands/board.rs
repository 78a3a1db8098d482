//! Board commands.

use placard::board::{BoardAggregate, Card};
use placard::repository::Repository;

use crate::output::{OutputFormat, print_json, print_table};
use crate::session::Session;

/// Run the `board create` command
pub async fn create(
    session: &Session,
    title: &str,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let board = session.repository().create_board(title).await?;
    session.save().await?;

    match format {
        OutputFormat::Human => println!("Created board {} ({})", board.title, board.id),
        OutputFormat::Json => print_json(&board)?,
    }
    Ok(())
}

/// Run the `board list` command
pub async fn list(session: &Session, format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let boards = session.repository().boards().await;

    match format {
        OutputFormat::Human => {
            if boards.is_empty() {
                println!("No boards found.");
                return Ok(());
            }
            let rows: Vec<Vec<String>> = boards
                .iter()
                .map(|b| {
                    vec![
                        b.id.to_string(),
                        b.title.clone(),
                        b.created_at.format("%Y-%m-%d %H:%M").to_string(),
                    ]
                })
                .collect();
            print_table(&["ID", "TITLE", "CREATED"], &rows);
        }
        OutputFormat::Json => print_json(&boards)?,
    }
    Ok(())
}

/// Run the `board show` command
pub async fn show(
    session: &Session,
    board: &str,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let snapshot = session
        .repository()
        .fetch_board(&placard::board::BoardId::new(board))
        .await?;
    let board = BoardAggregate::from_snapshot(snapshot);

    match format {
        OutputFormat::Human => print_board(&board),
        OutputFormat::Json => {
            let lists: Vec<_> = board
                .lists()
                .into_iter()
                .map(|list| {
                    serde_json::json!({
                        "list": list,
                        "cards": board.cards_in(&list.id),
                    })
                })
                .collect();
            let value = serde_json::json!({
                "board": board.board(),
                "sequence": board.sequence(),
                "lists": lists,
                "labels": board.catalog().labels().collect::<Vec<_>>(),
                "members": board.catalog().members().collect::<Vec<_>>(),
            });
            print_json(&value)?;
        }
    }
    Ok(())
}

fn print_board(board: &BoardAggregate) {
    let header = board.board();
    println!("{} ({})", header.title, header.id);

    let lists = board.lists();
    if lists.is_empty() {
        println!("No lists yet.");
        return;
    }
    for list in lists {
        println!();
        println!("== {} ({})", list.title, list.id);
        let rows: Vec<Vec<String>> = board
            .cards_in(&list.id)
            .into_iter()
            .map(|card| card_row(board, card))
            .collect();
        if rows.is_empty() {
            println!("   (empty)");
        } else {
            print_table(&["ID", "TITLE", "PRIORITY", "DUE", "ASSIGNEE", "LABELS"], &rows);
        }
    }
}

fn card_row(board: &BoardAggregate, card: &Card) -> Vec<String> {
    let catalog = board.catalog();
    let assignee = card
        .assignee
        .as_ref()
        .map(|id| catalog.member(id).map_or_else(|| id.to_string(), |u| u.name.clone()))
        .unwrap_or_default();
    let labels: Vec<String> = card
        .labels
        .iter()
        .map(|id| catalog.label(id).map_or_else(|| id.to_string(), |l| l.name.clone()))
        .collect();
    vec![
        card.id.to_string(),
        card.title.clone(),
        card.priority.to_string(),
        card.due_date.map(|d| d.to_string()).unwrap_or_default(),
        assignee,
        labels.join(","),
    ]
}
