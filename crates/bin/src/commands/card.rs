//! Card commands.

use placard::board::{CardFields, CardId, LabelId, ListId, Priority, UserId, parse_due_date};

use crate::cli::{CardAddArgs, PlacementArgs};
use crate::commands::report_change;
use crate::output::OutputFormat;
use crate::session::Session;

/// Run the `card add` command
pub async fn add(args: &CardAddArgs, session: &Session, format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let fields = CardFields {
        description: args.description.clone(),
        priority: args.priority.parse::<Priority>()?,
        due_date: args.due.as_deref().map(parse_due_date).transpose()?,
        assignee: args.assignee.clone().map(UserId::from),
        labels: args.labels.iter().cloned().map(LabelId::from).collect(),
    };

    let mut pipeline = session.pipeline(&args.board.board).await?;
    let (_, applied) = pipeline.create_card(
        &ListId::new(args.list.as_str()),
        &args.title,
        fields,
        args.placement.position(),
    )?;
    let report = session.finish(&mut pipeline).await?;
    report_change("Created card", &applied.entity, &pipeline, &report, format)
}

/// Run the `card move` command
pub async fn move_card(
    session: &Session,
    board: &str,
    card: &str,
    to_list: &str,
    placement: &PlacementArgs,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut pipeline = session.pipeline(board).await?;
    let (_, applied) =
        pipeline.move_card(&CardId::new(card), &ListId::new(to_list), placement.position())?;
    let report = session.finish(&mut pipeline).await?;
    report_change("Moved card", &applied.entity, &pipeline, &report, format)
}

/// Run the `card delete` command
pub async fn delete(
    session: &Session,
    board: &str,
    card: &str,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut pipeline = session.pipeline(board).await?;
    let (_, applied) = pipeline.delete_card(&CardId::new(card))?;
    let report = session.finish(&mut pipeline).await?;
    report_change("Deleted card", &applied.entity, &pipeline, &report, format)
}

/// Run the `card label` command
pub async fn label(
    session: &Session,
    board: &str,
    card: &str,
    label: &str,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut pipeline = session.pipeline(board).await?;
    let card_id = CardId::new(card);
    let label_id = LabelId::new(label);
    let (_, applied) = pipeline.toggle_label(&card_id, &label_id)?;
    let report = session.finish(&mut pipeline).await?;

    let attached = pipeline
        .confirmed()
        .card(&card_id)
        .is_some_and(|c| c.labels.contains(&label_id));
    let action = if attached { "Labelled card" } else { "Unlabelled card" };
    report_change(action, &applied.entity, &pipeline, &report, format)
}

/// Run the `card assign` command
pub async fn assign(
    session: &Session,
    board: &str,
    card: &str,
    member: Option<&str>,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut pipeline = session.pipeline(board).await?;
    let (_, applied) = pipeline.set_assignee(&CardId::new(card), member.map(UserId::new))?;
    let report = session.finish(&mut pipeline).await?;
    let action = if member.is_some() { "Assigned card" } else { "Unassigned card" };
    report_change(action, &applied.entity, &pipeline, &report, format)
}
