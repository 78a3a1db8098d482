//! List commands.

use placard::board::ListId;

use crate::cli::PlacementArgs;
use crate::commands::report_change;
use crate::output::OutputFormat;
use crate::session::Session;

/// Run the `list add` command
pub async fn add(
    session: &Session,
    board: &str,
    title: &str,
    placement: &PlacementArgs,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut pipeline = session.pipeline(board).await?;
    let (_, applied) = pipeline.create_list(title, placement.position())?;
    let report = session.finish(&mut pipeline).await?;
    report_change("Created list", &applied.entity, &pipeline, &report, format)
}

/// Run the `list move` command
pub async fn move_list(
    session: &Session,
    board: &str,
    list: &str,
    placement: &PlacementArgs,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut pipeline = session.pipeline(board).await?;
    let (_, applied) = pipeline.move_list(&ListId::new(list), placement.position())?;
    let report = session.finish(&mut pipeline).await?;
    report_change("Moved list", &applied.entity, &pipeline, &report, format)
}

/// Run the `list delete` command
pub async fn delete(
    session: &Session,
    board: &str,
    list: &str,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut pipeline = session.pipeline(board).await?;
    let (_, applied) = pipeline.delete_list(&ListId::new(list))?;
    let report = session.finish(&mut pipeline).await?;
    report_change("Deleted list", &applied.entity, &pipeline, &report, format)
}
