//! Label and member registration.

use placard::board::BoardId;

use crate::output::{OutputFormat, print_json};
use crate::session::Session;

/// Run the `label add` command
pub async fn add_label(
    session: &Session,
    board: &str,
    name: &str,
    color: &str,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let label = session
        .repository()
        .register_label(&BoardId::new(board), name, color)
        .await?;
    session.save().await?;

    match format {
        OutputFormat::Human => println!("Registered label {} ({})", label.name, label.id),
        OutputFormat::Json => print_json(&label)?,
    }
    Ok(())
}

/// Run the `member add` command
pub async fn add_member(
    session: &Session,
    board: &str,
    name: &str,
    avatar: &str,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let user = session
        .repository()
        .register_member(&BoardId::new(board), name, avatar)
        .await?;
    session.save().await?;

    match format {
        OutputFormat::Human => println!("Registered member {} ({})", user.name, user.id),
        OutputFormat::Json => print_json(&user)?,
    }
    Ok(())
}
