mod cli;
mod commands;
mod output;
mod session;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{BoardCommand, CardCommand, Cli, Commands, LabelCommand, ListCommand, MemberCommand};
use session::Session;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so JSON output stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("placard=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let format = cli.format;
    let session = Session::open(&cli).await?;

    match &cli.command {
        Commands::Board(command) => match command {
            BoardCommand::Create { title } => commands::board::create(&session, title, format).await,
            BoardCommand::List => commands::board::list(&session, format).await,
            BoardCommand::Show(board) => commands::board::show(&session, &board.board, format).await,
        },
        Commands::List(command) => match command {
            ListCommand::Add {
                board,
                title,
                placement,
            } => commands::list::add(&session, &board.board, title, placement, format).await,
            ListCommand::Move {
                board,
                list,
                placement,
            } => commands::list::move_list(&session, &board.board, list, placement, format).await,
            ListCommand::Delete { board, list } => {
                commands::list::delete(&session, &board.board, list, format).await
            }
        },
        Commands::Card(command) => match command {
            CardCommand::Add(args) => commands::card::add(args, &session, format).await,
            CardCommand::Move {
                board,
                card,
                to_list,
                placement,
            } => {
                commands::card::move_card(&session, &board.board, card, to_list, placement, format)
                    .await
            }
            CardCommand::Delete { board, card } => {
                commands::card::delete(&session, &board.board, card, format).await
            }
            CardCommand::Label { board, card, label } => {
                commands::card::label(&session, &board.board, card, label, format).await
            }
            CardCommand::Assign {
                board,
                card,
                member,
            } => {
                commands::card::assign(&session, &board.board, card, member.as_deref(), format)
                    .await
            }
        },
        Commands::Label(LabelCommand::Add { board, name, color }) => {
            commands::catalog::add_label(&session, &board.board, name, color, format).await
        }
        Commands::Member(MemberCommand::Add {
            board,
            name,
            avatar,
        }) => commands::catalog::add_member(&session, &board.board, name, avatar, format).await,
    }
}
