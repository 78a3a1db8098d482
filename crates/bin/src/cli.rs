//! CLI argument definitions for the Placard binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use placard::constants::DEFAULT_ACK_TIMEOUT_MS;
use placard::mutation::Position;

use crate::output::OutputFormat;

/// Placard Kanban boards
#[derive(Parser, Debug)]
#[command(name = "placard")]
#[command(about = "Placard: Kanban boards with stable ordering")]
#[command(version)]
pub struct Cli {
    /// Repository file; created on first write
    #[arg(short = 'D', long, default_value = "placard.json", env = "PLACARD_DATA", global = true)]
    pub data: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value = "human", global = true)]
    pub format: OutputFormat,

    /// How long to wait for each acknowledgment, in milliseconds
    #[arg(long, default_value_t = DEFAULT_ACK_TIMEOUT_MS, env = "PLACARD_ACK_TIMEOUT_MS", global = true)]
    pub ack_timeout_ms: u64,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create, list and show boards
    #[command(subcommand)]
    Board(BoardCommand),
    /// Manage the lists of a board
    #[command(subcommand)]
    List(ListCommand),
    /// Manage cards
    #[command(subcommand)]
    Card(CardCommand),
    /// Manage the labels of a board
    #[command(subcommand)]
    Label(LabelCommand),
    /// Manage the members of a board
    #[command(subcommand)]
    Member(MemberCommand),
}

/// Board selection shared by every board-scoped command
#[derive(clap::Args, Debug)]
pub struct BoardArg {
    /// Board id
    #[arg(short, long, env = "PLACARD_BOARD")]
    pub board: String,
}

/// Where to place a list or card among its siblings
#[derive(clap::Args, Debug)]
pub struct PlacementArgs {
    /// Place after this sibling
    #[arg(long, conflicts_with = "start")]
    pub after: Option<String>,

    /// Place first
    #[arg(long)]
    pub start: bool,
}

impl PlacementArgs {
    /// Defaults to the end of the sequence.
    pub fn position<I: From<String>>(&self) -> Position<I> {
        match (&self.after, self.start) {
            (Some(anchor), _) => Position::After(I::from(anchor.clone())),
            (None, true) => Position::Start,
            (None, false) => Position::End,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum BoardCommand {
    /// Create a new board
    Create {
        /// Board title
        title: String,
    },
    /// List all boards
    List,
    /// Show the lists and cards of a board
    Show(BoardArg),
}

#[derive(Subcommand, Debug)]
pub enum ListCommand {
    /// Add a list
    Add {
        #[command(flatten)]
        board: BoardArg,
        /// List title
        title: String,
        #[command(flatten)]
        placement: PlacementArgs,
    },
    /// Move a list
    Move {
        #[command(flatten)]
        board: BoardArg,
        /// List id
        list: String,
        #[command(flatten)]
        placement: PlacementArgs,
    },
    /// Delete an empty list
    Delete {
        #[command(flatten)]
        board: BoardArg,
        /// List id
        list: String,
    },
}

/// Arguments for `card add`
#[derive(clap::Args, Debug)]
pub struct CardAddArgs {
    #[command(flatten)]
    pub board: BoardArg,

    /// List to add the card to
    pub list: String,

    /// Card title
    pub title: String,

    /// Longer description
    #[arg(long)]
    pub description: Option<String>,

    /// low, medium, high or urgent
    #[arg(long, default_value = "medium")]
    pub priority: String,

    /// Due date as YYYY-MM-DD
    #[arg(long)]
    pub due: Option<String>,

    /// Member id to assign
    #[arg(long)]
    pub assignee: Option<String>,

    /// Label id to attach; repeatable
    #[arg(long = "label")]
    pub labels: Vec<String>,

    #[command(flatten)]
    pub placement: PlacementArgs,
}

#[derive(Subcommand, Debug)]
pub enum CardCommand {
    /// Add a card
    Add(CardAddArgs),
    /// Move a card within or across lists
    Move {
        #[command(flatten)]
        board: BoardArg,
        /// Card id
        card: String,
        /// Target list id
        to_list: String,
        #[command(flatten)]
        placement: PlacementArgs,
    },
    /// Delete a card
    Delete {
        #[command(flatten)]
        board: BoardArg,
        /// Card id
        card: String,
    },
    /// Attach a label, or detach it if already attached
    Label {
        #[command(flatten)]
        board: BoardArg,
        /// Card id
        card: String,
        /// Label id
        label: String,
    },
    /// Assign a member, or clear the assignee when none is given
    Assign {
        #[command(flatten)]
        board: BoardArg,
        /// Card id
        card: String,
        /// Member id
        member: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum LabelCommand {
    /// Register a label
    Add {
        #[command(flatten)]
        board: BoardArg,
        /// Label name
        name: String,
        /// Display color
        #[arg(long, default_value = "#64748b")]
        color: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum MemberCommand {
    /// Register a member
    Add {
        #[command(flatten)]
        board: BoardArg,
        /// Display name
        name: String,
        /// Avatar marker, usually initials
        #[arg(long, default_value = "")]
        avatar: String,
    },
}
