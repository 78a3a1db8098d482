//!
//! Placard: Kanban boards with stable ordering and optimistic, reconciled mutations.
//!
//! ## Core Concepts
//!
//! * **Order keys (`order::OrderKey`)**: Dense fractional keys. A list or card is
//!   placed between two neighbours by allocating a key strictly between theirs,
//!   so no sibling is ever renumbered except by an explicit rebalance.
//! * **Board aggregate (`board::BoardAggregate`)**: Owns a board's lists, cards and
//!   catalog, applies mutations atomically and enforces the ordering invariants.
//! * **Mutations (`mutation::Mutation`)**: The wire vocabulary shared by clients
//!   and repositories, carried in idempotent envelopes.
//! * **Repositories (`repository::Repository`)**: The authoritative store. Assigns
//!   real ids, sequences every committed change and publishes it on a change feed.
//!   `repository::InMemoryRepository` is the bundled implementation.
//! * **Pipelines (`pipeline::MutationPipeline`)**: The client side. Applies
//!   mutations to a local shadow immediately, sends them in order and reconciles
//!   the shadow with whatever the repository decided.

pub mod board;
pub mod clock;
pub mod constants;
pub mod mutation;
pub mod order;
pub mod pipeline;
pub mod repository;

/// Re-export clock types for easier access.
pub use clock::{Clock, SystemClock};

#[cfg(any(test, feature = "testing"))]
pub use clock::FixedClock;

/// Result type used throughout the Placard library.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for the Placard library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Structured order key errors from the order module
    #[error(transparent)]
    Order(order::OrderError),

    /// Structured board errors from the board module
    #[error(transparent)]
    Board(board::BoardError),

    /// Structured repository errors from the repository module
    #[error(transparent)]
    Repository(repository::RepositoryError),

    /// Structured pipeline errors from the pipeline module
    #[error(transparent)]
    Pipeline(pipeline::PipelineError),
}

impl Error {
    /// Get the originating module for this error.
    pub fn module(&self) -> &'static str {
        match self {
            Error::Order(_) => "order",
            Error::Board(_) => "board",
            Error::Repository(_) => "repository",
            Error::Pipeline(_) => "pipeline",
        }
    }

    /// Check if this error indicates a resource was not found.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Repository(repo_err) => repo_err.is_not_found(),
            Error::Board(board_err) => board_err.is_stale_reference(),
            _ => false,
        }
    }

    /// Check if this error is validation-related.
    pub fn is_validation_error(&self) -> bool {
        match self {
            Error::Board(board_err) => board_err.is_validation_error(),
            Error::Order(order_err) => order_err.is_malformed(),
            _ => false,
        }
    }

    /// Check if this error names a deleted or unknown entity.
    pub fn is_stale_reference(&self) -> bool {
        match self {
            Error::Board(board_err) => board_err.is_stale_reference(),
            _ => false,
        }
    }

    /// Check if this error is a refused deletion of a list that still has cards.
    pub fn is_non_empty_list(&self) -> bool {
        match self {
            Error::Board(board_err) => board_err.is_non_empty_list(),
            _ => false,
        }
    }

    /// Check if this error indicates a conflict with existing state.
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Board(board_err) => board_err.is_key_collision(),
            Error::Repository(repo_err) => repo_err.is_already_exists(),
            Error::Pipeline(pipeline_err) => pipeline_err.is_rejected(),
            _ => false,
        }
    }

    /// Check if this error is an abandoned, unacknowledged mutation.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Pipeline(pipeline_err) => pipeline_err.is_timeout(),
            _ => false,
        }
    }

    /// Check if this error is I/O related.
    pub fn is_io_error(&self) -> bool {
        match self {
            Error::Repository(repo_err) => repo_err.is_io_error(),
            _ => false,
        }
    }
}
