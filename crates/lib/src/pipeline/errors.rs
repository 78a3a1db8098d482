//! Error types for the optimistic mutation pipeline.

use thiserror::Error;

use super::Ticket;
use crate::mutation::{ConflictKind, ConflictReason};

/// Errors reported by the pipeline and the card draft.
///
/// Local validation failures are returned as [`BoardError`](crate::board::BoardError)
/// straight from `submit`; these variants cover what goes wrong afterwards.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// The repository refused a mutation and replaying it could not help.
    #[error("Mutation {ticket} rejected: {reason}")]
    Rejected {
        /// The refused mutation
        ticket: Ticket,
        /// The repository's answer
        reason: ConflictReason,
    },

    /// No acknowledgment arrived within the configured attempts.
    #[error("Mutation {ticket} unacknowledged after {attempts} attempt(s)")]
    TimedOut {
        /// The abandoned mutation
        ticket: Ticket,
        /// Sends made before giving up
        attempts: u32,
    },

    /// A card draft was asked to do something its state does not allow.
    #[error("Cannot {action} a draft that is {state}")]
    InvalidTransition {
        /// Current draft state
        state: &'static str,
        /// The refused action
        action: &'static str,
    },
}

impl PipelineError {
    /// Check if this error is a refusal by the repository.
    pub fn is_rejected(&self) -> bool {
        matches!(self, PipelineError::Rejected { .. })
    }

    /// Check if this error is an abandoned, unacknowledged mutation.
    pub fn is_timeout(&self) -> bool {
        matches!(self, PipelineError::TimedOut { .. })
    }

    /// Get the conflict kind if the repository refused the mutation.
    pub fn conflict_kind(&self) -> Option<ConflictKind> {
        match self {
            PipelineError::Rejected { reason, .. } => Some(reason.kind),
            _ => None,
        }
    }

    /// Get the ticket this error is about, if any.
    pub fn ticket(&self) -> Option<Ticket> {
        match self {
            PipelineError::Rejected { ticket, .. } | PipelineError::TimedOut { ticket, .. } => {
                Some(*ticket)
            }
            PipelineError::InvalidTransition { .. } => None,
        }
    }
}

impl From<PipelineError> for crate::Error {
    fn from(err: PipelineError) -> Self {
        crate::Error::Pipeline(err)
    }
}
