//! The repository seam.
//!
//! A [`Repository`] owns the authoritative copy of every board. Clients only
//! ever read snapshots, submit [`MutationEnvelope`]s and follow the change
//! feed of a board through a [`Subscription`]. Credentials never pass through
//! this interface; callers are authenticated before they reach it.

mod errors;
mod in_memory;

use std::collections::VecDeque;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

pub use errors::RepositoryError;
pub use in_memory::{InMemoryRepository, KeyPolicy};

use crate::Result;
use crate::board::{BoardId, BoardSnapshot};
use crate::mutation::{MutationEnvelope, MutationResult, Receipt};

/// Storage of boards shared by many clients.
///
/// Implementations apply the mutations of one board in a single order and
/// must answer a repeated idempotency token with the result recorded for it,
/// without applying the mutation again.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Returns the current state of a board.
    ///
    /// # Errors
    /// [`RepositoryError::BoardNotFound`] if the board does not exist.
    async fn fetch_board(&self, board_id: &BoardId) -> Result<BoardSnapshot>;

    /// Applies one mutation to the board named in the envelope.
    ///
    /// A refused mutation is an `Ok(MutationResult::Conflict)`; `Err` is kept
    /// for failures of the repository itself.
    async fn apply_mutation(&self, envelope: &MutationEnvelope) -> Result<MutationResult>;

    /// Follows the committed changes of a board with a sequence above `after`.
    async fn subscribe(&self, board_id: &BoardId, after: u64) -> Result<Subscription>;
}

/// A change committed to a board, as seen by subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteChange {
    pub sequence: u64,
    /// The envelope exactly as its author sent it
    pub envelope: MutationEnvelope,
    pub receipt: Receipt,
}

/// A session on the change feed of one board.
///
/// Yields the recorded backlog first and then live changes, strictly in
/// sequence order. The session ends when the subscriber falls too far behind,
/// when a gap appears or when the repository goes away; restart it with
/// [`Repository::subscribe`] from [`cursor`](Self::cursor).
#[derive(Debug)]
pub struct Subscription {
    backlog: VecDeque<RemoteChange>,
    live: Option<broadcast::Receiver<RemoteChange>>,
    cursor: u64,
    ended: bool,
}

impl Subscription {
    pub fn new(
        after: u64,
        backlog: impl IntoIterator<Item = RemoteChange>,
        live: broadcast::Receiver<RemoteChange>,
    ) -> Self {
        Self {
            backlog: backlog.into_iter().collect(),
            live: Some(live),
            cursor: after,
            ended: false,
        }
    }

    /// Sequence of the last change handed out.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// True once the session has ended and must be restarted.
    pub fn is_closed(&self) -> bool {
        self.ended
    }

    /// Waits for the next change. `None` means the session ended.
    pub async fn next(&mut self) -> Option<RemoteChange> {
        loop {
            if self.ended {
                return None;
            }
            let change = match self.backlog.pop_front() {
                Some(change) => change,
                None => {
                    let live = self.live.as_mut()?;
                    match live.recv().await {
                        Ok(change) => change,
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, cursor = self.cursor, "Subscriber lagged behind");
                            self.end();
                            return None;
                        }
                        Err(RecvError::Closed) => {
                            self.end();
                            return None;
                        }
                    }
                }
            };
            if let Some(change) = self.accept(change) {
                return Some(change);
            }
        }
    }

    /// Returns the next change if one is already available.
    ///
    /// `None` either means nothing is pending or that the session ended;
    /// check [`is_closed`](Self::is_closed) to tell them apart.
    pub fn try_next(&mut self) -> Option<RemoteChange> {
        loop {
            if self.ended {
                return None;
            }
            let change = match self.backlog.pop_front() {
                Some(change) => change,
                None => {
                    let live = self.live.as_mut()?;
                    match live.try_recv() {
                        Ok(change) => change,
                        Err(TryRecvError::Empty) => return None,
                        Err(TryRecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, cursor = self.cursor, "Subscriber lagged behind");
                            self.end();
                            return None;
                        }
                        Err(TryRecvError::Closed) => {
                            self.end();
                            return None;
                        }
                    }
                }
            };
            if let Some(change) = self.accept(change) {
                return Some(change);
            }
        }
    }

    /// Drops duplicates and ends the session on a gap.
    fn accept(&mut self, change: RemoteChange) -> Option<RemoteChange> {
        if change.sequence <= self.cursor {
            return None;
        }
        if change.sequence != self.cursor + 1 {
            tracing::warn!(
                cursor = self.cursor,
                sequence = change.sequence,
                "Gap in change feed"
            );
            self.end();
            return None;
        }
        self.cursor = change.sequence;
        Some(change)
    }

    fn end(&mut self) {
        self.ended = true;
        self.backlog.clear();
        self.live = None;
    }
}
