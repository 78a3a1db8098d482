//! Optimistic mutation pipeline.
//!
//! A [`MutationPipeline`] gives one client immediate feedback on its own
//! mutations while keeping it consistent with the repository:
//!
//! - `submit` applies a mutation to a local *shadow* aggregate right away and
//!   queues it; created entities get tentative ids and keys from the local
//!   allocator.
//! - `flush` sends the queue in submission order, one mutation at a time, each
//!   bounded by the acknowledgment timeout.
//! - The *confirmed* aggregate only ever advances by folding committed changes
//!   from the board's change feed, in sequence order. After every round trip
//!   the shadow is rebuilt as confirmed state plus a replay of whatever is
//!   still queued.
//!
//! A refused or timed-out mutation therefore never leaves the shadow diverged:
//! the rebuild discards its local effect and re-derives the keys of everything
//! queued behind it.

mod config;
mod draft;
mod errors;

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use config::PipelineConfig;
pub use draft::{CardDraft, DraftFields, DraftState};
pub use errors::PipelineError;

use crate::Result;
use crate::board::{
    Applied, BoardAggregate, BoardId, BoardSnapshot, CardFields, CardId, KeyStrategy, LabelId,
    ListId, UserId,
};
use crate::clock::{Clock, SystemClock};
use crate::mutation::{
    ConflictKind, ConflictReason, IdAssignment, Mutation, MutationEnvelope, MutationResult,
    Position, Receipt,
};
use crate::repository::{RemoteChange, Repository, Subscription};

/// Local handle for a submitted mutation.
///
/// Stays the same across retries, even when the idempotency token is renewed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ticket(u64);

impl Ticket {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A mutation the repository accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed {
    pub ticket: Ticket,
    pub sequence: u64,
    /// Tentative ids replaced by this commit
    pub ids: Vec<IdAssignment>,
}

/// A mutation the pipeline gave up on.
#[derive(Debug)]
pub struct Failure {
    pub ticket: Ticket,
    pub error: crate::Error,
}

/// What happened during a [`flush`](MutationPipeline::flush) or a sync.
#[derive(Debug, Default)]
pub struct FlushReport {
    pub committed: Vec<Committed>,
    pub failed: Vec<Failure>,
    /// Tickets collapsed into a later mutation before being sent
    pub superseded: Vec<Ticket>,
    /// Rollbacks followed by a replay of the queue
    pub replays: usize,
    /// Committed changes folded into the confirmed state
    pub folded: usize,
}

impl FlushReport {
    /// True if nothing failed.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn is_committed(&self, ticket: Ticket) -> bool {
        self.committed.iter().any(|c| c.ticket == ticket)
    }

    pub fn failure(&self, ticket: Ticket) -> Option<&crate::Error> {
        self.failed
            .iter()
            .find(|f| f.ticket == ticket)
            .map(|f| &f.error)
    }
}

#[derive(Debug, Clone)]
struct Pending {
    ticket: Ticket,
    token: Uuid,
    mutation: Mutation,
    /// Sends so far under any token
    attempts: u32,
}

/// Optimistic client for one board.
///
/// All methods take `&mut self`: mutations of one board are applied and
/// reconciled on a single logical sequence.
pub struct MutationPipeline {
    repository: Arc<dyn Repository>,
    board_id: BoardId,
    config: PipelineConfig,
    clock: Arc<dyn Clock>,
    confirmed: BoardAggregate,
    shadow: BoardAggregate,
    queue: VecDeque<Pending>,
    /// Tentative id to authoritative id, for every commit seen
    resolved: HashMap<String, String>,
    subscription: Option<Subscription>,
    superseded: Vec<Ticket>,
    next_ticket: u64,
}

impl fmt::Debug for MutationPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationPipeline")
            .field("board_id", &self.board_id)
            .field("config", &self.config)
            .field("sequence", &self.confirmed.sequence())
            .field("pending", &self.queue.len())
            .finish_non_exhaustive()
    }
}

impl MutationPipeline {
    /// Fetches the board and starts following its change feed.
    pub async fn open(
        repository: Arc<dyn Repository>,
        board_id: BoardId,
        config: PipelineConfig,
    ) -> Result<Self> {
        let snapshot = repository.fetch_board(&board_id).await?;
        let sequence = snapshot.sequence;
        let subscription = repository.subscribe(&board_id, sequence).await?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let confirmed = restore(snapshot, &config, &clock);
        if let Err(err) = confirmed.validate() {
            tracing::warn!(board_id = %board_id, error = %err, "Snapshot violates board invariants");
        }
        tracing::debug!(board_id = %board_id, sequence, "Opened pipeline");

        Ok(Self {
            repository,
            board_id,
            config,
            clock,
            shadow: confirmed.clone(),
            confirmed,
            queue: VecDeque::new(),
            resolved: HashMap::new(),
            subscription: Some(subscription),
            superseded: Vec::new(),
            next_ticket: 1,
        })
    }

    /// Use `clock` for timestamps of locally created cards.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.confirmed = self.confirmed.with_clock(clock.clone());
        self.shadow = self.shadow.with_clock(clock.clone());
        self.clock = clock;
        self
    }

    pub fn board_id(&self) -> &BoardId {
        &self.board_id
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The board as its user sees it: confirmed state plus every queued mutation.
    pub fn shadow(&self) -> &BoardAggregate {
        &self.shadow
    }

    /// The board as of the last change folded from the repository.
    pub fn confirmed(&self) -> &BoardAggregate {
        &self.confirmed
    }

    /// Number of mutations not yet acknowledged.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Authoritative id for a tentative id, once its creation committed.
    pub fn resolve(&self, id: &str) -> Option<&str> {
        self.resolved.get(id).map(String::as_str)
    }

    /// Applies `mutation` locally and queues it for the repository.
    ///
    /// Local validation failures are returned here and nothing is queued.
    pub fn submit(&mut self, mut mutation: Mutation) -> Result<(Ticket, Applied)> {
        let applied = self.shadow.apply(&mutation)?;
        if let Some(key) = applied.primary_key() {
            mutation.set_key_hint(Some(key.clone()));
        }
        let ticket = Ticket(self.next_ticket);
        self.next_ticket += 1;
        let pending = Pending {
            ticket,
            token: Uuid::new_v4(),
            mutation,
            attempts: 0,
        };

        match self.queue.back_mut() {
            Some(last) if last.attempts == 0 && pending.mutation.supersedes(&last.mutation) => {
                tracing::debug!(
                    board_id = %self.board_id,
                    %ticket,
                    superseded = %last.ticket,
                    "Collapsed queued mutation"
                );
                self.superseded.push(last.ticket);
                *last = pending;
            }
            _ => {
                tracing::debug!(
                    board_id = %self.board_id,
                    %ticket,
                    op = pending.mutation.kind(),
                    "Queued mutation"
                );
                self.queue.push_back(pending);
            }
        }
        Ok((ticket, applied))
    }

    pub fn create_list(&mut self, title: &str, position: Position<ListId>) -> Result<(Ticket, Applied)> {
        self.submit(Mutation::create_list(title, position))
    }

    pub fn create_card(
        &mut self,
        list_id: &ListId,
        title: &str,
        fields: CardFields,
        position: Position<CardId>,
    ) -> Result<(Ticket, Applied)> {
        self.submit(Mutation::create_card(list_id.clone(), title, fields, position))
    }

    pub fn move_card(
        &mut self,
        card_id: &CardId,
        to_list: &ListId,
        position: Position<CardId>,
    ) -> Result<(Ticket, Applied)> {
        self.submit(Mutation::MoveCard {
            card_id: card_id.clone(),
            to_list: to_list.clone(),
            position,
            key: None,
        })
    }

    pub fn move_list(&mut self, list_id: &ListId, position: Position<ListId>) -> Result<(Ticket, Applied)> {
        self.submit(Mutation::MoveList {
            list_id: list_id.clone(),
            position,
            key: None,
        })
    }

    pub fn delete_card(&mut self, card_id: &CardId) -> Result<(Ticket, Applied)> {
        self.submit(Mutation::DeleteCard {
            card_id: card_id.clone(),
        })
    }

    pub fn delete_list(&mut self, list_id: &ListId) -> Result<(Ticket, Applied)> {
        self.submit(Mutation::DeleteList {
            list_id: list_id.clone(),
        })
    }

    /// Flips a label relative to what the user currently sees.
    pub fn toggle_label(&mut self, card_id: &CardId, label_id: &LabelId) -> Result<(Ticket, Applied)> {
        let mutation = Mutation::toggle_label(&self.shadow, card_id, label_id)?;
        self.submit(mutation)
    }

    pub fn set_assignee(&mut self, card_id: &CardId, user_id: Option<UserId>) -> Result<(Ticket, Applied)> {
        self.submit(Mutation::SetAssignee {
            card_id: card_id.clone(),
            user_id,
        })
    }

    /// Sends every queued mutation, oldest first, and reconciles.
    ///
    /// Stops early only when the repository itself fails; the unsent part of
    /// the queue is kept and ids committed so far stay available through
    /// [`resolve`](Self::resolve).
    pub async fn flush(&mut self) -> Result<FlushReport> {
        let mut report = FlushReport {
            superseded: std::mem::take(&mut self.superseded),
            ..FlushReport::default()
        };
        let repository = Arc::clone(&self.repository);
        let timeout = self.config.ack_timeout();

        while let Some(front) = self.queue.front_mut() {
            front.attempts += 1;
            let ticket = front.ticket;
            let attempt = front.attempts;
            let envelope =
                MutationEnvelope::with_token(front.token, self.board_id.clone(), front.mutation.clone());
            tracing::debug!(
                board_id = %self.board_id,
                %ticket,
                token = %envelope.idempotency_token,
                attempt,
                op = envelope.mutation.kind(),
                "Sending mutation"
            );

            match tokio::time::timeout(timeout, repository.apply_mutation(&envelope)).await {
                Ok(Ok(MutationResult::Committed(receipt))) => {
                    self.on_commit(receipt, &mut report).await?
                }
                Ok(Ok(MutationResult::Conflict { reason })) => {
                    self.on_conflict(reason, &mut report).await?
                }
                Ok(Err(err)) => {
                    tracing::warn!(board_id = %self.board_id, %ticket, error = %err, "Repository failed");
                    return Err(err);
                }
                Err(_) => self.on_timeout(&mut report).await?,
            }
        }

        tracing::debug!(
            board_id = %self.board_id,
            committed = report.committed.len(),
            failed = report.failed.len(),
            replays = report.replays,
            "Flushed queue"
        );
        Ok(report)
    }

    /// Folds changes made by other clients into the confirmed state.
    pub async fn sync_remote(&mut self) -> Result<FlushReport> {
        let mut report = FlushReport::default();
        self.drain_feed(&mut report).await?;
        self.rebuild(&mut report);
        Ok(report)
    }

    /// Refetches the whole board, for example after catalog changes.
    pub async fn refresh(&mut self) -> Result<FlushReport> {
        let mut report = FlushReport::default();
        self.resync().await?;
        self.rebuild(&mut report);
        Ok(report)
    }

    async fn on_commit(&mut self, receipt: Receipt, report: &mut FlushReport) -> Result<()> {
        if let Some(pending) = self.queue.pop_front() {
            self.acknowledge(pending.ticket, &receipt, report);
        }
        self.catch_up(receipt.sequence, report).await?;
        self.rebuild(report);
        Ok(())
    }

    async fn on_conflict(&mut self, reason: ConflictReason, report: &mut FlushReport) -> Result<()> {
        let Some(front) = self.queue.front_mut() else {
            return Ok(());
        };
        let ticket = front.ticket;

        if reason.kind == ConflictKind::KeyCollision && front.attempts < self.config.max_attempts {
            tracing::info!(
                board_id = %self.board_id,
                %ticket,
                "Order key collided with a concurrent change, re-deriving"
            );
            // The refused token is recorded as a conflict; a retry needs its own.
            front.token = Uuid::new_v4();
            front.mutation.set_key_hint(None);
        } else {
            tracing::warn!(board_id = %self.board_id, %ticket, %reason, "Mutation rejected");
            self.queue.pop_front();
            report.failed.push(Failure {
                ticket,
                error: PipelineError::Rejected { ticket, reason }.into(),
            });
        }

        report.replays += 1;
        self.resync().await?;
        self.rebuild(report);
        Ok(())
    }

    async fn on_timeout(&mut self, report: &mut FlushReport) -> Result<()> {
        let Some(front) = self.queue.front() else {
            return Ok(());
        };
        let (ticket, token, attempts) = (front.ticket, front.token, front.attempts);
        tracing::warn!(board_id = %self.board_id, %ticket, attempts, "Acknowledgment timed out");
        report.replays += 1;

        // A lost acknowledgment still shows up on the change feed.
        self.drain_feed(report).await?;
        let still_queued = self.queue.front().is_some_and(|p| p.token == token);

        if still_queued && attempts >= self.config.max_attempts {
            self.queue.pop_front();
            report.failed.push(Failure {
                ticket,
                error: PipelineError::TimedOut { ticket, attempts }.into(),
            });
            self.resync().await?;
        }
        self.rebuild(report);
        Ok(())
    }

    fn acknowledge(&mut self, ticket: Ticket, receipt: &Receipt, report: &mut FlushReport) {
        let ids = receipt.id_map();
        for pending in &mut self.queue {
            pending.mutation.rewrite_ids(&ids);
        }
        self.resolved.extend(ids);
        tracing::debug!(
            board_id = %self.board_id,
            %ticket,
            sequence = receipt.sequence,
            "Mutation committed"
        );
        report.committed.push(Committed {
            ticket,
            sequence: receipt.sequence,
            ids: receipt.ids.clone(),
        });
    }

    /// Folds feed changes until the confirmed state reaches `sequence`.
    async fn catch_up(&mut self, sequence: u64, report: &mut FlushReport) -> Result<()> {
        let timeout = self.config.ack_timeout();
        while self.confirmed.sequence() < sequence {
            let next = match self.subscription.as_mut() {
                Some(sub) => tokio::time::timeout(timeout, sub.next()).await.ok().flatten(),
                None => None,
            };
            let folded = match next {
                Some(change) => self.fold(change, report),
                None => false,
            };
            if !folded {
                self.resync().await?;
                break;
            }
        }
        Ok(())
    }

    /// Folds every change already available on the feed.
    async fn drain_feed(&mut self, report: &mut FlushReport) -> Result<()> {
        loop {
            let (next, closed) = match self.subscription.as_mut() {
                Some(sub) => {
                    let next = sub.try_next();
                    (next, sub.is_closed())
                }
                None => (None, true),
            };
            match next {
                Some(change) => {
                    if !self.fold(change, report) {
                        return self.resync().await;
                    }
                }
                None if closed => return self.resync().await,
                None => return Ok(()),
            }
        }
    }

    /// Applies one committed change to the confirmed state.
    ///
    /// Returns false if the change does not apply, which means the confirmed
    /// state has diverged and must be refetched.
    fn fold(&mut self, change: RemoteChange, report: &mut FlushReport) -> bool {
        let RemoteChange {
            sequence,
            envelope,
            receipt,
        } = change;
        if sequence <= self.confirmed.sequence() {
            return true;
        }

        let token = envelope.idempotency_token;
        let mut mutation = envelope.mutation;
        mutation.rewrite_ids(&receipt.id_map());
        if let Err(err) = self.confirmed.apply_authoritative(&mutation, &receipt) {
            tracing::warn!(
                board_id = %self.board_id,
                sequence,
                error = %err,
                "Committed change does not apply to confirmed state"
            );
            return false;
        }
        self.confirmed.set_sequence(sequence);
        report.folded += 1;

        if let Some(index) = self.queue.iter().position(|p| p.token == token) {
            if let Some(pending) = self.queue.remove(index) {
                tracing::debug!(
                    board_id = %self.board_id,
                    ticket = %pending.ticket,
                    "Acknowledgment recovered from change feed"
                );
                self.acknowledge(pending.ticket, &receipt, report);
            }
        }
        true
    }

    /// Replaces the confirmed state with a fresh snapshot and resubscribes.
    async fn resync(&mut self) -> Result<()> {
        self.subscription = None;
        let snapshot = self.repository.fetch_board(&self.board_id).await?;
        let sequence = snapshot.sequence;
        self.confirmed = restore(snapshot, &self.config, &self.clock);
        self.subscription = Some(self.repository.subscribe(&self.board_id, sequence).await?);
        tracing::debug!(board_id = %self.board_id, sequence, "Resynchronized with repository");
        Ok(())
    }

    /// Rebuilds the shadow as confirmed state plus a replay of the queue.
    ///
    /// Keys are re-derived where the old hint no longer fits. Mutations that
    /// no longer apply at all are dropped and reported.
    fn rebuild(&mut self, report: &mut FlushReport) {
        let mut shadow = self.confirmed.clone();
        let mut kept = VecDeque::with_capacity(self.queue.len());

        for mut pending in self.queue.drain(..) {
            match shadow.apply_with(&pending.mutation, KeyStrategy::PreferHint) {
                Ok(applied) => {
                    if let Some(key) = applied.primary_key() {
                        pending.mutation.set_key_hint(Some(key.clone()));
                    }
                    kept.push_back(pending);
                }
                Err(err) => {
                    tracing::warn!(
                        board_id = %self.board_id,
                        ticket = %pending.ticket,
                        error = %err,
                        "Dropping queued mutation that no longer applies"
                    );
                    report.failed.push(Failure {
                        ticket: pending.ticket,
                        error: err.into(),
                    });
                }
            }
        }

        self.queue = kept;
        self.shadow = shadow;
    }
}

fn restore(snapshot: BoardSnapshot, config: &PipelineConfig, clock: &Arc<dyn Clock>) -> BoardAggregate {
    BoardAggregate::from_snapshot(snapshot)
        .with_allocator(config.allocator())
        .with_clock(clock.clone())
}
