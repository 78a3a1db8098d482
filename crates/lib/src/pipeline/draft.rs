//! Card creation form as an explicit state machine.
//!
//! ```text
//! Idle --open--> Editing --submit--> Submitting --observe(commit)--> Idle
//!                  ^   |                  |
//!                  |   +--submit(invalid)-+--observe(failure)--> Error
//!                  +---------------edit------------------------- Error
//! ```
//!
//! `cancel` returns to Idle from any state. A mutation already handed to the
//! pipeline is not withdrawn by cancelling.

use std::collections::BTreeSet;

use super::{FlushReport, MutationPipeline, PipelineError, Ticket};
use crate::Result;
use crate::board::{CardFields, CardId, EntityRef, LabelId, ListId, Priority, UserId, parse_due_date};
use crate::mutation::Position;

/// Where a [`CardDraft`] is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DraftState {
    #[default]
    Idle,
    Editing,
    /// Handed to the pipeline, waiting for the repository
    Submitting { ticket: Ticket, card_id: CardId },
    /// The last submit failed; the fields are kept for another try
    Error { message: String },
}

impl DraftState {
    pub fn name(&self) -> &'static str {
        match self {
            DraftState::Idle => "idle",
            DraftState::Editing => "editing",
            DraftState::Submitting { .. } => "submitting",
            DraftState::Error { .. } => "in error",
        }
    }
}

/// Raw form input. Nothing is validated until submit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DraftFields {
    pub title: String,
    pub description: String,
    pub assignee: Option<UserId>,
    /// `YYYY-MM-DD`, or blank for none
    pub due_date: String,
    pub priority: Priority,
    pub labels: BTreeSet<LabelId>,
}

/// A new card being composed for one list.
#[derive(Debug, Clone)]
pub struct CardDraft {
    list_id: ListId,
    position: Position<CardId>,
    fields: DraftFields,
    state: DraftState,
    created: Option<CardId>,
}

impl CardDraft {
    /// A closed draft appending to `list_id`.
    pub fn new(list_id: ListId) -> Self {
        Self {
            list_id,
            position: Position::End,
            fields: DraftFields::default(),
            state: DraftState::Idle,
            created: None,
        }
    }

    pub fn with_position(mut self, position: Position<CardId>) -> Self {
        self.position = position;
        self
    }

    pub fn state(&self) -> &DraftState {
        &self.state
    }

    pub fn fields(&self) -> &DraftFields {
        &self.fields
    }

    pub fn list_id(&self) -> &ListId {
        &self.list_id
    }

    /// Authoritative id of the card created by the last successful submit.
    pub fn created(&self) -> Option<&CardId> {
        self.created.as_ref()
    }

    pub fn open(&mut self) -> Result<()> {
        match self.state {
            DraftState::Idle | DraftState::Editing => {
                self.state = DraftState::Editing;
                Ok(())
            }
            _ => Err(self.refuse("open")),
        }
    }

    pub fn set_title(&mut self, title: impl Into<String>) -> Result<()> {
        self.edit()?.title = title.into();
        Ok(())
    }

    pub fn set_description(&mut self, description: impl Into<String>) -> Result<()> {
        self.edit()?.description = description.into();
        Ok(())
    }

    pub fn set_assignee(&mut self, assignee: Option<UserId>) -> Result<()> {
        self.edit()?.assignee = assignee;
        Ok(())
    }

    pub fn set_due_date(&mut self, due_date: impl Into<String>) -> Result<()> {
        self.edit()?.due_date = due_date.into();
        Ok(())
    }

    pub fn set_priority(&mut self, priority: Priority) -> Result<()> {
        self.edit()?.priority = priority;
        Ok(())
    }

    /// Adds or removes a label; returns whether it is now attached.
    pub fn toggle_label(&mut self, label_id: LabelId) -> Result<bool> {
        let labels = &mut self.edit()?.labels;
        if labels.remove(&label_id) {
            Ok(false)
        } else {
            labels.insert(label_id);
            Ok(true)
        }
    }

    /// Validates the fields and submits a card creation through `pipeline`.
    ///
    /// On failure the draft moves to [`DraftState::Error`] and keeps its fields.
    pub fn submit(&mut self, pipeline: &mut MutationPipeline) -> Result<Ticket> {
        if !matches!(self.state, DraftState::Editing | DraftState::Error { .. }) {
            return Err(self.refuse("submit"));
        }

        let result = self.card_fields().and_then(|fields| {
            pipeline.create_card(&self.list_id, &self.fields.title, fields, self.position.clone())
        });
        match result {
            Ok((ticket, applied)) => {
                let card_id = match applied.entity {
                    EntityRef::Card(id) => id,
                    other => CardId::new(other.as_str()),
                };
                tracing::debug!(%ticket, card_id = %card_id, "Card draft submitted");
                self.state = DraftState::Submitting { ticket, card_id };
                Ok(ticket)
            }
            Err(err) => {
                self.state = DraftState::Error {
                    message: err.to_string(),
                };
                Err(err)
            }
        }
    }

    /// Advances a submitting draft with the outcome recorded in `report`.
    pub fn observe(&mut self, report: &FlushReport) -> &DraftState {
        if let DraftState::Submitting { ticket, card_id } = &self.state {
            if let Some(committed) = report.committed.iter().find(|c| c.ticket == *ticket) {
                let created = committed
                    .ids
                    .iter()
                    .find(|a| a.tentative == card_id.as_str())
                    .map(|a| CardId::new(a.authoritative.clone()))
                    .unwrap_or_else(|| card_id.clone());
                self.reset();
                self.created = Some(created);
            } else if let Some(err) = report.failure(*ticket) {
                self.state = DraftState::Error {
                    message: err.to_string(),
                };
            }
        }
        &self.state
    }

    pub fn cancel(&mut self) {
        self.reset();
    }

    fn reset(&mut self) {
        self.fields = DraftFields::default();
        self.state = DraftState::Idle;
    }

    fn edit(&mut self) -> Result<&mut DraftFields> {
        match self.state {
            DraftState::Editing => {}
            DraftState::Error { .. } => self.state = DraftState::Editing,
            _ => return Err(self.refuse("edit")),
        }
        Ok(&mut self.fields)
    }

    fn card_fields(&self) -> Result<CardFields> {
        let due_date = match self.fields.due_date.trim() {
            "" => None,
            raw => Some(parse_due_date(raw)?),
        };
        let description = Some(self.fields.description.trim())
            .filter(|d| !d.is_empty())
            .map(str::to_string);
        Ok(CardFields {
            description,
            priority: self.fields.priority,
            due_date,
            assignee: self.fields.assignee.clone(),
            labels: self.fields.labels.clone(),
        })
    }

    fn refuse(&self, action: &'static str) -> crate::Error {
        PipelineError::InvalidTransition {
            state: self.state.name(),
            action,
        }
        .into()
    }
}
