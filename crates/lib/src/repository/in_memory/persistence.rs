//! Persistence operations for InMemoryRepository
//!
//! This module handles serialization and file I/O for saving/loading
//! the repository state to/from JSON files.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use super::{BoardState, InMemoryRepository};
use crate::Result;
use crate::board::BoardSnapshot;
use crate::mutation::MutationResult;
use crate::repository::{RemoteChange, RepositoryError};

/// The current persistence file format version.
/// v0 indicates this is an unstable format subject to breaking changes.
const PERSISTENCE_VERSION: u8 = 0;

/// Helper to check if version is default (0) for serde skip_serializing_if
fn is_v0(v: &u8) -> bool {
    *v == 0
}

/// Validates the persistence version during deserialization.
fn validate_persistence_version<'de, D>(deserializer: D) -> std::result::Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let version = u8::deserialize(deserializer)?;
    if version != PERSISTENCE_VERSION {
        return Err(serde::de::Error::custom(format!(
            "unsupported persistence version {version}; only version {PERSISTENCE_VERSION} is supported"
        )));
    }
    Ok(version)
}

#[derive(Serialize, Deserialize)]
struct RecordedResult {
    token: Uuid,
    result: MutationResult,
}

#[derive(Serialize, Deserialize)]
struct PersistedBoard {
    snapshot: BoardSnapshot,
    #[serde(default)]
    log: Vec<RemoteChange>,
    #[serde(default)]
    results: Vec<RecordedResult>,
}

/// On-disk layout of a repository
#[derive(Serialize, Deserialize)]
struct PersistedRepository {
    /// File format version for compatibility checking
    #[serde(
        rename = "_v",
        default,
        skip_serializing_if = "is_v0",
        deserialize_with = "validate_persistence_version"
    )]
    version: u8,
    boards: Vec<PersistedBoard>,
}

pub(super) async fn save_to_file(repo: &InMemoryRepository, path: &Path) -> Result<()> {
    let persisted = {
        let boards = repo.boards.read().await;
        let mut persisted: Vec<PersistedBoard> = boards
            .values()
            .map(|state| {
                // Oldest first, so trimming after a reload keeps the newest
                let results = state
                    .tokens
                    .iter()
                    .filter_map(|token| {
                        state.results.get(token).map(|result| RecordedResult {
                            token: *token,
                            result: result.clone(),
                        })
                    })
                    .collect();
                PersistedBoard {
                    snapshot: state.aggregate.snapshot(),
                    log: state.log.iter().cloned().collect(),
                    results,
                }
            })
            .collect();
        persisted.sort_by(|a, b| a.snapshot.board.id.cmp(&b.snapshot.board.id));
        PersistedRepository {
            version: PERSISTENCE_VERSION,
            boards: persisted,
        }
    };

    let json = serde_json::to_string_pretty(&persisted)
        .map_err(|e| RepositoryError::SerializationFailed { source: e })?;
    tokio::fs::write(path, json)
        .await
        .map_err(|e| RepositoryError::FileIo { source: e })?;
    tracing::debug!(path = %path.display(), boards = persisted.boards.len(), "Saved repository");
    Ok(())
}

pub(super) async fn load_from_file(path: &Path) -> Result<InMemoryRepository> {
    let json = match tokio::fs::read_to_string(path).await {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "No repository file, starting empty");
            return Ok(InMemoryRepository::new());
        }
        Err(e) => return Err(RepositoryError::FileIo { source: e }.into()),
    };

    let persisted: PersistedRepository = serde_json::from_str(&json)
        .map_err(|e| RepositoryError::DeserializationFailed { source: e })?;

    let repo = InMemoryRepository::new();
    let boards: HashMap<_, _> = persisted
        .boards
        .into_iter()
        .map(|board| {
            let results = board.results.into_iter().map(|r| (r.token, r.result));
            let aggregate = repo.restore(board.snapshot);
            let mut state = BoardState::new(aggregate, board.log, results);
            state.trim(repo.retention());
            (state.aggregate.id().clone(), state)
        })
        .collect();
    tracing::debug!(path = %path.display(), boards = boards.len(), "Loaded repository");
    *repo.boards.write().await = boards;
    Ok(repo)
}
