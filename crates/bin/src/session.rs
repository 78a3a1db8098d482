//! Repository file handling for one CLI invocation.
//!
//! Every command loads the JSON repository, works through a pipeline or the
//! administrative API, and saves the file again before exiting.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use placard::board::BoardId;
use placard::pipeline::{FlushReport, MutationPipeline, PipelineConfig};
use placard::repository::InMemoryRepository;

use crate::cli::Cli;

pub struct Session {
    repository: Arc<InMemoryRepository>,
    path: PathBuf,
    config: PipelineConfig,
}

impl Session {
    /// Loads the repository file named on the command line.
    pub async fn open(cli: &Cli) -> Result<Self, Box<dyn std::error::Error>> {
        let repository = InMemoryRepository::load_from_file(&cli.data).await?;
        tracing::debug!(path = %cli.data.display(), "Opened repository file");
        Ok(Self {
            repository: Arc::new(repository),
            path: cli.data.clone(),
            config: PipelineConfig::default()
                .with_ack_timeout(Duration::from_millis(cli.ack_timeout_ms)),
        })
    }

    pub fn repository(&self) -> &InMemoryRepository {
        &self.repository
    }

    /// Opens a pipeline on `board`.
    pub async fn pipeline(&self, board: &str) -> Result<MutationPipeline, Box<dyn std::error::Error>> {
        let pipeline = MutationPipeline::open(
            self.repository.clone(),
            BoardId::new(board),
            self.config.clone(),
        )
        .await?;
        Ok(pipeline)
    }

    /// Sends everything queued on `pipeline` and saves the file.
    ///
    /// Fails with the first mutation the repository refused.
    pub async fn finish(
        &self,
        pipeline: &mut MutationPipeline,
    ) -> Result<FlushReport, Box<dyn std::error::Error>> {
        let mut report = pipeline.flush().await?;
        self.save().await?;
        if !report.failed.is_empty() {
            let failure = report.failed.remove(0);
            tracing::warn!(ticket = %failure.ticket, error = %failure.error, "Mutation failed");
            return Err(failure.error.into());
        }
        Ok(report)
    }

    pub async fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.repository.save_to_file(&self.path).await?;
        Ok(())
    }
}
