//! Pipeline configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_ACK_TIMEOUT_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_KEY_LEN};
use crate::order::KeyAllocator;

/// Tunables of a [`MutationPipeline`](super::MutationPipeline).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// How long to wait for each acknowledgment, in milliseconds
    pub ack_timeout_ms: u64,
    /// Sends per mutation before giving up on it
    pub max_attempts: u32,
    /// Longest order key the local allocator hands out
    pub max_key_len: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_key_len: DEFAULT_MAX_KEY_LEN,
        }
    }
}

impl PipelineConfig {
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_max_key_len(mut self, len: usize) -> Self {
        self.max_key_len = len;
        self
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub(crate) fn allocator(&self) -> KeyAllocator {
        KeyAllocator::new(self.max_key_len)
    }
}
