//! Queue configuration.

use std::time::Duration;

/// Concurrency ceiling of the analysis queue.
///
/// Transcription and AI inference monopolize a shared local model runtime
/// (whisper, Ollama); running more than one concurrently causes contention
/// rather than speedup, so this is a constant rather than a tunable.
pub const ANALYSIS_CONCURRENCY: usize = 1;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Concurrency ceiling of the batch (download/import) queue.
    pub batch_concurrency: usize,
    /// Fallback wake interval for the scheduling loops. Loops are normally
    /// woken by submissions and completions; this only bounds how stale a
    /// missed wakeup can get.
    pub tick_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_concurrency: 10,
            tick_interval: Duration::from_secs(1),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            batch_concurrency: std::env::var("VIDQ_BATCH_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(10),
            tick_interval: Duration::from_millis(
                std::env::var("VIDQ_TICK_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1000),
            ),
        }
    }
}
