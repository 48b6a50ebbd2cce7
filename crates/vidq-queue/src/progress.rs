//! Progress events and the sink they are published through.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use vidq_models::{JobId, JobStatus};

/// Status/progress change published for one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: JobId,
    /// Label of the task the event refers to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    pub status: JobStatus,
    /// Overall job progress, 0-100.
    pub progress: u8,
    pub message: String,
}

/// External collaborator the scheduler publishes status and progress
/// changes to. Fire-and-forget: emissions never influence scheduling and a
/// slow sink never stalls the loop.
#[async_trait]
pub trait ProgressSink: Send + Sync + 'static {
    async fn emit(&self, event: ProgressEvent);
}

/// Sink that logs events through `tracing`.
#[derive(Debug, Default)]
pub struct TracingSink;

#[async_trait]
impl ProgressSink for TracingSink {
    async fn emit(&self, event: ProgressEvent) {
        debug!(
            job_id = %event.job_id,
            task = event.task.as_deref().unwrap_or("-"),
            status = %event.status,
            progress = event.progress,
            "{}",
            event.message
        );
    }
}

/// Sink that fans events out to in-process subscribers.
#[derive(Debug)]
pub struct BroadcastSink {
    tx: broadcast::Sender<ProgressEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl ProgressSink for BroadcastSink {
    async fn emit(&self, event: ProgressEvent) {
        // No subscribers is fine; events are advisory.
        let _ = self.tx.send(event);
    }
}
