//! The single entry point for all queue operations.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

use vidq_models::{Job, JobId, JobSpec, JobStatus, QueueClass};

use crate::config::{QueueConfig, ANALYSIS_CONCURRENCY};
use crate::error::{QueueError, QueueResult};
use crate::progress::ProgressSink;
use crate::queue::Queue;
use crate::runner::JobRunner;

/// Snapshot of one queue's job counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct QueueStatus {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Jobs currently holding a concurrency slot.
    pub active_count: usize,
    pub max_concurrency: usize,
}

/// Owns the batch and analysis queues and drives their scheduling loops.
///
/// Constructed explicitly and passed by reference to callers; there is no
/// global instance.
pub struct QueueManager {
    batch: Arc<Queue>,
    analysis: Arc<Queue>,
    shutdown_tx: watch::Sender<bool>,
}

impl QueueManager {
    /// Create the manager and its two queues. Call [`QueueManager::start`]
    /// to begin scheduling.
    pub fn new(config: QueueConfig, sink: Arc<dyn ProgressSink>) -> Self {
        let batch = Arc::new(Queue::new(
            QueueClass::Batch,
            config.batch_concurrency,
            config.tick_interval,
            Arc::clone(&sink),
        ));
        let analysis = Arc::new(Queue::new(
            QueueClass::Analysis,
            ANALYSIS_CONCURRENCY,
            config.tick_interval,
            sink,
        ));
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            batch,
            analysis,
            shutdown_tx,
        }
    }

    /// Spawn both scheduling loops against the given task runner. The
    /// loops run independently so analysis work never stalls downloads.
    pub fn start(&self, runner: Arc<dyn JobRunner>) {
        for queue in [&self.batch, &self.analysis] {
            let queue = Arc::clone(queue);
            let runner = Arc::clone(&runner);
            let shutdown_rx = self.shutdown_tx.subscribe();
            tokio::spawn(async move {
                queue.run(runner, shutdown_rx).await;
            });
        }
        info!("queue manager started");
    }

    /// Stop both scheduling loops. In-flight jobs finish their current
    /// task but nothing new is promoted.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    fn queue_for(&self, class: QueueClass) -> &Arc<Queue> {
        match class {
            QueueClass::Batch => &self.batch,
            QueueClass::Analysis => &self.analysis,
        }
    }

    /// Find the queue holding `id`, if any.
    async fn queue_of(&self, id: &JobId) -> Option<&Arc<Queue>> {
        if self.batch.get(id).await.is_some() {
            Some(&self.batch)
        } else if self.analysis.get(id).await.is_some() {
            Some(&self.analysis)
        } else {
            None
        }
    }

    /// Submit a job to the queue of its class. Returns the assigned id.
    pub async fn add_job(&self, class: QueueClass, spec: JobSpec) -> QueueResult<JobId> {
        self.queue_for(class).add(spec).await
    }

    pub async fn get_job(&self, id: &JobId) -> Option<Job> {
        match self.batch.get(id).await {
            Some(job) => Some(job),
            None => self.analysis.get(id).await,
        }
    }

    /// Jobs of one class in creation order.
    pub async fn list_jobs(&self, class: QueueClass) -> Vec<Job> {
        self.queue_for(class).list().await
    }

    /// Cooperatively cancel a job wherever it lives.
    pub async fn cancel_job(&self, id: &JobId) -> bool {
        match self.queue_of(id).await {
            Some(queue) => queue.cancel(id).await,
            None => false,
        }
    }

    /// Remove a job regardless of status.
    pub async fn delete_job(&self, id: &JobId) -> bool {
        match self.queue_of(id).await {
            Some(queue) => queue.delete(id).await,
            None => false,
        }
    }

    /// Drop completed and failed jobs of one class.
    pub async fn clear_completed(&self, class: QueueClass) -> usize {
        self.queue_for(class).clear_completed().await
    }

    pub async fn queue_status(&self, class: QueueClass) -> QueueStatus {
        self.queue_for(class).status().await
    }

    /// Resolve once the job reaches a terminal state.
    pub async fn wait_for_terminal(&self, id: &JobId) -> QueueResult<JobStatus> {
        match self.queue_of(id).await {
            Some(queue) => queue.wait_for_terminal(id).await,
            None => Err(QueueError::JobNotFound(id.clone())),
        }
    }

    /// Build a fresh pending job from a failed one, carrying its context
    /// forward. This is the only retry mechanism; nothing retries
    /// automatically.
    pub async fn requeue(&self, id: &JobId) -> QueueResult<JobId> {
        let Some(queue) = self.queue_of(id).await else {
            return Err(QueueError::JobNotFound(id.clone()));
        };
        let Some(old) = queue.get(id).await else {
            return Err(QueueError::JobNotFound(id.clone()));
        };
        if old.status != JobStatus::Failed {
            return Err(QueueError::NotRequeueable(id.clone()));
        }

        let spec = JobSpec {
            url: old.url.clone(),
            video_id: old.context.video_id.clone(),
            video_path: old.context.video_path.clone(),
            display_name: old.display_name.clone(),
            tasks: old.tasks.clone(),
        };
        let mut fresh = Job::new(old.class, spec)?;
        fresh.context = old.context.clone();
        info!(old_job = %id, new_job = %fresh.id, "requeued failed job");
        Ok(queue.insert(fresh).await)
    }
}
