//! A single queue instance: ordered job table, concurrency ceiling,
//! scheduling loop and per-job drivers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, info, warn};

use vidq_models::{Job, JobId, JobSpec, JobStatus, QueueClass};

use crate::error::{QueueError, QueueResult};
use crate::manager::QueueStatus;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::runner::{JobRunner, TaskFailure, TaskProgress, TaskResult, TaskTick};

struct JobEntry {
    job: Job,
    /// Flips to true on cancel/delete; collaborators observe it.
    cancel_tx: watch::Sender<bool>,
    /// One-shot terminal notification for `wait_for_terminal`.
    status_tx: watch::Sender<JobStatus>,
}

#[derive(Default)]
struct QueueState {
    jobs: HashMap<JobId, JobEntry>,
    /// Creation order; scheduling offers free slots oldest-first.
    order: Vec<JobId>,
}

fn event_for(job: &Job, message: impl Into<String>) -> ProgressEvent {
    ProgressEvent {
        job_id: job.id.clone(),
        task: job.current_task_kind().map(|t| t.label().to_string()),
        status: job.status,
        progress: job.progress,
        message: message.into(),
    }
}

/// One workload class worth of jobs plus the loop that schedules them.
pub struct Queue {
    class: QueueClass,
    max_concurrency: usize,
    tick_interval: Duration,
    state: Mutex<QueueState>,
    wake: Notify,
    sink: Arc<dyn ProgressSink>,
}

impl Queue {
    pub fn new(
        class: QueueClass,
        max_concurrency: usize,
        tick_interval: Duration,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            class,
            max_concurrency,
            tick_interval,
            state: Mutex::new(QueueState::default()),
            wake: Notify::new(),
            sink,
        }
    }

    pub fn class(&self) -> QueueClass {
        self.class
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Publish an event without ever blocking the caller on the sink.
    fn emit(&self, event: ProgressEvent) {
        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            sink.emit(event).await;
        });
    }

    /// Enqueue a new pending job built from `spec`.
    pub async fn add(&self, spec: JobSpec) -> QueueResult<JobId> {
        let job = Job::new(self.class, spec)?;
        Ok(self.insert(job).await)
    }

    /// Enqueue an already-built pending job (used by requeue).
    pub(crate) async fn insert(&self, job: Job) -> JobId {
        let id = job.id.clone();
        self.emit(event_for(&job, "queued"));

        let (cancel_tx, _) = watch::channel(false);
        let (status_tx, _) = watch::channel(job.status);
        {
            let mut state = self.state.lock().await;
            state.order.push(id.clone());
            state.jobs.insert(
                id.clone(),
                JobEntry {
                    job,
                    cancel_tx,
                    status_tx,
                },
            );
        }

        info!(job_id = %id, class = %self.class, "job enqueued");
        self.wake.notify_one();
        id
    }

    pub async fn get(&self, id: &JobId) -> Option<Job> {
        self.state.lock().await.jobs.get(id).map(|e| e.job.clone())
    }

    /// All jobs in creation order.
    pub async fn list(&self) -> Vec<Job> {
        let state = self.state.lock().await;
        state
            .order
            .iter()
            .filter_map(|id| state.jobs.get(id).map(|e| e.job.clone()))
            .collect()
    }

    /// Cancel a pending or processing job. Cooperative: the cancel flag is
    /// handed to collaborators but an in-flight external process is only
    /// killed best-effort. Returns false for unknown or already-terminal
    /// jobs.
    pub async fn cancel(&self, id: &JobId) -> bool {
        let mut state = self.state.lock().await;
        let Some(entry) = state.jobs.get_mut(id) else {
            return false;
        };
        if entry.job.cancel().is_err() {
            return false;
        }
        let _ = entry.cancel_tx.send(true);
        let _ = entry.status_tx.send(entry.job.status);
        info!(job_id = %id, class = %self.class, "job cancelled");
        self.emit(event_for(&entry.job, "cancelled"));
        drop(state);

        self.wake.notify_one();
        true
    }

    /// Remove a job regardless of status. An in-flight driver notices the
    /// missing entry at its next step and stops.
    pub async fn delete(&self, id: &JobId) -> bool {
        let mut state = self.state.lock().await;
        let Some(entry) = state.jobs.remove(id) else {
            return false;
        };
        state.order.retain(|j| j != id);
        let _ = entry.cancel_tx.send(true);
        drop(state);

        info!(job_id = %id, class = %self.class, "job deleted");
        self.wake.notify_one();
        true
    }

    /// Drop completed and failed jobs, returning how many were removed.
    pub async fn clear_completed(&self) -> usize {
        let mut state = self.state.lock().await;
        let before = state.jobs.len();
        state.jobs.retain(|_, e| {
            !matches!(e.job.status, JobStatus::Completed | JobStatus::Failed)
        });
        let removed = before - state.jobs.len();
        let remaining: Vec<JobId> = state
            .order
            .iter()
            .filter(|id| state.jobs.contains_key(*id))
            .cloned()
            .collect();
        state.order = remaining;
        removed
    }

    pub async fn status(&self) -> QueueStatus {
        let state = self.state.lock().await;
        let mut status = QueueStatus {
            max_concurrency: self.max_concurrency,
            ..Default::default()
        };
        for entry in state.jobs.values() {
            match entry.job.status {
                JobStatus::Pending => status.pending += 1,
                JobStatus::Processing => status.processing += 1,
                JobStatus::Completed => status.completed += 1,
                JobStatus::Failed => status.failed += 1,
                JobStatus::Cancelled => status.cancelled += 1,
            }
        }
        status.active_count = status.processing;
        status
    }

    /// Resolve once the job reaches a terminal state. Errors if the job is
    /// unknown or gets deleted while waiting.
    pub async fn wait_for_terminal(&self, id: &JobId) -> QueueResult<JobStatus> {
        let mut rx = {
            let state = self.state.lock().await;
            let entry = state
                .jobs
                .get(id)
                .ok_or_else(|| QueueError::JobNotFound(id.clone()))?;
            entry.status_tx.subscribe()
        };

        loop {
            let current = *rx.borrow_and_update();
            if current.is_terminal() {
                return Ok(current);
            }
            if rx.changed().await.is_err() {
                return Err(QueueError::JobNotFound(id.clone()));
            }
        }
    }

    /// Scheduling loop. Runs until `shutdown` flips to true; woken by job
    /// submission, job completion and a fallback tick.
    pub async fn run(
        self: Arc<Self>,
        runner: Arc<dyn JobRunner>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            class = %self.class,
            max_concurrency = self.max_concurrency,
            "queue scheduler started"
        );

        loop {
            self.schedule(&runner).await;

            tokio::select! {
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.tick_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(class = %self.class, "queue scheduler stopped");
    }

    /// One scheduling pass: promote pending jobs oldest-first while the
    /// concurrency budget allows, spawning a driver per promotion.
    async fn schedule(self: &Arc<Self>, runner: &Arc<dyn JobRunner>) {
        let started = {
            let mut state = self.state.lock().await;
            let processing = state
                .jobs
                .values()
                .filter(|e| e.job.status == JobStatus::Processing)
                .count();
            let free = self.max_concurrency.saturating_sub(processing);
            if free == 0 {
                return;
            }

            let candidates: Vec<JobId> = state
                .order
                .iter()
                .filter(|id| {
                    state
                        .jobs
                        .get(*id)
                        .is_some_and(|e| e.job.status == JobStatus::Pending)
                })
                .take(free)
                .cloned()
                .collect();

            let mut started = Vec::with_capacity(candidates.len());
            for id in candidates {
                let Some(entry) = state.jobs.get_mut(&id) else {
                    continue;
                };
                match entry.job.start() {
                    Ok(()) => {
                        let _ = entry.status_tx.send(entry.job.status);
                        self.emit(event_for(&entry.job, "started"));
                        started.push(id);
                    }
                    Err(e) => {
                        warn!(job_id = %id, error = %e, "refusing to start job");
                    }
                }
            }
            started
        };

        for id in started {
            debug!(job_id = %id, class = %self.class, "starting job");
            let queue = Arc::clone(self);
            let runner = Arc::clone(runner);
            tokio::spawn(async move {
                queue.drive_job(runner, id).await;
            });
        }
    }

    /// Execute one job's tasks strictly in order until a terminal state.
    async fn drive_job(self: Arc<Self>, runner: Arc<dyn JobRunner>, job_id: JobId) {
        loop {
            let (job, task, cancel_rx) = {
                let state = self.state.lock().await;
                let Some(entry) = state.jobs.get(&job_id) else {
                    break; // deleted mid-flight
                };
                if entry.job.status != JobStatus::Processing {
                    break; // cancelled externally
                }
                let Some(task) = entry.job.current_task_kind().cloned() else {
                    break;
                };
                (entry.job.clone(), task, entry.cancel_tx.subscribe())
            };

            let label = task.label();
            let (progress, mut ticks) = TaskProgress::channel();
            let forwarder = {
                let queue = Arc::clone(&self);
                let id = job_id.clone();
                tokio::spawn(async move {
                    while let Some(tick) = ticks.recv().await {
                        queue.refine(&id, label, tick).await;
                    }
                })
            };

            // The task runs in its own tokio task so a panicking
            // collaborator degrades to a failed job instead of taking the
            // scheduler down with it.
            let handle = {
                let runner = Arc::clone(&runner);
                let job = job.clone();
                let task = task.clone();
                tokio::spawn(async move { runner.run_task(job, task, cancel_rx, progress).await })
            };
            let outcome = match handle.await {
                Ok(result) => result,
                Err(join_err) => Err(TaskFailure::new(format!(
                    "task '{label}' crashed: {join_err}"
                ))),
            };
            let _ = forwarder.await; // channel closes with the task

            if self.apply_outcome(&job_id, outcome).await {
                break;
            }
        }

        // Either a slot was freed or the job is gone; re-evaluate.
        self.wake.notify_one();
    }

    /// Record a task's outcome. Returns true when the job is finished.
    async fn apply_outcome(&self, job_id: &JobId, outcome: TaskResult) -> bool {
        let mut state = self.state.lock().await;
        let Some(entry) = state.jobs.get_mut(job_id) else {
            return true;
        };
        if entry.job.status != JobStatus::Processing {
            // Cancelled while the task was in flight; the cancelled state
            // stands, whatever the task reported.
            return true;
        }

        match outcome {
            Ok(ctx) => {
                entry.job.context = ctx;
                entry.job.refresh_display_name();
                if entry.job.on_last_task() {
                    if let Err(e) = entry.job.complete() {
                        warn!(job_id = %job_id, error = %e, "completion rejected");
                    }
                    let _ = entry.status_tx.send(entry.job.status);
                    info!(job_id = %job_id, class = %self.class, "job completed");
                    self.emit(event_for(&entry.job, "completed"));
                    true
                } else {
                    entry.job.advance_task();
                    let phase = entry.job.current_phase.clone();
                    debug!(job_id = %job_id, phase = %phase, "task finished");
                    self.emit(event_for(&entry.job, phase));
                    false
                }
            }
            Err(failure) => {
                warn!(
                    job_id = %job_id,
                    class = %self.class,
                    error = %failure,
                    "job failed"
                );
                let message = failure.message.clone();
                if let Err(e) = entry.job.fail(failure.message) {
                    warn!(job_id = %job_id, error = %e, "failure rejected");
                }
                let _ = entry.status_tx.send(entry.job.status);
                self.emit(event_for(&entry.job, message));
                true
            }
        }
    }

    /// Apply a sub-task progress report within the current task's slice.
    async fn refine(&self, job_id: &JobId, label: &'static str, tick: TaskTick) {
        let mut state = self.state.lock().await;
        let Some(entry) = state.jobs.get_mut(job_id) else {
            return;
        };
        if entry.job.status != JobStatus::Processing {
            return;
        }
        entry.job.refine_progress(tick.fraction);
        let message = tick
            .message
            .unwrap_or_else(|| entry.job.current_phase.clone());
        self.emit(ProgressEvent {
            job_id: job_id.clone(),
            task: Some(label.to_string()),
            status: entry.job.status,
            progress: entry.job.progress,
            message,
        });
    }
}
