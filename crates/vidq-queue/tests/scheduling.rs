//! Scheduler behavior tests against a scripted in-memory runner.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use vidq_models::{JobId, JobSpec, JobStatus, QueueClass, TaskKind};
use vidq_queue::{
    BroadcastSink, JobRunner, ProgressSink, QueueConfig, QueueManager, TaskFailure, TaskProgress,
    TaskResult, TracingSink,
};

/// Per-url behavior for the scripted runner.
#[derive(Clone, Default)]
struct Script {
    /// Fail the task at this index with this message.
    fail_at: Option<(usize, String)>,
    /// Block every task until this flips to true.
    gate: Option<watch::Receiver<bool>>,
    /// Sub-task progress to report before finishing.
    report: Option<f64>,
    delay: Option<Duration>,
}

/// Runner whose behavior is scripted per job url. Records every
/// invocation so tests can assert which tasks ran, and tracks the maximum
/// number of concurrently running tasks.
#[derive(Default)]
struct ScriptedRunner {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<Vec<(String, usize)>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedRunner {
    fn script(&self, url: &str, script: Script) {
        self.scripts.lock().unwrap().insert(url.to_string(), script);
    }

    fn calls_for(&self, url: &str) -> Vec<usize> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| u == url)
            .map(|(_, idx)| *idx)
            .collect()
    }

    fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobRunner for ScriptedRunner {
    async fn run_task(
        &self,
        job: vidq_models::Job,
        _task: TaskKind,
        mut cancel: watch::Receiver<bool>,
        progress: TaskProgress,
    ) -> TaskResult {
        let url = job.url.clone().unwrap_or_default();
        let idx = job.current_task;
        self.calls.lock().unwrap().push((url.clone(), idx));

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&url)
            .cloned()
            .unwrap_or_default();

        let result = async {
            if let Some(fraction) = script.report {
                progress.update(fraction);
            }
            if let Some(delay) = script.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(mut gate) = script.gate {
                while !*gate.borrow_and_update() {
                    tokio::select! {
                        changed = gate.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        _ = cancel.changed() => {
                            return Err(TaskFailure::new("cancelled mid-task"));
                        }
                    }
                }
            }
            if let Some((fail_idx, message)) = &script.fail_at {
                if *fail_idx == idx {
                    return Err(TaskFailure::new(message.clone()));
                }
            }
            Ok(job.context)
        }
        .await;

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

fn spec(url: &str, tasks: usize) -> JobSpec {
    JobSpec::for_url(url, vec![TaskKind::GetInfo; tasks])
}

fn manager(batch_concurrency: usize) -> (QueueManager, Arc<ScriptedRunner>) {
    let config = QueueConfig {
        batch_concurrency,
        tick_interval: Duration::from_millis(20),
    };
    let manager = QueueManager::new(config, Arc::new(TracingSink));
    let runner = Arc::new(ScriptedRunner::default());
    manager.start(runner.clone());
    (manager, runner)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(80)).await;
}

#[tokio::test]
async fn concurrency_ceiling_never_exceeded() {
    let (manager, runner) = manager(2);
    let (gate_tx, gate_rx) = watch::channel(false);

    let mut ids = Vec::new();
    for i in 0..4 {
        let url = format!("https://example.com/{i}");
        runner.script(
            &url,
            Script {
                gate: Some(gate_rx.clone()),
                ..Default::default()
            },
        );
        ids.push(manager.add_job(QueueClass::Batch, spec(&url, 1)).await.unwrap());
    }

    settle().await;
    let status = manager.queue_status(QueueClass::Batch).await;
    assert_eq!(status.processing, 2);
    assert_eq!(status.pending, 2);
    assert_eq!(status.active_count, 2);
    assert_eq!(status.max_concurrency, 2);

    gate_tx.send(true).unwrap();
    for id in &ids {
        assert_eq!(
            manager.wait_for_terminal(id).await.unwrap(),
            JobStatus::Completed
        );
    }
    assert!(runner.max_active() <= 2, "ceiling exceeded");
}

#[tokio::test]
async fn pending_jobs_start_in_creation_order() {
    let (manager, runner) = manager(1);
    let urls: Vec<String> = (0..3).map(|i| format!("https://example.com/{i}")).collect();

    let mut ids = Vec::new();
    for url in &urls {
        ids.push(manager.add_job(QueueClass::Batch, spec(url, 1)).await.unwrap());
    }
    for id in &ids {
        manager.wait_for_terminal(id).await.unwrap();
    }

    let order: Vec<String> = runner.calls.lock().unwrap().iter().map(|(u, _)| u.clone()).collect();
    assert_eq!(order, urls);
}

#[tokio::test]
async fn failing_task_stops_the_pipeline() {
    let (manager, runner) = manager(2);
    let url = "https://example.com/fails";
    runner.script(
        url,
        Script {
            fail_at: Some((1, "yt-dlp exited with 1".into())),
            ..Default::default()
        },
    );

    let id = manager.add_job(QueueClass::Batch, spec(url, 3)).await.unwrap();
    assert_eq!(
        manager.wait_for_terminal(&id).await.unwrap(),
        JobStatus::Failed
    );

    let job = manager.get_job(&id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.current_task, 1, "index stays at the failing task");
    assert_eq!(job.error.as_deref(), Some("yt-dlp exited with 1"));
    assert!(job.completed_at.is_some());

    // Task 2 never executed.
    assert_eq!(runner.calls_for(url), vec![0, 1]);
}

#[tokio::test]
async fn no_head_of_line_blocking() {
    let (manager, runner) = manager(2);
    let (gate_tx, gate_rx) = watch::channel(false);

    let blocked = "https://example.com/blocked";
    runner.script(
        blocked,
        Script {
            gate: Some(gate_rx),
            ..Default::default()
        },
    );

    let slow = manager.add_job(QueueClass::Batch, spec(blocked, 1)).await.unwrap();
    let fast = manager
        .add_job(QueueClass::Batch, spec("https://example.com/fast", 1))
        .await
        .unwrap();

    // The fast job finishes while the slow one still holds its slot.
    assert_eq!(
        manager.wait_for_terminal(&fast).await.unwrap(),
        JobStatus::Completed
    );
    assert_eq!(
        manager.get_job(&slow).await.unwrap().status,
        JobStatus::Processing
    );

    gate_tx.send(true).unwrap();
    assert_eq!(
        manager.wait_for_terminal(&slow).await.unwrap(),
        JobStatus::Completed
    );
}

#[tokio::test]
async fn cancelled_pending_job_never_processes() {
    let (manager, runner) = manager(1);
    let (gate_tx, gate_rx) = watch::channel(false);

    let first = "https://example.com/first";
    runner.script(
        first,
        Script {
            gate: Some(gate_rx),
            ..Default::default()
        },
    );

    let holding = manager.add_job(QueueClass::Batch, spec(first, 1)).await.unwrap();
    let parked = manager
        .add_job(QueueClass::Batch, spec("https://example.com/parked", 1))
        .await
        .unwrap();

    settle().await;
    assert!(manager.cancel_job(&parked).await);
    assert_eq!(
        manager.wait_for_terminal(&parked).await.unwrap(),
        JobStatus::Cancelled
    );

    gate_tx.send(true).unwrap();
    manager.wait_for_terminal(&holding).await.unwrap();

    // The cancelled job never reached the runner.
    assert!(runner.calls_for("https://example.com/parked").is_empty());
}

#[tokio::test]
async fn cancelling_a_processing_job_sticks() {
    let (manager, runner) = manager(1);
    let (_gate_tx, gate_rx) = watch::channel(false);

    let url = "https://example.com/cancel-me";
    runner.script(
        url,
        Script {
            gate: Some(gate_rx),
            ..Default::default()
        },
    );

    let id = manager.add_job(QueueClass::Batch, spec(url, 2)).await.unwrap();
    settle().await;
    assert_eq!(
        manager.get_job(&id).await.unwrap().status,
        JobStatus::Processing
    );

    assert!(manager.cancel_job(&id).await);
    assert_eq!(
        manager.wait_for_terminal(&id).await.unwrap(),
        JobStatus::Cancelled
    );

    // Whatever the in-flight task reported, the cancelled state stands and
    // the remaining task never runs.
    settle().await;
    let job = manager.get_job(&id).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(runner.calls_for(url), vec![0]);

    // Cancelling a terminal job is rejected.
    assert!(!manager.cancel_job(&id).await);
}

#[tokio::test]
async fn delete_removes_job_from_listing() {
    let (manager, _runner) = manager(2);
    let keep = manager
        .add_job(QueueClass::Batch, spec("https://example.com/keep", 1))
        .await
        .unwrap();
    let gone = manager
        .add_job(QueueClass::Batch, spec("https://example.com/gone", 1))
        .await
        .unwrap();

    manager.wait_for_terminal(&keep).await.unwrap();
    manager.wait_for_terminal(&gone).await.unwrap();

    assert!(manager.delete_job(&gone).await);
    assert!(manager.get_job(&gone).await.is_none());
    let listed: Vec<JobId> = manager
        .list_jobs(QueueClass::Batch)
        .await
        .into_iter()
        .map(|j| j.id)
        .collect();
    assert_eq!(listed, vec![keep]);

    // Deleting twice is a no-op.
    assert!(!manager.delete_job(&gone).await);
}

#[tokio::test]
async fn queue_status_matches_list_partition() {
    let (manager, runner) = manager(2);
    let (gate_tx, gate_rx) = watch::channel(false);

    runner.script(
        "https://example.com/bad",
        Script {
            fail_at: Some((0, "boom".into())),
            ..Default::default()
        },
    );
    for url in ["https://example.com/held-1", "https://example.com/held-2"] {
        runner.script(
            url,
            Script {
                gate: Some(gate_rx.clone()),
                ..Default::default()
            },
        );
    }

    let ok = manager
        .add_job(QueueClass::Batch, spec("https://example.com/ok", 1))
        .await
        .unwrap();
    let bad = manager
        .add_job(QueueClass::Batch, spec("https://example.com/bad", 1))
        .await
        .unwrap();
    manager.wait_for_terminal(&ok).await.unwrap();
    manager.wait_for_terminal(&bad).await.unwrap();

    for url in [
        "https://example.com/held-1",
        "https://example.com/held-2",
        "https://example.com/parked",
    ] {
        manager.add_job(QueueClass::Batch, spec(url, 1)).await.unwrap();
    }
    settle().await;

    let status = manager.queue_status(QueueClass::Batch).await;
    let jobs = manager.list_jobs(QueueClass::Batch).await;
    let count = |s: JobStatus| jobs.iter().filter(|j| j.status == s).count();

    assert_eq!(status.pending, count(JobStatus::Pending));
    assert_eq!(status.processing, count(JobStatus::Processing));
    assert_eq!(status.completed, count(JobStatus::Completed));
    assert_eq!(status.failed, count(JobStatus::Failed));
    assert_eq!(status.cancelled, count(JobStatus::Cancelled));
    assert_eq!(status.active_count, status.processing);

    gate_tx.send(true).unwrap();
}

#[tokio::test]
async fn clear_completed_drops_terminal_batch_jobs() {
    let (manager, runner) = manager(2);
    runner.script(
        "https://example.com/bad",
        Script {
            fail_at: Some((0, "boom".into())),
            ..Default::default()
        },
    );

    let ok = manager
        .add_job(QueueClass::Batch, spec("https://example.com/ok", 1))
        .await
        .unwrap();
    let bad = manager
        .add_job(QueueClass::Batch, spec("https://example.com/bad", 1))
        .await
        .unwrap();
    manager.wait_for_terminal(&ok).await.unwrap();
    manager.wait_for_terminal(&bad).await.unwrap();

    assert_eq!(manager.clear_completed(QueueClass::Batch).await, 2);
    assert!(manager.list_jobs(QueueClass::Batch).await.is_empty());
}

#[tokio::test]
async fn analysis_queue_runs_one_at_a_time() {
    let (manager, runner) = manager(8);

    let mut ids = Vec::new();
    for i in 0..3 {
        let url = format!("https://example.com/a{i}");
        runner.script(
            &url,
            Script {
                delay: Some(Duration::from_millis(30)),
                ..Default::default()
            },
        );
        ids.push(
            manager
                .add_job(QueueClass::Analysis, spec(&url, 1))
                .await
                .unwrap(),
        );
    }
    for id in &ids {
        assert_eq!(
            manager.wait_for_terminal(id).await.unwrap(),
            JobStatus::Completed
        );
    }

    assert_eq!(runner.max_active(), 1, "analysis jobs overlapped");
    let status = manager.queue_status(QueueClass::Analysis).await;
    assert_eq!(status.max_concurrency, 1);
    assert_eq!(status.completed, 3);
}

#[tokio::test]
async fn sub_task_progress_refines_within_slice() {
    let (manager, runner) = manager(1);
    let (gate_tx, gate_rx) = watch::channel(false);

    let url = "https://example.com/slow-download";
    runner.script(
        url,
        Script {
            gate: Some(gate_rx),
            report: Some(0.5),
            ..Default::default()
        },
    );

    // Two tasks: a half-done first task shows as 25% overall.
    let id = manager.add_job(QueueClass::Batch, spec(url, 2)).await.unwrap();
    settle().await;
    let job = manager.get_job(&id).await.unwrap();
    assert_eq!(job.status, JobStatus::Processing);
    assert_eq!(job.progress, 25);
    assert_eq!(job.current_task, 0, "refinement never advances the index");

    gate_tx.send(true).unwrap();
    manager.wait_for_terminal(&id).await.unwrap();
    assert_eq!(manager.get_job(&id).await.unwrap().progress, 100);
}

#[tokio::test]
async fn requeue_builds_a_fresh_pending_job() {
    let (manager, runner) = manager(2);
    let url = "https://example.com/flaky";
    runner.script(
        url,
        Script {
            fail_at: Some((0, "transient".into())),
            ..Default::default()
        },
    );

    let id = manager.add_job(QueueClass::Batch, spec(url, 1)).await.unwrap();
    assert_eq!(
        manager.wait_for_terminal(&id).await.unwrap(),
        JobStatus::Failed
    );

    // Only failed jobs can be requeued.
    let ok = manager
        .add_job(QueueClass::Batch, spec("https://example.com/fine", 1))
        .await
        .unwrap();
    manager.wait_for_terminal(&ok).await.unwrap();
    assert!(manager.requeue(&ok).await.is_err());

    // Clear the failure script, then requeue.
    runner.script(url, Script::default());
    let retry = manager.requeue(&id).await.unwrap();
    assert_ne!(retry, id);
    assert_eq!(
        manager.wait_for_terminal(&retry).await.unwrap(),
        JobStatus::Completed
    );
    // The original job is untouched.
    assert_eq!(
        manager.get_job(&id).await.unwrap().status,
        JobStatus::Failed
    );
}

#[tokio::test]
async fn progress_events_reach_the_sink() {
    let sink = Arc::new(BroadcastSink::new(64));
    let mut events = sink.subscribe();

    let config = QueueConfig {
        batch_concurrency: 2,
        tick_interval: Duration::from_millis(20),
    };
    let manager = QueueManager::new(config, sink as Arc<dyn ProgressSink>);
    let runner = Arc::new(ScriptedRunner::default());
    manager.start(runner);

    let id = manager
        .add_job(QueueClass::Batch, spec("https://example.com/v", 2))
        .await
        .unwrap();
    manager.wait_for_terminal(&id).await.unwrap();

    let mut saw_processing = false;
    let mut saw_completed = false;
    while let Ok(Ok(event)) =
        tokio::time::timeout(Duration::from_millis(200), events.recv()).await
    {
        assert_eq!(event.job_id, id);
        match event.status {
            JobStatus::Processing => saw_processing = true,
            JobStatus::Completed => {
                assert_eq!(event.progress, 100);
                saw_completed = true;
            }
            _ => {}
        }
        if saw_completed {
            break;
        }
    }
    assert!(saw_processing);
    assert!(saw_completed);
}
