//! Work queue seam between the trigger/coordinator and step workers.
//!
//! The engine only needs `enqueue(name, payload, options)` on the producer
//! side and "call the handler for each delivered job" on the consumer side.
//! Delivery is at-least-once; the coordinator's guard absorbs duplicates.
//!
//! `InProcessQueue` + `WorkerPool` implement both sides over a tokio channel
//! and a semaphore-limited set of worker tasks.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

use crate::error::ServerError;

/// Job name used for every step execution.
pub const STEP_JOB: &str = "workflow-step";

/// Payload of a step job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepJob {
    pub instance_id: String,
    pub step_index: usize,
}

impl StepJob {
    pub fn new(instance_id: impl Into<String>, step_index: usize) -> Self {
        Self {
            instance_id: instance_id.into(),
            step_index,
        }
    }

    /// Deterministic job key: one job per (run, step).
    pub fn job_id(&self) -> String {
        format!("{}:{}", self.instance_id, self.step_index)
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    /// Queue-level dedupe key. A job whose id is already queued or running is dropped.
    pub job_id: Option<String>,
}

impl JobOptions {
    pub fn for_job(job: &StepJob) -> Self {
        Self {
            job_id: Some(job.job_id()),
        }
    }
}

/// Producer side of the queue.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn enqueue(&self, name: &str, job: StepJob, options: JobOptions) -> Result<(), ServerError>;
}

/// Consumer side: invoked once per delivered job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: StepJob) -> Result<(), ServerError>;
}

#[derive(Debug)]
pub struct QueuedJob {
    pub name: String,
    pub job: StepJob,
    pub job_id: Option<String>,
}

type PendingIds = Arc<Mutex<HashSet<String>>>;

/// In-process queue. Create with [`InProcessQueue::new`] and hand the
/// returned [`JobReceiver`] to a [`WorkerPool`].
///
/// The channel is unbounded so `enqueue` never waits on a consumer; a worker
/// scheduling the next step while holding its permit must not block. The
/// job-id set bounds the backlog to one job per (run, step).
#[derive(Clone)]
pub struct InProcessQueue {
    tx: mpsc::UnboundedSender<QueuedJob>,
    pending: PendingIds,
}

pub struct JobReceiver {
    rx: mpsc::UnboundedReceiver<QueuedJob>,
    pending: PendingIds,
}

impl InProcessQueue {
    pub fn new() -> (Self, JobReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending: PendingIds = Arc::new(Mutex::new(HashSet::new()));
        (
            Self {
                tx,
                pending: pending.clone(),
            },
            JobReceiver { rx, pending },
        )
    }
}

#[async_trait]
impl WorkQueue for InProcessQueue {
    async fn enqueue(&self, name: &str, job: StepJob, options: JobOptions) -> Result<(), ServerError> {
        if name != STEP_JOB {
            return Err(ServerError::BadRequest(format!("Unknown job name: {}", name)));
        }

        if let Some(ref job_id) = options.job_id {
            let mut pending = self
                .pending
                .lock()
                .map_err(|e| ServerError::Internal(format!("Lock poisoned: {}", e)))?;
            if !pending.insert(job_id.clone()) {
                tracing::debug!("Job {} already queued, skipping duplicate", job_id);
                return Ok(());
            }
        }

        let queued = QueuedJob {
            name: name.to_string(),
            job,
            job_id: options.job_id.clone(),
        };
        if self.tx.send(queued).is_err() {
            release(&self.pending, options.job_id.as_deref());
            return Err(ServerError::Internal("Work queue is closed".into()));
        }
        Ok(())
    }
}

fn release(pending: &PendingIds, job_id: Option<&str>) {
    if let Some(job_id) = job_id {
        if let Ok(mut pending) = pending.lock() {
            pending.remove(job_id);
        }
    }
}

/// Frees a job id when the job is done with, including when its handler panics.
struct PendingGuard {
    pending: PendingIds,
    job_id: Option<String>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        release(&self.pending, self.job_id.as_deref());
    }
}

/// Drains a [`JobReceiver`] and runs jobs concurrently, at most
/// `concurrency` at a time.
pub struct WorkerPool;

impl WorkerPool {
    pub fn spawn(
        mut receiver: JobReceiver,
        handler: Arc<dyn JobHandler>,
        concurrency: usize,
    ) -> JoinHandle<()> {
        let permits = Arc::new(Semaphore::new(concurrency.max(1)));
        tokio::spawn(async move {
            while let Some(queued) = receiver.rx.recv().await {
                let guard = PendingGuard {
                    pending: receiver.pending.clone(),
                    job_id: queued.job_id.clone(),
                };
                let permit = match permits.clone().acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => break,
                };
                let handler = handler.clone();
                tokio::spawn(async move {
                    let _guard = guard;
                    let _permit = permit;
                    let QueuedJob { name, job, job_id } = queued;
                    if let Err(e) = handler.handle(job.clone()).await {
                        tracing::error!(
                            "Job {} ({}) for instance {} step {} failed: {}",
                            job_id.as_deref().unwrap_or("-"),
                            name,
                            job.instance_id,
                            job.step_index,
                            e
                        );
                    }
                });
            }
            tracing::info!("Work queue closed, worker pool stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_duplicate_job_id_is_dropped_while_queued() {
        let (queue, mut receiver) = InProcessQueue::new();
        let job = StepJob::new("i-1", 0);

        queue
            .enqueue(STEP_JOB, job.clone(), JobOptions::for_job(&job))
            .await
            .unwrap();
        queue
            .enqueue(STEP_JOB, job.clone(), JobOptions::for_job(&job))
            .await
            .unwrap();

        let first = receiver.rx.try_recv().unwrap();
        assert_eq!(first.job, job);
        assert_eq!(first.job_id.as_deref(), Some("i-1:0"));
        assert!(receiver.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_job_name_is_rejected() {
        let (queue, _receiver) = InProcessQueue::new();
        let err = queue
            .enqueue("something-else", StepJob::new("i-1", 0), JobOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::BadRequest(_)));
    }

    struct Forward(mpsc::UnboundedSender<StepJob>);

    #[async_trait]
    impl JobHandler for Forward {
        async fn handle(&self, job: StepJob) -> Result<(), ServerError> {
            self.0.send(job).ok();
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_worker_pool_delivers_and_releases_job_ids() {
        let (queue, receiver) = InProcessQueue::new();
        let (tx, mut seen) = mpsc::unbounded_channel();
        WorkerPool::spawn(receiver, Arc::new(Forward(tx)), 2);

        let job = StepJob::new("i-2", 3);
        queue
            .enqueue(STEP_JOB, job.clone(), JobOptions::for_job(&job))
            .await
            .unwrap();
        let delivered = tokio::time::timeout(Duration::from_secs(2), seen.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivered, job);

        // Once handled, the same id may be delivered again (redelivery).
        tokio::time::sleep(Duration::from_millis(50)).await;
        queue
            .enqueue(STEP_JOB, job.clone(), JobOptions::for_job(&job))
            .await
            .unwrap();
        let again = tokio::time::timeout(Duration::from_secs(2), seen.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again, job);
    }

    #[tokio::test]
    async fn test_enqueue_does_not_wait_for_consumer() {
        let (queue, mut receiver) = InProcessQueue::new();
        for step in 0..64 {
            let job = StepJob::new("i-3", step);
            tokio::time::timeout(
                Duration::from_millis(200),
                queue.enqueue(STEP_JOB, job.clone(), JobOptions::for_job(&job)),
            )
            .await
            .unwrap()
            .unwrap();
        }
        let mut drained = 0;
        while receiver.rx.try_recv().is_ok() {
            drained += 1;
        }
        assert_eq!(drained, 64);
    }

    /// Panics on its first job, forwards every later one.
    struct PanicOnce {
        calls: std::sync::atomic::AtomicUsize,
        seen: mpsc::UnboundedSender<StepJob>,
    }

    #[async_trait]
    impl JobHandler for PanicOnce {
        async fn handle(&self, job: StepJob) -> Result<(), ServerError> {
            if self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                panic!("handler blew up");
            }
            self.seen.send(job).ok();
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_panicking_handler_releases_job_id() {
        let (queue, receiver) = InProcessQueue::new();
        let (tx, mut seen) = mpsc::unbounded_channel();
        let handler = Arc::new(PanicOnce {
            calls: std::sync::atomic::AtomicUsize::new(0),
            seen: tx,
        });
        WorkerPool::spawn(receiver, handler.clone(), 1);

        let job = StepJob::new("i-4", 0);
        queue
            .enqueue(STEP_JOB, job.clone(), JobOptions::for_job(&job))
            .await
            .unwrap();
        for _ in 0..100 {
            if handler.calls.load(std::sync::atomic::Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The id was freed by the unwinding task, so redelivery is not deduped away.
        queue
            .enqueue(STEP_JOB, job.clone(), JobOptions::for_job(&job))
            .await
            .unwrap();
        let delivered = tokio::time::timeout(Duration::from_secs(2), seen.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivered, job);
    }
}
