//! Background worker pool — keeps expensive or blocking work off the
//! scheduler's driver task.
//!
//! Jobs flow through one bounded channel consumed by a fixed pool of
//! workers. Two enqueue policies are exposed and both are deliberate:
//! [`BackgroundTaskQueue::enqueue`] blocks the producer when the queue is
//! full (preferred for scheduler-originated work, which must not be
//! silently dropped) and [`BackgroundTaskQueue::try_enqueue`] rejects
//! immediately with [`EdgewatchError::QueueFull`] (preferred for
//! externally-triggered work).

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;

use edgewatch_core::{EdgewatchError, Result};

type JobFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// A unit of work submitted to the pool. Immutable once enqueued; owned by
/// the queue until a worker claims it, then by that worker until it
/// completes.
struct Job {
    label: String,
    run: JobFn,
    enqueued_at: DateTime<Utc>,
    result_tx: oneshot::Sender<Result<()>>,
}

impl Job {
    fn new<F, Fut>(label: &str, f: F) -> (Self, JobHandle)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        let job = Self {
            label: label.to_string(),
            run: Box::new(move || -> BoxFuture<'static, Result<()>> { Box::pin(f()) }),
            enqueued_at: Utc::now(),
            result_tx,
        };
        let handle = JobHandle {
            label: label.to_string(),
            result_rx,
        };
        (job, handle)
    }
}

/// Caller-side handle to an enqueued job. Await [`JobHandle::wait`] for the
/// outcome, or drop the handle for fire-and-forget submission.
pub struct JobHandle {
    label: String,
    result_rx: oneshot::Receiver<Result<()>>,
}

impl JobHandle {
    /// The label the job was enqueued under.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Wait for the job to finish and return its outcome. Resolves to
    /// [`EdgewatchError::JobCancelled`] if the queue discarded the job
    /// before any worker claimed it.
    pub async fn wait(self) -> Result<()> {
        match self.result_rx.await {
            Ok(result) => result,
            Err(_) => Err(EdgewatchError::JobCancelled),
        }
    }
}

#[derive(Default)]
struct Counters {
    processed: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
    cancelled: AtomicU64,
}

/// Point-in-time statistics for the pool.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub workers: usize,
    pub queued: usize,
    pub processed: u64,
    pub failed: u64,
    pub panicked: u64,
    pub cancelled: u64,
}

/// Fixed-size pool of workers consuming one bounded job channel.
pub struct BackgroundTaskQueue {
    tx: mpsc::Sender<Job>,
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    workers: usize,
    capacity: usize,
    handles: Mutex<Vec<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
    stopped: AtomicBool,
    counters: Arc<Counters>,
}

impl BackgroundTaskQueue {
    /// Create a pool with `workers` workers and a bounded queue of
    /// `capacity` jobs. Both are clamped to at least 1.
    pub fn new(workers: usize, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let (shutdown, _) = watch::channel(false);
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            workers: workers.max(1),
            capacity,
            handles: Mutex::new(Vec::new()),
            shutdown,
            stopped: AtomicBool::new(false),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Spawn the workers. Idempotent.
    pub async fn start(&self) {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            return;
        }
        tracing::info!("🧵 Background queue started ({} workers)", self.workers);
        for id in 0..self.workers {
            let rx = Arc::clone(&self.rx);
            let counters = Arc::clone(&self.counters);
            let shutdown = self.shutdown.subscribe();
            handles.push(tokio::spawn(Self::worker_loop(id, rx, shutdown, counters)));
        }
    }

    /// Submit a job, waiting for queue capacity if necessary.
    pub async fn enqueue<F, Fut>(&self, label: &str, f: F) -> Result<JobHandle>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(EdgewatchError::QueueClosed);
        }
        let (job, handle) = Job::new(label, f);
        self.tx
            .send(job)
            .await
            .map_err(|_| EdgewatchError::QueueClosed)?;
        Ok(handle)
    }

    /// Submit a job, failing fast with [`EdgewatchError::QueueFull`] when
    /// the queue is at capacity.
    pub fn try_enqueue<F, Fut>(&self, label: &str, f: F) -> Result<JobHandle>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(EdgewatchError::QueueClosed);
        }
        let (job, handle) = Job::new(label, f);
        match self.tx.try_send(job) {
            Ok(()) => Ok(handle),
            Err(mpsc::error::TrySendError::Full(_)) => Err(EdgewatchError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(EdgewatchError::QueueClosed),
        }
    }

    /// Stop the pool: no new dequeues, in-flight jobs run to completion,
    /// jobs still unclaimed in the queue are reported as cancelled.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown.send(true);
        let handles = {
            let mut handles = self.handles.lock().await;
            std::mem::take(&mut *handles)
        };
        for handle in handles {
            let _ = handle.await;
        }
        // Workers are gone; whatever is left in the channel never ran.
        let mut rx = self.rx.lock().await;
        while let Ok(job) = rx.try_recv() {
            tracing::warn!("🧵 Job '{}' cancelled at shutdown", job.label);
            self.counters.cancelled.fetch_add(1, Ordering::SeqCst);
            let _ = job.result_tx.send(Err(EdgewatchError::JobCancelled));
        }
        tracing::info!("🧵 Background queue stopped");
    }

    /// Current pool statistics.
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            workers: self.workers,
            queued: self.capacity - self.tx.capacity(),
            processed: self.counters.processed.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
            panicked: self.counters.panicked.load(Ordering::SeqCst),
            cancelled: self.counters.cancelled.load(Ordering::SeqCst),
        }
    }

    async fn worker_loop(
        id: usize,
        rx: Arc<Mutex<mpsc::Receiver<Job>>>,
        mut shutdown: watch::Receiver<bool>,
        counters: Arc<Counters>,
    ) {
        loop {
            let job = {
                let mut rx = rx.lock().await;
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => None,
                    job = rx.recv() => job,
                }
            };
            let Some(job) = job else { break };
            let wait = Utc::now()
                .signed_duration_since(job.enqueued_at)
                .num_milliseconds();
            tracing::debug!("🧵 Worker {id} running '{}' (waited {wait}ms)", job.label);

            // A panicking job is converted into a failure at the worker
            // boundary; the worker keeps serving, so the pool's effective
            // size is preserved.
            let outcome = match AssertUnwindSafe((job.run)()).catch_unwind().await {
                Ok(Ok(())) => {
                    counters.processed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
                Ok(Err(e)) => {
                    counters.failed.fetch_add(1, Ordering::SeqCst);
                    tracing::warn!("⚠️ Job '{}' failed: {e}", job.label);
                    Err(e)
                }
                Err(panic) => {
                    counters.panicked.fetch_add(1, Ordering::SeqCst);
                    let msg = panic_message(panic);
                    tracing::error!("⚠️ Job '{}' panicked: {msg}", job.label);
                    Err(EdgewatchError::JobPanicked(msg))
                }
            };
            let _ = job.result_tx.send(outcome);
        }
        tracing::debug!("🧵 Worker {id} exited");
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn all_jobs_complete_exactly_once() {
        let queue = BackgroundTaskQueue::new(3, 32);
        queue.start().await;

        let count = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();
        for i in 0..16 {
            let count = Arc::clone(&count);
            let handle = queue
                .enqueue(&format!("job-{i}"), move || async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
                .unwrap();
            handles.push(handle);
        }
        for handle in handles {
            handle.wait().await.unwrap();
        }
        assert_eq!(count.load(Ordering::SeqCst), 16);
        assert_eq!(queue.stats().processed, 16);
        queue.stop().await;
    }

    #[tokio::test]
    async fn failing_job_does_not_kill_worker() {
        let queue = BackgroundTaskQueue::new(1, 8);
        queue.start().await;

        let bad = queue
            .enqueue("bad", || async {
                Err(EdgewatchError::Task("boom".into()))
            })
            .await
            .unwrap();
        let good = queue.enqueue("good", || async { Ok(()) }).await.unwrap();

        assert!(bad.wait().await.is_err());
        good.wait().await.unwrap();
        let stats = queue.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.processed, 1);
        queue.stop().await;
    }

    #[tokio::test]
    async fn panicking_job_preserves_pool_size() {
        let queue = BackgroundTaskQueue::new(1, 8);
        queue.start().await;

        let exploded = queue
            .enqueue("exploding", || async { panic!("kaboom") })
            .await
            .unwrap();
        let after = queue.enqueue("after", || async { Ok(()) }).await.unwrap();

        match exploded.wait().await {
            Err(EdgewatchError::JobPanicked(msg)) => assert!(msg.contains("kaboom")),
            other => panic!("expected JobPanicked, got {other:?}"),
        }
        // The same single worker must still be serving.
        after.wait().await.unwrap();
        assert_eq!(queue.stats().panicked, 1);
        queue.stop().await;
    }

    #[tokio::test]
    async fn try_enqueue_rejects_when_full() {
        // No workers started: jobs stay queued.
        let queue = BackgroundTaskQueue::new(1, 1);
        let _held = queue.try_enqueue("first", || async { Ok(()) }).unwrap();
        let err = queue.try_enqueue("second", || async { Ok(()) });
        assert!(matches!(err, Err(EdgewatchError::QueueFull)));
    }

    #[tokio::test]
    async fn stop_drains_inflight_and_cancels_queued() {
        let queue = Arc::new(BackgroundTaskQueue::new(1, 8));
        queue.start().await;

        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let finished = Arc::new(AtomicU32::new(0));

        let started_tx = Arc::clone(&started);
        let release_rx = Arc::clone(&release);
        let finished_flag = Arc::clone(&finished);
        let inflight = queue
            .enqueue("inflight", move || async move {
                started_tx.notify_one();
                release_rx.notified().await;
                finished_flag.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
        // Queued behind the in-flight job on the single worker.
        let queued_a = queue.enqueue("queued-a", || async { Ok(()) }).await.unwrap();
        let queued_b = queue.enqueue("queued-b", || async { Ok(()) }).await.unwrap();

        started.notified().await;
        let stopper = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.stop().await })
        };
        release.notify_one();
        stopper.await.unwrap();

        // The in-flight job drained; the unclaimed ones were cancelled, not
        // silently dropped.
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        inflight.wait().await.unwrap();
        assert!(matches!(
            queued_a.wait().await,
            Err(EdgewatchError::JobCancelled)
        ));
        assert!(matches!(
            queued_b.wait().await,
            Err(EdgewatchError::JobCancelled)
        ));
        assert_eq!(queue.stats().cancelled, 2);
    }

    #[tokio::test]
    async fn enqueue_after_stop_rejected() {
        let queue = BackgroundTaskQueue::new(1, 8);
        queue.start().await;
        queue.stop().await;
        let err = queue.enqueue("late", || async { Ok(()) }).await;
        assert!(matches!(err, Err(EdgewatchError::QueueClosed)));
        let err = queue.try_enqueue("late", || async { Ok(()) });
        assert!(matches!(err, Err(EdgewatchError::QueueClosed)));
    }
}
