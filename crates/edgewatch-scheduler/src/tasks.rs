//! Task types shared by the poll scheduler.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::time::Instant;

use edgewatch_core::Result;

/// Passed to a callback when it fires.
#[derive(Debug, Clone, Copy)]
pub struct Tick {
    /// Wall-clock time of the tick that fired this callback.
    pub fired_at: DateTime<Utc>,
    /// Time since this task last fired (approximately the interval on the
    /// first fire).
    pub elapsed: Duration,
}

/// Boxed callback invoked by the scheduler.
///
/// Callbacks run inline on the driver task and are expected to return
/// quickly; anything slow should enqueue onto the
/// [`BackgroundTaskQueue`](crate::BackgroundTaskQueue) instead.
pub type TaskCallback = Arc<dyn Fn(Tick) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Wrap an async closure into a [`TaskCallback`].
pub fn callback<F, Fut>(f: F) -> TaskCallback
where
    F: Fn(Tick) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |tick| -> BoxFuture<'static, Result<()>> { Box::pin(f(tick)) })
}

/// A named recurring task owned by the scheduler registry.
///
/// `last_fired` is mutated only by the driver's tick loop; everything else
/// is set at registration time.
pub(crate) struct TaskEntry {
    pub name: String,
    pub interval: Duration,
    pub callback: TaskCallback,
    pub registered_at: Instant,
    pub last_fired: Option<Instant>,
    pub last_duration: Option<Duration>,
    pub run_count: u64,
    pub enabled: bool,
}

impl TaskEntry {
    pub fn new(name: &str, interval: Duration, callback: TaskCallback) -> Self {
        Self {
            name: name.to_string(),
            interval,
            callback,
            registered_at: Instant::now(),
            last_fired: None,
            last_duration: None,
            run_count: 0,
            enabled: true,
        }
    }

    /// The anchor the next due time is measured from.
    pub fn anchor(&self) -> Instant {
        self.last_fired.unwrap_or(self.registered_at)
    }

    /// Check if this task is due at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        self.enabled && now.duration_since(self.anchor()) >= self.interval
    }
}

/// Point-in-time metrics for one scheduled task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskMetrics {
    pub name: String,
    pub interval_secs: f64,
    pub enabled: bool,
    pub run_count: u64,
    /// Seconds until the task is next due (zero if already due).
    pub seconds_until_due: f64,
    /// Duration of the most recent invocation, if any.
    pub last_duration_secs: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn due_after_interval_elapses() {
        let entry = TaskEntry::new(
            "t",
            Duration::from_secs(5),
            callback(|_| async { Ok(()) }),
        );
        assert!(!entry.is_due(Instant::now()));
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(entry.is_due(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_task_never_due() {
        let mut entry = TaskEntry::new(
            "t",
            Duration::from_secs(1),
            callback(|_| async { Ok(()) }),
        );
        entry.enabled = false;
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(!entry.is_due(Instant::now()));
    }
}
