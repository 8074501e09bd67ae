//! Poll scheduler — a registry of named recurring callbacks driven by a
//! single tick loop.
//!
//! The driver evaluates due tasks every resolution period and invokes them
//! inline, one at a time, in registration order. A failing callback is
//! logged and stays registered; it never stops the loop or its neighbors.
//! Scheduling state is touched only under the registry lock, and the lock
//! is never held across a callback await.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use edgewatch_core::{EdgewatchError, Result};

use crate::tasks::{TaskCallback, TaskEntry, TaskMetrics, Tick};

/// Default tick resolution — bounds scheduling jitter to one second.
pub const DEFAULT_RESOLUTION: Duration = Duration::from_secs(1);

/// Manages named periodic callbacks on one driver task.
///
/// Construct one instance at process start and hand it (by reference or
/// `Arc`) to every component that registers tasks. Re-registering an
/// existing name atomically replaces the old entry: the old callback never
/// fires again and the replacement's first due time is one full interval
/// away.
pub struct PollScheduler {
    registry: Arc<Mutex<Vec<TaskEntry>>>,
    resolution: Duration,
    shutdown: watch::Sender<bool>,
    driver: StdMutex<Option<JoinHandle<()>>>,
}

impl PollScheduler {
    /// Create a scheduler ticking at the given resolution.
    pub fn new(resolution: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            registry: Arc::new(Mutex::new(Vec::new())),
            resolution: resolution.max(Duration::from_millis(10)),
            shutdown,
            driver: StdMutex::new(None),
        }
    }

    /// Register `callback` to run every `interval`.
    ///
    /// The first fire happens one full interval after registration — never
    /// immediately. Scheduling under a name that already exists replaces
    /// the prior entry in place, keeping its registration slot so
    /// within-tick dispatch order stays deterministic.
    pub async fn schedule(
        &self,
        name: &str,
        interval: Duration,
        callback: TaskCallback,
    ) -> Result<()> {
        if interval.is_zero() {
            return Err(EdgewatchError::Task(format!(
                "task '{name}': interval must be greater than 0"
            )));
        }
        let entry = TaskEntry::new(name, interval, callback);
        let mut registry = self.registry.lock().await;
        match registry.iter_mut().find(|t| t.name == name) {
            Some(existing) => {
                tracing::debug!("📅 Task replaced: '{name}'");
                *existing = entry;
            }
            None => {
                tracing::debug!("📅 Task added: '{name}' (every {interval:?})");
                registry.push(entry);
            }
        }
        Ok(())
    }

    /// Remove the task registered under `name`, returning whether it
    /// existed. Takes effect for all future ticks; an invocation already
    /// dispatched in the current tick still completes.
    pub async fn cancel(&self, name: &str) -> bool {
        let mut registry = self.registry.lock().await;
        let len = registry.len();
        registry.retain(|t| t.name != name);
        let removed = registry.len() < len;
        if removed {
            tracing::debug!("📅 Task cancelled: '{name}'");
        }
        removed
    }

    /// Enable or disable a task without deregistering it.
    pub async fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        let mut registry = self.registry.lock().await;
        match registry.iter_mut().find(|t| t.name == name) {
            Some(task) => {
                task.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Number of registered tasks.
    pub async fn task_count(&self) -> usize {
        self.registry.lock().await.len()
    }

    /// Per-task metrics: next due time, last invocation duration, run count.
    pub async fn metrics(&self) -> Vec<TaskMetrics> {
        let now = Instant::now();
        let registry = self.registry.lock().await;
        registry
            .iter()
            .map(|t| TaskMetrics {
                name: t.name.clone(),
                interval_secs: t.interval.as_secs_f64(),
                enabled: t.enabled,
                run_count: t.run_count,
                seconds_until_due: (t.anchor() + t.interval)
                    .saturating_duration_since(now)
                    .as_secs_f64(),
                last_duration_secs: t.last_duration.map(|d| d.as_secs_f64()),
            })
            .collect()
    }

    /// Start the driver task. Idempotent; requires a running tokio runtime.
    pub fn start(&self) {
        let mut driver = self.driver.lock().unwrap_or_else(|e| e.into_inner());
        if driver.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let _ = self.shutdown.send(false);
        let registry = Arc::clone(&self.registry);
        let resolution = self.resolution;
        let mut shutdown = self.shutdown.subscribe();
        tracing::info!("⏰ Poll scheduler started (resolution {resolution:?})");
        *driver = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(resolution);
            // After a stall, resume the cadence instead of replaying it.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }
                Self::run_tick(&registry).await;
            }
            tracing::info!("⏰ Poll scheduler stopped");
        }));
    }

    /// Signal shutdown and wait for the driver, including any callback it
    /// is currently running inline. Queue jobs spawned by callbacks are not
    /// waited for — that is the queue's own shutdown responsibility.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let handle = {
            let mut driver = self.driver.lock().unwrap_or_else(|e| e.into_inner());
            driver.take()
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// One tick: select all due tasks under the lock, stamping
    /// `last_fired = now`, then dispatch them sequentially in registration
    /// order with the lock released.
    ///
    /// Anchoring on `now` rather than `last_fired + interval` means a
    /// stalled tick re-anchors the schedule instead of firing catch-up
    /// bursts.
    async fn run_tick(registry: &Mutex<Vec<TaskEntry>>) {
        let due = {
            let mut registry = registry.lock().await;
            let now = Instant::now();
            let mut due = Vec::new();
            for task in registry.iter_mut() {
                if !task.is_due(now) {
                    continue;
                }
                let elapsed = now.duration_since(task.anchor());
                task.last_fired = Some(now);
                task.run_count += 1;
                due.push((
                    task.name.clone(),
                    Arc::clone(&task.callback),
                    Tick {
                        fired_at: Utc::now(),
                        elapsed,
                    },
                ));
            }
            due
        };

        for (name, callback, tick) in due {
            let started = Instant::now();
            if let Err(e) = callback(tick).await {
                tracing::warn!("⚠️ Scheduled task '{name}' failed: {e}");
            }
            let duration = started.elapsed();
            let mut registry = registry.lock().await;
            if let Some(task) = registry.iter_mut().find(|t| t.name == name) {
                task.last_duration = Some(duration);
            }
        }
    }
}

impl Default for PollScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_RESOLUTION)
    }
}
