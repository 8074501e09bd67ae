//! Health monitor — the periodic self-test and the export activity.
//!
//! Two independent activities share one instance. The self-test runs
//! inline on the scheduler driver (collection is expected to be fast);
//! the export cycle does file and gzip I/O, so it is handed off to the
//! background queue instead of stalling ticks.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use edgewatch_core::{AgentConfig, Result};
use edgewatch_scheduler::{callback, BackgroundTaskQueue, PollScheduler};

use crate::collector::HealthCollector;
use crate::export::HealthExporter;
use crate::record::HealthRecord;
use crate::service::ServiceControl;
use crate::store::HealthStore;

/// Scheduler task name of the periodic self-test.
pub const SELF_TEST_TASK: &str = "health_monitor";
/// Scheduler task name of the export activity.
pub const EXPORT_TASK: &str = "health_export";

/// Periodically evaluates system health, records it, and reacts to
/// degraded service state; separately manages export snapshots.
pub struct HealthMonitor {
    config: AgentConfig,
    collector: Arc<dyn HealthCollector>,
    store: Arc<dyn HealthStore>,
    control: Arc<dyn ServiceControl>,
    queue: Arc<BackgroundTaskQueue>,
    exporter: Arc<HealthExporter>,
}

impl HealthMonitor {
    pub fn new(
        config: AgentConfig,
        collector: Arc<dyn HealthCollector>,
        store: Arc<dyn HealthStore>,
        control: Arc<dyn ServiceControl>,
        queue: Arc<BackgroundTaskQueue>,
    ) -> Self {
        let exporter = Arc::new(HealthExporter::new(Arc::clone(&store), &config));
        Self {
            config,
            collector,
            store,
            control,
            queue,
            exporter,
        }
    }

    /// Register the monitor's periodic activities on `scheduler`.
    ///
    /// The export task is only scheduled when `health_export_interval` is
    /// non-zero — a disabled export never even enters the registry.
    pub async fn register(self: &Arc<Self>, scheduler: &PollScheduler) -> Result<()> {
        let monitor = Arc::clone(self);
        scheduler
            .schedule(
                SELF_TEST_TASK,
                Duration::from_secs(self.config.health_poll_interval),
                callback(move |_tick| {
                    let monitor = Arc::clone(&monitor);
                    async move {
                        monitor.run_self_test().await;
                        Ok(())
                    }
                }),
            )
            .await?;

        if self.config.health_export_interval > 0 {
            let monitor = Arc::clone(self);
            scheduler
                .schedule(
                    EXPORT_TASK,
                    Duration::from_secs(self.config.health_export_interval * 3600),
                    callback(move |_tick| {
                        let monitor = Arc::clone(&monitor);
                        async move { monitor.queue_export().await }
                    }),
                )
                .await?;
        }
        Ok(())
    }

    /// One self-test cycle: collect, record, and issue restarts for
    /// configured services that report down.
    ///
    /// Nothing here is fatal: a collector failure becomes a degraded
    /// record, and a store failure skips the rest of the cycle — the next
    /// poll is the retry mechanism.
    pub async fn run_self_test(&self) -> HealthRecord {
        let record = match self.collector.collect().await {
            Ok(snapshot) => HealthRecord::from_snapshot(Utc::now(), snapshot),
            Err(e) => {
                tracing::warn!("⚠️ Self-test collector failed: {e}");
                HealthRecord::collector_failure(Utc::now(), e.to_string())
            }
        };

        if let Err(e) = self.store.append(&record) {
            tracing::warn!("⚠️ Health record write failed, cycle skipped: {e}");
            return record;
        }
        if let Err(e) = self
            .store
            .purge_older_than(self.config.health_record_retention)
        {
            tracing::warn!("⚠️ Health record purge failed: {e}");
        }

        self.issue_restarts(&record);
        record
    }

    /// Fire-and-forget restarts for down services in the restart list.
    /// The monitor never blocks on or retries a restart; the next cycle
    /// observes whether it took.
    fn issue_restarts(&self, record: &HealthRecord) {
        for service in record.down_services() {
            if !self.config.restart_services.iter().any(|s| s == service) {
                continue;
            }
            tracing::warn!("🔁 Service '{service}' is down, issuing restart");
            let control = Arc::clone(&self.control);
            let service = service.to_string();
            tokio::spawn(async move {
                if let Err(e) = control.restart(&service).await {
                    tracing::warn!("⚠️ Restart of '{service}' failed: {e}");
                }
            });
        }
    }

    /// Hand one export cycle to the background queue.
    async fn queue_export(&self) -> Result<()> {
        let exporter = Arc::clone(&self.exporter);
        let handle = self
            .queue
            .enqueue(EXPORT_TASK, move || async move { exporter.run_cycle().await })
            .await?;
        // Fire-and-forget: the job's own failure is logged by the worker.
        drop(handle);
        Ok(())
    }

    /// Run one export cycle immediately, bypassing the queue. Used by the
    /// CLI and tests.
    pub async fn export_now(&self) -> Result<()> {
        self.exporter.run_cycle().await
    }
}
