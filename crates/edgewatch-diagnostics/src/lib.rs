//! # Edgewatch Diagnostics
//!
//! Periodic self-testing for the agent: collect system health, record it,
//! restart configured services that report down, and manage the lifecycle
//! of exported health-history snapshots.
//!
//! ## Architecture
//! ```text
//! PollScheduler
//!   ├── "health_monitor" every poll interval
//!   │     └── HealthCollector → HealthRecord → HealthStore
//!   │           └── service down + in restart list → ServiceControl
//!   └── "health_export" every export interval (0 = disabled)
//!         └── BackgroundTaskQueue job:
//!               query since last export → snapshot file → gzip? → prune
//! ```
//!
//! Degradation is data, not an exception: a failed self-test produces a
//! `Degraded` record that downstream consumers read exactly like a healthy
//! one.

pub mod collector;
pub mod export;
pub mod monitor;
pub mod record;
pub mod service;
pub mod store;

pub use collector::{HealthCollector, SystemCollector};
pub use export::HealthExporter;
pub use monitor::HealthMonitor;
pub use record::{HealthRecord, HealthSnapshot, HealthStatus, ServiceState};
pub use service::{ServiceControl, SystemdServiceControl};
pub use store::{HealthStore, MemoryHealthStore, SqliteHealthStore};
