//! # Edgewatch Scheduler
//!
//! Cooperative task scheduler and bounded background worker pool.
//! Optimized for a single decision-making driver and cheap idle ticks.
//!
//! ## Design Principles (for 512MB RAM edge devices)
//! - One driver task owns all tick evaluation — no per-task timer wheels
//! - Tokio timers only — zero overhead when idle
//! - Callback failures are isolated per task, never fatal to the loop
//! - Anything slow hands off to the worker pool instead of stalling ticks
//!
//! ## Architecture
//! ```text
//! PollScheduler (single driver, tokio interval)
//!   ├── "health_monitor": every 10s  → self-test, runs inline
//!   ├── "health_export":  every 6h   → enqueues export job
//!   └── "gps_poll":       every 5s   → runs inline
//!                  │
//!                  └── slow work → BackgroundTaskQueue (bounded mpsc)
//!                                    ├── worker 0: dequeue → run → report
//!                                    └── worker 1: dequeue → run → report
//! ```

pub mod poll;
pub mod queue;
pub mod tasks;

pub use poll::PollScheduler;
pub use queue::{BackgroundTaskQueue, JobHandle, QueueStats};
pub use tasks::{callback, TaskCallback, TaskMetrics, Tick};
