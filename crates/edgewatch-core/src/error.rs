//! Error types shared across the Edgewatch workspace.

use thiserror::Error;

/// Workspace-wide result alias.
pub type Result<T> = std::result::Result<T, EdgewatchError>;

/// All error conditions surfaced by the agent core.
///
/// Scheduled-task and queued-job errors never unwind past the scheduler or
/// queue boundary; they are captured, logged, and (for jobs) delivered to
/// the caller's handle. Configuration errors are the exception: they are
/// fatal at startup, before anything begins running.
#[derive(Debug, Error)]
pub enum EdgewatchError {
    /// Invalid configuration, rejected before the agent starts.
    #[error("config error: {0}")]
    Config(String),

    /// Task registration error (e.g. a zero interval).
    #[error("task error: {0}")]
    Task(String),

    /// The bounded job queue is at capacity (rejecting enqueue policy).
    #[error("background queue full")]
    QueueFull,

    /// The job queue has been stopped and accepts no new work.
    #[error("background queue closed")]
    QueueClosed,

    /// The job was discarded before any worker claimed it.
    #[error("job cancelled before execution")]
    JobCancelled,

    /// The job panicked inside a worker.
    #[error("job panicked: {0}")]
    JobPanicked(String),

    /// Self-test collector failure.
    #[error("collector error: {0}")]
    Collector(String),

    /// Health record store failure.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Service restart command failure.
    #[error("service control error: {0}")]
    ServiceControl(String),

    /// Export snapshot failure.
    #[error("export error: {0}")]
    Export(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
