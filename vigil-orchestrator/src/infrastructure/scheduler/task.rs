//! Units of work accepted by the scheduler and the events they emit

use std::fmt;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use vigil_core::domain::{AdapterError, NormalizedResult, PriorityTier, ScanId};

/// Scheduler-assigned task identifier (unique per scheduler)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Successful task output
#[derive(Debug, Clone)]
pub struct TaskSuccess {
    pub result: NormalizedResult,
    /// Served from the result cache without running the tool
    pub cache_hit: bool,
}

pub type TaskResult = Result<TaskSuccess, AdapterError>;

/// Work executed on a worker: receives the task's run token and hard deadline.
pub type TaskJob = Box<dyn FnOnce(CancellationToken, Instant) -> BoxFuture<'static, TaskResult> + Send>;

/// How a task settled
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Succeeded(TaskSuccess),
    Failed(AdapterError),
    TimedOut,
    Cancelled,
}

impl TaskOutcome {
    pub(crate) fn from_result(result: TaskResult) -> Self {
        match result {
            Ok(success) => Self::Succeeded(success),
            Err(AdapterError::Cancelled { .. }) => Self::Cancelled,
            Err(AdapterError::TimedOut { .. }) => Self::TimedOut,
            Err(e) => Self::Failed(e),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Succeeded(_) => "succeeded",
            Self::Failed(_) => "failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Final report for one task
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub task_id: TaskId,
    pub adapter: String,
    pub outcome: TaskOutcome,
    /// Zero for tasks cancelled while queued
    pub duration: Duration,
}

/// Lifecycle events sent back on the channel supplied with the task
#[derive(Debug, Clone)]
pub enum TaskEvent {
    Started { task_id: TaskId, adapter: String },
    Finished(TaskReport),
}

/// A task submitted to the scheduler
pub struct ScheduledTask {
    pub scan_id: ScanId,
    pub adapter: String,
    pub tier: PriorityTier,
    pub timeout: Duration,
    /// Cancelling this token cancels the task whether queued or running
    pub cancel: CancellationToken,
    pub job: TaskJob,
    pub events: mpsc::UnboundedSender<TaskEvent>,
}

impl ScheduledTask {
    pub(crate) fn report(&self, task_id: TaskId, outcome: TaskOutcome, duration: Duration) {
        // The receiver is gone once the scan finalized; nothing left to inform.
        let _ = self.events.send(TaskEvent::Finished(TaskReport {
            task_id,
            adapter: self.adapter.clone(),
            outcome,
            duration,
        }));
    }
}

impl fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("scan_id", &self.scan_id)
            .field("adapter", &self.adapter)
            .field("tier", &self.tier)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Handle returned for each admitted task
#[derive(Debug, Clone)]
pub struct TaskHandle {
    pub id: TaskId,
    pub adapter: String,
}
