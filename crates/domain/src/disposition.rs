use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What the task dispatcher should do with a delivery after a lock outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Leave the task on the queue so it is redelivered later.
    Retry,
    /// Treat the task as handled and drop it.
    Abandon,
}

/// Lock outcomes that stop a task from running.
///
/// These are not operational failures. Each one carries the queue treatment
/// the dispatcher should apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LockError {
    /// The lock could not be taken right now.
    #[error("lock failed (retry)")]
    LockFailed,

    /// The chain already moved past this task.
    #[error("task expired (abandon)")]
    TaskExpired,

    /// The step failed more often than allowed.
    #[error("task failed permanently (abandon)")]
    TaskFailedPermanently,
}

impl LockError {
    /// Returns the queue treatment for this outcome.
    #[must_use]
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::LockFailed => Disposition::Retry,
            Self::TaskExpired | Self::TaskFailedPermanently => Disposition::Abandon,
        }
    }

    /// Returns true when the task should be redelivered.
    #[must_use]
    pub fn should_retry(&self) -> bool {
        self.disposition() == Disposition::Retry
    }

    /// Returns stable value used in logs and reports.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LockFailed => "lock_failed",
            Self::TaskExpired => "task_expired",
            Self::TaskFailedPermanently => "task_failed_permanently",
        }
    }
}
