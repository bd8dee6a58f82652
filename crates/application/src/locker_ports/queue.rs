use std::collections::BTreeMap;

use async_trait::async_trait;
use chainlock_core::{AppError, AppResult};
use chainlock_domain::TaskEnvelope;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Queue used when neither the caller nor the locker names one.
pub const DEFAULT_QUEUE: &str = "default";

/// Task accepted by the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedTask {
    /// Stable task identifier.
    pub task_id: String,
    /// Queue name.
    pub queue: String,
    /// Handler target the task is routed to.
    pub target: String,
    /// Handler parameters.
    pub params: Value,
    /// Transport headers, including the encoded task envelope.
    pub headers: BTreeMap<String, String>,
    /// Enqueue timestamp.
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedTask {
    /// Builds a task carrying `envelope` in its headers.
    pub fn for_envelope(
        queue: impl Into<String>,
        target: impl Into<String>,
        params: Value,
        envelope: &TaskEnvelope,
        enqueued_at: DateTime<Utc>,
    ) -> AppResult<Self> {
        let target = target.into();
        if target.trim().is_empty() {
            return Err(AppError::Validation(
                "task target must not be empty".to_owned(),
            ));
        }

        let headers = envelope
            .to_headers()?
            .into_iter()
            .map(|(name, value)| (name.to_owned(), value))
            .collect();

        Ok(Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            queue: queue.into(),
            target,
            params,
            headers,
            enqueued_at,
        })
    }

    /// Returns one header value, matching names case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Decodes the task envelope from the headers.
    pub fn envelope(&self) -> AppResult<TaskEnvelope> {
        TaskEnvelope::from_headers(|name| self.header(name))
    }
}

/// Task handed to one worker under a delivery lease.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveredTask {
    /// The queued task.
    pub task: QueuedTask,
    /// Token identifying this delivery for acknowledge/release.
    pub delivery_token: String,
    /// 1-based delivery count.
    pub delivery_count: u32,
}

/// At-least-once task queue port.
///
/// A claimed task that is neither acknowledged nor released becomes
/// claimable again once its delivery lease expires.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueues one task outside of any entity transaction.
    async fn enqueue(&self, task: QueuedTask) -> AppResult<()>;

    /// Claims up to `limit` tasks from one queue.
    async fn claim(
        &self,
        queue: &str,
        worker_id: &str,
        limit: usize,
        lease_seconds: u32,
    ) -> AppResult<Vec<DeliveredTask>>;

    /// Removes one delivered task from the queue.
    async fn acknowledge(&self, delivery: &DeliveredTask) -> AppResult<()>;

    /// Returns one delivered task to the queue after a delay.
    async fn release(&self, delivery: &DeliveredTask, retry_after_seconds: u32) -> AppResult<()>;
}
