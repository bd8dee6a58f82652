//! Demo chain counting an entity up to a limit, one step per task.

use async_trait::async_trait;
use chainlock_application::{NextTask, QueuedTask, TaskHandler, TaskStep};
use chainlock_core::AppResult;
use chainlock_domain::{EntityKey, Lock, Lockable};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

pub(crate) const COUNTER_KIND: &str = "counter";
pub(crate) const COUNTER_TARGET: &str = "counter.increment";

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct Counter {
    #[serde(flatten)]
    lock: Lock,
    value: u64,
    limit: u64,
    finished_at: Option<DateTime<Utc>>,
}

impl Counter {
    pub(crate) fn new(limit: u64, now: DateTime<Utc>) -> Self {
        Self {
            lock: Lock::new(now),
            value: 0,
            limit,
            finished_at: None,
        }
    }
}

impl Lockable for Counter {
    fn lock(&self) -> &Lock {
        &self.lock
    }

    fn lock_mut(&mut self) -> &mut Lock {
        &mut self.lock
    }

    fn mark_complete(&mut self, now: DateTime<Utc>) {
        self.finished_at = Some(now);
        self.lock.complete(now);
    }
}

pub(crate) struct CounterHandler;

#[async_trait]
impl TaskHandler for CounterHandler {
    type Entity = Counter;

    fn new_entity(&self) -> Counter {
        Counter::default()
    }

    async fn handle(
        &self,
        key: &EntityKey,
        entity: &mut Counter,
        _task: &QueuedTask,
    ) -> AppResult<TaskStep> {
        entity.value = entity.value.saturating_add(1);
        info!(key = %key, value = entity.value, limit = entity.limit, "counter incremented");

        if entity.value >= entity.limit {
            return Ok(TaskStep::Complete);
        }

        Ok(TaskStep::Continue(NextTask::new(COUNTER_TARGET)))
    }
}
