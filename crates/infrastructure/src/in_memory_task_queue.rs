//! In-memory at-least-once task queue.

use async_trait::async_trait;
use chainlock_application::{DeliveredTask, QueuedTask, TaskQueue};
use chainlock_core::{AppError, AppResult};
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct DeliveryLease {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct QueueEntry {
    task: QueuedTask,
    available_at: DateTime<Utc>,
    delivery_count: u32,
    lease: Option<DeliveryLease>,
}

impl QueueEntry {
    fn is_claimable(&self, queue: &str, now: DateTime<Utc>) -> bool {
        self.task.queue == queue
            && self.available_at <= now
            && self
                .lease
                .as_ref()
                .is_none_or(|lease| lease.expires_at <= now)
    }

    fn is_leased_by(&self, delivery: &DeliveredTask) -> bool {
        self.task.task_id == delivery.task.task_id
            && self
                .lease
                .as_ref()
                .is_some_and(|lease| lease.token == delivery.delivery_token)
    }
}

/// Process-local task queue for tests and single-process runs.
///
/// Claimed tasks stay in the queue under a delivery lease until they are
/// acknowledged; an expired lease makes them claimable again.
#[derive(Default)]
pub struct InMemoryTaskQueue {
    entries: Mutex<Vec<QueueEntry>>,
}

impl InMemoryTaskQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of tasks on `queue`, leased ones included.
    pub async fn count(&self, queue: &str) -> usize {
        self.entries
            .lock()
            .await
            .iter()
            .filter(|entry| entry.task.queue == queue)
            .count()
    }

    /// Appends tasks that were committed together with entity writes.
    pub(crate) async fn push_committed(&self, tasks: Vec<QueuedTask>) {
        if tasks.is_empty() {
            return;
        }

        let mut entries = self.entries.lock().await;
        entries.extend(tasks.into_iter().map(|task| QueueEntry {
            available_at: task.enqueued_at,
            task,
            delivery_count: 0,
            lease: None,
        }));
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue(&self, task: QueuedTask) -> AppResult<()> {
        self.push_committed(vec![task]).await;
        Ok(())
    }

    async fn claim(
        &self,
        queue: &str,
        worker_id: &str,
        limit: usize,
        lease_seconds: u32,
    ) -> AppResult<Vec<DeliveredTask>> {
        if lease_seconds == 0 {
            return Err(AppError::Validation(
                "task lease_seconds must be greater than zero".to_owned(),
            ));
        }

        let now = Utc::now();
        let expires_at = now + Duration::seconds(i64::from(lease_seconds));
        let mut entries = self.entries.lock().await;

        let delivered = entries
            .iter_mut()
            .filter(|entry| entry.is_claimable(queue, now))
            .take(limit)
            .map(|entry| {
                let token = format!("{worker_id}:{}", uuid::Uuid::new_v4());
                entry.delivery_count = entry.delivery_count.saturating_add(1);
                entry.lease = Some(DeliveryLease {
                    token: token.clone(),
                    expires_at,
                });

                DeliveredTask {
                    task: entry.task.clone(),
                    delivery_token: token,
                    delivery_count: entry.delivery_count,
                }
            })
            .collect();

        Ok(delivered)
    }

    async fn acknowledge(&self, delivery: &DeliveredTask) -> AppResult<()> {
        let mut entries = self.entries.lock().await;
        let Some(position) = entries.iter().position(|entry| entry.is_leased_by(delivery)) else {
            return Err(AppError::Conflict(format!(
                "task '{}' is not leased under the given delivery token",
                delivery.task.task_id
            )));
        };

        entries.remove(position);
        Ok(())
    }

    async fn release(&self, delivery: &DeliveredTask, retry_after_seconds: u32) -> AppResult<()> {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.iter_mut().find(|entry| entry.is_leased_by(delivery)) else {
            return Err(AppError::Conflict(format!(
                "task '{}' is not leased under the given delivery token",
                delivery.task.task_id
            )));
        };

        entry.lease = None;
        entry.available_at = Utc::now() + Duration::seconds(i64::from(retry_after_seconds));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chainlock_application::{QueuedTask, TaskQueue};
    use chainlock_domain::{EntityKey, TaskEnvelope};
    use chrono::Utc;
    use serde_json::Value;

    use super::InMemoryTaskQueue;

    fn task(queue: &str, sequence: i64) -> QueuedTask {
        let key = EntityKey::new("counter", "1").unwrap_or_else(|_| unreachable!());
        let envelope = TaskEnvelope::new(key, sequence).unwrap_or_else(|_| unreachable!());
        QueuedTask::for_envelope(queue, "counter.increment", Value::Null, &envelope, Utc::now())
            .unwrap_or_else(|_| unreachable!())
    }

    #[tokio::test]
    async fn claims_only_from_requested_queue_up_to_limit() {
        let queue = InMemoryTaskQueue::new();
        for sequence in 1..=3 {
            assert!(queue.enqueue(task("default", sequence)).await.is_ok());
        }
        assert!(queue.enqueue(task("fast", 9)).await.is_ok());

        let claimed = queue
            .claim("default", "worker-a", 2, 30)
            .await
            .unwrap_or_default();
        assert_eq!(claimed.len(), 2);
        assert!(claimed.iter().all(|delivery| delivery.task.queue == "default"));
        assert!(claimed.iter().all(|delivery| delivery.delivery_count == 1));

        let remaining = queue
            .claim("default", "worker-b", 10, 30)
            .await
            .unwrap_or_default();
        assert_eq!(remaining.len(), 1);
        assert_eq!(queue.count("fast").await, 1);
    }

    #[tokio::test]
    async fn acknowledged_tasks_leave_the_queue() {
        let queue = InMemoryTaskQueue::new();
        assert!(queue.enqueue(task("default", 1)).await.is_ok());
        let claimed = queue
            .claim("default", "worker-a", 1, 30)
            .await
            .unwrap_or_default();
        assert_eq!(claimed.len(), 1);

        assert!(queue.acknowledge(&claimed[0]).await.is_ok());
        assert_eq!(queue.count("default").await, 0);
        assert!(queue.acknowledge(&claimed[0]).await.is_err());
    }

    #[tokio::test]
    async fn released_tasks_are_redelivered_with_new_token() {
        let queue = InMemoryTaskQueue::new();
        assert!(queue.enqueue(task("default", 1)).await.is_ok());
        let first = queue
            .claim("default", "worker-a", 1, 30)
            .await
            .unwrap_or_default();
        assert_eq!(first.len(), 1);
        assert!(
            queue
                .claim("default", "worker-b", 1, 30)
                .await
                .unwrap_or_default()
                .is_empty()
        );

        assert!(queue.release(&first[0], 0).await.is_ok());
        let second = queue
            .claim("default", "worker-b", 1, 30)
            .await
            .unwrap_or_default();

        assert_eq!(second.len(), 1);
        assert_eq!(second[0].delivery_count, 2);
        assert_ne!(second[0].delivery_token, first[0].delivery_token);
        assert!(queue.acknowledge(&first[0]).await.is_err());
    }

    #[tokio::test]
    async fn delayed_release_hides_task_until_due() {
        let queue = InMemoryTaskQueue::new();
        assert!(queue.enqueue(task("default", 1)).await.is_ok());
        let claimed = queue
            .claim("default", "worker-a", 1, 30)
            .await
            .unwrap_or_default();
        assert_eq!(claimed.len(), 1);

        assert!(queue.release(&claimed[0], 60).await.is_ok());
        assert!(
            queue
                .claim("default", "worker-a", 1, 30)
                .await
                .unwrap_or_default()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn zero_lease_is_rejected() {
        let queue = InMemoryTaskQueue::new();
        assert!(queue.claim("default", "worker-a", 1, 0).await.is_err());
    }
}
