//! In-memory entity store with optimistic versioning.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chainlock_application::{EntityStore, ExpectedVersion, VersionedEntity, WriteBatch};
use chainlock_core::{AppError, AppResult};
use chainlock_domain::EntityKey;
use tokio::sync::RwLock;

use crate::InMemoryTaskQueue;

/// Process-local entity store.
///
/// Tasks staged in a batch are appended to the shared queue while the
/// entity map is still write-locked, so they become visible exactly when the
/// writes do.
pub struct InMemoryEntityStore {
    entities: RwLock<HashMap<EntityKey, VersionedEntity>>,
    queue: Arc<InMemoryTaskQueue>,
}

impl InMemoryEntityStore {
    /// Creates an empty store enqueueing into `queue`.
    #[must_use]
    pub fn new(queue: Arc<InMemoryTaskQueue>) -> Self {
        Self {
            entities: RwLock::new(HashMap::new()),
            queue,
        }
    }

    /// Returns the queue committed tasks are appended to.
    #[must_use]
    pub fn queue(&self) -> Arc<InMemoryTaskQueue> {
        self.queue.clone()
    }
}

fn precondition_holds(current: Option<i64>, expected: ExpectedVersion) -> bool {
    match expected {
        ExpectedVersion::Absent => current.is_none(),
        ExpectedVersion::Exactly(version) => current == Some(version),
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn load(&self, key: &EntityKey) -> AppResult<Option<VersionedEntity>> {
        Ok(self.entities.read().await.get(key).cloned())
    }

    async fn commit(&self, batch: WriteBatch) -> AppResult<()> {
        let mut entities = self.entities.write().await;

        if let Some(stale) = batch.writes.iter().find(|write| {
            let current = entities.get(&write.key).map(|stored| stored.version);
            !precondition_holds(current, write.expected)
        }) {
            return Err(AppError::Conflict(format!(
                "entity '{}' was modified concurrently",
                stale.key
            )));
        }

        for write in batch.writes {
            let version = entities
                .get(&write.key)
                .map_or(1, |stored| stored.version.saturating_add(1));
            entities.insert(
                write.key,
                VersionedEntity {
                    value: write.value,
                    version,
                },
            );
        }

        self.queue.push_committed(batch.tasks).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chainlock_application::{
        EntityStore, EntityWrite, ExpectedVersion, QueuedTask, WriteBatch,
    };
    use chainlock_core::AppError;
    use chainlock_domain::{EntityKey, TaskEnvelope};
    use chrono::Utc;
    use serde_json::{Value, json};

    use super::InMemoryEntityStore;
    use crate::InMemoryTaskQueue;

    fn key() -> EntityKey {
        EntityKey::new("counter", "1").unwrap_or_else(|_| unreachable!())
    }

    fn write(value: i64, expected: ExpectedVersion) -> EntityWrite {
        EntityWrite {
            key: key(),
            value: json!({ "value": value }),
            expected,
        }
    }

    fn task() -> QueuedTask {
        let envelope = TaskEnvelope::new(key(), 1).unwrap_or_else(|_| unreachable!());
        QueuedTask::for_envelope("default", "counter.increment", Value::Null, &envelope, Utc::now())
            .unwrap_or_else(|_| unreachable!())
    }

    #[tokio::test]
    async fn versions_advance_with_each_commit() {
        let store = InMemoryEntityStore::new(Arc::new(InMemoryTaskQueue::new()));

        let created = store
            .commit(WriteBatch {
                writes: vec![write(1, ExpectedVersion::Absent)],
                tasks: Vec::new(),
            })
            .await;
        assert!(created.is_ok());

        let updated = store
            .commit(WriteBatch {
                writes: vec![write(2, ExpectedVersion::Exactly(1))],
                tasks: Vec::new(),
            })
            .await;
        assert!(updated.is_ok());

        let loaded = store.load(&key()).await.unwrap_or_default();
        assert_eq!(loaded.as_ref().map(|entity| entity.version), Some(2));
        assert_eq!(loaded.map(|entity| entity.value), Some(json!({ "value": 2 })));
    }

    #[tokio::test]
    async fn stale_batch_writes_and_enqueues_nothing() {
        let queue = Arc::new(InMemoryTaskQueue::new());
        let store = InMemoryEntityStore::new(queue.clone());
        let created = store
            .commit(WriteBatch {
                writes: vec![write(1, ExpectedVersion::Absent)],
                tasks: Vec::new(),
            })
            .await;
        assert!(created.is_ok());

        let stale = store
            .commit(WriteBatch {
                writes: vec![write(5, ExpectedVersion::Absent)],
                tasks: vec![task()],
            })
            .await;

        assert!(matches!(stale, Err(AppError::Conflict(_))));
        assert_eq!(queue.count("default").await, 0);
        let loaded = store.load(&key()).await.unwrap_or_default();
        assert_eq!(loaded.map(|entity| entity.value), Some(json!({ "value": 1 })));
    }

    #[tokio::test]
    async fn committed_tasks_reach_the_shared_queue() {
        let queue = Arc::new(InMemoryTaskQueue::new());
        let store = InMemoryEntityStore::new(queue.clone());

        let committed = store
            .commit(WriteBatch {
                writes: vec![write(1, ExpectedVersion::Absent)],
                tasks: vec![task()],
            })
            .await;

        assert!(committed.is_ok());
        assert_eq!(store.queue().count("default").await, 1);
    }
}
