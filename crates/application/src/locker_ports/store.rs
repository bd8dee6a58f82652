use async_trait::async_trait;
use chainlock_core::AppResult;
use chainlock_domain::EntityKey;
use serde_json::Value;

use super::queue::QueuedTask;

/// One stored entity with the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedEntity {
    /// Serialized entity, lock fields included.
    pub value: Value,
    /// Store version, bumped by every committed write.
    pub version: i64,
}

/// Precondition attached to one staged write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// The entity must not exist yet.
    Absent,
    /// The entity must still be at this version.
    Exactly(i64),
}

/// One staged entity write.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityWrite {
    /// Entity key.
    pub key: EntityKey,
    /// Serialized entity to store.
    pub value: Value,
    /// Version the write was computed against.
    pub expected: ExpectedVersion,
}

/// Writes and task enqueues that must commit together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    /// Entity writes.
    pub writes: Vec<EntityWrite>,
    /// Tasks enqueued only if the writes commit.
    pub tasks: Vec<QueuedTask>,
}

impl WriteBatch {
    /// Returns true when the batch carries no effects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.tasks.is_empty()
    }
}

/// Transactional entity store port.
///
/// Reads are snapshot reads. Writes are optimistic: `commit` applies the whole
/// batch atomically, or fails with `AppError::Conflict` when any precondition
/// no longer holds, in which case nothing is written and nothing is enqueued.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Loads one entity.
    async fn load(&self, key: &EntityKey) -> AppResult<Option<VersionedEntity>>;

    /// Commits one batch of writes and task enqueues.
    async fn commit(&self, batch: WriteBatch) -> AppResult<()>;
}
