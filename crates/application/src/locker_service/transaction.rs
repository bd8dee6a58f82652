use std::collections::HashMap;

use chainlock_core::{AppError, AppResult};
use chainlock_domain::EntityKey;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::locker_ports::{
    EntityStore, EntityWrite, ExpectedVersion, QueuedTask, VersionedEntity, WriteBatch,
};

/// One optimistic transaction against an [`EntityStore`].
///
/// Reads go to the store and record the version they saw. Writes and task
/// enqueues are staged and sent as one batch on commit, each write guarded by
/// the version its key was read at. A transaction that staged nothing commits
/// without touching the store.
pub(super) struct Transaction<'a> {
    store: &'a dyn EntityStore,
    versions: HashMap<EntityKey, ExpectedVersion>,
    batch: WriteBatch,
}

impl<'a> Transaction<'a> {
    pub(super) fn new(store: &'a dyn EntityStore) -> Self {
        Self {
            store,
            versions: HashMap::new(),
            batch: WriteBatch::default(),
        }
    }

    /// Reads one entity, seeing this transaction's own staged writes.
    pub(super) async fn get<E>(&mut self, key: &EntityKey) -> AppResult<Option<E>>
    where
        E: DeserializeOwned,
    {
        if let Some(write) = self.batch.writes.iter().find(|write| &write.key == key) {
            return decode(key, write.value.clone()).map(Some);
        }

        let loaded = self.store.load(key).await?;
        let expected = loaded
            .as_ref()
            .map_or(ExpectedVersion::Absent, |entity: &VersionedEntity| {
                ExpectedVersion::Exactly(entity.version)
            });
        self.versions.entry(key.clone()).or_insert(expected);

        loaded.map(|entity| decode(key, entity.value)).transpose()
    }

    /// Reads one entity that must exist.
    pub(super) async fn get_existing<E>(&mut self, key: &EntityKey) -> AppResult<E>
    where
        E: DeserializeOwned,
    {
        self.get(key)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("entity '{key}' does not exist")))
    }

    /// Stages one entity write. The key must have been read first.
    pub(super) fn put<E>(&mut self, key: &EntityKey, entity: &E) -> AppResult<()>
    where
        E: Serialize + ?Sized,
    {
        let expected = *self.versions.get(key).ok_or_else(|| {
            AppError::Internal(format!(
                "entity '{key}' must be read before it is written in a transaction"
            ))
        })?;
        let value = serde_json::to_value(entity).map_err(|error| {
            AppError::Internal(format!("failed to serialize entity '{key}': {error}"))
        })?;

        match self.batch.writes.iter_mut().find(|write| &write.key == key) {
            Some(write) => write.value = value,
            None => self.batch.writes.push(EntityWrite {
                key: key.clone(),
                value,
                expected,
            }),
        }

        Ok(())
    }

    /// Stages one task enqueue.
    pub(super) fn enqueue(&mut self, task: QueuedTask) {
        self.batch.tasks.push(task);
    }

    /// Commits staged effects.
    pub(super) async fn commit(self) -> AppResult<()> {
        if self.batch.is_empty() {
            return Ok(());
        }

        self.store.commit(self.batch).await
    }
}

fn decode<E>(key: &EntityKey, value: serde_json::Value) -> AppResult<E>
where
    E: DeserializeOwned,
{
    serde_json::from_value(value).map_err(|error| {
        AppError::Internal(format!("failed to deserialize entity '{key}': {error}"))
    })
}
