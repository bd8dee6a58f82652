//! Fakes shared by the service tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};

use async_trait::async_trait;
use chainlock_core::{AppError, AppResult};
use chainlock_domain::{EntityKey, Lock, LockAlert, Lockable};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::locker_ports::{
    AlertSink, Clock, EntityStore, ExpectedVersion, LivenessOracle, QueuedTask, RequestLog,
    VersionedEntity, WriteBatch,
};

pub(crate) fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2016, 7, 21, 11, 0, 0)
        .single()
        .unwrap_or_else(|| unreachable!())
}

pub(crate) fn key(name: &str) -> EntityKey {
    EntityKey::new("counter", name).unwrap_or_else(|_| unreachable!())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct Counter {
    #[serde(flatten)]
    pub(crate) lock: Lock,
    #[serde(default)]
    pub(crate) value: i64,
}

impl Counter {
    pub(crate) fn at(sequence: i64, timestamp: DateTime<Utc>) -> Self {
        Self {
            lock: Lock {
                sequence,
                ..Lock::new(timestamp)
            },
            value: 0,
        }
    }

    pub(crate) fn held_by(mut self, owner_id: &str) -> Self {
        self.lock.owner_id = owner_id.to_owned();
        self
    }
}

impl Lockable for Counter {
    fn lock(&self) -> &Lock {
        &self.lock
    }

    fn lock_mut(&mut self) -> &mut Lock {
        &mut self.lock
    }
}

pub(crate) struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub(crate) fn new(now: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(now.timestamp_millis()),
        }
    }

    pub(crate) fn set(&self, now: DateTime<Utc>) {
        self.millis.store(now.timestamp_millis(), Ordering::SeqCst);
    }

    pub(crate) fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.num_milliseconds(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
    }
}

#[derive(Default)]
pub(crate) struct FakeEntityStore {
    entities: Mutex<HashMap<EntityKey, VersionedEntity>>,
    tasks: Mutex<Vec<QueuedTask>>,
    commits: AtomicUsize,
    conflicts_to_inject: AtomicUsize,
    unavailable: AtomicBool,
}

impl FakeEntityStore {
    pub(crate) async fn seed<E: Serialize>(&self, key: &EntityKey, entity: &E) {
        let value = serde_json::to_value(entity).unwrap_or_else(|_| unreachable!());
        let mut entities = self.entities.lock().await;
        let version = entities.get(key).map_or(1, |stored| stored.version + 1);
        entities.insert(key.clone(), VersionedEntity { value, version });
    }

    pub(crate) async fn stored<E: DeserializeOwned>(&self, key: &EntityKey) -> Option<E> {
        let entities = self.entities.lock().await;
        entities
            .get(key)
            .map(|stored| serde_json::from_value(stored.value.clone()).unwrap_or_else(|_| unreachable!()))
    }

    pub(crate) async fn tasks(&self) -> Vec<QueuedTask> {
        self.tasks.lock().await.clone()
    }

    pub(crate) fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub(crate) fn inject_conflicts(&self, count: usize) {
        self.conflicts_to_inject.store(count, Ordering::SeqCst);
    }

    pub(crate) fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl EntityStore for FakeEntityStore {
    async fn load(&self, key: &EntityKey) -> AppResult<Option<VersionedEntity>> {
        let loaded = self.entities.lock().await.get(key).cloned();
        // Lets concurrent transactions read the same version.
        tokio::task::yield_now().await;
        Ok(loaded)
    }

    async fn commit(&self, batch: WriteBatch) -> AppResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::Unavailable("store is down".to_owned()));
        }

        if self
            .conflicts_to_inject
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
        {
            return Err(AppError::Conflict("injected conflict".to_owned()));
        }

        let mut entities = self.entities.lock().await;
        for write in &batch.writes {
            let current = entities.get(&write.key).map(|stored| stored.version);
            let matches = match write.expected {
                ExpectedVersion::Absent => current.is_none(),
                ExpectedVersion::Exactly(version) => current == Some(version),
            };
            if !matches {
                return Err(AppError::Conflict(format!(
                    "entity '{}' changed concurrently",
                    write.key
                )));
            }
        }

        for write in batch.writes {
            let version = entities.get(&write.key).map_or(1, |stored| stored.version + 1);
            entities.insert(
                write.key,
                VersionedEntity {
                    value: write.value,
                    version,
                },
            );
        }
        self.tasks.lock().await.extend(batch.tasks);
        self.commits.fetch_add(1, Ordering::SeqCst);

        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeLiveness {
    finished: Mutex<HashMap<String, bool>>,
    failing: AtomicBool,
    lookups: AtomicUsize,
}

impl FakeLiveness {
    pub(crate) async fn set(&self, request_id: &str, finished: bool) {
        self.finished
            .lock()
            .await
            .insert(request_id.to_owned(), finished);
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LivenessOracle for FakeLiveness {
    async fn has_finished(&self, request_id: &str) -> AppResult<Option<bool>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::Unavailable("request log is down".to_owned()));
        }

        Ok(self.finished.lock().await.get(request_id).copied())
    }
}

#[async_trait]
impl RequestLog for FakeLiveness {
    async fn record_started(&self, request_id: &str) -> AppResult<()> {
        self.set(request_id, false).await;
        Ok(())
    }

    async fn record_finished(&self, request_id: &str) -> AppResult<()> {
        self.set(request_id, true).await;
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct RecordingAlerts {
    alerts: Mutex<Vec<LockAlert>>,
    failing: AtomicBool,
}

impl RecordingAlerts {
    pub(crate) fn failing() -> Self {
        Self {
            alerts: Mutex::new(Vec::new()),
            failing: AtomicBool::new(true),
        }
    }

    pub(crate) async fn alerts(&self) -> Vec<LockAlert> {
        self.alerts.lock().await.clone()
    }
}

#[async_trait]
impl AlertSink for RecordingAlerts {
    async fn notify(&self, alert: LockAlert) -> AppResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::Unavailable("mail relay rejected alert".to_owned()));
        }

        self.alerts.lock().await.push(alert);
        Ok(())
    }
}
