use std::sync::Arc;

use chainlock_core::{AppError, AppResult, RequestId};
use chainlock_domain::{AlertReason, EntityKey, Lock, LockAlert, LockError, Lockable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::locker_ports::{
    AlertSink, Clock, EntityStore, LivenessOracle, QueuedTask, SystemClock,
};

mod acquire;
mod chain;
mod config;
mod release;
mod transaction;

pub use config::LockerConfig;

use transaction::Transaction;

/// Entity the locker can persist: lockable and serializable.
pub trait ChainEntity: Lockable + Serialize + DeserializeOwned + Send + Sync {}

impl<T> ChainEntity for T where T: Lockable + Serialize + DeserializeOwned + Send + Sync {}

/// Continuation scheduled after a successful chain step.
#[derive(Debug, Clone, PartialEq)]
pub struct NextTask {
    /// Handler target for the next step.
    pub target: String,
    /// Handler parameters.
    pub params: Value,
    /// Queue override. `None` uses the locker's default queue.
    pub queue: Option<String>,
}

impl NextTask {
    /// Creates a continuation for `target` without parameters.
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            params: Value::Null,
            queue: None,
        }
    }

    /// Sets handler parameters.
    #[must_use]
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    /// Sends the continuation to a specific queue.
    #[must_use]
    pub fn on_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }
}

/// Lease-based lock manager for sequence-ordered task chains.
///
/// Holds configuration and ports only; every call is independent.
#[derive(Clone)]
pub struct Locker {
    config: LockerConfig,
    store: Arc<dyn EntityStore>,
    liveness: Arc<dyn LivenessOracle>,
    alerts: Arc<dyn AlertSink>,
    clock: Arc<dyn Clock>,
}

impl Locker {
    /// Creates a locker after validating its configuration.
    pub fn new(
        config: LockerConfig,
        store: Arc<dyn EntityStore>,
        liveness: Arc<dyn LivenessOracle>,
        alerts: Arc<dyn AlertSink>,
    ) -> AppResult<Self> {
        config.validate()?;

        Ok(Self {
            config,
            store,
            liveness,
            alerts,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replaces the wall clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the active configuration.
    #[must_use]
    pub fn config(&self) -> &LockerConfig {
        &self.config
    }

    /// Starts a new chain on a fresh entity and enqueues its first task.
    pub async fn start<E>(
        &self,
        key: &EntityKey,
        entity: &mut E,
        next: NextTask,
    ) -> AppResult<QueuedTask>
    where
        E: ChainEntity,
    {
        if !entity.lock().is_unlocked() || entity.lock().is_complete() {
            return Err(AppError::Validation(format!(
                "entity '{key}' must be unlocked and incomplete to start a chain"
            )));
        }

        info!(key = %key, target = %next.target, "starting task chain");
        self.schedule(key, entity, next).await
    }

    async fn alert<E>(&self, key: &EntityKey, entity: &E, reason: AlertReason)
    where
        E: ChainEntity,
    {
        let snapshot = serde_json::to_value(entity).unwrap_or(Value::Null);
        let alert = LockAlert {
            key: key.clone(),
            reason,
            entity: snapshot,
        };

        if let Err(alert_error) = self.alerts.notify(alert).await {
            error!(
                key = %key,
                reason = %reason,
                error = %alert_error,
                "failed to send lock alert"
            );
        }
    }

    /// Asks the liveness oracle about a previous owner. Unknown owners and
    /// lookup failures count as still running.
    async fn previous_request_finished(&self, owner_id: &str) -> bool {
        match self.liveness.has_finished(owner_id).await {
            Ok(Some(finished)) => {
                if self.config.log_verbose {
                    debug!(owner_id, finished, "found previous request log");
                }
                finished
            }
            Ok(None) => {
                if self.config.log_verbose {
                    warn!(owner_id, "no log found for previous request");
                }
                false
            }
            Err(lookup_error) => {
                if self.config.log_verbose {
                    warn!(
                        owner_id,
                        error = %lookup_error,
                        "failed to look up previous request log"
                    );
                }
                false
            }
        }
    }
}

/// Checks that a fresh store read still shows the lock the caller holds.
fn ensure_lock_held(key: &EntityKey, stored: Option<&Lock>, held: &Lock) -> AppResult<()> {
    match stored {
        None if held.is_unlocked() => Ok(()),
        Some(stored) if stored.owner_id == held.owner_id && stored.sequence == held.sequence => {
            Ok(())
        }
        Some(stored) => Err(AppError::LockLost(format!(
            "entity '{key}' is at sequence {} owned by '{}', expected sequence {} owned by '{}'",
            stored.sequence, stored.owner_id, held.sequence, held.owner_id
        ))),
        None => Err(AppError::LockLost(format!(
            "entity '{key}' no longer exists"
        ))),
    }
}

fn exhausted(key: &EntityKey, attempts: u8, last_conflict: Option<String>) -> AppError {
    AppError::Conflict(format!(
        "transaction on entity '{key}' gave up after {attempts} attempts: {}",
        last_conflict.unwrap_or_else(|| "no attempt committed".to_owned())
    ))
}
