//! Runs chained task handlers under the locker.
//!
//! A delivery is parsed, its entity locked, the handler run, and the chain
//! advanced, completed or released depending on the handler's result. The
//! outcome tells the worker whether the delivery should be acknowledged or
//! handed back to the queue.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chainlock_core::{AppError, AppResult, RequestId};
use chainlock_domain::{EntityKey, LockError, Lockable, TaskEnvelope};
use tracing::{debug, info, warn};

use crate::locker_ports::{DeliveredTask, QueuedTask, RequestLog};
use crate::locker_service::{ChainEntity, Locker, NextTask};

/// What a handler wants done with the chain after a successful step.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskStep {
    /// Schedule another step. A continuation without a queue stays on the
    /// queue the current task arrived on.
    Continue(NextTask),
    /// The chain is finished.
    Complete,
}

/// User logic for one kind of chained task.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Entity type the chain operates on.
    type Entity: ChainEntity;

    /// Creates an empty entity for the locker to load into.
    fn new_entity(&self) -> Self::Entity;

    /// Runs one step with the entity locked. The run is cut off once the
    /// locker's request deadline has passed.
    async fn handle(
        &self,
        key: &EntityKey,
        entity: &mut Self::Entity,
        task: &QueuedTask,
    ) -> AppResult<TaskStep>;
}

/// Result of dispatching one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The step ran and the next step was enqueued.
    Scheduled {
        /// Sequence of the enqueued step.
        sequence: i64,
    },
    /// The step ran and the chain completed.
    Completed,
    /// The entity is locked by another request.
    Busy,
    /// The lock outcome says the task must be dropped.
    Abandoned(LockError),
    /// The handler failed and the lease was released for a retry.
    HandlerFailed {
        /// Handler error.
        message: String,
    },
    /// The handler succeeded but the chain could not be advanced.
    TransitionFailed {
        /// Store or queue error.
        message: String,
    },
    /// The task cannot be processed at all.
    Rejected {
        /// Reason the task was rejected.
        message: String,
    },
}

impl DispatchOutcome {
    fn from_lock_error(lock_error: LockError) -> Self {
        if lock_error.should_retry() {
            Self::Busy
        } else {
            Self::Abandoned(lock_error)
        }
    }

    /// Returns true when the delivery should go back to the queue.
    #[must_use]
    pub fn should_retry(&self) -> bool {
        matches!(
            self,
            Self::Busy | Self::HandlerFailed { .. } | Self::TransitionFailed { .. }
        )
    }

    /// Returns stable value used in logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled { .. } => "scheduled",
            Self::Completed => "completed",
            Self::Busy => "busy",
            Self::Abandoned(lock_error) => lock_error.as_str(),
            Self::HandlerFailed { .. } => "handler_failed",
            Self::TransitionFailed { .. } => "transition_failed",
            Self::Rejected { .. } => "rejected",
        }
    }
}

/// Dispatch result with correlation data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// Request identifier the lease was taken under.
    pub request_id: RequestId,
    /// Delivered task identifier.
    pub task_id: String,
    /// Envelope carried by the task, when it could be parsed.
    pub envelope: Option<TaskEnvelope>,
    /// Outcome.
    pub outcome: DispatchOutcome,
}

/// Application service wrapping handlers with lock processing.
#[derive(Clone)]
pub struct TaskDispatcher {
    locker: Locker,
    request_log: Option<Arc<dyn RequestLog>>,
}

impl TaskDispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(locker: Locker) -> Self {
        Self {
            locker,
            request_log: None,
        }
    }

    /// Records request start and finish so stale leases can be reclaimed.
    #[must_use]
    pub fn with_request_log(mut self, request_log: Arc<dyn RequestLog>) -> Self {
        self.request_log = Some(request_log);
        self
    }

    /// Returns the locker used by this dispatcher.
    #[must_use]
    pub fn locker(&self) -> &Locker {
        &self.locker
    }

    /// Dispatches one delivery to `handler`.
    pub async fn dispatch<H>(&self, delivery: &DeliveredTask, handler: &H) -> DispatchReport
    where
        H: TaskHandler + ?Sized,
    {
        let request_id = RequestId::generate();
        let task = &delivery.task;

        let envelope = match task.envelope() {
            Ok(envelope) => envelope,
            Err(parse_error) => {
                warn!(
                    task_id = %task.task_id,
                    target = %task.target,
                    error = %parse_error,
                    "task envelope parse failed"
                );
                return DispatchReport {
                    request_id,
                    task_id: task.task_id.clone(),
                    envelope: None,
                    outcome: DispatchOutcome::Rejected {
                        message: parse_error.to_string(),
                    },
                };
            }
        };

        self.record_started(&request_id).await;
        let outcome = self.run(&request_id, &envelope, task, handler).await;
        self.record_finished(&request_id).await;

        info!(
            request_id = %request_id,
            task_id = %task.task_id,
            key = %envelope.key,
            sequence = envelope.sequence,
            delivery_count = delivery.delivery_count,
            outcome = outcome.as_str(),
            "task dispatched"
        );

        DispatchReport {
            request_id,
            task_id: task.task_id.clone(),
            envelope: Some(envelope),
            outcome,
        }
    }

    async fn run<H>(
        &self,
        request_id: &RequestId,
        envelope: &TaskEnvelope,
        task: &QueuedTask,
        handler: &H,
    ) -> DispatchOutcome
    where
        H: TaskHandler + ?Sized,
    {
        let key = &envelope.key;
        let mut entity = handler.new_entity();

        if let Err(lock_error) = self
            .locker
            .acquire(request_id, key, &mut entity, envelope.sequence)
            .await
        {
            debug!(key = %key, error = %lock_error, "lock not acquired");
            return DispatchOutcome::from_lock_error(lock_error);
        }

        let deadline = self
            .locker
            .config()
            .request_deadline
            .to_std()
            .unwrap_or_default();
        let handled = tokio::time::timeout(deadline, handler.handle(key, &mut entity, task)).await;

        let step = match handled {
            Ok(Ok(step)) => step,
            Err(_) => {
                warn!(
                    key = %key,
                    deadline = ?deadline,
                    "task handler exceeded request deadline"
                );
                return self
                    .release(key, &mut entity, DispatchOutcome::HandlerFailed {
                        message: format!("handler exceeded request deadline of {deadline:?}"),
                    })
                    .await;
            }
            Ok(Err(handler_error)) => {
                warn!(key = %key, error = %handler_error, "task handler failed");
                return self
                    .release(key, &mut entity, DispatchOutcome::HandlerFailed {
                        message: handler_error.to_string(),
                    })
                    .await;
            }
        };

        let transition = match step {
            TaskStep::Continue(mut next) => {
                if next.queue.is_none() {
                    next.queue = Some(task.queue.clone());
                }
                self.locker
                    .schedule(key, &mut entity, next)
                    .await
                    .map(|_| DispatchOutcome::Scheduled {
                        sequence: entity.lock().sequence,
                    })
            }
            TaskStep::Complete => self
                .locker
                .complete(key, &mut entity)
                .await
                .map(|()| DispatchOutcome::Completed),
        };

        match transition {
            Ok(outcome) => outcome,
            Err(AppError::LockLost(message)) => {
                warn!(key = %key, message = %message, "lock lost before chain write");
                DispatchOutcome::TransitionFailed { message }
            }
            Err(transition_error) => {
                warn!(key = %key, error = %transition_error, "chain write failed");
                self.release(key, &mut entity, DispatchOutcome::TransitionFailed {
                    message: transition_error.to_string(),
                })
                .await
            }
        }
    }

    async fn release<E>(
        &self,
        key: &EntityKey,
        entity: &mut E,
        failure: DispatchOutcome,
    ) -> DispatchOutcome
    where
        E: ChainEntity,
    {
        match self.locker.clear_lock(key, entity).await {
            Ok(()) => failure,
            Err(lock_error) => DispatchOutcome::from_lock_error(lock_error),
        }
    }

    async fn record_started(&self, request_id: &RequestId) {
        if let Some(request_log) = &self.request_log
            && let Err(log_error) = request_log.record_started(request_id.as_str()).await
        {
            warn!(request_id = %request_id, error = %log_error, "failed to record request start");
        }
    }

    async fn record_finished(&self, request_id: &RequestId) {
        if let Some(request_log) = &self.request_log
            && let Err(log_error) = request_log.record_finished(request_id.as_str()).await
        {
            warn!(request_id = %request_id, error = %log_error, "failed to record request finish");
        }
    }
}

/// Type-erased handler entry used by [`TaskRouter`].
#[async_trait]
pub trait TaskRoute: Send + Sync {
    /// Dispatches one delivery through `dispatcher`.
    async fn run(&self, dispatcher: &TaskDispatcher, delivery: &DeliveredTask) -> DispatchReport;
}

#[async_trait]
impl<H> TaskRoute for H
where
    H: TaskHandler,
{
    async fn run(&self, dispatcher: &TaskDispatcher, delivery: &DeliveredTask) -> DispatchReport {
        dispatcher.dispatch(delivery, self).await
    }
}

/// Routes deliveries to handlers by task target.
#[derive(Clone)]
pub struct TaskRouter {
    dispatcher: TaskDispatcher,
    routes: HashMap<String, Arc<dyn TaskRoute>>,
}

impl TaskRouter {
    /// Creates a router without routes.
    #[must_use]
    pub fn new(dispatcher: TaskDispatcher) -> Self {
        Self {
            dispatcher,
            routes: HashMap::new(),
        }
    }

    /// Registers `handler` for `target`.
    #[must_use]
    pub fn route(mut self, target: impl Into<String>, handler: Arc<dyn TaskRoute>) -> Self {
        self.routes.insert(target.into(), handler);
        self
    }

    /// Dispatches one delivery to the handler registered for its target.
    pub async fn dispatch(&self, delivery: &DeliveredTask) -> DispatchReport {
        match self.routes.get(delivery.task.target.as_str()) {
            Some(route) => route.run(&self.dispatcher, delivery).await,
            None => {
                warn!(
                    task_id = %delivery.task.task_id,
                    target = %delivery.task.target,
                    "no handler registered for task target"
                );
                DispatchReport {
                    request_id: RequestId::generate(),
                    task_id: delivery.task.task_id.clone(),
                    envelope: delivery.task.envelope().ok(),
                    outcome: DispatchOutcome::Rejected {
                        message: format!(
                            "no handler registered for target '{}'",
                            delivery.task.target
                        ),
                    },
                }
            }
        }
    }
}
