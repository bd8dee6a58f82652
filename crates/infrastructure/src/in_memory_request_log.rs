use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chainlock_application::{Clock, LivenessOracle, LockerConfig, RequestLog, SystemClock};
use chainlock_core::AppResult;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy)]
enum RequestState {
    Running { started_at: DateTime<Utc> },
    Finished,
}

/// Process-local request log answering liveness queries.
///
/// A request still running once `deadline` has passed since its start is
/// reported finished: the dispatcher cuts handlers off at that deadline, so
/// only a crashed process leaves such a record behind.
pub struct InMemoryRequestLog {
    requests: RwLock<HashMap<String, RequestState>>,
    deadline: Duration,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryRequestLog {
    fn default() -> Self {
        Self {
            requests: RwLock::new(HashMap::new()),
            deadline: LockerConfig::default().request_deadline,
            clock: Arc::new(SystemClock),
        }
    }
}

impl InMemoryRequestLog {
    /// Creates an empty request log using the default request deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the request deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Replaces the wall clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl RequestLog for InMemoryRequestLog {
    async fn record_started(&self, request_id: &str) -> AppResult<()> {
        let started_at = self.clock.now();
        self.requests
            .write()
            .await
            .insert(request_id.to_owned(), RequestState::Running { started_at });
        Ok(())
    }

    async fn record_finished(&self, request_id: &str) -> AppResult<()> {
        self.requests
            .write()
            .await
            .insert(request_id.to_owned(), RequestState::Finished);
        Ok(())
    }
}

#[async_trait]
impl LivenessOracle for InMemoryRequestLog {
    async fn has_finished(&self, request_id: &str) -> AppResult<Option<bool>> {
        let state = self.requests.read().await.get(request_id).copied();

        Ok(state.map(|state| match state {
            RequestState::Finished => true,
            RequestState::Running { started_at } => {
                self.clock.now().signed_duration_since(started_at) >= self.deadline
            }
        }))
    }
}
