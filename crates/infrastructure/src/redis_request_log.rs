//! Redis-backed request log used to decide whether a lease owner is gone.

use async_trait::async_trait;
use chainlock_application::{LivenessOracle, RequestLog};
use chainlock_core::{AppError, AppResult};
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;

const RUNNING: &str = "running";
const FINISHED: &str = "finished";
const STARTED: &str = "started";

/// Redis implementation of the request log and liveness oracle.
///
/// A started request writes a `running` state that expires after
/// `deadline_seconds` and a `started` marker that lives for `ttl_seconds`.
/// Once the state has expired while the marker remains, the request ran past
/// its deadline without reporting back and is answered as finished. Both
/// keys must outlive the lock lease timeout or stale leases can no longer be
/// reclaimed.
#[derive(Clone)]
pub struct RedisRequestLog {
    client: redis::Client,
    key_prefix: String,
    ttl_seconds: u64,
    deadline_seconds: u64,
}

impl RedisRequestLog {
    /// Creates one request log adapter.
    pub fn new(
        client: redis::Client,
        key_prefix: impl Into<String>,
        ttl_seconds: u64,
        deadline_seconds: u64,
    ) -> AppResult<Self> {
        if deadline_seconds == 0 {
            return Err(AppError::Validation(
                "request log deadline_seconds must be greater than zero".to_owned(),
            ));
        }

        if ttl_seconds <= deadline_seconds {
            return Err(AppError::Validation(
                "request log ttl_seconds must be greater than deadline_seconds".to_owned(),
            ));
        }

        Ok(Self {
            client,
            key_prefix: key_prefix.into(),
            ttl_seconds,
            deadline_seconds,
        })
    }

    fn state_key(&self, request_id: &str) -> String {
        format!("{}:{request_id}", self.key_prefix)
    }

    fn started_key(&self, request_id: &str) -> String {
        format!("{}:{request_id}:{STARTED}", self.key_prefix)
    }

    async fn connection(&self) -> AppResult<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| AppError::Unavailable(format!("failed to connect to redis: {error}")))
    }

    async fn write(
        connection: &mut MultiplexedConnection,
        key: String,
        value: &str,
        seconds: u64,
        request_id: &str,
    ) -> AppResult<()> {
        connection
            .set_ex::<_, _, ()>(key, value, seconds)
            .await
            .map_err(|error| {
                AppError::Unavailable(format!(
                    "failed to record request '{request_id}' as {value}: {error}"
                ))
            })
    }

    async fn read(
        connection: &mut MultiplexedConnection,
        key: String,
        request_id: &str,
    ) -> AppResult<Option<String>> {
        connection.get::<_, Option<String>>(key).await.map_err(|error| {
            AppError::Unavailable(format!(
                "failed to read request log for '{request_id}': {error}"
            ))
        })
    }
}

fn require_request_id(request_id: &str) -> AppResult<()> {
    if request_id.trim().is_empty() {
        return Err(AppError::Validation(
            "request log request_id must not be empty".to_owned(),
        ));
    }

    Ok(())
}

#[async_trait]
impl RequestLog for RedisRequestLog {
    async fn record_started(&self, request_id: &str) -> AppResult<()> {
        require_request_id(request_id)?;
        let mut connection = self.connection().await?;

        // The marker alone reads as finished, so it goes in after the state.
        Self::write(
            &mut connection,
            self.state_key(request_id),
            RUNNING,
            self.deadline_seconds,
            request_id,
        )
        .await?;
        Self::write(
            &mut connection,
            self.started_key(request_id),
            STARTED,
            self.ttl_seconds,
            request_id,
        )
        .await
    }

    async fn record_finished(&self, request_id: &str) -> AppResult<()> {
        require_request_id(request_id)?;
        let mut connection = self.connection().await?;

        Self::write(
            &mut connection,
            self.state_key(request_id),
            FINISHED,
            self.ttl_seconds,
            request_id,
        )
        .await
    }
}

#[async_trait]
impl LivenessOracle for RedisRequestLog {
    async fn has_finished(&self, request_id: &str) -> AppResult<Option<bool>> {
        let mut connection = self.connection().await?;

        match Self::read(&mut connection, self.state_key(request_id), request_id).await? {
            Some(state) => Ok(Some(state == FINISHED)),
            None => {
                let started =
                    Self::read(&mut connection, self.started_key(request_id), request_id).await?;
                Ok(started.map(|_| true))
            }
        }
    }
}
