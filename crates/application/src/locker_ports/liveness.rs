use async_trait::async_trait;
use chainlock_core::AppResult;

/// Read port answering whether a recorded request has finished.
#[async_trait]
pub trait LivenessOracle: Send + Sync {
    /// Returns `Some(finished)` for a known request and `None` when the
    /// request is unknown to the oracle.
    async fn has_finished(&self, request_id: &str) -> AppResult<Option<bool>>;
}

/// Write port recording request lifecycles for log-backed oracles.
#[async_trait]
pub trait RequestLog: Send + Sync {
    /// Records that a request started.
    async fn record_started(&self, request_id: &str) -> AppResult<()>;

    /// Records that a request finished, whatever its outcome.
    async fn record_finished(&self, request_id: &str) -> AppResult<()>;
}
