use async_trait::async_trait;
use chainlock_application::AlertSink;
use chainlock_core::AppResult;
use chainlock_domain::LockAlert;
use tracing::warn;

/// Alert sink that only logs.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn notify(&self, alert: LockAlert) -> AppResult<()> {
        warn!(
            key = %alert.key,
            reason = %alert.reason,
            entity = %alert.entity,
            "lock alert"
        );
        Ok(())
    }
}
