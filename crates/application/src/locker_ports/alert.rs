use async_trait::async_trait;
use chainlock_core::AppResult;
use chainlock_domain::LockAlert;

/// Operator notification port. Callers log and swallow its failures.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Delivers one alert.
    async fn notify(&self, alert: LockAlert) -> AppResult<()>;
}

/// Port for sending emails. Infrastructure provides SMTP or console implementations.
#[async_trait]
pub trait EmailService: Send + Sync {
    /// Sends a plain-text or HTML email.
    async fn send_email(
        &self,
        to: &str,
        subject: &str,
        text_body: &str,
        html_body: Option<&str>,
    ) -> AppResult<()>;
}
