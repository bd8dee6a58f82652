//! Email service that writes alert mail to the log instead of sending it.

use async_trait::async_trait;
use chainlock_application::EmailService;
use chainlock_core::AppResult;
use tracing::info;

/// Development email service.
#[derive(Clone, Default)]
pub struct ConsoleEmailService;

impl ConsoleEmailService {
    /// Creates a new console email service.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EmailService for ConsoleEmailService {
    async fn send_email(
        &self,
        to: &str,
        subject: &str,
        text_body: &str,
        html_body: Option<&str>,
    ) -> AppResult<()> {
        info!(
            to,
            subject,
            body = text_body,
            has_html = html_body.is_some(),
            "email not sent, console delivery"
        );

        Ok(())
    }
}
