use std::sync::Arc;

use async_trait::async_trait;
use chainlock_application::{AlertSink, EmailService};
use chainlock_core::{AppError, AppResult};
use chainlock_domain::{EmailAddress, LockAlert};
use tracing::warn;

/// Alert sink mailing every alert to a fixed recipient list.
pub struct EmailAlertSink {
    email_service: Arc<dyn EmailService>,
    recipients: Vec<EmailAddress>,
}

impl EmailAlertSink {
    /// Creates a sink. At least one recipient is required.
    pub fn new(
        email_service: Arc<dyn EmailService>,
        recipients: Vec<EmailAddress>,
    ) -> AppResult<Self> {
        if recipients.is_empty() {
            return Err(AppError::Validation(
                "alert email sink requires at least one recipient".to_owned(),
            ));
        }

        Ok(Self {
            email_service,
            recipients,
        })
    }
}

#[async_trait]
impl AlertSink for EmailAlertSink {
    async fn notify(&self, alert: LockAlert) -> AppResult<()> {
        let subject = alert.reason.subject();
        let body = alert.body();
        let mut failed = 0_usize;

        for recipient in &self.recipients {
            if let Err(error) = self
                .email_service
                .send_email(recipient.as_str(), subject, body.as_str(), None)
                .await
            {
                failed += 1;
                warn!(
                    key = %alert.key,
                    recipient = %recipient.as_str(),
                    error = %error,
                    "failed to mail lock alert"
                );
            }
        }

        if failed == self.recipients.len() {
            return Err(AppError::Unavailable(format!(
                "lock alert for '{}' reached no recipient",
                alert.key
            )));
        }

        Ok(())
    }
}
