use chainlock_core::{AppError, AppResult};
use chrono::Duration;

use crate::locker_ports::DEFAULT_QUEUE;

/// Immutable locker settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockerConfig {
    /// Minimum age before a held lock may be stale.
    pub lease_duration: Duration,
    /// Age after which the owner is checked against the request log and the
    /// lease may be overwritten. Ten minutes is the usual task deadline, plus
    /// a margin.
    pub lease_timeout: Duration,
    /// Longest a handler may run. A request that started longer ago than
    /// this is reported finished by the request logs, so it must stay below
    /// `lease_timeout`.
    pub request_deadline: Duration,
    /// Failed handler runs allowed for one step before it is abandoned.
    pub max_retries: u32,
    /// Optimistic commit attempts per lock transaction.
    pub transaction_attempts: u8,
    /// Alert operators when a step fails permanently.
    pub alert_on_failure: bool,
    /// Alert operators when a lease is overwritten.
    pub alert_on_overwrite: bool,
    /// Log request log lookups in detail.
    pub log_verbose: bool,
    /// Queue for scheduled tasks. Empty selects [`DEFAULT_QUEUE`].
    pub default_queue: String,
}

impl Default for LockerConfig {
    fn default() -> Self {
        Self {
            lease_duration: Duration::minutes(1),
            lease_timeout: Duration::minutes(10) + Duration::seconds(30),
            request_deadline: Duration::minutes(10),
            max_retries: 10,
            transaction_attempts: 3,
            alert_on_failure: false,
            alert_on_overwrite: false,
            log_verbose: false,
            default_queue: String::new(),
        }
    }
}

impl LockerConfig {
    /// Sets the lease duration.
    #[must_use]
    pub fn with_lease_duration(mut self, lease_duration: Duration) -> Self {
        self.lease_duration = lease_duration;
        self
    }

    /// Sets the lease timeout.
    #[must_use]
    pub fn with_lease_timeout(mut self, lease_timeout: Duration) -> Self {
        self.lease_timeout = lease_timeout;
        self
    }

    /// Sets the handler deadline.
    #[must_use]
    pub fn with_request_deadline(mut self, request_deadline: Duration) -> Self {
        self.request_deadline = request_deadline;
        self
    }

    /// Sets the retry limit.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Enables permanent failure alerts.
    #[must_use]
    pub fn with_alert_on_failure(mut self) -> Self {
        self.alert_on_failure = true;
        self
    }

    /// Enables lock overwrite alerts.
    #[must_use]
    pub fn with_alert_on_overwrite(mut self) -> Self {
        self.alert_on_overwrite = true;
        self
    }

    /// Enables verbose request log lookups.
    #[must_use]
    pub fn with_log_verbose(mut self) -> Self {
        self.log_verbose = true;
        self
    }

    /// Sets the default queue.
    #[must_use]
    pub fn with_default_queue(mut self, queue: impl Into<String>) -> Self {
        self.default_queue = queue.into();
        self
    }

    /// Checks the settings are usable together.
    pub fn validate(&self) -> AppResult<()> {
        if self.lease_duration <= Duration::zero() {
            return Err(AppError::Validation(
                "lease_duration must be greater than zero".to_owned(),
            ));
        }

        if self.lease_timeout <= self.lease_duration {
            return Err(AppError::Validation(
                "lease_timeout must be greater than lease_duration".to_owned(),
            ));
        }

        if self.request_deadline <= Duration::zero() {
            return Err(AppError::Validation(
                "request_deadline must be greater than zero".to_owned(),
            ));
        }

        if self.request_deadline >= self.lease_timeout {
            return Err(AppError::Validation(
                "request_deadline must be shorter than lease_timeout".to_owned(),
            ));
        }

        if self.transaction_attempts == 0 {
            return Err(AppError::Validation(
                "transaction_attempts must be greater than zero".to_owned(),
            ));
        }

        Ok(())
    }

    /// Resolves the queue for one scheduled task.
    #[must_use]
    pub fn queue_for<'a>(&'a self, requested: Option<&'a str>) -> &'a str {
        requested
            .map(str::trim)
            .filter(|queue| !queue.is_empty())
            .or_else(|| Some(self.default_queue.trim()).filter(|queue| !queue.is_empty()))
            .unwrap_or(DEFAULT_QUEUE)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::LockerConfig;

    #[test]
    fn defaults_match_task_deadline() {
        let config = LockerConfig::default();
        assert_eq!(config.lease_duration, Duration::seconds(60));
        assert_eq!(config.lease_timeout, Duration::seconds(630));
        assert_eq!(config.request_deadline, Duration::minutes(10));
        assert_eq!(config.max_retries, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn deadline_must_end_before_timeout() {
        let config = LockerConfig::default().with_request_deadline(Duration::seconds(630));
        assert!(config.validate().is_err());

        let config = LockerConfig::default().with_request_deadline(Duration::zero());
        assert!(config.validate().is_err());
    }

    #[test]
    fn timeout_must_exceed_duration() {
        let config = LockerConfig::default()
            .with_lease_duration(Duration::minutes(5))
            .with_lease_timeout(Duration::minutes(5));
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_lease_is_rejected() {
        let config = LockerConfig::default().with_lease_duration(Duration::zero());
        assert!(config.validate().is_err());
    }

    #[test]
    fn queue_resolution_prefers_request_then_default() {
        let config = LockerConfig::default();
        assert_eq!(config.queue_for(None), "default");
        assert_eq!(config.queue_for(Some("  ")), "default");
        assert_eq!(config.queue_for(Some("exports")), "exports");

        let config = config.with_default_queue("background");
        assert_eq!(config.queue_for(None), "background");
        assert_eq!(config.queue_for(Some("exports")), "exports");
    }
}
