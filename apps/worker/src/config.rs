use std::env;

use chainlock_application::LockerConfig;
use chainlock_core::{AppError, AppResult};
use chainlock_domain::EmailAddress;
use chrono::Duration;

const DEFAULT_REQUEST_LOG_TTL_SECONDS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone)]
pub(crate) enum EmailProvider {
    Console,
    Smtp {
        host: String,
        port: u16,
        username: String,
        password: String,
        from_address: String,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct WorkerConfig {
    pub(crate) database_url: String,
    pub(crate) redis_url: Option<String>,
    pub(crate) liveness_base_url: Option<String>,
    pub(crate) worker_id: String,
    pub(crate) queue: String,
    pub(crate) claim_limit: usize,
    pub(crate) lease_seconds: u32,
    pub(crate) poll_interval_ms: u64,
    pub(crate) retry_delay_seconds: u32,
    pub(crate) request_log_ttl_seconds: u64,
    pub(crate) alert_recipients: Vec<EmailAddress>,
    pub(crate) email_provider: EmailProvider,
    pub(crate) locker: LockerConfig,
}

impl WorkerConfig {
    pub(crate) fn load() -> AppResult<Self> {
        let database_url = required_env("DATABASE_URL")?;
        let redis_url = optional_env("REDIS_URL");
        let liveness_base_url = optional_env("LIVENESS_BASE_URL");
        let worker_id = optional_env("WORKER_ID")
            .unwrap_or_else(|| format!("worker-{}", std::process::id()));
        let queue = optional_env("WORKER_QUEUE").unwrap_or_else(|| "default".to_owned());
        let claim_limit = parse_env("WORKER_CLAIM_LIMIT", 10_usize)?;
        let lease_seconds = parse_env("WORKER_LEASE_SECONDS", 660_u32)?;
        let poll_interval_ms = parse_env("WORKER_POLL_INTERVAL_MS", 1500_u64)?;
        let retry_delay_seconds = parse_env("WORKER_RETRY_DELAY_SECONDS", 15_u32)?;

        if claim_limit == 0 {
            return Err(AppError::Validation(
                "WORKER_CLAIM_LIMIT must be greater than zero".to_owned(),
            ));
        }

        if lease_seconds == 0 {
            return Err(AppError::Validation(
                "WORKER_LEASE_SECONDS must be greater than zero".to_owned(),
            ));
        }

        if poll_interval_ms == 0 {
            return Err(AppError::Validation(
                "WORKER_POLL_INTERVAL_MS must be greater than zero".to_owned(),
            ));
        }

        let locker = load_locker_config(queue.as_str())?;
        // Request records must outlive the lease timeout, and any pause in
        // redelivery, to be useful.
        let request_log_ttl_seconds = parse_env(
            "REQUEST_LOG_TTL_SECONDS",
            u64::try_from(locker.lease_timeout.num_seconds())
                .unwrap_or(0)
                .saturating_mul(2)
                .max(DEFAULT_REQUEST_LOG_TTL_SECONDS),
        )?;

        let alert_recipients = optional_env("ALERT_EMAIL_TO")
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|address| !address.is_empty())
                    .map(EmailAddress::new)
                    .collect::<AppResult<Vec<_>>>()
            })
            .transpose()?
            .unwrap_or_default();
        let email_provider = load_email_provider()?;

        Ok(Self {
            database_url,
            redis_url,
            liveness_base_url,
            worker_id,
            queue,
            claim_limit,
            lease_seconds,
            poll_interval_ms,
            retry_delay_seconds,
            request_log_ttl_seconds,
            alert_recipients,
            email_provider,
            locker,
        })
    }
}

fn load_locker_config(queue: &str) -> AppResult<LockerConfig> {
    let defaults = LockerConfig::default();
    let mut config = defaults
        .clone()
        .with_lease_duration(Duration::seconds(parse_env(
            "LOCK_LEASE_DURATION_SECONDS",
            defaults.lease_duration.num_seconds(),
        )?))
        .with_lease_timeout(Duration::seconds(parse_env(
            "LOCK_LEASE_TIMEOUT_SECONDS",
            defaults.lease_timeout.num_seconds(),
        )?))
        .with_request_deadline(Duration::seconds(parse_env(
            "LOCK_REQUEST_DEADLINE_SECONDS",
            defaults.request_deadline.num_seconds(),
        )?))
        .with_max_retries(parse_env("LOCK_MAX_RETRIES", defaults.max_retries)?)
        .with_default_queue(queue);

    if parse_env("LOCK_ALERT_ON_FAILURE", false)? {
        config = config.with_alert_on_failure();
    }
    if parse_env("LOCK_ALERT_ON_OVERWRITE", false)? {
        config = config.with_alert_on_overwrite();
    }
    if parse_env("LOCK_LOG_VERBOSE", false)? {
        config = config.with_log_verbose();
    }

    config.validate()?;
    Ok(config)
}

fn load_email_provider() -> AppResult<EmailProvider> {
    let provider = optional_env("EMAIL_PROVIDER").unwrap_or_else(|| "console".to_owned());

    match provider.to_ascii_lowercase().as_str() {
        "console" => Ok(EmailProvider::Console),
        "smtp" => Ok(EmailProvider::Smtp {
            host: required_env("SMTP_HOST")?,
            port: parse_env("SMTP_PORT", 587_u16)?,
            username: required_env("SMTP_USERNAME")?,
            password: required_env("SMTP_PASSWORD")?,
            from_address: required_env("SMTP_FROM_ADDRESS")?,
        }),
        other => Err(AppError::Validation(format!(
            "EMAIL_PROVIDER must be 'console' or 'smtp', got '{other}'"
        ))),
    }
}

fn required_env(name: &str) -> AppResult<String> {
    env::var(name).map_err(|_| AppError::Validation(format!("{name} is required")))
}

fn optional_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_env<T>(name: &str, default: T) -> AppResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) => value.trim().parse::<T>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}
