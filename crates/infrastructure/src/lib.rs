//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod console_email_service;
mod email_alert_sink;
mod http_liveness_oracle;
mod in_memory_entity_store;
mod in_memory_request_log;
mod in_memory_task_queue;
mod log_alert_sink;
mod postgres_entity_store;
mod postgres_task_queue;
mod redis_request_log;
mod smtp_email_service;

use chainlock_core::{AppError, AppResult};
use sqlx::PgPool;
use sqlx::migrate::Migrator;

pub use console_email_service::ConsoleEmailService;
pub use email_alert_sink::EmailAlertSink;
pub use http_liveness_oracle::HttpLivenessOracle;
pub use in_memory_entity_store::InMemoryEntityStore;
pub use in_memory_request_log::InMemoryRequestLog;
pub use in_memory_task_queue::InMemoryTaskQueue;
pub use log_alert_sink::LogAlertSink;
pub use postgres_entity_store::PostgresEntityStore;
pub use postgres_task_queue::PostgresTaskQueue;
pub use redis_request_log::RedisRequestLog;
pub use smtp_email_service::{SmtpEmailConfig, SmtpEmailService};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Applies the lock and task table migrations.
pub async fn run_migrations(pool: &PgPool) -> AppResult<()> {
    MIGRATOR.run(pool).await.map_err(|error| {
        AppError::Internal(format!("failed to run database migrations: {error}"))
    })
}
