//! Chainlock task worker runtime.

#![forbid(unsafe_code)]

mod config;
mod counter;

use std::env;
use std::sync::Arc;
use std::time::Duration;

use chainlock_application::{
    AlertSink, DeliveredTask, EmailService, LivenessOracle, Locker, NextTask, RequestLog,
    TaskDispatcher, TaskQueue, TaskRouter,
};
use chainlock_core::{AppError, AppResult};
use chainlock_domain::EntityKey;
use chainlock_infrastructure::{
    ConsoleEmailService, EmailAlertSink, HttpLivenessOracle, InMemoryRequestLog, LogAlertSink,
    PostgresEntityStore, PostgresTaskQueue, RedisRequestLog, SmtpEmailConfig, SmtpEmailService,
    run_migrations,
};
use chrono::Utc;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{EmailProvider, WorkerConfig};
use crate::counter::{COUNTER_KIND, COUNTER_TARGET, Counter, CounterHandler};

enum Command {
    Migrate,
    Start { name: String, limit: u64 },
    Run,
}

impl Command {
    fn parse(mut args: impl Iterator<Item = String>) -> AppResult<Self> {
        match args.next().as_deref() {
            None => Ok(Self::Run),
            Some("migrate") => Ok(Self::Migrate),
            Some("start") => {
                let name = args.next().ok_or_else(|| {
                    AppError::Validation("usage: chainlock-worker start <name> <limit>".to_owned())
                })?;
                let limit = args
                    .next()
                    .ok_or_else(|| {
                        AppError::Validation(
                            "usage: chainlock-worker start <name> <limit>".to_owned(),
                        )
                    })?
                    .parse::<u64>()
                    .map_err(|error| {
                        AppError::Validation(format!("invalid counter limit: {error}"))
                    })?;

                if limit == 0 {
                    return Err(AppError::Validation(
                        "counter limit must be greater than zero".to_owned(),
                    ));
                }

                Ok(Self::Start { name, limit })
            }
            Some(other) => Err(AppError::Validation(format!(
                "unknown command '{other}', expected 'migrate' or 'start <name> <limit>'"
            ))),
        }
    }
}

struct RequestTracking {
    liveness: Arc<dyn LivenessOracle>,
    request_log: Option<Arc<dyn RequestLog>>,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let command = Command::parse(env::args().skip(1))?;
    let config = WorkerConfig::load()?;
    let pool = connect_pool(config.database_url.as_str()).await?;

    match command {
        Command::Migrate => {
            run_migrations(&pool).await?;
            info!("database migrations applied");
            Ok(())
        }
        Command::Start { name, limit } => {
            let locker = build_locker(&config, pool)?.0;
            start_counter(&locker, &config, name.as_str(), limit).await
        }
        Command::Run => run(&config, pool).await,
    }
}

async fn run(config: &WorkerConfig, pool: PgPool) -> AppResult<()> {
    let queue = PostgresTaskQueue::new(pool.clone());
    let (locker, request_log) = build_locker(config, pool)?;
    let mut dispatcher = TaskDispatcher::new(locker);
    if let Some(request_log) = request_log {
        dispatcher = dispatcher.with_request_log(request_log);
    }
    let router = TaskRouter::new(dispatcher).route(COUNTER_TARGET, Arc::new(CounterHandler));

    info!(
        worker_id = %config.worker_id,
        queue = %config.queue,
        claim_limit = config.claim_limit,
        lease_seconds = config.lease_seconds,
        poll_interval_ms = config.poll_interval_ms,
        "chainlock-worker started"
    );

    loop {
        let claimed = match queue
            .claim(
                config.queue.as_str(),
                config.worker_id.as_str(),
                config.claim_limit,
                config.lease_seconds,
            )
            .await
        {
            Ok(claimed) => claimed,
            Err(error) => {
                warn!(
                    worker_id = %config.worker_id,
                    error = %error,
                    "failed to claim tasks"
                );
                tokio::time::sleep(Duration::from_millis(config.poll_interval_ms)).await;
                continue;
            }
        };

        if claimed.is_empty() {
            tokio::time::sleep(Duration::from_millis(config.poll_interval_ms)).await;
            continue;
        }

        info!(
            worker_id = %config.worker_id,
            claimed_count = claimed.len(),
            "claimed tasks"
        );

        for delivery in claimed {
            let report = router.dispatch(&delivery).await;
            settle(&queue, config, &delivery, report.outcome.should_retry()).await;
        }
    }
}

async fn settle(
    queue: &PostgresTaskQueue,
    config: &WorkerConfig,
    delivery: &DeliveredTask,
    retry: bool,
) {
    let settled = if retry {
        queue.release(delivery, config.retry_delay_seconds).await
    } else {
        queue.acknowledge(delivery).await
    };

    if let Err(error) = settled {
        warn!(
            worker_id = %config.worker_id,
            task_id = %delivery.task.task_id,
            retry,
            error = %error,
            "failed to settle task delivery"
        );
    }
}

async fn start_counter(
    locker: &Locker,
    config: &WorkerConfig,
    name: &str,
    limit: u64,
) -> AppResult<()> {
    let key = EntityKey::new(COUNTER_KIND, name)?;
    let mut counter = Counter::new(limit, Utc::now());
    let task = locker
        .start(
            &key,
            &mut counter,
            NextTask::new(COUNTER_TARGET).on_queue(config.queue.as_str()),
        )
        .await?;

    info!(key = %key, limit, task_id = %task.task_id, queue = %task.queue, "counter chain started");
    Ok(())
}

fn build_locker(
    config: &WorkerConfig,
    pool: PgPool,
) -> AppResult<(Locker, Option<Arc<dyn RequestLog>>)> {
    let store = Arc::new(PostgresEntityStore::new(pool));
    let tracking = build_request_tracking(config)?;
    let alerts = build_alert_sink(config)?;

    let locker = Locker::new(config.locker.clone(), store, tracking.liveness, alerts)?;
    Ok((locker, tracking.request_log))
}

fn build_request_tracking(config: &WorkerConfig) -> AppResult<RequestTracking> {
    if let Some(redis_url) = &config.redis_url {
        let client = redis::Client::open(redis_url.as_str())
            .map_err(|error| AppError::Validation(format!("invalid REDIS_URL: {error}")))?;
        let request_log = Arc::new(RedisRequestLog::new(
            client,
            "chainlock:requests",
            config.request_log_ttl_seconds,
            request_deadline_seconds(config),
        )?);

        return Ok(RequestTracking {
            liveness: request_log.clone(),
            request_log: Some(request_log),
        });
    }

    if let Some(base_url) = &config.liveness_base_url {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|error| AppError::Internal(format!("failed to build HTTP client: {error}")))?;

        return Ok(RequestTracking {
            liveness: Arc::new(HttpLivenessOracle::new(http_client, base_url.as_str())?),
            request_log: None,
        });
    }

    warn!("neither REDIS_URL nor LIVENESS_BASE_URL is set, request log is process-local");
    let request_log =
        Arc::new(InMemoryRequestLog::new().with_deadline(config.locker.request_deadline));
    Ok(RequestTracking {
        liveness: request_log.clone(),
        request_log: Some(request_log),
    })
}

fn request_deadline_seconds(config: &WorkerConfig) -> u64 {
    u64::try_from(config.locker.request_deadline.num_seconds())
        .unwrap_or(0)
        .max(1)
}

fn build_alert_sink(config: &WorkerConfig) -> AppResult<Arc<dyn AlertSink>> {
    if config.alert_recipients.is_empty() {
        return Ok(Arc::new(LogAlertSink));
    }

    let email_service: Arc<dyn EmailService> = match &config.email_provider {
        EmailProvider::Console => Arc::new(ConsoleEmailService::new()),
        EmailProvider::Smtp {
            host,
            port,
            username,
            password,
            from_address,
        } => Arc::new(SmtpEmailService::new(SmtpEmailConfig {
            host: host.clone(),
            port: *port,
            username: username.clone(),
            password: password.clone(),
            from_address: from_address.clone(),
        })?),
    };

    Ok(Arc::new(EmailAlertSink::new(
        email_service,
        config.alert_recipients.clone(),
    )?))
}

async fn connect_pool(database_url: &str) -> AppResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .map_err(|error| AppError::Unavailable(format!("failed to connect to database: {error}")))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}
