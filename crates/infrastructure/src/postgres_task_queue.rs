use std::collections::BTreeMap;

use async_trait::async_trait;
use chainlock_application::{DeliveredTask, QueuedTask, TaskQueue};
use chainlock_core::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgConnection, PgPool};

/// PostgreSQL-backed task queue over the `lock_tasks` table.
///
/// Acknowledged tasks are deleted. Leased tasks whose lease expired are
/// claimable again.
#[derive(Clone)]
pub struct PostgresTaskQueue {
    pool: PgPool,
}

impl PostgresTaskQueue {
    /// Creates a task queue with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct ClaimedTaskRow {
    task_id: String,
    queue: String,
    target: String,
    params: Value,
    headers: Value,
    enqueued_at: DateTime<Utc>,
    delivery_count: i32,
    lease_token: String,
}

/// Inserts one task row. Used both for direct enqueues and for tasks
/// committed with entity writes.
pub(crate) async fn insert_task(connection: &mut PgConnection, task: &QueuedTask) -> AppResult<()> {
    let headers = serde_json::to_value(&task.headers).map_err(|error| {
        AppError::Internal(format!(
            "failed to serialize headers of task '{}': {error}",
            task.task_id
        ))
    })?;

    sqlx::query(
        r#"
        INSERT INTO lock_tasks (
            task_id,
            queue,
            target,
            params,
            headers,
            enqueued_at,
            available_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $6)
        ON CONFLICT (task_id)
        DO NOTHING
        "#,
    )
    .bind(task.task_id.as_str())
    .bind(task.queue.as_str())
    .bind(task.target.as_str())
    .bind(&task.params)
    .bind(headers)
    .bind(task.enqueued_at)
    .execute(connection)
    .await
    .map_err(|error| {
        AppError::Internal(format!(
            "failed to enqueue task '{}' on queue '{}': {error}",
            task.task_id, task.queue
        ))
    })?;

    Ok(())
}

fn delivered_task_from_row(row: ClaimedTaskRow) -> AppResult<DeliveredTask> {
    let headers = serde_json::from_value::<BTreeMap<String, String>>(row.headers).map_err(
        |error| {
            AppError::Internal(format!(
                "invalid headers stored for task '{}': {error}",
                row.task_id
            ))
        },
    )?;
    let delivery_count = u32::try_from(row.delivery_count).map_err(|error| {
        AppError::Internal(format!(
            "invalid delivery_count stored for task '{}': {error}",
            row.task_id
        ))
    })?;

    Ok(DeliveredTask {
        task: QueuedTask {
            task_id: row.task_id,
            queue: row.queue,
            target: row.target,
            params: row.params,
            headers,
            enqueued_at: row.enqueued_at,
        },
        delivery_token: row.lease_token,
        delivery_count,
    })
}

#[async_trait]
impl TaskQueue for PostgresTaskQueue {
    async fn enqueue(&self, task: QueuedTask) -> AppResult<()> {
        let mut connection = self.pool.acquire().await.map_err(|error| {
            AppError::Unavailable(format!("failed to acquire database connection: {error}"))
        })?;

        insert_task(&mut connection, &task).await
    }

    async fn claim(
        &self,
        queue: &str,
        worker_id: &str,
        limit: usize,
        lease_seconds: u32,
    ) -> AppResult<Vec<DeliveredTask>> {
        if lease_seconds == 0 {
            return Err(AppError::Validation(
                "task lease_seconds must be greater than zero".to_owned(),
            ));
        }

        let rows = sqlx::query_as::<_, ClaimedTaskRow>(
            r#"
            WITH candidate_tasks AS (
                SELECT task_id
                FROM lock_tasks
                WHERE queue = $1
                  AND available_at <= now()
                  AND (
                        status = 'pending'
                        OR (status = 'leased' AND lease_expires_at < now())
                      )
                ORDER BY available_at ASC, enqueued_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE lock_tasks tasks
            SET
                status = 'leased',
                leased_by = $3,
                lease_token = gen_random_uuid()::TEXT,
                lease_expires_at = now() + make_interval(secs => $4::INT),
                delivery_count = tasks.delivery_count + 1
            FROM candidate_tasks
            WHERE tasks.task_id = candidate_tasks.task_id
            RETURNING
                tasks.task_id,
                tasks.queue,
                tasks.target,
                tasks.params,
                tasks.headers,
                tasks.enqueued_at,
                tasks.delivery_count,
                tasks.lease_token
            "#,
        )
        .bind(queue)
        .bind(i64::try_from(limit).map_err(|error| {
            AppError::Validation(format!("invalid task claim limit: {error}"))
        })?)
        .bind(worker_id)
        .bind(i32::try_from(lease_seconds).map_err(|error| {
            AppError::Validation(format!("invalid task lease_seconds: {error}"))
        })?)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to claim tasks on queue '{queue}' for worker '{worker_id}': {error}"
            ))
        })?;

        rows.into_iter().map(delivered_task_from_row).collect()
    }

    async fn acknowledge(&self, delivery: &DeliveredTask) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            DELETE FROM lock_tasks
            WHERE task_id = $1
              AND lease_token = $2
              AND status = 'leased'
            "#,
        )
        .bind(delivery.task.task_id.as_str())
        .bind(delivery.delivery_token.as_str())
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to acknowledge task '{}': {error}",
                delivery.task.task_id
            ))
        })?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "task '{}' is not leased under the given delivery token",
                delivery.task.task_id
            )));
        }

        Ok(())
    }

    async fn release(&self, delivery: &DeliveredTask, retry_after_seconds: u32) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE lock_tasks
            SET
                status = 'pending',
                available_at = now() + make_interval(secs => $3::INT),
                leased_by = NULL,
                lease_token = NULL,
                lease_expires_at = NULL
            WHERE task_id = $1
              AND lease_token = $2
              AND status = 'leased'
            "#,
        )
        .bind(delivery.task.task_id.as_str())
        .bind(delivery.delivery_token.as_str())
        .bind(i32::try_from(retry_after_seconds).map_err(|error| {
            AppError::Validation(format!("invalid task retry delay: {error}"))
        })?)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to release task '{}': {error}",
                delivery.task.task_id
            ))
        })?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "task '{}' is not leased under the given delivery token",
                delivery.task.task_id
            )));
        }

        Ok(())
    }
}
