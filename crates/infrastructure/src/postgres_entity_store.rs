use async_trait::async_trait;
use chainlock_application::{EntityStore, ExpectedVersion, VersionedEntity, WriteBatch};
use chainlock_core::{AppError, AppResult};
use chainlock_domain::EntityKey;
use serde_json::Value;
use sqlx::{FromRow, PgPool};

use crate::postgres_task_queue::insert_task;

/// PostgreSQL-backed entity store over the `lock_entities` table.
///
/// A batch commits in one SQL transaction: guarded entity writes first, then
/// the task rows for [`crate::PostgresTaskQueue`].
#[derive(Clone)]
pub struct PostgresEntityStore {
    pool: PgPool,
}

impl PostgresEntityStore {
    /// Creates an entity store with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct EntityRow {
    value: Value,
    version: i64,
}

#[async_trait]
impl EntityStore for PostgresEntityStore {
    async fn load(&self, key: &EntityKey) -> AppResult<Option<VersionedEntity>> {
        let row = sqlx::query_as::<_, EntityRow>(
            r#"
            SELECT value, version
            FROM lock_entities
            WHERE kind = $1 AND name = $2
            "#,
        )
        .bind(key.kind())
        .bind(key.name())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to load entity '{key}': {error}")))?;

        Ok(row.map(|row| VersionedEntity {
            value: row.value,
            version: row.version,
        }))
    }

    async fn commit(&self, batch: WriteBatch) -> AppResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Unavailable(format!("failed to start entity transaction: {error}"))
        })?;

        for write in &batch.writes {
            let key = &write.key;
            let result = match write.expected {
                ExpectedVersion::Absent => {
                    sqlx::query(
                        r#"
                        INSERT INTO lock_entities (kind, name, value, version)
                        VALUES ($1, $2, $3, 1)
                        ON CONFLICT (kind, name)
                        DO NOTHING
                        "#,
                    )
                    .bind(key.kind())
                    .bind(key.name())
                    .bind(&write.value)
                    .execute(&mut *transaction)
                    .await
                }
                ExpectedVersion::Exactly(version) => {
                    sqlx::query(
                        r#"
                        UPDATE lock_entities
                        SET
                            value = $3,
                            version = version + 1,
                            updated_at = now()
                        WHERE kind = $1
                          AND name = $2
                          AND version = $4
                        "#,
                    )
                    .bind(key.kind())
                    .bind(key.name())
                    .bind(&write.value)
                    .bind(version)
                    .execute(&mut *transaction)
                    .await
                }
            }
            .map_err(|error| {
                AppError::Internal(format!("failed to write entity '{key}': {error}"))
            })?;

            if result.rows_affected() == 0 {
                return Err(AppError::Conflict(format!(
                    "entity '{key}' was modified concurrently"
                )));
            }
        }

        for task in &batch.tasks {
            insert_task(&mut transaction, task).await?;
        }

        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!("failed to commit entity transaction: {error}"))
        })?;

        Ok(())
    }
}
