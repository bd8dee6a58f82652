use super::*;

impl Locker {
    /// Releases the lease after the step's handler failed and counts the
    /// failure.
    ///
    /// Once the step has failed `max_retries` times the store is left alone,
    /// operators are alerted when configured, and the task is abandoned.
    pub async fn clear_lock<E>(&self, key: &EntityKey, entity: &mut E) -> Result<(), LockError>
    where
        E: ChainEntity,
    {
        if entity.lock().retries >= self.config.max_retries {
            warn!(
                key = %key,
                sequence = entity.lock().sequence,
                retries = entity.lock().retries,
                "task failed permanently"
            );
            if self.config.alert_on_failure {
                self.alert(key, &*entity, AlertReason::PermanentTaskFailure)
                    .await;
            }
            return Err(LockError::TaskFailedPermanently);
        }

        match self.release_failed_lease(key, entity).await {
            Ok(()) => Ok(()),
            Err(release_error) => {
                warn!(
                    key = %key,
                    error = %release_error,
                    "failed to clear lock"
                );
                Err(LockError::LockFailed)
            }
        }
    }

    async fn release_failed_lease<E>(&self, key: &EntityKey, entity: &mut E) -> AppResult<()>
    where
        E: ChainEntity,
    {
        let owner_id = entity.lock().owner_id.clone();
        let attempts = self.config.transaction_attempts;
        let mut last_conflict = None;

        for attempt in 1..=attempts {
            let now = self.clock.now();
            let mut transaction = Transaction::new(self.store.as_ref());
            *entity = transaction.get_existing(key).await?;

            if entity.lock().owner_id != owner_id {
                debug!(
                    key = %key,
                    owner_id = %owner_id,
                    "lease no longer held, leaving lock untouched"
                );
                return Ok(());
            }

            entity.lock_mut().release_after_failure(now);
            transaction.put(key, &*entity)?;

            match transaction.commit().await {
                Ok(()) => {
                    debug!(
                        key = %key,
                        retries = entity.lock().retries,
                        "lock cleared after failure"
                    );
                    return Ok(());
                }
                Err(AppError::Conflict(message)) => {
                    debug!(key = %key, attempt, "lock clear conflicted, retrying");
                    last_conflict = Some(message);
                }
                Err(commit_error) => return Err(commit_error),
            }
        }

        Err(exhausted(key, attempts, last_conflict))
    }
}
