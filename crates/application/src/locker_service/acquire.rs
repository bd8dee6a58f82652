use chrono::{DateTime, Utc};

use super::*;

impl Locker {
    /// Attempts to take the lease on the entity at `key` for one chain step.
    ///
    /// On success `entity` holds the stored entity with the lease recorded
    /// for `request_id`. The call never waits for a busy lock: the queue's
    /// redelivery is the retry loop.
    pub async fn acquire<E>(
        &self,
        request_id: &RequestId,
        key: &EntityKey,
        entity: &mut E,
        sequence: i64,
    ) -> Result<(), LockError>
    where
        E: ChainEntity,
    {
        let now = self.clock.now();

        let claimed = match self
            .try_claim(request_id, key, entity, sequence, now)
            .await
        {
            Ok(claimed) => claimed,
            Err(claim_error) => {
                warn!(
                    key = %key,
                    request_id = %request_id,
                    sequence,
                    error = %claim_error,
                    "lock transaction failed"
                );
                return Err(LockError::LockFailed);
            }
        };

        if claimed {
            debug!(key = %key, request_id = %request_id, sequence, "lock acquired");
            return Ok(());
        }

        let lock = entity.lock().clone();
        debug!(
            key = %key,
            request_id = %request_id,
            lock_timestamp = %lock.timestamp,
            lock_sequence = lock.sequence,
            lock_retries = lock.retries,
            lock_owner = %lock.owner_id,
            "lock already held"
        );

        // Expiry comes before staleness: a late task must never be mistaken
        // for a dead one.
        if lock.has_moved_past(sequence) {
            return Err(LockError::TaskExpired);
        }

        let age = lock.age(now);
        if age < self.config.lease_duration {
            return Err(LockError::LockFailed);
        }

        if age < self.config.lease_timeout {
            debug!(key = %key, lock_owner = %lock.owner_id, "lease past duration, waiting for timeout");
            return Err(LockError::LockFailed);
        }

        // Unlocked behind the expected step: the previous step's write is not
        // visible yet.
        if lock.is_unlocked() {
            return Err(LockError::LockFailed);
        }

        if !self.previous_request_finished(&lock.owner_id).await {
            return Err(LockError::LockFailed);
        }

        match self
            .overwrite(request_id, key, entity, &lock.owner_id)
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => Err(LockError::LockFailed),
            Err(overwrite_error) => {
                warn!(
                    key = %key,
                    request_id = %request_id,
                    error = %overwrite_error,
                    "lock overwrite failed"
                );
                Err(LockError::LockFailed)
            }
        }
    }

    /// Reads the entity and claims it when it is free at `sequence`.
    /// Returns false, without writing, when the lock is not claimable.
    async fn try_claim<E>(
        &self,
        request_id: &RequestId,
        key: &EntityKey,
        entity: &mut E,
        sequence: i64,
        now: DateTime<Utc>,
    ) -> AppResult<bool>
    where
        E: ChainEntity,
    {
        let attempts = self.config.transaction_attempts;
        let mut last_conflict = None;

        for attempt in 1..=attempts {
            let mut transaction = Transaction::new(self.store.as_ref());
            *entity = transaction.get_existing(key).await?;

            if !entity.lock().is_claimable_at(sequence) {
                return Ok(false);
            }

            entity.lock_mut().claim(request_id.as_str(), now);
            transaction.put(key, &*entity)?;

            match transaction.commit().await {
                Ok(()) => return Ok(true),
                Err(AppError::Conflict(message)) => {
                    debug!(key = %key, attempt, "lock claim conflicted, retrying");
                    last_conflict = Some(message);
                }
                Err(commit_error) => return Err(commit_error),
            }
        }

        Err(exhausted(key, attempts, last_conflict))
    }

    /// Takes over a lease whose owner has finished. Sequence and retries are
    /// left as they are. Returns false when the stored owner is no longer
    /// `stale_owner`.
    async fn overwrite<E>(
        &self,
        request_id: &RequestId,
        key: &EntityKey,
        entity: &mut E,
        stale_owner: &str,
    ) -> AppResult<bool>
    where
        E: ChainEntity,
    {
        info!(
            key = %key,
            request_id = %request_id,
            stale_owner,
            "overwriting lock"
        );

        let attempts = self.config.transaction_attempts;
        let mut last_conflict = None;

        for attempt in 1..=attempts {
            let now = self.clock.now();
            let mut transaction = Transaction::new(self.store.as_ref());
            *entity = transaction.get_existing(key).await?;

            if entity.lock().owner_id != stale_owner {
                debug!(key = %key, "lock changed hands before overwrite");
                return Ok(false);
            }

            entity.lock_mut().take_over(request_id.as_str(), now);
            transaction.put(key, &*entity)?;

            match transaction.commit().await {
                Ok(()) => {
                    if self.config.alert_on_overwrite {
                        self.alert(key, &*entity, AlertReason::LockOverwrite).await;
                    }
                    return Ok(true);
                }
                Err(AppError::Conflict(message)) => {
                    debug!(key = %key, attempt, "lock overwrite conflicted, retrying");
                    last_conflict = Some(message);
                }
                Err(commit_error) => return Err(commit_error),
            }
        }

        Err(exhausted(key, attempts, last_conflict))
    }
}
