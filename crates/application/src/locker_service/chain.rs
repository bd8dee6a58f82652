use chainlock_domain::TaskEnvelope;

use super::*;

impl Locker {
    /// Advances the chain by one step and enqueues the task for it.
    ///
    /// The entity write and the enqueue commit together. Store and queue
    /// errors are returned as they are; `AppError::LockLost` means the stored
    /// lock no longer matches the one held in `entity`. On error the lock in
    /// `entity` is restored.
    pub async fn schedule<E>(
        &self,
        key: &EntityKey,
        entity: &mut E,
        next: NextTask,
    ) -> AppResult<QueuedTask>
    where
        E: ChainEntity,
    {
        if entity.lock().is_complete() {
            return Err(AppError::Validation(format!(
                "entity '{key}' has completed its chain and cannot schedule more tasks"
            )));
        }

        let held = entity.lock().clone();
        let now = self.clock.now();
        let sequence = entity.lock_mut().advance(now);
        let queue = self.config.queue_for(next.queue.as_deref()).to_owned();

        let task = TaskEnvelope::new(key.clone(), sequence).and_then(|envelope| {
            QueuedTask::for_envelope(queue, next.target, next.params, &envelope, now)
        });
        let result = match task {
            Ok(task) => self
                .write_fenced(key, &*entity, &held, Some(&task))
                .await
                .map(|()| task),
            Err(build_error) => Err(build_error),
        };

        match result {
            Ok(task) => {
                debug!(
                    key = %key,
                    sequence,
                    queue = %task.queue,
                    target = %task.target,
                    task_id = %task.task_id,
                    "scheduled next task"
                );
                Ok(task)
            }
            Err(schedule_error) => {
                *entity.lock_mut() = held;
                Err(schedule_error)
            }
        }
    }

    /// Marks the chain complete. No task is enqueued.
    ///
    /// Completing an already completed entity rewrites the terminal state.
    /// On error the lock in `entity` is restored; changes made by an
    /// overridden [`Lockable::mark_complete`] to other fields are kept.
    pub async fn complete<E>(&self, key: &EntityKey, entity: &mut E) -> AppResult<()>
    where
        E: ChainEntity,
    {
        let held = entity.lock().clone();
        let now = self.clock.now();
        entity.mark_complete(now);

        if !entity.lock().is_complete() {
            *entity.lock_mut() = held;
            return Err(AppError::Internal(format!(
                "mark_complete on entity '{key}' did not complete the lock"
            )));
        }

        match self.write_fenced(key, &*entity, &held, None).await {
            Ok(()) => {
                debug!(key = %key, "task chain completed");
                Ok(())
            }
            Err(complete_error) => {
                *entity.lock_mut() = held;
                Err(complete_error)
            }
        }
    }

    /// Writes `entity` if the stored lock still matches `held`, together with
    /// an optional task enqueue.
    async fn write_fenced<E>(
        &self,
        key: &EntityKey,
        entity: &E,
        held: &Lock,
        task: Option<&QueuedTask>,
    ) -> AppResult<()>
    where
        E: ChainEntity,
    {
        let attempts = self.config.transaction_attempts;
        let mut last_conflict = None;

        for attempt in 1..=attempts {
            let mut transaction = Transaction::new(self.store.as_ref());
            let stored = transaction.get::<E>(key).await?;
            ensure_lock_held(key, stored.as_ref().map(|stored| stored.lock()), held)?;

            transaction.put(key, entity)?;
            if let Some(task) = task {
                transaction.enqueue(task.clone());
            }

            match transaction.commit().await {
                Ok(()) => return Ok(()),
                Err(AppError::Conflict(message)) => {
                    debug!(key = %key, attempt, "chain write conflicted, retrying");
                    last_conflict = Some(message);
                }
                Err(commit_error) => return Err(commit_error),
            }
        }

        Err(exhausted(key, attempts, last_conflict))
    }
}
