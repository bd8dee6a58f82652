use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Sequence value persisted once a chain has completed.
pub const COMPLETED_SEQUENCE: i64 = -1;

/// Lock state embedded in every entity that takes part in a task chain.
///
/// The task queue delivers at least once, so a task may run twice or two
/// copies may race. The lock records which request currently holds the
/// lease and which chain step the entity expects next, which lets a late or
/// duplicated task recognise that it is obsolete and lets a stuck lease be
/// reclaimed once its owner is known to be gone.
///
/// Entities embed it by composition:
///
/// ```
/// use chainlock_domain::{Lock, Lockable};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Export {
///     #[serde(flatten)]
///     lock: Lock,
///     rows_written: u64,
/// }
///
/// impl Lockable for Export {
///     fn lock(&self) -> &Lock {
///         &self.lock
///     }
///
///     fn lock_mut(&mut self) -> &mut Lock {
///         &mut self.lock
///     }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    /// Time this lock state was last written.
    #[serde(rename = "lock_ts")]
    pub timestamp: DateTime<Utc>,
    /// Request holding the lease, empty when unlocked.
    #[serde(rename = "lock_req", default)]
    pub owner_id: String,
    /// Chain position. [`COMPLETED_SEQUENCE`] marks a finished chain.
    #[serde(rename = "lock_seq", default)]
    pub sequence: i64,
    /// Handler failures recorded for the current step.
    #[serde(rename = "lock_try", default)]
    pub retries: u32,
}

impl Default for Lock {
    fn default() -> Self {
        Self {
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            owner_id: String::new(),
            sequence: 0,
            retries: 0,
        }
    }
}

impl Lock {
    /// Creates an unlocked lock at sequence zero.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            timestamp: now,
            ..Self::default()
        }
    }

    /// Returns true when no request holds the lease.
    #[must_use]
    pub fn is_unlocked(&self) -> bool {
        self.owner_id.is_empty()
    }

    /// Returns true once the chain has completed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.sequence == COMPLETED_SEQUENCE
    }

    /// Returns true when a task carrying `sequence` may claim this lock.
    #[must_use]
    pub fn is_claimable_at(&self, sequence: i64) -> bool {
        self.is_unlocked() && !self.is_complete() && self.sequence == sequence
    }

    /// Returns true when the chain has already moved past `sequence`.
    #[must_use]
    pub fn has_moved_past(&self, sequence: i64) -> bool {
        self.is_complete() || self.sequence > sequence
    }

    /// Returns how long the current state has been in place.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.timestamp)
    }

    /// Claims the lease for `owner_id`.
    pub fn claim(&mut self, owner_id: &str, now: DateTime<Utc>) {
        self.owner_id = owner_id.to_owned();
        self.timestamp = now;
    }

    /// Hands the lease to `owner_id` without moving the chain.
    pub fn take_over(&mut self, owner_id: &str, now: DateTime<Utc>) {
        self.claim(owner_id, now);
    }

    /// Releases the lease after a failed handler run and counts the failure.
    pub fn release_after_failure(&mut self, now: DateTime<Utc>) {
        self.owner_id.clear();
        self.retries = self.retries.saturating_add(1);
        self.timestamp = now;
    }

    /// Moves the chain to the next step and returns the new sequence.
    pub fn advance(&mut self, now: DateTime<Utc>) -> i64 {
        self.owner_id.clear();
        self.retries = 0;
        self.sequence = self.sequence.saturating_add(1);
        self.timestamp = now;
        self.sequence
    }

    /// Marks the chain as finished.
    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.owner_id.clear();
        self.retries = 0;
        self.sequence = COMPLETED_SEQUENCE;
        self.timestamp = now;
    }
}

/// Capability of entities that embed a [`Lock`].
pub trait Lockable {
    /// Returns the embedded lock state.
    fn lock(&self) -> &Lock;

    /// Returns the embedded lock state for mutation.
    fn lock_mut(&mut self) -> &mut Lock;

    /// Marks the entity complete.
    ///
    /// Override to run entity-specific completion bookkeeping; overrides must
    /// still leave the lock in its completed state.
    fn mark_complete(&mut self, now: DateTime<Utc>) {
        self.lock_mut().complete(now);
    }
}

impl Lockable for Lock {
    fn lock(&self) -> &Lock {
        self
    }

    fn lock_mut(&mut self) -> &mut Lock {
        self
    }
}
