//! Domain entities and invariants.

#![forbid(unsafe_code)]

mod alert;
mod disposition;
mod envelope;
mod key;
mod lock;

pub use alert::{AlertReason, EmailAddress, LockAlert};
pub use disposition::{Disposition, LockError};
pub use envelope::{LOCK_KEY_HEADER, LOCK_SEQUENCE_HEADER, TaskEnvelope};
pub use key::EntityKey;
pub use lock::{COMPLETED_SEQUENCE, Lock, Lockable};
