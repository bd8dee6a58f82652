use chainlock_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

use crate::EntityKey;

/// Header carrying the JSON encoded entity key.
pub const LOCK_KEY_HEADER: &str = "X-Lock-Key";

/// Header carrying the decimal chain sequence.
pub const LOCK_SEQUENCE_HEADER: &str = "X-Lock-Seq";

/// Metadata carried by every chained task: which entity it works on and which
/// chain step it was scheduled for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    /// Entity the task operates on.
    pub key: EntityKey,
    /// Chain step the task expects the entity to be at.
    pub sequence: i64,
}

impl TaskEnvelope {
    /// Creates an envelope for one chain step.
    pub fn new(key: EntityKey, sequence: i64) -> AppResult<Self> {
        if sequence < 0 {
            return Err(AppError::Validation(format!(
                "task sequence must not be negative, got {sequence}"
            )));
        }

        Ok(Self { key, sequence })
    }

    /// Encodes the envelope as transport headers.
    pub fn to_headers(&self) -> AppResult<Vec<(&'static str, String)>> {
        let key = serde_json::to_string(&self.key).map_err(|error| {
            AppError::Internal(format!("failed to encode lock key '{}': {error}", self.key))
        })?;

        Ok(vec![
            (LOCK_KEY_HEADER, key),
            (LOCK_SEQUENCE_HEADER, self.sequence.to_string()),
        ])
    }

    /// Decodes an envelope from transport headers.
    ///
    /// `header` looks a header up by name. Lookups must be case-insensitive
    /// when the transport normalises header names.
    pub fn from_headers<'a>(header: impl Fn(&str) -> Option<&'a str>) -> AppResult<Self> {
        let raw_key = header(LOCK_KEY_HEADER).ok_or_else(|| {
            AppError::Validation(format!("task is missing the {LOCK_KEY_HEADER} header"))
        })?;
        let key = serde_json::from_str::<EntityKey>(raw_key).map_err(|error| {
            AppError::Validation(format!("invalid {LOCK_KEY_HEADER} value '{raw_key}': {error}"))
        })?;

        let raw_sequence = header(LOCK_SEQUENCE_HEADER).ok_or_else(|| {
            AppError::Validation(format!(
                "task is missing the {LOCK_SEQUENCE_HEADER} header"
            ))
        })?;
        let sequence = raw_sequence.trim().parse::<i64>().map_err(|error| {
            AppError::Validation(format!(
                "invalid {LOCK_SEQUENCE_HEADER} value '{raw_sequence}': {error}"
            ))
        })?;

        Self::new(key, sequence)
    }
}
