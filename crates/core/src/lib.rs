//! Shared primitives for all chainlock crates.

#![forbid(unsafe_code)]

/// Request identity primitives.
pub mod request;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use request::RequestId;

/// Result type used across chainlock crates.
pub type AppResult<T> = Result<T, AppError>;

/// A validated non-empty UTF-8 string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NonEmptyString(String);

impl NonEmptyString {
    /// Creates a validated non-empty string.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(AppError::Validation(
                "value must not be empty or whitespace".to_owned(),
            ));
        }

        Ok(Self(value))
    }

    /// Returns the underlying string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl TryFrom<String> for NonEmptyString {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NonEmptyString> for String {
    fn from(value: NonEmptyString) -> Self {
        value.0
    }
}

/// Common application error categories.
///
/// These are operational failures. Lock dispositions (busy, expired,
/// permanently failed) live in the domain crate and never travel as
/// `AppError`.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid input or violated invariant.
    #[error("validation error: {0}")]
    Validation(String),

    /// Requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Optimistic write lost against a concurrent commit.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The lock protecting a write is no longer held by the writer.
    #[error("lock lost: {0}")]
    LockLost(String),

    /// A backing service could not be reached.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Internal unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns true when repeating the same operation may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::Unavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::{AppError, NonEmptyString, RequestId};

    #[test]
    fn non_empty_string_rejects_whitespace() {
        let result = NonEmptyString::new("   ");
        assert!(result.is_err());
    }

    #[test]
    fn non_empty_string_deserialization_validates() {
        let result = serde_json::from_str::<NonEmptyString>("\" \"");
        assert!(result.is_err());

        let parsed = serde_json::from_str::<NonEmptyString>("\"order\"");
        assert_eq!(
            parsed.map(String::from).unwrap_or_default(),
            "order".to_owned()
        );
    }

    #[test]
    fn generated_request_ids_are_unique() {
        let first = RequestId::generate();
        let second = RequestId::generate();
        assert_ne!(first, second);
        assert_eq!(first.as_str().len(), 36);
    }

    #[test]
    fn request_id_rejects_blank_values() {
        assert!(RequestId::new("").is_err());
        assert!(RequestId::new("req-1").is_ok());
    }

    #[test]
    fn conflicts_are_transient_but_lost_locks_are_not() {
        assert!(AppError::Conflict("version moved".to_owned()).is_transient());
        assert!(!AppError::LockLost("owner changed".to_owned()).is_transient());
        assert!(!AppError::Validation("bad".to_owned()).is_transient());
    }
}
