//! Operator alert types.

use std::fmt::{Display, Formatter};

use chainlock_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::EntityKey;

/// Why operators are being alerted about a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertReason {
    /// A chain step exhausted its retries and was abandoned.
    PermanentTaskFailure,
    /// A stale lease was taken over from a finished owner.
    LockOverwrite,
}

impl AlertReason {
    /// Returns the human readable alert subject.
    #[must_use]
    pub fn subject(&self) -> &'static str {
        match self {
            Self::PermanentTaskFailure => "Permanent task failure",
            Self::LockOverwrite => "Lock overwrite",
        }
    }
}

impl Display for AlertReason {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.subject())
    }
}

/// One alert raised by the locker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockAlert {
    /// Entity the alert concerns.
    pub key: EntityKey,
    /// Alert reason.
    pub reason: AlertReason,
    /// Entity snapshot at the time of the alert.
    pub entity: Value,
}

impl LockAlert {
    /// Renders the plain-text alert body.
    #[must_use]
    pub fn body(&self) -> String {
        format!("key: {}, entity: {}", self.key, self.entity)
    }
}

/// Validated email address of an alert recipient.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmailAddress(String);

impl EmailAddress {
    /// Creates a validated email address.
    ///
    /// Performs basic structural validation: non-empty, contains exactly one `@`,
    /// local part and domain are non-empty, domain contains at least one `.`.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        let trimmed = value.trim().to_lowercase();

        if trimmed.is_empty() {
            return Err(AppError::Validation(
                "email address must not be empty".to_owned(),
            ));
        }

        let Some((local, domain)) = trimmed.split_once('@') else {
            return Err(AppError::Validation(
                "email address must contain exactly one '@'".to_owned(),
            ));
        };

        if local.is_empty() || domain.contains('@') {
            return Err(AppError::Validation(
                "email local part must not be empty and '@' must appear once".to_owned(),
            ));
        }

        if domain.is_empty() || !domain.contains('.') {
            return Err(AppError::Validation(
                "email domain must contain at least one '.'".to_owned(),
            ));
        }

        if trimmed.len() > 254 {
            return Err(AppError::Validation(
                "email address must not exceed 254 characters".to_owned(),
            ));
        }

        Ok(Self(trimmed))
    }

    /// Returns the validated email string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn valid_email_is_normalised() {
        let email = EmailAddress::new("Ops@Example.COM");
        assert!(email.is_ok());
        assert_eq!(
            email.unwrap_or_else(|_| unreachable!()).as_str(),
            "ops@example.com"
        );
    }

    #[test]
    fn malformed_emails_are_rejected() {
        assert!(EmailAddress::new("").is_err());
        assert!(EmailAddress::new("noatsign").is_err());
        assert!(EmailAddress::new("ops@nodot").is_err());
        assert!(EmailAddress::new("a@b@example.com").is_err());
    }

    #[test]
    fn alert_body_names_key_and_entity() {
        let alert = LockAlert {
            key: EntityKey::new("counter", "1").unwrap_or_else(|_| unreachable!()),
            reason: AlertReason::LockOverwrite,
            entity: json!({"lock_seq": 2}),
        };

        assert_eq!(alert.reason.to_string(), "Lock overwrite");
        assert_eq!(alert.body(), r#"key: counter/1, entity: {"lock_seq":2}"#);
    }
}
