use std::fmt::{Display, Formatter};

use chainlock_core::{AppResult, NonEmptyString};
use serde::{Deserialize, Serialize};

/// Store key identifying one lockable entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    kind: NonEmptyString,
    name: NonEmptyString,
}

impl EntityKey {
    /// Creates a validated entity key.
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> AppResult<Self> {
        Ok(Self {
            kind: NonEmptyString::new(kind)?,
            name: NonEmptyString::new(name)?,
        })
    }

    /// Returns the entity kind.
    #[must_use]
    pub fn kind(&self) -> &str {
        self.kind.as_str()
    }

    /// Returns the entity name within its kind.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }
}

impl Display for EntityKey {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}/{}", self.kind.as_str(), self.name.as_str())
    }
}
