//! Strongly-typed identifiers used across the notification subsystem.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of a notification job.
///
/// Jobs arrive over the wire with caller-chosen ids, so this wraps an opaque
/// token rather than a parsed UUID. An empty id means "not assigned yet"; the
/// enqueuer replaces it with [`JobId::generate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Create a fresh identifier.
    ///
    /// Uses UUIDv7 (time-ordered) so ids sort roughly by creation time.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// The unassigned id.
    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl core::fmt::Display for JobId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(value: Uuid) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl FromStr for JobId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid_id("JobId: empty"));
        }
        if trimmed.contains(char::is_whitespace) {
            return Err(DomainError::invalid_id(format!("JobId: contains whitespace: {s:?}")));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique_and_non_empty() {
        let a = JobId::generate();
        let b = JobId::generate();
        assert!(!a.is_empty());
        assert_ne!(a, b);
    }

    #[test]
    fn empty_id_reports_empty() {
        assert!(JobId::empty().is_empty());
        assert!(JobId::default().is_empty());
        assert!(JobId::from("   ").is_empty());
    }

    #[test]
    fn parse_rejects_blank_and_whitespace() {
        assert!("".parse::<JobId>().is_err());
        assert!("a b".parse::<JobId>().is_err());
        assert_eq!("job-1".parse::<JobId>().unwrap().as_str(), "job-1");
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = JobId::from("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
    }
}
