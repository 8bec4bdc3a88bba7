//! Artifact types.

use crate::ids::{JobInstanceId, RunId};
use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// SHA-256 digest of an artifact's content, lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.0)
    }
}

/// How long an artifact outlives its run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Collected when the run is archived.
    #[default]
    Run,
    /// Kept for this many days after creation.
    Days(u32),
}

impl RetentionPolicy {
    pub fn expires_at(&self, created_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            RetentionPolicy::Run => None,
            RetentionPolicy::Days(days) => Some(created_at + Duration::days(i64::from(*days))),
        }
    }
}

/// A committed artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ArtifactMeta {
    pub name: String,
    pub run_id: RunId,
    pub producer: JobInstanceId,
    pub digest: ContentHash,
    pub size_bytes: u64,
    pub retention: RetentionPolicy,
    pub created_at: DateTime<Utc>,
}

/// An upstream artifact resolved for a consumer before dispatch.
#[derive(Debug, Clone)]
pub struct ResolvedInput {
    pub meta: ArtifactMeta,
    pub data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retention_expiry() {
        let now = Utc::now();
        assert_eq!(RetentionPolicy::Run.expires_at(now), None);
        assert_eq!(
            RetentionPolicy::Days(7).expires_at(now),
            Some(now + Duration::days(7))
        );
    }
}
