//! Release types shared with release services

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bundle::Bundle;

/// A release as currently known to the release service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownRelease {
    /// Prefixed release name
    pub name: String,

    pub namespace: String,

    /// Revision number
    pub version: u32,

    pub status: ReleaseStatus,

    /// Bundle installed by the last deploy
    pub bundle: Bundle,

    /// Values used by the last deploy, raw YAML
    pub raw_values: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_deployed: Option<DateTime<Utc>>,
}

/// Release status as recorded by the release service
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ReleaseStatus {
    Deployed,
    Failed,
    /// Uninstalled without purge; the record is kept
    Uninstalled,
}

impl ReleaseStatus {
    /// Statuses that make a release eligible for purge before a sync
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl std::fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Deployed => "deployed",
            Self::Failed => "failed",
            Self::Uninstalled => "uninstalled",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ReleaseStatus::Uninstalled).unwrap();
        assert_eq!(json, "\"uninstalled\"");
        assert_eq!(ReleaseStatus::Uninstalled.to_string(), "uninstalled");

        let status: ReleaseStatus = serde_json::from_str("\"failed\"").unwrap();
        assert!(status.is_failed());
        assert!(!ReleaseStatus::Deployed.is_failed());
    }
}
