//! Options for a sync run

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default per-chart timeout when the caller gives none
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(900);

/// Options for a sync
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    /// Skip pre-upgrade lifecycle actions
    pub disable_update_pre: bool,

    /// Skip post-upgrade lifecycle actions
    pub disable_update_post: bool,

    /// Uninstall prefixed releases no longer declared by the manifest
    pub enable_chart_cleanup: bool,

    /// Pass dry run to the release service and skip everything else that mutates
    pub dry_run: bool,

    /// Wait for resources to be ready after each install or update
    pub wait: bool,

    /// Timeout used when a chart declares none (seconds when serialized)
    #[serde(with = "duration_secs")]
    pub timeout: Duration,

    /// Value files merged over the documents, in order
    pub value_files: Vec<PathBuf>,

    /// Point overrides (`kind:document:path=value`)
    pub overrides: Vec<String>,

    /// Manifest to deploy when the documents hold several
    pub target_manifest: Option<String>,

    /// Quiet readiness passes required before a release counts as ready
    pub wait_attempts: u32,

    /// Pause between readiness passes (seconds when serialized)
    #[serde(with = "duration_secs")]
    pub wait_attempt_sleep: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            disable_update_pre: false,
            disable_update_post: false,
            enable_chart_cleanup: false,
            dry_run: false,
            wait: false,
            timeout: DEFAULT_TIMEOUT,
            value_files: Vec::new(),
            overrides: Vec::new(),
            target_manifest: None,
            wait_attempts: 1,
            wait_attempt_sleep: Duration::from_secs(1),
        }
    }
}

impl SyncOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable waiting for resources
    pub fn with_wait(mut self, timeout: Duration) -> Self {
        self.wait = true;
        self.timeout = timeout;
        self
    }

    /// Enable dry-run mode
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Uninstall undeclared releases under the manifest prefix
    pub fn with_cleanup(mut self) -> Self {
        self.enable_chart_cleanup = true;
        self
    }

    pub fn with_value_files(mut self, files: Vec<PathBuf>) -> Self {
        self.value_files = files;
        self
    }

    pub fn with_overrides(mut self, overrides: Vec<String>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_target_manifest(mut self, name: impl Into<String>) -> Self {
        self.target_manifest = Some(name.into());
        self
    }

    /// Require `attempts` quiet passes, `sleep` apart
    pub fn with_wait_attempts(mut self, attempts: u32, sleep: Duration) -> Self {
        self.wait_attempts = attempts;
        self.wait_attempt_sleep = sleep;
        self
    }
}

/// Serialization helper for std::time::Duration as whole seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(seconds))
    }
}
