//! Release service seam

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flotilla_core::{Bundle, KnownRelease};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;

/// Everything an install or update call needs
#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseRequest {
    /// Prefixed release name
    pub release: String,

    pub namespace: String,

    pub bundle: Bundle,

    /// Values as raw YAML
    pub values: String,

    /// Ask the service to wait for its own resources
    pub wait: bool,

    pub timeout: Duration,

    /// Skip chart hooks
    pub no_hooks: bool,

    /// Render and check without persisting anything
    pub dry_run: bool,
}

/// Status of one test suite run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Unknown,
    Running,
    Success,
    Failure,
}

/// A single run of a release's test suite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSuiteRun {
    pub status: TestStatus,

    #[serde(default)]
    pub info: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Test suite runs reported for a release, oldest first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub runs: Vec<TestSuiteRun>,
}

impl TestResult {
    pub fn single(status: TestStatus) -> Self {
        Self {
            runs: vec![TestSuiteRun {
                status,
                info: String::new(),
                completed_at: None,
            }],
        }
    }

    /// Pass/fail is decided by the last run; no runs at all counts as passed
    pub fn passed(&self) -> bool {
        self.runs
            .last()
            .is_none_or(|run| run.status == TestStatus::Success)
    }
}

/// Operations of the release-management service
#[async_trait]
pub trait ReleaseService: Send + Sync {
    /// Fail with `ServiceUnavailable` when the service cannot be used
    async fn check_reachable(&self) -> Result<()>;

    /// Every release the service currently tracks
    async fn list_releases(&self) -> Result<Vec<KnownRelease>>;

    async fn install_release(&self, request: &ReleaseRequest) -> Result<KnownRelease>;

    async fn update_release(&self, request: &ReleaseRequest) -> Result<KnownRelease>;

    /// Remove a release; `purge` also drops its record
    async fn uninstall_release(&self, name: &str, purge: bool) -> Result<()>;

    async fn test_release(&self, name: &str, timeout: Duration) -> Result<TestResult>;
}
