//! File-based release ledger
//!
//! Keeps one JSON record per release under a state directory. Useful for:
//! - Running syncs without a release-management service
//! - Dry runs and local testing of manifests
//!
//! Uninstalling without purge keeps the record with status `uninstalled` so
//! the next install continues its revision numbers.

use async_trait::async_trait;
use chrono::Utc;
use flotilla_core::{KnownRelease, ReleaseStatus};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{KubeError, Result};
use crate::release::{ReleaseRequest, ReleaseService, TestResult};

/// Release service backed by JSON files
pub struct FileReleaseService {
    /// Directory holding `<release>.json` records
    base_dir: PathBuf,
}

impl FileReleaseService {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn release_path(&self, name: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", name))
    }

    fn read_release(&self, path: &Path) -> Result<KnownRelease> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    fn write_release(&self, release: &KnownRelease) -> Result<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        let json = serde_json::to_string_pretty(release)?;
        std::fs::write(self.release_path(&release.name), json)?;
        Ok(())
    }

    /// The stored record, uninstalled ones included
    fn stored(&self, name: &str) -> Result<Option<KnownRelease>> {
        let path = self.release_path(name);
        if !path.exists() {
            return Ok(None);
        }
        self.read_release(&path).map(Some)
    }

    fn record_for(request: &ReleaseRequest, version: u32) -> KnownRelease {
        KnownRelease {
            name: request.release.clone(),
            namespace: request.namespace.clone(),
            version,
            status: ReleaseStatus::Deployed,
            bundle: request.bundle.clone(),
            raw_values: request.values.clone(),
            last_deployed: Some(Utc::now()),
        }
    }
}

#[async_trait]
impl ReleaseService for FileReleaseService {
    async fn check_reachable(&self) -> Result<()> {
        std::fs::create_dir_all(&self.base_dir).map_err(|e| KubeError::ServiceUnavailable {
            message: format!("state directory {}: {}", self.base_dir.display(), e),
        })
    }

    async fn list_releases(&self) -> Result<Vec<KnownRelease>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut releases: Vec<KnownRelease> = std::fs::read_dir(&self.base_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
            .map(|p| self.read_release(&p))
            .collect::<Result<Vec<_>>>()?;

        releases.retain(|r| r.status != ReleaseStatus::Uninstalled);
        releases.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(releases)
    }

    async fn install_release(&self, request: &ReleaseRequest) -> Result<KnownRelease> {
        let version = match self.stored(&request.release)? {
            Some(existing) if existing.status != ReleaseStatus::Uninstalled => {
                return Err(KubeError::ReleaseAlreadyExists {
                    name: request.release.clone(),
                    namespace: existing.namespace,
                });
            }
            Some(existing) => existing.version + 1,
            None => 1,
        };

        let release = Self::record_for(request, version);
        if request.dry_run {
            debug!(release = %release.name, "Dry run, not recording install");
            return Ok(release);
        }

        self.write_release(&release)?;
        Ok(release)
    }

    async fn update_release(&self, request: &ReleaseRequest) -> Result<KnownRelease> {
        let current = self
            .stored(&request.release)?
            .filter(|r| r.status != ReleaseStatus::Uninstalled)
            .ok_or_else(|| KubeError::ReleaseNotFound {
                name: request.release.clone(),
            })?;

        let release = Self::record_for(request, current.version + 1);
        if request.dry_run {
            debug!(release = %release.name, "Dry run, not recording update");
            return Ok(release);
        }

        self.write_release(&release)?;
        Ok(release)
    }

    async fn uninstall_release(&self, name: &str, purge: bool) -> Result<()> {
        let mut release = self.stored(name)?.ok_or_else(|| KubeError::ReleaseNotFound {
            name: name.to_string(),
        })?;

        if purge {
            std::fs::remove_file(self.release_path(name))?;
            return Ok(());
        }

        release.status = ReleaseStatus::Uninstalled;
        self.write_release(&release)
    }

    async fn test_release(&self, name: &str, _timeout: Duration) -> Result<TestResult> {
        if self.stored(name)?.is_none() {
            return Err(KubeError::ReleaseNotFound {
                name: name.to_string(),
            });
        }
        // The ledger runs no workloads, so there are no suite runs to report
        Ok(TestResult::default())
    }
}
