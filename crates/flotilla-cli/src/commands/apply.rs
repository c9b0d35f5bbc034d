//! Apply command - sync the manifest onto the cluster

use async_trait::async_trait;
use console::style;
use flotilla_kube::{
    ClusterApi, EventStream, FileReleaseService, KubeCluster, KubeError, LocalChartSource,
    Orchestrator, ResourceKind, ResourceList, SyncOptions, SyncSummary,
};
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::DocumentArgs;
use crate::display::ReportRenderer;
use crate::error::{CliError, Result};

/// Options for the apply command
pub struct ApplyOptions {
    pub state_dir: PathBuf,
    pub wait: bool,
    pub timeout: u64,
    pub dry_run: bool,
    pub prune: bool,
    pub disable_update_pre: bool,
    pub disable_update_post: bool,
    pub wait_attempts: u32,
    pub wait_attempt_sleep: u64,
    pub json: bool,
}

impl ApplyOptions {
    fn sync_options(&self, documents: &DocumentArgs) -> Result<SyncOptions> {
        if self.wait_attempts == 0 {
            return Err(CliError::usage("--wait-attempts must be at least 1"));
        }

        let mut options = SyncOptions::new()
            .with_value_files(documents.values.clone())
            .with_overrides(documents.set.clone())
            .with_wait_attempts(self.wait_attempts, Duration::from_secs(self.wait_attempt_sleep));
        options.timeout = Duration::from_secs(self.timeout);

        if self.wait {
            options = options.with_wait(Duration::from_secs(self.timeout));
        }
        if self.dry_run {
            options = options.dry_run();
        }
        if self.prune {
            options = options.with_cleanup();
        }
        if let Some(target) = &documents.target_manifest {
            options = options.with_target_manifest(target.clone());
        }
        options.disable_update_pre = self.disable_update_pre;
        options.disable_update_post = self.disable_update_post;

        Ok(options)
    }
}

/// Cluster stand-in used when no kubeconfig is available
///
/// Syncs that never wait and run no lifecycle actions still work against
/// the file ledger; any other sync fails its pre-flight reachability check.
struct OfflineCluster {
    reason: String,
}

impl OfflineCluster {
    fn unavailable<T>(&self) -> flotilla_kube::Result<T> {
        Err(KubeError::ClusterUnavailable {
            message: format!("no cluster connection: {}", self.reason),
        })
    }
}

#[async_trait]
impl ClusterApi for OfflineCluster {
    async fn check_reachable(&self) -> flotilla_kube::Result<()> {
        self.unavailable()
    }

    async fn list_resources(
        &self,
        _kind: ResourceKind,
        _namespace: &str,
        _selector: &str,
    ) -> flotilla_kube::Result<ResourceList> {
        self.unavailable()
    }

    async fn watch_resources(
        &self,
        _kind: ResourceKind,
        _namespace: &str,
        _selector: &str,
        _resource_version: &str,
        _timeout: Duration,
    ) -> flotilla_kube::Result<EventStream> {
        self.unavailable()
    }

    async fn delete_resource(
        &self,
        _kind: ResourceKind,
        _name: &str,
        _namespace: &str,
    ) -> flotilla_kube::Result<()> {
        self.unavailable()
    }

    async fn create_resource(
        &self,
        _kind: ResourceKind,
        _namespace: &str,
        _spec: &JsonValue,
    ) -> flotilla_kube::Result<String> {
        self.unavailable()
    }
}

async fn connect_cluster() -> Arc<dyn ClusterApi> {
    match KubeCluster::try_default().await {
        Ok(cluster) => Arc::new(cluster),
        Err(e) => {
            tracing::debug!(error = %e, "No cluster connection, continuing offline");
            Arc::new(OfflineCluster {
                reason: e.to_string(),
            })
        }
    }
}

/// Chart locations are relative to the first document file
fn chart_base_dir(args: &DocumentArgs) -> PathBuf {
    args.files
        .first()
        .and_then(|f| f.parent())
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

pub async fn run(args: &DocumentArgs, options: &ApplyOptions) -> Result<()> {
    let sync_options = options.sync_options(args)?;
    let documents = super::load_documents(args)?;

    if !options.json {
        let mode = if options.dry_run { " (dry run)" } else { "" };
        println!(
            "{} Syncing {} document(s){}",
            style("→").blue(),
            documents.len(),
            mode
        );
    }

    let orchestrator = Orchestrator::new(
        Arc::new(FileReleaseService::new(&options.state_dir)),
        connect_cluster().await,
        Arc::new(LocalChartSource::with_base_dir(chart_base_dir(args))),
        sync_options,
    );

    match orchestrator.sync(&documents).await {
        Ok(summary) => report(&summary, options),
        Err(err) => {
            if let Some(partial) = err.summary() {
                if !options.json {
                    eprintln!("{} Progress before the failure:", style("!").yellow().bold());
                }
                report(partial, options)?;
            }
            Err(err.into())
        }
    }
}

fn report(summary: &SyncSummary, options: &ApplyOptions) -> Result<()> {
    if options.json {
        let text = serde_json::to_string_pretty(summary)
            .map_err(|e| CliError::internal(e.to_string()))?;
        println!("{}", text);
        return Ok(());
    }

    ReportRenderer::new().render_summary(summary, options.dry_run)?;
    Ok(())
}
