//! Manifest sync
//!
//! A sync runs in phases:
//! 1. Pre-flight: service check, validation, overrides, resolution, the
//!    known-release snapshot, purge of failed releases and bundle builds
//! 2. Per chart, in group order: decide, act, await readiness, test
//! 3. Post-flight: release fetched chart sources
//! 4. Prune (opt-in): uninstall prefixed releases the manifest no longer declares
//!
//! Any failure stops the sync and comes back as [`KubeError::SyncAborted`]
//! carrying the summary accumulated so far. Nothing is rolled back.
//!
//! Two syncs driving the same release service at once are not coordinated:
//! there is no locking, and each works from its own release snapshot.

use flotilla_core::{
    Bundle, Document, KnownRelease, Override, ResolvedChart, ResolvedGroup, ResolvedManifest,
    classify, release_name, resolve, validate_documents,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::actions::LifecycleRunner;
use crate::cluster::ClusterApi;
use crate::diff::{DiffEngine, ReleaseDiff, canonical_values};
use crate::error::{KubeError, Result};
use crate::options::SyncOptions;
use crate::release::{ReleaseRequest, ReleaseService};
use crate::source::{ChartSource, SourceCache};
use crate::wait::{ReadinessPoller, WaitTarget};

/// Phase a sync was in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncPhase {
    PreFlight,
    Decide,
    Act,
    AwaitReady,
    Test,
    PostFlight,
    Prune,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PreFlight => "pre-flight",
            Self::Decide => "decide",
            Self::Act => "act",
            Self::AwaitReady => "await-ready",
            Self::Test => "test",
            Self::PostFlight => "post-flight",
            Self::Prune => "prune",
        };
        write!(f, "{}", s)
    }
}

/// Release test outcomes
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TestSummary {
    pub passed: Vec<String>,
    pub failed: Vec<String>,
}

/// What a sync did, by release name
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncSummary {
    pub installed: Vec<String>,
    pub upgraded: Vec<String>,
    /// Releases left untouched because nothing changed
    pub unchanged: Vec<String>,
    /// One entry per release that took the upgrade path
    pub diff: Vec<ReleaseDiff>,
    pub uninstalled: Vec<String>,
    /// Failed releases removed before deploying
    pub purged: Vec<String>,
    pub tests: TestSummary,
}

impl SyncSummary {
    /// True when the sync changed nothing
    pub fn is_noop(&self) -> bool {
        self.installed.is_empty()
            && self.upgraded.is_empty()
            && self.uninstalled.is_empty()
            && self.purged.is_empty()
    }
}

/// Everything pre-flight hands to the deploy loop
struct Plan {
    manifest: ResolvedManifest,
    /// Bundles per group, parallel to `manifest.chart_groups`
    bundles: Vec<Vec<Bundle>>,
    /// Known releases after the failed-release purge
    snapshot: BTreeMap<String, KnownRelease>,
}

/// Phase tracking plus the summary built up so far
struct Progress {
    phase: SyncPhase,
    summary: SyncSummary,
}

impl Progress {
    fn enter(&mut self, phase: SyncPhase) {
        self.phase = phase;
    }

    fn abort(self, source: KubeError) -> KubeError {
        KubeError::SyncAborted {
            phase: self.phase,
            summary: Box::new(self.summary),
            source: Box::new(source),
        }
    }
}

/// Drives a manifest onto the cluster through the release service
pub struct Orchestrator {
    releases: Arc<dyn ReleaseService>,
    cluster: Arc<dyn ClusterApi>,
    source: Arc<dyn ChartSource>,
    options: SyncOptions,
    diff: DiffEngine,
}

impl Orchestrator {
    pub fn new(
        releases: Arc<dyn ReleaseService>,
        cluster: Arc<dyn ClusterApi>,
        source: Arc<dyn ChartSource>,
        options: SyncOptions,
    ) -> Self {
        Self {
            releases,
            cluster,
            source,
            options,
            diff: DiffEngine::new(),
        }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Deploy the manifest described by `documents`
    pub async fn sync(&self, documents: &[Document]) -> Result<SyncSummary> {
        let mut progress = Progress {
            phase: SyncPhase::PreFlight,
            summary: SyncSummary::default(),
        };
        let mut sources = SourceCache::new(self.source.clone());

        let deployed = match self.pre_flight(documents, &mut progress, &mut sources).await {
            Ok(plan) => match self.deploy(&plan, &mut progress).await {
                Ok(()) => Ok(plan),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        // Checkouts are released even when the deploy failed
        let phase = progress.phase;
        progress.enter(SyncPhase::PostFlight);
        let failures = sources.release_all().await;
        if !failures.is_empty() {
            warn!(count = failures.len(), "Some chart sources could not be released");
        }

        let plan = match deployed {
            Ok(plan) => plan,
            Err(e) => {
                progress.enter(phase);
                return Err(progress.abort(e));
            }
        };

        if self.options.enable_chart_cleanup && !self.options.dry_run {
            progress.enter(SyncPhase::Prune);
            if let Err(e) = self.prune(&plan, &mut progress.summary).await {
                return Err(progress.abort(e));
            }
        }

        info!(
            installed = progress.summary.installed.len(),
            upgraded = progress.summary.upgraded.len(),
            unchanged = progress.summary.unchanged.len(),
            uninstalled = progress.summary.uninstalled.len(),
            "Sync complete"
        );
        Ok(progress.summary)
    }

    async fn pre_flight(
        &self,
        documents: &[Document],
        progress: &mut Progress,
        sources: &mut SourceCache,
    ) -> Result<Plan> {
        self.releases.check_reachable().await?;

        let target = self.options.target_manifest.as_deref();
        validate_documents(documents, target)?.into_result()?;

        let value_files = self
            .options
            .value_files
            .iter()
            .map(Document::load_file)
            .collect::<flotilla_core::Result<Vec<_>>>()?;
        let documents = Override::new(documents)
            .with_target_manifest(target)
            .apply(&value_files, &self.options.overrides)?;

        let classified = classify(&documents, target)?;
        for message in &classified.warnings {
            warn!("{}", message);
        }
        let manifest = resolve(&classified)?;
        info!(manifest = %manifest.name, prefix = %manifest.release_prefix, "Resolved manifest");

        if self.needs_cluster(&manifest) {
            self.cluster.check_reachable().await?;
        }

        let mut snapshot: BTreeMap<String, KnownRelease> = self
            .releases
            .list_releases()
            .await?
            .into_iter()
            .map(|r| (r.name.clone(), r))
            .collect();

        self.purge_failed(&manifest, &mut snapshot, &mut progress.summary)
            .await?;

        let mut bundles = Vec::with_capacity(manifest.chart_groups.len());
        for group in &manifest.chart_groups {
            let mut group_bundles = Vec::with_capacity(group.charts.len());
            for chart in &group.charts {
                group_bundles.push(sources.bundle_for(&chart.spec).await?);
            }
            bundles.push(group_bundles);
        }

        Ok(Plan {
            manifest,
            bundles,
            snapshot,
        })
    }

    /// Whether any chart will wait on or act against the cluster
    fn needs_cluster(&self, manifest: &ResolvedManifest) -> bool {
        if self.options.dry_run {
            return false;
        }

        manifest.chart_groups.iter().any(|group| {
            let wait = self.options.wait || group.sequenced || group.test_charts;
            wait || group.charts.iter().any(|chart| self.has_actions(chart))
        })
    }

    fn has_actions(&self, chart: &ResolvedChart) -> bool {
        let upgrade = &chart.spec.upgrade;
        if upgrade.no_hooks {
            return false;
        }

        let pre = !self.options.disable_update_pre
            && !(upgrade.pre.delete.is_empty() && upgrade.pre.create.is_empty());
        let post = !self.options.disable_update_post && !upgrade.post.create.is_empty();
        pre || post
    }

    /// Uninstall declared releases stuck in `failed` so they can be installed fresh
    async fn purge_failed(
        &self,
        manifest: &ResolvedManifest,
        snapshot: &mut BTreeMap<String, KnownRelease>,
        summary: &mut SyncSummary,
    ) -> Result<()> {
        let declared: BTreeSet<String> = manifest.release_names().into_iter().collect();
        let failed: Vec<KnownRelease> = snapshot
            .values()
            .filter(|r| r.status.is_failed() && declared.contains(&r.name))
            .cloned()
            .collect();

        for release in failed {
            if self.options.dry_run {
                info!(release = %release.name, "Dry run, not purging failed release");
                continue;
            }

            info!(release = %release.name, "Purging failed release");
            self.releases
                .uninstall_release(&release.name, true)
                .await
                .map_err(|e| KubeError::ReleaseUninstall {
                    release: release.name.clone(),
                    namespace: release.namespace.clone(),
                    message: e.to_string(),
                })?;

            snapshot.remove(&release.name);
            summary.purged.push(release.name);
        }

        Ok(())
    }

    async fn deploy(&self, plan: &Plan, progress: &mut Progress) -> Result<()> {
        for (group, bundles) in plan.manifest.chart_groups.iter().zip(&plan.bundles) {
            info!(
                group = %group.name,
                charts = group.charts.len(),
                sequenced = group.sequenced,
                "Deploying chart group"
            );

            for (chart, bundle) in group.charts.iter().zip(bundles) {
                self.deploy_chart(plan, group, chart, bundle, progress)
                    .await?;
            }
        }
        Ok(())
    }

    async fn deploy_chart(
        &self,
        plan: &Plan,
        group: &ResolvedGroup,
        chart: &ResolvedChart,
        bundle: &Bundle,
        progress: &mut Progress,
    ) -> Result<()> {
        let spec = &chart.spec;
        let name = release_name(&plan.manifest.release_prefix, &spec.release);
        let wait = self.options.wait || group.sequenced || group.test_charts;
        let timeout = self.chart_timeout(chart, wait);

        progress.enter(SyncPhase::Decide);
        let values = canonical_values(&spec.values)?;

        let request = ReleaseRequest {
            release: name.clone(),
            namespace: spec.namespace.clone(),
            bundle: bundle.clone(),
            values,
            wait,
            timeout,
            no_hooks: false,
            dry_run: self.options.dry_run,
        };

        match plan.snapshot.get(&name) {
            None => {
                info!(release = %name, namespace = %spec.namespace, "Installing release");
                progress.enter(SyncPhase::Act);
                self.install(ReleaseRequest {
                    no_hooks: spec.install.no_hooks,
                    ..request
                })
                .await?;
                progress.summary.installed.push(name.clone());
            }
            Some(known) => {
                let diff = self.diff.diff_release(known, bundle, &spec.values)?;
                let changed = !diff.is_empty();
                progress.summary.diff.push(diff);

                if !changed {
                    info!(release = %name, "No changes, skipping");
                    progress.summary.unchanged.push(name);
                    return Ok(());
                }

                info!(release = %name, namespace = %spec.namespace, "Upgrading release");
                progress.enter(SyncPhase::Act);
                self.upgrade(
                    chart,
                    ReleaseRequest {
                        no_hooks: spec.upgrade.no_hooks,
                        ..request
                    },
                )
                .await?;
                progress.summary.upgraded.push(name.clone());
            }
        }

        if self.options.dry_run {
            return Ok(());
        }

        if wait {
            progress.enter(SyncPhase::AwaitReady);
            self.await_ready(chart, &name, timeout).await?;
        }

        if spec.test || group.test_charts {
            progress.enter(SyncPhase::Test);
            self.test(&name, timeout, &mut progress.summary.tests).await;
        }

        Ok(())
    }

    /// The chart's own timeout applies only when it is being waited on
    fn chart_timeout(&self, chart: &ResolvedChart, wait: bool) -> Duration {
        match chart.spec.declared_timeout() {
            Some(secs) if wait => Duration::from_secs(secs),
            _ => self.options.timeout,
        }
    }

    async fn install(&self, request: ReleaseRequest) -> Result<()> {
        self.releases
            .install_release(&request)
            .await
            .map_err(|e| KubeError::ReleaseInstall {
                release: request.release.clone(),
                namespace: request.namespace.clone(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn upgrade(&self, chart: &ResolvedChart, request: ReleaseRequest) -> Result<()> {
        let upgrade = &chart.spec.upgrade;
        let actions = !upgrade.no_hooks && !self.options.dry_run;
        let runner = LifecycleRunner::new(self.cluster.as_ref());

        if actions && !self.options.disable_update_pre {
            runner.run_pre_upgrade(upgrade, &request.namespace).await?;
        }

        self.releases
            .update_release(&request)
            .await
            .map_err(|e| KubeError::ReleaseUpdate {
                release: request.release.clone(),
                namespace: request.namespace.clone(),
                message: e.to_string(),
            })?;

        if actions && !self.options.disable_update_post {
            runner.run_post_upgrade(upgrade, &request.namespace).await?;
        }

        Ok(())
    }

    async fn await_ready(&self, chart: &ResolvedChart, release: &str, timeout: Duration) -> Result<()> {
        let target = WaitTarget::pods(&chart.spec.namespace, chart.spec.wait.selector());
        let ready = ReadinessPoller::new(self.cluster.as_ref())
            .wait_until_ready(
                &target,
                timeout,
                self.options.wait_attempts.max(1),
                self.options.wait_attempt_sleep,
            )
            .await?;

        if !ready {
            return Err(KubeError::ReadinessTimeout {
                release: release.to_string(),
                namespace: chart.spec.namespace.clone(),
                timeout_secs: timeout.as_secs(),
            });
        }
        Ok(())
    }

    /// Test failures are recorded, never fatal
    async fn test(&self, release: &str, timeout: Duration, tests: &mut TestSummary) {
        match self.releases.test_release(release, timeout).await {
            Ok(result) if result.passed() => {
                info!(release = %release, "Tests passed");
                tests.passed.push(release.to_string());
            }
            Ok(_) => {
                warn!(release = %release, "Tests failed");
                tests.failed.push(release.to_string());
            }
            Err(e) => {
                warn!(release = %release, error = %e, "Could not run tests");
                tests.failed.push(release.to_string());
            }
        }
    }

    /// Uninstall prefixed releases the manifest no longer declares
    async fn prune(&self, plan: &Plan, summary: &mut SyncSummary) -> Result<()> {
        let prefix = format!("{}-", plan.manifest.release_prefix);
        let declared: BTreeSet<String> = plan.manifest.release_names().into_iter().collect();

        for release in plan.snapshot.values() {
            if !release.name.starts_with(&prefix) || declared.contains(&release.name) {
                continue;
            }

            info!(release = %release.name, "Uninstalling release no longer in manifest");
            self.releases
                .uninstall_release(&release.name, true)
                .await
                .map_err(|e| KubeError::ReleaseUninstall {
                    release: release.name.clone(),
                    namespace: release.namespace.clone(),
                    message: e.to_string(),
                })?;
            summary.uninstalled.push(release.name.clone());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ResourceState;
    use crate::mock::{MockCluster, MockOperation, MockReleaseService, ReleaseCall};
    use crate::release::{TestResult, TestStatus};
    use crate::source::SourceCheckout;
    use async_trait::async_trait;
    use flotilla_core::{BundleFile, BundleMetadata, DocumentKind, ReleaseStatus, SourceSpec};
    use serde_json::{Value as JsonValue, json};
    use std::collections::HashMap;
    use std::sync::RwLock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Chart source serving bundles from memory, keyed by location
    #[derive(Default)]
    struct MemorySource {
        templates: RwLock<HashMap<String, String>>,
        fetches: AtomicUsize,
        releases: AtomicUsize,
    }

    impl MemorySource {
        fn set(&self, location: &str, template: &str) {
            self.templates
                .write()
                .unwrap()
                .insert(location.to_string(), template.to_string());
        }
    }

    #[async_trait]
    impl ChartSource for MemorySource {
        async fn fetch(&self, source: &SourceSpec) -> Result<SourceCheckout> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(SourceCheckout {
                root: source.location.clone().into(),
                location: source.location.clone(),
                reference: source.reference.clone(),
            })
        }

        async fn build(&self, checkout: &SourceCheckout, source: &SourceSpec) -> Result<Bundle> {
            let template = self
                .templates
                .read()
                .unwrap()
                .get(&checkout.location)
                .cloned()
                .unwrap_or_else(|| "kind: ConfigMap\n".to_string());

            let mut bundle = Bundle::new(BundleMetadata {
                name: source.subpath.clone(),
                version: "0.1.0".into(),
                description: None,
            });
            bundle.templates.push(BundleFile {
                name: "main.yaml".into(),
                data: template,
            });
            Ok(bundle)
        }

        async fn release(&self, _checkout: SourceCheckout) -> Result<()> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn chart(name: &str, extra: JsonValue) -> Document {
        let mut data = json!({
            "chart_name": name,
            "release": name,
            "namespace": "web",
            "source": {"type": "local", "location": format!("/charts/{}", name), "subpath": name},
            "values": {"replicas": 1}
        });
        if let (Some(base), Some(extra)) = (data.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        }
        Document::new(DocumentKind::Chart, name, data)
    }

    fn group(name: &str, charts: &[&str], extra: JsonValue) -> Document {
        let mut data = json!({"chart_group": charts});
        if let (Some(base), Some(extra)) = (data.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        }
        Document::new(DocumentKind::ChartGroup, name, data)
    }

    fn manifest(prefix: &str, groups: &[&str]) -> Document {
        Document::new(
            DocumentKind::Manifest,
            "site",
            json!({"release_prefix": prefix, "chart_groups": groups}),
        )
    }

    fn blog_documents() -> Vec<Document> {
        vec![
            chart("blog", json!({})),
            group("web", &["blog"], json!({"sequenced": false})),
            manifest("prefix", &["web"]),
        ]
    }

    struct Harness {
        releases: MockReleaseService,
        cluster: MockCluster,
        source: Arc<MemorySource>,
    }

    impl Harness {
        fn new(releases: MockReleaseService) -> Self {
            Self {
                releases,
                cluster: MockCluster::new(),
                source: Arc::new(MemorySource::default()),
            }
        }

        fn orchestrator(&self, options: SyncOptions) -> Orchestrator {
            Orchestrator::new(
                Arc::new(self.releases.clone()),
                Arc::new(self.cluster.clone()),
                self.source.clone(),
                options,
            )
        }
    }

    fn installs(calls: &[ReleaseCall]) -> Vec<&ReleaseRequest> {
        calls
            .iter()
            .filter_map(|c| match c {
                ReleaseCall::Install(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    fn mutations(calls: &[ReleaseCall]) -> usize {
        calls
            .iter()
            .filter(|c| !matches!(c, ReleaseCall::Test { .. }))
            .count()
    }

    fn known(name: &str, status: ReleaseStatus) -> KnownRelease {
        KnownRelease {
            name: name.to_string(),
            namespace: "web".to_string(),
            version: 1,
            status,
            bundle: Bundle::new(BundleMetadata {
                name: "old".into(),
                version: "0.0.1".into(),
                description: None,
            }),
            raw_values: "{}\n".to_string(),
            last_deployed: None,
        }
    }

    #[tokio::test]
    async fn test_fresh_install() {
        let harness = Harness::new(MockReleaseService::new());

        let summary = harness
            .orchestrator(SyncOptions::default())
            .sync(&blog_documents())
            .await
            .unwrap();

        assert_eq!(summary.installed, vec!["prefix-blog"]);
        assert!(summary.upgraded.is_empty());
        assert!(summary.diff.is_empty());

        let calls = harness.releases.calls();
        let installs = installs(&calls);
        assert_eq!(installs.len(), 1);
        assert_eq!(installs[0].release, "prefix-blog");
        assert_eq!(installs[0].namespace, "web");
        assert_eq!(installs[0].values, "replicas: 1\n");
        assert_eq!(installs[0].bundle.metadata.name, "blog");
        assert!(!installs[0].wait);
    }

    #[tokio::test]
    async fn test_second_sync_is_noop() {
        let harness = Harness::new(MockReleaseService::new());
        let orchestrator = harness.orchestrator(SyncOptions::default());

        orchestrator.sync(&blog_documents()).await.unwrap();
        let before = mutations(&harness.releases.calls());

        let summary = orchestrator.sync(&blog_documents()).await.unwrap();
        assert!(summary.is_noop());
        assert_eq!(summary.unchanged, vec!["prefix-blog"]);
        assert_eq!(summary.diff.len(), 1);
        assert!(summary.diff[0].is_empty());
        assert_eq!(mutations(&harness.releases.calls()), before);
    }

    #[tokio::test]
    async fn test_values_change_upgrades() {
        let harness = Harness::new(MockReleaseService::new());
        let orchestrator = harness.orchestrator(SyncOptions::default());
        orchestrator.sync(&blog_documents()).await.unwrap();

        let mut docs = blog_documents();
        docs[0] = chart("blog", json!({"values": {"replicas": 3}}));
        let summary = orchestrator.sync(&docs).await.unwrap();

        assert_eq!(summary.upgraded, vec!["prefix-blog"]);
        assert!(summary.diff[0].chart.is_empty());
        assert!(summary.diff[0].values.iter().any(|l| l == "+replicas: 3"));
        assert_eq!(harness.releases.get("prefix-blog").unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_chart_change_upgrades() {
        let harness = Harness::new(MockReleaseService::new());
        let orchestrator = harness.orchestrator(SyncOptions::default());
        orchestrator.sync(&blog_documents()).await.unwrap();

        harness.source.set("/charts/blog", "kind: Deployment\n");
        let summary = orchestrator.sync(&blog_documents()).await.unwrap();

        assert_eq!(summary.upgraded, vec!["prefix-blog"]);
        assert!(!summary.diff[0].chart.is_empty());
        assert!(summary.diff[0].values.is_empty());
    }

    #[tokio::test]
    async fn test_override_applies_before_deploy() {
        let harness = Harness::new(MockReleaseService::new());
        let options = SyncOptions::new().with_overrides(vec!["chart:blog:values.replicas=5".into()]);

        harness.orchestrator(options).sync(&blog_documents()).await.unwrap();

        let calls = harness.releases.calls();
        assert_eq!(installs(&calls)[0].values, "replicas: 5\n");
    }

    #[tokio::test]
    async fn test_prune_removes_only_undeclared_prefixed() {
        let releases = MockReleaseService::with_releases(vec![
            known("p-a", ReleaseStatus::Deployed),
            known("p-b", ReleaseStatus::Deployed),
            known("p-c", ReleaseStatus::Deployed),
            known("q-d", ReleaseStatus::Deployed),
        ]);
        let harness = Harness::new(releases);

        let docs = vec![
            chart("a", json!({})),
            chart("b", json!({})),
            group("g", &["a", "b"], json!({})),
            manifest("p", &["g"]),
        ];

        let summary = harness
            .orchestrator(SyncOptions::new().with_cleanup())
            .sync(&docs)
            .await
            .unwrap();

        assert_eq!(summary.uninstalled, vec!["p-c"]);
        assert_eq!(summary.upgraded, vec!["p-a", "p-b"]);
        assert_eq!(harness.releases.release_names(), vec!["p-a", "p-b", "q-d"]);
    }

    #[tokio::test]
    async fn test_prune_is_opt_in() {
        let harness = Harness::new(MockReleaseService::with_releases(vec![known(
            "prefix-old",
            ReleaseStatus::Deployed,
        )]));

        let summary = harness
            .orchestrator(SyncOptions::default())
            .sync(&blog_documents())
            .await
            .unwrap();

        assert!(summary.uninstalled.is_empty());
        assert!(harness.releases.get("prefix-old").is_some());
    }

    #[tokio::test]
    async fn test_failed_release_is_purged_then_installed() {
        let harness = Harness::new(MockReleaseService::with_releases(vec![known(
            "prefix-blog",
            ReleaseStatus::Failed,
        )]));

        let summary = harness
            .orchestrator(SyncOptions::default())
            .sync(&blog_documents())
            .await
            .unwrap();

        assert_eq!(summary.purged, vec!["prefix-blog"]);
        assert_eq!(summary.installed, vec!["prefix-blog"]);

        let calls = harness.releases.calls();
        assert_eq!(
            calls[0],
            ReleaseCall::Uninstall {
                name: "prefix-blog".into(),
                purge: true
            }
        );
    }

    #[tokio::test]
    async fn test_install_failure_aborts_with_partial_summary() {
        let releases = MockReleaseService::new().fail_on(MockOperation::Install, "p-b");
        let harness = Harness::new(releases);

        let docs = vec![
            chart("a", json!({})),
            chart("b", json!({})),
            chart("c", json!({})),
            group("g", &["a", "b", "c"], json!({})),
            manifest("p", &["g"]),
        ];

        let err = harness
            .orchestrator(SyncOptions::default())
            .sync(&docs)
            .await
            .unwrap_err();

        match &err {
            KubeError::SyncAborted { phase, summary, source } => {
                assert_eq!(*phase, SyncPhase::Act);
                assert_eq!(summary.installed, vec!["p-a"]);
                match source.as_ref() {
                    KubeError::ReleaseInstall { release, namespace, .. } => {
                        assert_eq!(release, "p-b");
                        assert_eq!(namespace, "web");
                    }
                    other => panic!("unexpected cause: {other:?}"),
                }
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert!(harness.releases.get("p-c").is_none());
        assert_eq!(harness.source.releases.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_unreachable_service_aborts_before_mutation() {
        let harness = Harness::new(MockReleaseService::new().unreachable());

        let err = harness
            .orchestrator(SyncOptions::default())
            .sync(&blog_documents())
            .await
            .unwrap_err();

        assert!(matches!(err.root(), KubeError::ServiceUnavailable { .. }));
        assert!(harness.releases.calls().is_empty());
        assert_eq!(harness.source.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unreachable_cluster_aborts_before_mutation() {
        let mut harness = Harness::new(MockReleaseService::with_releases(vec![known(
            "prefix-old",
            ReleaseStatus::Failed,
        )]));
        harness.cluster = MockCluster::new().unreachable();

        let docs = vec![
            chart("blog", json!({})),
            chart("old", json!({})),
            group("web", &["blog", "old"], json!({"sequenced": true})),
            manifest("prefix", &["web"]),
        ];

        let err = harness
            .orchestrator(SyncOptions::default())
            .sync(&docs)
            .await
            .unwrap_err();

        match &err {
            KubeError::SyncAborted { phase, summary, .. } => {
                assert_eq!(*phase, SyncPhase::PreFlight);
                assert!(summary.is_noop());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(err.root(), KubeError::ClusterUnavailable { .. }));
        assert_eq!(mutations(&harness.releases.calls()), 0);
        assert!(harness.releases.get("prefix-old").is_some());
    }

    #[tokio::test]
    async fn test_cluster_not_needed_without_waits_or_actions() {
        let mut harness = Harness::new(MockReleaseService::new());
        harness.cluster = MockCluster::new().unreachable();

        let summary = harness
            .orchestrator(SyncOptions::default())
            .sync(&blog_documents())
            .await
            .unwrap();

        assert_eq!(summary.installed, vec!["prefix-blog"]);
        assert_eq!(harness.cluster.calls().reachability_checks, 0);
    }

    #[tokio::test]
    async fn test_declared_actions_require_cluster() {
        let mut harness = Harness::new(MockReleaseService::new());
        harness.cluster = MockCluster::new().unreachable();

        let docs = vec![
            chart(
                "blog",
                json!({"upgrade": {"post": {"create": [{"type": "pod", "name": "smoke"}]}}}),
            ),
            group("web", &["blog"], json!({})),
            manifest("prefix", &["web"]),
        ];

        let err = harness
            .orchestrator(SyncOptions::default())
            .sync(&docs)
            .await
            .unwrap_err();
        assert!(matches!(err.root(), KubeError::ClusterUnavailable { .. }));
        assert!(harness.releases.calls().is_empty());

        let summary = harness
            .orchestrator(SyncOptions::new().dry_run())
            .sync(&docs)
            .await
            .unwrap();
        assert_eq!(summary.installed, vec!["prefix-blog"]);
    }

    #[tokio::test]
    async fn test_structural_error_aborts_in_pre_flight() {
        let harness = Harness::new(MockReleaseService::new());
        let docs = vec![chart("blog", json!({})), manifest("prefix", &["web"])];

        let err = harness
            .orchestrator(SyncOptions::default())
            .sync(&docs)
            .await
            .unwrap_err();

        match err {
            KubeError::SyncAborted { phase, .. } => assert_eq!(phase, SyncPhase::PreFlight),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(harness.releases.calls().is_empty());
    }

    #[tokio::test]
    async fn test_sequenced_group_waits_on_labels() {
        let mut pod = ResourceState::new("blog-0", "Running");
        pod.labels.insert("app".into(), "blog".into());

        let mut harness = Harness::new(MockReleaseService::new());
        harness.cluster = MockCluster::new().with_resources(vec![pod]);

        let docs = vec![
            chart("blog", json!({"wait": {"timeout": 30, "labels": {"app": "blog"}}})),
            group("web", &["blog"], json!({"sequenced": true})),
            manifest("prefix", &["web"]),
        ];

        harness
            .orchestrator(SyncOptions::default())
            .sync(&docs)
            .await
            .unwrap();

        let calls = harness.releases.calls();
        let install = installs(&calls)[0];
        assert!(install.wait);
        assert_eq!(install.timeout, Duration::from_secs(30));

        let lists = harness.cluster.calls().lists;
        assert_eq!(lists[0].1, "web");
        assert_eq!(lists[0].2, "app=blog");
    }

    #[tokio::test]
    async fn test_readiness_timeout_names_release() {
        let mut harness = Harness::new(MockReleaseService::new());
        harness.cluster = MockCluster::new().with_resources(vec![ResourceState::new("blog-0", "Pending")]);

        let docs = vec![
            chart("blog", json!({"wait": {"timeout": 1}})),
            group("web", &["blog"], json!({"sequenced": true})),
            manifest("prefix", &["web"]),
        ];

        let err = harness
            .orchestrator(SyncOptions::default())
            .sync(&docs)
            .await
            .unwrap_err();

        match &err {
            KubeError::SyncAborted { phase, summary, .. } => {
                assert_eq!(*phase, SyncPhase::AwaitReady);
                assert_eq!(summary.installed, vec!["prefix-blog"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(
            err.root(),
            KubeError::ReadinessTimeout { release, timeout_secs: 1, .. } if release == "prefix-blog"
        ));
    }

    #[tokio::test]
    async fn test_group_tests_recorded() {
        let releases = MockReleaseService::new()
            .with_test_result("prefix-b", TestResult::single(TestStatus::Failure));
        let harness = Harness::new(releases);

        let docs = vec![
            chart("a", json!({})),
            chart("b", json!({})),
            group("web", &["a", "b"], json!({"test_charts": true})),
            manifest("prefix", &["web"]),
        ];

        let summary = harness
            .orchestrator(SyncOptions::default())
            .sync(&docs)
            .await
            .unwrap();

        assert_eq!(summary.tests.passed, vec!["prefix-a"]);
        assert_eq!(summary.tests.failed, vec!["prefix-b"]);
        assert_eq!(summary.installed.len(), 2);
    }

    #[tokio::test]
    async fn test_upgrade_runs_lifecycle_actions() {
        let releases = MockReleaseService::with_releases(vec![known("prefix-blog", ReleaseStatus::Deployed)]);
        let harness = Harness::new(releases);

        let docs = vec![
            chart(
                "blog",
                json!({"upgrade": {
                    "pre": {"delete": [{"type": "job", "name": "migrate"}]},
                    "post": {"create": [{"type": "pod", "name": "smoke"}]}
                }}),
            ),
            group("web", &["blog"], json!({})),
            manifest("prefix", &["web"]),
        ];

        harness
            .orchestrator(SyncOptions::default())
            .sync(&docs)
            .await
            .unwrap();

        let cluster = harness.cluster.calls();
        assert_eq!(cluster.deletes.len(), 1);
        assert_eq!(cluster.creates.len(), 1);

        let harness = Harness::new(MockReleaseService::with_releases(vec![known(
            "prefix-blog",
            ReleaseStatus::Deployed,
        )]));
        let mut options = SyncOptions::default();
        options.disable_update_pre = true;
        harness.orchestrator(options).sync(&docs).await.unwrap();

        let cluster = harness.cluster.calls();
        assert!(cluster.deletes.is_empty());
        assert_eq!(cluster.creates.len(), 1);
    }

    #[tokio::test]
    async fn test_shared_source_fetched_once() {
        let harness = Harness::new(MockReleaseService::new());

        let shared = |name: &str| {
            chart(
                name,
                json!({"source": {"type": "local", "location": "/charts/repo", "subpath": name}}),
            )
        };
        let docs = vec![
            shared("a"),
            shared("b"),
            group("g", &["a", "b"], json!({})),
            manifest("p", &["g"]),
        ];

        harness
            .orchestrator(SyncOptions::default())
            .sync(&docs)
            .await
            .unwrap();

        assert_eq!(harness.source.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(harness.source.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dry_run_skips_everything_but_the_calls() {
        let mut pod = ResourceState::new("blog-0", "Pending");
        pod.labels.insert("app".into(), "blog".into());

        let mut harness = Harness::new(MockReleaseService::with_releases(vec![known(
            "prefix-stale",
            ReleaseStatus::Deployed,
        )]));
        harness.cluster = MockCluster::new().with_resources(vec![pod]);

        let docs = vec![
            chart("blog", json!({"test": true})),
            group("web", &["blog"], json!({"sequenced": true})),
            manifest("prefix", &["web"]),
        ];

        let summary = harness
            .orchestrator(SyncOptions::new().dry_run().with_cleanup())
            .sync(&docs)
            .await
            .unwrap();

        assert_eq!(summary.installed, vec!["prefix-blog"]);
        assert!(summary.uninstalled.is_empty());
        assert!(summary.tests.passed.is_empty());

        let calls = harness.releases.calls();
        assert_eq!(calls.len(), 1);
        assert!(installs(&calls)[0].dry_run);
        assert!(harness.cluster.calls().lists.is_empty());
        assert_eq!(harness.releases.release_names(), vec!["prefix-stale"]);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(SyncPhase::PreFlight.to_string(), "pre-flight");
        assert_eq!(SyncPhase::AwaitReady.to_string(), "await-ready");
    }
}
