//! Chart sources
//!
//! A [`ChartSource`] fetches the location named by a chart's `source` and
//! builds a [`Bundle`] from the fetched tree. The orchestrator goes through a
//! [`SourceCache`] so every distinct source is fetched once per sync.

use async_trait::async_trait;
use flotilla_core::{Bundle, BundleFile, BundleMetadata, ChartSpec, SourceSpec, SourceType};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{KubeError, Result};

/// A fetched source tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceCheckout {
    /// Local directory holding the fetched tree
    pub root: PathBuf,
    pub location: String,
    pub reference: Option<String>,
}

/// Fetches chart sources and turns them into bundles
#[async_trait]
pub trait ChartSource: Send + Sync {
    async fn fetch(&self, source: &SourceSpec) -> Result<SourceCheckout>;

    /// Build the bundle found at `source.subpath` inside a checkout
    async fn build(&self, checkout: &SourceCheckout, source: &SourceSpec) -> Result<Bundle>;

    /// Drop anything the fetch left behind
    async fn release(&self, checkout: SourceCheckout) -> Result<()>;
}

/// Key under which fetches are memoized
type SourceKey = (SourceType, String, Option<String>);

/// Per-sync memo of fetched sources
pub struct SourceCache {
    source: Arc<dyn ChartSource>,
    checkouts: HashMap<SourceKey, SourceCheckout>,
}

impl SourceCache {
    pub fn new(source: Arc<dyn ChartSource>) -> Self {
        Self {
            source,
            checkouts: HashMap::new(),
        }
    }

    /// Fetch a source, reusing an earlier checkout of the same location
    pub async fn checkout(&mut self, spec: &SourceSpec) -> Result<SourceCheckout> {
        let key = (
            spec.source_type,
            spec.location.clone(),
            spec.reference.clone(),
        );

        if let Some(checkout) = self.checkouts.get(&key) {
            debug!(location = %spec.location, "Reusing fetched source");
            return Ok(checkout.clone());
        }

        debug!(location = %spec.location, source_type = %spec.source_type, "Fetching source");
        let checkout = self.source.fetch(spec).await?;
        self.checkouts.insert(key, checkout.clone());
        Ok(checkout)
    }

    /// Build the bundle of a chart, with its resolved dependencies nested inside
    pub fn bundle_for<'a>(&'a mut self, chart: &'a ChartSpec) -> BoxFuture<'a, Result<Bundle>> {
        Box::pin(async move {
            let checkout = self.checkout(&chart.source).await?;
            let mut bundle = self.source.build(&checkout, &chart.source).await?;

            for dependency in chart.resolved_dependencies() {
                let dep_bundle = self.bundle_for(dependency).await?;
                bundle.dependencies.push(dep_bundle);
            }

            bundle.normalize();
            Ok(bundle)
        })
    }

    /// Number of distinct sources fetched so far
    pub fn fetched(&self) -> usize {
        self.checkouts.len()
    }

    /// Release every checkout; failures are logged and do not stop the others
    pub async fn release_all(&mut self) -> Vec<KubeError> {
        let mut errors = Vec::new();
        for (_, checkout) in self.checkouts.drain() {
            let location = checkout.location.clone();
            if let Err(e) = self.source.release(checkout).await {
                warn!(location = %location, error = %e, "Failed to release chart source");
                errors.push(e);
            }
        }
        errors
    }
}

/// Reads charts from local directories
///
/// A chart directory holds `Chart.yaml`, an optional `values.yaml`, a
/// `templates/` directory and any other files the chart ships. Git and
/// tarball sources are not handled.
#[derive(Debug, Clone, Default)]
pub struct LocalChartSource {
    /// Relative locations are resolved against this directory
    base_dir: Option<PathBuf>,
}

impl LocalChartSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
        }
    }

    fn locate(&self, location: &str) -> PathBuf {
        let path = PathBuf::from(location);
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path,
        }
    }
}

#[async_trait]
impl ChartSource for LocalChartSource {
    async fn fetch(&self, source: &SourceSpec) -> Result<SourceCheckout> {
        if source.source_type != SourceType::Local {
            return Err(KubeError::Source {
                location: source.location.clone(),
                message: format!("{} sources are not supported", source.source_type),
            });
        }

        let root = self.locate(&source.location);
        if !root.is_dir() {
            return Err(KubeError::Source {
                location: source.location.clone(),
                message: format!("directory {} not found", root.display()),
            });
        }

        Ok(SourceCheckout {
            root,
            location: source.location.clone(),
            reference: source.reference.clone(),
        })
    }

    async fn build(&self, checkout: &SourceCheckout, source: &SourceSpec) -> Result<Bundle> {
        let dir = checkout.root.join(&source.subpath);
        load_chart_dir(&dir)
    }

    async fn release(&self, _checkout: SourceCheckout) -> Result<()> {
        Ok(())
    }
}

/// Read a chart directory into a bundle
///
/// Symlinks are followed; an entry that cannot be read fails the whole load.
pub fn load_chart_dir(dir: &Path) -> Result<Bundle> {
    let source_error = |message: String| KubeError::Source {
        location: dir.display().to_string(),
        message,
    };

    let chart_file = dir.join("Chart.yaml");
    if !chart_file.is_file() {
        return Err(source_error("Chart.yaml not found".into()));
    }

    let content = std::fs::read_to_string(&chart_file)
        .map_err(|e| source_error(format!("failed to read Chart.yaml: {}", e)))?;
    let metadata: BundleMetadata = serde_yaml::from_str(&content)
        .map_err(|e| source_error(format!("invalid Chart.yaml: {}", e)))?;

    let mut bundle = Bundle::new(metadata);

    let values_file = dir.join("values.yaml");
    if values_file.is_file() {
        bundle.values = std::fs::read_to_string(&values_file)
            .map_err(|e| source_error(format!("failed to read values.yaml: {}", e)))?;
    }

    let walker = walkdir::WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));

    for entry in walker {
        let entry = entry.map_err(|e| source_error(e.to_string()))?;
        let path = entry.path();
        if !entry.file_type().is_file() || path == chart_file || path == values_file {
            continue;
        }

        let relative = path
            .strip_prefix(dir)
            .map_err(|e| source_error(format!("{}: {}", path.display(), e)))?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let bytes = std::fs::read(path)
            .map_err(|e| source_error(format!("failed to read {}: {}", name, e)))?;
        let data = String::from_utf8_lossy(&bytes).into_owned();

        match name.strip_prefix("templates/") {
            Some(template) => bundle.templates.push(BundleFile {
                name: template.to_string(),
                data,
            }),
            None => bundle.files.push(BundleFile { name, data }),
        }
    }

    bundle.normalize();
    Ok(bundle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn write_chart(dir: &Path, name: &str) {
        std::fs::create_dir_all(dir.join("templates/sub")).unwrap();
        std::fs::write(
            dir.join("Chart.yaml"),
            format!("apiVersion: v2\nname: {}\nversion: 1.2.3\n", name),
        )
        .unwrap();
        std::fs::write(dir.join("values.yaml"), "replicas: 1\n").unwrap();
        std::fs::write(dir.join("templates/service.yaml"), "kind: Service\n").unwrap();
        std::fs::write(dir.join("templates/sub/deploy.yaml"), "kind: Deployment\n").unwrap();
        std::fs::write(dir.join("README.md"), "# chart\n").unwrap();
        std::fs::write(dir.join(".helmignore"), "*.bak\n").unwrap();
    }

    fn local(location: &Path, subpath: &str) -> SourceSpec {
        SourceSpec {
            source_type: SourceType::Local,
            location: location.display().to_string(),
            subpath: subpath.to_string(),
            reference: None,
        }
    }

    #[test]
    fn test_load_chart_dir() {
        let temp = TempDir::new().unwrap();
        write_chart(temp.path(), "blog");

        let bundle = load_chart_dir(temp.path()).unwrap();
        assert_eq!(bundle.metadata.name, "blog");
        assert_eq!(bundle.metadata.version, "1.2.3");
        assert_eq!(bundle.values, "replicas: 1\n");

        let templates: Vec<&str> = bundle.templates.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(templates, vec!["service.yaml", "sub/deploy.yaml"]);

        let files: Vec<&str> = bundle.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(files, vec!["README.md"]);
    }

    #[test]
    fn test_load_chart_dir_without_chart_yaml() {
        let temp = TempDir::new().unwrap();
        let err = load_chart_dir(temp.path()).unwrap_err();
        assert!(matches!(err, KubeError::Source { .. }));
        assert!(err.to_string().contains("Chart.yaml not found"));
    }

    #[cfg(unix)]
    #[test]
    fn test_load_chart_dir_unreadable_entry_fails() {
        let temp = TempDir::new().unwrap();
        write_chart(temp.path(), "blog");
        std::os::unix::fs::symlink(
            temp.path().join("templates/gone.yaml"),
            temp.path().join("templates/dangling.yaml"),
        )
        .unwrap();

        let err = load_chart_dir(temp.path()).unwrap_err();
        match err {
            KubeError::Source { location, .. } => {
                assert_eq!(location, temp.path().display().to_string())
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_local_source_subpath() {
        let temp = TempDir::new().unwrap();
        write_chart(&temp.path().join("charts/blog"), "blog");

        let source = LocalChartSource::new();
        let spec = local(temp.path(), "charts/blog");
        let checkout = source.fetch(&spec).await.unwrap();
        let bundle = source.build(&checkout, &spec).await.unwrap();

        assert_eq!(bundle.metadata.name, "blog");
    }

    #[tokio::test]
    async fn test_local_source_relative_to_base_dir() {
        let temp = TempDir::new().unwrap();
        write_chart(&temp.path().join("blog"), "blog");

        let source = LocalChartSource::with_base_dir(temp.path());
        let spec = SourceSpec {
            source_type: SourceType::Local,
            location: "blog".into(),
            subpath: ".".into(),
            reference: None,
        };

        let checkout = source.fetch(&spec).await.unwrap();
        assert_eq!(checkout.root, temp.path().join("blog"));
    }

    #[tokio::test]
    async fn test_git_source_unsupported() {
        let spec = SourceSpec {
            source_type: SourceType::Git,
            location: "https://example.com/charts.git".into(),
            subpath: ".".into(),
            reference: Some("main".into()),
        };

        let err = LocalChartSource::new().fetch(&spec).await.unwrap_err();
        assert!(matches!(err, KubeError::Source { .. }));
    }

    /// Counts fetches and delegates to a local source
    struct CountingSource {
        inner: LocalChartSource,
        fetches: AtomicUsize,
        releases: AtomicUsize,
    }

    #[async_trait]
    impl ChartSource for CountingSource {
        async fn fetch(&self, source: &SourceSpec) -> Result<SourceCheckout> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.inner.fetch(source).await
        }

        async fn build(&self, checkout: &SourceCheckout, source: &SourceSpec) -> Result<Bundle> {
            self.inner.build(checkout, source).await
        }

        async fn release(&self, _checkout: SourceCheckout) -> Result<()> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_cache_fetches_once_and_nests_dependencies() {
        let temp = TempDir::new().unwrap();
        write_chart(&temp.path().join("blog"), "blog");
        write_chart(&temp.path().join("db"), "db");

        let counting = Arc::new(CountingSource {
            inner: LocalChartSource::new(),
            fetches: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        });
        let mut cache = SourceCache::new(counting.clone());

        let chart: ChartSpec = serde_json::from_value(json!({
            "chart_name": "blog",
            "release": "blog",
            "namespace": "web",
            "source": {"type": "local", "location": temp.path().display().to_string(), "subpath": "blog"},
            "dependencies": [{
                "chart_name": "db",
                "release": "db",
                "namespace": "web",
                "source": {"type": "local", "location": temp.path().display().to_string(), "subpath": "db"}
            }]
        }))
        .unwrap();

        let bundle = cache.bundle_for(&chart).await.unwrap();
        assert_eq!(bundle.metadata.name, "blog");
        assert_eq!(bundle.dependencies.len(), 1);
        assert_eq!(bundle.dependencies[0].metadata.name, "db");

        cache.bundle_for(&chart).await.unwrap();
        assert_eq!(counting.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(cache.fetched(), 1);

        assert!(cache.release_all().await.is_empty());
        assert_eq!(counting.releases.load(Ordering::SeqCst), 1);
        assert_eq!(cache.fetched(), 0);
    }
}
