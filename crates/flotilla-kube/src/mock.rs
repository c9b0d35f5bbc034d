//! In-memory release service and scripted cluster for testing
//!
//! Both mocks record every call for assertions and can be told to fail
//! specific operations, so orchestrator behaviour can be exercised without a
//! cluster or a release service.

use async_trait::async_trait;
use futures::StreamExt;
use flotilla_core::{KnownRelease, ReleaseStatus};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::cluster::{ClusterApi, EventStream, ResourceEvent, ResourceKind, ResourceList, ResourceState};
use crate::error::{KubeError, Result};
use crate::release::{ReleaseRequest, ReleaseService, TestResult, TestStatus};

/// Operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    Install,
    Update,
    Uninstall,
    Test,
}

/// A recorded release service call
#[derive(Debug, Clone, PartialEq)]
pub enum ReleaseCall {
    Install(ReleaseRequest),
    Update(ReleaseRequest),
    Uninstall { name: String, purge: bool },
    Test { name: String, timeout: Duration },
}

/// In-memory release service
#[derive(Clone, Default)]
pub struct MockReleaseService {
    /// name -> release
    releases: Arc<RwLock<BTreeMap<String, KnownRelease>>>,
    calls: Arc<RwLock<Vec<ReleaseCall>>>,
    failures: Arc<RwLock<HashSet<(MockOperation, String)>>>,
    test_results: Arc<RwLock<HashMap<String, TestResult>>>,
    unreachable: bool,
}

impl MockReleaseService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with pre-populated releases
    pub fn with_releases(releases: Vec<KnownRelease>) -> Self {
        let service = Self::new();
        {
            let mut store = service.releases.write().unwrap();
            for release in releases {
                store.insert(release.name.clone(), release);
            }
        }
        service
    }

    /// Make `check_reachable` fail
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// Make one operation fail for one release
    pub fn fail_on(self, operation: MockOperation, release: &str) -> Self {
        self.failures
            .write()
            .unwrap()
            .insert((operation, release.to_string()));
        self
    }

    /// Report a given test result for a release
    pub fn with_test_result(self, release: &str, result: TestResult) -> Self {
        self.test_results
            .write()
            .unwrap()
            .insert(release.to_string(), result);
        self
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<ReleaseCall> {
        self.calls.read().unwrap().clone()
    }

    /// Names of releases currently stored
    pub fn release_names(&self) -> Vec<String> {
        self.releases.read().unwrap().keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<KnownRelease> {
        self.releases.read().unwrap().get(name).cloned()
    }

    fn record(&self, call: ReleaseCall) {
        self.calls.write().unwrap().push(call);
    }

    fn check_failure(&self, operation: MockOperation, release: &str) -> Result<()> {
        if self
            .failures
            .read()
            .unwrap()
            .contains(&(operation, release.to_string()))
        {
            return Err(KubeError::Storage(format!(
                "simulated {:?} failure for '{}'",
                operation, release
            )));
        }
        Ok(())
    }

    fn to_known(request: &ReleaseRequest, version: u32) -> KnownRelease {
        KnownRelease {
            name: request.release.clone(),
            namespace: request.namespace.clone(),
            version,
            status: ReleaseStatus::Deployed,
            bundle: request.bundle.clone(),
            raw_values: request.values.clone(),
            last_deployed: None,
        }
    }
}

#[async_trait]
impl ReleaseService for MockReleaseService {
    async fn check_reachable(&self) -> Result<()> {
        if self.unreachable {
            return Err(KubeError::ServiceUnavailable {
                message: "mock service marked unreachable".to_string(),
            });
        }
        Ok(())
    }

    async fn list_releases(&self) -> Result<Vec<KnownRelease>> {
        Ok(self.releases.read().unwrap().values().cloned().collect())
    }

    async fn install_release(&self, request: &ReleaseRequest) -> Result<KnownRelease> {
        self.record(ReleaseCall::Install(request.clone()));
        self.check_failure(MockOperation::Install, &request.release)?;

        let mut store = self.releases.write().unwrap();
        if store.contains_key(&request.release) {
            return Err(KubeError::ReleaseAlreadyExists {
                name: request.release.clone(),
                namespace: request.namespace.clone(),
            });
        }

        let release = Self::to_known(request, 1);
        if !request.dry_run {
            store.insert(release.name.clone(), release.clone());
        }
        Ok(release)
    }

    async fn update_release(&self, request: &ReleaseRequest) -> Result<KnownRelease> {
        self.record(ReleaseCall::Update(request.clone()));
        self.check_failure(MockOperation::Update, &request.release)?;

        let mut store = self.releases.write().unwrap();
        let current = store
            .get(&request.release)
            .ok_or_else(|| KubeError::ReleaseNotFound {
                name: request.release.clone(),
            })?;

        let release = Self::to_known(request, current.version + 1);
        if !request.dry_run {
            store.insert(release.name.clone(), release.clone());
        }
        Ok(release)
    }

    async fn uninstall_release(&self, name: &str, purge: bool) -> Result<()> {
        self.record(ReleaseCall::Uninstall {
            name: name.to_string(),
            purge,
        });
        self.check_failure(MockOperation::Uninstall, name)?;

        self.releases
            .write()
            .unwrap()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| KubeError::ReleaseNotFound {
                name: name.to_string(),
            })
    }

    async fn test_release(&self, name: &str, timeout: Duration) -> Result<TestResult> {
        self.record(ReleaseCall::Test {
            name: name.to_string(),
            timeout,
        });
        self.check_failure(MockOperation::Test, name)?;

        Ok(self
            .test_results
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_else(|| TestResult::single(TestStatus::Success)))
    }
}

/// One scripted list/watch round
#[derive(Debug, Clone, Default)]
pub struct WatchPass {
    listing: Vec<ResourceState>,
    events: Vec<ResourceEvent>,
    close: bool,
}

impl WatchPass {
    /// A pass whose listing returns `listing`
    pub fn new(listing: Vec<ResourceState>) -> Self {
        Self {
            listing,
            ..Default::default()
        }
    }

    /// Events delivered by the watch that follows the listing
    pub fn with_events(mut self, events: Vec<ResourceEvent>) -> Self {
        self.events = events;
        self
    }

    /// End the watch stream after its events instead of leaving it open
    pub fn closing(mut self) -> Self {
        self.close = true;
        self
    }
}

/// Calls made against a [`MockCluster`]
#[derive(Debug, Clone, Default)]
pub struct ClusterCalls {
    /// (kind, namespace, selector)
    pub lists: Vec<(ResourceKind, String, String)>,
    pub watches: usize,
    pub reachability_checks: usize,
    /// (kind, name, namespace)
    pub deletes: Vec<(ResourceKind, String, String)>,
    /// (kind, namespace, body)
    pub creates: Vec<(ResourceKind, String, JsonValue)>,
}

/// Cluster whose list/watch results are scripted pass by pass
///
/// Each `list_resources` call consumes the next [`WatchPass`]; the following
/// `watch_resources` call streams that pass's events. Once the script is
/// used up, listings come from the static resources set with
/// [`MockCluster::with_resources`] and watches stay open without events.
#[derive(Clone, Default)]
pub struct MockCluster {
    passes: Arc<Mutex<VecDeque<WatchPass>>>,
    next_watch: Arc<Mutex<Option<WatchPass>>>,
    resources: Arc<RwLock<Vec<ResourceState>>>,
    calls: Arc<RwLock<ClusterCalls>>,
    failing: Arc<RwLock<HashSet<String>>>,
    unreachable: bool,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail reachability checks with `ClusterUnavailable`
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    pub fn with_pass(self, pass: WatchPass) -> Self {
        self.passes.lock().unwrap().push_back(pass);
        self
    }

    /// Resources listed once the script is exhausted
    pub fn with_resources(self, resources: Vec<ResourceState>) -> Self {
        *self.resources.write().unwrap() = resources;
        self
    }

    /// Make create/delete of a named resource fail
    pub fn fail_on(self, name: &str) -> Self {
        self.failing.write().unwrap().insert(name.to_string());
        self
    }

    pub fn calls(&self) -> ClusterCalls {
        self.calls.read().unwrap().clone()
    }

    fn check_failure(&self, name: &str) -> Result<()> {
        if self.failing.read().unwrap().contains(name) {
            return Err(KubeError::Api(kube::Error::Api(kube::core::ErrorResponse {
                status: "Failure".to_string(),
                message: format!("simulated failure for '{}'", name),
                reason: "Forbidden".to_string(),
                code: 403,
            })));
        }
        Ok(())
    }
}

fn matches_selector(state: &ResourceState, selector: &str) -> bool {
    selector
        .split(',')
        .filter(|s| !s.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => state.labels.get(k).is_some_and(|value| value == v),
            None => state.labels.contains_key(term),
        })
}

#[async_trait]
impl ClusterApi for MockCluster {
    async fn check_reachable(&self) -> Result<()> {
        self.calls.write().unwrap().reachability_checks += 1;
        if self.unreachable {
            return Err(KubeError::ClusterUnavailable {
                message: "mock cluster is unreachable".to_string(),
            });
        }
        Ok(())
    }

    async fn list_resources(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &str,
    ) -> Result<ResourceList> {
        let version = {
            let mut calls = self.calls.write().unwrap();
            calls
                .lists
                .push((kind, namespace.to_string(), selector.to_string()));
            calls.lists.len()
        };

        let items = match self.passes.lock().unwrap().pop_front() {
            Some(pass) => {
                let items = pass.listing.clone();
                *self.next_watch.lock().unwrap() = Some(pass);
                items
            }
            None => {
                *self.next_watch.lock().unwrap() = None;
                self.resources
                    .read()
                    .unwrap()
                    .iter()
                    .filter(|r| matches_selector(r, selector))
                    .cloned()
                    .collect()
            }
        };

        Ok(ResourceList {
            items,
            resource_version: version.to_string(),
        })
    }

    async fn watch_resources(
        &self,
        _kind: ResourceKind,
        _namespace: &str,
        _selector: &str,
        _resource_version: &str,
        _timeout: Duration,
    ) -> Result<EventStream> {
        self.calls.write().unwrap().watches += 1;

        let pass = self.next_watch.lock().unwrap().take().unwrap_or_default();
        let events = futures::stream::iter(pass.events.into_iter().map(Ok::<_, KubeError>));

        if pass.close {
            Ok(events.boxed())
        } else {
            Ok(events.chain(futures::stream::pending()).boxed())
        }
    }

    async fn delete_resource(&self, kind: ResourceKind, name: &str, namespace: &str) -> Result<()> {
        self.calls
            .write()
            .unwrap()
            .deletes
            .push((kind, name.to_string(), namespace.to_string()));
        self.check_failure(name)
    }

    async fn create_resource(
        &self,
        kind: ResourceKind,
        namespace: &str,
        spec: &JsonValue,
    ) -> Result<String> {
        self.calls
            .write()
            .unwrap()
            .creates
            .push((kind, namespace.to_string(), spec.clone()));

        let name = spec["metadata"]["name"].as_str().unwrap_or_default().to_string();
        self.check_failure(&name)?;
        Ok(name)
    }
}
