//! Cluster API seam
//!
//! The orchestrator and readiness poller only need four operations from the
//! cluster: list, watch, delete and create, over a handful of workload kinds.
//! [`ClusterApi`] captures that; [`KubeCluster`] implements it with typed
//! `kube::Api` calls.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::{DaemonSet, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use kube::api::{Api, DeleteParams, ListParams, PostParams, PropagationPolicy, WatchEvent, WatchParams};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::time::Duration;

use crate::error::{KubeError, Result};

/// Phases that count as ready
pub const READY_PHASES: &[&str] = &["Running", "Succeeded"];

/// Longest watch the API server accepts
const MAX_WATCH_SECS: u64 = 290;

/// Workload kinds Flotilla can watch and act on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Pod,
    Job,
    DaemonSet,
    StatefulSet,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pod => "pod",
            Self::Job => "job",
            Self::DaemonSet => "daemonset",
            Self::StatefulSet => "statefulset",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pod" => Ok(Self::Pod),
            "job" => Ok(Self::Job),
            "daemonset" => Ok(Self::DaemonSet),
            "statefulset" => Ok(Self::StatefulSet),
            other => Err(format!("unsupported resource type: {}", other)),
        }
    }
}

/// Name, phase and labels of a watched resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceState {
    pub name: String,
    pub phase: String,
    pub labels: BTreeMap<String, String>,
}

impl ResourceState {
    pub fn new(name: impl Into<String>, phase: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phase: phase.into(),
            labels: BTreeMap::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        READY_PHASES.contains(&self.phase.as_str())
    }
}

/// A full listing plus the resource version to watch from
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceList {
    pub items: Vec<ResourceState>,
    pub resource_version: String,
}

/// A watch event, reduced to what readiness tracking needs
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceEvent {
    Added(ResourceState),
    Modified(ResourceState),
    Deleted(ResourceState),
    Error(String),
}

pub type EventStream = BoxStream<'static, Result<ResourceEvent>>;

/// Cluster operations used by Flotilla
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Fail with `ClusterUnavailable` when the API server cannot be used
    async fn check_reachable(&self) -> Result<()>;

    /// List resources matching a label selector (empty selector matches all)
    async fn list_resources(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &str,
    ) -> Result<ResourceList>;

    /// Watch resources from `resource_version`; the server closes the stream after `timeout`
    async fn watch_resources(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &str,
        resource_version: &str,
        timeout: Duration,
    ) -> Result<EventStream>;

    /// Delete a resource; a resource that is already gone is not an error
    async fn delete_resource(&self, kind: ResourceKind, name: &str, namespace: &str) -> Result<()>;

    /// Create a resource from its JSON body, returning the created name
    async fn create_resource(
        &self,
        kind: ResourceKind,
        namespace: &str,
        spec: &JsonValue,
    ) -> Result<String>;
}

/// `ClusterApi` backed by a kube client
#[derive(Clone)]
pub struct KubeCluster {
    client: kube::Client,
}

impl KubeCluster {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    /// Connect using the default kubeconfig or in-cluster config
    pub async fn try_default() -> Result<Self> {
        Ok(Self::new(kube::Client::try_default().await?))
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn list_typed<K>(
        &self,
        namespace: &str,
        selector: &str,
        phase: fn(&K) -> String,
    ) -> Result<ResourceList>
    where
        K: kube::Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as kube::Resource>::DynamicType: Default,
    {
        let mut lp = ListParams::default();
        if !selector.is_empty() {
            lp = lp.labels(selector);
        }

        let list = self.api::<K>(namespace).list(&lp).await?;
        Ok(ResourceList {
            items: list.items.iter().map(|o| state_of(o, phase)).collect(),
            resource_version: list.metadata.resource_version.unwrap_or_default(),
        })
    }

    async fn watch_typed<K>(
        &self,
        namespace: &str,
        selector: &str,
        resource_version: &str,
        timeout: Duration,
        phase: fn(&K) -> String,
    ) -> Result<EventStream>
    where
        K: kube::Resource<Scope = NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Debug
            + Send
            + 'static,
        <K as kube::Resource>::DynamicType: Default,
    {
        let secs = timeout.as_secs().clamp(1, MAX_WATCH_SECS) as u32;
        let mut wp = WatchParams::default().timeout(secs);
        if !selector.is_empty() {
            wp = wp.labels(selector);
        }

        let stream = self.api::<K>(namespace).watch(&wp, resource_version).await?;

        Ok(stream
            .filter_map(move |event| async move {
                match event {
                    Ok(WatchEvent::Added(o)) => Some(Ok(ResourceEvent::Added(state_of(&o, phase)))),
                    Ok(WatchEvent::Modified(o)) => {
                        Some(Ok(ResourceEvent::Modified(state_of(&o, phase))))
                    }
                    Ok(WatchEvent::Deleted(o)) => {
                        Some(Ok(ResourceEvent::Deleted(state_of(&o, phase))))
                    }
                    Ok(WatchEvent::Bookmark(_)) => None,
                    Ok(WatchEvent::Error(e)) => Some(Ok(ResourceEvent::Error(e.message))),
                    Err(e) => Some(Err(KubeError::Api(e))),
                }
            })
            .boxed())
    }

    async fn delete_typed<K>(&self, name: &str, namespace: &str) -> Result<()>
    where
        K: kube::Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as kube::Resource>::DynamicType: Default,
    {
        let dp = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Background),
            ..Default::default()
        };

        match self.api::<K>(namespace).delete(name, &dp).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(KubeError::Api(e)),
        }
    }

    async fn create_typed<K>(&self, namespace: &str, spec: &JsonValue) -> Result<String>
    where
        K: kube::Resource<Scope = NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
        <K as kube::Resource>::DynamicType: Default,
    {
        let object: K = serde_json::from_value(spec.clone())?;
        let created = self
            .api::<K>(namespace)
            .create(&PostParams::default(), &object)
            .await?;
        Ok(created.name_any())
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn check_reachable(&self) -> Result<()> {
        self.client
            .apiserver_version()
            .await
            .map(|_| ())
            .map_err(|e| KubeError::ClusterUnavailable {
                message: e.to_string(),
            })
    }

    async fn list_resources(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &str,
    ) -> Result<ResourceList> {
        match kind {
            ResourceKind::Pod => self.list_typed(namespace, selector, pod_phase).await,
            ResourceKind::Job => self.list_typed(namespace, selector, job_phase).await,
            ResourceKind::DaemonSet => self.list_typed(namespace, selector, daemonset_phase).await,
            ResourceKind::StatefulSet => {
                self.list_typed(namespace, selector, statefulset_phase).await
            }
        }
    }

    async fn watch_resources(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &str,
        resource_version: &str,
        timeout: Duration,
    ) -> Result<EventStream> {
        match kind {
            ResourceKind::Pod => {
                self.watch_typed(namespace, selector, resource_version, timeout, pod_phase)
                    .await
            }
            ResourceKind::Job => {
                self.watch_typed(namespace, selector, resource_version, timeout, job_phase)
                    .await
            }
            ResourceKind::DaemonSet => {
                self.watch_typed(namespace, selector, resource_version, timeout, daemonset_phase)
                    .await
            }
            ResourceKind::StatefulSet => {
                self.watch_typed(namespace, selector, resource_version, timeout, statefulset_phase)
                    .await
            }
        }
    }

    async fn delete_resource(&self, kind: ResourceKind, name: &str, namespace: &str) -> Result<()> {
        match kind {
            ResourceKind::Pod => self.delete_typed::<Pod>(name, namespace).await,
            ResourceKind::Job => self.delete_typed::<Job>(name, namespace).await,
            ResourceKind::DaemonSet => self.delete_typed::<DaemonSet>(name, namespace).await,
            ResourceKind::StatefulSet => self.delete_typed::<StatefulSet>(name, namespace).await,
        }
    }

    async fn create_resource(
        &self,
        kind: ResourceKind,
        namespace: &str,
        spec: &JsonValue,
    ) -> Result<String> {
        match kind {
            ResourceKind::Pod => self.create_typed::<Pod>(namespace, spec).await,
            ResourceKind::Job => self.create_typed::<Job>(namespace, spec).await,
            ResourceKind::DaemonSet => self.create_typed::<DaemonSet>(namespace, spec).await,
            ResourceKind::StatefulSet => self.create_typed::<StatefulSet>(namespace, spec).await,
        }
    }
}

fn state_of<K: kube::Resource>(object: &K, phase: fn(&K) -> String) -> ResourceState {
    ResourceState {
        name: object.name_any(),
        phase: phase(object),
        labels: object.labels().clone(),
    }
}

fn pod_phase(pod: &Pod) -> String {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.clone())
        .unwrap_or_else(|| "Unknown".to_string())
}

/// Succeeded once any completion is recorded, Failed when nothing is left running
fn job_phase(job: &Job) -> String {
    let status = job.status.as_ref();
    let succeeded = status.and_then(|s| s.succeeded).unwrap_or(0);
    let failed = status.and_then(|s| s.failed).unwrap_or(0);
    let active = status.and_then(|s| s.active).unwrap_or(0);

    if succeeded > 0 {
        "Succeeded"
    } else if failed > 0 && active == 0 {
        "Failed"
    } else if active > 0 {
        "Active"
    } else {
        "Pending"
    }
    .to_string()
}

/// Running when every scheduled pod is ready and updated
fn daemonset_phase(ds: &DaemonSet) -> String {
    let status = ds.status.as_ref();
    let desired = status.map(|s| s.desired_number_scheduled).unwrap_or(0);
    let ready = status.map(|s| s.number_ready).unwrap_or(0);
    let updated = status.and_then(|s| s.updated_number_scheduled).unwrap_or(0);

    if desired > 0 && ready == desired && updated == desired {
        "Running"
    } else {
        "Pending"
    }
    .to_string()
}

/// Running when all replicas are ready and the rollout revision has settled
fn statefulset_phase(sts: &StatefulSet) -> String {
    let desired = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let status = sts.status.as_ref();
    let ready = status.and_then(|s| s.ready_replicas).unwrap_or(0);
    let current = status.and_then(|s| s.current_replicas).unwrap_or(0);
    let revision_match = status.and_then(|s| s.current_revision.as_ref())
        == status.and_then(|s| s.update_revision.as_ref());

    if ready == desired && current == desired && revision_match {
        "Running"
    } else {
        "Pending"
    }
    .to_string()
}
