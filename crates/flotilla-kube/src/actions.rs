//! Pre/post upgrade lifecycle actions
//!
//! Before an update, a chart may ask for workloads to be deleted (typically
//! jobs that would otherwise block the upgrade) and created. After the
//! update it may ask for more workloads to be created. Unknown resource types
//! are logged and skipped; any API failure aborts the phase.

use flotilla_core::manifest::{LifecycleAction, UpgradeSpec};
use serde_json::{Map, Value as JsonValue};
use tracing::{info, warn};

use crate::cluster::{ClusterApi, ResourceKind};
use crate::error::{KubeError, Result};

/// Which side of the update a phase runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradePhase {
    Pre,
    Post,
}

impl std::fmt::Display for UpgradePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pre => write!(f, "pre-upgrade"),
            Self::Post => write!(f, "post-upgrade"),
        }
    }
}

/// What a phase actually did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionReport {
    /// (type, name) of every deleted resource
    pub deleted: Vec<(ResourceKind, String)>,
    /// (type, name) of every created resource
    pub created: Vec<(ResourceKind, String)>,
    /// Actions skipped because their type is not supported
    pub skipped: Vec<String>,
}

/// Runs lifecycle actions against the cluster
pub struct LifecycleRunner<'a> {
    cluster: &'a dyn ClusterApi,
}

impl<'a> LifecycleRunner<'a> {
    pub fn new(cluster: &'a dyn ClusterApi) -> Self {
        Self { cluster }
    }

    /// Run the pre-upgrade deletes, then the pre-upgrade creates
    pub async fn run_pre_upgrade(&self, upgrade: &UpgradeSpec, namespace: &str) -> Result<ActionReport> {
        let mut report = ActionReport::default();

        for action in &upgrade.pre.delete {
            let Some(kind) = self.supported(action, UpgradePhase::Pre, &mut report) else {
                continue;
            };
            self.delete(kind, action, namespace, &mut report).await?;
        }

        for action in &upgrade.pre.create {
            let Some(kind) = self.supported(action, UpgradePhase::Pre, &mut report) else {
                continue;
            };
            self.create(kind, action, namespace, &mut report).await?;
        }

        Ok(report)
    }

    /// Run the post-upgrade creates
    pub async fn run_post_upgrade(
        &self,
        upgrade: &UpgradeSpec,
        namespace: &str,
    ) -> Result<ActionReport> {
        let mut report = ActionReport::default();

        for action in &upgrade.post.create {
            let Some(kind) = self.supported(action, UpgradePhase::Post, &mut report) else {
                continue;
            };
            self.create(kind, action, namespace, &mut report).await?;
        }

        Ok(report)
    }

    fn supported(
        &self,
        action: &LifecycleAction,
        phase: UpgradePhase,
        report: &mut ActionReport,
    ) -> Option<ResourceKind> {
        match action.resource_type.parse::<ResourceKind>() {
            Ok(kind) => Some(kind),
            Err(_) => {
                warn!(
                    phase = %phase,
                    resource_type = %action.resource_type,
                    name = %action.name,
                    "Skipping lifecycle action with unsupported resource type"
                );
                report.skipped.push(action.resource_type.clone());
                None
            }
        }
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        action: &LifecycleAction,
        namespace: &str,
        report: &mut ActionReport,
    ) -> Result<()> {
        let names = if action.labels.is_empty() {
            vec![action.name.clone()]
        } else {
            let selector = label_selector(action);
            self.cluster
                .list_resources(kind, namespace, &selector)
                .await
                .map_err(|e| action_error("list", kind, &selector, namespace, e))?
                .items
                .into_iter()
                .map(|r| r.name)
                .collect()
        };

        for name in names.into_iter().filter(|n| !n.is_empty()) {
            info!(kind = %kind, name = %name, namespace = %namespace, "Deleting resource");
            self.cluster
                .delete_resource(kind, &name, namespace)
                .await
                .map_err(|e| action_error("delete", kind, &name, namespace, e))?;
            report.deleted.push((kind, name));
        }

        Ok(())
    }

    async fn create(
        &self,
        kind: ResourceKind,
        action: &LifecycleAction,
        namespace: &str,
        report: &mut ActionReport,
    ) -> Result<()> {
        let body = resource_body(kind, action)
            .map_err(|message| KubeError::LifecycleAction {
                operation: "create".to_string(),
                resource_type: kind.to_string(),
                name: action.name.clone(),
                namespace: namespace.to_string(),
                message,
            })?;

        info!(kind = %kind, name = %action.name, namespace = %namespace, "Creating resource");
        let name = self
            .cluster
            .create_resource(kind, namespace, &body)
            .await
            .map_err(|e| action_error("create", kind, &action.name, namespace, e))?;
        report.created.push((kind, name));

        Ok(())
    }
}

fn label_selector(action: &LifecycleAction) -> String {
    action
        .labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

fn action_error(
    operation: &str,
    kind: ResourceKind,
    name: &str,
    namespace: &str,
    source: KubeError,
) -> KubeError {
    KubeError::LifecycleAction {
        operation: operation.to_string(),
        resource_type: kind.to_string(),
        name: name.to_string(),
        namespace: namespace.to_string(),
        message: source.to_string(),
    }
}

fn type_meta(kind: ResourceKind) -> (&'static str, &'static str) {
    match kind {
        ResourceKind::Pod => ("v1", "Pod"),
        ResourceKind::Job => ("batch/v1", "Job"),
        ResourceKind::DaemonSet => ("apps/v1", "DaemonSet"),
        ResourceKind::StatefulSet => ("apps/v1", "StatefulSet"),
    }
}

/// Full object for a create action
///
/// `spec` holds the resource as written in the chart; missing type meta,
/// name and labels are filled in from the action itself.
fn resource_body(kind: ResourceKind, action: &LifecycleAction) -> std::result::Result<JsonValue, String> {
    let mut body = match &action.spec {
        Some(JsonValue::Object(map)) => map.clone(),
        Some(_) => return Err("resource spec must be a mapping".to_string()),
        None => Map::new(),
    };

    let (api_version, kind_name) = type_meta(kind);
    body.entry("apiVersion")
        .or_insert_with(|| JsonValue::String(api_version.to_string()));
    body.entry("kind")
        .or_insert_with(|| JsonValue::String(kind_name.to_string()));

    let metadata = body
        .entry("metadata")
        .or_insert_with(|| JsonValue::Object(Map::new()));
    let JsonValue::Object(metadata) = metadata else {
        return Err("metadata must be a mapping".to_string());
    };

    if !metadata.contains_key("name") {
        if action.name.is_empty() {
            return Err("no name given for the resource".to_string());
        }
        metadata.insert("name".to_string(), JsonValue::String(action.name.clone()));
    }

    if !action.labels.is_empty() {
        let labels = metadata
            .entry("labels")
            .or_insert_with(|| JsonValue::Object(Map::new()));
        if let JsonValue::Object(labels) = labels {
            for (k, v) in &action.labels {
                labels
                    .entry(k.clone())
                    .or_insert_with(|| JsonValue::String(v.clone()));
            }
        }
    }

    Ok(JsonValue::Object(body))
}
