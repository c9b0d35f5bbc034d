//! Typed chart, chart group and manifest specs, and document classification

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

use crate::document::{Document, DocumentKind, decode};
use crate::error::{CoreError, Result};

/// Release name for a chart under a manifest's prefix
pub fn release_name(prefix: &str, release: &str) -> String {
    format!("{}-{}", prefix, release)
}

/// Where a chart's source lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Local,
    Git,
    Tar,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Local => "local",
            Self::Git => "git",
            Self::Tar => "tar",
        };
        write!(f, "{}", s)
    }
}

/// Source descriptor for a chart
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceSpec {
    #[serde(rename = "type")]
    pub source_type: SourceType,

    /// Path, repository URL or tarball URL
    pub location: String,

    /// Directory of the chart inside the fetched source
    #[serde(default = "default_subpath")]
    pub subpath: String,

    /// Branch, tag or commit for git sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

fn default_subpath() -> String {
    ".".to_string()
}

/// A create/delete action against an auxiliary resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleAction {
    #[serde(default)]
    pub name: String,

    /// job, pod, daemonset or statefulset
    #[serde(rename = "type")]
    pub resource_type: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Resource body for create actions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<JsonValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreUpgrade {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delete: Vec<LifecycleAction>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub create: Vec<LifecycleAction>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostUpgrade {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub create: Vec<LifecycleAction>,
}

/// Upgrade behaviour of a chart
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpgradeSpec {
    #[serde(default)]
    pub no_hooks: bool,

    #[serde(default)]
    pub pre: PreUpgrade,

    #[serde(default)]
    pub post: PostUpgrade,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstallSpec {
    #[serde(default)]
    pub no_hooks: bool,
}

/// Readiness wait settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WaitSpec {
    /// Seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl WaitSpec {
    /// Label selector string (`k=v,k2=v2`)
    pub fn selector(&self) -> String {
        self.labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// A chart reference: a document name or, after resolution, the chart itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChartRef {
    Name(String),
    Chart(Box<ChartSpec>),
}

impl ChartRef {
    /// The embedded chart, if this reference is resolved
    pub fn as_chart(&self) -> Option<&ChartSpec> {
        match self {
            Self::Chart(chart) => Some(chart),
            Self::Name(_) => None,
        }
    }
}

/// Chart document data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    pub chart_name: String,

    /// Release name before the manifest prefix is applied
    pub release: String,

    pub namespace: String,

    pub source: SourceSpec,

    #[serde(default = "empty_object")]
    pub values: JsonValue,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<ChartRef>,

    #[serde(default)]
    pub install: InstallSpec,

    #[serde(default)]
    pub upgrade: UpgradeSpec,

    #[serde(default)]
    pub wait: WaitSpec,

    #[serde(default)]
    pub test: bool,

    /// Seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

fn empty_object() -> JsonValue {
    JsonValue::Object(serde_json::Map::new())
}

impl ChartSpec {
    /// Embedded dependencies (skips any unresolved name)
    pub fn resolved_dependencies(&self) -> impl Iterator<Item = &ChartSpec> {
        self.dependencies.iter().filter_map(ChartRef::as_chart)
    }

    /// Names of dependencies still unresolved anywhere below this chart
    pub fn unresolved_references(&self) -> Vec<String> {
        let mut names = Vec::new();
        for dep in &self.dependencies {
            match dep {
                ChartRef::Name(name) => names.push(name.clone()),
                ChartRef::Chart(chart) => names.extend(chart.unresolved_references()),
            }
        }
        names
    }

    /// Declared timeout: `wait.timeout`, falling back to `timeout`
    pub fn declared_timeout(&self) -> Option<u64> {
        self.wait.timeout.or(self.timeout)
    }
}

/// Chart group document data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartGroupSpec {
    #[serde(default)]
    pub description: String,

    /// Wait for each chart before moving to the next
    #[serde(default)]
    pub sequenced: bool,

    #[serde(default)]
    pub test_charts: bool,

    /// Deployment order
    pub chart_group: Vec<ChartRef>,
}

/// A group reference in a manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GroupRef {
    Name(String),
    Group(Box<NamedGroupSpec>),
}

/// An embedded group carries its own name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedGroupSpec {
    pub name: String,

    #[serde(flatten)]
    pub spec: ChartGroupSpec,
}

/// Manifest document data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestSpec {
    pub release_prefix: String,

    pub chart_groups: Vec<GroupRef>,
}

/// A named, decoded document
#[derive(Debug, Clone, PartialEq)]
pub struct Named<T> {
    pub name: String,
    pub spec: T,
}

/// Documents partitioned by kind
#[derive(Debug, Clone)]
pub struct ClassifiedDocuments {
    pub charts: Vec<Named<ChartSpec>>,
    pub groups: Vec<Named<ChartGroupSpec>>,
    pub manifest: Named<ManifestSpec>,
    /// Non-fatal findings such as unknown schemas
    pub warnings: Vec<String>,
}

/// Partition a document set into charts, groups and exactly one manifest
///
/// With `target_manifest`, manifests of other names are dropped before
/// the counts are checked. Warnings are collected, not logged; validation
/// runs this too, so logging is left to the caller acting on the result.
pub fn classify(documents: &[Document], target_manifest: Option<&str>) -> Result<ClassifiedDocuments> {
    let mut charts = Vec::new();
    let mut groups = Vec::new();
    let mut manifests = Vec::new();
    let mut warnings = Vec::new();

    for doc in documents {
        match doc.kind() {
            Some(DocumentKind::Chart) => charts.push(doc),
            Some(DocumentKind::ChartGroup) => groups.push(doc),
            Some(DocumentKind::Manifest) => {
                if target_manifest.is_none_or(|target| target == doc.name()) {
                    manifests.push(doc);
                }
            }
            None => {
                let message = format!(
                    "unknown schema '{}' on document '{}', ignoring",
                    doc.schema,
                    doc.name()
                );
                warnings.push(message);
            }
        }
    }

    if charts.is_empty() || groups.is_empty() || manifests.len() != 1 {
        let details = format!(
            "found {} chart(s), {} chart group(s), {} manifest(s); \
             need at least 1 chart, at least 1 chart group and exactly 1 manifest",
            charts.len(),
            groups.len(),
            manifests.len()
        );
        let hint = match target_manifest {
            Some(target) if manifests.is_empty() => Some(format!(
                "no manifest named '{}' was found, check the target manifest name",
                target
            )),
            _ => None,
        };
        return Err(CoreError::ManifestStructure { details, hint });
    }

    let charts = charts
        .into_iter()
        .map(|doc| {
            Ok(Named {
                name: doc.name().to_string(),
                spec: decode(doc)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let groups = groups
        .into_iter()
        .map(|doc| {
            Ok(Named {
                name: doc.name().to_string(),
                spec: decode(doc)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let manifest_doc = manifests[0];
    let manifest = Named {
        name: manifest_doc.name().to_string(),
        spec: decode(manifest_doc)?,
    };

    Ok(ClassifiedDocuments {
        charts,
        groups,
        manifest,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chart(name: &str) -> Document {
        Document::new(
            DocumentKind::Chart,
            name,
            json!({
                "chart_name": name,
                "release": name,
                "namespace": "default",
                "source": {"type": "local", "location": format!("./{}", name)}
            }),
        )
    }

    fn group(name: &str, charts: &[&str]) -> Document {
        Document::new(DocumentKind::ChartGroup, name, json!({"chart_group": charts}))
    }

    fn manifest(name: &str) -> Document {
        Document::new(
            DocumentKind::Manifest,
            name,
            json!({"release_prefix": "p", "chart_groups": ["web"]}),
        )
    }

    #[test]
    fn test_classify_minimal_set() {
        let docs = vec![chart("blog"), group("web", &["blog"]), manifest("site")];
        let classified = classify(&docs, None).unwrap();

        assert_eq!(classified.charts.len(), 1);
        assert_eq!(classified.charts[0].spec.source.subpath, ".");
        assert_eq!(classified.groups[0].spec.chart_group, vec![ChartRef::Name("blog".into())]);
        assert_eq!(classified.manifest.name, "site");
        assert!(classified.warnings.is_empty());
    }

    #[test]
    fn test_missing_category_fails() {
        let full = vec![chart("blog"), group("web", &["blog"]), manifest("site")];

        for skip in 0..3 {
            let docs: Vec<Document> = full
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != skip)
                .map(|(_, d)| d.clone())
                .collect();
            let err = classify(&docs, None).unwrap_err();
            assert!(matches!(err, CoreError::ManifestStructure { hint: None, .. }));
        }
    }

    #[test]
    fn test_two_manifests_need_target() {
        let docs = vec![
            chart("blog"),
            group("web", &["blog"]),
            manifest("site"),
            manifest("staging"),
        ];

        let err = classify(&docs, None).unwrap_err();
        assert!(err.to_string().contains("2 manifest(s)"));

        let classified = classify(&docs, Some("staging")).unwrap();
        assert_eq!(classified.manifest.name, "staging");
    }

    #[test]
    fn test_wrong_target_gets_hint() {
        let docs = vec![chart("blog"), group("web", &["blog"]), manifest("site")];
        let err = classify(&docs, Some("prod")).unwrap_err();

        match &err {
            CoreError::ManifestStructure { hint, .. } => {
                assert!(hint.as_deref().unwrap().contains("'prod'"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("Hint:"));
    }

    #[test]
    fn test_unknown_schema_is_warning() {
        let mut docs = vec![chart("blog"), group("web", &["blog"]), manifest("site")];
        docs.push(Document {
            schema: "other/Thing/v1".into(),
            metadata: crate::document::DocumentMetadata {
                name: "thing".into(),
                schema: None,
            },
            data: json!({}),
        });

        let classified = classify(&docs, None).unwrap();
        assert_eq!(classified.warnings.len(), 1);
        assert!(classified.warnings[0].contains("other/Thing/v1"));
    }

    #[test]
    fn test_wait_selector() {
        let wait = WaitSpec {
            timeout: None,
            labels: BTreeMap::from([
                ("app".to_string(), "blog".to_string()),
                ("tier".to_string(), "web".to_string()),
            ]),
        };
        assert_eq!(wait.selector(), "app=blog,tier=web");
        assert_eq!(WaitSpec::default().selector(), "");
    }

    #[test]
    fn test_release_name() {
        assert_eq!(release_name("prefix", "blog"), "prefix-blog");
    }
}
