//! Dependency resolution
//!
//! Turns the name references between charts, groups and the manifest into a
//! self-contained tree. Every embedding is an independent copy of the
//! referenced data.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::document::DocumentKind;
use crate::error::{CoreError, Result};
use crate::manifest::{
    ChartGroupSpec, ChartRef, ChartSpec, ClassifiedDocuments, GroupRef, release_name,
};

/// A chart as deployed by a group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedChart {
    /// Document name (or chart name for charts embedded inline)
    pub name: String,

    #[serde(flatten)]
    pub spec: ChartSpec,
}

/// A chart group with its charts embedded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedGroup {
    pub name: String,
    pub description: String,
    pub sequenced: bool,
    pub test_charts: bool,
    pub charts: Vec<ResolvedChart>,
}

/// A fully resolved manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedManifest {
    pub name: String,
    pub release_prefix: String,
    pub chart_groups: Vec<ResolvedGroup>,
}

impl ResolvedManifest {
    /// Every chart in deployment order
    pub fn charts(&self) -> impl Iterator<Item = &ResolvedChart> {
        self.chart_groups.iter().flat_map(|g| g.charts.iter())
    }

    /// Prefixed release names of every declared chart
    pub fn release_names(&self) -> Vec<String> {
        self.charts()
            .map(|c| release_name(&self.release_prefix, &c.spec.release))
            .collect()
    }

    /// Dependency names left unresolved anywhere in the tree
    pub fn unresolved_references(&self) -> Vec<String> {
        self.charts()
            .flat_map(|c| c.spec.unresolved_references())
            .collect()
    }
}

/// Resolve every reference in a classified document set
///
/// Fails on the first missing reference; no partial manifest is returned.
pub fn resolve(classified: &ClassifiedDocuments) -> Result<ResolvedManifest> {
    let raw_charts: HashMap<&str, &ChartSpec> = classified
        .charts
        .iter()
        .map(|c| (c.name.as_str(), &c.spec))
        .collect();

    let mut charts = HashMap::new();
    for chart in &classified.charts {
        let mut stack = vec![chart.name.clone()];
        let resolved = resolve_chart(&chart.spec, &raw_charts, &mut stack)?;
        charts.insert(chart.name.as_str(), resolved);
    }

    let mut groups = HashMap::new();
    for group in &classified.groups {
        let resolved = resolve_group(&group.name, &group.spec, &charts, &raw_charts)?;
        groups.insert(group.name.as_str(), resolved);
    }

    let manifest = &classified.manifest;
    let mut chart_groups = Vec::with_capacity(manifest.spec.chart_groups.len());
    for group_ref in &manifest.spec.chart_groups {
        let group = match group_ref {
            GroupRef::Name(name) => {
                groups
                    .get(name.as_str())
                    .cloned()
                    .ok_or_else(|| CoreError::UnresolvedReference {
                        kind: DocumentKind::Manifest.to_string(),
                        document: manifest.name.clone(),
                        missing_kind: DocumentKind::ChartGroup.to_string(),
                        missing: name.clone(),
                    })?
            }
            GroupRef::Group(embedded) => {
                resolve_group(&embedded.name, &embedded.spec, &charts, &raw_charts)?
            }
        };
        chart_groups.push(group);
    }

    tracing::debug!(
        manifest = %manifest.name,
        groups = chart_groups.len(),
        "resolved manifest"
    );

    Ok(ResolvedManifest {
        name: manifest.name.clone(),
        release_prefix: manifest.spec.release_prefix.clone(),
        chart_groups,
    })
}

fn resolve_group(
    name: &str,
    spec: &ChartGroupSpec,
    charts: &HashMap<&str, ChartSpec>,
    raw_charts: &HashMap<&str, &ChartSpec>,
) -> Result<ResolvedGroup> {
    let mut resolved = Vec::with_capacity(spec.chart_group.len());

    for chart_ref in &spec.chart_group {
        let chart = match chart_ref {
            ChartRef::Name(chart_name) => ResolvedChart {
                name: chart_name.clone(),
                spec: charts.get(chart_name.as_str()).cloned().ok_or_else(|| {
                    CoreError::UnresolvedReference {
                        kind: DocumentKind::ChartGroup.to_string(),
                        document: name.to_string(),
                        missing_kind: DocumentKind::Chart.to_string(),
                        missing: chart_name.clone(),
                    }
                })?,
            },
            ChartRef::Chart(embedded) => {
                let mut stack = vec![embedded.chart_name.clone()];
                ResolvedChart {
                    name: embedded.chart_name.clone(),
                    spec: resolve_chart(embedded, raw_charts, &mut stack)?,
                }
            }
        };
        resolved.push(chart);
    }

    Ok(ResolvedGroup {
        name: name.to_string(),
        description: spec.description.clone(),
        sequenced: spec.sequenced,
        test_charts: spec.test_charts,
        charts: resolved,
    })
}

/// Depth-first copy of a chart with its dependencies embedded
///
/// `stack` holds the chain of chart names being resolved; its last entry
/// is the chart currently being expanded.
fn resolve_chart(
    spec: &ChartSpec,
    raw_charts: &HashMap<&str, &ChartSpec>,
    stack: &mut Vec<String>,
) -> Result<ChartSpec> {
    let mut resolved = spec.clone();
    let current = stack.last().cloned().unwrap_or_default();

    for dep in resolved.dependencies.iter_mut() {
        match dep {
            ChartRef::Name(name) => {
                if stack.iter().any(|s| s == name) {
                    let mut chain = stack.clone();
                    chain.push(name.clone());
                    return Err(CoreError::DependencyCycle {
                        chain: chain.join(" -> "),
                    });
                }

                let target = raw_charts.get(name.as_str()).ok_or_else(|| {
                    CoreError::UnresolvedReference {
                        kind: DocumentKind::Chart.to_string(),
                        document: current.clone(),
                        missing_kind: DocumentKind::Chart.to_string(),
                        missing: name.clone(),
                    }
                })?;

                stack.push(name.clone());
                let embedded = resolve_chart(target, raw_charts, stack)?;
                stack.pop();

                *dep = ChartRef::Chart(Box::new(embedded));
            }
            ChartRef::Chart(embedded) => {
                stack.push(embedded.chart_name.clone());
                let inner = resolve_chart(embedded, raw_charts, stack)?;
                stack.pop();

                **embedded = inner;
            }
        }
    }

    Ok(resolved)
}
