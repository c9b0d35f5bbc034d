//! Diff engine for deciding whether an installed release needs an upgrade
//!
//! Two axes are compared:
//! - the chart bundle, through its canonical serialization (digests first,
//!   a unified diff only when they differ)
//! - the values, as YAML text

use flotilla_core::{Bundle, KnownRelease};
use serde::Serialize;
use serde_json::Value as JsonValue;
use similar::TextDiff;

use crate::error::Result;

/// Differences between an installed release and its target
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReleaseDiff {
    pub release: String,
    /// Unified diff lines of the bundle
    pub chart: Vec<String>,
    /// Unified diff lines of the values
    pub values: Vec<String>,
}

impl ReleaseDiff {
    /// True when neither the chart nor the values changed
    pub fn is_empty(&self) -> bool {
        self.chart.is_empty() && self.values.is_empty()
    }
}

/// Diff engine for release comparison
pub struct DiffEngine {
    /// Show context lines around changes
    pub context_lines: usize,
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DiffEngine {
    /// Create a new diff engine
    pub fn new() -> Self {
        Self { context_lines: 3 }
    }

    /// Compare an installed release with a target bundle and values
    pub fn diff_release(
        &self,
        installed: &KnownRelease,
        bundle: &Bundle,
        values: &JsonValue,
    ) -> Result<ReleaseDiff> {
        Ok(ReleaseDiff {
            release: installed.name.clone(),
            chart: self.diff_bundles(&installed.bundle, bundle)?,
            values: self.diff_values(&installed.raw_values, values)?,
        })
    }

    /// Unified diff of two bundles, empty when their digests match
    pub fn diff_bundles(&self, installed: &Bundle, target: &Bundle) -> Result<Vec<String>> {
        if installed.digest()? == target.digest()? {
            return Ok(Vec::new());
        }

        let old = installed.to_canonical_yaml()?;
        let new = target.to_canonical_yaml()?;
        Ok(self.unified(&old, &new, "installed chart", "target chart"))
    }

    /// Unified diff of installed raw values against target values
    ///
    /// Both sides are re-serialized so formatting differences in the stored
    /// YAML do not count as changes. Empty and null values are equivalent.
    pub fn diff_values(&self, installed_raw: &str, target: &JsonValue) -> Result<Vec<String>> {
        let installed: JsonValue = if installed_raw.trim().is_empty() {
            JsonValue::Null
        } else {
            serde_yaml::from_str(installed_raw)?
        };

        let old = canonical_values(&installed)?;
        let new = canonical_values(target)?;
        if old == new {
            return Ok(Vec::new());
        }

        Ok(self.unified(&old, &new, "installed values", "target values"))
    }

    fn unified(&self, old: &str, new: &str, old_label: &str, new_label: &str) -> Vec<String> {
        TextDiff::from_lines(old, new)
            .unified_diff()
            .context_radius(self.context_lines)
            .header(old_label, new_label)
            .to_string()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

/// Values rendered as YAML, with null treated as an empty mapping
pub fn canonical_values(values: &JsonValue) -> Result<String> {
    if values.is_null() {
        return Ok(serde_yaml::to_string(&JsonValue::Object(Default::default()))?);
    }
    Ok(serde_yaml::to_string(values)?)
}
