//! Built chart bundles

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Chart metadata (from `Chart.yaml`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleMetadata {
    pub name: String,

    #[serde(default)]
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A named text file inside a bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleFile {
    pub name: String,
    pub data: String,
}

/// The ready-to-install form of a chart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    pub metadata: BundleMetadata,

    /// Sorted by name
    #[serde(default)]
    pub templates: Vec<BundleFile>,

    /// Default values, raw YAML text
    #[serde(default)]
    pub values: String,

    /// Sorted by name
    #[serde(default)]
    pub files: Vec<BundleFile>,

    #[serde(default)]
    pub dependencies: Vec<Bundle>,
}

impl Bundle {
    pub fn new(metadata: BundleMetadata) -> Self {
        Self {
            metadata,
            templates: Vec::new(),
            values: String::new(),
            files: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    /// Canonical text form used for comparisons
    pub fn to_canonical_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// SHA256 of the canonical form
    pub fn digest(&self) -> Result<String> {
        let canonical = self.to_canonical_yaml()?;
        Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
    }

    /// Sort templates and files so equal charts serialize identically
    pub fn normalize(&mut self) {
        self.templates.sort_by(|a, b| a.name.cmp(&b.name));
        self.files.sort_by(|a, b| a.name.cmp(&b.name));
        for dep in &mut self.dependencies {
            dep.normalize();
        }
    }
}
