//! Operator overrides: value files and `kind:doc:path=value` point overrides

use std::str::FromStr;

use crate::document::{Document, DocumentKind};
use crate::error::{CoreError, Result};
use crate::schema::DocumentValidator;
use crate::values::{deep_merge, get_path, nested_value, parse_scalar};

/// A parsed `kind:document:path.to.field=value` override
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointOverride {
    pub kind: DocumentKind,
    pub document: String,
    pub path: Vec<String>,
    pub value: String,
}

impl FromStr for PointOverride {
    type Err = CoreError;

    fn from_str(input: &str) -> Result<Self> {
        let format_error = |message: &str| CoreError::InvalidOverrideFormat {
            input: input.to_string(),
            message: message.to_string(),
        };

        let (target, value) = input
            .split_once('=')
            .ok_or_else(|| format_error("expected kind:document:path=value"))?;

        let mut parts = target.splitn(3, ':');
        let (Some(kind), Some(document), Some(path)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(format_error("expected kind:document:path=value"));
        };

        let kind = kind
            .parse::<DocumentKind>()
            .map_err(|_| CoreError::InvalidOverrideType {
                kind: kind.to_string(),
                input: input.to_string(),
            })?;

        if document.is_empty() {
            return Err(format_error("document name is empty"));
        }

        let path: Vec<String> = path.split('.').map(str::to_string).collect();
        if path.iter().any(String::is_empty) {
            return Err(format_error("field path has an empty segment"));
        }

        Ok(Self {
            kind,
            document: document.to_string(),
            path,
            value: value.to_string(),
        })
    }
}

impl std::fmt::Display for PointOverride {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}={}",
            self.kind,
            self.document,
            self.path.join("."),
            self.value
        )
    }
}

impl PointOverride {
    /// Single-leaf structure to merge into `data`
    ///
    /// A field that currently holds a string or a list receives the literal
    /// text; anything else gets the coerced scalar.
    pub fn to_value(&self, data: &serde_json::Value) -> serde_json::Value {
        let leaf = match get_path(data, &self.path) {
            Some(serde_json::Value::String(_)) | Some(serde_json::Value::Array(_)) => {
                serde_json::Value::String(self.value.clone())
            }
            _ => parse_scalar(&self.value),
        };
        nested_value(&self.path, leaf)
    }
}

/// Applies value files and point overrides to a copy of a document set
#[derive(Debug, Clone)]
pub struct Override {
    documents: Vec<Document>,
    target_manifest: Option<String>,
}

impl Override {
    /// Start from a deep copy of `documents`
    pub fn new(documents: &[Document]) -> Self {
        Self {
            documents: documents.to_vec(),
            target_manifest: None,
        }
    }

    /// Manifest to select when re-validating a set that declares several
    pub fn with_target_manifest(mut self, target: Option<&str>) -> Self {
        self.target_manifest = target.map(str::to_string);
        self
    }

    /// Merge value files, then point overrides, then re-validate
    ///
    /// Each value file is a list of documents matched to the working set by
    /// schema and name. On any error nothing is returned, so callers never
    /// see a partially overridden set.
    pub fn apply(mut self, value_files: &[Vec<Document>], overrides: &[String]) -> Result<Vec<Document>> {
        let point_overrides = overrides
            .iter()
            .map(|o| o.parse::<PointOverride>())
            .collect::<Result<Vec<_>>>()?;

        let mut applied = Vec::new();

        for file in value_files {
            for overlay in file {
                let target = self.find_mut(&overlay.schema, overlay.name())?;
                deep_merge(&mut target.data, &overlay.data);
                applied.push(format!("{}:{} (values file)", overlay.schema, overlay.name()));
            }
        }

        for point in &point_overrides {
            let target = self.find_mut(point.kind.schema(), &point.document)?;
            let overlay = point.to_value(&target.data);
            deep_merge(&mut target.data, &overlay);
            applied.push(point.to_string());
        }

        if applied.is_empty() {
            return Ok(self.documents);
        }

        tracing::debug!(count = applied.len(), "applied overrides");

        let report = DocumentValidator::new()?.validate(&self.documents, self.target_manifest.as_deref());
        if !report.is_valid() {
            return Err(CoreError::InvalidOverrideValue {
                overrides: applied,
                messages: report.errors(),
            });
        }

        Ok(self.documents)
    }

    fn find_mut(&mut self, schema: &str, name: &str) -> Result<&mut Document> {
        self.documents
            .iter_mut()
            .find(|d| d.matches(schema, name))
            .ok_or_else(|| CoreError::UnknownOverrideDocument {
                schema: schema.to_string(),
                name: name.to_string(),
            })
    }
}
