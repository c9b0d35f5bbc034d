//! Document schema validation
//!
//! Each document kind carries an embedded JSON Schema (written as YAML under
//! `schemas/`). Validation collects every finding into a [`ValidationReport`]
//! instead of stopping at the first error, except for structural problems
//! which halt further checks.

use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::HashSet;

use crate::document::{Document, DocumentKind};
use crate::error::{CoreError, Result};
use crate::manifest::classify;
use crate::resolve::resolve;

const CHART_SCHEMA: &str = include_str!("../schemas/chart.yaml");
const CHART_GROUP_SCHEMA: &str = include_str!("../schemas/chart_group.yaml");
const MANIFEST_SCHEMA: &str = include_str!("../schemas/manifest.yaml");

/// Severity of a validation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for MessageLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        };
        write!(f, "{}", s)
    }
}

/// One human-readable validation finding
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationMessage {
    pub level: MessageLevel,

    /// `kind 'name'` of the document concerned, when there is one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,

    pub text: String,
}

impl std::fmt::Display for ValidationMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.document {
            Some(doc) => write!(f, "[{}] {}: {}", self.level, doc, self.text),
            None => write!(f, "[{}] {}", self.level, self.text),
        }
    }
}

/// Outcome of validating a document set
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub messages: Vec<ValidationMessage>,
    pub error_count: usize,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.error_count == 0
    }

    fn push(&mut self, level: MessageLevel, document: Option<String>, text: impl Into<String>) {
        if level == MessageLevel::Error {
            self.error_count += 1;
        }
        self.messages.push(ValidationMessage {
            level,
            document,
            text: text.into(),
        });
    }

    /// Rendered error messages only
    pub fn errors(&self) -> Vec<String> {
        self.messages
            .iter()
            .filter(|m| m.level == MessageLevel::Error)
            .map(|m| m.to_string())
            .collect()
    }

    /// Convert into an error when any error was found
    pub fn into_result(self) -> Result<Self> {
        if self.is_valid() {
            Ok(self)
        } else {
            Err(CoreError::Validation {
                messages: self.errors(),
            })
        }
    }
}

/// Compiled validators for every document kind
pub struct DocumentValidator {
    chart: jsonschema::Validator,
    chart_group: jsonschema::Validator,
    manifest: jsonschema::Validator,
}

impl DocumentValidator {
    pub fn new() -> Result<Self> {
        Ok(Self {
            chart: compile(CHART_SCHEMA)?,
            chart_group: compile(CHART_GROUP_SCHEMA)?,
            manifest: compile(MANIFEST_SCHEMA)?,
        })
    }

    fn for_kind(&self, kind: DocumentKind) -> &jsonschema::Validator {
        match kind {
            DocumentKind::Chart => &self.chart,
            DocumentKind::ChartGroup => &self.chart_group,
            DocumentKind::Manifest => &self.manifest,
        }
    }

    /// Check a single document's data against its kind's schema
    pub fn validate_data(&self, kind: DocumentKind, data: &JsonValue) -> Vec<String> {
        self.for_kind(kind)
            .iter_errors(data)
            .map(|e| {
                let path = e.instance_path.to_string();
                let path = if path.is_empty() {
                    "(root)".to_string()
                } else {
                    path
                };
                format!("{}: {}", path, e.to_string().replace('"', "'"))
            })
            .collect()
    }

    /// Validate a whole document set
    ///
    /// Runs per-document schema checks, then classification, then
    /// reference resolution. A structural failure stops the run.
    pub fn validate(&self, documents: &[Document], target_manifest: Option<&str>) -> ValidationReport {
        let mut report = ValidationReport::default();
        let mut seen = HashSet::new();

        for doc in documents {
            let Some(kind) = doc.kind() else {
                report.push(
                    MessageLevel::Warning,
                    Some(format!("'{}'", doc.name())),
                    format!("unknown schema '{}', document ignored", doc.schema),
                );
                continue;
            };
            let label = Some(format!("{} '{}'", kind, doc.name()));

            if doc.name().is_empty() {
                report.push(MessageLevel::Error, label.clone(), "metadata.name is empty");
            }
            if !seen.insert((kind, doc.name().to_string())) {
                report.push(
                    MessageLevel::Error,
                    label.clone(),
                    format!("duplicate {} name", kind),
                );
            }
            for error in self.validate_data(kind, &doc.data) {
                report.push(MessageLevel::Error, label.clone(), error);
            }
        }

        let classified = match classify(documents, target_manifest) {
            Ok(classified) => classified,
            Err(err @ CoreError::ManifestStructure { .. }) => {
                report.push(MessageLevel::Error, None, err.to_string());
                return report;
            }
            Err(err) => {
                // Decode failures repeat schema errors already reported
                if report.is_valid() {
                    report.push(MessageLevel::Error, None, err.to_string());
                }
                return report;
            }
        };

        if let Err(err) = resolve(&classified) {
            report.push(MessageLevel::Error, None, err.to_string());
            return report;
        }

        report.push(
            MessageLevel::Info,
            None,
            format!(
                "manifest '{}': {} chart(s), {} chart group(s)",
                classified.manifest.name,
                classified.charts.len(),
                classified.groups.len()
            ),
        );
        report
    }
}

fn compile(source: &str) -> Result<jsonschema::Validator> {
    let schema: JsonValue = serde_yaml::from_str(source)?;
    jsonschema::validator_for(&schema).map_err(|e| CoreError::InvalidSchema {
        message: e.to_string(),
    })
}

/// Validate a document set with freshly compiled validators
pub fn validate_documents(documents: &[Document], target_manifest: Option<&str>) -> Result<ValidationReport> {
    Ok(DocumentValidator::new()?.validate(documents, target_manifest))
}
