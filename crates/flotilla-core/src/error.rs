//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// Manifest shape invariant violated (document counts)
    #[error("invalid manifest structure: {details}{}", hint.as_deref().map(|h| format!("\nHint: {h}")).unwrap_or_default())]
    ManifestStructure {
        details: String,
        hint: Option<String>,
    },

    /// A document references a chart or chart group that does not exist
    #[error("{kind} '{document}' references unknown {missing_kind} '{missing}'")]
    UnresolvedReference {
        kind: String,
        document: String,
        missing_kind: String,
        missing: String,
    },

    /// Chart dependencies loop back onto themselves
    #[error("circular chart dependency: {chain}")]
    DependencyCycle { chain: String },

    /// A document's data could not be decoded into its typed form
    #[error("invalid {kind} document '{name}': {message}")]
    InvalidDocument {
        kind: String,
        name: String,
        message: String,
    },

    /// The document set failed schema validation
    #[error("document validation failed with {} error(s):\n  {}", messages.len(), messages.join("\n  "))]
    Validation { messages: Vec<String> },

    /// A point override string is not `kind:document:path=value`
    #[error("invalid override '{input}': {message}")]
    InvalidOverrideFormat { input: String, message: String },

    /// Unknown document kind in a point override
    #[error("invalid override type '{kind}' in '{input}' (expected chart, chart_group or manifest)")]
    InvalidOverrideType { kind: String, input: String },

    /// An override targets a document that is not part of the set
    #[error("override targets unknown document {schema} '{name}'")]
    UnknownOverrideDocument { schema: String, name: String },

    /// Overrides were applied but the result no longer validates
    #[error("overrides {} produce an invalid document set:\n  {}", overrides.join(", "), messages.join("\n  "))]
    InvalidOverrideValue {
        overrides: Vec<String>,
        messages: Vec<String>,
    },

    #[error("Invalid schema: {message}")]
    InvalidSchema { message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
