//! Document envelopes and loading
//!
//! Every declaration handed to Flotilla is a document with a `schema`
//! identifying its kind, a `metadata.name` unique within that kind, and a
//! kind-specific `data` payload:
//!
//! ```yaml
//! schema: flotilla/Chart/v1
//! metadata:
//!   name: blog
//! data:
//!   chart_name: blog
//!   release: blog
//!   namespace: web
//!   source:
//!     type: local
//!     location: ./charts/blog
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::Path;

use crate::error::{CoreError, Result};

/// Schema identifier for chart documents
pub const CHART_SCHEMA: &str = "flotilla/Chart/v1";

/// Schema identifier for chart group documents
pub const CHART_GROUP_SCHEMA: &str = "flotilla/ChartGroup/v1";

/// Schema identifier for manifest documents
pub const MANIFEST_SCHEMA: &str = "flotilla/Manifest/v1";

/// The three declaration kinds understood by Flotilla
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Chart,
    ChartGroup,
    Manifest,
}

impl DocumentKind {
    /// Schema identifier for this kind
    pub fn schema(&self) -> &'static str {
        match self {
            Self::Chart => CHART_SCHEMA,
            Self::ChartGroup => CHART_GROUP_SCHEMA,
            Self::Manifest => MANIFEST_SCHEMA,
        }
    }

    /// Map a schema identifier back to its kind
    pub fn from_schema(schema: &str) -> Option<Self> {
        match schema {
            CHART_SCHEMA => Some(Self::Chart),
            CHART_GROUP_SCHEMA => Some(Self::ChartGroup),
            MANIFEST_SCHEMA => Some(Self::Manifest),
            _ => None,
        }
    }

    /// Short name used in override strings and messages
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chart => "chart",
            Self::ChartGroup => "chart_group",
            Self::Manifest => "manifest",
        }
    }
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DocumentKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "chart" => Ok(Self::Chart),
            "chart_group" => Ok(Self::ChartGroup),
            "manifest" => Ok(Self::Manifest),
            _ => Err(format!("unknown document kind: {}", s)),
        }
    }
}

/// Document metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Document name, unique within its kind
    pub name: String,

    /// Optional metadata schema marker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
}

/// A single declaration document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Kind and version identifier
    pub schema: String,

    /// Document metadata
    pub metadata: DocumentMetadata,

    /// Kind-specific payload
    #[serde(default)]
    pub data: JsonValue,
}

impl Document {
    /// Create a document of a known kind
    pub fn new(kind: DocumentKind, name: impl Into<String>, data: JsonValue) -> Self {
        Self {
            schema: kind.schema().to_string(),
            metadata: DocumentMetadata {
                name: name.into(),
                schema: None,
            },
            data,
        }
    }

    /// Document name
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Document kind, if the schema is one Flotilla understands
    pub fn kind(&self) -> Option<DocumentKind> {
        DocumentKind::from_schema(&self.schema)
    }

    /// Whether this document has the given schema and name
    pub fn matches(&self, schema: &str, name: &str) -> bool {
        self.schema == schema && self.metadata.name == name
    }

    /// Parse every document in a YAML (or JSON) stream
    ///
    /// Empty documents (a bare `---`) are skipped.
    pub fn parse_all(content: &str) -> Result<Vec<Document>> {
        let mut documents = Vec::new();

        for de in serde_yaml::Deserializer::from_str(content) {
            let value = JsonValue::deserialize(de)?;
            if value.is_null() {
                continue;
            }
            documents.push(serde_json::from_value(value)?);
        }

        Ok(documents)
    }

    /// Load every document from a file
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Vec<Document>> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse_all(&content)
    }

    /// Load and concatenate documents from several files, in order
    pub fn load_files<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<Document>> {
        let mut documents = Vec::new();
        for path in paths {
            documents.extend(Self::load_file(path)?);
        }
        Ok(documents)
    }

    /// Serialize a document list as a multi-document YAML stream
    pub fn to_yaml_stream(documents: &[Document]) -> Result<String> {
        let mut out = String::new();
        for doc in documents {
            out.push_str("---\n");
            out.push_str(&serde_yaml::to_string(doc)?);
        }
        Ok(out)
    }
}

/// Decode a document's data into a typed spec
pub(crate) fn decode<T: serde::de::DeserializeOwned>(doc: &Document) -> Result<T> {
    serde_json::from_value(doc.data.clone()).map_err(|e| CoreError::InvalidDocument {
        kind: doc
            .kind()
            .map(|k| k.to_string())
            .unwrap_or_else(|| doc.schema.clone()),
        name: doc.name().to_string(),
        message: e.to_string(),
    })
}
