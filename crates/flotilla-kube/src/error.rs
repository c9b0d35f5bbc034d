//! Error types for flotilla-kube

use thiserror::Error;

use crate::sync::{SyncPhase, SyncSummary};

/// Result type for flotilla-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur while syncing a manifest
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Document, resolution or override error
    #[error(transparent)]
    Core(#[from] flotilla_core::CoreError),

    /// The release service cannot be reached
    #[error("release service unavailable: {message}")]
    ServiceUnavailable { message: String },

    /// The cluster API server cannot be reached
    #[error("cluster API unavailable: {message}")]
    ClusterUnavailable { message: String },

    /// Release not found
    #[error("release '{name}' not found")]
    ReleaseNotFound { name: String },

    /// Release already exists
    #[error("release '{name}' already exists in namespace '{namespace}'")]
    ReleaseAlreadyExists { name: String, namespace: String },

    #[error("failed to install release '{release}' in namespace '{namespace}': {message}")]
    ReleaseInstall {
        release: String,
        namespace: String,
        message: String,
    },

    #[error("failed to update release '{release}' in namespace '{namespace}': {message}")]
    ReleaseUpdate {
        release: String,
        namespace: String,
        message: String,
    },

    #[error("failed to uninstall release '{release}' in namespace '{namespace}': {message}")]
    ReleaseUninstall {
        release: String,
        namespace: String,
        message: String,
    },

    /// Resources of a release did not settle in time
    #[error("release '{release}' in namespace '{namespace}' was not ready after {timeout_secs}s")]
    ReadinessTimeout {
        release: String,
        namespace: String,
        timeout_secs: u64,
    },

    /// The watch stream reported an error event
    #[error("watch stream error: {0}")]
    WatchStream(String),

    /// A pre/post upgrade create or delete failed
    #[error("lifecycle {operation} of {resource_type} '{name}' in namespace '{namespace}' failed: {message}")]
    LifecycleAction {
        operation: String,
        resource_type: String,
        name: String,
        namespace: String,
        message: String,
    },

    /// A chart source could not be fetched or built
    #[error("chart source '{location}': {message}")]
    Source { location: String, message: String },

    /// Storage error
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A sync stopped part way; carries what had been done so far
    #[error("sync aborted during {phase}: {source}")]
    SyncAborted {
        phase: SyncPhase,
        summary: Box<SyncSummary>,
        #[source]
        source: Box<KubeError>,
    },
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl KubeError {
    /// Summary of work done before the failure, for aborted syncs
    pub fn summary(&self) -> Option<&SyncSummary> {
        match self {
            KubeError::SyncAborted { summary, .. } => Some(summary),
            _ => None,
        }
    }

    /// The underlying cause, unwrapping a sync abort
    pub fn root(&self) -> &KubeError {
        match self {
            KubeError::SyncAborted { source, .. } => source.root(),
            other => other,
        }
    }
}
