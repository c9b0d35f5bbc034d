//! CLI error types with exit code handling
//!
//! This module provides a unified error type for CLI operations that
//! maps library errors to appropriate exit codes.

use flotilla_core::CoreError;
use flotilla_kube::KubeError;
use miette::Diagnostic;
use thiserror::Error;

use crate::exit_codes;

/// CLI-specific error type that includes exit code information
#[derive(Error, Debug, Diagnostic, Clone)]
pub enum CliError {
    /// One or more documents failed validation
    #[error("Validation failed: {message}")]
    #[diagnostic(code(flotilla::cli::validation))]
    Validation {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Manifest structure, references or overrides are wrong
    #[error("Document error: {message}")]
    #[diagnostic(code(flotilla::cli::document))]
    Document {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// A sync stopped part way
    #[error("Sync failed: {message}")]
    #[diagnostic(code(flotilla::cli::sync))]
    Sync {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Release service or cluster unreachable
    #[error("Service unavailable: {message}")]
    #[diagnostic(
        code(flotilla::cli::unavailable),
        help("check the state directory and cluster credentials")
    )]
    Unavailable { message: String },

    /// Invalid combination of arguments
    #[error("Usage error: {message}")]
    #[diagnostic(code(flotilla::cli::usage))]
    Usage { message: String },

    /// IO error (file not found, permissions, etc.)
    #[error("IO error: {message}")]
    #[diagnostic(code(flotilla::cli::io))]
    Io { message: String },

    /// Internal error (runtime, unexpected failure)
    #[error("Internal error: {message}")]
    #[diagnostic(code(flotilla::cli::internal))]
    Internal { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Validation { .. } => exit_codes::VALIDATION_ERROR,
            CliError::Document { .. } => exit_codes::DOCUMENT_ERROR,
            CliError::Sync { .. } => exit_codes::SYNC_ERROR,
            CliError::Unavailable { .. } => exit_codes::UNAVAILABLE,
            CliError::Usage { .. } => exit_codes::USAGE_ERROR,
            CliError::Io { .. } => exit_codes::IO_ERROR,
            CliError::Internal { .. } => exit_codes::ERROR,
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a validation error with help text
    pub fn validation_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        let message = err.to_string();
        match err {
            CoreError::Validation { .. } | CoreError::InvalidOverrideValue { .. } => {
                CliError::Validation {
                    message,
                    help: Some("run `flotilla validate` for the full report".to_string()),
                }
            }
            CoreError::Io(_) => CliError::Io { message },
            CoreError::InvalidSchema { .. } => CliError::Internal { message },
            CoreError::InvalidOverrideFormat { .. } | CoreError::InvalidOverrideType { .. } => {
                CliError::Document {
                    message,
                    help: Some("overrides look like kind:document:path.to.field=value".to_string()),
                }
            }
            _ => CliError::Document {
                message,
                help: None,
            },
        }
    }
}

impl From<KubeError> for CliError {
    fn from(err: KubeError) -> Self {
        let phase = match &err {
            KubeError::SyncAborted { phase, .. } => Some(*phase),
            _ => None,
        };

        let root = match err {
            KubeError::SyncAborted { source, .. } => *source,
            other => other,
        };

        match root {
            KubeError::Core(core) => CliError::from(core),
            KubeError::ServiceUnavailable { message } | KubeError::ClusterUnavailable { message } => {
                CliError::Unavailable { message }
            }
            KubeError::Io(e) => CliError::from(e),
            other => CliError::Sync {
                message: other.to_string(),
                help: phase.map(|p| format!("the sync stopped during {}; nothing was rolled back", p)),
            },
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_kube::{SyncPhase, SyncSummary};

    #[test]
    fn test_core_errors_map_to_exit_codes() {
        let structural = CliError::from(CoreError::DependencyCycle {
            chain: "a -> b -> a".into(),
        });
        assert_eq!(structural.exit_code(), exit_codes::DOCUMENT_ERROR);

        let validation = CliError::from(CoreError::Validation {
            messages: vec!["bad".into()],
        });
        assert_eq!(validation.exit_code(), exit_codes::VALIDATION_ERROR);
    }

    #[test]
    fn test_aborted_sync_unwraps_cause() {
        let err = KubeError::SyncAborted {
            phase: SyncPhase::Act,
            summary: Box::new(SyncSummary::default()),
            source: Box::new(KubeError::ReleaseInstall {
                release: "p-a".into(),
                namespace: "web".into(),
                message: "boom".into(),
            }),
        };

        let cli = CliError::from(err);
        assert_eq!(cli.exit_code(), exit_codes::SYNC_ERROR);
        assert!(cli.to_string().contains("p-a"));
        match cli {
            CliError::Sync { help: Some(help), .. } => assert!(help.contains("act")),
            other => panic!("unexpected error: {other:?}"),
        }

        let unavailable = CliError::from(KubeError::SyncAborted {
            phase: SyncPhase::PreFlight,
            summary: Box::new(SyncSummary::default()),
            source: Box::new(KubeError::ServiceUnavailable {
                message: "down".into(),
            }),
        });
        assert_eq!(unavailable.exit_code(), exit_codes::UNAVAILABLE);
    }

    #[test]
    fn test_unreachable_cluster_is_unavailable() {
        let cli = CliError::from(KubeError::SyncAborted {
            phase: SyncPhase::PreFlight,
            summary: Box::new(SyncSummary::default()),
            source: Box::new(KubeError::ClusterUnavailable {
                message: "no cluster connection".into(),
            }),
        });
        assert_eq!(cli.exit_code(), exit_codes::UNAVAILABLE);
        assert!(cli.to_string().contains("no cluster connection"));
    }
}
