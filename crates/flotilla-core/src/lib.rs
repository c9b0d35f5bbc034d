//! Flotilla Core - Document model and manifest assembly
//!
//! This crate provides the deployment-independent half of Flotilla:
//! - `Document`: schema/metadata/data envelopes loaded from YAML or JSON
//! - `classify` and `resolve`: turning a flat document set into a self-contained manifest
//! - `Override`: value files and `kind:doc:path=value` point overrides
//! - `DocumentValidator`: per-kind schema checks collected into a report
//! - `Bundle` and `KnownRelease`: what release services install and report back

pub mod bundle;
pub mod document;
pub mod error;
pub mod manifest;
pub mod overrides;
pub mod release;
pub mod resolve;
pub mod schema;
pub mod values;

pub use bundle::{Bundle, BundleFile, BundleMetadata};
pub use document::{Document, DocumentKind, DocumentMetadata};
pub use error::{CoreError, Result};
pub use manifest::{
    ChartGroupSpec, ChartRef, ChartSpec, ClassifiedDocuments, LifecycleAction, ManifestSpec,
    SourceSpec, SourceType, WaitSpec, classify, release_name,
};
pub use overrides::{Override, PointOverride};
pub use release::{KnownRelease, ReleaseStatus};
pub use resolve::{ResolvedChart, ResolvedGroup, ResolvedManifest, resolve};
pub use schema::{DocumentValidator, MessageLevel, ValidationMessage, ValidationReport, validate_documents};
