//! Flotilla Kube - Cluster-facing half of Flotilla
//!
//! This crate provides:
//! - **Orchestrator**: the sync loop that installs, upgrades, tests and prunes releases
//! - **Readiness Poller**: list/watch convergence checks with debouncing
//! - **Diff Engine**: chart bundle and values comparison for the upgrade decision
//! - **Lifecycle Actions**: pre/post upgrade deletes and creates of workloads
//! - **Seams**: `ReleaseService`, `ClusterApi` and `ChartSource` traits, with
//!   a file ledger, a kube-backed cluster, a local chart source and in-memory mocks

pub mod actions;
pub mod cluster;
pub mod diff;
pub mod error;
pub mod ledger;
pub mod mock;
pub mod options;
pub mod release;
pub mod source;
pub mod sync;
pub mod wait;

pub use actions::{ActionReport, LifecycleRunner, UpgradePhase};
pub use cluster::{
    ClusterApi, EventStream, KubeCluster, READY_PHASES, ResourceEvent, ResourceKind, ResourceList,
    ResourceState,
};
pub use diff::{DiffEngine, ReleaseDiff};
pub use error::{KubeError, Result};
pub use ledger::FileReleaseService;
pub use mock::{ClusterCalls, MockCluster, MockOperation, MockReleaseService, ReleaseCall, WatchPass};
pub use options::{DEFAULT_TIMEOUT, SyncOptions};
pub use release::{ReleaseRequest, ReleaseService, TestResult, TestStatus, TestSuiteRun};
pub use source::{ChartSource, LocalChartSource, SourceCache, SourceCheckout};
pub use sync::{Orchestrator, SyncPhase, SyncSummary, TestSummary};
pub use wait::{ReadinessPoller, ReadinessTracker, WaitOutcome, WaitTarget};
