//! Readiness polling
//!
//! Decides when a population of cluster resources has settled. The state
//! machine ([`ReadinessTracker`]) is kept apart from the list/watch plumbing
//! ([`ReadinessPoller`]) so the convergence rules can be tested without a
//! cluster.
//!
//! A single pass (`wait_once`) lists the resources to get a baseline, then
//! watches from the listing's resource version until everything is ready or
//! the pass budget runs out. If the watch closes early the pass pauses for
//! [`RELIST_BACKOFF`], then re-lists and watches again. `wait_until_ready`
//! repeats passes until enough consecutive passes saw no modifications,
//! which debounces rollouts that look done but are still being touched by
//! controllers.

use futures::StreamExt;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tokio::time::Instant;

use crate::cluster::{ClusterApi, ResourceEvent, ResourceKind, ResourceState};
use crate::error::{KubeError, Result};

/// Pause before re-listing after a watch closed early
pub const RELIST_BACKOFF: Duration = Duration::from_millis(250);

/// Which resources to wait for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitTarget {
    pub kind: ResourceKind,
    pub namespace: String,
    /// Label selector, empty for every resource of the kind
    pub selector: String,
}

impl WaitTarget {
    pub fn pods(namespace: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::Pod,
            namespace: namespace.into(),
            selector: selector.into(),
        }
    }
}

impl std::fmt::Display for WaitTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}s in '{}'", self.kind, self.namespace)?;
        if !self.selector.is_empty() {
            write!(f, " matching '{}'", self.selector)?;
        }
        Ok(())
    }
}

/// Ready flags per resource plus the names modified during the current pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadinessTracker {
    tracking: BTreeMap<String, bool>,
    modified: BTreeSet<String>,
}

impl ReadinessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the tracked table with a fresh listing (modified names are kept)
    pub fn seed(&mut self, items: &[ResourceState]) {
        self.tracking = items
            .iter()
            .map(|item| (item.name.clone(), item.is_ready()))
            .collect();
    }

    /// Apply one watch event
    pub fn apply(&mut self, event: &ResourceEvent) -> Result<()> {
        match event {
            ResourceEvent::Added(state) => {
                self.tracking.insert(state.name.clone(), state.is_ready());
            }
            ResourceEvent::Modified(state) => {
                self.tracking.insert(state.name.clone(), state.is_ready());
                self.modified.insert(state.name.clone());
            }
            ResourceEvent::Deleted(state) => {
                self.tracking.remove(&state.name);
            }
            ResourceEvent::Error(message) => {
                return Err(KubeError::WatchStream(message.clone()));
            }
        }
        Ok(())
    }

    /// True when nothing tracked is unready (an empty population is ready)
    pub fn all_ready(&self) -> bool {
        self.tracking.values().all(|ready| *ready)
    }

    pub fn unready(&self) -> Vec<String> {
        self.tracking
            .iter()
            .filter(|(_, ready)| !**ready)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn modified(&self) -> Vec<String> {
        self.modified.iter().cloned().collect()
    }
}

/// Result of one watch pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WaitOutcome {
    pub timed_out: bool,
    pub modified: Vec<String>,
    pub unready: Vec<String>,
}

/// Runs list/watch passes against a cluster
pub struct ReadinessPoller<'a> {
    cluster: &'a dyn ClusterApi,
}

impl<'a> ReadinessPoller<'a> {
    pub fn new(cluster: &'a dyn ClusterApi) -> Self {
        Self { cluster }
    }

    /// Wait until `required_successes` consecutive quiet passes
    ///
    /// Returns `Ok(false)` when a pass times out or the overall deadline
    /// passes first.
    pub async fn wait_until_ready(
        &self,
        target: &WaitTarget,
        timeout: Duration,
        required_successes: u32,
        inter_success_wait: Duration,
    ) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        let mut successes = 0;

        tracing::debug!(%target, ?timeout, required_successes, "waiting for resources");

        loop {
            let budget = deadline.saturating_duration_since(Instant::now());
            if budget.is_zero() {
                tracing::warn!(%target, "deadline passed before resources settled");
                return Ok(false);
            }

            let outcome = self.wait_once(target, budget).await?;
            if outcome.timed_out {
                tracing::warn!(%target, unready = ?outcome.unready, "timed out waiting for resources");
                return Ok(false);
            }

            if outcome.modified.is_empty() {
                successes += 1;
            } else {
                tracing::debug!(modified = ?outcome.modified, "resources still changing");
                successes = 0;
            }

            if successes >= required_successes {
                tracing::debug!(%target, "resources ready");
                return Ok(true);
            }

            if Instant::now() + inter_success_wait >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(inter_success_wait).await;
        }
    }

    /// One bounded pass: list, then watch until ready or out of budget
    pub async fn wait_once(&self, target: &WaitTarget, budget: Duration) -> Result<WaitOutcome> {
        let deadline = Instant::now() + budget;
        let mut tracker = ReadinessTracker::new();

        let pass = tokio::time::timeout_at(deadline, self.watch_pass(target, deadline, &mut tracker)).await;

        match pass {
            Ok(Ok(())) => Ok(WaitOutcome {
                timed_out: false,
                modified: tracker.modified(),
                unready: Vec::new(),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(WaitOutcome {
                timed_out: true,
                modified: tracker.modified(),
                unready: tracker.unready(),
            }),
        }
    }

    async fn watch_pass(
        &self,
        target: &WaitTarget,
        deadline: Instant,
        tracker: &mut ReadinessTracker,
    ) -> Result<()> {
        loop {
            let listing = self
                .cluster
                .list_resources(target.kind, &target.namespace, &target.selector)
                .await?;
            tracker.seed(&listing.items);
            if tracker.all_ready() {
                return Ok(());
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let mut stream = self
                .cluster
                .watch_resources(
                    target.kind,
                    &target.namespace,
                    &target.selector,
                    &listing.resource_version,
                    remaining,
                )
                .await?;

            while let Some(event) = stream.next().await {
                let event = event?;
                tracing::debug!(?event, "watch event");
                tracker.apply(&event)?;
                if tracker.all_ready() {
                    return Ok(());
                }
            }

            tracing::debug!(%target, "watch closed early, re-listing");
            tokio::time::sleep(RELIST_BACKOFF).await;
        }
    }
}
