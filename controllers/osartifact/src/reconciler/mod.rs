//! Reconciliation state machine for OSArtifact resources.
//!
//! Every invocation starts from freshly fetched state and runs the same entry
//! protocol: initialize conditions on first sight, run finalizer cleanup when
//! the artifact is being deleted, make sure the finalizer is present, then
//! dispatch on the phase:
//!
//! - `build`: Pending and Building, the builder pod and its inputs
//! - `export`: Exporting, one job per exporter position
//! - `finalizer`: cleanup of objects owner references cannot reach
//!
//! Phases only move along `Pending -> Building -> Exporting -> Ready`, with
//! `Error` reachable from Building and Exporting. Each transition is checked
//! against the latest stored phase right before it is written.

mod build;
mod export;
mod finalizer;
#[cfg(test)]
mod state_machine_test;

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use crate::factory::ObjectFactory;
use crate::metrics::Metrics;
use crate::retry::{RetryPolicy, retry_on_conflict};
use cluster_client::{ClusterClient, ClusterError};
use crds::{
    ArtifactPhase, Condition, ConditionStatus, OSArtifact, OSArtifactStatus, READY_CONDITION,
    find_condition, set_status_condition,
};
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

/// Reason recorded on the Ready condition when an artifact is first seen
pub const REASON_PENDING: &str = "Pending";
/// Reason recorded on the Ready condition once every export finished
pub const REASON_READY: &str = "Ready";
/// Reason recorded on the Ready condition when the build or an export failed
pub const REASON_ERROR: &str = "Error";

/// Timing and retry knobs of the state machine
#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    /// Requeue delay while a referenced secret does not exist yet
    pub secret_requeue: Duration,
    /// Lookups of the artifact volume claim before it is declared missing
    pub missing_volume: RetryPolicy,
    /// Conflict retries for status and finalizer writes
    pub status_retry: RetryPolicy,
}

impl ReconcileSettings {
    /// Settings derived from the operator configuration
    #[must_use]
    pub fn from_config(config: &OperatorConfig) -> Self {
        Self {
            secret_requeue: config.secret_requeue,
            missing_volume: RetryPolicy::fixed(
                config.missing_volume_retries.saturating_add(1),
                Duration::from_secs(1),
            ),
            status_retry: RetryPolicy::default(),
        }
    }
}

/// Drives OSArtifacts through their phases.
pub struct Reconciler {
    pub(crate) client: Arc<dyn ClusterClient>,
    pub(crate) factory: ObjectFactory,
    pub(crate) settings: ReconcileSettings,
    pub(crate) metrics: Arc<Metrics>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("factory", &self.factory)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        client: Arc<dyn ClusterClient>,
        factory: ObjectFactory,
        settings: ReconcileSettings,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            client,
            factory,
            settings,
            metrics,
        }
    }

    /// Reconciles the OSArtifact `namespace/name`.
    ///
    /// Returns the action for the dispatcher: wait for the next event, or
    /// requeue after a delay. Errors are left to the dispatcher's backoff.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Action, ControllerError> {
        let Some(mut artifact) = self.client.get_artifact(namespace, name).await? else {
            debug!(namespace, name, "OSArtifact no longer exists");
            return Ok(Action::await_change());
        };
        self.metrics.record_reconcile(artifact.phase());

        let first_sight = artifact
            .status
            .as_ref()
            .is_none_or(|status| status.conditions.is_empty());
        if first_sight {
            artifact = self
                .update_status(&artifact, |status| {
                    if status.conditions.is_empty() {
                        set_status_condition(
                            &mut status.conditions,
                            ready_condition(ConditionStatus::False, REASON_PENDING, ""),
                        );
                    }
                })
                .await?;
        }

        if artifact.metadata.deletion_timestamp.is_some() {
            return self.finalize(&artifact).await;
        }
        if !finalizer::has_finalizer(&artifact) {
            artifact = self.add_finalizer(&artifact).await?;
        }

        let phase = artifact.phase();
        debug!(namespace, name, %phase, terminal = phase.is_terminal(), "Reconciling OSArtifact");
        match phase {
            ArtifactPhase::Pending | ArtifactPhase::Building => self.check_build(&artifact).await,
            ArtifactPhase::Exporting => self.check_export(&artifact).await,
            ArtifactPhase::Ready => {
                self.update_status(&artifact, |status| {
                    set_status_condition(
                        &mut status.conditions,
                        ready_condition(ConditionStatus::True, REASON_READY, ""),
                    );
                })
                .await?;
                Ok(Action::await_change())
            }
            ArtifactPhase::Error => {
                self.update_status(&artifact, |status| {
                    let message = find_condition(&status.conditions, READY_CONDITION)
                        .map(|c| c.message.clone())
                        .unwrap_or_default();
                    set_status_condition(
                        &mut status.conditions,
                        ready_condition(ConditionStatus::False, REASON_ERROR, message),
                    );
                })
                .await?;
                Ok(Action::await_change())
            }
        }
    }

    /// Apply `mutate` to the latest stored status and write it if anything changed.
    ///
    /// Read-latest/compare/patch under conflict retry; the patch carries the
    /// resourceVersion it was computed from.
    pub(crate) async fn update_status<F>(
        &self,
        artifact: &OSArtifact,
        mutate: F,
    ) -> Result<OSArtifact, ControllerError>
    where
        F: Fn(&mut OSArtifactStatus) + Send + Sync,
    {
        let namespace = artifact.namespace().unwrap_or_default();
        let name = artifact.name_any();
        let (namespace, name) = (namespace.as_str(), name.as_str());
        let client = &self.client;
        let mutate = &mutate;

        let updated = retry_on_conflict(&self.settings.status_retry, "status update", || async move {
            let latest = client
                .get_artifact(namespace, name)
                .await?
                .ok_or_else(|| ClusterError::NotFound(format!("osartifact {namespace}/{name}")))?;
            let current = latest.status.clone().unwrap_or_default();
            let mut desired = current.clone();
            mutate(&mut desired);
            if desired == current {
                return Ok(latest);
            }
            client
                .patch_artifact_status(
                    namespace,
                    name,
                    latest.metadata.resource_version.as_deref(),
                    &desired,
                )
                .await
        })
        .await?;
        Ok(updated)
    }

    /// Move the artifact to `next` if that edge is legal from the latest stored phase.
    ///
    /// `condition` is merged together with the phase change and only then.
    /// The change is logged and counted against the phase it was written over,
    /// so a transition another reconcile already stored is not counted twice.
    pub(crate) async fn transition(
        &self,
        artifact: &OSArtifact,
        next: ArtifactPhase,
        condition: Option<Condition>,
    ) -> Result<OSArtifact, ControllerError> {
        // Phase the final attempt moved away from, if it moved
        let moved_from = Mutex::new(None);
        let updated = self
            .update_status(artifact, |status| {
                let mut from = moved_from.lock().unwrap_or_else(PoisonError::into_inner);
                *from = None;
                if status.phase.can_transition_to(next) {
                    *from = Some(status.phase);
                    status.phase = next;
                    if let Some(condition) = &condition {
                        set_status_condition(&mut status.conditions, condition.clone());
                    }
                }
            })
            .await?;

        let moved_from = moved_from.into_inner().unwrap_or_else(PoisonError::into_inner);
        if let Some(from) = moved_from {
            info!(
                namespace = %updated.namespace().unwrap_or_default(),
                name = %updated.name_any(),
                from = %from,
                to = %next,
                "OSArtifact phase changed"
            );
            self.metrics.record_transition(from, next);
        }
        Ok(updated)
    }
}

/// Ready condition with the given status, reason and message
pub(crate) fn ready_condition(
    status: ConditionStatus,
    reason: &str,
    message: impl Into<String>,
) -> Condition {
    Condition::new(READY_CONDITION, status, reason, message)
}

/// Treat an AlreadyExists create as success
pub(crate) fn created<T>(result: Result<T, ClusterError>) -> Result<(), ClusterError> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.is_already_exists() => Ok(()),
        Err(e) => Err(e),
    }
}
