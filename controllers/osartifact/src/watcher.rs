//! Kubernetes resource watchers.
//!
//! Drives the reconciler with `kube_runtime::Controller`: OSArtifacts are the
//! primary resource, builder pods and exporter jobs are watched through the
//! artifact label and routed back with [`owning_artifact`]. The controller
//! coalesces events per artifact and never runs two reconciles of the same
//! artifact at once.
//!
//! Failed reconciles are requeued with a per-artifact backoff. An entry is
//! dropped after a successful reconcile, or once a requeue finds the artifact
//! gone from the store.

use crate::backoff::ExponentialBackoff;
use crate::config::OperatorConfig;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::probes::ProbeState;
use crate::reconciler::Reconciler;
use crate::routing::owning_artifact;
use crds::{ARTIFACT_LABEL, OSArtifact};
use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::{Action, Config as ControllerConfig, Error as RunError};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{Controller, watcher};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Namespace and name of an artifact
type ArtifactKey = (String, String);

/// Item of the controller's result stream
type RunResult = Result<(ObjectRef<OSArtifact>, Action), RunError<ControllerError, watcher::Error>>;

/// Shared state handed to every reconcile and error-policy call
pub struct WatchContext {
    reconciler: Arc<Reconciler>,
    metrics: Arc<Metrics>,
    backoffs: Mutex<HashMap<ArtifactKey, ExponentialBackoff>>,
}

impl WatchContext {
    /// Creates a new watch context.
    pub fn new(reconciler: Arc<Reconciler>, metrics: Arc<Metrics>) -> Self {
        Self {
            reconciler,
            metrics,
            backoffs: Mutex::new(HashMap::new()),
        }
    }

    fn reset_backoff(&self, key: &ArtifactKey) {
        self.backoffs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    fn next_backoff(&self, key: ArtifactKey) -> Duration {
        self.backoffs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_insert_with(ExponentialBackoff::for_reconcile_errors)
            .next_delay()
    }

    #[cfg(test)]
    fn tracked_backoffs(&self) -> usize {
        self.backoffs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

fn artifact_key(artifact: &OSArtifact) -> ArtifactKey {
    (artifact.namespace().unwrap_or_default(), artifact.name_any())
}

async fn reconcile(artifact: Arc<OSArtifact>, ctx: Arc<WatchContext>) -> Result<Action, ControllerError> {
    let namespace = artifact.namespace().ok_or_else(|| {
        ControllerError::InvalidReference(format!("OSArtifact {} has no namespace", artifact.name_any()))
    })?;
    let name = artifact.name_any();

    let action = ctx.reconciler.reconcile(&namespace, &name).await?;
    ctx.reset_backoff(&(namespace, name));
    Ok(action)
}

/// Log one controller result; artifacts that left the store lose their backoff
fn handle_result(ctx: &WatchContext, result: RunResult) {
    match result {
        Ok((artifact, action)) => debug!(?artifact, ?action, "Reconciled"),
        Err(RunError::ObjectNotFound(object)) => {
            debug!(%object, "OSArtifact left the store");
            ctx.reset_backoff(&(object.namespace.unwrap_or_default(), object.name));
        }
        Err(e) => error!(error = %e, "Controller error"),
    }
}

fn error_policy(artifact: Arc<OSArtifact>, error: &ControllerError, ctx: Arc<WatchContext>) -> Action {
    ctx.metrics.record_failure(error);
    let delay = ctx.next_backoff(artifact_key(&artifact));
    warn!(
        namespace = %artifact.namespace().unwrap_or_default(),
        name = %artifact.name_any(),
        error = %error,
        requeue_secs = delay.as_secs(),
        "Reconciliation failed"
    );
    Action::requeue(delay)
}

/// Watch OSArtifacts and their dependents until shutdown.
pub async fn watch_artifacts(
    client: Client,
    config: &OperatorConfig,
    ctx: Arc<WatchContext>,
    probes: ProbeState,
) -> Result<(), ControllerError> {
    let (artifacts, pods, jobs): (Api<OSArtifact>, Api<Pod>, Api<Job>) = match &config.watch_namespace {
        Some(namespace) => (
            Api::namespaced(client.clone(), namespace),
            Api::namespaced(client.clone(), namespace),
            Api::namespaced(client, namespace),
        ),
        None => (Api::all(client.clone()), Api::all(client.clone()), Api::all(client)),
    };

    // Fails fast when the CRD is not installed
    artifacts.list(&ListParams::default().limit(1)).await?;
    info!(
        namespace = config.watch_namespace.as_deref().unwrap_or("<all>"),
        concurrency = config.reconcile_concurrency,
        "Starting OSArtifact watcher"
    );
    probes.mark_ready();

    let dependents = watcher::Config::default().labels(ARTIFACT_LABEL);
    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(1))
        .concurrency(config.reconcile_concurrency);

    let results = ctx.clone();
    Controller::new(artifacts, watcher::Config::default())
        .watches(pods, dependents.clone(), |pod| owning_artifact(&pod))
        .watches(jobs, dependents, |job| owning_artifact(&job))
        .with_config(controller_config)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| {
            handle_result(&results, result);
            futures::future::ready(())
        })
        .await;

    info!("OSArtifact watcher stopped");
    Ok(())
}
