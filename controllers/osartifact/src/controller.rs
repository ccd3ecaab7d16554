//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the cluster client,
//! reconciler, watcher and probe server together for the OSArtifact Controller.

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use crate::factory::ObjectFactory;
use crate::metrics::Metrics;
use crate::probes::{self, ProbeState};
use crate::reconciler::{ReconcileSettings, Reconciler};
use crate::watcher::{WatchContext, watch_artifacts};
use cluster_client::KubeClusterClient;
use kube::Client;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Main controller for OSArtifact builds.
pub struct Controller {
    artifact_watcher: JoinHandle<Result<(), ControllerError>>,
    probe_server: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance and starts its background tasks.
    pub async fn new(config: OperatorConfig) -> Result<Self, ControllerError> {
        info!("Initializing OSArtifact Controller");

        let kube_client = Client::try_default().await?;
        let cluster = KubeClusterClient::new(kube_client.clone());

        let metrics = Arc::new(Metrics::new()?);
        let reconciler = Arc::new(Reconciler::new(
            Arc::new(cluster),
            ObjectFactory::new(&config),
            ReconcileSettings::from_config(&config),
            metrics.clone(),
        ));
        let probe_state = ProbeState::new(metrics.clone());
        let ctx = Arc::new(WatchContext::new(reconciler, metrics));

        let bind_address = config.probe_bind_address;
        let server_state = probe_state.clone();
        let probe_server = tokio::spawn(async move { probes::serve(bind_address, server_state).await });

        let artifact_watcher = tokio::spawn(async move {
            watch_artifacts(kube_client, &config, ctx, probe_state).await
        });

        Ok(Self {
            artifact_watcher,
            probe_server,
        })
    }

    /// Runs the controller until the watcher stops or the probe server fails.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("OSArtifact Controller running");

        let result = tokio::select! {
            result = &mut self.artifact_watcher => {
                result.map_err(|e| ControllerError::Task(format!("artifact watcher panicked: {e}")))?
            }
            result = &mut self.probe_server => {
                result.map_err(|e| ControllerError::Task(format!("probe server panicked: {e}")))?
            }
        };
        self.artifact_watcher.abort();
        self.probe_server.abort();
        result
    }
}
