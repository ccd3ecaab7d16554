//! Pending and Building: create the builder pod and watch it finish.

use super::{REASON_ERROR, Reconciler, created, ready_condition};
use crate::error::ControllerError;
use crate::factory::{builder_pod_name, volume_claim_name};
use crate::health::pod_health;
use crds::{ArtifactPhase, ConditionStatus, OSArtifact, artifact_selector};
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::time::Duration;
use tracing::{debug, info, warn};

impl Reconciler {
    /// Inspect the builder pod, or start the build when there is none.
    pub(crate) async fn check_build(&self, artifact: &OSArtifact) -> Result<Action, ControllerError> {
        let namespace = artifact.namespace().unwrap_or_default();
        let name = artifact.name_any();

        let pod_name = builder_pod_name(&name);
        let pods = self
            .client
            .list_pods(&namespace, &artifact_selector(&name))
            .await?;
        let Some(pod) = pods.iter().find(|p| p.name_any() == pod_name) else {
            return self.start_build(artifact).await;
        };

        if artifact.phase() == ArtifactPhase::Pending {
            // The pod exists but the Building write was lost
            info!(%namespace, %name, pod = %pod_name, "Builder pod already exists, recording Building");
            self.transition(artifact, ArtifactPhase::Building, None).await?;
            return Ok(Action::requeue(Duration::from_secs(1)));
        }

        match pod.status.as_ref().and_then(|s| s.phase.as_deref()) {
            Some("Succeeded") => {
                info!(%namespace, %name, "Build finished, exporting");
                self.transition(artifact, ArtifactPhase::Exporting, None).await?;
                Ok(Action::requeue(Duration::from_secs(1)))
            }
            Some("Failed") => {
                let health = pod_health(pod);
                let message = if health.message.is_empty() {
                    format!("builder pod {pod_name} failed")
                } else {
                    health.message
                };
                warn!(%namespace, %name, %message, "Build failed");
                self.transition(
                    artifact,
                    ArtifactPhase::Error,
                    Some(ready_condition(ConditionStatus::False, REASON_ERROR, message)),
                )
                .await?;
                Ok(Action::await_change())
            }
            phase => {
                debug!(%namespace, %name, pod_phase = ?phase, "Build in progress");
                Ok(Action::await_change())
            }
        }
    }

    /// Create the build inputs and the builder pod, then record Building.
    async fn start_build(&self, artifact: &OSArtifact) -> Result<Action, ControllerError> {
        let namespace = artifact.namespace().unwrap_or_default();
        let name = artifact.name_any();

        for secret in artifact.spec.build_secrets() {
            if !self.client.secret_exists(&namespace, &secret.name).await? {
                info!(%namespace, %name, secret = %secret.name, "Waiting for secret");
                return Ok(Action::requeue(self.settings.secret_requeue));
            }
        }

        if let Some(target) = self.factory.copy_target() {
            created(
                self.client
                    .create_service_account(&self.factory.service_account(artifact))
                    .await,
            )?;
            created(
                self.client
                    .create_role_binding(&self.factory.role_binding(artifact, target))
                    .await,
            )?;
        }

        created(
            self.client
                .create_config_map(&self.factory.config_map(artifact))
                .await,
        )?;
        created(
            self.client
                .create_volume_claim(&self.factory.volume_claim(artifact))
                .await,
        )?;
        created(
            self.client
                .create_pod(&self.factory.builder_pod(artifact, &volume_claim_name(&name)))
                .await,
        )?;
        info!(%namespace, %name, "Started build");

        self.transition(artifact, ArtifactPhase::Building, None).await?;
        Ok(Action::await_change())
    }
}
