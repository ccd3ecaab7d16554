//! Finalizer handling.
//!
//! Owner references clean up everything in the artifact's namespace. With a
//! copy target, the artifacts pushed into the serving pod and the copy role
//! binding live elsewhere, so both are removed here before the finalizer is
//! released.

use super::Reconciler;
use crate::config::CopyTarget;
use crate::error::ControllerError;
use crate::factory::role_binding_name;
use crate::retry::retry_on_conflict;
use crds::{ARTIFACT_FINALIZER, OSArtifact};
use kube::ResourceExt;
use kube_runtime::controller::Action;
use tracing::{debug, info, warn};

impl Reconciler {
    /// Clean up after a deleted artifact and release its finalizer.
    pub(crate) async fn finalize(&self, artifact: &OSArtifact) -> Result<Action, ControllerError> {
        if !has_finalizer(artifact) {
            return Ok(Action::await_change());
        }
        self.cleanup(artifact).await?;
        self.remove_finalizer(artifact).await?;
        info!(
            namespace = %artifact.namespace().unwrap_or_default(),
            name = %artifact.name_any(),
            "OSArtifact finalized"
        );
        Ok(Action::await_change())
    }

    async fn cleanup(&self, artifact: &OSArtifact) -> Result<(), ControllerError> {
        let Some(target) = self.factory.copy_target() else {
            return Ok(());
        };
        self.remove_served_artifacts(artifact, target).await?;

        let binding = role_binding_name(artifact);
        match self
            .client
            .delete_role_binding(&target.namespace, &binding)
            .await
        {
            Ok(()) => {
                debug!(namespace = %target.namespace, name = %binding, "Deleted copy role binding");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete `<path>/<name>.*` inside the first serving pod
    async fn remove_served_artifacts(&self, artifact: &OSArtifact, target: &CopyTarget) -> Result<(), ControllerError> {
        let name = artifact.name_any();
        let pods = self.client.list_pods(&target.namespace, &target.pod_label).await?;
        let Some(pod) = pods.first().map(ResourceExt::name_any) else {
            warn!(
                namespace = %target.namespace,
                selector = %target.pod_label,
                artifact = %name,
                "No serving pod found, leaving served artifacts in place"
            );
            return Ok(());
        };

        let command = vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            format!("rm -rf {}/{name}.*", target.path),
        ];
        self.client.exec_in_pod(&target.namespace, &pod, &command).await?;
        debug!(namespace = %target.namespace, %pod, artifact = %name, "Removed served artifacts");
        Ok(())
    }

    /// Add the artifact finalizer if it is not present yet.
    pub(crate) async fn add_finalizer(&self, artifact: &OSArtifact) -> Result<OSArtifact, ControllerError> {
        self.update_finalizers(artifact, |finalizers| {
            if !finalizers.iter().any(|f| f == ARTIFACT_FINALIZER) {
                finalizers.push(ARTIFACT_FINALIZER.to_string());
            }
        })
        .await
    }

    async fn remove_finalizer(&self, artifact: &OSArtifact) -> Result<OSArtifact, ControllerError> {
        self.update_finalizers(artifact, |finalizers| {
            finalizers.retain(|f| f != ARTIFACT_FINALIZER);
        })
        .await
    }

    /// Same read-latest/compare/patch loop as status updates, on the finalizer list
    async fn update_finalizers<F>(&self, artifact: &OSArtifact, mutate: F) -> Result<OSArtifact, ControllerError>
    where
        F: Fn(&mut Vec<String>) + Send + Sync,
    {
        let namespace = artifact.namespace().unwrap_or_default();
        let name = artifact.name_any();
        let (namespace, name) = (namespace.as_str(), name.as_str());
        let client = &self.client;
        let mutate = &mutate;
        let fallback = artifact;

        let updated = retry_on_conflict(&self.settings.status_retry, "finalizer update", || async move {
            let Some(latest) = client.get_artifact(namespace, name).await? else {
                return Ok(fallback.clone());
            };
            let current = latest.finalizers().to_vec();
            let mut desired = current.clone();
            mutate(&mut desired);
            if desired == current {
                return Ok(latest);
            }
            client
                .patch_artifact_finalizers(
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
}

pub(super) fn has_finalizer(artifact: &OSArtifact) -> bool {
    artifact.finalizers().iter().any(|f| f == ARTIFACT_FINALIZER)
}
