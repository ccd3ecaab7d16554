//! Exporting: one job per exporter position, Ready once all of them succeeded.

use super::{REASON_ERROR, Reconciler, created, ready_condition};
use crate::error::ControllerError;
use crate::factory::exporter_auth_secret;
use crate::health::{HealthStatusCode, job_health};
use crate::retry::retry_when;
use crds::{ArtifactPhase, ConditionStatus, EXPORTER_INDEX_ANNOTATION, OSArtifact, artifact_selector};
use k8s_openapi::api::batch::v1::Job;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

/// Kubernetes default for `spec.backoffLimit`
const DEFAULT_BACKOFF_LIMIT: i32 = 6;

impl Reconciler {
    /// Create missing exporter jobs and evaluate the existing ones.
    pub(crate) async fn check_export(&self, artifact: &OSArtifact) -> Result<Action, ControllerError> {
        let namespace = artifact.namespace().unwrap_or_default();
        let name = artifact.name_any();
        let selector = artifact_selector(&name);

        let jobs = self.client.list_jobs(&namespace, &selector).await?;
        let indexed = index_jobs(jobs);
        let volume_claim = self.find_volume_claim(&namespace, &name, &selector).await?;

        let expected = artifact.spec.exporter_count();
        let mut succeeded = 0;
        for index in 0..expected {
            let Some(job) = indexed.get(&index) else {
                if let Some(secret) = exporter_auth_secret(&artifact.spec, index) {
                    if !self.client.secret_exists(&namespace, &secret.name).await? {
                        info!(%namespace, %name, index, secret = %secret.name, "Waiting for secret");
                        return Ok(Action::requeue(self.settings.secret_requeue));
                    }
                }
                let job = self.factory.exporter_job(artifact, index, &volume_claim);
                created(self.client.create_job(&job).await)?;
                info!(%namespace, %name, index, "Created exporter job");
                continue;
            };

            if job_succeeded(job) {
                succeeded += 1;
            } else if job_failed(job) {
                let health = job_health(job);
                let message = if health.message.is_empty() {
                    format!("exporter job {} failed", job.name_any())
                } else {
                    health.message
                };
                warn!(%namespace, %name, index, %message, "Export failed");
                self.transition(
                    artifact,
                    ArtifactPhase::Error,
                    Some(ready_condition(ConditionStatus::False, REASON_ERROR, message)),
                )
                .await?;
                return Ok(Action::await_change());
            }
        }

        debug!(%namespace, %name, succeeded, expected, "Export progress");
        if succeeded == expected {
            self.transition(artifact, ArtifactPhase::Ready, None).await?;
        }
        Ok(Action::await_change())
    }

    /// Name of the artifact volume claim, looked up under the missing-volume policy
    async fn find_volume_claim(
        &self,
        namespace: &str,
        name: &str,
        selector: &str,
    ) -> Result<String, ControllerError> {
        let client = &self.client;
        let lookup = retry_when(
            &self.settings.missing_volume,
            "artifact volume lookup",
            |e: &ControllerError| matches!(e, ControllerError::MissingVolume { .. }),
            || async move {
                let claims = client.list_volume_claims(namespace, selector).await?;
                claims
                    .first()
                    .map(ResourceExt::name_any)
                    .ok_or_else(|| ControllerError::MissingVolume {
                        namespace: namespace.to_string(),
                        name: name.to_string(),
                    })
            },
        )
        .await;

        if let Err(e @ ControllerError::MissingVolume { .. }) = &lookup {
            error!(%namespace, %name, error = %e, "Artifact volume claim is missing");
        }
        lookup
    }
}

/// Exporter jobs keyed by their index annotation; jobs without a valid one are ignored
fn index_jobs(jobs: Vec<Job>) -> HashMap<usize, Job> {
    jobs.into_iter()
        .filter_map(|job| {
            let index = job
                .annotations()
                .get(EXPORTER_INDEX_ANNOTATION)?
                .parse()
                .ok()?;
            Some((index, job))
        })
        .collect()
}

fn job_succeeded(job: &Job) -> bool {
    let completions = job.spec.as_ref().and_then(|s| s.completions).unwrap_or(1);
    let succeeded = job.status.as_ref().and_then(|s| s.succeeded).unwrap_or(0);
    succeeded >= completions
}

fn job_failed(job: &Job) -> bool {
    let backoff_limit = job
        .spec
        .as_ref()
        .and_then(|s| s.backoff_limit)
        .unwrap_or(DEFAULT_BACKOFF_LIMIT);
    let failed = job.status.as_ref().and_then(|s| s.failed).unwrap_or(0);
    failed > backoff_limit || job_health(job).status == HealthStatusCode::Degraded
}
