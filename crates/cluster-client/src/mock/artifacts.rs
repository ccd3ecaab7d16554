//! Mock OSArtifact operations

use super::MockClusterClient;
use super::helpers::lock;
use crate::error::ClusterError;
use crds::{OSArtifact, OSArtifactStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use std::sync::atomic::Ordering;

impl MockClusterClient {
    /// Set a deletion timestamp on an artifact, as `kubectl delete` would while finalizers remain
    ///
    /// An artifact without finalizers is removed straight away.
    pub fn mark_deleted(&self, namespace: &str, name: &str) {
        let key = (namespace.to_string(), name.to_string());
        let mut artifacts = lock(&self.artifacts);
        let Some(artifact) = artifacts.get_mut(&key) else {
            return;
        };
        if artifact.metadata.finalizers.as_ref().is_none_or(Vec::is_empty) {
            artifacts.remove(&key);
            return;
        }
        let timestamp: Time = serde_json::from_value(serde_json::json!("2024-01-01T00:00:00Z"))
            .unwrap_or_else(|e| panic!("deletion timestamp: {e}"));
        artifact.metadata.deletion_timestamp = Some(timestamp);
        artifact.metadata.resource_version = Some(self.next_resource_version().to_string());
    }
}

/// Look up the artifact and check the caller's resourceVersion against it
fn checked_write<'a>(
    client: &MockClusterClient,
    artifacts: &'a mut std::collections::BTreeMap<super::helpers::Key, OSArtifact>,
    namespace: &str,
    name: &str,
    resource_version: Option<&str>,
) -> Result<&'a mut OSArtifact, ClusterError> {
    let artifact = artifacts
        .get_mut(&(namespace.to_string(), name.to_string()))
        .ok_or_else(|| ClusterError::NotFound(format!("osartifact {namespace}/{name}")))?;

    let injected = client
        .pending_conflicts
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    let stale = resource_version.is_some_and(|rv| Some(rv) != artifact.metadata.resource_version.as_deref());
    if injected || stale {
        return Err(ClusterError::Conflict(format!(
            "osartifact {namespace}/{name}: the object has been modified"
        )));
    }
    Ok(artifact)
}

pub(super) fn patch_status(
    client: &MockClusterClient,
    namespace: &str,
    name: &str,
    resource_version: Option<&str>,
    status: &OSArtifactStatus,
) -> Result<OSArtifact, ClusterError> {
    let mut artifacts = lock(&client.artifacts);
    let artifact = checked_write(client, &mut artifacts, namespace, name, resource_version)?;
    artifact.status = Some(status.clone());
    artifact.metadata.resource_version = Some(client.next_resource_version().to_string());
    client.status_writes.fetch_add(1, Ordering::SeqCst);
    Ok(artifact.clone())
}

pub(super) fn patch_finalizers(
    client: &MockClusterClient,
    namespace: &str,
    name: &str,
    resource_version: Option<&str>,
    finalizers: &[String],
) -> Result<OSArtifact, ClusterError> {
    let mut artifacts = lock(&client.artifacts);
    let artifact = checked_write(client, &mut artifacts, namespace, name, resource_version)?;
    artifact.metadata.finalizers = Some(finalizers.to_vec());
    artifact.metadata.resource_version = Some(client.next_resource_version().to_string());
    let updated = artifact.clone();

    // Garbage collection: a deleted object goes away once its last finalizer is removed
    if finalizers.is_empty() && updated.metadata.deletion_timestamp.is_some() {
        artifacts.remove(&(namespace.to_string(), name.to_string()));
    }
    Ok(updated)
}
