//! ClusterClient trait for mocking
//!
//! This trait is the reconciler's whole view of the cluster. The kube-backed
//! [`crate::KubeClusterClient`] implements it for production, and tests use
//! the in-memory mock behind the `test-util` feature.

use crate::error::ClusterError;
use crds::{OSArtifact, OSArtifactStatus};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Pod, ServiceAccount};
use k8s_openapi::api::rbac::v1::RoleBinding;

/// Trait for Kubernetes API operations used by the OSArtifact reconciler
///
/// Writes to the artifact carry the `resourceVersion` they were computed from
/// so the API server rejects stale writes with [`ClusterError::Conflict`].
/// Creates report [`ClusterError::AlreadyExists`] rather than overwriting.
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ClusterClient: Send + Sync {
    // OSArtifact
    async fn get_artifact(&self, namespace: &str, name: &str) -> Result<Option<OSArtifact>, ClusterError>;
    async fn patch_artifact_status(&self, namespace: &str, name: &str, resource_version: Option<&str>, status: &OSArtifactStatus) -> Result<OSArtifact, ClusterError>;
    async fn patch_artifact_finalizers(&self, namespace: &str, name: &str, resource_version: Option<&str>, finalizers: &[String]) -> Result<OSArtifact, ClusterError>;

    // Dependent lookups (by label selector)
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, ClusterError>;
    async fn list_jobs(&self, namespace: &str, label_selector: &str) -> Result<Vec<Job>, ClusterError>;
    async fn list_volume_claims(&self, namespace: &str, label_selector: &str) -> Result<Vec<PersistentVolumeClaim>, ClusterError>;
    async fn secret_exists(&self, namespace: &str, name: &str) -> Result<bool, ClusterError>;

    // Dependent creation (namespace taken from the object's metadata)
    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap, ClusterError>;
    async fn create_volume_claim(&self, claim: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim, ClusterError>;
    async fn create_pod(&self, pod: &Pod) -> Result<Pod, ClusterError>;
    async fn create_job(&self, job: &Job) -> Result<Job, ClusterError>;
    async fn create_service_account(&self, account: &ServiceAccount) -> Result<ServiceAccount, ClusterError>;
    async fn create_role_binding(&self, binding: &RoleBinding) -> Result<RoleBinding, ClusterError>;

    // Cleanup of objects that cannot carry an owner reference
    async fn delete_role_binding(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;

    // Runs `command` in the first container of a pod and waits for it to exit
    async fn exec_in_pod(&self, namespace: &str, pod: &str, command: &[String]) -> Result<(), ClusterError>;
}
