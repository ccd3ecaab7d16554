//! Kubernetes API client
//!
//! Implements [`ClusterClient`] on top of `kube::Api`. Every call is
//! namespaced. Errors are classified into [`ClusterError`] so the reconciler
//! can tell expected races from real failures.

use crate::cluster_trait::ClusterClient;
use crate::error::ClusterError;
use crds::{OSArtifact, OSArtifactStatus};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Pod, Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::RoleBinding;
use kube::api::{AttachParams, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::fmt::Debug;
use tracing::debug;

/// Kubernetes-backed cluster client
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl std::fmt::Debug for KubeClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterClient").finish_non_exhaustive()
    }
}

impl KubeClusterClient {
    /// Wrap an existing kube client
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the in-cluster or kubeconfig environment
    pub async fn try_default() -> Result<Self, ClusterError> {
        Ok(Self::new(Client::try_default().await?))
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn list<K>(&self, namespace: &str, label_selector: &str) -> Result<Vec<K>, ClusterError>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        let params = ListParams::default().labels(label_selector);
        let list = self.api::<K>(namespace).list(&params).await?;
        Ok(list.items)
    }

    async fn create<K>(&self, object: &K) -> Result<K, ClusterError>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope> + Clone + Serialize + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        let namespace = object.namespace().ok_or_else(|| {
            ClusterError::InvalidObject(format!("{} {} has no namespace", K::kind(&K::DynamicType::default()), object.name_any()))
        })?;
        debug!(
            kind = %K::kind(&K::DynamicType::default()),
            namespace = %namespace,
            name = %object.name_any(),
            "Creating object"
        );
        Ok(self.api::<K>(&namespace).create(&PostParams::default(), object).await?)
    }
}

#[async_trait::async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_artifact(&self, namespace: &str, name: &str) -> Result<Option<OSArtifact>, ClusterError> {
        Ok(self.api::<OSArtifact>(namespace).get_opt(name).await?)
    }

    async fn patch_artifact_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
        status: &OSArtifactStatus,
    ) -> Result<OSArtifact, ClusterError> {
        // Including resourceVersion makes the merge patch an optimistic write
        let patch = json!({
            "metadata": { "resourceVersion": resource_version },
            "status": status,
        });
        Ok(self
            .api::<OSArtifact>(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?)
    }

    async fn patch_artifact_finalizers(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
        finalizers: &[String],
    ) -> Result<OSArtifact, ClusterError> {
        let patch = json!({
            "metadata": {
                "resourceVersion": resource_version,
                "finalizers": finalizers,
            },
        });
        Ok(self
            .api::<OSArtifact>(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?)
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, ClusterError> {
        self.list(namespace, label_selector).await
    }

    async fn list_jobs(&self, namespace: &str, label_selector: &str) -> Result<Vec<Job>, ClusterError> {
        self.list(namespace, label_selector).await
    }

    async fn list_volume_claims(&self, namespace: &str, label_selector: &str) -> Result<Vec<PersistentVolumeClaim>, ClusterError> {
        self.list(namespace, label_selector).await
    }

    async fn secret_exists(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        Ok(self.api::<Secret>(namespace).get_opt(name).await?.is_some())
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap, ClusterError> {
        self.create(config_map).await
    }

    async fn create_volume_claim(&self, claim: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim, ClusterError> {
        self.create(claim).await
    }

    async fn create_pod(&self, pod: &Pod) -> Result<Pod, ClusterError> {
        self.create(pod).await
    }

    async fn create_job(&self, job: &Job) -> Result<Job, ClusterError> {
        self.create(job).await
    }

    async fn create_service_account(&self, account: &ServiceAccount) -> Result<ServiceAccount, ClusterError> {
        self.create(account).await
    }

    async fn create_role_binding(&self, binding: &RoleBinding) -> Result<RoleBinding, ClusterError> {
        self.create(binding).await
    }

    async fn delete_role_binding(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.api::<RoleBinding>(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn exec_in_pod(&self, namespace: &str, pod: &str, command: &[String]) -> Result<(), ClusterError> {
        debug!(namespace, pod, ?command, "Executing in pod");
        let params = AttachParams::default().stdout(false).stderr(true);
        let mut process = self
            .api::<Pod>(namespace)
            .exec(pod, command.to_vec(), &params)
            .await?;
        let status = process.take_status();
        process
            .join()
            .await
            .map_err(|e| ClusterError::Exec(format!("{namespace}/{pod}: {e}")))?;

        // The API server reports the exit as a meta/v1 Status on the error channel
        let Some(status) = status else {
            return Ok(());
        };
        match status.await {
            Some(status) if status.status.as_deref() == Some("Failure") => Err(ClusterError::Exec(format!(
                "{namespace}/{pod}: {}",
                status.message.unwrap_or_default()
            ))),
            _ => Ok(()),
        }
    }
}
