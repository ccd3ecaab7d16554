//! Mock ClusterClient for unit testing
//!
//! This module provides an in-memory implementation of [`ClusterClient`] that
//! behaves like a small API server: creates stamp uid and resourceVersion and
//! refuse duplicate names, artifact writes check resourceVersion, and removing
//! the last finalizer from a deleted artifact drops it from the store.
//!
//! - `artifacts.rs` - OSArtifact reads and optimistic writes
//! - `helpers.rs` - store keys, metadata stamping and label selectors

mod artifacts;
mod helpers;

use crate::cluster_trait::ClusterClient;
use crate::error::ClusterError;
use crds::{OSArtifact, OSArtifactStatus};
use helpers::{Key, key_of, lock, select, stamp_created};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Pod, ServiceAccount};
use k8s_openapi::api::rbac::v1::RoleBinding;
use kube::Resource;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type Store<K> = Arc<Mutex<BTreeMap<Key, K>>>;

/// Mock ClusterClient for testing
///
/// Clones share the same stores, so a test can keep one handle for setup and
/// inspection while the reconciler holds another.
#[derive(Clone, Default, Debug)]
pub struct MockClusterClient {
    pub(crate) artifacts: Store<OSArtifact>,
    pods: Store<Pod>,
    jobs: Store<Job>,
    volume_claims: Store<PersistentVolumeClaim>,
    config_maps: Store<ConfigMap>,
    service_accounts: Store<ServiceAccount>,
    role_bindings: Store<RoleBinding>,
    secrets: Arc<Mutex<BTreeSet<Key>>>,
    deleted_role_bindings: Arc<Mutex<Vec<Key>>>,
    // Commands run through exec_in_pod, as (namespace, pod, command)
    execs: Arc<Mutex<Vec<(String, String, Vec<String>)>>>,
    failing_execs: Arc<AtomicU32>,
    // Number of upcoming artifact writes to reject with a conflict
    pub(crate) pending_conflicts: Arc<AtomicU32>,
    pub(crate) status_writes: Arc<AtomicUsize>,
    create_calls: Arc<AtomicUsize>,
    next_resource_version: Arc<AtomicU64>,
}

impl MockClusterClient {
    /// Create an empty mock cluster
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn next_resource_version(&self) -> u64 {
        self.next_resource_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn insert<K: Resource>(&self, store: &Store<K>, mut object: K) -> Result<K, ClusterError>
    where
        K: Clone,
    {
        let key = key_of(&object)?;
        let mut store = lock(store);
        if store.contains_key(&key) {
            return Err(ClusterError::AlreadyExists(format!("{}/{}", key.0, key.1)));
        }
        stamp_created(&mut object, self.next_resource_version());
        store.insert(key, object.clone());
        Ok(object)
    }

    fn create<K: Resource + Clone>(&self, store: &Store<K>, object: &K) -> Result<K, ClusterError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.insert(store, object.clone())
    }

    // Test setup

    /// Add an artifact to the mock store (for test setup)
    ///
    /// # Panics
    ///
    /// Panics if the artifact has no namespace or name, or already exists.
    pub fn add_artifact(&self, artifact: OSArtifact) {
        self.insert(&self.artifacts, artifact)
            .unwrap_or_else(|e| panic!("add_artifact: {e}"));
    }

    /// Add a pod to the mock store (for test setup)
    ///
    /// # Panics
    ///
    /// Panics if the pod has no namespace or name, or already exists.
    pub fn add_pod(&self, pod: Pod) {
        self.insert(&self.pods, pod).unwrap_or_else(|e| panic!("add_pod: {e}"));
    }

    /// Add a job to the mock store (for test setup)
    ///
    /// # Panics
    ///
    /// Panics if the job has no namespace or name, or already exists.
    pub fn add_job(&self, job: Job) {
        self.insert(&self.jobs, job).unwrap_or_else(|e| panic!("add_job: {e}"));
    }

    /// Add a volume claim to the mock store (for test setup)
    ///
    /// # Panics
    ///
    /// Panics if the claim has no namespace or name, or already exists.
    pub fn add_volume_claim(&self, claim: PersistentVolumeClaim) {
        self.insert(&self.volume_claims, claim)
            .unwrap_or_else(|e| panic!("add_volume_claim: {e}"));
    }

    /// Register a secret by name (contents are never read)
    pub fn add_secret(&self, namespace: &str, name: &str) {
        lock(&self.secrets).insert((namespace.to_string(), name.to_string()));
    }

    /// Remove a volume claim, simulating manual interference
    pub fn delete_volume_claim(&self, namespace: &str, name: &str) {
        lock(&self.volume_claims).remove(&(namespace.to_string(), name.to_string()));
    }

    /// Reject the next `count` artifact writes with a conflict
    pub fn inject_conflicts(&self, count: u32) {
        self.pending_conflicts.store(count, Ordering::SeqCst);
    }

    /// Mutate a stored pod in place, e.g. to move it to a terminal phase
    pub fn update_pod(&self, namespace: &str, name: &str, update: impl FnOnce(&mut Pod)) {
        if let Some(pod) = lock(&self.pods).get_mut(&(namespace.to_string(), name.to_string())) {
            update(pod);
        }
    }

    /// Mutate a stored job in place, e.g. to record succeeded pods
    pub fn update_job(&self, namespace: &str, name: &str, update: impl FnOnce(&mut Job)) {
        if let Some(job) = lock(&self.jobs).get_mut(&(namespace.to_string(), name.to_string())) {
            update(job);
        }
    }

    // Inspection

    /// Current stored copy of an artifact
    #[must_use]
    pub fn artifact(&self, namespace: &str, name: &str) -> Option<OSArtifact> {
        lock(&self.artifacts)
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Pods in a namespace
    #[must_use]
    pub fn pods(&self, namespace: &str) -> Vec<Pod> {
        select(&lock(&self.pods), namespace, "")
    }

    /// Jobs in a namespace
    #[must_use]
    pub fn jobs(&self, namespace: &str) -> Vec<Job> {
        select(&lock(&self.jobs), namespace, "")
    }

    /// Volume claims in a namespace
    #[must_use]
    pub fn volume_claims(&self, namespace: &str) -> Vec<PersistentVolumeClaim> {
        select(&lock(&self.volume_claims), namespace, "")
    }

    /// Config maps in a namespace
    #[must_use]
    pub fn config_maps(&self, namespace: &str) -> Vec<ConfigMap> {
        select(&lock(&self.config_maps), namespace, "")
    }

    /// Service accounts in a namespace
    #[must_use]
    pub fn service_accounts(&self, namespace: &str) -> Vec<ServiceAccount> {
        select(&lock(&self.service_accounts), namespace, "")
    }

    /// Role bindings in a namespace
    #[must_use]
    pub fn role_bindings(&self, namespace: &str) -> Vec<RoleBinding> {
        select(&lock(&self.role_bindings), namespace, "")
    }

    /// Role bindings deleted so far, as (namespace, name)
    #[must_use]
    pub fn deleted_role_bindings(&self) -> Vec<(String, String)> {
        lock(&self.deleted_role_bindings).clone()
    }

    /// Commands run inside pods so far, as (namespace, pod, command)
    #[must_use]
    pub fn execs(&self) -> Vec<(String, String, Vec<String>)> {
        lock(&self.execs).clone()
    }

    /// Make the next `count` exec calls fail after they are recorded
    pub fn fail_execs(&self, count: u32) {
        self.failing_execs.store(count, Ordering::SeqCst);
    }

    /// Number of create calls made through the trait, including rejected ones
    #[must_use]
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Number of successful artifact status writes
    #[must_use]
    pub fn status_writes(&self) -> usize {
        self.status_writes.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ClusterClient for MockClusterClient {
    // OSArtifact operations - delegated to artifacts module
    async fn get_artifact(&self, namespace: &str, name: &str) -> Result<Option<OSArtifact>, ClusterError> {
        Ok(self.artifact(namespace, name))
    }

    async fn patch_artifact_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
        status: &OSArtifactStatus,
    ) -> Result<OSArtifact, ClusterError> {
        artifacts::patch_status(self, namespace, name, resource_version, status)
    }

    async fn patch_artifact_finalizers(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
        finalizers: &[String],
    ) -> Result<OSArtifact, ClusterError> {
        artifacts::patch_finalizers(self, namespace, name, resource_version, finalizers)
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, ClusterError> {
        Ok(select(&lock(&self.pods), namespace, label_selector))
    }

    async fn list_jobs(&self, namespace: &str, label_selector: &str) -> Result<Vec<Job>, ClusterError> {
        Ok(select(&lock(&self.jobs), namespace, label_selector))
    }

    async fn list_volume_claims(&self, namespace: &str, label_selector: &str) -> Result<Vec<PersistentVolumeClaim>, ClusterError> {
        Ok(select(&lock(&self.volume_claims), namespace, label_selector))
    }

    async fn secret_exists(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        Ok(lock(&self.secrets).contains(&(namespace.to_string(), name.to_string())))
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap, ClusterError> {
        self.create(&self.config_maps, config_map)
    }

    async fn create_volume_claim(&self, claim: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim, ClusterError> {
        self.create(&self.volume_claims, claim)
    }

    async fn create_pod(&self, pod: &Pod) -> Result<Pod, ClusterError> {
        self.create(&self.pods, pod)
    }

    async fn create_job(&self, job: &Job) -> Result<Job, ClusterError> {
        self.create(&self.jobs, job)
    }

    async fn create_service_account(&self, account: &ServiceAccount) -> Result<ServiceAccount, ClusterError> {
        self.create(&self.service_accounts, account)
    }

    async fn create_role_binding(&self, binding: &RoleBinding) -> Result<RoleBinding, ClusterError> {
        self.create(&self.role_bindings, binding)
    }

    async fn delete_role_binding(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let key = (namespace.to_string(), name.to_string());
        if lock(&self.role_bindings).remove(&key).is_none() {
            return Err(ClusterError::NotFound(format!("rolebinding {namespace}/{name}")));
        }
        lock(&self.deleted_role_bindings).push(key);
        Ok(())
    }

    async fn exec_in_pod(&self, namespace: &str, pod: &str, command: &[String]) -> Result<(), ClusterError> {
        if !lock(&self.pods).contains_key(&(namespace.to_string(), pod.to_string())) {
            return Err(ClusterError::NotFound(format!("pod {namespace}/{pod}")));
        }
        lock(&self.execs).push((namespace.to_string(), pod.to_string(), command.to_vec()));
        let failing = self
            .failing_execs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(ClusterError::Exec(format!("{namespace}/{pod}: command terminated with exit code 1")));
        }
        Ok(())
    }
}
