//! Dependent-object factory.
//!
//! Pure construction of every object an OSArtifact needs: the artifact volume
//! claim, the config map, the builder pod, exporter jobs and copy RBAC. Nothing
//! here talks to the cluster. The same artifact always yields the same objects.
//!
//! Same-namespace objects carry [`ARTIFACT_LABEL`] and a controller owner
//! reference. The cross-namespace role binding only carries labels and has to
//! be deleted explicitly when the artifact goes away.

mod config_map;
mod job;
mod pod;
mod rbac;
mod steps;
mod volume;

pub use job::exporter_auth_secret;

use crate::config::{CopyTarget, OperatorConfig};
use crds::{ARTIFACT_LABEL, OSArtifact};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

/// Name of the artifact volume claim
#[must_use]
pub fn volume_claim_name(artifact_name: &str) -> String {
    format!("{artifact_name}-artifacts")
}

/// Name of the builder pod
#[must_use]
pub fn builder_pod_name(artifact_name: &str) -> String {
    format!("{artifact_name}-build")
}

/// Name of the exporter job at `index`
#[must_use]
pub fn exporter_job_name(artifact_name: &str, index: usize) -> String {
    format!("{artifact_name}-export-{index}")
}

/// Name of the copy role binding in the target namespace
#[must_use]
pub fn role_binding_name(artifact: &OSArtifact) -> String {
    format!(
        "{}-{}",
        artifact.namespace().unwrap_or_default(),
        artifact.name_any()
    )
}

/// Builds the desired state of an artifact's dependents
#[derive(Debug, Clone)]
pub struct ObjectFactory {
    tool_image: String,
    exporter_image: String,
    default_volume_size: String,
    storage_class: Option<String>,
    export_volume_read_only: bool,
    copy_target: Option<CopyTarget>,
}

impl ObjectFactory {
    /// Create a factory from the operator configuration
    #[must_use]
    pub fn new(config: &OperatorConfig) -> Self {
        Self {
            tool_image: config.tool_image.clone(),
            exporter_image: config.exporter_image.clone(),
            default_volume_size: config.default_volume_size.clone(),
            storage_class: config.storage_class.clone(),
            export_volume_read_only: config.export_volume_read_only,
            copy_target: config.copy_target.clone(),
        }
    }

    /// Cross-namespace copy target, if configured
    #[must_use]
    pub fn copy_target(&self) -> Option<&CopyTarget> {
        self.copy_target.as_ref()
    }
}

/// Labels stamped on every dependent
pub(crate) fn artifact_labels(artifact: &OSArtifact) -> BTreeMap<String, String> {
    BTreeMap::from([(ARTIFACT_LABEL.to_string(), artifact.name_any())])
}

/// Metadata for a same-namespace dependent: name, namespace, label and owner reference
pub(crate) fn owned_meta(artifact: &OSArtifact, name: String) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: artifact.namespace(),
        labels: Some(artifact_labels(artifact)),
        owner_references: artifact.controller_owner_ref(&()).map(|owner| vec![owner]),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_artifact;

    #[test]
    fn test_dependent_names() {
        let artifact = create_test_artifact("builds", "hello");
        assert_eq!(volume_claim_name("hello"), "hello-artifacts");
        assert_eq!(builder_pod_name("hello"), "hello-build");
        assert_eq!(exporter_job_name("hello", 2), "hello-export-2");
        assert_eq!(role_binding_name(&artifact), "builds-hello");
    }

    #[test]
    fn test_owned_meta_carries_label_and_owner() {
        let artifact = create_test_artifact("builds", "hello");
        let meta = owned_meta(&artifact, "hello-build".to_string());

        assert_eq!(meta.namespace.as_deref(), Some("builds"));
        assert_eq!(
            meta.labels.unwrap().get(ARTIFACT_LABEL).map(String::as_str),
            Some("hello")
        );
        let owners = meta.owner_references.unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].kind, "OSArtifact");
        assert_eq!(owners[0].name, "hello");
        assert_eq!(owners[0].controller, Some(true));
    }
}
