use super::{ObjectFactory, artifact_labels, owned_meta, role_binding_name};
use crate::config::CopyTarget;
use crds::{ARTIFACT_NAMESPACE_LABEL, OSArtifact};
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

impl ObjectFactory {
    /// Service account the builder pod runs as when copying artifacts out
    #[must_use]
    pub fn service_account(&self, artifact: &OSArtifact) -> ServiceAccount {
        ServiceAccount {
            metadata: owned_meta(artifact, artifact.name_any()),
            automount_service_account_token: Some(true),
            ..Default::default()
        }
    }

    /// Binding of the copy role to the artifact's service account in the target namespace
    ///
    /// Owner references cannot cross namespaces, so the binding is found again
    /// through its labels and deleted by the finalizer.
    #[must_use]
    pub fn role_binding(&self, artifact: &OSArtifact, target: &CopyTarget) -> RoleBinding {
        let mut labels = artifact_labels(artifact);
        labels.insert(
            ARTIFACT_NAMESPACE_LABEL.to_string(),
            artifact.namespace().unwrap_or_default(),
        );

        RoleBinding {
            metadata: ObjectMeta {
                name: Some(role_binding_name(artifact)),
                namespace: Some(target.namespace.clone()),
                labels: Some(labels),
                ..Default::default()
            },
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: "Role".to_string(),
                name: target.role.clone(),
            },
            subjects: Some(vec![Subject {
                kind: "ServiceAccount".to_string(),
                name: artifact.name_any(),
                namespace: artifact.namespace(),
                ..Default::default()
            }]),
        }
    }
}
