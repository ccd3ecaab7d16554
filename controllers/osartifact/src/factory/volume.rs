use super::{ObjectFactory, owned_meta, volume_claim_name};
use crds::OSArtifact;
use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::ResourceExt;
use std::collections::BTreeMap;

impl ObjectFactory {
    /// Artifact volume claim: the spec's override, or a single RWO claim of the default size
    #[must_use]
    pub fn volume_claim(&self, artifact: &OSArtifact) -> PersistentVolumeClaim {
        let spec = artifact
            .spec
            .volume
            .clone()
            .unwrap_or_else(|| PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                storage_class_name: self.storage_class.clone(),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(BTreeMap::from([(
                        "storage".to_string(),
                        Quantity(self.default_volume_size.clone()),
                    )])),
                    ..Default::default()
                }),
                ..Default::default()
            });

        PersistentVolumeClaim {
            metadata: owned_meta(artifact, volume_claim_name(&artifact.name_any())),
            spec: Some(spec),
            ..Default::default()
        }
    }
}
