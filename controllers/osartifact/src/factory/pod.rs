use super::steps::{
    ARTIFACTS_PATH, ARTIFACTS_VOLUME, CLOUD_CONFIG_VOLUME, CONFIG_VOLUME, DOCKERFILE_SECRET_KEY,
    DOCKERFILE_VOLUME, ROOTFS_PATH, ROOTFS_VOLUME, StepContext, init_containers, mount,
    shell_container,
};
use super::{ObjectFactory, builder_pod_name, owned_meta};
use crate::config::CopyTarget;
use crds::{ImageSource, OSArtifact};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, EmptyDirVolumeSource, KeyToPath,
    PersistentVolumeClaimVolumeSource, Pod, PodSpec, SecretVolumeSource, Volume,
};
use kube::ResourceExt;

impl ObjectFactory {
    /// Builder pod running the build plan against the artifact volume `volume_claim`
    ///
    /// With a copy target the export runs as the last init container and the
    /// pod finishes by pushing the artifacts into the serving pod.
    #[must_use]
    pub fn builder_pod(&self, artifact: &OSArtifact, volume_claim: &str) -> Pod {
        let name = artifact.name_any();
        let ctx = StepContext {
            artifact_name: &name,
            spec: &artifact.spec,
            tool_image: &self.tool_image,
            kaniko_image: &self.exporter_image,
        };

        let mut steps = init_containers(&ctx);
        let export = self.export_image_container(artifact);
        let containers = match &self.copy_target {
            Some(target) => {
                steps.push(export);
                vec![push_to_server_container(target)]
            }
            None => vec![export],
        };

        let spec = PodSpec {
            restart_policy: Some("Never".to_string()),
            init_containers: Some(steps),
            containers,
            volumes: Some(builder_volumes(artifact, volume_claim)),
            image_pull_secrets: (!artifact.spec.image_pull_secrets.is_empty())
                .then(|| artifact.spec.image_pull_secrets.clone()),
            service_account_name: self.copy_target.as_ref().map(|_| name.clone()),
            ..Default::default()
        };

        Pod {
            metadata: owned_meta(artifact, builder_pod_name(&name)),
            spec: Some(spec),
            ..Default::default()
        }
    }

    /// Final step: pack the root filesystem as an image archive on the artifact volume
    fn export_image_container(&self, artifact: &OSArtifact) -> Container {
        let name = artifact.name_any();
        let reference = artifact
            .spec
            .output_image
            .as_ref()
            .map_or_else(|| name.clone(), crds::OutputImage::reference);
        shell_container(
            "export-image",
            &self.tool_image,
            format!(
                "tar -czvpf test.tar -C {ROOTFS_PATH} . && luet util pack {reference} test.tar {name}.tar && chmod +r {name}.tar && mv {name}.tar {ARTIFACTS_PATH}"
            ),
            vec![
                mount(ROOTFS_VOLUME, ROOTFS_PATH),
                mount(ARTIFACTS_VOLUME, ARTIFACTS_PATH),
            ],
        )
    }
}

/// Stream `/artifacts` into the first pod matching the target's label
fn push_to_server_container(target: &CopyTarget) -> Container {
    let CopyTarget {
        namespace,
        pod_label,
        path,
        ..
    } = target;
    shell_container(
        "push-to-server",
        &target.copier_image,
        format!(
            r#"tar cf - -C {ARTIFACTS_PATH} . | kubectl exec -i -n {namespace} $(kubectl get pods -l {pod_label} -n {namespace} --no-headers -o custom-columns=":metadata.name" | head -n1) -- tar xf - -C {path}"#
        ),
        vec![
            mount(ROOTFS_VOLUME, ROOTFS_PATH),
            mount(ARTIFACTS_VOLUME, ARTIFACTS_PATH),
        ],
    )
}

fn builder_volumes(artifact: &OSArtifact, volume_claim: &str) -> Vec<Volume> {
    let mut volumes = vec![
        Volume {
            name: ARTIFACTS_VOLUME.to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: volume_claim.to_string(),
                read_only: Some(false),
            }),
            ..Default::default()
        },
        Volume {
            name: ROOTFS_VOLUME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        },
        Volume {
            name: CONFIG_VOLUME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: artifact.name_any(),
                ..Default::default()
            }),
            ..Default::default()
        },
    ];

    if let ImageSource::Dockerfile(secret) = artifact.spec.image_source() {
        volumes.push(Volume {
            name: DOCKERFILE_VOLUME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret.name.clone()),
                items: Some(vec![KeyToPath {
                    key: secret.key_or(DOCKERFILE_SECRET_KEY).to_string(),
                    path: "Dockerfile".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    if let Some(secret) = &artifact.spec.cloud_config_ref {
        volumes.push(Volume {
            name: CLOUD_CONFIG_VOLUME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret.name.clone()),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    volumes
}
