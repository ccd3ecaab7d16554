use super::config_map::DOCKERFILE_KEY;
use super::steps::{ARTIFACTS_PATH, ARTIFACTS_VOLUME, CONFIG_VOLUME, mount};
use super::{ObjectFactory, exporter_job_name, owned_meta};
use crds::{EXPORTER_INDEX_ANNOTATION, OSArtifact, OSArtifactSpec, OutputImage, RegistryCloud, SecretKeySelector};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, EnvVar, KeyToPath, PersistentVolumeClaimVolumeSource,
    PodSpec, PodTemplateSpec, SecretVolumeSource, Volume, VolumeMount,
};
use kube::ResourceExt;
use std::collections::BTreeMap;

const EXPORT_CONFIG_PATH: &str = "/kaniko/config";
const REGISTRY_AUTH_VOLUME: &str = "registry-auth";

/// Auth secret the exporter at `index` needs, if any
///
/// Only the synthesized registry export (the position after the declared
/// exporters) references a secret.
#[must_use]
pub fn exporter_auth_secret(spec: &OSArtifactSpec, index: usize) -> Option<&SecretKeySelector> {
    if index != spec.exporters.len() {
        return None;
    }
    spec.output_image.as_ref()?.auth_secret_ref.as_ref()
}

impl ObjectFactory {
    /// Exporter job at position `index`, mounting the artifact volume `volume_claim`
    ///
    /// Positions `0..exporters.len()` wrap the declared job templates. The next
    /// position, present when an output image is set, is a synthesized registry
    /// push.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not below [`OSArtifactSpec::exporter_count`]. Callers
    /// only iterate over existing positions.
    #[must_use]
    pub fn exporter_job(&self, artifact: &OSArtifact, index: usize, volume_claim: &str) -> Job {
        let spec = &artifact.spec;
        assert!(
            index < spec.exporter_count(),
            "exporter index {index} out of range for {} exporters",
            spec.exporter_count()
        );

        let mut job_spec = match (spec.exporters.get(index), &spec.output_image) {
            (Some(template), _) => template.clone(),
            (None, Some(output)) => self.registry_export_spec(artifact, output),
            (None, None) => unreachable!("index checked against exporter_count"),
        };

        let pod_spec = job_spec.template.spec.get_or_insert_with(PodSpec::default);
        pod_spec
            .volumes
            .get_or_insert_with(Vec::new)
            .push(Volume {
                name: ARTIFACTS_VOLUME.to_string(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: volume_claim.to_string(),
                    read_only: Some(self.export_volume_read_only),
                }),
                ..Default::default()
            });

        let mut metadata = owned_meta(artifact, exporter_job_name(&artifact.name_any(), index));
        metadata.annotations = Some(BTreeMap::from([(
            EXPORTER_INDEX_ANNOTATION.to_string(),
            index.to_string(),
        )]));

        Job {
            metadata,
            spec: Some(job_spec),
            ..Default::default()
        }
    }

    /// Job pushing the artifact volume to a registry as an image
    fn registry_export_spec(&self, artifact: &OSArtifact, output: &OutputImage) -> JobSpec {
        let mut args = vec![
            format!("--dockerfile={EXPORT_CONFIG_PATH}/{DOCKERFILE_KEY}"),
            format!("--context=dir://{ARTIFACTS_PATH}"),
            format!("--destination={}", output.reference()),
        ];
        if output.insecure {
            args.push("--insecure".to_string());
        }

        let mut container = Container {
            name: "export".to_string(),
            image: Some(self.exporter_image.clone()),
            args: Some(args),
            volume_mounts: Some(vec![
                VolumeMount {
                    read_only: Some(self.export_volume_read_only),
                    ..mount(ARTIFACTS_VOLUME, ARTIFACTS_PATH)
                },
                mount(CONFIG_VOLUME, EXPORT_CONFIG_PATH),
            ]),
            ..Default::default()
        };
        let mut volumes = vec![Volume {
            name: CONFIG_VOLUME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: artifact.name_any(),
                ..Default::default()
            }),
            ..Default::default()
        }];

        if let Some(secret) = &output.auth_secret_ref {
            let auth = RegistryAuth::for_cloud(output.cloud);
            volumes.push(Volume {
                name: REGISTRY_AUTH_VOLUME.to_string(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(secret.name.clone()),
                    items: Some(vec![KeyToPath {
                        key: secret.key_or(auth.default_key).to_string(),
                        path: auth.file.to_string(),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
                ..Default::default()
            });
            container
                .volume_mounts
                .get_or_insert_with(Vec::new)
                .push(mount(REGISTRY_AUTH_VOLUME, auth.mount_path));
            if let Some(env) = auth.env {
                container.env = Some(vec![EnvVar {
                    name: env.to_string(),
                    value: Some(format!("{}/{}", auth.mount_path, auth.file)),
                    ..Default::default()
                }]);
            }
        }

        JobSpec {
            template: PodTemplateSpec {
                metadata: None,
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    containers: vec![container],
                    volumes: Some(volumes),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }
    }
}

/// Where a registry credential lands inside the export container
struct RegistryAuth {
    default_key: &'static str,
    file: &'static str,
    mount_path: &'static str,
    env: Option<&'static str>,
}

impl RegistryAuth {
    fn for_cloud(cloud: Option<RegistryCloud>) -> Self {
        match cloud {
            Some(RegistryCloud::Gcp) => Self {
                default_key: "credentials.json",
                file: "credentials.json",
                mount_path: "/secret",
                env: Some("GOOGLE_APPLICATION_CREDENTIALS"),
            },
            Some(RegistryCloud::Aws) => Self {
                default_key: "credentials",
                file: "credentials",
                mount_path: "/root/.aws",
                env: None,
            },
            Some(RegistryCloud::Azure) | None => Self {
                default_key: ".dockerconfigjson",
                file: "config.json",
                mount_path: "/kaniko/.docker",
                env: None,
            },
        }
    }
}
