use super::{ObjectFactory, owned_meta};
use crds::OSArtifact;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;
use std::collections::BTreeMap;

pub(crate) const GRUB_KEY: &str = "grub.cfg";
pub(crate) const OS_RELEASE_KEY: &str = "os-release";
pub(crate) const KAIROS_RELEASE_KEY: &str = "kairos-release";
pub(crate) const CLOUD_CONFIG_KEY: &str = "cloud_config.yaml";
pub(crate) const DOCKERFILE_KEY: &str = "Dockerfile";

/// Dockerfile the registry export builds: every artifact on top of an empty image
const EXPORT_DOCKERFILE: &str = "FROM scratch\nCOPY . /\n";

impl ObjectFactory {
    /// Config map with the text files the build steps mount. Empty fields produce no key.
    #[must_use]
    pub fn config_map(&self, artifact: &OSArtifact) -> ConfigMap {
        let spec = &artifact.spec;
        let mut data = BTreeMap::new();

        let mut put = |key: &str, value: Option<&str>| {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                data.insert(key.to_string(), value.to_string());
            }
        };
        put(GRUB_KEY, spec.grub_config.as_deref());
        put(OS_RELEASE_KEY, spec.os_release.as_deref());
        put(KAIROS_RELEASE_KEY, spec.kairos_release.as_deref());
        if spec.cloud_config_ref.is_none() {
            put(CLOUD_CONFIG_KEY, spec.cloud_config.as_deref());
        }
        if spec.output_image.is_some() {
            put(DOCKERFILE_KEY, Some(EXPORT_DOCKERFILE));
        }

        ConfigMap {
            metadata: owned_meta(artifact, artifact.name_any()),
            data: Some(data),
            ..Default::default()
        }
    }
}
