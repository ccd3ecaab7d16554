//! OSArtifact CRD
//!
//! Declares a bootable OS build: where the root filesystem comes from, which
//! outputs to produce from it, and where to export the result.

use crate::conditions::Condition;
use crate::references::{OutputImage, SecretKeySelector};
use k8s_openapi::api::batch::v1::JobSpec;
use k8s_openapi::api::core::v1::{LocalObjectReference, PersistentVolumeClaimSpec};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "build.kairos.io",
    version = "v1alpha2",
    kind = "OSArtifact",
    namespaced,
    status = "OSArtifactStatus",
    shortname = "osa",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OSArtifactSpec {
    /// Pre-built Kairos image to unpack as the root filesystem
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_name: Option<String>,

    /// Non-Kairos base image to convert before building
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_image_name: Option<String>,

    /// Secret holding a Dockerfile to build the base image from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_image_dockerfile: Option<SecretKeySelector>,

    /// Produce an ISO
    #[serde(default)]
    pub iso: bool,

    /// Raspberry Pi board to produce an ARM disk image for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<Model>,

    /// Extra disk size for raw cloud images, e.g. `32000`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_size: Option<String>,

    /// Produce a raw cloud disk image
    #[serde(default)]
    pub cloud_image: bool,

    /// Produce an Azure VHD
    #[serde(default)]
    pub azure_image: bool,

    /// Produce a GCE image
    #[serde(default)]
    pub gce_image: bool,

    /// Produce netboot artifacts (implies an ISO)
    #[serde(default)]
    pub netboot: bool,

    /// Base URL netboot artifacts are served from
    #[serde(default, rename = "netbootURL", skip_serializing_if = "Option::is_none")]
    pub netboot_url: Option<String>,

    /// Secret holding the cloud-config to embed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_config_ref: Option<SecretKeySelector>,

    /// Inline cloud-config, used when no secret is referenced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_config: Option<String>,

    /// GRUB configuration overlaid into the ISO
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grub_config: Option<String>,

    /// Content bundles unpacked into the root filesystem, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bundles: Vec<String>,

    /// Contents of /etc/os-release
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_release: Option<String>,

    /// Contents of /etc/kairos-release
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kairos_release: Option<String>,

    /// Pull secrets for the builder pod
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(schema_with = "object_list_schema")]
    pub image_pull_secrets: Vec<LocalObjectReference>,

    /// Jobs run against the finished artifact volume, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(schema_with = "object_list_schema")]
    pub exporters: Vec<JobSpec>,

    /// Override for the artifact volume claim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "object_schema")]
    pub volume: Option<PersistentVolumeClaimSpec>,

    /// Registry the artifact is pushed to after the build
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_image: Option<OutputImage>,
}

/// Raspberry Pi board model
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Model {
    /// Raspberry Pi 3
    Rpi3,
    /// Raspberry Pi 4
    Rpi4,
}

impl Model {
    /// Board name as understood by the image tooling
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Model::Rpi3 => "rpi3",
            Model::Rpi4 => "rpi4",
        }
    }
}

/// Where the root filesystem comes from, in precedence order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource<'a> {
    /// Build from a Dockerfile stored in a Secret
    Dockerfile(&'a SecretKeySelector),
    /// Pull a non-Kairos image and convert it
    BaseImage(&'a str),
    /// Unpack a ready Kairos image
    Native(&'a str),
}

impl OSArtifactSpec {
    /// Resolve the image source: Dockerfile secret beats base image beats image name
    #[must_use]
    pub fn image_source(&self) -> ImageSource<'_> {
        if let Some(dockerfile) = &self.base_image_dockerfile {
            return ImageSource::Dockerfile(dockerfile);
        }
        match self.base_image_name.as_deref() {
            Some(base) if !base.is_empty() => ImageSource::BaseImage(base),
            _ => ImageSource::Native(self.image_name.as_deref().unwrap_or_default()),
        }
    }

    /// Whether an ISO is built (netboot is extracted from the ISO)
    #[must_use]
    pub fn wants_iso(&self) -> bool {
        self.iso || self.netboot
    }

    /// Whether a raw disk image is built (Azure and GCE convert from it)
    #[must_use]
    pub fn wants_cloud_image(&self) -> bool {
        self.cloud_image || self.azure_image || self.gce_image
    }

    /// Number of export jobs the artifact needs: declared exporters plus the registry push
    #[must_use]
    pub fn exporter_count(&self) -> usize {
        self.exporters.len() + usize::from(self.output_image.is_some())
    }

    /// Secrets that must exist before the builder pod can start
    #[must_use]
    pub fn build_secrets(&self) -> Vec<&SecretKeySelector> {
        self.base_image_dockerfile
            .iter()
            .chain(self.cloud_config_ref.iter())
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OSArtifactStatus {
    /// Lifecycle phase
    #[serde(default)]
    pub phase: ArtifactPhase,

    /// Conditions, keyed by type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default)]
/// OSArtifact lifecycle phase
///
/// Progression is strictly forward: Pending, Building, Exporting, Ready.
/// Error can be entered from Building or Exporting and is absorbing.
#[serde(rename_all = "PascalCase")]
pub enum ArtifactPhase {
    /// Nothing created yet
    #[default]
    #[serde(alias = "pending")]
    Pending,

    /// Builder pod created
    #[serde(alias = "building")]
    Building,

    /// Build finished, exporter jobs running
    #[serde(alias = "exporting")]
    Exporting,

    /// All exports finished
    #[serde(alias = "ready")]
    Ready,

    /// Build or export failed
    #[serde(alias = "error")]
    Error,
}

impl ArtifactPhase {
    /// Whether moving from `self` to `next` is a legal edge
    #[must_use]
    pub fn can_transition_to(self, next: ArtifactPhase) -> bool {
        use ArtifactPhase::{Building, Error, Exporting, Pending, Ready};
        matches!(
            (self, next),
            (Pending, Building)
                | (Building, Exporting)
                | (Exporting, Ready)
                | (Building | Exporting, Error)
        )
    }

    /// Ready and Error take no further automatic action
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, ArtifactPhase::Ready | ArtifactPhase::Error)
    }

    /// Phase name as serialized
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactPhase::Pending => "Pending",
            ArtifactPhase::Building => "Building",
            ArtifactPhase::Exporting => "Exporting",
            ArtifactPhase::Ready => "Ready",
            ArtifactPhase::Error => "Error",
        }
    }
}

impl fmt::Display for ArtifactPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl OSArtifact {
    /// Current phase, `Pending` when no status has been written yet
    #[must_use]
    pub fn phase(&self) -> ArtifactPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }
}

// Kubernetes core types carry no JsonSchema impl; accept them as opaque objects.
fn object_schema(_: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "type": "object",
        "nullable": true,
        "x-kubernetes-preserve-unknown-fields": true,
    })
}

fn object_list_schema(_: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "type": "array",
        "items": {
            "type": "object",
            "x-kubernetes-preserve-unknown-fields": true,
        },
    })
}
