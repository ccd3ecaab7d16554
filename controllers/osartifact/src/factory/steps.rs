//! Ordered build steps of the builder pod.
//!
//! [`BUILD_STEPS`] is the whole ordering contract: each entry pairs a predicate
//! over the spec with a builder producing that step's containers. The builder
//! pod's init containers are the concatenation of every applicable entry, in
//! list order. Step commands are opaque to the controller.

use super::config_map::{CLOUD_CONFIG_KEY, GRUB_KEY, KAIROS_RELEASE_KEY, OS_RELEASE_KEY};
use crds::{ImageSource, OSArtifactSpec};
use k8s_openapi::api::core::v1::{Container, EnvVar, SecurityContext, VolumeMount};
use tracing::debug;

pub(crate) const ARTIFACTS_VOLUME: &str = "artifacts";
pub(crate) const ROOTFS_VOLUME: &str = "rootfs";
pub(crate) const CONFIG_VOLUME: &str = "config";
pub(crate) const DOCKERFILE_VOLUME: &str = "dockerfile";
pub(crate) const CLOUD_CONFIG_VOLUME: &str = "cloudconfig";

pub(crate) const ARTIFACTS_PATH: &str = "/artifacts";
pub(crate) const ROOTFS_PATH: &str = "/rootfs";
const DOCKERFILE_PATH: &str = "/workspace/dockerfile";
const OVERLAY_PATH: &str = "/iso/iso-overlay";

/// Default key of a cloud-config secret
pub(crate) const CLOUD_CONFIG_SECRET_KEY: &str = "userdata";
/// Default key of a Dockerfile secret
pub(crate) const DOCKERFILE_SECRET_KEY: &str = "Dockerfile";

/// Inputs every step builder sees
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    /// Artifact name, used for output file names
    pub artifact_name: &'a str,
    /// Artifact spec
    pub spec: &'a OSArtifactSpec,
    /// Image carrying the build tooling
    pub tool_image: &'a str,
    /// Image building from a Dockerfile
    pub kaniko_image: &'a str,
}

/// One conditional entry of the build plan
#[derive(Debug)]
pub struct BuildStep {
    /// Short name of the entry, for logs and tests
    pub name: &'static str,
    /// Whether the entry contributes containers for this spec
    pub applies: fn(&OSArtifactSpec) -> bool,
    /// Containers contributed, in order
    pub build: fn(&StepContext<'_>) -> Vec<Container>,
}

/// The build plan, in execution order
pub static BUILD_STEPS: &[BuildStep] = &[
    BuildStep {
        name: "dockerfile",
        applies: |spec| matches!(spec.image_source(), ImageSource::Dockerfile(_)),
        build: dockerfile_steps,
    },
    BuildStep {
        name: "base-image",
        applies: |spec| matches!(spec.image_source(), ImageSource::BaseImage(_)),
        build: base_image_steps,
    },
    BuildStep {
        name: "image",
        applies: |spec| matches!(spec.image_source(), ImageSource::Native(_)),
        build: native_image_steps,
    },
    BuildStep {
        name: "bundles",
        applies: |spec| !spec.bundles.is_empty(),
        build: bundle_steps,
    },
    BuildStep {
        name: "os-release",
        applies: |spec| is_set(spec.os_release.as_deref()),
        build: |ctx| vec![release_step(ctx, "os-release", OS_RELEASE_KEY)],
    },
    BuildStep {
        name: "kairos-release",
        applies: |spec| is_set(spec.kairos_release.as_deref()),
        build: |ctx| vec![release_step(ctx, "kairos-release", KAIROS_RELEASE_KEY)],
    },
    BuildStep {
        name: "iso",
        applies: OSArtifactSpec::wants_iso,
        build: iso_step,
    },
    BuildStep {
        name: "netboot",
        applies: |spec| spec.netboot,
        build: netboot_step,
    },
    BuildStep {
        name: "cloud-image",
        applies: OSArtifactSpec::wants_cloud_image,
        build: cloud_image_step,
    },
    BuildStep {
        name: "azure-image",
        applies: |spec| spec.azure_image,
        build: |ctx| {
            let name = ctx.artifact_name;
            vec![tool_container(
                ctx,
                "build-azure-cloud-image",
                format!("/azure.sh /artifacts/{name}.raw /artifacts/{name}.vhd"),
                output_mounts(ctx.spec),
            )]
        },
    },
    BuildStep {
        name: "gce-image",
        applies: |spec| spec.gce_image,
        build: |ctx| {
            let name = ctx.artifact_name;
            vec![tool_container(
                ctx,
                "build-gce-cloud-image",
                format!("/gce.sh /artifacts/{name}.raw /artifacts/{name}.gce.raw"),
                output_mounts(ctx.spec),
            )]
        },
    },
    BuildStep {
        name: "arm-image",
        applies: |spec| spec.model.is_some(),
        build: arm_image_step,
    },
];

/// Entries of [`BUILD_STEPS`] that apply to `spec`, in order
pub(crate) fn planned_steps(spec: &OSArtifactSpec) -> Vec<&'static BuildStep> {
    BUILD_STEPS.iter().filter(|step| (step.applies)(spec)).collect()
}

/// Init containers of the builder pod for `ctx`
pub(crate) fn init_containers(ctx: &StepContext<'_>) -> Vec<Container> {
    let plan = planned_steps(ctx.spec);
    debug!(
        artifact = ctx.artifact_name,
        steps = ?plan.iter().map(|step| step.name).collect::<Vec<_>>(),
        "Planned build steps"
    );
    plan.into_iter().flat_map(|step| (step.build)(ctx)).collect()
}

fn is_set(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.is_empty())
}

pub(crate) fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..Default::default()
    }
}

fn file_mount(name: &str, path: &str, sub_path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        sub_path: Some(sub_path.to_string()),
        ..Default::default()
    }
}

pub(crate) fn shell_container(
    name: &str,
    image: &str,
    script: String,
    volume_mounts: Vec<VolumeMount>,
) -> Container {
    Container {
        name: name.to_string(),
        image: Some(image.to_string()),
        image_pull_policy: Some("Always".to_string()),
        command: Some(vec!["/bin/bash".to_string(), "-cxe".to_string()]),
        args: Some(vec![script]),
        volume_mounts: Some(volume_mounts),
        security_context: Some(SecurityContext {
            privileged: Some(false),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn tool_container(
    ctx: &StepContext<'_>,
    name: &str,
    script: String,
    volume_mounts: Vec<VolumeMount>,
) -> Container {
    shell_container(name, ctx.tool_image, script, volume_mounts)
}

fn rootfs_mounts() -> Vec<VolumeMount> {
    vec![mount(ROOTFS_VOLUME, ROOTFS_PATH)]
}

/// Where the cloud-config file comes from, if any
fn cloud_config_mount(spec: &OSArtifactSpec) -> Option<VolumeMount> {
    let path = format!("{OVERLAY_PATH}/cloud_config.yaml");
    if let Some(secret) = &spec.cloud_config_ref {
        return Some(file_mount(
            CLOUD_CONFIG_VOLUME,
            &path,
            secret.key_or(CLOUD_CONFIG_SECRET_KEY),
        ));
    }
    is_set(spec.cloud_config.as_deref())
        .then(|| file_mount(CONFIG_VOLUME, &path, CLOUD_CONFIG_KEY))
}

/// Mounts of the steps that write into the artifact volume, including overlay files
fn output_mounts(spec: &OSArtifactSpec) -> Vec<VolumeMount> {
    let mut mounts = vec![
        mount(ARTIFACTS_VOLUME, ARTIFACTS_PATH),
        mount(ROOTFS_VOLUME, ROOTFS_PATH),
    ];
    if is_set(spec.grub_config.as_deref()) {
        mounts.push(file_mount(
            CONFIG_VOLUME,
            &format!("{OVERLAY_PATH}/boot/grub2/grub.cfg"),
            GRUB_KEY,
        ));
    }
    mounts.extend(cloud_config_mount(spec));
    mounts
}

fn pull_step(ctx: &StepContext<'_>, id: &str, image: &str) -> Container {
    tool_container(
        ctx,
        &format!("pull-image-{id}"),
        format!("luet util unpack {image} {ROOTFS_PATH}"),
        rootfs_mounts(),
    )
}

fn dockerfile_steps(ctx: &StepContext<'_>) -> Vec<Container> {
    let kaniko = Container {
        name: "kaniko-build".to_string(),
        image: Some(ctx.kaniko_image.to_string()),
        image_pull_policy: Some("Always".to_string()),
        args: Some(vec![
            "--dockerfile".to_string(),
            format!("{DOCKERFILE_PATH}/Dockerfile"),
            "--context".to_string(),
            "dir:///workspace".to_string(),
            // Required by the builder even though nothing is pushed
            "--destination".to_string(),
            "whatever".to_string(),
            "--tar-path".to_string(),
            "/rootfs/image.tar".to_string(),
            "--no-push".to_string(),
        ]),
        volume_mounts: Some(vec![
            mount(ROOTFS_VOLUME, ROOTFS_PATH),
            mount(DOCKERFILE_VOLUME, DOCKERFILE_PATH),
        ]),
        ..Default::default()
    };
    let extract = tool_container(
        ctx,
        "image-extractor",
        format!(
            "luet util unpack --local file:///rootfs/image.tar {ROOTFS_PATH} && rm -f /rootfs/image.tar"
        ),
        rootfs_mounts(),
    );
    vec![kaniko, extract]
}

fn base_image_steps(ctx: &StepContext<'_>) -> Vec<Container> {
    let ImageSource::BaseImage(image) = ctx.spec.image_source() else {
        return Vec::new();
    };
    vec![
        pull_step(ctx, "baseimage", image),
        tool_container(
            ctx,
            "convert-to-kairos",
            format!("enki convert {ROOTFS_PATH}"),
            rootfs_mounts(),
        ),
    ]
}

fn native_image_steps(ctx: &StepContext<'_>) -> Vec<Container> {
    let ImageSource::Native(image) = ctx.spec.image_source() else {
        return Vec::new();
    };
    vec![pull_step(ctx, "baseimage", image)]
}

fn bundle_steps(ctx: &StepContext<'_>) -> Vec<Container> {
    ctx.spec
        .bundles
        .iter()
        .enumerate()
        .map(|(i, bundle)| pull_step(ctx, &i.to_string(), bundle))
        .collect()
}

fn release_step(ctx: &StepContext<'_>, file: &str, key: &str) -> Container {
    tool_container(
        ctx,
        file,
        format!("cp -rfv /etc/{file} {ROOTFS_PATH}/etc/{file}"),
        vec![
            file_mount(CONFIG_VOLUME, &format!("/etc/{file}"), key),
            mount(ROOTFS_VOLUME, ROOTFS_PATH),
        ],
    )
}

fn iso_step(ctx: &StepContext<'_>) -> Vec<Container> {
    let spec = ctx.spec;
    let overlay = if is_set(spec.grub_config.as_deref()) || cloud_config_mount(spec).is_some() {
        format!(" --overlay-iso {OVERLAY_PATH}")
    } else {
        String::new()
    };
    vec![tool_container(
        ctx,
        "build-iso",
        format!(
            "/entrypoint.sh --debug --name {} build-iso --date=false{overlay} --output {ARTIFACTS_PATH} dir:{ROOTFS_PATH}",
            ctx.artifact_name
        ),
        output_mounts(spec),
    )]
}

fn netboot_step(ctx: &StepContext<'_>) -> Vec<Container> {
    let name = ctx.artifact_name;
    let mut container = tool_container(
        ctx,
        "build-netboot",
        format!("/netboot.sh /artifacts/{name}.iso /artifacts/{name}"),
        output_mounts(ctx.spec),
    );
    container.env = Some(vec![EnvVar {
        name: "URL".to_string(),
        value: Some(ctx.spec.netboot_url.clone().unwrap_or_default()),
        ..Default::default()
    }]);
    vec![container]
}

fn cloud_image_step(ctx: &StepContext<'_>) -> Vec<Container> {
    let spec = ctx.spec;
    let mut script = format!("/raw-images.sh {ROOTFS_PATH} /artifacts/{}.raw", ctx.artifact_name);
    if let Some(cloud_config) = cloud_config_mount(spec) {
        script.push(' ');
        script.push_str(&cloud_config.mount_path);
    }
    let mut container = tool_container(ctx, "build-cloud-image", script, output_mounts(spec));
    if let Some(size) = spec.disk_size.as_deref().filter(|s| !s.is_empty()) {
        container.env = Some(vec![EnvVar {
            name: "EXTEND".to_string(),
            value: Some(size.to_string()),
            ..Default::default()
        }]);
    }
    vec![container]
}

fn arm_image_step(ctx: &StepContext<'_>) -> Vec<Container> {
    let Some(model) = ctx.spec.model else {
        return Vec::new();
    };
    let mut container = tool_container(
        ctx,
        "build-arm-image",
        format!(
            "/build-arm-image.sh --model {} --directory {ROOTFS_PATH} /artifacts/{}.img",
            model.as_str(),
            ctx.artifact_name
        ),
        output_mounts(ctx.spec),
    );
    // Loop devices are needed to partition the disk image
    container.security_context = Some(SecurityContext {
        privileged: Some(true),
        ..Default::default()
    });
    vec![container]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{Model, SecretKeySelector};

    fn names(spec: &OSArtifactSpec) -> Vec<String> {
        let ctx = StepContext {
            artifact_name: "hello",
            spec,
            tool_image: "tools",
            kaniko_image: "kaniko",
        };
        init_containers(&ctx).into_iter().map(|c| c.name).collect()
    }

    fn native() -> OSArtifactSpec {
        OSArtifactSpec {
            image_name: Some("quay.io/kairos/core-alpine:latest".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_image_source_precedence() {
        let mut spec = native();
        assert_eq!(names(&spec), vec!["pull-image-baseimage"]);

        spec.base_image_name = Some("ubuntu:24.04".to_string());
        assert_eq!(names(&spec), vec!["pull-image-baseimage", "convert-to-kairos"]);

        spec.base_image_dockerfile = Some(SecretKeySelector::new("recipe"));
        assert_eq!(names(&spec), vec!["kaniko-build", "image-extractor"]);
    }

    #[test]
    fn test_planned_steps_by_name() {
        let mut spec = native();
        spec.iso = true;
        spec.bundles = vec!["quay.io/a".to_string()];
        let planned: Vec<_> = planned_steps(&spec).iter().map(|step| step.name).collect();
        assert_eq!(planned, vec!["image", "bundles", "iso"]);
    }

    #[test]
    fn test_full_plan_order() {
        let spec = OSArtifactSpec {
            bundles: vec!["quay.io/a".to_string(), "quay.io/b".to_string()],
            os_release: Some("ID=kairos".to_string()),
            kairos_release: Some("KAIROS_VERSION=v3".to_string()),
            iso: true,
            netboot: true,
            cloud_image: true,
            azure_image: true,
            gce_image: true,
            model: Some(Model::Rpi4),
            ..native()
        };

        assert_eq!(
            names(&spec),
            vec![
                "pull-image-baseimage",
                "pull-image-0",
                "pull-image-1",
                "os-release",
                "kairos-release",
                "build-iso",
                "build-netboot",
                "build-cloud-image",
                "build-azure-cloud-image",
                "build-gce-cloud-image",
                "build-arm-image",
            ]
        );
    }

    #[test]
    fn test_derived_outputs() {
        // Netboot is extracted from the ISO, Azure and GCE convert the raw image
        let spec = OSArtifactSpec {
            netboot: true,
            gce_image: true,
            ..native()
        };
        assert_eq!(
            names(&spec),
            vec![
                "pull-image-baseimage",
                "build-iso",
                "build-netboot",
                "build-cloud-image",
                "build-gce-cloud-image",
            ]
        );
    }

    #[test]
    fn test_overlay_wiring() {
        let spec = OSArtifactSpec {
            iso: true,
            cloud_image: true,
            grub_config: Some("set timeout=1".to_string()),
            cloud_config_ref: Some(SecretKeySelector::with_key("cc", "config")),
            disk_size: Some("32000".to_string()),
            ..native()
        };
        let ctx = StepContext {
            artifact_name: "hello",
            spec: &spec,
            tool_image: "tools",
            kaniko_image: "kaniko",
        };
        let containers = init_containers(&ctx);

        let iso = &containers[1];
        assert!(iso.args.as_ref().unwrap()[0].contains("--overlay-iso /iso/iso-overlay"));
        let mounts = iso.volume_mounts.as_ref().unwrap();
        let cloud_config = mounts.iter().find(|m| m.name == CLOUD_CONFIG_VOLUME).unwrap();
        assert_eq!(cloud_config.sub_path.as_deref(), Some("config"));
        assert!(mounts.iter().any(|m| m.sub_path.as_deref() == Some(GRUB_KEY)));

        let cloud = &containers[2];
        assert!(cloud.args.as_ref().unwrap()[0].ends_with("/iso/iso-overlay/cloud_config.yaml"));
        assert_eq!(cloud.env.as_ref().unwrap()[0].name, "EXTEND");
    }

    #[test]
    fn test_every_step_uses_the_tool_image_except_kaniko() {
        let spec = OSArtifactSpec {
            base_image_dockerfile: Some(SecretKeySelector::new("recipe")),
            iso: true,
            ..Default::default()
        };
        let ctx = StepContext {
            artifact_name: "hello",
            spec: &spec,
            tool_image: "tools",
            kaniko_image: "kaniko",
        };
        for container in init_containers(&ctx) {
            let expected = if container.name == "kaniko-build" { "kaniko" } else { "tools" };
            assert_eq!(container.image.as_deref(), Some(expected), "{}", container.name);
        }
    }
}
