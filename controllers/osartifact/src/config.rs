//! Operator configuration.
//!
//! Everything is read from environment variables once at startup. Parsing goes
//! through a lookup function so tests never touch the process environment.

use crate::error::ControllerError;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Default image carrying the build tooling
pub const DEFAULT_TOOL_IMAGE: &str = "quay.io/kairos/osbuilder-tools:latest";
/// Default image for the registry export job
pub const DEFAULT_EXPORTER_IMAGE: &str = "gcr.io/kaniko-project/executor:latest";
/// Default size of the artifact volume claim
pub const DEFAULT_VOLUME_SIZE: &str = "2Gi";
/// Default image pushing built artifacts into the serving pod
pub const DEFAULT_COPIER_IMAGE: &str = "quay.io/kairos/kubectl";

/// Serving pod the builder copies finished artifacts into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyTarget {
    /// Namespace of the serving pod; the role binding is created here
    pub namespace: String,
    /// Role granted to the builder service account
    pub role: String,
    /// Label selector picking the serving pod
    pub pod_label: String,
    /// Directory inside the serving pod receiving the artifacts
    pub path: String,
    /// Image running kubectl for the copy
    pub copier_image: String,
}

/// Runtime configuration for the OSArtifact controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Namespace to watch (all namespaces when unset)
    pub watch_namespace: Option<String>,
    /// Image running the build steps
    pub tool_image: String,
    /// Image running the registry export
    pub exporter_image: String,
    /// Storage request for the artifact volume claim
    pub default_volume_size: String,
    /// Storage class for the artifact volume claim
    pub storage_class: Option<String>,
    /// Requeue delay while waiting for a referenced secret
    pub secret_requeue: Duration,
    /// Extra lookups of the artifact volume claim before giving up (0 = fail at once)
    pub missing_volume_retries: u32,
    /// Mount the artifact volume read-only in exporter jobs
    pub export_volume_read_only: bool,
    /// Cross-namespace copy permissions for the builder
    pub copy_target: Option<CopyTarget>,
    /// Artifacts reconciled in parallel
    pub reconcile_concurrency: u16,
    /// Bind address for `/healthz`, `/readyz` and `/metrics`
    pub probe_bind_address: SocketAddr,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            tool_image: DEFAULT_TOOL_IMAGE.to_string(),
            exporter_image: DEFAULT_EXPORTER_IMAGE.to_string(),
            default_volume_size: DEFAULT_VOLUME_SIZE.to_string(),
            storage_class: None,
            secret_requeue: Duration::from_secs(5),
            missing_volume_retries: 0,
            export_volume_read_only: true,
            copy_target: None,
            reconcile_concurrency: 3,
            probe_bind_address: SocketAddr::from(([0, 0, 0, 0], 8081)),
        }
    }
}

impl OperatorConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let copy_target = match (
            get("COPY_TO_NAMESPACE"),
            get("COPY_ROLE"),
            get("COPY_TO_POD_LABEL"),
            get("COPY_TO_PATH"),
        ) {
            (Some(namespace), Some(role), Some(pod_label), Some(path)) => Some(CopyTarget {
                namespace,
                role,
                pod_label,
                path,
                copier_image: get("COPIER_IMAGE").unwrap_or_else(|| DEFAULT_COPIER_IMAGE.to_string()),
            }),
            (None, None, None, None) => None,
            _ => {
                return Err(ControllerError::InvalidConfig(
                    "COPY_TO_NAMESPACE, COPY_ROLE, COPY_TO_POD_LABEL and COPY_TO_PATH must be set together"
                        .to_string(),
                ));
            }
        };

        let reconcile_concurrency = parse(&get, "RECONCILE_CONCURRENCY")?
            .unwrap_or(defaults.reconcile_concurrency);
        if reconcile_concurrency == 0 {
            return Err(ControllerError::InvalidConfig(
                "RECONCILE_CONCURRENCY must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            watch_namespace: get("WATCH_NAMESPACE"),
            tool_image: get("TOOL_IMAGE").unwrap_or(defaults.tool_image),
            exporter_image: get("EXPORTER_IMAGE").unwrap_or(defaults.exporter_image),
            default_volume_size: get("DEFAULT_VOLUME_SIZE").unwrap_or(defaults.default_volume_size),
            storage_class: get("STORAGE_CLASS"),
            secret_requeue: parse::<u64>(&get, "SECRET_REQUEUE_SECONDS")?
                .map_or(defaults.secret_requeue, Duration::from_secs),
            missing_volume_retries: parse(&get, "MISSING_VOLUME_RETRIES")?
                .unwrap_or(defaults.missing_volume_retries),
            export_volume_read_only: parse(&get, "EXPORT_VOLUME_READ_ONLY")?
                .unwrap_or(defaults.export_volume_read_only),
            copy_target,
            reconcile_concurrency,
            probe_bind_address: parse(&get, "PROBE_BIND_ADDRESS")?
                .unwrap_or(defaults.probe_bind_address),
        })
    }
}

fn parse<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ControllerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| ControllerError::InvalidConfig(format!("{key}={raw}: {e}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<OperatorConfig, ControllerError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        OperatorConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_when_environment_is_empty() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config, OperatorConfig::default());
        assert_eq!(config.secret_requeue, Duration::from_secs(5));
        assert_eq!(config.probe_bind_address.to_string(), "0.0.0.0:8081");
        assert!(config.export_volume_read_only);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("WATCH_NAMESPACE", "builds"),
            ("TOOL_IMAGE", "registry.local/tools:v1"),
            ("STORAGE_CLASS", "fast"),
            ("SECRET_REQUEUE_SECONDS", "30"),
            ("MISSING_VOLUME_RETRIES", "3"),
            ("EXPORT_VOLUME_READ_ONLY", "false"),
            ("COPY_TO_NAMESPACE", "web"),
            ("COPY_ROLE", "artifact-copier"),
            ("COPY_TO_POD_LABEL", "app=nginx"),
            ("COPY_TO_PATH", "/usr/share/nginx/html"),
            ("RECONCILE_CONCURRENCY", "8"),
            ("PROBE_BIND_ADDRESS", "127.0.0.1:9000"),
        ])
        .unwrap();

        assert_eq!(config.watch_namespace.as_deref(), Some("builds"));
        assert_eq!(config.tool_image, "registry.local/tools:v1");
        assert_eq!(config.storage_class.as_deref(), Some("fast"));
        assert_eq!(config.secret_requeue, Duration::from_secs(30));
        assert_eq!(config.missing_volume_retries, 3);
        assert!(!config.export_volume_read_only);
        assert_eq!(
            config.copy_target,
            Some(CopyTarget {
                namespace: "web".to_string(),
                role: "artifact-copier".to_string(),
                pod_label: "app=nginx".to_string(),
                path: "/usr/share/nginx/html".to_string(),
                copier_image: DEFAULT_COPIER_IMAGE.to_string(),
            })
        );
        assert_eq!(config.reconcile_concurrency, 8);
        assert_eq!(config.probe_bind_address.port(), 9000);
    }

    #[test]
    fn test_empty_values_count_as_unset() {
        let config = config_from(&[("WATCH_NAMESPACE", ""), ("TOOL_IMAGE", "  ")]).unwrap();
        assert!(config.watch_namespace.is_none());
        assert_eq!(config.tool_image, DEFAULT_TOOL_IMAGE);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            config_from(&[("SECRET_REQUEUE_SECONDS", "soon")]),
            Err(ControllerError::InvalidConfig(_))
        ));
        assert!(matches!(
            config_from(&[("PROBE_BIND_ADDRESS", "nowhere")]),
            Err(ControllerError::InvalidConfig(_))
        ));
        assert!(matches!(
            config_from(&[("RECONCILE_CONCURRENCY", "0")]),
            Err(ControllerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_copy_target_needs_every_value() {
        assert!(matches!(
            config_from(&[("COPY_TO_NAMESPACE", "web")]),
            Err(ControllerError::InvalidConfig(_))
        ));
        assert!(matches!(
            config_from(&[
                ("COPY_TO_NAMESPACE", "web"),
                ("COPY_ROLE", "artifact-copier"),
                ("COPY_TO_PATH", "/srv"),
            ]),
            Err(ControllerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_copier_image_override() {
        let config = config_from(&[
            ("COPY_TO_NAMESPACE", "web"),
            ("COPY_ROLE", "artifact-copier"),
            ("COPY_TO_POD_LABEL", "app=nginx"),
            ("COPY_TO_PATH", "/srv"),
            ("COPIER_IMAGE", "registry.local/kubectl:v1"),
        ])
        .unwrap();
        assert_eq!(config.copy_target.unwrap().copier_image, "registry.local/kubectl:v1");
    }
}
