//! Secret references and registry destinations used by OSArtifact specs.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to a key inside a Secret in the artifact's namespace
///
/// Mirrors the Kubernetes `SecretKeySelector` shape but keeps `key` optional:
/// each consumer falls back to its own conventional key when it is unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeySelector {
    /// Name of the Secret
    pub name: String,

    /// Key within the Secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl SecretKeySelector {
    /// Create a selector for `name`, using the consumer's default key
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: None,
        }
    }

    /// Create a selector for an explicit key
    pub fn with_key(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: Some(key.into()),
        }
    }

    /// The selected key, or `default` when none was given
    #[must_use]
    pub fn key_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.key.as_deref().unwrap_or(default)
    }
}

/// Container registry destination for the built artifact
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutputImage {
    /// Registry host, e.g. `quay.io`
    pub registry: String,

    /// Repository path within the registry
    pub repository: String,

    /// Image tag (defaults to `latest`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    /// Push over plain HTTP
    #[serde(default)]
    pub insecure: bool,

    /// Secret holding registry credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_secret_ref: Option<SecretKeySelector>,

    /// Cloud provider whose credential format the auth secret uses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud: Option<RegistryCloud>,
}

impl OutputImage {
    /// Full image reference, `registry/repository:tag`
    #[must_use]
    pub fn reference(&self) -> String {
        format!(
            "{}/{}:{}",
            self.registry.trim_end_matches('/'),
            self.repository.trim_matches('/'),
            self.tag.as_deref().unwrap_or("latest"),
        )
    }
}

/// Credential flavour of a registry auth secret
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RegistryCloud {
    /// Google service account JSON key
    Gcp,
    /// AWS shared credentials file
    Aws,
    /// Azure container registry docker config
    Azure,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_or_falls_back() {
        assert_eq!(SecretKeySelector::new("cc").key_or("userdata"), "userdata");
        assert_eq!(
            SecretKeySelector::with_key("cc", "config").key_or("userdata"),
            "config"
        );
    }

    #[test]
    fn test_output_image_reference() {
        let image = OutputImage {
            registry: "quay.io/".to_string(),
            repository: "/kairos/custom".to_string(),
            ..Default::default()
        };
        assert_eq!(image.reference(), "quay.io/kairos/custom:latest");

        let tagged = OutputImage {
            tag: Some("v1.2.0".to_string()),
            ..image
        };
        assert_eq!(tagged.reference(), "quay.io/kairos/custom:v1.2.0");
    }

    #[test]
    fn test_registry_cloud_serialization() {
        let cloud: RegistryCloud = serde_json::from_str("\"gcp\"").unwrap();
        assert_eq!(cloud, RegistryCloud::Gcp);
        assert_eq!(serde_json::to_string(&RegistryCloud::Azure).unwrap(), "\"azure\"");
    }
}
