//! Cluster client errors

use thiserror::Error;

/// Errors returned by [`crate::ClusterClient`] operations
///
/// API errors the reconciler has to branch on (missing objects, create races,
/// optimistic-concurrency conflicts) get their own variants. Everything else
/// stays wrapped as [`ClusterError::Api`] and is treated as transient.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Create raced with an existing object of the same name
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Write was based on a stale resourceVersion
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Object passed in is missing fields the API call needs
    #[error("Invalid object: {0}")]
    InvalidObject(String),

    /// Any other Kubernetes API failure
    #[error("Kubernetes API error: {0}")]
    Api(kube::Error),

    /// Command run inside a pod did not complete successfully
    #[error("Exec failed: {0}")]
    Exec(String),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClusterError {
    /// Whether this is a not-found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound(_))
    }

    /// Whether this is a create race on an existing name
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, ClusterError::AlreadyExists(_))
    }

    /// Whether retrying against a fresh read could succeed
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, ClusterError::Conflict(_))
    }
}

impl From<kube::Error> for ClusterError {
    fn from(error: kube::Error) -> Self {
        match &error {
            kube::Error::Api(response) if response.code == 404 => {
                ClusterError::NotFound(response.message.clone())
            }
            kube::Error::Api(response) if response.code == 409 => {
                if response.reason == "AlreadyExists" {
                    ClusterError::AlreadyExists(response.message.clone())
                } else {
                    ClusterError::Conflict(response.message.clone())
                }
            }
            _ => ClusterError::Api(error),
        }
    }
}
