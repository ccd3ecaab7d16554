//! Controller-specific error types.
//!
//! This module defines error types specific to the OSArtifact Controller
//! that are not covered by upstream library errors.

use cluster_client::ClusterError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the OSArtifact Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Cluster API error raised through the cluster client
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// Kubernetes client error (startup only)
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// The artifact volume claim disappeared while exporting
    #[error("failed to locate artifact pvc for {namespace}/{name}")]
    MissingVolume {
        /// Artifact namespace
        namespace: String,
        /// Artifact name
        name: String,
    },

    /// Reconcile request for an object without namespace or name
    #[error("Invalid object reference: {0}")]
    InvalidReference(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Probe server failed
    #[error("Probe server error: {0}")]
    Server(#[from] std::io::Error),

    /// Background task ended unexpectedly
    #[error("Task failed: {0}")]
    Task(String),
}

impl ControllerError {
    /// Short label used for the reconcile error metric
    #[must_use]
    pub fn metric_label(&self) -> &'static str {
        match self {
            ControllerError::Cluster(ClusterError::Conflict(_)) => "conflict",
            ControllerError::Cluster(_) | ControllerError::Kube(_) => "cluster",
            ControllerError::MissingVolume { .. } => "missing_volume",
            ControllerError::InvalidReference(_) => "invalid_reference",
            ControllerError::InvalidConfig(_) => "config",
            ControllerError::Metrics(_) | ControllerError::Server(_) | ControllerError::Task(_) => "internal",
        }
    }
}
