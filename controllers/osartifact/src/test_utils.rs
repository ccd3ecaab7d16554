//! Test utilities for unit testing the reconciler
//!
//! This module provides helpers for creating test data and setting up test scenarios.

use crate::config::{CopyTarget, DEFAULT_COPIER_IMAGE, OperatorConfig};
use crate::factory::ObjectFactory;
use crate::metrics::Metrics;
use crate::reconciler::{ReconcileSettings, Reconciler};
use crate::retry::RetryPolicy;
use cluster_client::MockClusterClient;
use crds::{OSArtifact, OSArtifactSpec};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Helper to create a test OSArtifact that unpacks a ready Kairos image
pub fn create_test_artifact(namespace: &str, name: &str) -> OSArtifact {
    OSArtifact {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some("test-uid".to_string()),
            ..Default::default()
        },
        spec: OSArtifactSpec {
            image_name: Some("quay.io/kairos/core-alpine:latest".to_string()),
            ..Default::default()
        },
        status: None,
    }
}

/// Copy target serving artifacts from an nginx pod in `web`
pub fn copy_target() -> CopyTarget {
    CopyTarget {
        namespace: "web".to_string(),
        role: "artifact-copier".to_string(),
        pod_label: "app=nginx".to_string(),
        path: "/usr/share/nginx/html".to_string(),
        copier_image: DEFAULT_COPIER_IMAGE.to_string(),
    }
}

/// Reconcile settings with millisecond retry delays
pub fn fast_settings(config: &OperatorConfig) -> ReconcileSettings {
    ReconcileSettings {
        secret_requeue: config.secret_requeue,
        missing_volume: RetryPolicy::fixed(
            config.missing_volume_retries.saturating_add(1),
            Duration::from_millis(1),
        ),
        status_retry: RetryPolicy::fixed(5, Duration::from_millis(1)),
    }
}

/// Helper to create a reconciler backed by `client`
pub fn create_test_reconciler(client: &MockClusterClient, config: &OperatorConfig) -> Reconciler {
    Reconciler::new(
        Arc::new(client.clone()),
        ObjectFactory::new(config),
        fast_settings(config),
        Arc::new(Metrics::new().unwrap()),
    )
}

/// Move a pod to `phase`
pub fn set_pod_phase(pod: &mut Pod, phase: &str) {
    pod.status = Some(serde_json::from_value(json!({ "phase": phase })).unwrap());
}

/// Mark a pod Failed with one terminated container
pub fn fail_pod(pod: &mut Pod, container: &str, exit_code: i32, reason: &str) {
    pod.status = Some(
        serde_json::from_value(json!({
            "phase": "Failed",
            "containerStatuses": [{
                "name": container,
                "image": "quay.io/kairos/auroraboot:latest",
                "imageID": "",
                "ready": false,
                "restartCount": 0,
                "state": {"terminated": {"exitCode": exit_code, "reason": reason}}
            }]
        }))
        .unwrap(),
    );
}

/// Record one succeeded pod on a job
pub fn succeed_job(job: &mut Job) {
    job.status = Some(serde_json::from_value(json!({ "succeeded": 1 })).unwrap());
}

/// Mark a job failed the way the job controller does once its backoff limit is hit
pub fn fail_job(job: &mut Job, message: &str) {
    job.status = Some(
        serde_json::from_value(json!({
            "failed": 1,
            "conditions": [{
                "type": "Failed",
                "status": "True",
                "reason": "BackoffLimitExceeded",
                "message": message
            }]
        }))
        .unwrap(),
    );
}
