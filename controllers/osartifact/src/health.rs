//! Health projection for builder pods and exporter jobs.
//!
//! Collapses raw Pod and Job status into a coarse [`HealthStatus`]. Pure
//! functions, no cluster access. The reconciler only acts on terminal
//! outcomes (Healthy, Degraded) and uses the message as the user-visible
//! diagnostic when something fails.

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ContainerStatus, Pod};
use std::fmt;

/// Coarse health of a pod or job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatusCode {
    /// Status could not be determined
    Unknown,
    /// Still working towards a result
    Progressing,
    /// Finished successfully, or running and ready
    Healthy,
    /// Suspended by the user
    Suspended,
    /// Paused by the user
    Paused,
    /// Failed or crash-looping
    Degraded,
}

impl fmt::Display for HealthStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatusCode::Unknown => "Unknown",
            HealthStatusCode::Progressing => "Progressing",
            HealthStatusCode::Healthy => "Healthy",
            HealthStatusCode::Suspended => "Suspended",
            HealthStatusCode::Paused => "Paused",
            HealthStatusCode::Degraded => "Degraded",
        };
        f.write_str(s)
    }
}

/// Health code plus the most specific message available
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthStatus {
    /// Health code
    pub status: HealthStatusCode,
    /// Diagnostic message, may be empty
    pub message: String,
}

impl HealthStatus {
    fn new(status: HealthStatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

const RESTART_ALWAYS: &str = "Always";

/// Project a pod's status onto a health code.
///
/// Pods with restart policy `Always` are checked for crash-looping containers
/// first. Run-once pods (`Never`, `OnFailure`) are never Healthy while running.
#[must_use]
pub fn pod_health(pod: &Pod) -> HealthStatus {
    let restart_policy = pod
        .spec
        .as_ref()
        .and_then(|s| s.restart_policy.as_deref())
        .unwrap_or(RESTART_ALWAYS);
    let status = pod.status.as_ref();
    let message = status.and_then(|s| s.message.clone()).unwrap_or_default();
    let containers: &[ContainerStatus] = status
        .and_then(|s| s.container_statuses.as_deref())
        .unwrap_or_default();

    if restart_policy == RESTART_ALWAYS {
        let waiting_errors: Vec<_> = containers
            .iter()
            .filter_map(|c| c.state.as_ref()?.waiting.as_ref())
            .filter(|w| w.reason.as_deref().is_some_and(is_waiting_error))
            .collect();
        if !waiting_errors.is_empty() {
            let messages: Vec<&str> = waiting_errors
                .iter()
                .filter_map(|w| w.message.as_deref())
                .filter(|m| !m.is_empty())
                .collect();
            return HealthStatus::new(HealthStatusCode::Degraded, messages.join(", "));
        }
    }

    match status.and_then(|s| s.phase.as_deref()) {
        Some("Pending") => HealthStatus::new(HealthStatusCode::Progressing, message),
        Some("Succeeded") => HealthStatus::new(HealthStatusCode::Healthy, message),
        Some("Failed") => {
            if !message.is_empty() {
                return HealthStatus::new(HealthStatusCode::Degraded, message);
            }
            let init: &[ContainerStatus] = status
                .and_then(|s| s.init_container_statuses.as_deref())
                .unwrap_or_default();
            let failure = init
                .iter()
                .chain(containers)
                .find_map(container_fail_message)
                .unwrap_or_default();
            HealthStatus::new(HealthStatusCode::Degraded, failure)
        }
        Some("Running") => {
            if restart_policy != RESTART_ALWAYS {
                return HealthStatus::new(HealthStatusCode::Progressing, message);
            }
            if is_pod_ready(pod) {
                return HealthStatus::new(HealthStatusCode::Healthy, message);
            }
            let restarted = containers
                .iter()
                .any(|c| c.last_state.as_ref().is_some_and(|s| s.terminated.is_some()));
            if restarted {
                HealthStatus::new(HealthStatusCode::Degraded, message)
            } else {
                HealthStatus::new(HealthStatusCode::Progressing, message)
            }
        }
        _ => HealthStatus::new(HealthStatusCode::Unknown, message),
    }
}

/// Project a job's conditions onto a health code.
#[must_use]
pub fn job_health(job: &Job) -> HealthStatus {
    let mut failed = false;
    let mut complete = false;
    let mut suspended = false;
    let mut fail_message = String::new();
    let mut message = String::new();

    let conditions = job
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_deref())
        .unwrap_or_default();
    for condition in conditions {
        let text = condition.message.clone().unwrap_or_default();
        match condition.type_.as_str() {
            "Failed" => {
                failed = true;
                complete = true;
                fail_message = text;
            }
            "Complete" => {
                complete = true;
                message = text;
            }
            "Suspended" => {
                complete = true;
                message = text;
                if condition.status == "True" {
                    suspended = true;
                }
            }
            _ => {}
        }
    }

    if !complete {
        HealthStatus::new(HealthStatusCode::Progressing, message)
    } else if failed {
        HealthStatus::new(HealthStatusCode::Degraded, fail_message)
    } else if suspended {
        HealthStatus::new(HealthStatusCode::Suspended, fail_message)
    } else {
        HealthStatus::new(HealthStatusCode::Healthy, message)
    }
}

fn is_waiting_error(reason: &str) -> bool {
    reason.starts_with("Err") || reason.ends_with("Error") || reason.ends_with("BackOff")
}

fn is_pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

/// Most specific failure text for one container: termination message, then OOM, then exit code
fn container_fail_message(container: &ContainerStatus) -> Option<String> {
    let terminated = container.state.as_ref()?.terminated.as_ref()?;
    if let Some(message) = terminated.message.as_deref().filter(|m| !m.is_empty()) {
        return Some(message.to_string());
    }
    if terminated.reason.as_deref() == Some("OOMKilled") {
        return Some("OOMKilled".to_string());
    }
    if terminated.exit_code != 0 {
        return Some(format!(
            "container \"{}\" failed with exit code {}",
            container.name, terminated.exit_code
        ));
    }
    None
}
