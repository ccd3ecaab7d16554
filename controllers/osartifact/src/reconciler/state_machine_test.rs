//! Phase transitions driven end to end against the mock cluster.

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use crate::factory::ObjectFactory;
use crate::test_utils::{
    copy_target, create_test_artifact, create_test_reconciler, fail_job, fail_pod, set_pod_phase, succeed_job,
};
use cluster_client::{ClusterError, MockClusterClient};
use crds::{
    ARTIFACT_FINALIZER, ArtifactPhase, Condition, ConditionStatus, OSArtifact, OSArtifactStatus,
    READY_CONDITION, SecretKeySelector, find_condition,
};
use k8s_openapi::api::batch::v1::JobSpec;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::time::Duration;

const NS: &str = "builds";
const NAME: &str = "hello";

fn stored(client: &MockClusterClient) -> OSArtifact {
    client.artifact(NS, NAME).expect("artifact should exist")
}

fn ready(artifact: &OSArtifact) -> Condition {
    let status = artifact.status.as_ref().expect("status should be set");
    find_condition(&status.conditions, READY_CONDITION)
        .cloned()
        .expect("Ready condition should be set")
}

fn with_exporters(count: usize) -> OSArtifact {
    let mut artifact = create_test_artifact(NS, NAME);
    artifact.spec.exporters = vec![JobSpec::default(); count];
    artifact
}

/// Run the artifact through Building into Exporting
async fn drive_to_exporting(client: &MockClusterClient, reconciler: &super::Reconciler) {
    reconciler.reconcile(NS, NAME).await.unwrap();
    client.update_pod(NS, "hello-build", |pod| set_pod_phase(pod, "Succeeded"));
    let action = reconciler.reconcile(NS, NAME).await.unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(1)));
    assert_eq!(stored(client).phase(), ArtifactPhase::Exporting);
}

#[tokio::test]
async fn test_missing_artifact_is_ignored() {
    let client = MockClusterClient::new();
    let reconciler = create_test_reconciler(&client, &OperatorConfig::default());

    let action = reconciler.reconcile(NS, NAME).await.unwrap();

    assert_eq!(action, Action::await_change());
    assert_eq!(client.create_calls(), 0);
}

#[tokio::test]
async fn test_first_reconcile_starts_build() {
    let client = MockClusterClient::new();
    client.add_artifact(create_test_artifact(NS, NAME));
    let reconciler = create_test_reconciler(&client, &OperatorConfig::default());

    let action = reconciler.reconcile(NS, NAME).await.unwrap();

    assert_eq!(action, Action::await_change());
    let artifact = stored(&client);
    assert_eq!(artifact.phase(), ArtifactPhase::Building);
    assert!(artifact.finalizers().iter().any(|f| f == ARTIFACT_FINALIZER));

    let condition = ready(&artifact);
    assert_eq!(condition.status, ConditionStatus::False);
    assert_eq!(condition.reason, super::REASON_PENDING);

    assert_eq!(client.config_maps(NS).len(), 1);
    assert_eq!(client.volume_claims(NS)[0].name_any(), "hello-artifacts");
    assert_eq!(client.pods(NS)[0].name_any(), "hello-build");
    assert_eq!(client.create_calls(), 3);
    assert_eq!(
        reconciler
            .metrics
            .transitions(ArtifactPhase::Pending, ArtifactPhase::Building),
        1
    );
}

#[tokio::test]
async fn test_reconcile_is_idempotent_while_building() {
    let client = MockClusterClient::new();
    client.add_artifact(create_test_artifact(NS, NAME));
    let reconciler = create_test_reconciler(&client, &OperatorConfig::default());

    reconciler.reconcile(NS, NAME).await.unwrap();
    let writes = client.status_writes();
    client.update_pod(NS, "hello-build", |pod| set_pod_phase(pod, "Running"));
    let action = reconciler.reconcile(NS, NAME).await.unwrap();

    assert_eq!(action, Action::await_change());
    assert_eq!(client.create_calls(), 3);
    assert_eq!(client.status_writes(), writes);
    assert_eq!(stored(&client).phase(), ArtifactPhase::Building);
}

#[tokio::test]
async fn test_existing_pod_records_building() {
    let client = MockClusterClient::new();
    let artifact = create_test_artifact(NS, NAME);
    let pod = ObjectFactory::new(&OperatorConfig::default()).builder_pod(&artifact, "hello-artifacts");
    client.add_artifact(artifact);
    client.add_pod(pod);
    let reconciler = create_test_reconciler(&client, &OperatorConfig::default());

    let action = reconciler.reconcile(NS, NAME).await.unwrap();

    assert_eq!(action, Action::requeue(Duration::from_secs(1)));
    assert_eq!(stored(&client).phase(), ArtifactPhase::Building);
    assert_eq!(client.create_calls(), 0);
}

#[tokio::test]
async fn test_missing_secret_requeues_without_creating() {
    let client = MockClusterClient::new();
    let mut artifact = create_test_artifact(NS, NAME);
    artifact.spec.cloud_config_ref = Some(SecretKeySelector::new("cloud-config"));
    client.add_artifact(artifact);
    let reconciler = create_test_reconciler(&client, &OperatorConfig::default());

    let action = reconciler.reconcile(NS, NAME).await.unwrap();

    assert_eq!(action, Action::requeue(Duration::from_secs(5)));
    assert_eq!(client.create_calls(), 0);
    assert_eq!(stored(&client).phase(), ArtifactPhase::Pending);

    client.add_secret(NS, "cloud-config");
    reconciler.reconcile(NS, NAME).await.unwrap();

    assert_eq!(stored(&client).phase(), ArtifactPhase::Building);
    assert_eq!(client.pods(NS).len(), 1);
}

#[tokio::test]
async fn test_build_failure_reports_exit_code() {
    let client = MockClusterClient::new();
    client.add_artifact(create_test_artifact(NS, NAME));
    let reconciler = create_test_reconciler(&client, &OperatorConfig::default());

    reconciler.reconcile(NS, NAME).await.unwrap();
    client.update_pod(NS, "hello-build", |pod| fail_pod(pod, "build-iso", 137, "Error"));
    let action = reconciler.reconcile(NS, NAME).await.unwrap();

    assert_eq!(action, Action::await_change());
    let artifact = stored(&client);
    assert_eq!(artifact.phase(), ArtifactPhase::Error);
    let condition = ready(&artifact);
    assert_eq!(condition.status, ConditionStatus::False);
    assert_eq!(condition.reason, super::REASON_ERROR);
    assert_eq!(condition.message, "container \"build-iso\" failed with exit code 137");
}

#[tokio::test]
async fn test_build_failure_reports_oom() {
    let client = MockClusterClient::new();
    client.add_artifact(create_test_artifact(NS, NAME));
    let reconciler = create_test_reconciler(&client, &OperatorConfig::default());

    reconciler.reconcile(NS, NAME).await.unwrap();
    client.update_pod(NS, "hello-build", |pod| fail_pod(pod, "export-image", 137, "OOMKilled"));
    reconciler.reconcile(NS, NAME).await.unwrap();

    assert_eq!(ready(&stored(&client)).message, "OOMKilled");
}

#[tokio::test]
async fn test_build_success_without_exporters_becomes_ready() {
    let client = MockClusterClient::new();
    client.add_artifact(create_test_artifact(NS, NAME));
    let reconciler = create_test_reconciler(&client, &OperatorConfig::default());

    drive_to_exporting(&client, &reconciler).await;
    reconciler.reconcile(NS, NAME).await.unwrap();
    assert_eq!(stored(&client).phase(), ArtifactPhase::Ready);

    reconciler.reconcile(NS, NAME).await.unwrap();
    let condition = ready(&stored(&client));
    assert_eq!(condition.status, ConditionStatus::True);
    assert_eq!(condition.reason, super::REASON_READY);
}

#[tokio::test]
async fn test_export_creates_only_missing_jobs() {
    let client = MockClusterClient::new();
    let artifact = with_exporters(3);
    let factory = ObjectFactory::new(&OperatorConfig::default());
    for index in 0..2 {
        let mut job = factory.exporter_job(&artifact, index, "hello-artifacts");
        succeed_job(&mut job);
        client.add_job(job);
    }
    client.add_artifact(artifact);
    let reconciler = create_test_reconciler(&client, &OperatorConfig::default());

    drive_to_exporting(&client, &reconciler).await;
    let before = client.create_calls();
    let action = reconciler.reconcile(NS, NAME).await.unwrap();

    assert_eq!(action, Action::await_change());
    assert_eq!(client.create_calls(), before + 1);
    let mut names: Vec<_> = client.jobs(NS).iter().map(ResourceExt::name_any).collect();
    names.sort();
    assert_eq!(names, vec!["hello-export-0", "hello-export-1", "hello-export-2"]);
    assert_eq!(stored(&client).phase(), ArtifactPhase::Exporting);

    // Job 2 is still running: nothing new is created
    let after_create = client.create_calls();
    let writes = client.status_writes();
    let action = reconciler.reconcile(NS, NAME).await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(client.create_calls(), after_create);
    assert_eq!(client.status_writes(), writes);
    assert_eq!(client.jobs(NS).len(), 3);
    assert_eq!(stored(&client).phase(), ArtifactPhase::Exporting);

    client.update_job(NS, "hello-export-2", succeed_job);
    reconciler.reconcile(NS, NAME).await.unwrap();
    assert_eq!(stored(&client).phase(), ArtifactPhase::Ready);
}

#[tokio::test]
async fn test_export_waits_for_registry_secret() {
    let client = MockClusterClient::new();
    let mut artifact = create_test_artifact(NS, NAME);
    artifact.spec.output_image = Some(crds::OutputImage {
        registry: "quay.io".to_string(),
        repository: "kairos/hello".to_string(),
        auth_secret_ref: Some(SecretKeySelector::new("registry")),
        ..Default::default()
    });
    client.add_artifact(artifact);
    let reconciler = create_test_reconciler(&client, &OperatorConfig::default());

    drive_to_exporting(&client, &reconciler).await;
    let action = reconciler.reconcile(NS, NAME).await.unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(5)));
    assert!(client.jobs(NS).is_empty());

    client.add_secret(NS, "registry");
    reconciler.reconcile(NS, NAME).await.unwrap();
    assert_eq!(client.jobs(NS)[0].name_any(), "hello-export-0");
}

#[tokio::test]
async fn test_failed_export_moves_to_error() {
    let client = MockClusterClient::new();
    client.add_artifact(with_exporters(2));
    let reconciler = create_test_reconciler(&client, &OperatorConfig::default());

    drive_to_exporting(&client, &reconciler).await;
    reconciler.reconcile(NS, NAME).await.unwrap();
    assert_eq!(client.jobs(NS).len(), 2);

    client.update_job(NS, "hello-export-1", |job| fail_job(job, "Job has reached the specified backoff limit"));
    reconciler.reconcile(NS, NAME).await.unwrap();

    let artifact = stored(&client);
    assert_eq!(artifact.phase(), ArtifactPhase::Error);
    assert_eq!(ready(&artifact).message, "Job has reached the specified backoff limit");
}

#[tokio::test]
async fn test_missing_volume_is_an_error() {
    let client = MockClusterClient::new();
    client.add_artifact(with_exporters(1));
    let config = OperatorConfig {
        missing_volume_retries: 2,
        ..Default::default()
    };
    let reconciler = create_test_reconciler(&client, &config);

    drive_to_exporting(&client, &reconciler).await;
    client.delete_volume_claim(NS, "hello-artifacts");
    let result = reconciler.reconcile(NS, NAME).await;

    assert!(matches!(result, Err(ControllerError::MissingVolume { .. })));
    assert!(client.jobs(NS).is_empty());
    assert_eq!(stored(&client).phase(), ArtifactPhase::Exporting);
}

#[tokio::test]
async fn test_error_phase_keeps_message() {
    let client = MockClusterClient::new();
    let mut artifact = create_test_artifact(NS, NAME);
    artifact.status = Some(OSArtifactStatus {
        phase: ArtifactPhase::Error,
        conditions: vec![Condition::new(
            READY_CONDITION,
            ConditionStatus::False,
            super::REASON_PENDING,
            "disk full",
        )],
    });
    client.add_artifact(artifact);
    let reconciler = create_test_reconciler(&client, &OperatorConfig::default());

    let action = reconciler.reconcile(NS, NAME).await.unwrap();

    assert_eq!(action, Action::await_change());
    let artifact = stored(&client);
    assert_eq!(artifact.phase(), ArtifactPhase::Error);
    let condition = ready(&artifact);
    assert_eq!(condition.reason, super::REASON_ERROR);
    assert_eq!(condition.message, "disk full");
    assert_eq!(client.create_calls(), 0);
}

#[tokio::test]
async fn test_transition_rejects_illegal_edges() {
    let client = MockClusterClient::new();
    client.add_artifact(create_test_artifact(NS, NAME));
    let reconciler = create_test_reconciler(&client, &OperatorConfig::default());
    let artifact = stored(&client);

    let updated = reconciler
        .transition(&artifact, ArtifactPhase::Ready, None)
        .await
        .unwrap();

    assert_eq!(updated.phase(), ArtifactPhase::Pending);
    assert_eq!(client.status_writes(), 0);
    assert_eq!(
        reconciler
            .metrics
            .transitions(ArtifactPhase::Pending, ArtifactPhase::Ready),
        0
    );
}

#[tokio::test]
async fn test_stale_transition_is_counted_once() {
    let client = MockClusterClient::new();
    let mut artifact = create_test_artifact(NS, NAME);
    artifact.status = Some(OSArtifactStatus {
        phase: ArtifactPhase::Building,
        conditions: vec![Condition::new(READY_CONDITION, ConditionStatus::False, super::REASON_PENDING, "")],
    });
    client.add_artifact(artifact);
    let reconciler = create_test_reconciler(&client, &OperatorConfig::default());
    let stale = stored(&client);

    let first = reconciler
        .transition(&stale, ArtifactPhase::Exporting, None)
        .await
        .unwrap();
    let writes = client.status_writes();
    let second = reconciler
        .transition(&stale, ArtifactPhase::Exporting, None)
        .await
        .unwrap();

    assert_eq!(first.phase(), ArtifactPhase::Exporting);
    assert_eq!(second.phase(), ArtifactPhase::Exporting);
    assert_eq!(client.status_writes(), writes);
    assert_eq!(
        reconciler
            .metrics
            .transitions(ArtifactPhase::Building, ArtifactPhase::Exporting),
        1
    );
}

#[tokio::test]
async fn test_status_conflicts_are_retried() {
    let client = MockClusterClient::new();
    client.add_artifact(create_test_artifact(NS, NAME));
    let reconciler = create_test_reconciler(&client, &OperatorConfig::default());

    client.inject_conflicts(2);
    reconciler.reconcile(NS, NAME).await.unwrap();

    assert_eq!(stored(&client).phase(), ArtifactPhase::Building);
}

/// Serving pod in the copy target namespace
fn serving_pod(name: &str) -> Pod {
    serde_json::from_value(serde_json::json!({
        "metadata": {"name": name, "namespace": "web", "labels": {"app": "nginx"}}
    }))
    .unwrap()
}

#[tokio::test]
async fn test_deletion_removes_served_artifacts_binding_then_finalizer() {
    let client = MockClusterClient::new();
    client.add_artifact(create_test_artifact(NS, NAME));
    client.add_pod(serving_pod("nginx-0"));
    client.add_pod(serving_pod("nginx-1"));
    let config = OperatorConfig {
        copy_target: Some(copy_target()),
        ..Default::default()
    };
    let reconciler = create_test_reconciler(&client, &config);

    reconciler.reconcile(NS, NAME).await.unwrap();
    assert_eq!(client.service_accounts(NS).len(), 1);
    assert_eq!(client.role_bindings("web")[0].name_any(), "builds-hello");
    assert!(client.execs().is_empty());

    client.mark_deleted(NS, NAME);
    let action = reconciler.reconcile(NS, NAME).await.unwrap();

    assert_eq!(action, Action::await_change());
    assert_eq!(
        client.execs(),
        vec![(
            "web".to_string(),
            "nginx-0".to_string(),
            vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                "rm -rf /usr/share/nginx/html/hello.*".to_string()
            ]
        )]
    );
    assert_eq!(
        client.deleted_role_bindings(),
        vec![("web".to_string(), "builds-hello".to_string())]
    );
    assert!(client.artifact(NS, NAME).is_none());
}

#[tokio::test]
async fn test_failed_artifact_removal_keeps_binding_and_finalizer() {
    let client = MockClusterClient::new();
    client.add_artifact(create_test_artifact(NS, NAME));
    client.add_pod(serving_pod("nginx-0"));
    let config = OperatorConfig {
        copy_target: Some(copy_target()),
        ..Default::default()
    };
    let reconciler = create_test_reconciler(&client, &config);
    reconciler.reconcile(NS, NAME).await.unwrap();

    client.mark_deleted(NS, NAME);
    client.fail_execs(1);
    let result = reconciler.reconcile(NS, NAME).await;

    assert!(matches!(result, Err(ControllerError::Cluster(ClusterError::Exec(_)))));
    assert!(client.deleted_role_bindings().is_empty());
    assert!(stored(&client).finalizers().iter().any(|f| f == ARTIFACT_FINALIZER));

    reconciler.reconcile(NS, NAME).await.unwrap();
    assert_eq!(client.execs().len(), 2);
    assert_eq!(client.deleted_role_bindings().len(), 1);
    assert!(client.artifact(NS, NAME).is_none());
}

#[tokio::test]
async fn test_deletion_tolerates_missing_binding() {
    let client = MockClusterClient::new();
    let mut artifact = create_test_artifact(NS, NAME);
    artifact.metadata.finalizers = Some(vec![ARTIFACT_FINALIZER.to_string()]);
    artifact.status = Some(OSArtifactStatus {
        phase: ArtifactPhase::Building,
        conditions: vec![Condition::new(READY_CONDITION, ConditionStatus::False, super::REASON_PENDING, "")],
    });
    client.add_artifact(artifact);
    client.mark_deleted(NS, NAME);
    let config = OperatorConfig {
        copy_target: Some(copy_target()),
        ..Default::default()
    };
    let reconciler = create_test_reconciler(&client, &config);

    reconciler.reconcile(NS, NAME).await.unwrap();

    assert!(client.execs().is_empty());
    assert!(client.deleted_role_bindings().is_empty());
    assert!(client.artifact(NS, NAME).is_none());
}
