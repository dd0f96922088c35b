use super::*;
use serde_json::json;

fn deployment(replicas: i32, available: i32, conditions: serde_json::Value) -> Deployment {
    serde_json::from_value(json!({
        "metadata": {"name": "hello-00001-deployment", "namespace": "default"},
        "spec": {
            "replicas": replicas,
            "selector": {"matchLabels": {"serving.pylon.dev/revision": "hello-00001"}},
            "template": {"spec": {"containers": [{"name": "user-container", "image": "busybox"}]}}
        },
        "status": {"availableReplicas": available, "conditions": conditions}
    }))
    .unwrap()
}

fn pod(status: serde_json::Value) -> Pod {
    serde_json::from_value(json!({
        "metadata": {"name": "hello-00001-deployment-abc", "namespace": "default"},
        "status": status
    }))
    .unwrap()
}

fn crashing_pod() -> Pod {
    pod(json!({
        "conditions": [{"type": "PodScheduled", "status": "True"}],
        "containerStatuses": [
            {
                "name": "queue-proxy", "ready": true, "restartCount": 0,
                "image": "qp", "imageID": "qp"
            },
            {
                "name": "user-container", "ready": false, "restartCount": 3,
                "image": "busybox", "imageID": "busybox",
                "lastState": {"terminated": {"exitCode": 1, "reason": "Error", "message": "boom"}},
                "state": {"waiting": {"reason": "CrashLoopBackOff", "message": "back-off"}}
            }
        ]
    }))
}

#[test]
fn test_progressing_is_copied() {
    let mut health = DeploymentHealth::default();
    let status: DeploymentStatus = serde_json::from_value(json!({
        "conditions": [{"type": "Progressing", "status": "False", "reason": "ProgressDeadlineExceeded", "message": "too slow"}]
    }))
    .unwrap();

    health.propagate_deployment_status(&status);

    let progressing = health
        .get_condition(DeploymentConditionType::Progressing)
        .unwrap();
    assert_eq!(progressing.status, ConditionStatus::False);
    assert_eq!(progressing.reason, "ProgressDeadlineExceeded");
    assert_eq!(progressing.message, "too slow");

    let ready = health.get_condition(DeploymentConditionType::Ready).unwrap();
    assert_eq!(ready.status, ConditionStatus::False);
    assert_eq!(ready.reason, "ProgressDeadlineExceeded");
}

#[test]
fn test_replica_failure_is_inverted() {
    for (upstream, expected) in [
        ("True", ConditionStatus::False),
        ("False", ConditionStatus::True),
        ("Unknown", ConditionStatus::Unknown),
    ] {
        let mut health = DeploymentHealth::default();
        let status: DeploymentStatus = serde_json::from_value(json!({
            "conditions": [{"type": "ReplicaFailure", "status": upstream, "reason": "FailedCreate"}]
        }))
        .unwrap();

        health.propagate_deployment_status(&status);

        let replica_set = health
            .get_condition(DeploymentConditionType::ReplicaSetReady)
            .unwrap();
        assert_eq!(replica_set.status, expected, "upstream {}", upstream);
        assert_eq!(replica_set.reason, "FailedCreate");
    }
}

#[test]
fn test_unrelated_deployment_conditions_are_ignored() {
    let mut health = DeploymentHealth::default();
    let status: DeploymentStatus = serde_json::from_value(json!({
        "conditions": [{"type": "Available", "status": "True"}]
    }))
    .unwrap();

    health.propagate_deployment_status(&status);

    assert!(health.conditions.is_empty());
}

#[test]
fn test_terminated_container_marks_not_ready() {
    let health = diagnose_pod(&crashing_pod(), "user-container");

    let container = health
        .get_condition(PodConditionType::ContainerReady)
        .unwrap();
    assert_eq!(container.status, ConditionStatus::False);
    assert_eq!(container.reason, "Error");
    assert_eq!(container.message, "Container terminated (1): boom");

    let ready = health.get_condition(PodConditionType::Ready).unwrap();
    assert_eq!(ready.status, ConditionStatus::False);
    assert!(!health.is_ready());
}

#[test]
fn test_waiting_container_marks_not_ready() {
    let health = diagnose_pod(
        &pod(json!({
            "containerStatuses": [{
                "name": "user-container", "ready": false, "restartCount": 0,
                "image": "busybox", "imageID": "",
                "state": {"waiting": {"reason": "ImagePullBackOff", "message": "pull failed"}}
            }]
        })),
        "user-container",
    );

    let container = health
        .get_condition(PodConditionType::ContainerReady)
        .unwrap();
    assert_eq!(container.status, ConditionStatus::False);
    assert_eq!(container.reason, "ImagePullBackOff");
    assert_eq!(container.message, "pull failed");
}

#[test]
fn test_running_container_leaves_condition_alone() {
    let health = diagnose_pod(
        &pod(json!({
            "containerStatuses": [{
                "name": "user-container", "ready": true, "restartCount": 0,
                "image": "busybox", "imageID": "",
                "state": {"running": {}}
            }]
        })),
        "user-container",
    );

    assert!(health.get_condition(PodConditionType::ContainerReady).is_none());
}

#[test]
fn test_unschedulable_pod() {
    let health = diagnose_pod(
        &pod(json!({
            "conditions": [{
                "type": "PodScheduled", "status": "False",
                "reason": "Unschedulable", "message": "0/3 nodes are available"
            }]
        })),
        "user-container",
    );

    let scheduled = health.get_condition(PodConditionType::PodScheduled).unwrap();
    assert_eq!(scheduled.status, ConditionStatus::False);

    let ready = health.get_condition(PodConditionType::Ready).unwrap();
    assert_eq!(ready.reason, "Unschedulable");
    assert_eq!(ready.message, "0/3 nodes are available");
}

#[test]
fn test_pod_rollup_folds_into_pods_ready() {
    let deployment = deployment(1, 0, json!([]));

    let health = diagnose_deployment_with_pods(&deployment, &[crashing_pod()], "user-container");

    let pods_ready = health
        .get_condition(DeploymentConditionType::PodsReady)
        .unwrap();
    assert_eq!(pods_ready.status, ConditionStatus::False);
    assert_eq!(pods_ready.reason, "Error");
    assert_eq!(pods_ready.message, "Container terminated (1): boom");
    assert!(!health.is_ready());
}

#[test]
fn test_unknown_pod_rollup_stays_unknown() {
    let mut pod_health = PodHealth::default();
    pod_health.initialize_conditions();
    let mut health = DeploymentHealth::default();

    health.propagate_pod_health(&pod_health);

    let pods_ready = health
        .get_condition(DeploymentConditionType::PodsReady)
        .unwrap();
    assert_eq!(pods_ready.status, ConditionStatus::Unknown);
}

#[test]
fn test_healthy_pod_marks_pods_ready() {
    let mut pod_health = PodHealth::default();
    {
        let mut manager = POD_CONDITIONS.manage(&mut pod_health.conditions);
        manager.mark_true(PodConditionType::ContainerReady);
        manager.mark_true(PodConditionType::ResourcesAvailable);
        manager.mark_true(PodConditionType::PodScheduled);
    }
    assert!(pod_health.is_ready());
    let mut health = DeploymentHealth::default();

    health.propagate_pod_health(&pod_health);

    assert!(health
        .get_condition(DeploymentConditionType::PodsReady)
        .unwrap()
        .is_true());
}

#[test]
fn test_pods_ignored_when_replicas_available() {
    let deployment = deployment(2, 1, json!([]));

    let health = diagnose_deployment_with_pods(&deployment, &[crashing_pod()], "user-container");

    assert!(health
        .get_condition(DeploymentConditionType::PodsReady)
        .is_none());
}

#[test]
fn test_pods_ignored_when_scaled_to_zero() {
    let deployment = deployment(0, 0, json!([]));

    let health = diagnose_deployment_with_pods(&deployment, &[crashing_pod()], "user-container");

    assert!(health.conditions.is_empty());
}

#[test]
fn test_deployment_ready_when_all_dependents_true() {
    let deployment = deployment(
        1,
        1,
        json!([
            {"type": "Progressing", "status": "True", "reason": "NewReplicaSetAvailable"},
            {"type": "ReplicaFailure", "status": "False"}
        ]),
    );
    let mut health = diagnose_deployment_with_pods(&deployment, &[], "user-container");
    assert!(!health.is_ready(), "PodsReady still unknown");

    DEPLOYMENT_CONDITIONS
        .manage(&mut health.conditions)
        .mark_true(DeploymentConditionType::PodsReady);

    assert!(health.is_ready());
}

#[test]
fn test_format_label_selector() {
    let selector: LabelSelector = serde_json::from_value(json!({
        "matchLabels": {"app": "hello", "tier": "web"},
        "matchExpressions": [
            {"key": "env", "operator": "In", "values": ["prod", "staging"]},
            {"key": "legacy", "operator": "DoesNotExist"},
            {"key": "owner", "operator": "Exists"}
        ]
    }))
    .unwrap();

    assert_eq!(
        format_label_selector(&selector),
        "app=hello,tier=web,env in (prod,staging),!legacy,owner"
    );
    assert_eq!(format_label_selector(&LabelSelector::default()), "");
}
