//! Health of the compute resources behind a revision
//!
//! Native Deployment and Pod status is mapped onto our own condition types
//! and rolled up with the shared condition engine.

use crate::controller::conditions::{Condition, ConditionSet, ConditionStatus};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentCondition, DeploymentStatus};
use k8s_openapi::api::core::v1::{ContainerStatus, Pod, PodCondition, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use tracing::debug;

/// Native Deployment condition types we read
const DEPLOYMENT_PROGRESSING: &str = "Progressing";
const DEPLOYMENT_REPLICA_FAILURE: &str = "ReplicaFailure";
const POD_SCHEDULED: &str = "PodScheduled";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentConditionType {
    Ready,
    PodsReady,
    ReplicaSetReady,
    Progressing,
}

pub const DEPLOYMENT_CONDITIONS: ConditionSet<DeploymentConditionType> = ConditionSet::new(
    DeploymentConditionType::Ready,
    &[
        DeploymentConditionType::PodsReady,
        DeploymentConditionType::ReplicaSetReady,
        DeploymentConditionType::Progressing,
    ],
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodConditionType {
    Ready,
    ContainerReady,
    ResourcesAvailable,
    PodScheduled,
}

pub const POD_CONDITIONS: ConditionSet<PodConditionType> = ConditionSet::new(
    PodConditionType::Ready,
    &[
        PodConditionType::ContainerReady,
        PodConditionType::ResourcesAvailable,
        PodConditionType::PodScheduled,
    ],
);

/// Our view of a Deployment's health
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeploymentHealth {
    pub conditions: Vec<Condition<DeploymentConditionType>>,
}

impl DeploymentHealth {
    pub fn initialize_conditions(&mut self) {
        DEPLOYMENT_CONDITIONS.manage(&mut self.conditions).initialize();
    }

    pub fn is_ready(&self) -> bool {
        DEPLOYMENT_CONDITIONS.is_happy(&self.conditions)
    }

    pub fn get_condition(
        &self,
        type_: DeploymentConditionType,
    ) -> Option<&Condition<DeploymentConditionType>> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Copy `Progressing` across and turn `ReplicaFailure` into `ReplicaSetReady`
    pub fn propagate_deployment_status(&mut self, status: &DeploymentStatus) {
        let mut manager = DEPLOYMENT_CONDITIONS.manage(&mut self.conditions);

        for cond in status.conditions.iter().flatten() {
            match cond.type_.as_str() {
                DEPLOYMENT_PROGRESSING => manager.set_condition(from_deployment_condition(
                    cond,
                    DeploymentConditionType::Progressing,
                )),
                DEPLOYMENT_REPLICA_FAILURE => manager.set_condition(invert(
                    from_deployment_condition(cond, DeploymentConditionType::ReplicaSetReady),
                )),
                _ => {}
            }
        }
    }

    /// Fold a pod's rollup into `PodsReady`
    pub fn propagate_pod_health(&mut self, pod: &PodHealth) {
        let Some(ready) = pod.get_condition(PodConditionType::Ready) else {
            return;
        };

        let mut manager = DEPLOYMENT_CONDITIONS.manage(&mut self.conditions);
        match ready.status {
            ConditionStatus::Unknown => manager.mark_unknown(
                DeploymentConditionType::PodsReady,
                ready.reason.clone(),
                ready.message.clone(),
            ),
            ConditionStatus::True => manager.mark_true(DeploymentConditionType::PodsReady),
            ConditionStatus::False => manager.mark_false(
                DeploymentConditionType::PodsReady,
                ready.reason.clone(),
                ready.message.clone(),
            ),
        }
    }
}

/// Our view of a single Pod's health
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PodHealth {
    pub conditions: Vec<Condition<PodConditionType>>,
}

impl PodHealth {
    pub fn initialize_conditions(&mut self) {
        POD_CONDITIONS.manage(&mut self.conditions).initialize();
    }

    pub fn is_ready(&self) -> bool {
        POD_CONDITIONS.is_happy(&self.conditions)
    }

    pub fn get_condition(&self, type_: PodConditionType) -> Option<&Condition<PodConditionType>> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    pub fn propagate_pod_status(&mut self, status: &PodStatus) {
        let mut manager = POD_CONDITIONS.manage(&mut self.conditions);

        for cond in status.conditions.iter().flatten() {
            if cond.type_ == POD_SCHEDULED {
                manager.set_condition(from_pod_condition(cond, PodConditionType::PodScheduled));
            }
        }
    }

    /// Mark `ContainerReady` False for a crashed or waiting container
    ///
    /// A running container leaves the condition untouched.
    pub fn propagate_container_status(&mut self, status: &ContainerStatus) {
        let mut manager = POD_CONDITIONS.manage(&mut self.conditions);

        let terminated = status
            .last_state
            .as_ref()
            .and_then(|s| s.terminated.as_ref());
        let waiting = status.state.as_ref().and_then(|s| s.waiting.as_ref());

        if let Some(t) = terminated {
            manager.mark_false(
                PodConditionType::ContainerReady,
                t.reason.clone().unwrap_or_default(),
                format!(
                    "Container terminated ({}): {}",
                    t.exit_code,
                    t.message.as_deref().unwrap_or_default()
                ),
            );
        } else if let Some(w) = waiting {
            manager.mark_false(
                PodConditionType::ContainerReady,
                w.reason.clone().unwrap_or_default(),
                w.message.clone().unwrap_or_default(),
            );
        }
    }
}

/// Health of one pod, judged by scheduling and the named container
pub fn diagnose_pod(pod: &Pod, container: &str) -> PodHealth {
    let mut health = PodHealth::default();

    let Some(status) = &pod.status else {
        return health;
    };

    // An unschedulable pod has no container statuses yet
    health.propagate_pod_status(status);

    if let Some(cs) = status
        .container_statuses
        .iter()
        .flatten()
        .find(|cs| cs.name == container)
    {
        health.propagate_container_status(cs);
    }

    health
}

/// Health of a deployment, given its pods
///
/// Pods only matter when replicas are wanted but none are available; the
/// first pod stands in for all of them.
pub fn diagnose_deployment_with_pods(
    deployment: &Deployment,
    pods: &[Pod],
    container: &str,
) -> DeploymentHealth {
    let mut health = DeploymentHealth::default();

    if let Some(status) = &deployment.status {
        health.propagate_deployment_status(status);
    }

    if is_starved(deployment) {
        if let Some(pod) = pods.first() {
            health.propagate_pod_health(&diagnose_pod(pod, container));
        }
    }

    health
}

/// Health of a deployment, listing its pods from the cluster when needed
pub async fn diagnose_deployment(
    deployment: &Deployment,
    client: &Client,
    container: &str,
) -> Result<DeploymentHealth, kube::Error> {
    if !is_starved(deployment) {
        return Ok(diagnose_deployment_with_pods(deployment, &[], container));
    }

    let namespace = deployment.namespace().unwrap_or_default();
    let selector = deployment
        .spec
        .as_ref()
        .map(|s| format_label_selector(&s.selector))
        .unwrap_or_default();

    let pods: Api<Pod> = Api::namespaced(client.clone(), &namespace);
    let list = pods.list(&ListParams::default().labels(&selector)).await?;
    debug!(
        deployment = %deployment.name_any(),
        pods = list.items.len(),
        "Diagnosing pods of deployment without available replicas"
    );

    Ok(diagnose_deployment_with_pods(
        deployment,
        &list.items,
        container,
    ))
}

/// Wants replicas but has none available
fn is_starved(deployment: &Deployment) -> bool {
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let available = deployment
        .status
        .as_ref()
        .and_then(|s| s.available_replicas)
        .unwrap_or(0);
    desired > 0 && available == 0
}

/// Render a label selector in `kubectl` syntax
pub fn format_label_selector(selector: &LabelSelector) -> String {
    let mut parts: Vec<String> = selector
        .match_labels
        .iter()
        .flatten()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();

    for expr in selector.match_expressions.iter().flatten() {
        let values = expr.values.clone().unwrap_or_default().join(",");
        parts.push(match expr.operator.as_str() {
            "In" => format!("{} in ({})", expr.key, values),
            "NotIn" => format!("{} notin ({})", expr.key, values),
            "Exists" => expr.key.clone(),
            "DoesNotExist" => format!("!{}", expr.key),
            other => format!("{} {} ({})", expr.key, other.to_ascii_lowercase(), values),
        });
    }

    parts.join(",")
}

fn invert<T>(mut condition: Condition<T>) -> Condition<T> {
    condition.status = condition.status.invert();
    condition
}

fn from_deployment_condition(
    cond: &DeploymentCondition,
    type_: DeploymentConditionType,
) -> Condition<DeploymentConditionType> {
    Condition::new(
        type_,
        ConditionStatus::from_k8s(&cond.status),
        cond.reason.clone().unwrap_or_default(),
        cond.message.clone().unwrap_or_default(),
    )
}

fn from_pod_condition(cond: &PodCondition, type_: PodConditionType) -> Condition<PodConditionType> {
    Condition::new(
        type_,
        ConditionStatus::from_k8s(&cond.status),
        cond.reason.clone().unwrap_or_default(),
        cond.message.clone().unwrap_or_default(),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "deployment_test.rs"]
mod tests;
