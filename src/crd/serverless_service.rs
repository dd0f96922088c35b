//! ServerlessService: the network-side view of a revision
//!
//! In `Serve` mode the revision's own endpoints back the service. In `Proxy`
//! mode (scaled to zero) the activator's endpoints do. The mode decides which
//! single condition the Ready rollup depends on, and is fixed when the status
//! is constructed.

use crate::controller::conditions::{Condition, ConditionManager, ConditionSet, ConditionStatus};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "networking.pylon.dev",
    version = "v1alpha1",
    kind = "ServerlessService",
    shortname = "sks",
    namespaced,
    status = "ServerlessServiceStatus",
    printcolumn = r#"{"name":"Mode", "type":"string", "jsonPath":".spec.mode"}"#,
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#
)]
pub struct ServerlessServiceSpec {
    /// Who backs the service right now
    #[serde(default)]
    pub mode: ServerlessServiceMode,

    /// Name of the Deployment whose pods back the service in Serve mode
    #[serde(rename = "objectRef")]
    pub object_ref: String,
}

/// Operating mode of a ServerlessService
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum ServerlessServiceMode {
    /// Revision pods receive traffic directly
    #[default]
    Serve,
    /// Traffic goes through the activator
    Proxy,
}

impl ServerlessServiceMode {
    pub fn condition_set(self) -> ConditionSet<SksConditionType> {
        match self {
            ServerlessServiceMode::Serve => SKS_ENDPOINTS_CONDITIONS,
            ServerlessServiceMode::Proxy => SKS_ACTIVATOR_CONDITIONS,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum SksConditionType {
    Ready,
    EndpointsPopulated,
    ActivatorEndpointsPopulated,
}

pub const SKS_ENDPOINTS_CONDITIONS: ConditionSet<SksConditionType> =
    ConditionSet::new(SksConditionType::Ready, &[SksConditionType::EndpointsPopulated]);

pub const SKS_ACTIVATOR_CONDITIONS: ConditionSet<SksConditionType> = ConditionSet::new(
    SksConditionType::Ready,
    &[SksConditionType::ActivatorEndpointsPopulated],
);

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ServerlessServiceStatus {
    /// Mode the conditions below were computed for
    ///
    /// Fixed by `new`; a mode change means a new status.
    #[serde(default)]
    mode: ServerlessServiceMode,

    /// Public service fronting the revision
    #[serde(rename = "serviceName", skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,

    /// Service selecting the revision pods directly
    #[serde(rename = "privateServiceName", skip_serializing_if = "Option::is_none")]
    pub private_service_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition<SksConditionType>>,
}

impl ServerlessServiceStatus {
    /// New status for the given mode with every condition Unknown
    pub fn new(mode: ServerlessServiceMode) -> Self {
        let mut status = ServerlessServiceStatus {
            mode,
            ..Default::default()
        };
        status.initialize_conditions();
        status
    }

    pub fn mode(&self) -> ServerlessServiceMode {
        self.mode
    }

    /// The condition set bound to this status's mode
    pub fn condition_set(&self) -> ConditionSet<SksConditionType> {
        self.mode.condition_set()
    }

    fn manage(&mut self) -> ConditionManager<'_, SksConditionType> {
        self.mode.condition_set().manage(&mut self.conditions)
    }

    pub fn initialize_conditions(&mut self) {
        self.manage().initialize();
    }

    pub fn get_condition(&self, type_: SksConditionType) -> Option<&Condition<SksConditionType>> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    pub fn mark_endpoints_ready(&mut self) {
        self.manage()
            .mark_true(SksConditionType::EndpointsPopulated);
    }

    /// The Kubernetes Service exists but belongs to someone else
    pub fn mark_endpoints_not_owned(&mut self, kind: &str, name: &str) {
        self.manage().mark_false(
            SksConditionType::EndpointsPopulated,
            "NotOwned",
            format!("Resource {} of type {} is not owned by SKS", name, kind),
        );
    }

    pub fn mark_endpoints_not_ready(&mut self, reason: &str) {
        self.manage().mark_unknown(
            SksConditionType::EndpointsPopulated,
            reason,
            "K8s Service is not ready",
        );
    }

    pub fn mark_activator_endpoints_populated(&mut self) {
        self.manage().set_condition(Condition::new(
            SksConditionType::ActivatorEndpointsPopulated,
            ConditionStatus::True,
            "ActivatorEndpointsPopulated",
            "Revision is backed by Activator",
        ));
    }

    pub fn mark_activator_endpoints_removed(&mut self) {
        self.manage().set_condition(Condition::new(
            SksConditionType::ActivatorEndpointsPopulated,
            ConditionStatus::False,
            "ActivatorEndpointsPopulated",
            "Revision is backed by Activator",
        ));
    }

    pub fn is_ready(&self) -> bool {
        self.condition_set().is_happy(&self.conditions)
    }

    pub fn endpoints_populated(&self) -> bool {
        self.get_condition(SksConditionType::EndpointsPopulated)
            .map(Condition::is_true)
            .unwrap_or(false)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "serverless_service_test.rs"]
mod tests;
