use crate::controller::conditions::{Condition, ConditionSet};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Route is a Custom Resource describing how traffic is split across revisions
///
/// The controller turns the traffic block into a mesh VirtualService.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "serving.pylon.dev",
    version = "v1beta1",
    kind = "Route",
    namespaced,
    status = "RouteStatus",
    printcolumn = r#"{"name":"Domain", "type":"string", "jsonPath":".status.domain"}"#,
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct RouteSpec {
    /// Traffic split across revisions
    #[serde(default)]
    pub traffic: Vec<TrafficTarget>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct TrafficTarget {
    /// Optional tag; a tagged target is also addressable at `<tag>.<domain>`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    /// Name of the Revision receiving traffic
    #[serde(rename = "revisionName")]
    pub revision_name: String,

    /// Share of the default split routed to this revision (0-100)
    #[serde(default)]
    pub percent: i32,
}

/// Condition types tracked on a Route
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum RouteConditionType {
    Ready,
    /// Every referenced revision exists
    AllTrafficAssigned,
    /// The VirtualService has been written
    IngressReady,
}

pub const ROUTE_CONDITIONS: ConditionSet<RouteConditionType> = ConditionSet::new(
    RouteConditionType::Ready,
    &[
        RouteConditionType::AllTrafficAssigned,
        RouteConditionType::IngressReady,
    ],
);

/// Status of the Route
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct RouteStatus {
    /// External domain the default traffic split is served on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    #[serde(rename = "observedGeneration", skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition<RouteConditionType>>,
}

impl RouteStatus {
    pub fn is_ready(&self) -> bool {
        ROUTE_CONDITIONS.is_happy(&self.conditions)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "route_test.rs"]
mod tests;
