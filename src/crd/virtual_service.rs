//! Istio VirtualService, the subset of fields the route controller writes
//!
//! Only typed here so the controller can server-side apply it; the CRD itself
//! is owned by the mesh installation and is not emitted by `gen-crd`.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Gateway name that binds a VirtualService to sidecar (in-cluster) traffic
pub const MESH_GATEWAY: &str = "mesh";

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "networking.istio.io",
    version = "v1alpha3",
    kind = "VirtualService",
    namespaced
)]
pub struct VirtualServiceSpec {
    #[serde(default)]
    pub gateways: Vec<String>,

    #[serde(default)]
    pub hosts: Vec<String>,

    #[serde(default)]
    pub http: Vec<HttpRoute>,
}

/// One routing rule
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpRoute {
    #[serde(rename = "match", default)]
    pub matches: Vec<HttpMatchRequest>,

    #[serde(default)]
    pub route: Vec<DestinationWeight>,

    /// Headers added to requests forwarded by this rule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub append_headers: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<HttpRetry>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct HttpMatchRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority: Option<StringMatch>,
}

impl HttpMatchRequest {
    /// Match requests whose authority is exactly `host`
    pub fn authority_exact(host: impl Into<String>) -> Self {
        HttpMatchRequest {
            authority: Some(StringMatch {
                exact: Some(host.into()),
            }),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct StringMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exact: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct DestinationWeight {
    pub destination: Destination,
    pub weight: i32,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct Destination {
    pub host: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<PortSelector>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct PortSelector {
    pub number: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpRetry {
    pub attempts: i32,
    pub per_try_timeout: String,
}
