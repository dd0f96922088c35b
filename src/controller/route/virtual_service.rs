use super::traffic::{allocate, route_hosts, RouteIdentity, TagRouting, TrafficConfig};
use crate::config::NetworkConfig;
use crate::crd::route::Route;
use crate::crd::virtual_service::{
    Destination, DestinationWeight, HttpMatchRequest, HttpRetry, HttpRoute, PortSelector,
    VirtualService, VirtualServiceSpec, MESH_GATEWAY,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};

/// Render the VirtualService carrying a route's traffic
///
/// Name, namespace and labels are the route's; the route is the controlling owner.
pub fn build_virtual_service(
    route: &Route,
    identity: &RouteIdentity,
    traffic: &TrafficConfig,
    network: &NetworkConfig,
) -> VirtualService {
    let metadata = ObjectMeta {
        name: Some(identity.name.clone()),
        namespace: Some(identity.namespace.clone()),
        labels: Some(route.labels().clone()).filter(|l| !l.is_empty()),
        owner_references: route.controller_owner_ref(&()).map(|o| vec![o]),
        ..Default::default()
    };

    VirtualService {
        metadata,
        spec: build_virtual_service_spec(identity, traffic, network),
    }
}

/// Gateways, hosts and one HTTP rule per tag
pub fn build_virtual_service_spec(
    identity: &RouteIdentity,
    traffic: &TrafficConfig,
    network: &NetworkConfig,
) -> VirtualServiceSpec {
    VirtualServiceSpec {
        gateways: vec![network.ingress_gateway.clone(), MESH_GATEWAY.to_string()],
        hosts: route_hosts(traffic, identity),
        http: allocate(traffic, identity, network)
            .into_iter()
            .map(http_route)
            .collect(),
    }
}

fn http_route(routing: TagRouting) -> HttpRoute {
    HttpRoute {
        matches: routing
            .domains
            .into_iter()
            .map(HttpMatchRequest::authority_exact)
            .collect(),
        route: routing
            .destinations
            .into_iter()
            .map(|d| DestinationWeight {
                destination: Destination {
                    host: d.host,
                    port: Some(PortSelector { number: d.port }),
                },
                weight: d.weight,
            })
            .collect(),
        append_headers: routing.headers,
        timeout: Some(routing.timeout),
        retries: Some(HttpRetry {
            attempts: routing.retries.attempts,
            per_try_timeout: routing.retries.per_try_timeout,
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "virtual_service_test.rs"]
mod tests;
