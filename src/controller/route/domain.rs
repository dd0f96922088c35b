use crate::config::NetworkConfig;
use crate::crd::route::Route;
use kube::ResourceExt;

/// Suffix of fully qualified in-cluster service names
pub const CLUSTER_DOMAIN: &str = "svc.cluster.local";

/// External domain for a route
///
/// A domain already recorded in status wins, so a route keeps its address
/// when the suffix configuration changes.
pub fn route_domain(route: &Route, network: &NetworkConfig) -> String {
    if let Some(domain) = route.status.as_ref().and_then(|s| s.domain.as_ref()) {
        if !domain.is_empty() {
            return domain.clone();
        }
    }

    format!(
        "{}.{}.{}",
        route.name_any(),
        route.namespace().unwrap_or_default(),
        network.domain_suffix
    )
}

/// Every name the default traffic split answers on
///
/// External domain first, then in-cluster names from most to least qualified.
pub fn default_tag_domains(name: &str, namespace: &str, domain: &str) -> Vec<String> {
    vec![
        domain.to_string(),
        format!("{}.{}.{}", name, namespace, CLUSTER_DOMAIN),
        format!("{}.{}.svc", name, namespace),
        format!("{}.{}", name, namespace),
        name.to_string(),
    ]
}

/// Host a named tag is addressable on
pub fn tag_domain(tag: &str, domain: &str) -> String {
    format!("{}.{}", tag, domain)
}

/// Fully qualified name of a service in the cluster
pub fn service_hostname(service: &str, namespace: &str) -> String {
    format!("{}.{}.{}", service, namespace, CLUSTER_DOMAIN)
}
