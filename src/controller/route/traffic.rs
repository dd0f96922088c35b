//! Traffic allocation: a route's traffic split plus revision activity in,
//! per-tag hosts, weighted destinations and request budgets out
//!
//! Everything here is pure. Inputs are assumed validated (see `validation`).

use super::domain::{default_tag_domains, service_hostname, tag_domain};
use crate::config::NetworkConfig;
use std::collections::{BTreeMap, BTreeSet};

/// Timeout applied when no active revision sets one
pub const DEFAULT_REVISION_TIMEOUT_SECONDS: i64 = 300;

/// Attempts made for each request before giving up
pub const DEFAULT_ROUTE_RETRY_ATTEMPTS: i32 = 3;

/// Port every revision and activator service listens on
pub const SERVICE_PORT: u32 = 80;

/// Service absorbing requests for scaled-to-zero revisions
pub const ACTIVATOR_SERVICE_NAME: &str = "activator-service";

pub const REVISION_HEADER: &str = "pylon-serving-revision";
pub const CONFIGURATION_HEADER: &str = "pylon-serving-configuration";
pub const NAMESPACE_HEADER: &str = "pylon-serving-namespace";

/// One weighted pointer at a revision within a traffic split
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RevisionTarget {
    pub revision_name: String,
    pub configuration_name: String,
    /// Share of the tag's traffic, 0-100
    pub percent: i32,
    /// Whether the revision has running pods to serve from
    pub active: bool,
    pub timeout_seconds: Option<i64>,
}

/// Targets grouped by tag, "" being the default split
///
/// Iterates in tag order, so the default split comes first.
pub type TrafficConfig = BTreeMap<String, Vec<RevisionTarget>>;

/// The route being reconciled, fixed for one pass
#[derive(Debug, Clone, PartialEq)]
pub struct RouteIdentity {
    pub name: String,
    pub namespace: String,
    /// External domain resolved for the route
    pub domain: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeightedDestination {
    pub host: String,
    pub port: u32,
    pub weight: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub attempts: i32,
    pub per_try_timeout: String,
}

/// Routing decided for one tag
#[derive(Debug, Clone, PartialEq)]
pub struct TagRouting {
    pub tag: String,
    /// Hosts matched by this tag's rule, in match order
    pub domains: Vec<String>,
    pub destinations: Vec<WeightedDestination>,
    /// Identifies the revision the activator should wake, when traffic goes through it
    pub headers: Option<BTreeMap<String, String>>,
    pub timeout: String,
    pub retries: RetryPolicy,
}

/// Hosts a tag answers on
pub fn domains_for_tag(tag: &str, identity: &RouteIdentity) -> Vec<String> {
    if tag.is_empty() {
        default_tag_domains(&identity.name, &identity.namespace, &identity.domain)
    } else {
        vec![tag_domain(tag, &identity.domain)]
    }
}

/// Deduplicated union of every tag's domains, sorted
pub fn route_hosts(traffic: &TrafficConfig, identity: &RouteIdentity) -> Vec<String> {
    traffic
        .keys()
        .flat_map(|tag| domains_for_tag(tag, identity))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Host of the activator service in the controller's namespace
pub fn activator_host(network: &NetworkConfig) -> String {
    service_hostname(ACTIVATOR_SERVICE_NAME, &network.system_namespace)
}

/// Host of a revision's own service
pub fn revision_host(revision_name: &str, namespace: &str) -> String {
    service_hostname(&format!("{}-service", revision_name), namespace)
}

pub fn format_seconds(seconds: i64) -> String {
    format!("{}s", seconds)
}

/// Routing for a single tag
///
/// Zero-percent targets are ignored. Active targets get their own
/// destination; all inactive ones share a single activator destination at
/// weight 100, labelled with the first inactive target's identity.
pub fn allocate_tag(
    tag: &str,
    targets: &[RevisionTarget],
    identity: &RouteIdentity,
    network: &NetworkConfig,
) -> TagRouting {
    let mut destinations = Vec::new();
    let mut first_inactive: Option<&RevisionTarget> = None;
    let mut max_timeout: Option<i64> = None;

    for target in targets.iter().filter(|t| t.percent > 0) {
        if target.active {
            destinations.push(WeightedDestination {
                host: revision_host(&target.revision_name, &identity.namespace),
                port: SERVICE_PORT,
                weight: target.percent,
            });

            if let Some(timeout) = target.timeout_seconds.filter(|t| *t > 0) {
                max_timeout = Some(max_timeout.map_or(timeout, |m| m.max(timeout)));
            }
        } else if first_inactive.is_none() {
            first_inactive = Some(target);
        }
    }

    let headers = first_inactive.map(|target| {
        destinations.push(WeightedDestination {
            host: activator_host(network),
            port: SERVICE_PORT,
            weight: 100,
        });

        BTreeMap::from([
            (REVISION_HEADER.to_string(), target.revision_name.clone()),
            (
                CONFIGURATION_HEADER.to_string(),
                target.configuration_name.clone(),
            ),
            (NAMESPACE_HEADER.to_string(), identity.namespace.clone()),
        ])
    });

    let timeout = format_seconds(max_timeout.unwrap_or(DEFAULT_REVISION_TIMEOUT_SECONDS));

    TagRouting {
        tag: tag.to_string(),
        domains: domains_for_tag(tag, identity),
        destinations,
        headers,
        retries: RetryPolicy {
            attempts: DEFAULT_ROUTE_RETRY_ATTEMPTS,
            per_try_timeout: timeout.clone(),
        },
        timeout,
    }
}

/// Routing for every tag, in tag order
pub fn allocate(
    traffic: &TrafficConfig,
    identity: &RouteIdentity,
    network: &NetworkConfig,
) -> Vec<TagRouting> {
    traffic
        .iter()
        .map(|(tag, targets)| allocate_tag(tag, targets, identity, network))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "traffic_test.rs"]
mod tests;
