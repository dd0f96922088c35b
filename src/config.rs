//! Controller configuration read from the environment at startup

use std::time::Duration;

/// Namespace the controller and the activator run in
pub const DEFAULT_NAMESPACE: &str = "pylon-system";

/// Suffix appended to `<route>.<namespace>` when a route has no domain yet
pub const DEFAULT_DOMAIN_SUFFIX: &str = "example.com";

/// Gateway serving traffic from outside the cluster
pub const DEFAULT_INGRESS_GATEWAY: &str = "pylon-system/pylon-ingress-gateway";

/// Registries whose images are local builds and never carry a resolvable digest
pub const DEFAULT_REGISTRIES_SKIPPING_TAG_RESOLVING: &str = "ko.local,dev.local";

pub const DEFAULT_REGISTRY_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_HEALTH_PORT: u16 = 8080;

/// Names of cluster-wide networking objects routes point at
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkConfig {
    /// Namespace hosting the activator service
    pub system_namespace: String,
    pub ingress_gateway: String,
    pub domain_suffix: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            system_namespace: DEFAULT_NAMESPACE.to_string(),
            ingress_gateway: DEFAULT_INGRESS_GATEWAY.to_string(),
            domain_suffix: DEFAULT_DOMAIN_SUFFIX.to_string(),
        }
    }
}

/// Settings for image digest resolution
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryConfig {
    pub registries_skipping_tag_resolving: Vec<String>,
    /// PEM bundles trusted in addition to the system roots
    pub cert_files: Vec<String>,
    pub timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            registries_skipping_tag_resolving: split_list(
                DEFAULT_REGISTRIES_SKIPPING_TAG_RESOLVING,
            ),
            cert_files: Vec::new(),
            timeout: DEFAULT_REGISTRY_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    pub network: NetworkConfig,
    pub registry: RegistryConfig,
    pub health_port: u16,
}

impl ControllerConfig {
    /// Read `PYLON_*` environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary variable source
    ///
    /// Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let network = NetworkConfig {
            system_namespace: get("PYLON_NAMESPACE")
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            ingress_gateway: get("PYLON_INGRESS_GATEWAY")
                .unwrap_or_else(|| DEFAULT_INGRESS_GATEWAY.to_string()),
            domain_suffix: get("PYLON_DOMAIN_SUFFIX")
                .unwrap_or_else(|| DEFAULT_DOMAIN_SUFFIX.to_string()),
        };

        let registry = RegistryConfig {
            registries_skipping_tag_resolving: split_list(
                &get("PYLON_REGISTRIES_SKIPPING_TAG_RESOLVING")
                    .unwrap_or_else(|| DEFAULT_REGISTRIES_SKIPPING_TAG_RESOLVING.to_string()),
            ),
            cert_files: get("PYLON_REGISTRY_CERT_FILES")
                .map(|v| split_list(&v))
                .unwrap_or_default(),
            timeout: get("PYLON_REGISTRY_TIMEOUT_SECONDS")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_REGISTRY_TIMEOUT),
        };

        let health_port = get("PYLON_HEALTH_PORT")
            .and_then(|v| v.trim().parse::<u16>().ok())
            .unwrap_or(DEFAULT_HEALTH_PORT);

        ControllerConfig {
            network,
            registry,
            health_port,
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            network: NetworkConfig::default(),
            registry: RegistryConfig::default(),
            health_port: DEFAULT_HEALTH_PORT,
        }
    }
}

/// Split a comma separated list, dropping blanks
fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "config_test.rs"]
mod tests;
