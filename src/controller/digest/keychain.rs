//! Registry credentials
//!
//! Credentials come from image pull secrets, either listed on the revision
//! or attached to its service account. Without any, registries are
//! contacted anonymously.

use super::reference::DEFAULT_REGISTRY;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use kube::api::Api;
use kube::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// Secret type holding a `~/.docker/config.json`
pub const DOCKER_CONFIG_JSON_SECRET_TYPE: &str = "kubernetes.io/dockerconfigjson";
pub const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";

/// Secret type holding a legacy `~/.dockercfg`
pub const DOCKERCFG_SECRET_TYPE: &str = "kubernetes.io/dockercfg";
pub const DOCKERCFG_KEY: &str = ".dockercfg";

/// Service account used when a revision names none
pub const DEFAULT_SERVICE_ACCOUNT: &str = "default";

/// Docker Hub answers on several names; credentials stored under any of
/// them apply to all
const DOCKER_HUB_ALIASES: &[&str] = &["docker.io", "registry-1.docker.io", DEFAULT_REGISTRY];

#[derive(Debug, Error)]
pub enum KeychainError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("secret {secret} is malformed: {reason}")]
    MalformedSecret { secret: String, reason: String },
}

/// Where to look for pull secrets
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthOptions {
    pub namespace: String,
    /// Falls back to `default`
    pub service_account_name: Option<String>,
    pub image_pull_secrets: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Credential {
    #[default]
    Anonymous,
    Basic {
        username: String,
        password: String,
    },
    /// Registry token used as-is
    Bearer(String),
}

/// Source of credentials for a registry host
pub trait Keychain: Send + Sync {
    fn resolve(&self, registry: &str) -> Credential;
}

pub struct AnonymousKeychain;

impl Keychain for AnonymousKeychain {
    fn resolve(&self, _registry: &str) -> Credential {
        Credential::Anonymous
    }
}

#[derive(Deserialize)]
struct DockerConfigFile {
    #[serde(default)]
    auths: BTreeMap<String, DockerAuthEntry>,
}

#[derive(Deserialize, Default)]
struct DockerAuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default, rename = "registrytoken")]
    registry_token: Option<String>,
}

/// Credentials from docker config files, keyed by registry host
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DockerConfigKeychain {
    auths: BTreeMap<String, Credential>,
}

impl DockerConfigKeychain {
    /// Parse `{"auths": {"<registry>": {...}}}`
    pub fn from_docker_config_json(data: &[u8]) -> Result<Self, String> {
        let config: DockerConfigFile = serde_json::from_slice(data).map_err(|e| e.to_string())?;
        Self::from_entries(config.auths)
    }

    /// Parse the legacy `{"<registry>": {...}}` layout
    pub fn from_dockercfg(data: &[u8]) -> Result<Self, String> {
        let entries: BTreeMap<String, DockerAuthEntry> =
            serde_json::from_slice(data).map_err(|e| e.to_string())?;
        Self::from_entries(entries)
    }

    /// Read a pull secret; secrets of other types contribute nothing
    pub fn from_secret(secret: &Secret) -> Result<Self, KeychainError> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        let data = |key: &str| {
            secret
                .data
                .as_ref()
                .and_then(|d| d.get(key))
                .map(|bytes| bytes.0.as_slice())
        };

        let parsed = match secret.type_.as_deref() {
            Some(DOCKER_CONFIG_JSON_SECRET_TYPE) => data(DOCKER_CONFIG_JSON_KEY)
                .map(Self::from_docker_config_json)
                .transpose(),
            Some(DOCKERCFG_SECRET_TYPE) => data(DOCKERCFG_KEY).map(Self::from_dockercfg).transpose(),
            _ => Ok(None),
        };

        parsed
            .map(Option::unwrap_or_default)
            .map_err(|reason| KeychainError::MalformedSecret {
                secret: name,
                reason,
            })
    }

    /// Merge another keychain; entries already present win
    pub fn extend(&mut self, other: DockerConfigKeychain) {
        for (registry, credential) in other.auths {
            self.auths.entry(registry).or_insert(credential);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.auths.is_empty()
    }

    fn from_entries(entries: BTreeMap<String, DockerAuthEntry>) -> Result<Self, String> {
        let mut auths = BTreeMap::new();
        for (key, entry) in entries {
            let credential = entry_credential(&key, entry)?;
            auths.entry(normalize_registry(&key)).or_insert(credential);
        }
        Ok(DockerConfigKeychain { auths })
    }
}

impl Keychain for DockerConfigKeychain {
    fn resolve(&self, registry: &str) -> Credential {
        self.auths
            .get(&normalize_registry(registry))
            .cloned()
            .unwrap_or_default()
    }
}

fn entry_credential(key: &str, entry: DockerAuthEntry) -> Result<Credential, String> {
    if let Some(token) = entry.registry_token.filter(|t| !t.is_empty()) {
        return Ok(Credential::Bearer(token));
    }

    if let Some(auth) = entry.auth.filter(|a| !a.is_empty()) {
        let decoded = BASE64
            .decode(auth.trim())
            .map_err(|e| format!("auth for {} is not base64: {}", key, e))?;
        let decoded = String::from_utf8(decoded)
            .map_err(|_| format!("auth for {} is not UTF-8", key))?;
        let (username, password) = decoded
            .split_once(':')
            .ok_or_else(|| format!("auth for {} is not username:password", key))?;
        return Ok(Credential::Basic {
            username: username.to_string(),
            password: password.to_string(),
        });
    }

    match (entry.username, entry.password) {
        (Some(username), Some(password)) => Ok(Credential::Basic { username, password }),
        _ => Ok(Credential::Anonymous),
    }
}

/// Reduce a docker config key (`https://index.docker.io/v1/`, `gcr.io`) to a host
pub fn normalize_registry(key: &str) -> String {
    let without_scheme = key
        .strip_prefix("https://")
        .or_else(|| key.strip_prefix("http://"))
        .unwrap_or(key);
    let host = without_scheme
        .split('/')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();

    if DOCKER_HUB_ALIASES.contains(&host.as_str()) {
        DEFAULT_REGISTRY.to_string()
    } else {
        host
    }
}

/// Pull secrets of a service account plus explicitly listed ones
pub struct ServiceAccountKeychain {
    inner: DockerConfigKeychain,
}

impl ServiceAccountKeychain {
    /// Fetch the service account and every referenced pull secret
    ///
    /// Explicit pull secrets take precedence over the service account's.
    pub async fn load(client: &Client, options: &AuthOptions) -> Result<Self, KeychainError> {
        let service_accounts: Api<ServiceAccount> =
            Api::namespaced(client.clone(), &options.namespace);
        let secrets: Api<Secret> = Api::namespaced(client.clone(), &options.namespace);

        let account_name = options
            .service_account_name
            .as_deref()
            .unwrap_or(DEFAULT_SERVICE_ACCOUNT);
        let account = service_accounts.get(account_name).await?;

        let mut names = options.image_pull_secrets.clone();
        names.extend(
            account
                .image_pull_secrets
                .unwrap_or_default()
                .into_iter()
                .map(|r| r.name),
        );

        let mut inner = DockerConfigKeychain::default();
        for name in names.iter().filter(|n| !n.is_empty()) {
            let secret = secrets.get(name).await?;
            inner.extend(DockerConfigKeychain::from_secret(&secret)?);
        }

        debug!(
            namespace = %options.namespace,
            service_account = %account_name,
            secrets = names.len(),
            "Loaded registry credentials"
        );
        Ok(ServiceAccountKeychain { inner })
    }
}

impl Keychain for ServiceAccountKeychain {
    fn resolve(&self, registry: &str) -> Credential {
        self.inner.resolve(registry)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "keychain_test.rs"]
mod tests;
