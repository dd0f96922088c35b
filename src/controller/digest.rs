//! Image tag to digest resolution
//!
//! A `DigestResolver` owns the registry trust store and the HTTP transport
//! built from it. `resolve` takes `&mut self`, so a resolver shared between
//! reconcile workers lives behind a `tokio::sync::Mutex`.

pub mod keychain;
pub mod reference;
pub mod registry;
pub mod trust;

#[cfg(test)]
pub(crate) mod test_registry;

use keychain::{AnonymousKeychain, Keychain, KeychainError, ServiceAccountKeychain};
use reference::{ImageReference, ReferenceError};
use registry::{RegistryClient, RegistryError};
use rustls::RootCertStore;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};
use trust::{TrustCache, TrustError, TrustUpdate};

pub use keychain::AuthOptions;
pub use trust::{KUBERNETES_CERT_BUNDLE, OPENSHIFT_CERT_BUNDLE};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid image reference: {0}")]
    InvalidReference(#[from] ReferenceError),

    #[error("failed to build registry credentials: {0}")]
    AuthError(#[from] KeychainError),

    #[error("registry unavailable: {0}")]
    RegistryUnavailable(#[from] RegistryError),

    #[error("failed to update registry trust store: {0}")]
    TrustStoreError(#[from] TrustError),
}

impl ResolveError {
    /// Short label for metrics
    pub fn metric_label(&self) -> &'static str {
        match self {
            ResolveError::InvalidReference(_) => "invalid_reference",
            ResolveError::AuthError(_) => "auth_error",
            ResolveError::RegistryUnavailable(_) => "registry_unavailable",
            ResolveError::TrustStoreError(_) => "trust_store_error",
        }
    }
}

/// Outcome of a successful resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// `<repository>@<digest>`, or the input when it already was one
    Resolved(String),
    /// The registry is on the skip list; keep the tag
    Skipped,
}

pub type SharedDigestResolver = Arc<Mutex<DigestResolver>>;

pub struct DigestResolver {
    /// Used to load pull secrets; anonymous access without one
    client: Option<kube::Client>,
    trust: TrustCache,
    http: Option<reqwest::Client>,
    timeout: Duration,
}

impl DigestResolver {
    pub fn new(client: Option<kube::Client>, timeout: Duration) -> Self {
        DigestResolver {
            client,
            trust: TrustCache::new(),
            http: None,
            timeout,
        }
    }

    pub fn shared(self) -> SharedDigestResolver {
        Arc::new(Mutex::new(self))
    }

    pub fn trust(&self) -> &TrustCache {
        &self.trust
    }

    /// Resolve `image` to a digest reference
    ///
    /// Digest references come back unchanged without any network access.
    /// Images from `registries_to_skip` come back as `Skipped`.
    pub async fn resolve(
        &mut self,
        image: &str,
        options: &AuthOptions,
        registries_to_skip: &[String],
        cert_files: &[String],
    ) -> Result<Resolution, ResolveError> {
        let reference = ImageReference::parse(image)?;
        if reference.is_digest() {
            return Ok(Resolution::Resolved(image.to_string()));
        }

        if registries_to_skip.contains(&reference.registry) {
            debug!(image = %image, registry = %reference.registry, "Registry skips tag resolution");
            return Ok(Resolution::Skipped);
        }

        let http = self.transport(cert_files)?;

        let keychain: Box<dyn Keychain> = match &self.client {
            Some(client) => Box::new(ServiceAccountKeychain::load(client, options).await?),
            None => Box::new(AnonymousKeychain),
        };
        let credential = keychain.resolve(&reference.registry);

        let digest = RegistryClient::new(&http)
            .manifest_digest(&reference, &credential)
            .await?;

        let resolved = format!("{}@{}", reference.repository_name(), digest);
        info!(image = %image, resolved = %resolved, "Resolved image digest");
        Ok(Resolution::Resolved(resolved))
    }

    /// Update the trust store and return a transport that uses it
    fn transport(&mut self, cert_files: &[String]) -> Result<reqwest::Client, ResolveError> {
        let update = self.trust.update(cert_files)?;

        if update == TrustUpdate::Unchanged {
            if let Some(http) = &self.http {
                return Ok(http.clone());
            }
        }

        // Cleared first so a failed build is retried on the next call
        self.http = None;
        let roots = self
            .trust
            .root_store()
            .cloned()
            .unwrap_or_else(RootCertStore::empty);
        let http = build_transport(roots, self.timeout)?;
        self.http = Some(http.clone());
        Ok(http)
    }
}

fn build_transport(roots: RootCertStore, timeout: Duration) -> Result<reqwest::Client, TrustError> {
    let tls = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| TrustError::Transport(e.to_string()))?
    .with_root_certificates(roots)
    .with_no_client_auth();

    reqwest::Client::builder()
        .use_preconfigured_tls(tls)
        .timeout(timeout)
        .build()
        .map_err(|e| TrustError::Transport(e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "digest_test.rs"]
mod tests;
