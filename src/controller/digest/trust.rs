//! Incrementally maintained TLS trust store for registry connections
//!
//! The store starts from the operating system's roots (the bundled web PKI
//! roots when the OS offers none) and adds the PEM bundles
//! callers ask for. Repeating the same set is free, growing it only parses
//! the new files, and dropping a path throws the store away and rebuilds it.

use rustls::pki_types::CertificateDer;
use rustls::RootCertStore;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::BufReader;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{debug, warn};

/// CA bundle mounted into every pod with a service account
pub const KUBERNETES_CERT_BUNDLE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

/// Service CA bundle injected on OpenShift
pub const OPENSHIFT_CERT_BUNDLE: &str =
    "/var/run/secrets/kubernetes.io/serviceaccount/service-ca.crt";

#[derive(Debug, Error)]
pub enum TrustError {
    #[error("failed to read certificate bundle {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificates found in {0}")]
    Empty(String),

    #[error("invalid certificate in {path}: {reason}")]
    Invalid { path: String, reason: String },

    #[error("failed to build TLS transport: {0}")]
    Transport(String),
}

/// What an update did to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustUpdate {
    Unchanged,
    /// Number of bundles appended
    Appended(usize),
    Rebuilt,
}

#[derive(Debug, Default)]
pub struct TrustCache {
    cached: BTreeSet<String>,
    roots: Option<RootCertStore>,
    rebuilds: u64,
    appends: u64,
}

impl TrustCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bring the store in line with `cert_files`
    ///
    /// Every file involved is read and parsed before the store is touched,
    /// so on error the previous store and path set remain in effect.
    pub fn update(&mut self, cert_files: &[String]) -> Result<TrustUpdate, TrustError> {
        let requested: BTreeSet<String> = cert_files.iter().cloned().collect();

        let removed = self.cached.iter().any(|path| !requested.contains(path));

        if removed || self.roots.is_none() {
            return self.rebuild(requested);
        }

        let added: BTreeSet<String> = requested.difference(&self.cached).cloned().collect();
        if added.is_empty() {
            return Ok(TrustUpdate::Unchanged);
        }

        let mut grown = self.roots.clone().unwrap_or_else(system_roots);
        add_bundles(&mut grown, &added)?;

        debug!(bundles = added.len(), "Appended to registry trust store");
        let count = added.len();
        self.roots = Some(grown);
        self.cached.extend(added);
        self.appends += count as u64;
        Ok(TrustUpdate::Appended(count))
    }

    fn rebuild(&mut self, requested: BTreeSet<String>) -> Result<TrustUpdate, TrustError> {
        let mut roots = system_roots();
        add_bundles(&mut roots, &requested)?;

        debug!(bundles = requested.len(), "Rebuilt registry trust store");
        self.roots = Some(roots);
        self.cached = requested;
        self.rebuilds += 1;
        Ok(TrustUpdate::Rebuilt)
    }

    /// Current store, None before the first successful update
    pub fn root_store(&self) -> Option<&RootCertStore> {
        self.roots.as_ref()
    }

    pub fn cached_paths(&self) -> impl Iterator<Item = &str> {
        self.cached.iter().map(String::as_str)
    }

    /// Times the store was built from scratch
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    /// Bundles appended to an existing store
    pub fn appends(&self) -> u64 {
        self.appends
    }
}

/// Roots every store starts from, loaded once per process
pub fn system_roots() -> RootCertStore {
    static SYSTEM_ROOTS: OnceLock<RootCertStore> = OnceLock::new();
    SYSTEM_ROOTS.get_or_init(load_system_roots).clone()
}

fn load_system_roots() -> RootCertStore {
    let native = rustls_native_certs::load_native_certs();
    for error in &native.errors {
        warn!(error = %error, "Failed to load some native root certificates");
    }

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    debug!(added = added, ignored = ignored, "Loaded native root certificates");

    if roots.is_empty() {
        warn!("No native root certificates found, using bundled web PKI roots");
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }
    roots
}

fn add_bundles(roots: &mut RootCertStore, paths: &BTreeSet<String>) -> Result<(), TrustError> {
    for path in paths {
        for cert in read_bundle(path)? {
            roots.add(cert).map_err(|e| TrustError::Invalid {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        }
    }
    Ok(())
}

/// Parse every certificate in a PEM bundle
pub fn read_bundle(path: &str) -> Result<Vec<CertificateDer<'static>>, TrustError> {
    let file = File::open(path).map_err(|source| TrustError::Read {
        path: path.to_string(),
        source,
    })?;

    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TrustError::Read {
            path: path.to_string(),
            source,
        })?;

    if certs.is_empty() {
        return Err(TrustError::Empty(path.to_string()));
    }
    Ok(certs)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "trust_test.rs"]
mod tests;
