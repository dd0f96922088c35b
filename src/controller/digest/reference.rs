//! Container image references
//!
//! Accepts the short forms people write in manifests (`busybox`,
//! `gcr.io/p/app:v1`, `localhost:5000/app@sha256:...`) and fills in the
//! Docker Hub defaults.

use std::fmt;
use thiserror::Error;

/// Registry assumed when a reference names none
pub const DEFAULT_REGISTRY: &str = "index.docker.io";

/// Tag assumed when a reference carries neither tag nor digest
pub const DEFAULT_TAG: &str = "latest";

const DIGEST_ALGORITHM: &str = "sha256";
const DIGEST_HEX_LEN: usize = 64;
const MAX_TAG_LEN: usize = 128;

#[derive(Debug, Error, PartialEq)]
#[error("invalid image reference {reference:?}: {reason}")]
pub struct ReferenceError {
    pub reference: String,
    pub reason: String,
}

impl ReferenceError {
    fn new(reference: &str, reason: impl Into<String>) -> Self {
        ReferenceError {
            reference: reference.to_string(),
            reason: reason.into(),
        }
    }
}

/// Tag or content digest an image reference points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    Tag(String),
    Digest(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry host, with port when given
    pub registry: String,
    /// Repository path within the registry
    pub repository: String,
    pub identifier: Identifier,
}

impl ImageReference {
    pub fn parse(reference: &str) -> Result<Self, ReferenceError> {
        if reference.is_empty() {
            return Err(ReferenceError::new(reference, "empty reference"));
        }

        let (name, identifier) = match reference.split_once('@') {
            Some((name, digest)) => {
                validate_digest(digest).map_err(|reason| ReferenceError::new(reference, reason))?;
                // A tag next to a digest is informational only
                let name = split_tag(name).0;
                (name, Identifier::Digest(digest.to_string()))
            }
            None => {
                let (name, tag) = split_tag(reference);
                let tag = tag.unwrap_or(DEFAULT_TAG);
                validate_tag(tag).map_err(|reason| ReferenceError::new(reference, reason))?;
                (name, Identifier::Tag(tag.to_string()))
            }
        };

        let (registry, repository) = split_registry(name);
        validate_registry(&registry).map_err(|reason| ReferenceError::new(reference, reason))?;
        validate_repository(&repository)
            .map_err(|reason| ReferenceError::new(reference, reason))?;

        Ok(ImageReference {
            registry,
            repository,
            identifier,
        })
    }

    pub fn is_digest(&self) -> bool {
        matches!(self.identifier, Identifier::Digest(_))
    }

    /// `<registry>/<repository>`
    pub fn repository_name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// Tag or digest, as used in a manifest URL
    pub fn identifier(&self) -> &str {
        match &self.identifier {
            Identifier::Tag(tag) => tag,
            Identifier::Digest(digest) => digest,
        }
    }

    /// Local and development registries are spoken to over plain HTTP
    pub fn scheme(&self) -> &'static str {
        let host = self
            .registry
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or(&self.registry);

        if host == "localhost" || host == "127.0.0.1" || host.ends_with(".local") {
            "http"
        } else {
            "https"
        }
    }

    /// Base URL of the registry API
    pub fn registry_url(&self) -> String {
        format!("{}://{}", self.scheme(), self.registry)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.identifier {
            Identifier::Tag(tag) => write!(f, "{}:{}", self.repository_name(), tag),
            Identifier::Digest(digest) => write!(f, "{}@{}", self.repository_name(), digest),
        }
    }
}

/// Split `name[:tag]`; a colon before the last '/' belongs to a registry port
fn split_tag(name: &str) -> (&str, Option<&str>) {
    match name.rfind(':') {
        Some(colon) if !name[colon..].contains('/') => (&name[..colon], Some(&name[colon + 1..])),
        _ => (name, None),
    }
}

fn split_registry(name: &str) -> (String, String) {
    match name.split_once('/') {
        Some((first, rest))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            (first.to_string(), rest.to_string())
        }
        _ if !name.contains('/') => (DEFAULT_REGISTRY.to_string(), format!("library/{}", name)),
        _ => (DEFAULT_REGISTRY.to_string(), name.to_string()),
    }
}

fn validate_digest(digest: &str) -> Result<(), String> {
    let hex = digest
        .strip_prefix(DIGEST_ALGORITHM)
        .and_then(|rest| rest.strip_prefix(':'))
        .ok_or_else(|| format!("digest must start with {}:", DIGEST_ALGORITHM))?;

    if hex.len() != DIGEST_HEX_LEN
        || !hex
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        return Err(format!(
            "digest must be {} lowercase hex characters",
            DIGEST_HEX_LEN
        ));
    }
    Ok(())
}

fn validate_tag(tag: &str) -> Result<(), String> {
    let valid_char = |b: u8| b.is_ascii_alphanumeric() || b == b'_' || b == b'.' || b == b'-';
    let first_ok = tag
        .bytes()
        .next()
        .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_');

    if !first_ok || tag.len() > MAX_TAG_LEN || !tag.bytes().all(valid_char) {
        return Err(format!("invalid tag {:?}", tag));
    }
    Ok(())
}

fn validate_registry(registry: &str) -> Result<(), String> {
    let valid = !registry.is_empty()
        && registry
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-' || b == b':');
    if valid {
        Ok(())
    } else {
        Err(format!("invalid registry {:?}", registry))
    }
}

fn validate_repository(repository: &str) -> Result<(), String> {
    let component_ok = |c: &str| {
        !c.is_empty()
            && c.bytes().all(|b| {
                b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'.' || b == b'_' || b == b'-'
            })
    };

    if repository.is_empty() || !repository.split('/').all(component_ok) {
        return Err(format!("invalid repository {:?}", repository));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "reference_test.rs"]
mod tests;
