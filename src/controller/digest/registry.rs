//! Manifest digest lookup over the registry HTTP API

use super::keychain::Credential;
use super::reference::ImageReference;
use reqwest::header::{HeaderMap, ACCEPT, WWW_AUTHENTICATE};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

pub const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_LIST_V2: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const OCI_MANIFEST_V1: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_INDEX_V1: &str = "application/vnd.oci.image.index.v1+json";

/// Response header carrying the manifest digest
pub const DIGEST_HEADER: &str = "Docker-Content-Digest";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned {status}")]
    Status { url: String, status: StatusCode },

    #[error("unsupported authentication challenge: {0}")]
    Challenge(String),
}

/// A parsed `WWW-Authenticate` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// Lowercased scheme, "bearer" or "basic"
    pub scheme: String,
    pub params: BTreeMap<String, String>,
}

/// Parse `Bearer realm="...",service="...",scope="..."`
pub fn parse_challenge(header: &str) -> Option<Challenge> {
    let header = header.trim();
    let (scheme, rest) = header.split_once(' ').unwrap_or((header, ""));
    if scheme.is_empty() {
        return None;
    }

    let mut params = BTreeMap::new();
    let mut chars = rest.chars().peekable();
    loop {
        while chars.peek().is_some_and(|c| *c == ',' || c.is_whitespace()) {
            chars.next();
        }

        let key: String = chars.by_ref().take_while(|c| *c != '=').collect();
        if key.is_empty() {
            break;
        }

        let value = if chars.peek() == Some(&'"') {
            chars.next();
            let mut value = String::new();
            while let Some(c) = chars.next() {
                match c {
                    '"' => break,
                    '\\' => value.extend(chars.next()),
                    _ => value.push(c),
                }
            }
            value
        } else {
            chars.by_ref().take_while(|c| *c != ',').collect()
        };

        params.insert(key.trim().to_ascii_lowercase(), value);
    }

    Some(Challenge {
        scheme: scheme.to_ascii_lowercase(),
        params,
    })
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
enum Authorization {
    None,
    Basic { username: String, password: String },
    Bearer(String),
}

impl Authorization {
    fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Authorization::None => request,
            Authorization::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
            Authorization::Bearer(token) => request.bearer_auth(token),
        }
    }
}

/// Talks to registries on behalf of one resolution
pub struct RegistryClient<'a> {
    http: &'a reqwest::Client,
}

impl<'a> RegistryClient<'a> {
    pub fn new(http: &'a reqwest::Client) -> Self {
        RegistryClient { http }
    }

    /// Digest of the manifest `reference` points at
    ///
    /// Tries anonymously (or with a stored registry token) first and answers
    /// a single 401 challenge with `credential`.
    pub async fn manifest_digest(
        &self,
        reference: &ImageReference,
        credential: &Credential,
    ) -> Result<String, RegistryError> {
        let url = manifest_url(reference);

        let mut auth = match credential {
            Credential::Bearer(token) => Authorization::Bearer(token.clone()),
            _ => Authorization::None,
        };

        let mut response = self.send(Method::HEAD, &url, &auth).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            auth = self
                .answer_challenge(response.headers(), reference, credential)
                .await?;
            response = self.send(Method::HEAD, &url, &auth).await?;
        }

        check_status(&url, &response)?;

        if let Some(digest) = response
            .headers()
            .get(DIGEST_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
        {
            return Ok(digest.to_string());
        }

        debug!(url = %url, "No digest header, hashing manifest body");
        let response = self.send(Method::GET, &url, &auth).await?;
        check_status(&url, &response)?;
        let body = response
            .bytes()
            .await
            .map_err(|source| RegistryError::Transport {
                url: url.clone(),
                source,
            })?;

        Ok(sha256_digest(&body))
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        auth: &Authorization,
    ) -> Result<Response, RegistryError> {
        let request = self
            .http
            .request(method, url)
            .header(ACCEPT, accept_header());

        auth.apply(request)
            .send()
            .await
            .map_err(|source| RegistryError::Transport {
                url: url.to_string(),
                source,
            })
    }

    async fn answer_challenge(
        &self,
        headers: &HeaderMap,
        reference: &ImageReference,
        credential: &Credential,
    ) -> Result<Authorization, RegistryError> {
        let header = headers
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let challenge = parse_challenge(header)
            .ok_or_else(|| RegistryError::Challenge("missing WWW-Authenticate".to_string()))?;

        match challenge.scheme.as_str() {
            "basic" => Ok(basic_authorization(credential)),
            "bearer" => {
                let token = self.fetch_token(&challenge, reference, credential).await?;
                Ok(Authorization::Bearer(token))
            }
            other => Err(RegistryError::Challenge(other.to_string())),
        }
    }

    async fn fetch_token(
        &self,
        challenge: &Challenge,
        reference: &ImageReference,
        credential: &Credential,
    ) -> Result<String, RegistryError> {
        let realm = challenge
            .params
            .get("realm")
            .ok_or_else(|| RegistryError::Challenge("bearer challenge without realm".to_string()))?;

        let scope = format!("repository:{}:pull", reference.repository);
        let mut query = vec![("scope", scope.as_str())];
        if let Some(service) = challenge.params.get("service") {
            query.push(("service", service.as_str()));
        }

        let request = self.http.get(realm).query(&query);
        let response = basic_authorization(credential)
            .apply(request)
            .send()
            .await
            .map_err(|source| RegistryError::Transport {
                url: realm.clone(),
                source,
            })?;
        check_status(realm, &response)?;

        let body: TokenResponse =
            response
                .json()
                .await
                .map_err(|source| RegistryError::Transport {
                    url: realm.clone(),
                    source,
                })?;

        body.token
            .or(body.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RegistryError::Challenge(format!("{} returned no token", realm)))
    }
}

fn basic_authorization(credential: &Credential) -> Authorization {
    match credential {
        Credential::Basic { username, password } => Authorization::Basic {
            username: username.clone(),
            password: password.clone(),
        },
        _ => Authorization::None,
    }
}

fn check_status(url: &str, response: &Response) -> Result<(), RegistryError> {
    if response.status().is_success() {
        Ok(())
    } else {
        Err(RegistryError::Status {
            url: url.to_string(),
            status: response.status(),
        })
    }
}

fn accept_header() -> String {
    [
        DOCKER_MANIFEST_V2,
        DOCKER_MANIFEST_LIST_V2,
        OCI_MANIFEST_V1,
        OCI_INDEX_V1,
    ]
    .join(", ")
}

pub fn manifest_url(reference: &ImageReference) -> String {
    format!(
        "{}/v2/{}/manifests/{}",
        reference.registry_url(),
        reference.repository,
        reference.identifier()
    )
}

/// `sha256:<hex>` of a manifest body
pub fn sha256_digest(body: &[u8]) -> String {
    let hash = Sha256::digest(body);
    let hex: String = hash.iter().map(|b| format!("{:02x}", b)).collect();
    format!("sha256:{}", hex)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "registry_test.rs"]
mod tests;
