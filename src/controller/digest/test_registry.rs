//! In-process registry serving one manifest, for resolver tests

use super::registry::{sha256_digest, DIGEST_HEADER, DOCKER_MANIFEST_V2};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const REPOSITORY: &str = "team/app";
pub const TOKEN: &str = "test-token";
pub const SERVICE: &str = "mock-registry";
pub const MANIFEST: &str = r#"{"schemaVersion":2,"mediaType":"application/vnd.docker.distribution.manifest.v2+json"}"#;

#[derive(Clone)]
pub enum AuthMode {
    Anonymous,
    /// Token endpoint; requires these basic credentials when set
    Bearer(Option<(String, String)>),
    Basic(String, String),
}

#[derive(Clone)]
struct RegistryState {
    auth: AuthMode,
    digest_header: bool,
    base_url: String,
    manifest_requests: Arc<AtomicUsize>,
}

pub struct MockRegistry {
    pub addr: SocketAddr,
    manifest_requests: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl MockRegistry {
    pub async fn start(auth: AuthMode, digest_header: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let manifest_requests = Arc::new(AtomicUsize::new(0));

        let state = RegistryState {
            auth,
            digest_header,
            base_url: format!("http://{}", addr),
            manifest_requests: manifest_requests.clone(),
        };
        let app = Router::new()
            .route(
                &format!("/v2/{}/manifests/{{reference}}", REPOSITORY),
                get(manifest),
            )
            .route("/token", get(token))
            .with_state(state);

        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        MockRegistry {
            addr,
            manifest_requests,
            handle,
        }
    }

    /// `<host:port>/team/app:<tag>`
    pub fn image(&self, tag: &str) -> String {
        format!("{}/{}:{}", self.addr, REPOSITORY, tag)
    }

    pub fn manifest_digest() -> String {
        sha256_digest(MANIFEST.as_bytes())
    }

    pub fn manifest_requests(&self) -> usize {
        self.manifest_requests.load(Ordering::SeqCst)
    }
}

impl Drop for MockRegistry {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn basic_header(username: &str, password: &str) -> String {
    format!(
        "Basic {}",
        BASE64.encode(format!("{}:{}", username, password))
    )
}

fn authorization(headers: &HeaderMap) -> &str {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

async fn manifest(
    State(state): State<RegistryState>,
    Path(reference): Path<String>,
    headers: HeaderMap,
) -> Response {
    state.manifest_requests.fetch_add(1, Ordering::SeqCst);

    let presented = authorization(&headers);
    let challenge = match &state.auth {
        AuthMode::Anonymous => None,
        AuthMode::Bearer(_) if presented == format!("Bearer {}", TOKEN) => None,
        AuthMode::Bearer(_) => Some(format!(
            r#"Bearer realm="{}/token",service="{}",scope="repository:{}:pull""#,
            state.base_url, SERVICE, REPOSITORY
        )),
        AuthMode::Basic(user, pass) if presented == basic_header(user, pass) => None,
        AuthMode::Basic(_, _) => Some(r#"Basic realm="mock""#.to_string()),
    };

    if let Some(challenge) = challenge {
        return (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, challenge)],
        )
            .into_response();
    }

    if reference == "missing" {
        return StatusCode::NOT_FOUND.into_response();
    }

    let mut response = (
        StatusCode::OK,
        [(header::CONTENT_TYPE, DOCKER_MANIFEST_V2)],
        MANIFEST,
    )
        .into_response();
    if state.digest_header {
        if let Ok(value) = MockRegistry::manifest_digest().parse() {
            response.headers_mut().insert(DIGEST_HEADER, value);
        }
    }
    response
}

async fn token(
    State(state): State<RegistryState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let expected_scope = format!("repository:{}:pull", REPOSITORY);
    if query.get("scope") != Some(&expected_scope) || query.get("service").map(String::as_str) != Some(SERVICE) {
        return StatusCode::BAD_REQUEST.into_response();
    }

    if let AuthMode::Bearer(Some((user, pass))) = &state.auth {
        if authorization(&headers) != basic_header(user, pass) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    axum::Json(serde_json::json!({ "token": TOKEN })).into_response()
}
