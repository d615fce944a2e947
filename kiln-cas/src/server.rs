//! HTTP server exposing the blob store: `GET/HEAD/PUT/DELETE /artifacts/{hash}`,
//! plus `/health` and `/metrics`. Optional bearer-token auth guards every
//! route except `/health`; optional per-IP rate limiting sits in front of
//! everything else via `kiln-resilience`.

use crate::store::{BlobStore, StoreError};
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, head, put};
use axum::{Json, Router};
use kiln_hash::Digest;
use kiln_resilience::HierarchicalLimiter;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;

pub struct ServerConfig {
    pub bearer_token: Option<String>,
    pub limiter: Option<Arc<HierarchicalLimiter>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bearer_token: None, limiter: None }
    }
}

struct AppState {
    store: Arc<BlobStore>,
    config: ServerConfig,
    started_at: Instant,
}

pub fn build_router(store: Arc<BlobStore>, config: ServerConfig) -> Router {
    let state = Arc::new(AppState { store, config, started_at: Instant::now() });
    Router::new()
        .route("/artifacts/{hash}", get(get_artifact).head(head_artifact).put(put_artifact).delete(delete_artifact))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn parse_digest(hash: &str) -> Result<Digest, Response> {
    Digest::from_hex(hash).map_err(|_| (StatusCode::BAD_REQUEST, "malformed digest").into_response())
}

fn authorized(state: &AppState, headers: &HeaderMap) -> bool {
    match &state.config.bearer_token {
        None => true,
        Some(expected) => headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|got| got == expected)
            .unwrap_or(false),
    }
}

fn rate_limited(state: &AppState, addr: SocketAddr, token: Option<&str>) -> bool {
    match &state.config.limiter {
        Some(limiter) => !limiter.admit(addr.ip(), token, 1),
        None => false,
    }
}

async fn get_artifact(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(hash): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if rate_limited(&state, addr, None) {
        return too_many_requests();
    }
    let digest = match parse_digest(&hash) {
        Ok(d) => d,
        Err(r) => return r,
    };
    match state.store.get(&digest) {
        Ok(bytes) => (
            StatusCode::OK,
            [
                (axum::http::header::CONTENT_TYPE, "application/octet-stream".to_string()),
                (axum::http::header::ETAG, format!("\"{hash}\"")),
                (axum::http::header::CACHE_CONTROL, "public, max-age=31536000, immutable".to_string()),
            ],
            bytes,
        )
            .into_response(),
        Err(StoreError::NotFound(_)) => StatusCode::NOT_FOUND.into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn head_artifact(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(hash): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if rate_limited(&state, addr, None) {
        return too_many_requests();
    }
    let digest = match parse_digest(&hash) {
        Ok(d) => d,
        Err(r) => return r,
    };
    if state.store.exists(&digest) {
        StatusCode::OK.into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

async fn put_artifact(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(hash): Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if rate_limited(&state, addr, None) {
        return too_many_requests();
    }
    let digest = match parse_digest(&hash) {
        Ok(d) => d,
        Err(r) => return r,
    };
    match state.store.put(&digest, &body) {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(StoreError::DigestMismatch { expected, actual }) => {
            (StatusCode::BAD_REQUEST, format!("digest mismatch: path said {expected}, body hashed to {actual}")).into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn delete_artifact(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(hash): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if rate_limited(&state, addr, None) {
        return too_many_requests();
    }
    let digest = match parse_digest(&hash) {
        Ok(d) => d,
        Err(r) => return r,
    };
    match state.store.delete(&digest) {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

fn too_many_requests() -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [
            (axum::http::header::RETRY_AFTER, "1"),
            (axum::http::header::HeaderName::from_static("x-ratelimit-limit"), "0"),
            (axum::http::header::HeaderName::from_static("x-ratelimit-remaining"), "0"),
        ],
    )
        .into_response()
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.store.stats();
    let storage_used = state.store.total_bytes().unwrap_or(0);
    Json(serde_json::json!({
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "storage_used_bytes": storage_used,
        "hits": stats.hits,
        "misses": stats.misses,
        "errors": stats.errors,
    }))
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.store.stats();
    let body = format!(
        "# TYPE kiln_cas_hits_total counter\n\
         kiln_cas_hits_total {}\n\
         # TYPE kiln_cas_misses_total counter\n\
         kiln_cas_misses_total {}\n\
         # TYPE kiln_cas_bytes_in_total counter\n\
         kiln_cas_bytes_in_total {}\n\
         # TYPE kiln_cas_bytes_out_total counter\n\
         kiln_cas_bytes_out_total {}\n\
         # TYPE kiln_cas_errors_total counter\n\
         kiln_cas_errors_total {}\n",
        stats.hits, stats.misses, stats.bytes_in, stats.bytes_out, stats.errors
    );
    ([(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthenticated_health_is_allowed_with_no_token_configured() {
        let state = AppState {
            store: Arc::new(BlobStore::open(std::env::temp_dir().join("kiln-cas-test-auth"), u64::MAX, true).unwrap()),
            config: ServerConfig { bearer_token: Some("secret".into()), limiter: None },
            started_at: Instant::now(),
        };
        // /health bypasses the `authorized` check entirely in the router wiring
        // (no Authorization extraction in its handler); this test documents
        // that `authorized` itself would reject a missing/garbled header on
        // the routes that do call it.
        assert!(!authorized(&state, &HeaderMap::new()));
    }
}
