use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::{collections::BTreeMap, sync::Arc};
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod cache;
pub mod config;
pub mod fetch;
pub mod metadata;
pub mod transform;

use crate::cache::{CacheEntry, CacheKey, CachePolicy, MemoryCache, ResponseCache, Route, SledCache};
use crate::config::EdgeConfig;
use crate::fetch::{HttpOrigin, Origin, OriginResponse};
use crate::transform::TransformParams;

/// Every way a request can fail. Each kind maps to exactly one status code
/// through [`EdgeError::status`].
#[derive(Error, Debug)]
pub enum EdgeError {
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Origin unreachable: {0}")]
    Unreachable(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Internal server error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, EdgeError>;

impl EdgeError {
    pub fn status(&self) -> StatusCode {
        match self {
            EdgeError::BadRequest(_) => StatusCode::BAD_REQUEST,
            EdgeError::NotFound(_) => StatusCode::NOT_FOUND,
            EdgeError::Unreachable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EdgeError::InvalidInput(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EdgeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Metadata routes report any failure to reach the target page as 404.
    fn unreachable_as_not_found(self) -> Self {
        match self {
            EdgeError::Unreachable(msg) => EdgeError::NotFound(msg),
            other => other,
        }
    }
}

/// Errors carry no body and are never cached anywhere downstream.
impl IntoResponse for EdgeError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        if let Ok(v) = HeaderValue::from_str(&CachePolicy::no_store().header_value()) {
            headers.insert(header::CACHE_CONTROL, v);
        }
        (self.status(), headers, Body::empty()).into_response()
    }
}

/// Request counters exposed on `/metrics`.
#[derive(Default)]
pub struct Metrics {
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub origin_fetches: AtomicU64,
    pub transforms: AtomicU64,
    pub errors: AtomicU64,
}

/// Everything a handler needs. Collaborators are trait objects so tests can
/// swap in stubs.
pub struct AppState {
    pub config: EdgeConfig,
    pub origin: Arc<dyn Origin>,
    pub cache: Arc<dyn ResponseCache>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: EdgeConfig, origin: Arc<dyn Origin>, cache: Arc<dyn ResponseCache>) -> Self {
        Self { config, origin, cache, metrics: Metrics::default() }
    }

    /// Production wiring: HTTP origin plus sled cache when `cache_dir` is set,
    /// in-memory cache otherwise.
    pub fn from_config(config: EdgeConfig) -> Result<Self> {
        let origin = Arc::new(HttpOrigin::new(config.fetch_timeout, config.max_input_size)?);
        let cache: Arc<dyn ResponseCache> = match &config.cache_dir {
            Some(dir) => {
                tracing::info!("Using sled response cache at {}", dir.display());
                Arc::new(SledCache::new(dir, config.max_cache_size)?)
            }
            None => {
                tracing::info!("Using in-memory response cache");
                Arc::new(MemoryCache::new(config.max_cache_size))
            }
        };
        Ok(Self::new(config, origin, cache))
    }

    async fn fetch_origin(&self, location: &str) -> Result<OriginResponse> {
        self.metrics.origin_fetches.fetch_add(1, Ordering::Relaxed);
        self.origin.fetch(location).await
    }

    /// Serve `key` from cache, or compute, store and serve it.
    ///
    /// A failed cache read counts as a miss and a failed write is only
    /// logged: the response is still served.
    async fn cached<F, Fut>(&self, key: CacheKey, compute: F) -> Result<Response>
    where
        F: FnOnce(CacheKey) -> Fut,
        Fut: std::future::Future<Output = Result<CacheEntry>>,
    {
        match self.cache.get(&key).await {
            Ok(Some(entry)) => {
                tracing::info!("Cache hit for key={}", key);
                self.metrics.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(entry_response(entry, true));
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Cache read failed for key={}: {}", key, e),
        }

        tracing::info!("Cache miss for key={}", key);
        self.metrics.cache_misses.fetch_add(1, Ordering::Relaxed);

        let entry = compute(key).await?;
        if let Err(e) = self.cache.put(&entry).await {
            tracing::warn!("Failed to cache response for key={}: {}", entry.key, e);
        }
        Ok(entry_response(entry, false))
    }

    /// Shared image pipeline for `/images` and `/metadata/og`.
    async fn transformed_image(&self, key: CacheKey, location: &str, params: &TransformParams) -> Result<CacheEntry> {
        let source = self.fetch_origin(location).await?;

        self.metrics.transforms.fetch_add(1, Ordering::Relaxed);
        let job_params = params.clone();
        let encoded = tokio::task::spawn_blocking(move || transform::transform(&source.bytes, &job_params))
            .await
            .map_err(|e| EdgeError::Internal(format!("transform task failed: {}", e)))??;

        Ok(CacheEntry::ok(&key, Bytes::from(encoded), Some(params.format.content_type())))
    }

    /// Origin bytes verbatim, with the origin's content type if it sent one.
    async fn passthrough_file(&self, key: CacheKey, location: &str) -> Result<CacheEntry> {
        let source = self.fetch_origin(location).await?;
        Ok(CacheEntry::ok(&key, source.bytes, source.content_type.as_deref()))
    }

    async fn page_metadata(&self, key: CacheKey, url: &str) -> Result<CacheEntry> {
        let page = self.fetch_origin(url).await?;
        let html = String::from_utf8_lossy(&page.bytes);
        let meta = metadata::extract(&html, url);
        let body = serde_json::to_vec(&meta)
            .map_err(|e| EdgeError::Internal(format!("metadata encoding: {}", e)))?;
        Ok(CacheEntry::ok(&key, Bytes::from(body), Some(mime::APPLICATION_JSON.essence_str())))
    }

    fn record_failure(&self, route: Route, resource: &str, query: &BTreeMap<String, String>, err: &EdgeError) {
        if err.status().is_server_error() {
            self.metrics.errors.fetch_add(1, Ordering::Relaxed);
            tracing::error!(route = %route, resource = %resource, params = ?query, "Request failed: {}", err);
        } else {
            tracing::debug!(route = %route, resource = %resource, params = ?query, "Request rejected: {}", err);
        }
    }
}

type SharedState = State<Arc<AppState>>;

fn entry_response(entry: CacheEntry, hit: bool) -> Response {
    let mut headers = HeaderMap::new();
    for (name, value) in &entry.headers {
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(n), Ok(v)) => {
                headers.insert(n, v);
            }
            _ => tracing::warn!("Dropping unrepresentable cached header {}", name),
        }
    }
    headers.insert(
        HeaderName::from_static("x-cache"),
        HeaderValue::from_static(if hit { "HIT" } else { "MISS" }),
    );
    let status = StatusCode::from_u16(entry.status).unwrap_or(StatusCode::OK);
    (status, headers, Body::from(entry.body)).into_response()
}

/// The `url` query parameter, required and non-empty.
fn required_url(query: &BTreeMap<String, String>) -> Result<String> {
    query
        .get("url")
        .map(|u| u.trim())
        .filter(|u| !u.is_empty())
        .map(str::to_string)
        .ok_or_else(|| EdgeError::BadRequest("missing url query parameter".into()))
}

async fn serve_image(state: &AppState, key: &str, query: &BTreeMap<String, String>) -> Result<Response> {
    let params = TransformParams::from_query(query)?;
    let location = state.config.preview_url(key)?;
    let cache_key = CacheKey::new(Route::PreviewImage, key, &params.key_params())?;
    state
        .cached(cache_key, |k| state.transformed_image(k, &location, &params))
        .await
}

async fn serve_file(state: &AppState, key: &str) -> Result<Response> {
    let location = state.config.public_url(key)?;
    let cache_key = CacheKey::new(Route::PublicFile, key, &[])?;
    state
        .cached(cache_key, |k| state.passthrough_file(k, &location))
        .await
}

async fn serve_metadata(state: &AppState, query: &BTreeMap<String, String>) -> Result<Response> {
    let url = required_url(query)?;
    let cache_key = CacheKey::new(Route::Metadata, &url, &[])?;
    state
        .cached(cache_key, |k| state.page_metadata(k, &url))
        .await
        .map_err(EdgeError::unreachable_as_not_found)
}

async fn serve_metadata_og(state: &AppState, query: &BTreeMap<String, String>) -> Result<Response> {
    let url = required_url(query)?;
    let params = TransformParams::from_query(query)?;
    let cache_key = CacheKey::new(Route::MetadataOg, &url, &params.key_params())?;
    state
        .cached(cache_key, |k| state.transformed_image(k, &url, &params))
        .await
        .map_err(EdgeError::unreachable_as_not_found)
}

async fn image_handler(
    State(state): SharedState,
    Path(key): Path<String>,
    Query(query): Query<BTreeMap<String, String>>,
) -> Response {
    tracing::debug!("Processing image request: key={}, params={:?}", key, query);

    serve_image(&state, &key, &query).await.unwrap_or_else(|e| {
        state.record_failure(Route::PreviewImage, &key, &query, &e);
        e.into_response()
    })
}

async fn file_handler(State(state): SharedState, Path(key): Path<String>) -> Response {
    tracing::debug!("Processing file request: key={}", key);

    serve_file(&state, &key).await.unwrap_or_else(|e| {
        state.record_failure(Route::PublicFile, &key, &BTreeMap::new(), &e);
        e.into_response()
    })
}

async fn metadata_handler(
    State(state): SharedState,
    Query(query): Query<BTreeMap<String, String>>,
) -> Response {
    serve_metadata(&state, &query).await.unwrap_or_else(|e| {
        let url = query.get("url").map(String::as_str).unwrap_or_default();
        state.record_failure(Route::Metadata, url, &query, &e);
        e.into_response()
    })
}

async fn metadata_og_handler(
    State(state): SharedState,
    Query(query): Query<BTreeMap<String, String>>,
) -> Response {
    serve_metadata_og(&state, &query).await.unwrap_or_else(|e| {
        let url = query.get("url").map(String::as_str).unwrap_or_default();
        state.record_failure(Route::MetadataOg, url, &query, &e);
        e.into_response()
    })
}

/// Health check endpoint
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "mediaedge"
    }))
}

/// Cache statistics endpoint
async fn cache_stats_handler(State(state): SharedState) -> impl IntoResponse {
    let stats = state.cache.stats().await;
    let hits = state.metrics.cache_hits.load(Ordering::Relaxed);
    let misses = state.metrics.cache_misses.load(Ordering::Relaxed);
    let total_requests = hits + misses;
    let hit_rate = if total_requests > 0 {
        (hits as f64 / total_requests as f64) * 100.0
    } else {
        0.0
    };

    Json(serde_json::json!({
        "cache": stats,
        "requests": {
            "cache_hits": hits,
            "cache_misses": misses,
            "total": total_requests,
            "hit_rate_percent": hit_rate,
        }
    }))
}

/// Metrics endpoint (Prometheus-compatible plain text)
async fn metrics_handler(State(state): SharedState) -> impl IntoResponse {
    let m = &state.metrics;
    let counters = [
        ("mediaedge_cache_hits_total", "Total number of cache hits", &m.cache_hits),
        ("mediaedge_cache_misses_total", "Total number of cache misses", &m.cache_misses),
        ("mediaedge_origin_fetches_total", "Total number of origin fetches", &m.origin_fetches),
        ("mediaedge_transforms_total", "Total number of image transformations", &m.transforms),
        ("mediaedge_errors_total", "Total number of server errors", &m.errors),
    ];

    let mut body = String::new();
    for (name, help, counter) in counters {
        body.push_str(&format!(
            "# HELP {name} {help}\n# TYPE {name} counter\n{name} {}\n",
            counter.load(Ordering::Relaxed)
        ));
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

/// Build the full router: asset and metadata routes behind CORS, plus
/// observability endpoints. Only GET is routed.
pub fn router(state: AppState) -> Router {
    let state = Arc::new(state);

    let cors = match HeaderValue::from_str(&state.config.allowed_origin) {
        Ok(origin) => CorsLayer::new().allow_origin(origin).allow_methods([Method::GET]),
        Err(_) => {
            tracing::warn!("Invalid allowed origin {:?}, CORS disabled", state.config.allowed_origin);
            CorsLayer::new().allow_methods([Method::GET])
        }
    };

    let asset_routes = Router::new()
        .route("/images/:key", get(image_handler))
        .route("/files/:key", get(file_handler))
        .route("/metadata", get(metadata_handler))
        .route("/metadata/og", get(metadata_og_handler))
        .layer(cors);

    let observability_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/stats/cache", get(cache_stats_handler))
        .route("/metrics", get(metrics_handler));

    Router::new()
        .merge(asset_routes)
        .merge(observability_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
