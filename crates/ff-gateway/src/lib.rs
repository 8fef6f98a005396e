// SPDX-License-Identifier: MIT OR Apache-2.0
//! ff-gateway
//!
//! The HTTP surface of Function Fabric: the §6 route table on axum, the
//! middleware chain (correlation → logging → size gate → auth → rate
//! limit), JSON 404/405 fallbacks, panic recovery into the error
//! envelope, dedup on the invoke path, audit events, and per-function log
//! streams.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Audit events.
pub mod audit;
/// TOML configuration.
pub mod config;
/// Error envelope and correlation ids.
pub mod envelope;
/// Per-function log rings.
pub mod logs;
/// Middleware stack.
pub mod middleware;
/// Route handlers.
pub mod routes;

use crate::audit::AuditLog;
use crate::config::GatewayConfig;
use crate::envelope::{ApiError, CorrelationId};
use crate::logs::FunctionLogs;
use axum::extract::{DefaultBodyLimit, Extension, Path, State};
use axum::http::{HeaderValue, Uri};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use ff_auth::{ApiKeyStore, AuthResolver, MemoryApiKeyStore};
use ff_core::{ErrorKind, MAX_DEPLOY_BODY_BYTES};
use ff_dedup::DedupMap;
use ff_dispatch::{Dispatcher, TierBudgets};
use ff_exec::ExecutorBindings;
use ff_exec::bindings::Compiler;
use ff_limit::RateLimitService;
use ff_loader::FunctionLoader;
use ff_store::{
    CodeStore, FunctionRegistry, MemoryCodeStore, MemoryRegistry, MemoryStubCache, StubCache,
};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

/// Shared gateway state.
pub struct AppState {
    /// Service name for `/health` and audit events.
    pub service_name: String,
    /// Credential resolver.
    pub auth: AuthResolver,
    /// Rate-limit façade.
    pub limits: RateLimitService,
    /// Invoke-path dedup map.
    pub dedup: DedupMap,
    /// Stub loader.
    pub loader: Arc<FunctionLoader>,
    /// Tier dispatcher.
    pub dispatcher: Arc<Dispatcher>,
    /// Metadata registry.
    pub registry: Arc<dyn FunctionRegistry>,
    /// Code store.
    pub code_store: Arc<dyn CodeStore>,
    /// External compile service, when bound.
    pub compiler: Option<Arc<dyn Compiler>>,
    /// Audit ring.
    pub audit: AuditLog,
    /// Per-function log rings.
    pub logs: FunctionLogs,
    /// Extra credential header checked before `X-API-Key`.
    pub custom_credential_header: Option<String>,
    /// Internal-auth header name.
    pub internal_header_name: String,
    /// CORS allow-list; empty disables the layer.
    pub cors_origins: Vec<String>,
}

/// Store adapters handed to [`build_state`].
pub struct Stores {
    /// Metadata registry.
    pub registry: Arc<dyn FunctionRegistry>,
    /// Code store.
    pub code_store: Arc<dyn CodeStore>,
    /// Shared stub cache.
    pub stub_cache: Arc<dyn StubCache>,
}

impl Stores {
    /// In-memory adapters for tests and single-node deployments.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            registry: Arc::new(MemoryRegistry::new()),
            code_store: Arc::new(MemoryCodeStore::new()),
            stub_cache: Arc::new(MemoryStubCache::new()),
        }
    }
}

/// Assemble the shared state from configuration, stores, and bindings.
#[must_use]
pub fn build_state(
    config: &GatewayConfig,
    stores: Stores,
    bindings: ExecutorBindings,
    compiler: Option<Arc<dyn Compiler>>,
) -> Arc<AppState> {
    let key_store: Option<Arc<dyn ApiKeyStore>> = if config.auth.api_keys.is_empty() {
        None
    } else {
        let store = MemoryApiKeyStore::new();
        for seeded in &config.auth.api_keys {
            store.insert_hash(seeded.key_hash.clone(), seeded.record.clone());
        }
        Some(Arc::new(store))
    };

    let auth = AuthResolver::new(config.auth.resolver.clone(), key_store, None);
    let limits = RateLimitService::new(config.rate_limit.clone());
    let dedup = if config.dedup.enabled {
        DedupMap::new(Duration::from_millis(config.dedup.ttl_ms))
    } else {
        DedupMap::disabled()
    };

    let loader = Arc::new(FunctionLoader::new(
        Arc::clone(&stores.registry),
        Arc::clone(&stores.code_store),
        Arc::clone(&stores.stub_cache),
        config.loader.to_loader_config(),
    ));
    let dispatcher = Dispatcher::new(Arc::clone(&loader), bindings, TierBudgets::default());

    Arc::new(AppState {
        service_name: config.service_name.clone(),
        auth,
        limits,
        dedup,
        loader,
        dispatcher,
        registry: stores.registry,
        code_store: stores.code_store,
        compiler,
        audit: AuditLog::new(),
        logs: FunctionLogs::new(),
        custom_credential_header: config.auth.custom_credential_header.clone(),
        internal_header_name: config
            .auth
            .internal_header_name
            .clone()
            .unwrap_or_else(|| "x-internal-auth".into()),
        cors_origins: config.cors.allowed_origins.clone(),
    })
}

/// Build the axum application with all routes and middleware.
pub fn build_app(state: Arc<AppState>) -> Router {
    use routes::{functions, introspect, invoke};

    let router = Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route(
            "/v1/api/functions",
            post(functions::deploy).get(functions::list),
        )
        .route(
            "/v1/api/functions/{id}",
            get(functions::info)
                .patch(functions::update)
                .delete(functions::remove),
        )
        .route(
            "/v1/api/functions/{id}/rollback",
            post(functions::rollback),
        )
        // Legacy aliases.
        .route(
            "/api/functions",
            post(functions::deploy).get(functions::list),
        )
        .route(
            "/api/functions/{id}",
            get(functions::info)
                .patch(functions::update)
                .delete(functions::remove),
        )
        .route("/v1/functions/{id}", post(invoke::invoke))
        .route("/v1/functions/{id}/invoke", post(invoke::invoke))
        .route("/v1/functions/{id}/logs", get(stream_logs))
        .route("/v1/cascade/{id}", post(invoke::invoke_cascade))
        .route("/v1/api/auth/validate", get(introspect::validate))
        .route("/v1/api/auth/me", get(introspect::me))
        .route("/v1/api/auth/orgs", get(introspect::orgs))
        .fallback(not_found)
        .method_not_allowed_fallback(method_not_allowed)
        .layer(from_fn_with_state(
            Arc::clone(&state),
            middleware::rate_limit_middleware,
        ))
        .layer(from_fn_with_state(
            Arc::clone(&state),
            middleware::auth_middleware,
        ))
        .layer(from_fn(middleware::body_size_gate))
        .layer(from_fn(middleware::request_logger))
        .layer(CatchPanicLayer::custom(panic_envelope))
        .layer(from_fn(middleware::correlation_middleware))
        .layer(DefaultBodyLimit::max(MAX_DEPLOY_BODY_BYTES));

    let router = match cors_layer(&state.cors_origins) {
        Some(cors) => router.layer(cors),
        None => router,
    };

    router.with_state(state)
}

fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    if origins.is_empty() {
        return None;
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(parsed))
            .allow_methods(Any)
            .allow_headers(Any),
    )
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": state.service_name,
    }))
}

/// GET `/v1/functions/{id}/logs`: recent invocation logs as SSE.
async fn stream_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let events = state.logs.recent(&id).into_iter().map(|entry| {
        Ok(SseEvent::default()
            .event("log")
            .data(serde_json::to_string(&entry).unwrap_or_default()))
    });
    Sse::new(tokio_stream::iter(events))
}

async fn not_found(Extension(correlation): Extension<CorrelationId>, uri: Uri) -> Response {
    ApiError::new(ErrorKind::NotFound, format!("no route for {}", uri.path()))
        .with_correlation(&correlation)
        .into_response()
}

async fn method_not_allowed(
    Extension(correlation): Extension<CorrelationId>,
    uri: Uri,
) -> Response {
    ApiError::new(
        ErrorKind::MethodNotAllowed,
        format!("method not allowed for {}", uri.path()),
    )
    .with_correlation(&correlation)
    .into_response()
}

fn panic_envelope(_panic: Box<dyn std::any::Any + Send + 'static>) -> Response {
    // No request context in here; the correlation middleware still echoes
    // X-Request-ID on the response.
    ApiError::new(ErrorKind::Internal, "internal server error").into_response()
}
