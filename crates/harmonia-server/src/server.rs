//! Shared application state and router assembly.
//!
//! Grounded in the teacher's `protocol/http.rs` axum idiom (`Router::new()`
//! with `.with_state`, `tower-http` layers, a graceful-shutdown future) and
//! `original_source/src/api/app.py`'s middleware ordering (CORS, rate
//! limit, auth, then the versioned routers).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::http::{HeaderName, Method};
use axum::middleware;
use axum::Router as AxumRouter;
use harmonia_core::{MemoryManager, OllamaClient, Router, SearchEngine};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::rate_limit::RateLimiter;
use crate::{auth, rate_limit, routes};

pub struct AppState {
    pub config: Config,
    pub router: Arc<Router>,
    pub manager: MemoryManager,
    pub llm: OllamaClient,
    pub rate_limiter: RateLimiter,
    pub search_engines: Mutex<HashMap<String, Arc<SearchEngine>>>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let router = Arc::new(Router::new(config.database.path.clone()));
        let manager = MemoryManager::new(router.clone());
        let llm = OllamaClient::new(config.ollama.host.clone(), config.ollama.model.clone());
        let rate_limiter = RateLimiter::new(config.security.rate_limit.requests_per_minute);
        AppState {
            config,
            router,
            manager,
            llm,
            rate_limiter,
            search_engines: Mutex::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Per-user search engines hold their own corpus cache, so they are
    /// kept around rather than rebuilt per request.
    pub fn search_engine(&self, user_id: &str) -> Arc<SearchEngine> {
        let mut engines = self.search_engines.lock().expect("search engine map lock poisoned");
        engines
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(SearchEngine::new()))
            .clone()
    }
}

pub fn build_router(state: Arc<AppState>) -> AxumRouter {
    let cors = if state.config.server.cors_origins.iter().any(|o| o == "*") {
        CorsLayer::new().allow_origin(AllowOrigin::any())
    } else {
        let origins: Vec<_> = state
            .config
            .server
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(origins)
    }
    .allow_methods([Method::GET, Method::POST, Method::DELETE])
    .allow_headers([
        HeaderName::from_static("x-api-key"),
        HeaderName::from_static("authorization"),
        HeaderName::from_static("content-type"),
    ]);

    let api = AxumRouter::new()
        .route("/health", axum::routing::get(routes::health::health))
        .route(
            "/health/simple",
            axum::routing::get(routes::health::health_simple),
        )
        .route("/memory/store", axum::routing::post(routes::memory::store))
        .route("/memory/search", axum::routing::get(routes::memory::search))
        .route("/memory/list", axum::routing::get(routes::memory::list))
        .route("/memory/export", axum::routing::get(routes::memory::export))
        .route(
            "/memory/{memory_id}",
            axum::routing::get(routes::memory::get).delete(routes::memory::delete),
        )
        .with_state(state.clone());

    AxumRouter::new()
        .nest("/api/v1", api)
        .route("/health", axum::routing::get(routes::health::health_simple))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit::enforce))
        .layer(middleware::from_fn_with_state(state.clone(), auth::require_api_key))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Waits for Ctrl+C or SIGTERM, matching the teacher's shutdown pattern.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
