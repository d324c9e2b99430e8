//! API key authentication middleware.
//!
//! Grounded in `original_source/src/api/middleware/auth.py`'s
//! `AuthMiddleware`: a fixed public-path allowlist, `X-API-Key` or
//! `Authorization: Bearer <key>` extraction, 401 + `WWW-Authenticate` on
//! failure.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::error::auth_error;
use crate::server::AppState;

const PUBLIC_PATHS: &[&str] = &[
    "/api/v1/health",
    "/api/v1/health/simple",
    "/docs",
    "/redoc",
    "/openapi.json",
];

fn is_public(path: &str) -> bool {
    PUBLIC_PATHS.contains(&path) || path == "/" || path == "/health"
}

fn extract_key(req: &Request) -> Option<String> {
    if let Some(v) = req.headers().get("x-api-key") {
        if let Ok(s) = v.to_str() {
            return Some(s.to_string());
        }
    }
    if let Some(v) = req.headers().get(axum::http::header::AUTHORIZATION) {
        if let Ok(s) = v.to_str() {
            if let Some(token) = s.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }
    None
}

pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    if !state.config.security.api_key_required || is_public(req.uri().path()) {
        return next.run(req).await;
    }

    match extract_key(&req) {
        Some(key) if state.config.security.api_keys.iter().any(|k| k == &key) => next.run(req).await,
        Some(_) => auth_error("invalid API key"),
        None => auth_error("missing API key"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_paths_bypass_auth() {
        assert!(is_public("/api/v1/health"));
        assert!(is_public("/api/v1/health/simple"));
        assert!(!is_public("/api/v1/memory/store"));
    }
}
