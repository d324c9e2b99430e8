//! `GET /health` and `GET /health/simple`.
//!
//! Grounded in `original_source/src/api/routers/health.py`: component
//! health aggregated into an overall status, plus a cheap liveness-only
//! variant.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;

use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<Utc>,
    pub version: String,
    pub components: HashMap<String, serde_json::Value>,
    pub uptime_seconds: f64,
}

#[derive(Debug, Serialize)]
pub struct SimpleHealthResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<Utc>,
    pub uptime_seconds: f64,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let uptime = state.start_time.elapsed().as_secs_f64();
    let mut components = HashMap::new();

    let db_status = if std::path::Path::new(&state.config.database.path).exists() {
        "healthy"
    } else {
        "degraded"
    };
    components.insert("database".to_string(), json!({"status": db_status}));

    let llm_status = match state.llm.health().await {
        harmonia_core::HealthStatus::Healthy => "healthy",
        harmonia_core::HealthStatus::Degraded => "degraded",
        harmonia_core::HealthStatus::Unhealthy => "unhealthy",
    };
    components.insert("ollama".to_string(), json!({"status": llm_status}));

    let active_users = state.router.list().unwrap_or_default().len();
    components.insert(
        "router".to_string(),
        json!({"status": "healthy", "active_users": active_users}),
    );

    let overall = if db_status == "healthy" && llm_status != "unhealthy" {
        if llm_status == "degraded" {
            "degraded"
        } else {
            "healthy"
        }
    } else {
        "unhealthy"
    };

    Json(HealthResponse {
        status: overall.to_string(),
        timestamp: Utc::now(),
        version: harmonia_core::VERSION.to_string(),
        components,
        uptime_seconds: uptime,
    })
}

pub async fn health_simple(State(state): State<Arc<AppState>>) -> Json<SimpleHealthResponse> {
    Json(SimpleHealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
        uptime_seconds: state.start_time.elapsed().as_secs_f64(),
    })
}
