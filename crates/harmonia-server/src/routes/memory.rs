//! `/memory/*` handlers: store, search, list, export, get, delete.
//!
//! Grounded in `original_source/src/api/routers/memory.py`'s conversion
//! helpers (`_memory_to_response`, `_search_result_to_response`,
//! `_convert_search_filter`) and `models/responses.py`'s response shapes.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use harmonia_core::{ListFilters, Memory, MemoryType, PipelineConfig, Session};
use serde::{Deserialize, Serialize};

use crate::error::{not_found, validation_error, ApiError};
use crate::server::AppState;

fn now_ms(start: std::time::Instant) -> i64 {
    start.elapsed().as_millis() as i64
}

fn parse_category(raw: &Option<String>) -> Result<Option<MemoryType>, ApiError> {
    match raw {
        None => Ok(None),
        Some(s) => MemoryType::parse(s)
            .map(Some)
            .ok_or_else(|| validation_error(format!("unknown category: {s}"))),
    }
}

#[derive(Debug, Serialize, Default)]
pub struct FiltersApplied {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_confidence: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct PaginationInfo {
    pub limit: i64,
    pub offset: i64,
    pub total_count: i64,
    pub has_more: bool,
}

#[derive(Debug, Serialize)]
pub struct MemoryResponse {
    pub memory_id: String,
    pub user_id: String,
    pub content: String,
    pub original_message: Option<String>,
    pub category: String,
    pub confidence_score: f64,
    pub timestamp: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_active: bool,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

fn memory_to_response(m: &Memory, user_id: &str, include_metadata: bool) -> MemoryResponse {
    MemoryResponse {
        memory_id: m.memory_id.clone(),
        user_id: user_id.to_string(),
        content: m.content.clone(),
        original_message: m.original_message.clone(),
        category: m.category.as_str().to_string(),
        confidence_score: m.confidence_score.unwrap_or(0.0),
        timestamp: m.timestamp,
        created_at: m.created_at,
        updated_at: m.updated_at,
        is_active: m.is_active,
        metadata: include_metadata.then(|| m.metadata.clone()),
    }
}

// ---------------------------------------------------------------------
// POST /memory/store
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct StoreRequest {
    pub user_id: String,
    pub message: String,
    pub session_id: Option<String>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
    #[allow(dead_code)]
    pub resolution_strategy: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConflictResolution {
    pub action: String,
    pub original_memory_id: Option<String>,
    pub conflict_type: String,
    pub resolution_strategy: String,
}

#[derive(Debug, Serialize)]
pub struct MemoryStoreResponse {
    pub success: bool,
    pub memory_id: Option<String>,
    pub extracted_memory: String,
    pub action: String,
    pub confidence: f64,
    pub conflicts_resolved: Option<Vec<ConflictResolution>>,
    pub processing_time_ms: i64,
}

pub async fn store(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StoreRequest>,
) -> Result<Json<MemoryStoreResponse>, ApiError> {
    let started = std::time::Instant::now();
    if req.message.trim().is_empty() {
        return Err(validation_error("message must not be empty"));
    }

    let session = req.session_id.map(|id| {
        let mut s = Session::new();
        s.session_id = id;
        if let Some(meta) = &req.metadata {
            s.metadata = meta.clone();
        }
        s
    });

    let summary = state
        .manager
        .process_and_store(
            &state.llm,
            &req.user_id,
            &req.message,
            session.as_ref(),
            &PipelineConfig::default(),
        )
        .await?;

    if let Some(reason) = summary.skipped_reason {
        return Ok(Json(MemoryStoreResponse {
            success: true,
            memory_id: None,
            extracted_memory: reason,
            action: "skipped".to_string(),
            confidence: 0.0,
            conflicts_resolved: None,
            processing_time_ms: now_ms(started),
        }));
    }

    let primary = summary.results.first();
    let conflicts_resolved: Vec<ConflictResolution> = summary
        .results
        .iter()
        .flat_map(|r| r.conflicts_resolved.iter())
        .map(|c| ConflictResolution {
            action: c.strategy.to_string(),
            original_memory_id: Some(c.existing_id.clone()),
            conflict_type: c.kind.to_string(),
            resolution_strategy: c.strategy.to_string(),
        })
        .collect();

    let memory_id = summary.primary_memory_id().map(str::to_string);
    let stored = memory_id
        .as_deref()
        .and_then(|id| state.router.get(&req.user_id).ok().and_then(|s| s.get_memory(id).ok().flatten()));

    Ok(Json(MemoryStoreResponse {
        success: true,
        memory_id,
        extracted_memory: stored.as_ref().map(|m| m.content.clone()).unwrap_or_default(),
        action: primary.map(|r| r.outcome.as_str().to_string()).unwrap_or_else(|| "created".to_string()),
        confidence: stored.as_ref().and_then(|m| m.confidence_score).unwrap_or(1.0),
        conflicts_resolved: if conflicts_resolved.is_empty() {
            None
        } else {
            Some(conflicts_resolved)
        },
        processing_time_ms: now_ms(started),
    }))
}

// ---------------------------------------------------------------------
// GET /memory/search
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub user_id: String,
    pub query: String,
    pub category: Option<String>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub min_confidence: Option<f64>,
    pub max_confidence: Option<f64>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
    pub boost_recent: Option<bool>,
    #[serde(default)]
    pub include_metadata: bool,
}

fn default_limit() -> i64 {
    20
}

#[derive(Debug, Serialize)]
pub struct SearchResult {
    pub memory_id: String,
    pub content: String,
    pub category: String,
    pub confidence_score: f64,
    pub timestamp: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub relevance_score: f64,
    pub rank: usize,
    pub snippet: Option<String>,
    pub highlights: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub success: bool,
    pub results: Vec<SearchResult>,
    pub total_count: i64,
    pub query: String,
    pub pagination: PaginationInfo,
    pub filters_applied: FiltersApplied,
    pub search_time_ms: i64,
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    let started = std::time::Instant::now();
    let category = parse_category(&params.category)?;
    let storage = state.router.get(&params.user_id).map_err(harmonia_core::Error::from)?;
    let engine = state.search_engine(&params.user_id);

    let mut query = harmonia_core::SearchQuery::new(params.query.clone());
    query.category = category;
    query.created_after = params.from_date;
    query.created_before = params.to_date;
    query.min_confidence = params.min_confidence;
    query.max_confidence = params.max_confidence;
    query.limit = params.limit;
    query.offset = params.offset;
    query.boost_recent = params.boost_recent.unwrap_or(true);

    let page = engine
        .search(&storage, &query)
        .map_err(harmonia_core::Error::from)?;

    let results = page
        .items
        .iter()
        .enumerate()
        .map(|(i, item)| SearchResult {
            memory_id: item.memory.memory_id.clone(),
            content: item.memory.content.clone(),
            category: item.memory.category.as_str().to_string(),
            confidence_score: item.memory.confidence_score.unwrap_or(0.0),
            timestamp: item.memory.timestamp,
            created_at: item.memory.created_at,
            updated_at: item.memory.updated_at,
            relevance_score: item.score,
            rank: i + 1,
            snippet: Some(item.snippet.clone()),
            highlights: item.highlights.clone(),
        })
        .collect();

    Ok(Json(SearchResponse {
        success: true,
        results,
        total_count: page.total,
        query: params.query,
        pagination: PaginationInfo {
            limit: page.limit,
            offset: page.offset,
            total_count: page.total,
            has_more: page.has_more,
        },
        filters_applied: FiltersApplied {
            category: params.category,
            from_date: params.from_date,
            to_date: params.to_date,
            min_confidence: params.min_confidence,
            max_confidence: params.max_confidence,
        },
        search_time_ms: now_ms(started),
    }))
}

// ---------------------------------------------------------------------
// GET /memory/list
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub user_id: String,
    pub category: Option<String>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub min_confidence: Option<f64>,
    pub max_confidence: Option<f64>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_sort_by")]
    pub sort_by: String,
    #[serde(default = "default_sort_order")]
    pub sort_order: String,
    #[serde(default)]
    pub include_metadata: bool,
}

fn default_sort_by() -> String {
    "created_at".to_string()
}

fn default_sort_order() -> String {
    "desc".to_string()
}

#[derive(Debug, Serialize)]
pub struct MemoryListResponse {
    pub success: bool,
    pub memories: Vec<MemoryResponse>,
    pub total_count: i64,
    pub has_more: bool,
    pub pagination: PaginationInfo,
    pub filters_applied: FiltersApplied,
    pub execution_time_ms: i64,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<MemoryListResponse>, ApiError> {
    let started = std::time::Instant::now();
    let category = parse_category(&params.category)?;
    let storage = state.router.get(&params.user_id).map_err(harmonia_core::Error::from)?;
    let engine = state.search_engine(&params.user_id);

    let filters = ListFilters {
        category,
        created_after: params.from_date,
        created_before: params.to_date,
        min_confidence: params.min_confidence,
        max_confidence: params.max_confidence,
        sort_by: params.sort_by.clone(),
        ascending: params.sort_order.eq_ignore_ascii_case("asc"),
        limit: params.limit,
        offset: params.offset,
        include_inactive: false,
    };

    let page = engine
        .list(&storage, &filters)
        .map_err(harmonia_core::Error::from)?;
    let memories: Vec<MemoryResponse> = page
        .items
        .iter()
        .map(|item| memory_to_response(&item.memory, &params.user_id, params.include_metadata))
        .collect();

    Ok(Json(MemoryListResponse {
        success: true,
        memories,
        total_count: page.total,
        has_more: page.has_more,
        pagination: PaginationInfo {
            limit: page.limit,
            offset: page.offset,
            total_count: page.total,
            has_more: page.has_more,
        },
        filters_applied: FiltersApplied {
            category: params.category,
            from_date: params.from_date,
            to_date: params.to_date,
            min_confidence: params.min_confidence,
            max_confidence: params.max_confidence,
        },
        execution_time_ms: now_ms(started),
    }))
}

// ---------------------------------------------------------------------
// GET /memory/export
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ExportParams {
    pub user_id: String,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default)]
    pub include_metadata: bool,
    pub category: Option<String>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub min_confidence: Option<f64>,
    pub max_confidence: Option<f64>,
}

fn default_format() -> String {
    "json".to_string()
}

#[derive(Debug, Serialize)]
pub struct MemoryExportResponse {
    pub success: bool,
    pub data: String,
    pub format: String,
    pub include_metadata: bool,
    pub export_date: DateTime<Utc>,
    pub memory_count: usize,
    pub filters_applied: FiltersApplied,
    pub execution_time_ms: i64,
}

pub async fn export(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ExportParams>,
) -> Result<Json<MemoryExportResponse>, ApiError> {
    let started = std::time::Instant::now();
    let format = harmonia_core::ExportFormat::parse(&params.format)
        .map_err(harmonia_core::Error::from)?;
    let category = parse_category(&params.category)?;
    let storage = state.router.get(&params.user_id).map_err(harmonia_core::Error::from)?;

    let filters = ListFilters {
        category,
        created_after: params.from_date,
        created_before: params.to_date,
        min_confidence: params.min_confidence,
        max_confidence: params.max_confidence,
        sort_by: "created_at".to_string(),
        ascending: false,
        limit: state.config.search.max_results as i64,
        offset: 0,
        include_inactive: false,
    };
    let (memories, _total) = storage.list_memories(&filters).map_err(harmonia_core::Error::from)?;

    let data = harmonia_core::search::export(&memories, format, &params.user_id, params.include_metadata)
        .map_err(harmonia_core::Error::from)?;

    Ok(Json(MemoryExportResponse {
        success: true,
        memory_count: memories.len(),
        data,
        format: params.format,
        include_metadata: params.include_metadata,
        export_date: Utc::now(),
        filters_applied: FiltersApplied {
            category: params.category,
            from_date: params.from_date,
            to_date: params.to_date,
            min_confidence: params.min_confidence,
            max_confidence: params.max_confidence,
        },
        execution_time_ms: now_ms(started),
    }))
}

// ---------------------------------------------------------------------
// GET/DELETE /memory/{id}
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct UserIdParam {
    pub user_id: String,
    #[serde(default)]
    pub include_metadata: bool,
}

#[derive(Debug, Serialize)]
pub struct MemoryDetailResponse {
    pub success: bool,
    pub memory: MemoryResponse,
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(memory_id): Path<String>,
    Query(params): Query<UserIdParam>,
) -> Result<Json<MemoryDetailResponse>, ApiError> {
    let storage = state.router.get(&params.user_id).map_err(harmonia_core::Error::from)?;
    let memory = storage
        .get_memory(&memory_id)
        .map_err(harmonia_core::Error::from)?
        .ok_or_else(|| not_found(format!("memory not found: {memory_id}")))?;

    Ok(Json(MemoryDetailResponse {
        success: true,
        memory: memory_to_response(&memory, &params.user_id, params.include_metadata),
    }))
}

#[derive(Debug, Serialize)]
pub struct MemoryDeleteResponse {
    pub success: bool,
    pub message: String,
    pub memory_id: String,
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(memory_id): Path<String>,
    Query(params): Query<UserIdParam>,
) -> Result<Json<MemoryDeleteResponse>, ApiError> {
    let storage = state.router.get(&params.user_id).map_err(harmonia_core::Error::from)?;
    storage
        .delete_memory(&memory_id, true)
        .map_err(harmonia_core::Error::from)?;

    Ok(Json(MemoryDeleteResponse {
        success: true,
        message: "memory deleted".to_string(),
        memory_id,
    }))
}
