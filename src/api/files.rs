//! Converted-file and catalog API handlers

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{JobKind, JobStore, TaggedFile, TaggedFileStore};
use crate::dispatch;
use crate::error::{ApiError, ApiResult};
use crate::services::catalog::{BookMetadata, SearchHit};
use crate::AppState;

use super::jobs::JobCreatedResponse;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 500;

/// GET /files/untagged query parameters
#[derive(Debug, Default, Deserialize)]
pub struct UntaggedQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// GET /files/untagged response
#[derive(Debug, Serialize)]
pub struct UntaggedResponse {
    pub files: Vec<TaggedFile>,
}

/// GET /files/untagged
///
/// Scan the ready directory and register any artifact not yet tracked, then
/// list untagged records. Files dropped into the directory by hand are picked
/// up the same way as pipeline output.
pub async fn list_untagged(
    State(state): State<AppState>,
    Query(query): Query<UntaggedQuery>,
) -> ApiResult<Json<UntaggedResponse>> {
    let store = TaggedFileStore::new(state.db.clone());

    let ready_dir = state.config.ready_dir();
    if ready_dir.is_dir() {
        let entries = std::fs::read_dir(&ready_dir)
            .map_err(|e| ApiError::Internal(format!("Cannot read ready directory: {}", e)))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() || path.extension().map_or(true, |e| e != "m4b") {
                continue;
            }
            let path_str = path.to_string_lossy().to_string();
            if store.get_by_path(&path_str).await?.is_none() {
                tracing::info!(path = %path_str, "Registering discovered artifact");
                store.create(&path_str).await?;
            }
        }
    }

    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0).max(0);
    let files = store.list_untagged(limit, offset).await?;
    Ok(Json(UntaggedResponse { files }))
}

/// GET /catalog/search query parameters
#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
}

/// GET /catalog/search response
#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
}

/// GET /catalog/search?q=
pub async fn search_catalog(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<SearchResponse>> {
    let q = query.q.trim();
    if q.is_empty() {
        return Err(ApiError::BadRequest("Empty search query".to_string()));
    }

    let results = state.catalog.search(q).await?;
    Ok(Json(SearchResponse { results }))
}

/// GET /catalog/:asin query parameters
#[derive(Debug, Default, Deserialize)]
pub struct DetailsQuery {
    pub locale: Option<String>,
}

/// GET /catalog/:asin
pub async fn catalog_details(
    State(state): State<AppState>,
    AxumPath(asin): AxumPath<String>,
    Query(query): Query<DetailsQuery>,
) -> ApiResult<Json<BookMetadata>> {
    let metadata = state
        .catalog
        .fetch_details(&asin, query.locale.as_deref())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No catalog record for {}", asin)))?;
    Ok(Json(metadata))
}

/// POST /files/:id/tag request
#[derive(Debug, Deserialize)]
pub struct TagRequest {
    pub asin: String,
    #[serde(default)]
    pub locale: Option<String>,
}

/// POST /files/:id/tag
pub async fn tag_file(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<Uuid>,
    Json(request): Json<TagRequest>,
) -> ApiResult<(StatusCode, Json<JobCreatedResponse>)> {
    if request.asin.trim().is_empty() {
        return Err(ApiError::BadRequest("Missing asin".to_string()));
    }

    let files = TaggedFileStore::new(state.db.clone());
    let record = files
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No file with id {}", id)))?;
    if record.is_tagged {
        return Err(ApiError::BadRequest(format!(
            "File already tagged: {}",
            record.file_path
        )));
    }

    let jobs = JobStore::new(state.db.clone());
    let job = jobs
        .create(JobKind::Tagging, &[record.file_path.clone()])
        .await?;

    dispatch::spawn_tagging(&state, job.id, id, request.asin, request.locale);

    Ok((
        StatusCode::ACCEPTED,
        Json(JobCreatedResponse {
            job_id: job.id,
            status: job.status,
        }),
    ))
}

/// Build file and catalog routes
pub fn file_routes() -> Router<AppState> {
    Router::new()
        .route("/files/untagged", get(list_untagged))
        .route("/files/:id/tag", post(tag_file))
        .route("/catalog/search", get(search_catalog))
        .route("/catalog/:asin", get(catalog_details))
}
