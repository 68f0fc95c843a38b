//! Conversion and job management API handlers
//!
//! POST /convert validates synchronously and returns 202 with a job id; the
//! conversion itself runs as a detached task and is observed through the
//! jobs endpoints.

use axum::{
    body::Body,
    extract::{Path as AxumPath, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::db::{Job, JobKind, JobStatus, JobStore};
use crate::dispatch;
use crate::error::{ApiError, ApiResult};
use crate::services::naming::{self, FolderStats};
use crate::AppState;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 500;
const DEFAULT_SWEEP_DAYS: i64 = 7;

/// GET /folders response
#[derive(Debug, Serialize)]
pub struct FoldersResponse {
    pub folders: Vec<FolderStats>,
}

/// GET /folders
///
/// List immediate subfolders of the source directory that contain at least
/// one eligible audio file.
pub async fn list_folders(State(state): State<AppState>) -> ApiResult<Json<FoldersResponse>> {
    let source_dir = state.config.source_dir();
    let mut folders = Vec::new();

    if source_dir.is_dir() {
        let entries = std::fs::read_dir(&source_dir)
            .map_err(|e| ApiError::Internal(format!("Cannot read source directory: {}", e)))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            if let Some(stats) = naming::folder_stats(&path, &state.config.input_extensions) {
                folders.push(stats);
            }
        }
    }

    folders.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(Json(FoldersResponse { folders }))
}

/// POST /convert request
#[derive(Debug, Deserialize)]
pub struct ConvertRequest {
    pub folders: Vec<String>,
    #[serde(default)]
    pub output_filename: Option<String>,
}

/// Job creation response, also used by POST /files/:id/tag
#[derive(Debug, Serialize)]
pub struct JobCreatedResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
}

/// POST /convert
///
/// Folders may be absolute paths or names relative to the source directory.
pub async fn start_conversion(
    State(state): State<AppState>,
    Json(request): Json<ConvertRequest>,
) -> ApiResult<(StatusCode, Json<JobCreatedResponse>)> {
    if request.folders.is_empty() {
        return Err(ApiError::BadRequest("No source folders given".to_string()));
    }

    let source_dir = state.config.source_dir();
    let mut resolved = Vec::with_capacity(request.folders.len());
    for folder in &request.folders {
        let path = PathBuf::from(folder);
        let path = if path.is_absolute() {
            path
        } else {
            source_dir.join(folder)
        };
        if !path.is_dir() {
            return Err(ApiError::BadRequest(format!(
                "Not a folder: {}",
                path.display()
            )));
        }
        if naming::find_eligible_files(&path, &state.config.input_extensions).is_empty() {
            return Err(ApiError::BadRequest(format!(
                "No eligible audio files in {}",
                path.display()
            )));
        }
        resolved.push(path.to_string_lossy().to_string());
    }

    let store = JobStore::new(state.db.clone());
    let job = store.create(JobKind::Conversion, &resolved).await?;

    dispatch::spawn_conversion(&state, job.id, resolved, request.output_filename);

    Ok((
        StatusCode::ACCEPTED,
        Json(JobCreatedResponse {
            job_id: job.id,
            status: job.status,
        }),
    ))
}

/// GET /jobs query parameters
#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<String>,
    pub kind: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// GET /jobs response
#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<Job>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// GET /jobs
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Json<JobListResponse>> {
    let status = match query.status.as_deref() {
        Some(s) => Some(
            JobStatus::parse(s)
                .ok_or_else(|| ApiError::BadRequest(format!("Unknown status: {}", s)))?,
        ),
        None => None,
    };
    let kind = match query.kind.as_deref() {
        Some(k) => Some(
            JobKind::parse(k).ok_or_else(|| ApiError::BadRequest(format!("Unknown kind: {}", k)))?,
        ),
        None => None,
    };

    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0).max(0);

    let store = JobStore::new(state.db.clone());
    let jobs = store.list(status, kind, limit, offset).await?;
    let total = store.count(status, kind).await?;

    Ok(Json(JobListResponse {
        jobs,
        total,
        limit,
        offset,
    }))
}

/// GET /jobs/:id
pub async fn get_job(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<Uuid>,
) -> ApiResult<Json<Job>> {
    let store = JobStore::new(state.db.clone());
    let job = store
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No job with id {}", id)))?;
    Ok(Json(job))
}

/// DELETE /jobs/:id
pub async fn delete_job(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<Uuid>,
) -> ApiResult<StatusCode> {
    let store = JobStore::new(state.db.clone());
    if store.delete(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("No job with id {}", id)))
    }
}

/// GET /jobs/:id/download
///
/// Stream a completed conversion's artifact. 400 while the job is still in
/// flight, 404 if the job or its output file is gone.
pub async fn download_job_output(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<Uuid>,
) -> ApiResult<Response> {
    let store = JobStore::new(state.db.clone());
    let job = store
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No job with id {}", id)))?;

    if job.status != JobStatus::Completed {
        return Err(ApiError::BadRequest(format!(
            "Job is not completed, current status: {}",
            job.status.as_str()
        )));
    }

    let output_path = job
        .output_path
        .filter(|p| Path::new(p).is_file())
        .ok_or_else(|| ApiError::NotFound("Output file not found".to_string()))?;

    let file = tokio::fs::File::open(&output_path)
        .await
        .map_err(|e| ApiError::Internal(format!("Cannot open {}: {}", output_path, e)))?;
    let size = file
        .metadata()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .len();

    let filename = Path::new(&output_path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "output.m4b".to_string());

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, header::HeaderValue::from_static("audio/mp4"));
    if let Ok(length) = header::HeaderValue::from_str(&size.to_string()) {
        headers.insert(header::CONTENT_LENGTH, length);
    }
    if let Ok(disposition) =
        header::HeaderValue::from_str(&format!("attachment; filename=\"{}\"", filename))
    {
        headers.insert(header::CONTENT_DISPOSITION, disposition);
    }

    let stream = ReaderStream::new(file);
    Ok((headers, Body::from_stream(stream)).into_response())
}

/// POST /jobs/sweep query parameters
#[derive(Debug, Default, Deserialize)]
pub struct SweepQuery {
    pub days: Option<i64>,
}

/// POST /jobs/sweep response
#[derive(Debug, Serialize)]
pub struct SweepResponse {
    pub removed: u64,
}

/// POST /jobs/sweep?days=N
///
/// Remove terminal jobs older than the given number of days.
pub async fn sweep_jobs(
    State(state): State<AppState>,
    Query(query): Query<SweepQuery>,
) -> ApiResult<Json<SweepResponse>> {
    let days = query.days.unwrap_or(DEFAULT_SWEEP_DAYS);
    if days < 0 {
        return Err(ApiError::BadRequest("days must be non-negative".to_string()));
    }

    let store = JobStore::new(state.db.clone());
    let removed = store.sweep_older_than(days).await?;
    Ok(Json(SweepResponse { removed }))
}

/// Build conversion and job routes
pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/folders", get(list_folders))
        .route("/convert", post(start_conversion))
        .route("/jobs", get(list_jobs))
        .route("/jobs/sweep", post(sweep_jobs))
        .route("/jobs/:id", get(get_job).delete(delete_job))
        .route("/jobs/:id/download", get(download_job_output))
}
