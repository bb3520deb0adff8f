use super::auth::AuthUser;
use super::error::ApiError;
use crate::pipeline::{enqueue_upload, IntakeRequest};
use crate::server::AppContext;
use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use stemforged_common::{JobId, JobSource, JobStatus};
use stemforged_db::models::Job;
use stemforged_db::pool::get_conn;
use stemforged_db::queries::jobs;

const DEFAULT_PAGE_SIZE: u32 = 100;
const MAX_PAGE_SIZE: u32 = 1000;

pub fn api_routes() -> Router<AppContext> {
    Router::new()
        .route("/upload", post(upload))
        .route("/jobs", get(list_jobs))
        .route("/jobs/:id", get(get_job))
        .route("/tools", get(get_tools))
}

pub async fn health(State(ctx): State<AppContext>) -> impl IntoResponse {
    let stats = ctx.state.stats();
    let queue = get_conn(&ctx.db)
        .and_then(|conn| jobs::count_by_status(&conn))
        .map(|counts| {
            counts
                .into_iter()
                .map(|(status, n)| (status.as_str().to_string(), serde_json::Value::from(n)))
                .collect::<serde_json::Map<_, _>>()
        })
        .unwrap_or_default();

    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "stats": {
            "total_processed": stats.total_processed,
            "completed": stats.completed,
            "failed": stats.failed,
            "retries": stats.retries,
            "success_rate": stats.success_rate(),
            "jobs": queue,
        }
    }))
}

/// Job as returned by the API.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobView {
    pub id: JobId,
    pub filename: String,
    pub original_filename: String,
    pub status: JobStatus,
    pub error: Option<String>,
    pub last_error: Option<String>,
    pub source: JobSource,
    pub stem_types: String,
    pub retries: RetryCounts,
    pub output_path: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RetryCounts {
    pub metadata: u32,
    pub separation: u32,
    pub packaging: u32,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            filename: job.filename.clone(),
            original_filename: job.original_filename.clone(),
            status: job.status,
            error: job.error.clone(),
            last_error: job.last_error.clone(),
            source: job.source,
            stem_types: job.settings.stem_types.clone(),
            retries: RetryCounts {
                metadata: job.metadata_retries,
                separation: job.separation_retries,
                packaging: job.packaging_retries,
            },
            output_path: job.output_path.clone(),
            created_at: job.created_at.to_rfc3339(),
            updated_at: job.updated_at.to_rfc3339(),
            completed_at: job.completed_at.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Serialize)]
struct UploadResponse {
    status: &'static str,
    message: &'static str,
    filename: String,
    job_id: JobId,
}

async fn upload(
    State(ctx): State<AppContext>,
    Extension(user): Extension<AuthUser>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut stem_types: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?
    {
        match field.name() {
            Some("file") => {
                let name = field.file_name().unwrap_or_default().to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()))?;
                file = Some((name, data.to_vec()));
            }
            Some("stem_types") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()))?;
                stem_types = Some(text);
            }
            _ => {}
        }
    }

    let (name, data) = file.ok_or_else(|| ApiError::bad_request("No file part"))?;
    if name.trim().is_empty() {
        return Err(ApiError::bad_request("No selected file"));
    }

    let request = IntakeRequest::new(name, JobSource::Upload).with_stems(stem_types);
    let job = enqueue_upload(&ctx.pipeline, request, data).await?;
    tracing::debug!("Upload {} accepted from '{}'", job.id, user.view().username);

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadResponse {
            status: "success",
            message: "File uploaded successfully",
            filename: job.filename,
            job_id: job.id,
        }),
    ))
}

#[derive(Deserialize)]
struct ListJobsQuery {
    status: Option<String>,
    limit: Option<u32>,
    offset: Option<u32>,
}

#[derive(Serialize)]
struct JobList {
    jobs: Vec<JobView>,
    total: u64,
}

async fn list_jobs(
    State(ctx): State<AppContext>,
    Query(params): Query<ListJobsQuery>,
) -> Result<Json<JobList>, ApiError> {
    let status = params
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<JobStatus>)
        .transpose()
        .map_err(ApiError::bad_request)?;
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
    let offset = params.offset.unwrap_or(0);

    let conn = get_conn(&ctx.db)?;
    let rows = jobs::list_jobs(&conn, status, limit, offset)?;
    let total = jobs::count_jobs(&conn, status)?;

    Ok(Json(JobList {
        jobs: rows.iter().map(JobView::from).collect(),
        total,
    }))
}

async fn get_job(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<JobView>, ApiError> {
    let not_found = || ApiError::from(stemforged_common::Error::not_found("Job"));
    let id: JobId = id.parse().map_err(|_| not_found())?;

    let conn = get_conn(&ctx.db)?;
    let job = jobs::get_job(&conn, id)?.ok_or_else(not_found)?;
    Ok(Json(JobView::from(&job)))
}

#[derive(Serialize)]
struct ToolView {
    name: String,
    available: bool,
    version: Option<String>,
    path: Option<String>,
}

async fn get_tools() -> Result<Json<Vec<ToolView>>, ApiError> {
    let tools = tokio::task::spawn_blocking(stemforged_av::check_tools)
        .await
        .map_err(|e| ApiError::internal(format!("Tool check failed: {}", e)))?;

    Ok(Json(
        tools
            .into_iter()
            .map(|t| ToolView {
                name: t.name,
                available: t.available,
                version: t.version,
                path: t.path.map(|p| p.display().to_string()),
            })
            .collect(),
    ))
}
