//! HTTP API for submitting jobs and watching the fleet.
//!
//! | Route | Purpose |
//! |---|---|
//! | `POST /api/create_job` | generate input files and hand the job to the scheduler |
//! | `POST /api/notify_job_completed` | completion callback from the scheduler |
//! | `GET /api/jobs`, `GET /api/jobs/:job_id` | job records |
//! | `GET /api/cluster` | latest scheduler snapshot |
//! | `POST /api/set_num_workers` | grow the in-process worker pool |

pub mod store;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    extract::{Path as UrlPath, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::JobLimits;
use crate::error::Result;
use crate::gateway::{publish_event, MessageGateway};
use crate::protocol::{FileIndex, SchedulerEvent};
use crate::scheduler::SchedulerSnapshot;
use crate::worker::executor::OUTPUT_FILE_NAME;
use crate::worker::WorkerPool;

pub use store::{JobRecord, JobStatus, JobStore};

/// Upper bound for generated input values.
const MAX_INPUT_VALUE: u32 = 1000;

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<JobStore>,
    pub gateway: Arc<dyn MessageGateway>,
    pub data_dir: PathBuf,
    pub limits: JobLimits,
    pub snapshots: watch::Receiver<SchedulerSnapshot>,
    pub pool: Arc<WorkerPool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateJobRequest {
    num_values: i64,
    num_files: i64,
}

#[derive(Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobIdBody {
    job_id: String,
}

#[derive(Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct NumWorkersBody {
    num_workers: i64,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JobDetailResponse {
    #[serde(flatten)]
    record: JobRecord,
    result: Option<String>,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/create_job", post(create_job_handler))
        .route("/api/notify_job_completed", post(notify_job_completed_handler))
        .route("/api/jobs", get(list_jobs_handler))
        .route("/api/jobs/:job_id", get(get_job_handler))
        .route("/api/cluster", get(cluster_status_handler))
        .route("/api/set_num_workers", post(set_num_workers_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_api(addr: SocketAddr, state: ApiState, cancel: CancellationToken) -> Result<()> {
    let app = router(state);
    tracing::info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

/// Write `num_files` rows of `num_values` random integers under
/// `<data_dir>/<job_id>/` and return their file indices.
pub async fn generate_input_files(
    data_dir: &Path,
    job_id: &str,
    num_values: u64,
    num_files: u64,
) -> Result<Vec<FileIndex>> {
    let job_dir = data_dir.join(job_id);
    tokio::fs::create_dir_all(&job_dir).await?;

    let mut indices = Vec::new();
    for _ in 0..num_files {
        let token = Uuid::new_v4().to_string();
        let contents = random_row(num_values);
        tokio::fs::write(job_dir.join(format!("{}.csv", token)), contents).await?;
        indices.push(FileIndex::File(token));
    }
    Ok(indices)
}

fn random_row(num_values: u64) -> String {
    let mut rng = rand::thread_rng();
    (0..num_values)
        .map(|_| rng.gen_range(1..=MAX_INPUT_VALUE).to_string())
        .collect::<Vec<_>>()
        .join(",")
}

async fn create_job_handler(
    State(state): State<ApiState>,
    Json(payload): Json<CreateJobRequest>,
) -> Response {
    if payload.num_values <= 0 || payload.num_files <= 0 {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Invalid input. numValues and numFiles must be positive numbers.",
        );
    }
    let num_values = payload.num_values as u64;
    let num_files = payload.num_files as u64;
    let limits = state.limits;
    if num_values > limits.max_values_per_file || num_files > limits.max_files_per_job {
        tracing::warn!(num_values, num_files, "Rejected oversized job");
        return error_response(
            StatusCode::BAD_REQUEST,
            format!(
                "Invalid input. numValues must not exceed {} and numFiles must not exceed {}.",
                limits.max_values_per_file, limits.max_files_per_job
            ),
        );
    }

    let job_id = Uuid::new_v4().to_string();
    state
        .store
        .insert(JobRecord::new(job_id.clone(), num_values, num_files))
        .await;

    let indices = match generate_input_files(&state.data_dir, &job_id, num_values, num_files).await {
        Ok(indices) => indices,
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "Failed to create input files");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };
    if let Err(e) = state
        .store
        .set_status(&job_id, JobStatus::InputFilesCreated)
        .await
    {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }

    let event = SchedulerEvent::JobAdded {
        job_id: job_id.clone(),
        num_original_files: num_files,
        num_values,
        unprocessed_file_indices: indices,
    };
    if let Err(e) = publish_event(state.gateway.as_ref(), &event).await {
        tracing::error!(job_id = %job_id, error = %e, "Failed to hand job to scheduler");
        return error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string());
    }
    tracing::info!(job_id = %job_id, num_values, num_files, "Job submitted");

    (StatusCode::OK, Json(JobIdBody { job_id })).into_response()
}

async fn notify_job_completed_handler(
    State(state): State<ApiState>,
    Json(payload): Json<JobIdBody>,
) -> Response {
    match state
        .store
        .set_status(&payload.job_id, JobStatus::Completed)
        .await
    {
        Ok(()) => {
            tracing::info!(job_id = %payload.job_id, "Job marked completed");
            (StatusCode::OK, Json(payload)).into_response()
        }
        Err(e) => error_response(StatusCode::NOT_FOUND, e.to_string()),
    }
}

async fn list_jobs_handler(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.store.list().await)
}

async fn get_job_handler(
    State(state): State<ApiState>,
    UrlPath(job_id): UrlPath<String>,
) -> Response {
    let Some(record) = state.store.get(&job_id).await else {
        return error_response(StatusCode::NOT_FOUND, format!("Unknown job: {}", job_id));
    };

    let result = if record.status == JobStatus::Completed {
        let path = state
            .data_dir
            .join(&job_id)
            .join(format!("{}.csv", OUTPUT_FILE_NAME));
        tokio::fs::read_to_string(path)
            .await
            .ok()
            .map(|contents| contents.trim().to_string())
    } else {
        None
    };

    Json(JobDetailResponse { record, result }).into_response()
}

async fn cluster_status_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let snapshot = state.snapshots.borrow().clone();
    Json(snapshot)
}

async fn set_num_workers_handler(
    State(state): State<ApiState>,
    Json(payload): Json<NumWorkersBody>,
) -> Response {
    if payload.num_workers <= 0 {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Invalid input. numWorkers must be a positive number.",
        );
    }

    match state.pool.scale_to(payload.num_workers as usize).await {
        Ok(started) => {
            tracing::info!(num_workers = payload.num_workers, started, "Worker pool scaled");
            (StatusCode::OK, Json(payload)).into_response()
        }
        Err(e) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
    }
}
