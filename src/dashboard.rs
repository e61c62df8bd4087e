use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::error::PoolError;
use crate::manager::ResourceManager;
use crate::scheduler::job::{Job, JobOutcome, JobSpec};

#[derive(Clone)]
pub struct DashboardState {
    pub manager: Arc<ResourceManager>,
}

#[derive(Serialize)]
struct JobResponse {
    id: String,
    hardware_type: String,
    capabilities: Vec<String>,
    priority: i32,
    status: String,
    requester: String,
    assigned_bench: Option<String>,
    lease_id: Option<String>,
    failure_reason: Option<String>,
}

impl JobResponse {
    fn of(job: &Job) -> Self {
        let mut capabilities: Vec<String> = job.capabilities.iter().cloned().collect();
        capabilities.sort();
        Self {
            id: job.id.to_string(),
            hardware_type: job.hardware_type.clone(),
            capabilities,
            priority: job.priority,
            status: job.status.to_string(),
            requester: job.requester.clone(),
            assigned_bench: job.assigned_bench.clone(),
            lease_id: job.lease_id.map(|id| id.to_string()),
            failure_reason: job.failure_reason.clone(),
        }
    }
}

#[derive(Serialize)]
struct SubmitJobResponse {
    success: bool,
    job_id: Option<String>,
    error: Option<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_status(error: &PoolError) -> StatusCode {
    match error {
        PoolError::NoCompatibleBench(_) => StatusCode::UNPROCESSABLE_ENTITY,
        PoolError::JobNotCancellable(_)
        | PoolError::JobNotAllocated(_)
        | PoolError::LeaseExpired(_) => StatusCode::CONFLICT,
        PoolError::JobNotFound(_) | PoolError::UnknownBench(_) => StatusCode::NOT_FOUND,
        PoolError::DuplicateBench(_) | PoolError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Read-mostly HTTP surface for dashboards and operators.
pub async fn run_dashboard(addr: SocketAddr, state: DashboardState) {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/benches", get(list_benches_handler))
        .route("/api/benches/:id/clear-maintenance", post(clear_maintenance_handler))
        .route("/api/jobs", get(list_jobs_handler))
        .route("/api/jobs", post(submit_job_handler))
        .route("/api/jobs/:id", get(job_status_handler))
        .route("/api/jobs/:id/cancel", post(cancel_job_handler))
        .route("/api/jobs/:id/outcome", post(report_outcome_handler))
        .layer(cors)
        .with_state(state);

    tracing::info!(addr = %addr, "Starting dashboard server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind dashboard server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "Dashboard server failed");
    }
}

async fn list_benches_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    Json(state.manager.list_bench_statuses().await)
}

async fn list_jobs_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    let jobs: Vec<JobResponse> = state
        .manager
        .list_jobs()
        .await
        .iter()
        .map(JobResponse::of)
        .collect();
    Json(jobs)
}

async fn submit_job_handler(
    State(state): State<DashboardState>,
    Json(spec): Json<JobSpec>,
) -> impl IntoResponse {
    match state.manager.submit(spec).await {
        Ok(job_id) => (
            StatusCode::OK,
            Json(SubmitJobResponse {
                success: true,
                job_id: Some(job_id.to_string()),
                error: None,
            }),
        ),
        Err(e) => (
            error_status(&e),
            Json(SubmitJobResponse {
                success: false,
                job_id: None,
                error: Some(e.to_string()),
            }),
        ),
    }
}

async fn job_status_handler(
    State(state): State<DashboardState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.manager.status(id).await {
        Ok(job) => (StatusCode::OK, Json(JobResponse::of(&job))).into_response(),
        Err(e) => (
            error_status(&e),
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
    }
}

async fn cancel_job_handler(
    State(state): State<DashboardState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.manager.cancel(id).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => (
            error_status(&e),
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
    }
}

async fn report_outcome_handler(
    State(state): State<DashboardState>,
    Path(id): Path<Uuid>,
    Json(outcome): Json<JobOutcome>,
) -> impl IntoResponse {
    match state.manager.report_outcome(id, outcome).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => (
            error_status(&e),
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
    }
}

async fn clear_maintenance_handler(
    State(state): State<DashboardState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.manager.clear_maintenance(&id).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => (
            error_status(&e),
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
    }
}
