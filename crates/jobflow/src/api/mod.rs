use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use tracing::{error, info};

use crate::error::StoreError;
use crate::jobs::Store;
use crate::metrics::MetricsSink;
use crate::worker::Registry;

pub mod models;

use models::{ErrorBody, JobResponse, ListQuery, ListResponse, SubmitRequest, SubmitResponse};

const DEFAULT_PAGE_LIMIT: i64 = 10;

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<Store>,
    pub registry: Arc<Registry>,
}

/// Submission and query façade.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/v1/jobs", get(list_jobs).post(submit_job))
        .route("/v1/jobs/dead", get(list_dead))
        .route("/v1/jobs/:id", get(get_job))
        .route("/v1/stats", get(stats))
        .route("/health", get(health))
        .with_state(state)
}

#[derive(Clone)]
pub struct MetricsState {
    pub store: Arc<Store>,
    pub sink: Arc<MetricsSink>,
}

/// Observability listener, served on its own port.
pub fn metrics_router(state: MetricsState) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .with_state(state)
}

fn store_err(err: StoreError) -> (StatusCode, Json<ErrorBody>) {
    match err {
        StoreError::NotFound => (
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: "job not found".into(),
            }),
        ),
        StoreError::Database(err) => {
            error!(%err, "store query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    error: "internal error".into(),
                }),
            )
        }
    }
}

fn invalid_argument(msg: &str) -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody { error: msg.into() }),
    )
}

async fn submit_job(
    State(state): State<ApiState>,
    Json(req): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), (StatusCode, Json<ErrorBody>)> {
    if req.job_type.trim().is_empty() {
        return Err(invalid_argument("job type is required"));
    }
    if !state.registry.has(&req.job_type) {
        return Err(invalid_argument(&format!(
            "unknown job type: {}",
            req.job_type
        )));
    }

    let payload = if req.payload.is_empty() {
        "{}"
    } else {
        req.payload.as_str()
    };

    let job = state
        .store
        .create_job(&req.job_type, payload)
        .await
        .map_err(store_err)?;

    info!(job_id = job.id, job_type = %job.job_type, "job submitted");

    Ok((
        StatusCode::CREATED,
        Json(SubmitResponse {
            job_id: job.id.to_string(),
            status: job.status,
        }),
    ))
}

async fn get_job(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<JobResponse>, (StatusCode, Json<ErrorBody>)> {
    let job = state.store.get_job(id).await.map_err(store_err)?;
    Ok(Json(JobResponse::from(job)))
}

async fn list_jobs(
    State(state): State<ApiState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>, (StatusCode, Json<ErrorBody>)> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    let offset = query.offset.unwrap_or(0);

    let page = state
        .store
        .list_jobs(limit, offset)
        .await
        .map_err(store_err)?;

    Ok(Json(ListResponse {
        jobs: page.jobs.into_iter().map(JobResponse::from).collect(),
        meta: page.meta,
    }))
}

async fn list_dead(
    State(state): State<ApiState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>, (StatusCode, Json<ErrorBody>)> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    let offset = query.offset.unwrap_or(0);

    let page = state
        .store
        .list_dead(limit, offset)
        .await
        .map_err(store_err)?;

    Ok(Json(ListResponse {
        jobs: page.jobs.into_iter().map(JobResponse::from).collect(),
        meta: page.meta,
    }))
}

async fn stats(
    State(state): State<ApiState>,
) -> Result<Json<crate::jobs::JobStats>, (StatusCode, Json<ErrorBody>)> {
    let stats = state.store.get_stats().await.map_err(store_err)?;
    Ok(Json(stats))
}

async fn metrics(State(state): State<MetricsState>) -> impl IntoResponse {
    match state.store.get_stats().await {
        Ok(stats) => (StatusCode::OK, state.sink.render_prometheus(&stats)),
        Err(err) => {
            error!(%err, "stats query for metrics failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "metrics unavailable\n".to_string(),
            )
        }
    }
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
