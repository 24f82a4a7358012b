use axum::{extract::State, http::StatusCode, routing::{get, post}, Json, Router};
use common::{
    JobInfo, WorkerMetrics, WorkerRegisterRequest, WorkerRegisterResponse, HEALTH_PATH, JOB_PATH,
    REGISTER_PATH, WORKERS_PATH,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::remote::{HttpEndpoint, RemoteWorker};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(health))
        .route(JOB_PATH, get(get_job))
        .route(WORKERS_PATH, get(list_workers))
        .route(REGISTER_PATH, post(register_worker))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

// Registra un worker nuevo: cada alta exitosa agrega exactamente un worker ocioso
async fn register_worker(
    State(state): State<AppState>,
    Json(req): Json<WorkerRegisterRequest>,
) -> Result<Json<WorkerRegisterResponse>, StatusCode> {
    let endpoint = req.endpoint.trim();
    if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
        warn!("registro rechazado, endpoint inválido: {:?}", req.endpoint);
        return Err(StatusCode::BAD_REQUEST);
    }

    let worker_id = uuid::Uuid::new_v4().to_string();
    let remote = RemoteWorker::new(
        worker_id.clone(),
        Arc::new(HttpEndpoint::new(
            state.client.clone(),
            endpoint,
            state.call_timeout,
        )),
    );
    state.pool.register(remote, req.hostname);

    info!(
        "{} workers registrados, {} ociosos",
        state.pool.registered_count(),
        state.pool.idle_count()
    );

    Ok(Json(WorkerRegisterResponse {
        worker_id,
        layout: state.layout.clone(),
    }))
}

async fn list_workers(State(state): State<AppState>) -> Json<Vec<WorkerMetrics>> {
    Json(state.pool.metrics())
}

// Estado del job en curso
async fn get_job(State(state): State<AppState>) -> Json<JobInfo> {
    let job = state.job.lock().unwrap_or_else(|e| e.into_inner()).clone();
    Json(job)
}
