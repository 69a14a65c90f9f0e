use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::models::download::StateCounts;

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
    pub jobs: StateCounts,
}

#[derive(Serialize, Deserialize)]
pub struct HealthChecks {
    pub storage: ComponentHealth,
    pub workers: WorkerHealth,
}

#[derive(Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
}

#[derive(Serialize, Deserialize)]
pub struct WorkerHealth {
    pub capacity: usize,
    pub idle: usize,
    pub queue_depth: usize,
}

/// GET /health: Download directory status plus queue and job counters.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let start = std::time::Instant::now();

    let storage_check = match tokio::fs::metadata(state.storage.root()).await {
        Ok(meta) if meta.is_dir() && !meta.permissions().readonly() => ComponentHealth {
            status: "ok".to_string(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
        },
        _ => ComponentHealth {
            status: "error".to_string(),
            latency_ms: None,
        },
    };

    let healthy = storage_check.status == "ok";
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if healthy {
            "ok".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            storage: storage_check,
            workers: WorkerHealth {
                capacity: state.pool.capacity(),
                idle: state.pool.idle_slots(),
                queue_depth: state.queue.depth().await,
            },
        },
        jobs: state.tracker.counts().await,
    };

    (status_code, Json(response))
}
