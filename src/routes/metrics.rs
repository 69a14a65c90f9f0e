use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Prometheus metrics scrape endpoint.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

/// Register descriptions for the job metrics.
pub fn describe() {
    metrics::describe_counter!("download_jobs_total", "Total download jobs submitted");
    metrics::describe_counter!("download_jobs_completed", "Total download jobs completed");
    metrics::describe_counter!("download_jobs_failed", "Total download jobs that failed, by error kind");
    metrics::describe_gauge!("download_queue_depth", "Jobs waiting for a worker slot");
    metrics::describe_gauge!("download_jobs_running", "Jobs currently running");
    metrics::describe_histogram!("download_job_seconds", "Time spent running a download job");
}
