use std::sync::Arc;

use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use media_fetch::app_state::AppState;
use media_fetch::config::AppConfig;
use media_fetch::routes;
use media_fetch::services::{extractor::YtDlpExtractor, storage::FileStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env()?;

    tracing::info!("Initializing media-fetch server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = Arc::new(PrometheusBuilder::new().install_recorder()?);
    routes::metrics::describe();

    tracing::info!(dir = %config.download_dir.display(), "Opening download directory");
    let storage = FileStore::new(&config.download_dir).await?;

    let extractor = YtDlpExtractor::new(
        config.ytdlp_path.clone(),
        config.ffmpeg_path.clone(),
        config.rate_limit_bytes,
        config.socket_timeout(),
    );
    if !extractor.is_available() {
        tracing::warn!(
            path = %config.ytdlp_path.display(),
            "yt-dlp not found, downloads will fail until it is installed"
        );
    }

    let state = AppState::new(
        storage,
        Arc::new(extractor),
        config.worker_count,
        config.job_timeout(),
        config.max_queue_len,
        config.max_batch_size,
    );
    let pool = state.pool.clone();
    let pool_handle = pool.start();

    let app = routes::router(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(1024 * 1024)); // 1 MB limit

    tracing::info!("Starting media-fetch on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    pool.shutdown();
    let _ = pool_handle.await;

    Ok(())
}
