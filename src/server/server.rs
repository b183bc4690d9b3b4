use anyhow::{Context, Result};
use std::time::{Duration, Instant};

use axum::{
    extract::State,
    middleware,
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::services::ServeDir;
use tracing::{error, info};

use super::metrics::metrics_handler;
use super::upload_routes::upload_routes;
use super::{log_requests, state::*, ServerConfig};
use crate::conversion::StrategyKind;

const INDEX_HTML: &str = include_str!("index.html");

#[derive(Serialize)]
struct HealthResponse {
    pub status: &'static str,
    pub converter_found: bool,
    pub converter_path: Option<String>,
    pub platform: &'static str,
    pub arch: &'static str,
    pub version: &'static str,
    pub uptime: String,
    pub strategies: Vec<StrategyKind>,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home() -> impl IntoResponse {
    Html(INDEX_HTML)
}

async fn health(State(state): State<ServerState>) -> impl IntoResponse {
    let converter_path = state.office_locator.locate();
    Json(HealthResponse {
        status: "ok",
        converter_found: converter_path.is_some(),
        converter_path: converter_path.map(|p| p.display().to_string()),
        platform: std::env::consts::OS,
        arch: std::env::consts::ARCH,
        version: env!("CARGO_PKG_VERSION"),
        uptime: format_uptime(state.start_time.elapsed()),
        strategies: state.pipeline.strategy_kinds(),
    })
}

pub fn make_app(
    config: ServerConfig,
    pipeline: GuardedPipeline,
    office_locator: GuardedOfficeLocator,
) -> Result<Router> {
    let state = ServerState {
        config: config.clone(),
        start_time: Instant::now(),
        pipeline,
        office_locator,
    };

    let api_routes: Router = upload_routes(config.max_upload_bytes)
        .route("/health", get(health))
        .with_state(state.clone());

    let home_router: Router = match &config.frontend_dir_path {
        Some(frontend_path) => {
            let static_files_service =
                ServeDir::new(frontend_path).append_index_html_on_directories(true);
            Router::new().fallback_service(static_files_service)
        }
        None => Router::new().route("/", get(home)),
    };

    let app: Router = home_router
        .merge(api_routes)
        .nest_service("/downloads", ServeDir::new(&config.output_dir))
        .layer(middleware::from_fn_with_state(state, log_requests));

    Ok(app)
}

pub fn make_metrics_app() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

pub async fn run_server(
    config: ServerConfig,
    pipeline: GuardedPipeline,
    office_locator: GuardedOfficeLocator,
) -> Result<()> {
    let port = config.port;
    let metrics_port = config.metrics_port;
    let app = make_app(config, pipeline, office_locator)?;

    let metrics_listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", metrics_port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", metrics_port))?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(metrics_listener, make_metrics_app()).await {
            error!("Metrics server failed: {}", e);
        }
    });

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
