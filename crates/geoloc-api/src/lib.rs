//! Geoloc API /v1: REST endpoints over the location-reasoning pipeline
pub mod config;
pub mod handlers;
pub mod metrics;
pub mod middleware;

use std::sync::Arc;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use geoloc_clients::{ChatCompletionsClient, HttpObjectDetector, HttpQueryExecutor};
use geoloc_stages::{Collaborators, GeolocPipeline};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::handlers::AppState;
use crate::metrics::Metrics;

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/v1/locate", post(handlers::locate))
        .route("/v1/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .layer(axum::middleware::from_fn(middleware::log_requests))
        .layer(middleware::cors())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Wires the HTTP collaborators named in `config` into a pipeline.
pub fn build_state(config: &AppConfig) -> anyhow::Result<AppState> {
    let generator = ChatCompletionsClient::new(config.llm.client_config()?)?;
    let detector = HttpObjectDetector::new(config.detector.clone())?;
    let executor = HttpQueryExecutor::new(config.query_executor.clone())?;

    let pipeline = GeolocPipeline::new(
        Collaborators {
            generator: Arc::new(generator),
            detector: Arc::new(detector),
            executor: Arc::new(executor),
        },
        config.pipeline.options()?,
    )?;
    let metrics = Metrics::new().context("Failed to register metrics")?;

    Ok(AppState {
        pipeline: Arc::new(pipeline),
        metrics: Arc::new(metrics),
    })
}

pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let app = create_app(build_state(&config)?);
    let addr = config.server.addr.as_str();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Geoloc API listening on {}", addr);
    axum::serve(listener, app).await.context("Server error")
}
