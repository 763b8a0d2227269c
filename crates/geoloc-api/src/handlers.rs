//! API Handlers
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use geoloc_core::{GeolocError, PipelineState, GEOLOC_VERSION};
use geoloc_stages::GeolocPipeline;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<GeolocPipeline>,
    pub metrics: Arc<Metrics>,
}

#[derive(Debug, Deserialize)]
pub struct LocateRequest {
    pub text: String,
    /// Image path or URL understood by the detector
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LocateResponse {
    pub intent: String,
    pub answer: String,
    pub state: PipelineState,
}

/// Error body: `{"error": "<kind>", "message": "..."}`.
pub struct ApiError(pub GeolocError);

impl From<GeolocError> for ApiError {
    fn from(err: GeolocError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            GeolocError::MissingInput(_) => (StatusCode::UNPROCESSABLE_ENTITY, "missing_input"),
            GeolocError::ClassificationAmbiguous(_) => (StatusCode::BAD_GATEWAY, "classification"),
            GeolocError::CollaboratorFailure { .. } => (StatusCode::BAD_GATEWAY, "collaborator"),
            GeolocError::Stage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "stage"),
            GeolocError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config"),
            GeolocError::Template(_) => (StatusCode::INTERNAL_SERVER_ERROR, "template"),
            GeolocError::Serialize(_) => (StatusCode::INTERNAL_SERVER_ERROR, "serialize"),
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        (
            status,
            Json(json!({ "error": kind, "message": self.0.to_string() })),
        )
            .into_response()
    }
}

pub async fn locate(
    State(app): State<AppState>,
    Json(request): Json<LocateRequest>,
) -> Result<Json<LocateResponse>, ApiError> {
    let state = app.pipeline.run(request.text, request.image).await?;
    app.metrics.observe(&state);

    let intent = state
        .intent
        .map(|i| i.as_str().to_string())
        .unwrap_or_default();
    let answer = state.answer().unwrap_or_default().to_string();

    tracing::info!(
        trace_id = %state.trace_id,
        intent = %intent,
        failures = state.failures.len(),
        "locate served"
    );

    Ok(Json(LocateResponse {
        intent,
        answer,
        state,
    }))
}

pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "version": GEOLOC_VERSION })),
    )
}

pub async fn metrics(State(app): State<AppState>) -> Response {
    match app.metrics.encode() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!(error = %err, "metrics encoding failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
