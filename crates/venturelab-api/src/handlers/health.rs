use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;

use crate::error::ApiError;
use crate::metrics;
use crate::AppState;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "backend": state.backend.backend_name(),
        "llm": {
            "provider": state.llm.provider_name(),
            "model": state.llm.model_name(),
        },
        "rate_limit_windows": state.limiter.len(),
    }))
}

pub async fn metrics_handler() -> Result<impl IntoResponse, ApiError> {
    let body = metrics::gather_text().map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}
