use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::json;
use thiserror::Error;
use tracing::error;
use venturelab_ai::GatewayError;
use venturelab_core::{RateLimitDecision, ValidationError, VentureLabError};

use crate::backend::BackendError;

pub const UPSTREAM_ERROR_MESSAGE: &str = "Upstream service error";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Input rejected by moderation; the message is the refusal shown to the user.
    #[error("{0}")]
    Moderated(String),

    #[error("Rate limit exceeded")]
    RateLimited(RateLimitDecision),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Backend error: {0}")]
    Backend(BackendError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<VentureLabError> for ApiError {
    fn from(err: VentureLabError) -> Self {
        match err {
            VentureLabError::Validation(e) => ApiError::Validation(e),
            VentureLabError::NotFound(what) => ApiError::NotFound(what),
            VentureLabError::InvalidTransition(msg) => ApiError::Conflict(msg),
            VentureLabError::InvalidOperation(msg) => ApiError::BadRequest(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<BackendError> for ApiError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NotFound(what) => ApiError::NotFound(what),
            other => ApiError::Backend(other),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::BadRequest(_) | ApiError::Moderated(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Gateway(_) | ApiError::Backend(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        let message = match &self {
            // Upstream detail stays in the logs.
            ApiError::Gateway(_) | ApiError::Backend(_) | ApiError::Internal(_) => {
                error!(error = %self, "Request failed on upstream dependency");
                UPSTREAM_ERROR_MESSAGE.to_string()
            }
            _ => self.to_string(),
        };

        let mut body = json!({
            "error": message,
            "status": status.as_u16()
        });

        if matches!(self, ApiError::Moderated(_)) {
            body["moderated"] = json!(true);
        }

        let mut retry_after = None;
        if let ApiError::RateLimited(decision) = &self {
            let secs = decision.retry_after_secs(Utc::now());
            body["retry_after_secs"] = json!(secs);
            body["reset_at"] = json!(decision.reset_at.to_rfc3339());
            retry_after = Some((secs, *decision));
        }

        let mut response = (status, Json(body)).into_response();

        if let Some((secs, decision)) = retry_after {
            let headers = response.headers_mut();
            headers.insert(header::RETRY_AFTER, HeaderValue::from(secs));
            insert_rate_limit_headers(headers, &decision);
        }

        response
    }
}

pub fn insert_rate_limit_headers(headers: &mut axum::http::HeaderMap, decision: &RateLimitDecision) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert(
        "x-ratelimit-reset",
        HeaderValue::from(decision.reset_at.timestamp().max(0)),
    );
}

pub type ApiResult<T> = Result<T, ApiError>;
