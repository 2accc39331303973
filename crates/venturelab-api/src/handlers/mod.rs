//! One module per edge function. Shared request plumbing lives here.

use axum::{
    extract::{FromRequest, Request},
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use uuid::Uuid;
use venturelab_core::{Feature, ModerationVerdict, RateLimitDecision, RateLimitKey, Validate};

use crate::audit::{SecurityEvent, SecurityLogger};
use crate::error::{insert_rate_limit_headers, ApiError};
use crate::metrics;
use crate::AppState;

pub mod admin;
pub mod chat;
pub mod checkout;
pub mod health;
pub mod me;
pub mod progress;
pub mod tank;

pub use admin::grant_xp;
pub use chat::coach_chat;
pub use checkout::checkout_quote;
pub use health::{health, metrics_handler};
pub use me::get_me;
pub use progress::update_progress;
pub use tank::score_pitch;

/// JSON body that has passed its [`Validate`] checks. Malformed JSON and
/// failed validation both come back as a 400 JSON error.
#[derive(Debug)]
pub struct ValidatedJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
        value.validate()?;
        Ok(Self(value))
    }
}

/// Counts one request against the caller's window for `feature`.
pub fn enforce_rate_limit(
    state: &AppState,
    user_id: Uuid,
    feature: Feature,
) -> Result<RateLimitDecision, ApiError> {
    let limit = state.settings.rate_limits.limit_for(feature);
    let decision = state
        .limiter
        .check(&RateLimitKey::for_feature(user_id, feature), limit);

    if !decision.allowed {
        SecurityLogger::log_event(SecurityEvent::RateLimitExceeded {
            user_id: Some(user_id),
            ip_address: "-".to_string(),
            feature: feature.to_string(),
        });
        metrics::record_rate_limited(feature.as_str());
        return Err(ApiError::RateLimited(decision));
    }
    Ok(decision)
}

/// Runs the input filter over `texts` and returns the first blocking verdict,
/// or the merged suspicious categories.
pub fn moderate_input<'a>(
    state: &AppState,
    user_id: Uuid,
    feature: Feature,
    texts: impl IntoIterator<Item = &'a str>,
) -> ModerationVerdict {
    let mut flagged: Vec<String> = Vec::new();

    for text in texts {
        match state.filter.check(text) {
            ModerationVerdict::Blocked { category } => {
                metrics::record_moderation("blocked", "input");
                SecurityLogger::log_event(SecurityEvent::ContentBlocked {
                    user_id,
                    feature: feature.to_string(),
                    stage: "input",
                    category: category.clone(),
                });
                return ModerationVerdict::Blocked { category };
            }
            ModerationVerdict::Suspicious { categories } => {
                for category in categories {
                    if !flagged.contains(&category) {
                        flagged.push(category);
                    }
                }
            }
            ModerationVerdict::Allowed => {}
        }
    }

    if flagged.is_empty() {
        metrics::record_moderation("allowed", "input");
        ModerationVerdict::Allowed
    } else {
        metrics::record_moderation("suspicious", "input");
        SecurityLogger::log_event(SecurityEvent::ContentFlagged {
            user_id,
            feature: feature.to_string(),
            categories: flagged.clone(),
        });
        ModerationVerdict::Suspicious {
            categories: flagged,
        }
    }
}

/// Applies the output filter to a model reply. Returns the text to send and
/// whether it was replaced.
pub fn moderate_output(
    state: &AppState,
    user_id: Uuid,
    feature: Feature,
    reply: String,
) -> (String, bool) {
    match state.filter.check_output(&reply) {
        ModerationVerdict::Blocked { category } => {
            metrics::record_moderation("blocked", "output");
            SecurityLogger::log_event(SecurityEvent::ContentBlocked {
                user_id,
                feature: feature.to_string(),
                stage: "output",
                category,
            });
            (state.filter.refusal_message().to_string(), true)
        }
        verdict => {
            metrics::record_moderation(verdict.kind(), "output");
            (reply, false)
        }
    }
}

pub fn with_rate_limit_headers(response: impl IntoResponse, decision: &RateLimitDecision) -> Response {
    let mut response = response.into_response();
    insert_rate_limit_headers(response.headers_mut(), decision);
    response
}
