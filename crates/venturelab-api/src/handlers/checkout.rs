use axum::{extract::State, response::Response, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;
use venturelab_core::{
    apply_discount, normalize_coupon_code, validate_uuid, Feature, Quote, Validate,
    ValidationError,
};

use super::{enforce_rate_limit, with_rate_limit_headers, ValidatedJson};
use crate::auth::AuthContext;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct QuoteRequest {
    pub plan_id: String,
    #[serde(default)]
    pub coupon_code: Option<String>,
}

impl QuoteRequest {
    /// Normalised coupon code; a blank field counts as no coupon.
    fn coupon(&self) -> Result<Option<String>, ValidationError> {
        self.coupon_code
            .as_deref()
            .filter(|code| !code.trim().is_empty())
            .map(normalize_coupon_code)
            .transpose()
    }
}

impl Validate for QuoteRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        validate_uuid("plan_id", &self.plan_id)?;
        self.coupon()?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct QuoteResponse {
    pub plan_id: Uuid,
    pub plan_name: String,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon_code: Option<String>,
    #[serde(flatten)]
    pub quote: Quote,
}

pub async fn checkout_quote(
    State(state): State<AppState>,
    auth: AuthContext,
    ValidatedJson(request): ValidatedJson<QuoteRequest>,
) -> ApiResult<Response> {
    let plan_id = validate_uuid("plan_id", &request.plan_id)?;
    let coupon_code = request.coupon()?;

    let decision = enforce_rate_limit(&state, auth.user_id, Feature::Checkout)?;

    let plan = state
        .backend
        .get_plan(plan_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("plan".to_string()))?;

    let quote = match &coupon_code {
        None => Quote::full_price(plan.price_cents),
        Some(code) => {
            let coupon = state
                .backend
                .find_coupon(code)
                .await?
                .ok_or_else(|| ApiError::NotFound("coupon".to_string()))?;
            if !coupon.is_redeemable(Utc::now()) {
                return Err(ApiError::BadRequest(format!(
                    "coupon {} is no longer valid",
                    code
                )));
            }
            apply_discount(plan.price_cents, &coupon.discount)?
        }
    };

    debug!(
        user_id = %auth.user_id,
        %plan_id,
        coupon = ?coupon_code,
        final_cents = quote.final_cents,
        "Checkout quote"
    );

    Ok(with_rate_limit_headers(
        Json(QuoteResponse {
            plan_id: plan.id,
            plan_name: plan.name,
            currency: plan.currency,
            coupon_code,
            quote,
        }),
        &decision,
    ))
}
