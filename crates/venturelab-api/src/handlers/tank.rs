use axum::{extract::State, response::Response, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;
use venturelab_ai::{parse_pitch_score, tank_scoring_messages, GenerationConfig};
use venturelab_core::{
    pitch_xp, validate_duration_secs, validate_http_url, validate_length, validate_uuid, Feature,
    PitchScore, TankSubmission, Validate, ValidationError,
};

use super::{enforce_rate_limit, moderate_input, with_rate_limit_headers, ValidatedJson};
use crate::audit::{SecurityEvent, SecurityLogger};
use crate::auth::AuthContext;
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::AppState;

pub const MIN_PITCH_CHARS: usize = 50;
pub const MAX_PITCH_CHARS: usize = 5000;
pub const MAX_PITCH_DURATION_SECS: f64 = 600.0;

const SCORING_TEMPERATURE: f32 = 0.2;

#[derive(Debug, Deserialize)]
pub struct TankRequest {
    pub pitch: String,
    #[serde(default)]
    pub mission_id: Option<String>,
    #[serde(default)]
    pub duration_secs: Option<f64>,
    #[serde(default)]
    pub video_url: Option<String>,
}

impl Validate for TankRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        validate_length("pitch", &self.pitch, MIN_PITCH_CHARS, MAX_PITCH_CHARS)?;
        if let Some(mission_id) = &self.mission_id {
            validate_uuid("mission_id", mission_id)?;
        }
        if let Some(duration) = self.duration_secs {
            validate_duration_secs("duration_secs", duration, MAX_PITCH_DURATION_SECS)?;
        }
        if let Some(url) = &self.video_url {
            validate_http_url("video_url", url)?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct TankResponse {
    pub submission_id: Uuid,
    pub score: PitchScore,
    pub xp_awarded: u64,
    pub total_xp: u64,
    pub level: u32,
    pub xp_to_next_level: u64,
}

/// Replaces any model-written text that trips the output filter.
fn moderate_score_text(state: &AppState, user_id: Uuid, score: &mut PitchScore) {
    let combined = std::iter::once(score.feedback.as_str())
        .chain(score.strengths.iter().map(String::as_str))
        .chain(score.improvements.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join("\n");

    if let venturelab_core::ModerationVerdict::Blocked { category } =
        state.filter.check_output(&combined)
    {
        metrics::record_moderation("blocked", "output");
        SecurityLogger::log_event(SecurityEvent::ContentBlocked {
            user_id,
            feature: Feature::Tank.to_string(),
            stage: "output",
            category,
        });
        score.feedback = state.filter.refusal_message().to_string();
        score.strengths.clear();
        score.improvements.clear();
    } else {
        metrics::record_moderation("allowed", "output");
    }
}

pub async fn score_pitch(
    State(state): State<AppState>,
    auth: AuthContext,
    ValidatedJson(request): ValidatedJson<TankRequest>,
) -> ApiResult<Response> {
    let decision = enforce_rate_limit(&state, auth.user_id, Feature::Tank)?;

    let verdict = moderate_input(&state, auth.user_id, Feature::Tank, [request.pitch.as_str()]);
    if verdict.is_blocked() {
        return Err(ApiError::Moderated(
            state.filter.refusal_message().to_string(),
        ));
    }

    // The profile must exist before the gateway is called.
    state
        .backend
        .get_profile(auth.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("profile".to_string()))?;

    let config = GenerationConfig {
        temperature: SCORING_TEMPERATURE,
        max_tokens: Some(state.settings.llm.max_tokens),
        json_response: true,
    };
    metrics::record_llm_request("tank");
    let completion = state
        .llm
        .generate_chat(&tank_scoring_messages(&request.pitch), &config)
        .await
        .map_err(|e| {
            metrics::record_llm_failure("tank");
            ApiError::from(e)
        })?;

    let mut score = parse_pitch_score(&completion.content).map_err(|e| {
        metrics::record_llm_failure("tank");
        warn!(user_id = %auth.user_id, error = %e, "Unusable pitch score reply");
        ApiError::from(e)
    })?;
    moderate_score_text(&state, auth.user_id, &mut score);

    let xp_awarded = pitch_xp(score.overall);
    let submission = TankSubmission {
        id: Uuid::new_v4(),
        user_id: auth.user_id,
        mission_id: request
            .mission_id
            .as_deref()
            .map(|id| validate_uuid("mission_id", id))
            .transpose()?,
        pitch: request.pitch.trim().to_string(),
        duration_secs: request.duration_secs,
        video_url: request.video_url.clone(),
        score: score.clone(),
        xp_awarded,
        created_at: Utc::now(),
    };
    // XP first: a failed award must not leave a submission claiming it.
    let profile = state.backend.add_xp(auth.user_id, xp_awarded).await?;
    metrics::record_xp("tank", xp_awarded);
    state.backend.insert_tank_submission(&submission).await?;

    info!(
        user_id = %auth.user_id,
        submission_id = %submission.id,
        overall = score.overall,
        xp_awarded,
        "Pitch scored"
    );

    Ok(with_rate_limit_headers(
        Json(TankResponse {
            submission_id: submission.id,
            score,
            xp_awarded,
            total_xp: profile.xp,
            level: profile.level,
            xp_to_next_level: profile.xp_to_next_level(),
        }),
        &decision,
    ))
}
