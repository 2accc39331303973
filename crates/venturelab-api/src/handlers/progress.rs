use axum::{
    extract::{Path, State},
    response::Response,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;
use venturelab_core::{
    validate_choice, validate_range, validate_uuid, Feature, MissionProgress, MissionStatus,
    Validate, ValidationError,
};

use super::{enforce_rate_limit, with_rate_limit_headers, ValidatedJson};
use crate::auth::AuthContext;
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::AppState;

const SETTABLE_STATUSES: [&str; 2] = ["in_progress", "completed"];

#[derive(Debug, Deserialize)]
pub struct ProgressRequest {
    pub status: String,
    #[serde(default)]
    pub score: Option<i64>,
}

impl Validate for ProgressRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        validate_choice("status", &self.status, &SETTABLE_STATUSES)?;
        if let Some(score) = self.score {
            validate_range("score", score, 0, 100)?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub progress: MissionProgress,
    pub changed: bool,
    pub xp_awarded: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_xp: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
}

/// Moves `current` to `next`, stamping start and completion times the first
/// time each is reached.
fn advance(current: &MissionProgress, next: MissionStatus, score: Option<u8>) -> MissionProgress {
    let now = Utc::now();
    let mut updated = current.clone();
    updated.status = next;
    if matches!(next, MissionStatus::InProgress | MissionStatus::Completed)
        && updated.started_at.is_none()
    {
        updated.started_at = Some(now);
    }
    if next == MissionStatus::Completed && updated.completed_at.is_none() {
        updated.completed_at = Some(now);
    }
    if score.is_some() {
        updated.score = score;
    }
    updated.updated_at = now;
    updated
}

/// Rounds of read-then-conditional-write before a contended update gives up.
const MAX_TRANSITION_ATTEMPTS: usize = 3;

/// Outcome of applying a requested status to the stored row.
enum Transition {
    Unchanged(MissionProgress),
    Moved {
        from: MissionStatus,
        stored: MissionProgress,
    },
}

/// Reads the row, checks the move, and writes it only if no other request
/// changed the row in between. A lost race re-reads, so a repeated
/// completion resolves to `Unchanged` instead of a second write.
async fn apply_transition(
    state: &AppState,
    user_id: Uuid,
    mission_id: Uuid,
    next: MissionStatus,
    score: Option<u8>,
) -> ApiResult<Transition> {
    for _ in 0..MAX_TRANSITION_ATTEMPTS {
        let row = state
            .backend
            .get_mission_progress(user_id, mission_id)
            .await?;
        let expected = row.as_ref().map(|r| r.status);
        // Missions without a row have been unlocked by the curriculum but not started.
        let current =
            row.unwrap_or_else(|| MissionProgress::new(user_id, mission_id, MissionStatus::Available));

        if !current.status.can_transition_to(next) {
            return Err(ApiError::Conflict(format!(
                "mission cannot move from {} to {}",
                current.status, next
            )));
        }
        if current.status == next {
            return Ok(Transition::Unchanged(current));
        }

        let updated = advance(&current, next, score);
        if let Some(stored) = state
            .backend
            .transition_mission_progress(&updated, expected)
            .await?
        {
            return Ok(Transition::Moved {
                from: current.status,
                stored,
            });
        }
        debug!(%user_id, %mission_id, "Mission progress changed underneath; retrying");
    }

    Err(ApiError::Conflict(
        "mission progress is being updated concurrently".to_string(),
    ))
}

pub async fn update_progress(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(mission_id): Path<String>,
    ValidatedJson(request): ValidatedJson<ProgressRequest>,
) -> ApiResult<Response> {
    let mission_id = validate_uuid("mission_id", &mission_id)?;
    let next = MissionStatus::parse(&request.status)?;
    let score = request.score.and_then(|s| u8::try_from(s).ok());

    let decision = enforce_rate_limit(&state, auth.user_id, Feature::Progress)?;

    let (from, stored) =
        match apply_transition(&state, auth.user_id, mission_id, next, score).await? {
            Transition::Unchanged(current) => {
                return Ok(with_rate_limit_headers(
                    Json(ProgressResponse {
                        progress: current,
                        changed: false,
                        xp_awarded: 0,
                        total_xp: None,
                        level: None,
                    }),
                    &decision,
                ));
            }
            Transition::Moved { from, stored } => (from, stored),
        };

    let mut response = ProgressResponse {
        progress: stored,
        changed: true,
        xp_awarded: 0,
        total_xp: None,
        level: None,
    };

    if next == MissionStatus::Completed {
        let xp = state.settings.progression.mission_completion_xp;
        let profile = state.backend.add_xp(auth.user_id, xp).await?;
        metrics::record_xp("mission", xp);
        response.xp_awarded = xp;
        response.total_xp = Some(profile.xp);
        response.level = Some(profile.level);
    }

    info!(
        user_id = %auth.user_id,
        %mission_id,
        %from,
        to = %next,
        xp_awarded = response.xp_awarded,
        "Mission progress updated"
    );

    Ok(with_rate_limit_headers(Json(response), &decision))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_validation() {
        let ok = ProgressRequest {
            status: "completed".into(),
            score: Some(100),
        };
        assert!(ok.validate().is_ok());

        let locked = ProgressRequest {
            status: "locked".into(),
            score: None,
        };
        assert!(locked.validate().is_err());

        let negative = ProgressRequest {
            status: "in_progress".into(),
            score: Some(-1),
        };
        assert!(negative.validate().is_err());
    }

    #[test]
    fn test_advance_stamps_times_once() {
        let row = MissionProgress::new(Uuid::new_v4(), Uuid::new_v4(), MissionStatus::Available);

        let started = advance(&row, MissionStatus::InProgress, None);
        assert!(started.started_at.is_some());
        assert!(started.completed_at.is_none());

        let done = advance(&started, MissionStatus::Completed, Some(88));
        assert_eq!(done.started_at, started.started_at);
        assert!(done.completed_at.is_some());
        assert_eq!(done.score, Some(88));

        let direct = advance(&row, MissionStatus::Completed, None);
        assert!(direct.started_at.is_some());
        assert_eq!(direct.score, None);
    }
}
