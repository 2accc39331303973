use axum::{extract::State, Json};
use serde::Serialize;
use uuid::Uuid;
use venturelab_core::{Role, StudentProfile};

use crate::auth::AuthContext;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub roles: Vec<Role>,
    pub school_id: Option<Uuid>,
    pub display_name: String,
    pub xp: u64,
    pub level: u32,
    pub xp_to_next_level: u64,
}

impl MeResponse {
    fn new(auth: AuthContext, profile: StudentProfile) -> Self {
        let xp_to_next_level = profile.xp_to_next_level();
        Self {
            user_id: auth.user_id,
            email: auth.email,
            roles: auth.roles,
            school_id: profile.school_id.or(auth.school_id),
            display_name: profile.display_name,
            xp: profile.xp,
            level: profile.level,
            xp_to_next_level,
        }
    }
}

pub async fn get_me(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<Json<MeResponse>> {
    let profile = state
        .backend
        .get_profile(auth.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("profile".to_string()))?;

    Ok(Json(MeResponse::new(auth, profile)))
}
