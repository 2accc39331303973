use axum::{
    extract::{Path, State},
    response::Response,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use venturelab_core::{
    validate_length, validate_range, validate_uuid, Feature, StudentProfile, Validate,
    ValidationError,
};

use super::{enforce_rate_limit, with_rate_limit_headers, ValidatedJson};
use crate::audit::{SecurityEvent, SecurityLogger};
use crate::auth::{AccessTier, AuthContext};
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct XpGrantRequest {
    pub amount: i64,
    pub reason: String,
}

impl Validate for XpGrantRequest {
    /// Shape only; the amount ceiling is configuration and is checked by
    /// [`XpGrantRequest::amount_within`].
    fn validate(&self) -> Result<(), ValidationError> {
        validate_length("reason", &self.reason, 3, 200)?;
        validate_range("amount", self.amount, 1, i64::MAX)?;
        Ok(())
    }
}

impl XpGrantRequest {
    fn amount_within(&self, max_grant: u64) -> Result<u64, ValidationError> {
        let max = i64::try_from(max_grant).unwrap_or(i64::MAX);
        let amount = validate_range("amount", self.amount, 1, max)?;
        Ok(amount.unsigned_abs())
    }
}

#[derive(Debug, Serialize)]
pub struct XpGrantResponse {
    pub user_id: Uuid,
    pub granted: u64,
    pub reason: String,
    pub xp: u64,
    pub level: u32,
}

/// School admins may only reach students of their own school. An unknown id
/// looks the same to them as a student of another school.
fn reachable_student(
    caller: &AuthContext,
    user_id: Uuid,
    student: Option<StudentProfile>,
) -> Result<StudentProfile, ApiError> {
    if caller.is_admin() {
        return student.ok_or_else(|| ApiError::NotFound("student".to_string()));
    }
    match student {
        Some(student)
            if caller.school_id.is_some() && caller.school_id == student.school_id =>
        {
            Ok(student)
        }
        _ => {
            SecurityLogger::log_event(SecurityEvent::PermissionDenied {
                user_id: caller.user_id,
                resource: format!("students/{}", user_id),
                required_tier: "same_school".to_string(),
            });
            Err(ApiError::Forbidden(
                "student belongs to another school".to_string(),
            ))
        }
    }
}

pub async fn grant_xp(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<String>,
    ValidatedJson(request): ValidatedJson<XpGrantRequest>,
) -> ApiResult<Response> {
    let resource = format!("/api/admin/students/{}/xp", user_id);
    auth.require(AccessTier::SchoolAdmin, &resource)?;

    let user_id = validate_uuid("user_id", &user_id)?;
    let amount = request.amount_within(state.settings.progression.max_xp_grant)?;

    let decision = enforce_rate_limit(&state, auth.user_id, Feature::Admin)?;

    let student = state.backend.get_profile(user_id).await?;
    reachable_student(&auth, user_id, student)?;

    let profile = state.backend.add_xp(user_id, amount).await?;
    metrics::record_xp("grant", amount);

    SecurityLogger::log_event(SecurityEvent::AdminAccess {
        user_id: auth.user_id,
        action: format!("grant_xp:{}:{}", amount, request.reason.trim()),
        resource,
    });

    Ok(with_rate_limit_headers(
        Json(XpGrantResponse {
            user_id,
            granted: amount,
            reason: request.reason.trim().to_string(),
            xp: profile.xp,
            level: profile.level,
        }),
        &decision,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use venturelab_core::Role;

    fn caller(role: Role, school_id: Option<Uuid>) -> AuthContext {
        AuthContext {
            user_id: Uuid::new_v4(),
            email: None,
            roles: vec![role],
            school_id,
            expires_at: None,
        }
    }

    #[test]
    fn test_amount_bounds() {
        let grant = |amount| XpGrantRequest {
            amount,
            reason: "Won the science fair".into(),
        };
        assert!(grant(0).validate().is_err());
        assert!(grant(-5).validate().is_err());
        assert_eq!(grant(1000).amount_within(1000).unwrap(), 1000);
        assert!(grant(1001).amount_within(1000).is_err());

        let short = XpGrantRequest {
            amount: 10,
            reason: "ok".into(),
        };
        assert!(short.validate().is_err());
    }

    #[test]
    fn test_school_scoping() {
        let school = Uuid::new_v4();
        let mut student = StudentProfile::new(Uuid::new_v4(), "Sam Lee");
        student.school_id = Some(school);
        let id = student.user_id;
        let check = |caller: AuthContext, student: &StudentProfile| {
            reachable_student(&caller, id, Some(student.clone()))
        };

        assert!(check(caller(Role::SchoolAdmin, Some(school)), &student).is_ok());
        assert!(check(caller(Role::SchoolAdmin, Some(Uuid::new_v4())), &student).is_err());
        assert!(check(caller(Role::SchoolAdmin, None), &student).is_err());
        assert!(check(caller(Role::Admin, None), &student).is_ok());

        student.school_id = None;
        assert!(check(caller(Role::SchoolAdmin, Some(school)), &student).is_err());
        assert!(check(caller(Role::SchoolAdmin, None), &student).is_err());
    }

    #[test]
    fn test_unknown_student_hidden_from_school_admins() {
        let missing = Uuid::new_v4();
        let err = reachable_student(&caller(Role::SchoolAdmin, Some(Uuid::new_v4())), missing, None)
            .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::FORBIDDEN);

        let err = reachable_student(&caller(Role::Admin, None), missing, None).unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::NOT_FOUND);
    }
}
