use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;
use venturelab_core::{
    level_for_xp, BackendConfig, Coupon, MissionProgress, MissionStatus, Plan, StudentProfile,
    TankSubmission,
};

use super::{Backend, BackendError, BackendResult};

const PROFILES: &str = "profiles";
const MISSION_PROGRESS: &str = "mission_progress";
const TANK_SUBMISSIONS: &str = "tank_submissions";
const PLANS: &str = "plans";
const COUPONS: &str = "coupons";

const RETURN_ROWS: &str = "return=representation";
const INSERT_IF_ABSENT: &str = "resolution=ignore-duplicates,return=representation";

/// Client for the hosted database's PostgREST interface, authenticated with
/// the service-role key.
pub struct RestBackend {
    base_url: String,
    service_key: String,
    client: Client,
}

impl RestBackend {
    pub fn new(
        base_url: impl Into<String>,
        service_key: impl Into<String>,
        timeout: Duration,
    ) -> BackendResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            service_key: service_key.into(),
            client,
        })
    }

    pub fn from_settings(config: &BackendConfig) -> BackendResult<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| BackendError::Config("backend.url is not set".into()))?;
        let key = config
            .service_key()
            .ok_or_else(|| BackendError::Config("backend.service_key is not set".into()))?;
        Self::new(url, key, Duration::from_secs(config.timeout_secs))
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    async fn check(response: Response) -> BackendResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), "Backend request failed");
        Err(BackendError::Status {
            status: status.as_u16(),
            body: body.chars().take(512).collect(),
        })
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> BackendResult<T> {
        response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }

    /// `GET /rest/v1/{table}?{col}=eq.{value}` returning at most one row.
    async fn select_one<T: DeserializeOwned>(
        &self,
        table: &str,
        filters: &[(&str, String)],
    ) -> BackendResult<Option<T>> {
        let mut query: Vec<(&str, String)> = filters
            .iter()
            .map(|(column, value)| (*column, format!("eq.{}", value)))
            .collect();
        query.push(("select", "*".to_string()));
        query.push(("limit", "1".to_string()));

        debug!(table, "Selecting row");
        let request = self.client.get(self.table_url(table)).query(&query);
        let response = Self::check(self.authorized(request).send().await?).await?;
        let rows: Vec<T> = Self::decode(response).await?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl Backend for RestBackend {
    async fn get_profile(&self, user_id: Uuid) -> BackendResult<Option<StudentProfile>> {
        self.select_one(PROFILES, &[("user_id", user_id.to_string())])
            .await
    }

    async fn add_xp(&self, user_id: Uuid, amount: u64) -> BackendResult<StudentProfile> {
        let request = self
            .client
            .post(format!("{}/rest/v1/rpc/award_xp", self.base_url))
            .json(&json!({ "p_user_id": user_id, "p_amount": amount }));
        let response = Self::check(self.authorized(request).send().await?).await?;

        let body: serde_json::Value = Self::decode(response).await?;
        let row = match body {
            serde_json::Value::Array(mut rows) if !rows.is_empty() => rows.swap_remove(0),
            serde_json::Value::Object(_) => body,
            _ => return Err(BackendError::NotFound(format!("profile {}", user_id))),
        };
        let mut profile: StudentProfile =
            serde_json::from_value(row).map_err(|e| BackendError::Decode(e.to_string()))?;
        profile.level = level_for_xp(profile.xp);
        Ok(profile)
    }

    async fn get_mission_progress(
        &self,
        user_id: Uuid,
        mission_id: Uuid,
    ) -> BackendResult<Option<MissionProgress>> {
        self.select_one(
            MISSION_PROGRESS,
            &[
                ("user_id", user_id.to_string()),
                ("mission_id", mission_id.to_string()),
            ],
        )
        .await
    }

    /// A conditional `PATCH` filtered on the expected status, or an insert
    /// that ignores an existing row. Either way an empty representation means
    /// another writer moved the row first.
    async fn transition_mission_progress(
        &self,
        next: &MissionProgress,
        expected: Option<MissionStatus>,
    ) -> BackendResult<Option<MissionProgress>> {
        let request = match expected {
            Some(from) => self
                .client
                .patch(self.table_url(MISSION_PROGRESS))
                .query(&[
                    ("user_id", format!("eq.{}", next.user_id)),
                    ("mission_id", format!("eq.{}", next.mission_id)),
                    ("status", format!("eq.{}", from)),
                ])
                .header("Prefer", RETURN_ROWS),
            None => self
                .client
                .post(self.table_url(MISSION_PROGRESS))
                .query(&[("on_conflict", "user_id,mission_id")])
                .header("Prefer", INSERT_IF_ABSENT),
        };
        let response = Self::check(self.authorized(request.json(next)).send().await?).await?;
        let rows: Vec<MissionProgress> = Self::decode(response).await?;
        Ok(rows.into_iter().next())
    }

    async fn insert_tank_submission(&self, submission: &TankSubmission) -> BackendResult<()> {
        let request = self
            .client
            .post(self.table_url(TANK_SUBMISSIONS))
            .header("Prefer", "return=minimal")
            .json(submission);
        Self::check(self.authorized(request).send().await?).await?;
        Ok(())
    }

    async fn get_plan(&self, plan_id: Uuid) -> BackendResult<Option<Plan>> {
        self.select_one(PLANS, &[("id", plan_id.to_string())]).await
    }

    async fn find_coupon(&self, code: &str) -> BackendResult<Option<Coupon>> {
        self.select_one(COUPONS, &[("code", code.to_string())]).await
    }

    fn backend_name(&self) -> &str {
        "rest"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::Upstream;
    use axum::http::{Method, StatusCode};
    use secrecy::SecretString;
    use serde_json::Value;

    const KEY: &str = "service-role-key";

    fn client(upstream: &Upstream) -> RestBackend {
        RestBackend::new(&upstream.url, KEY, Duration::from_secs(5)).unwrap()
    }

    fn profile_row(user_id: Uuid, xp: u64) -> Value {
        serde_json::to_value(StudentProfile {
            xp,
            level: 1,
            ..StudentProfile::new(user_id, "Maya Chen")
        })
        .unwrap()
    }

    #[test]
    fn test_from_settings_requires_url_and_key() {
        let mut config = BackendConfig::default();
        assert!(matches!(
            RestBackend::from_settings(&config),
            Err(BackendError::Config(_))
        ));

        config.url = Some("https://db.example.com/".into());
        config.service_key = Some(SecretString::from("service-role"));
        let backend = RestBackend::from_settings(&config).unwrap();
        assert_eq!(
            backend.table_url(PROFILES),
            "https://db.example.com/rest/v1/profiles"
        );
    }

    #[tokio::test]
    async fn test_select_uses_eq_filters_and_service_key() {
        let user_id = Uuid::new_v4();
        let upstream = Upstream::start(StatusCode::OK, json!([profile_row(user_id, 120)])).await;

        let profile = client(&upstream).get_profile(user_id).await.unwrap().unwrap();
        assert_eq!(profile.xp, 120);

        let seen = upstream.only_request();
        assert_eq!(seen.method, Method::GET);
        assert_eq!(seen.path, "/rest/v1/profiles");
        let query = seen.query_pairs();
        assert!(query.contains(&("user_id".into(), format!("eq.{}", user_id))));
        assert!(query.contains(&("limit".into(), "1".into())));
        assert_eq!(seen.header("apikey"), KEY);
        assert_eq!(seen.header("authorization"), format!("Bearer {}", KEY));
    }

    #[tokio::test]
    async fn test_empty_select_is_none() {
        let upstream = Upstream::start(StatusCode::OK, json!([])).await;
        let coupon = client(&upstream).find_coupon("SPRING25").await.unwrap();
        assert!(coupon.is_none());

        let query = upstream.only_request().query_pairs();
        assert!(query.contains(&("code".into(), "eq.SPRING25".into())));
    }

    #[tokio::test]
    async fn test_award_xp_calls_rpc_and_recomputes_level() {
        let user_id = Uuid::new_v4();
        let upstream = Upstream::start(StatusCode::OK, profile_row(user_id, 450)).await;

        let profile = client(&upstream).add_xp(user_id, 70).await.unwrap();
        assert_eq!(profile.level, 3);

        let seen = upstream.only_request();
        assert_eq!(seen.method, Method::POST);
        assert_eq!(seen.path, "/rest/v1/rpc/award_xp");
        assert_eq!(
            seen.body,
            json!({ "p_user_id": user_id.to_string(), "p_amount": 70 })
        );
    }

    #[tokio::test]
    async fn test_award_xp_empty_result_is_not_found() {
        let upstream = Upstream::start(StatusCode::OK, json!([])).await;
        let result = client(&upstream).add_xp(Uuid::new_v4(), 10).await;
        assert!(matches!(result, Err(BackendError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_transition_patches_only_from_expected_status() {
        let (user, mission) = (Uuid::new_v4(), Uuid::new_v4());
        let row = MissionProgress::new(user, mission, MissionStatus::Completed);
        let upstream = Upstream::start(StatusCode::OK, json!([row])).await;

        let stored = client(&upstream)
            .transition_mission_progress(&row, Some(MissionStatus::InProgress))
            .await
            .unwrap();
        assert_eq!(stored.map(|r| r.status), Some(MissionStatus::Completed));

        let seen = upstream.only_request();
        assert_eq!(seen.method, Method::PATCH);
        assert_eq!(seen.path, "/rest/v1/mission_progress");
        let query = seen.query_pairs();
        assert!(query.contains(&("user_id".into(), format!("eq.{}", user))));
        assert!(query.contains(&("mission_id".into(), format!("eq.{}", mission))));
        assert!(query.contains(&("status".into(), "eq.in_progress".into())));
        assert_eq!(seen.header("prefer"), "return=representation");
        assert_eq!(seen.body["status"], "completed");
    }

    #[tokio::test]
    async fn test_transition_first_write_ignores_existing_row() {
        let row = MissionProgress::new(Uuid::new_v4(), Uuid::new_v4(), MissionStatus::InProgress);
        let upstream = Upstream::start(StatusCode::CREATED, json!([])).await;

        let stored = client(&upstream)
            .transition_mission_progress(&row, None)
            .await
            .unwrap();
        assert!(stored.is_none());

        let seen = upstream.only_request();
        assert_eq!(seen.method, Method::POST);
        assert!(seen
            .query_pairs()
            .contains(&("on_conflict".into(), "user_id,mission_id".into())));
        assert_eq!(
            seen.header("prefer"),
            "resolution=ignore-duplicates,return=representation"
        );
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let upstream =
            Upstream::start(StatusCode::SERVICE_UNAVAILABLE, json!({ "message": "down" })).await;
        let result = client(&upstream).get_plan(Uuid::new_v4()).await;
        assert!(matches!(result, Err(BackendError::Status { status: 503, .. })));
    }
}
