use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc, time::Duration};
use thiserror::Error;
use uuid::Uuid;
use venturelab_core::{AuthConfig, AuthMode, Role};

use crate::audit::{SecurityEvent, SecurityLogger};
use crate::error::ApiError;
use crate::middleware::security::client_ip_string;
use crate::AppState;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Auth service unavailable: {0}")]
    Upstream(String),

    #[error("Auth misconfigured: {0}")]
    Config(String),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingToken | AuthError::InvalidToken(_) => {
                ApiError::Unauthorized(err.to_string())
            }
            AuthError::Upstream(_) | AuthError::Config(_) => ApiError::Internal(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessTier {
    Authenticated,
    SchoolAdmin,
    Admin,
}

impl fmt::Display for AccessTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessTier::Authenticated => write!(f, "authenticated"),
            AccessTier::SchoolAdmin => write!(f, "school_admin"),
            AccessTier::Admin => write!(f, "admin"),
        }
    }
}

/// The verified caller, attached to the request by [`require_auth`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub roles: Vec<Role>,
    pub school_id: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthContext {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(Role::Admin)
    }

    pub fn satisfies(&self, tier: AccessTier) -> bool {
        match tier {
            AccessTier::Authenticated => true,
            AccessTier::SchoolAdmin => self.is_admin() || self.has_role(Role::SchoolAdmin),
            AccessTier::Admin => self.is_admin(),
        }
    }

    pub fn require(&self, tier: AccessTier, resource: &str) -> Result<(), ApiError> {
        if self.satisfies(tier) {
            return Ok(());
        }
        SecurityLogger::log_event(SecurityEvent::PermissionDenied {
            user_id: self.user_id,
            resource: resource.to_string(),
            required_tier: tier.to_string(),
        });
        Err(ApiError::Forbidden(format!("{} access required", tier)))
    }
}

impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or_else(|| ApiError::Unauthorized(AuthError::MissingToken.to_string()))
    }
}

#[derive(Debug, Default, Deserialize)]
struct AppMetadata {
    #[serde(default)]
    roles: Vec<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    school_id: Option<Uuid>,
}

impl AppMetadata {
    /// Unknown role names are ignored; everyone is at least a student.
    fn roles(&self) -> Vec<Role> {
        let mut roles: Vec<Role> = Vec::new();
        for role in self
            .roles
            .iter()
            .map(String::as_str)
            .chain(self.role.as_deref())
            .filter_map(Role::parse)
        {
            if !roles.contains(&role) {
                roles.push(role);
            }
        }
        if roles.is_empty() {
            roles.push(Role::Student);
        }
        roles
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    exp: i64,
    #[serde(default)]
    app_metadata: AppMetadata,
}

#[async_trait]
pub trait AuthVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<AuthContext, AuthError>;

    fn method(&self) -> &'static str;
}

/// Verifies HS256 tokens locally with the project's JWT secret.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str, audience: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[audience]);
        validation.set_required_spec_claims(&["exp", "sub", "aud"]);
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

#[async_trait]
impl AuthVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<AuthContext, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        let claims = data.claims;
        let user_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| AuthError::InvalidToken("subject is not a UUID".into()))?;

        Ok(AuthContext {
            user_id,
            email: claims.email,
            roles: claims.app_metadata.roles(),
            school_id: claims.app_metadata.school_id,
            expires_at: DateTime::from_timestamp(claims.exp, 0),
        })
    }

    fn method(&self) -> &'static str {
        "jwt"
    }
}

#[derive(Debug, Deserialize)]
struct RemoteUser {
    id: Uuid,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    app_metadata: AppMetadata,
}

/// Asks the hosted auth service (`GET {url}/user`) who owns the token.
pub struct RemoteAuthVerifier {
    user_url: String,
    anon_key: String,
    client: Client,
}

impl RemoteAuthVerifier {
    pub fn new(base_url: &str, anon_key: &str, timeout: Duration) -> Result<Self, AuthError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Config(e.to_string()))?;
        Ok(Self {
            user_url: format!("{}/user", base_url.trim_end_matches('/')),
            anon_key: anon_key.to_string(),
            client,
        })
    }
}

#[async_trait]
impl AuthVerifier for RemoteAuthVerifier {
    async fn verify(&self, token: &str) -> Result<AuthContext, AuthError> {
        let response = self
            .client
            .get(&self.user_url)
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AuthError::Upstream(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(AuthError::InvalidToken(format!(
                "auth service rejected token ({})",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            return Err(AuthError::Upstream(format!(
                "auth service returned {}",
                status.as_u16()
            )));
        }

        let user: RemoteUser = response
            .json()
            .await
            .map_err(|e| AuthError::Upstream(e.to_string()))?;
        Ok(AuthContext {
            user_id: user.id,
            email: user.email,
            roles: user.app_metadata.roles(),
            school_id: user.app_metadata.school_id,
            expires_at: None,
        })
    }

    fn method(&self) -> &'static str {
        "remote"
    }
}

pub fn verifier_from_settings(config: &AuthConfig) -> Result<Arc<dyn AuthVerifier>, AuthError> {
    match config.mode {
        AuthMode::Jwt => {
            let secret = config
                .jwt_secret()
                .ok_or_else(|| AuthError::Config("auth.jwt_secret is not set".into()))?;
            Ok(Arc::new(JwtVerifier::new(secret, &config.audience)))
        }
        AuthMode::Remote => {
            let url = config
                .url
                .as_deref()
                .ok_or_else(|| AuthError::Config("auth.url is not set".into()))?;
            let anon_key = config
                .anon_key()
                .ok_or_else(|| AuthError::Config("auth.anon_key is not set".into()))?;
            Ok(Arc::new(RemoteAuthVerifier::new(
                url,
                anon_key,
                Duration::from_secs(config.timeout_secs),
            )?))
        }
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            value
                .strip_prefix("Bearer ")
                .or_else(|| value.strip_prefix("bearer "))
        })
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Rejects the request with 401 unless it carries a verifiable bearer token.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let client_ip = client_ip_string(&req);

    let Some(token) = bearer_token(req.headers()) else {
        SecurityLogger::log_event(SecurityEvent::AuthenticationFailure {
            ip_address: client_ip,
            reason: "No authentication provided".to_string(),
        });
        return Err(AuthError::MissingToken.into());
    };

    match state.auth.verify(token).await {
        Ok(auth_context) => {
            SecurityLogger::log_event(SecurityEvent::AuthenticationSuccess {
                user_id: auth_context.user_id,
                ip_address: client_ip,
                method: state.auth.method(),
            });
            req.extensions_mut().insert(auth_context);
            Ok(next.run(req).await)
        }
        Err(e) => {
            SecurityLogger::log_event(SecurityEvent::AuthenticationFailure {
                ip_address: client_ip,
                reason: e.to_string(),
            });
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::Upstream;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &str = "unit-test-secret-that-is-long-enough!!";

    fn mint(claims: serde_json::Value, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn exp() -> i64 {
        (Utc::now() + chrono::TimeDelta::hours(1)).timestamp()
    }

    #[tokio::test]
    async fn test_jwt_verifier_reads_app_metadata() {
        let user_id = Uuid::new_v4();
        let school_id = Uuid::new_v4();
        let token = mint(
            json!({
                "sub": user_id,
                "aud": "authenticated",
                "exp": exp(),
                "email": "maya@example.com",
                "app_metadata": { "roles": ["school_admin", "wizard"], "school_id": school_id }
            }),
            SECRET,
        );

        let ctx = JwtVerifier::new(SECRET, "authenticated")
            .verify(&token)
            .await
            .unwrap();
        assert_eq!(ctx.user_id, user_id);
        assert_eq!(ctx.roles, vec![Role::SchoolAdmin]);
        assert_eq!(ctx.school_id, Some(school_id));
        assert!(ctx.satisfies(AccessTier::SchoolAdmin));
        assert!(!ctx.satisfies(AccessTier::Admin));
    }

    #[tokio::test]
    async fn test_jwt_verifier_rejects_bad_tokens() {
        let verifier = JwtVerifier::new(SECRET, "authenticated");
        let sub = Uuid::new_v4();

        let wrong_secret = mint(
            json!({ "sub": sub, "aud": "authenticated", "exp": exp() }),
            "another-secret-that-is-also-long-enough",
        );
        assert!(verifier.verify(&wrong_secret).await.is_err());

        let wrong_aud = mint(json!({ "sub": sub, "aud": "anon", "exp": exp() }), SECRET);
        assert!(verifier.verify(&wrong_aud).await.is_err());

        let expired = mint(
            json!({ "sub": sub, "aud": "authenticated", "exp": Utc::now().timestamp() - 3600 }),
            SECRET,
        );
        assert!(verifier.verify(&expired).await.is_err());

        let not_uuid = mint(
            json!({ "sub": "user-1", "aud": "authenticated", "exp": exp() }),
            SECRET,
        );
        assert!(matches!(
            verifier.verify(&not_uuid).await,
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_roles_default_to_student() {
        let metadata = AppMetadata::default();
        assert_eq!(metadata.roles(), vec![Role::Student]);

        let metadata = AppMetadata {
            roles: vec![],
            role: Some("admin".into()),
            school_id: None,
        };
        assert_eq!(metadata.roles(), vec![Role::Admin]);
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, "Bearer abc.def".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc.def"));

        headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, "Bearer   ".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_admin_satisfies_every_tier() {
        let ctx = AuthContext {
            user_id: Uuid::new_v4(),
            email: None,
            roles: vec![Role::Admin],
            school_id: None,
            expires_at: None,
        };
        for tier in [
            AccessTier::Authenticated,
            AccessTier::SchoolAdmin,
            AccessTier::Admin,
        ] {
            assert!(ctx.satisfies(tier));
        }
    }

    #[tokio::test]
    async fn test_remote_verifier_asks_auth_service() {
        let user_id = Uuid::new_v4();
        let school_id = Uuid::new_v4();
        let upstream = Upstream::start(
            StatusCode::OK,
            json!({
                "id": user_id,
                "email": "maya@example.com",
                "app_metadata": { "roles": ["school_admin"], "school_id": school_id }
            }),
        )
        .await;

        let verifier = RemoteAuthVerifier::new(
            &format!("{}/auth/v1/", upstream.url),
            "anon-key",
            Duration::from_secs(5),
        )
        .unwrap();
        let ctx = verifier.verify("user.jwt.token").await.unwrap();
        assert_eq!(ctx.user_id, user_id);
        assert_eq!(ctx.roles, vec![Role::SchoolAdmin]);
        assert_eq!(ctx.school_id, Some(school_id));

        let seen = upstream.only_request();
        assert_eq!(seen.method, axum::http::Method::GET);
        assert_eq!(seen.path, "/auth/v1/user");
        assert_eq!(seen.header("apikey"), "anon-key");
        assert_eq!(seen.header("authorization"), "Bearer user.jwt.token");
    }

    #[tokio::test]
    async fn test_remote_verifier_maps_rejections() {
        let rejected =
            Upstream::start(StatusCode::UNAUTHORIZED, json!({ "msg": "invalid JWT" })).await;
        let verifier =
            RemoteAuthVerifier::new(&rejected.url, "anon-key", Duration::from_secs(5)).unwrap();
        assert!(matches!(
            verifier.verify("stale").await,
            Err(AuthError::InvalidToken(_))
        ));

        let broken = Upstream::start(StatusCode::BAD_GATEWAY, json!({})).await;
        let verifier =
            RemoteAuthVerifier::new(&broken.url, "anon-key", Duration::from_secs(5)).unwrap();
        assert!(matches!(
            verifier.verify("token").await,
            Err(AuthError::Upstream(_))
        ));
    }
}
