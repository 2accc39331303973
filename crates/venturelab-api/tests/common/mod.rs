#![allow(dead_code)]

use async_trait::async_trait;
use axum_test::TestServer;
use chrono::{TimeDelta, Utc};
use futures::stream;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use secrecy::SecretString;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use venturelab_ai::{
    GatewayError, GenerationConfig, LLMProvider, LLMResponse, LLMResult, Message, TokenStream,
};
use venturelab_api::backend::BackendResult;
use venturelab_api::BackendError;
use venturelab_api::{create_router, AppState, Backend, InMemoryBackend, JwtVerifier};
use venturelab_core::{
    BackendMode, Coupon, MissionProgress, MissionStatus, Plan, Settings, StudentProfile,
    TankSubmission,
};

pub const SECRET: &str = "integration-test-secret-with-32-plus-chars";

/// LLM double that replays canned replies and records what it was sent.
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<String>>,
    tokens: Mutex<Vec<String>>,
    fail: bool,
    calls: AtomicUsize,
    last_messages: Mutex<Vec<Message>>,
}

impl ScriptedLlm {
    pub fn replying(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            ..Default::default()
        }
    }

    pub fn streaming(tokens: &[&str]) -> Self {
        Self {
            tokens: Mutex::new(tokens.iter().map(|t| t.to_string()).collect()),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_messages(&self) -> Vec<Message> {
        self.last_messages.lock().clone()
    }
}

#[async_trait]
impl LLMProvider for ScriptedLlm {
    async fn generate_chat(
        &self,
        messages: &[Message],
        _config: &GenerationConfig,
    ) -> LLMResult<LLMResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_messages.lock() = messages.to_vec();
        if self.fail {
            return Err(GatewayError::Status {
                status: 503,
                body: "upstream down".into(),
            });
        }
        let content = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| "Keep going!".to_string());
        Ok(LLMResponse {
            content,
            total_tokens: Some(42),
            finish_reason: Some("stop".into()),
            model: "scripted".into(),
        })
    }

    async fn stream_chat(
        &self,
        messages: &[Message],
        _config: &GenerationConfig,
    ) -> LLMResult<TokenStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_messages.lock() = messages.to_vec();
        if self.fail {
            return Err(GatewayError::RateLimited);
        }
        let tokens: Vec<LLMResult<String>> = self.tokens.lock().drain(..).map(Ok).collect();
        Ok(Box::pin(stream::iter(tokens)))
    }

    async fn is_available(&self) -> bool {
        !self.fail
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.auth.jwt_secret = Some(SecretString::from(SECRET));
    settings.backend.mode = BackendMode::Memory;
    settings.cors.allowed_origins = vec!["https://app.venturelab.test".to_string()];
    settings
}

pub struct TestApp {
    pub server: TestServer,
    pub backend: Arc<InMemoryBackend>,
    pub llm: Arc<ScriptedLlm>,
}

impl TestApp {
    pub fn new(settings: Settings, backend: InMemoryBackend, llm: ScriptedLlm) -> Self {
        let backend = Arc::new(backend);
        Self::build(settings, backend.clone(), backend, llm)
    }

    /// Serves through [`FaultyBackend`], with `backend` still reachable as
    /// `app.backend` for assertions.
    pub fn with_faults(backend: InMemoryBackend, faults: Faults) -> Self {
        let backend = Arc::new(backend);
        let faulty = Arc::new(FaultyBackend {
            inner: backend.clone(),
            faults,
        });
        Self::build(test_settings(), backend, faulty, ScriptedLlm::default())
    }

    pub fn with_faults_and_llm(backend: InMemoryBackend, faults: Faults, llm: ScriptedLlm) -> Self {
        let backend = Arc::new(backend);
        let faulty = Arc::new(FaultyBackend {
            inner: backend.clone(),
            faults,
        });
        Self::build(test_settings(), backend, faulty, llm)
    }

    fn build(
        settings: Settings,
        backend: Arc<InMemoryBackend>,
        served: Arc<dyn Backend>,
        llm: ScriptedLlm,
    ) -> Self {
        let llm = Arc::new(llm);
        let auth = Arc::new(JwtVerifier::new(SECRET, &settings.auth.audience));
        let state =
            AppState::from_parts(settings, auth, served, llm.clone()).expect("app state");
        let server = TestServer::new(create_router(state)).expect("test server");
        Self {
            server,
            backend,
            llm,
        }
    }

    pub fn with_backend(backend: InMemoryBackend) -> Self {
        Self::new(test_settings(), backend, ScriptedLlm::default())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Faults {
    /// Sleep before every mission-progress read, so overlapping requests
    /// read the same row before either writes.
    pub progress_read_delay: Duration,
    /// `add_xp` fails with a 503 from the store.
    pub fail_xp: bool,
}

/// Wraps the in-memory store with injected delays and failures.
pub struct FaultyBackend {
    inner: Arc<InMemoryBackend>,
    faults: Faults,
}

#[async_trait]
impl Backend for FaultyBackend {
    async fn get_profile(&self, user_id: Uuid) -> BackendResult<Option<StudentProfile>> {
        self.inner.get_profile(user_id).await
    }

    async fn add_xp(&self, user_id: Uuid, amount: u64) -> BackendResult<StudentProfile> {
        if self.faults.fail_xp {
            return Err(BackendError::Status {
                status: 503,
                body: "xp store unavailable".into(),
            });
        }
        self.inner.add_xp(user_id, amount).await
    }

    async fn get_mission_progress(
        &self,
        user_id: Uuid,
        mission_id: Uuid,
    ) -> BackendResult<Option<MissionProgress>> {
        tokio::time::sleep(self.faults.progress_read_delay).await;
        self.inner.get_mission_progress(user_id, mission_id).await
    }

    async fn transition_mission_progress(
        &self,
        next: &MissionProgress,
        expected: Option<MissionStatus>,
    ) -> BackendResult<Option<MissionProgress>> {
        self.inner.transition_mission_progress(next, expected).await
    }

    async fn insert_tank_submission(&self, submission: &TankSubmission) -> BackendResult<()> {
        self.inner.insert_tank_submission(submission).await
    }

    async fn get_plan(&self, plan_id: Uuid) -> BackendResult<Option<Plan>> {
        self.inner.get_plan(plan_id).await
    }

    async fn find_coupon(&self, code: &str) -> BackendResult<Option<Coupon>> {
        self.inner.find_coupon(code).await
    }

    fn backend_name(&self) -> &str {
        "faulty-memory"
    }
}

pub fn token(user_id: Uuid, roles: &[&str], school_id: Option<Uuid>) -> String {
    let claims = json!({
        "sub": user_id,
        "aud": "authenticated",
        "exp": (Utc::now() + TimeDelta::hours(1)).timestamp(),
        "email": "student@example.com",
        "app_metadata": { "roles": roles, "school_id": school_id },
    });
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .expect("token")
}

pub fn student_token(user_id: Uuid) -> String {
    token(user_id, &["student"], None)
}
