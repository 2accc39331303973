use std::sync::Arc;
use venturelab_ai::{GatewayProvider, LLMProvider};
use venturelab_core::{
    ContentFilter, FixedWindowLimiter, Settings, VentureLabError,
};

use crate::auth::{verifier_from_settings, AuthVerifier};
use crate::backend::{backend_from_settings, Backend};
use crate::middleware::IpGuard;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub auth: Arc<dyn AuthVerifier>,
    pub backend: Arc<dyn Backend>,
    pub llm: Arc<dyn LLMProvider>,
    pub limiter: Arc<FixedWindowLimiter>,
    pub filter: Arc<ContentFilter>,
    pub ip_guard: Arc<IpGuard>,
}

impl AppState {
    /// Wires the production collaborators described by `settings`.
    pub fn new(settings: Settings) -> venturelab_core::Result<Self> {
        let auth = verifier_from_settings(&settings.auth)
            .map_err(|e| VentureLabError::Config(e.to_string()))?;
        let backend = backend_from_settings(&settings.backend)
            .map_err(|e| VentureLabError::Config(e.to_string()))?;
        let llm: Arc<dyn LLMProvider> = Arc::new(
            GatewayProvider::from_settings(&settings.llm)
                .map_err(|e| VentureLabError::Config(e.to_string()))?,
        );

        Self::from_parts(settings, auth, backend, llm)
    }

    /// Builds state around caller-supplied collaborators.
    pub fn from_parts(
        settings: Settings,
        auth: Arc<dyn AuthVerifier>,
        backend: Arc<dyn Backend>,
        llm: Arc<dyn LLMProvider>,
    ) -> venturelab_core::Result<Self> {
        let filter = settings
            .moderation
            .build_filter()
            .map_err(|e| VentureLabError::Config(e.to_string()))?;
        let ip_guard = IpGuard::new(settings.rate_limits.ip_per_minute);

        Ok(Self {
            settings: Arc::new(settings),
            auth,
            backend,
            llm,
            limiter: Arc::new(FixedWindowLimiter::new()),
            filter: Arc::new(filter),
            ip_guard: Arc::new(ip_guard),
        })
    }
}
