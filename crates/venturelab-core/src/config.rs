use std::path::{Path, PathBuf};

use config as cfg;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::moderation::ContentFilter;
use crate::pricing::Coupon;
use crate::rate_limit::{Feature, RateLimit};
use crate::types::Plan;
use crate::validation::validate_http_url;

pub const ENV_PREFIX: &str = "VENTURELAB";
pub const MIN_JWT_SECRET_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<cfg::ConfigError> for ConfigError {
    fn from(err: cfg::ConfigError) -> Self {
        ConfigError::Load(err.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "ServerConfig::default_host")]
    pub host: String,
    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,
}

impl ServerConfig {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }

    fn default_port() -> u16 {
        8787
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    /// Exact origins, e.g. `https://app.venturelab.io`.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default = "CorsConfig::default_max_age_secs")]
    pub max_age_secs: u64,
}

impl CorsConfig {
    fn default_max_age_secs() -> u64 {
        3600
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:5173".into()],
            max_age_secs: Self::default_max_age_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// Verify HS256 tokens locally with the project JWT secret.
    #[default]
    Jwt,
    /// Ask the hosted auth service who the bearer is.
    Remote,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,
    /// Base URL of the hosted auth API, e.g. `https://xyz.supabase.co/auth/v1`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub jwt_secret: Option<SecretString>,
    #[serde(default)]
    pub anon_key: Option<SecretString>,
    #[serde(default = "AuthConfig::default_audience")]
    pub audience: String,
    #[serde(default = "AuthConfig::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl AuthConfig {
    fn default_audience() -> String {
        "authenticated".to_string()
    }

    fn default_timeout_secs() -> u64 {
        10
    }

    pub fn jwt_secret(&self) -> Option<&str> {
        self.jwt_secret.as_ref().map(|s| s.expose_secret())
    }

    pub fn anon_key(&self) -> Option<&str> {
        self.anon_key.as_ref().map(|s| s.expose_secret())
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::default(),
            url: None,
            jwt_secret: None,
            anon_key: None,
            audience: Self::default_audience(),
            timeout_secs: Self::default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendMode {
    #[default]
    Rest,
    Memory,
}

/// Rows loaded into the in-memory backend at startup.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedConfig {
    #[serde(default)]
    pub plans: Vec<Plan>,
    #[serde(default)]
    pub coupons: Vec<Coupon>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub mode: BackendMode,
    /// Project URL of the hosted database; tables live under `/rest/v1`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub service_key: Option<SecretString>,
    #[serde(default = "BackendConfig::default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub seed: SeedConfig,
}

impl BackendConfig {
    fn default_timeout_secs() -> u64 {
        15
    }

    pub fn service_key(&self) -> Option<&str> {
        self.service_key.as_ref().map(|s| s.expose_secret())
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            mode: BackendMode::default(),
            url: None,
            service_key: None,
            timeout_secs: Self::default_timeout_secs(),
            seed: SeedConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible base URL; `/chat/completions` is appended.
    #[serde(default = "LlmConfig::default_gateway_url")]
    pub gateway_url: String,
    #[serde(default)]
    pub api_key: Option<SecretString>,
    #[serde(default = "LlmConfig::default_model")]
    pub model: String,
    #[serde(default = "LlmConfig::default_temperature")]
    pub temperature: f32,
    #[serde(default = "LlmConfig::default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "LlmConfig::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl LlmConfig {
    fn default_gateway_url() -> String {
        "https://api.openai.com/v1".to_string()
    }

    fn default_model() -> String {
        "gpt-4o-mini".to_string()
    }

    fn default_temperature() -> f32 {
        0.7
    }

    fn default_max_tokens() -> u32 {
        1024
    }

    fn default_timeout_secs() -> u64 {
        60
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_ref().map(|s| s.expose_secret())
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            gateway_url: Self::default_gateway_url(),
            api_key: None,
            model: Self::default_model(),
            temperature: Self::default_temperature(),
            max_tokens: Self::default_max_tokens(),
            timeout_secs: Self::default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "RateLimitConfig::default_chat")]
    pub chat: RateLimit,
    #[serde(default = "RateLimitConfig::default_tank")]
    pub tank: RateLimit,
    #[serde(default = "RateLimitConfig::default_progress")]
    pub progress: RateLimit,
    #[serde(default = "RateLimitConfig::default_checkout")]
    pub checkout: RateLimit,
    #[serde(default = "RateLimitConfig::default_admin")]
    pub admin: RateLimit,
    /// Pre-auth flood guard, per client IP.
    #[serde(default = "RateLimitConfig::default_ip_per_minute")]
    pub ip_per_minute: u32,
}

impl RateLimitConfig {
    fn default_chat() -> RateLimit {
        RateLimit::new(20, 60)
    }

    fn default_tank() -> RateLimit {
        RateLimit::new(5, 300)
    }

    fn default_progress() -> RateLimit {
        RateLimit::new(60, 60)
    }

    fn default_checkout() -> RateLimit {
        RateLimit::new(10, 60)
    }

    fn default_admin() -> RateLimit {
        RateLimit::new(30, 60)
    }

    fn default_ip_per_minute() -> u32 {
        300
    }

    pub fn limit_for(&self, feature: Feature) -> RateLimit {
        match feature {
            Feature::Chat => self.chat,
            Feature::Tank => self.tank,
            Feature::Progress => self.progress,
            Feature::Checkout => self.checkout,
            Feature::Admin => self.admin,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            chat: Self::default_chat(),
            tank: Self::default_tank(),
            progress: Self::default_progress(),
            checkout: Self::default_checkout(),
            admin: Self::default_admin(),
            ip_per_minute: Self::default_ip_per_minute(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModerationConfig {
    #[serde(default)]
    pub extra_blocked: Vec<String>,
    #[serde(default)]
    pub extra_suspicious: Vec<String>,
    #[serde(default)]
    pub refusal_message: Option<String>,
}

impl ModerationConfig {
    pub fn build_filter(&self) -> Result<ContentFilter, ConfigError> {
        ContentFilter::with_extra(
            &self.extra_blocked,
            &self.extra_suspicious,
            self.refusal_message.as_deref(),
        )
        .map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProgressionConfig {
    #[serde(default = "ProgressionConfig::default_mission_completion_xp")]
    pub mission_completion_xp: u64,
    #[serde(default = "ProgressionConfig::default_max_xp_grant")]
    pub max_xp_grant: u64,
}

impl ProgressionConfig {
    fn default_mission_completion_xp() -> u64 {
        50
    }

    fn default_max_xp_grant() -> u64 {
        1000
    }
}

impl Default for ProgressionConfig {
    fn default() -> Self {
        Self {
            mission_completion_xp: Self::default_mission_completion_xp(),
            max_xp_grant: Self::default_max_xp_grant(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "venturelab_api=info,tower_http=info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
    #[serde(default)]
    pub moderation: ModerationConfig,
    #[serde(default)]
    pub progression: ProgressionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Settings {
    /// Loads `.env`, then the layered files in `config_dir`, then
    /// `VENTURELAB__*` variables, and validates the result.
    pub fn load(config_dir: &Path, env_name: &str) -> Result<Self, ConfigError> {
        match dotenv::dotenv() {
            Ok(path) => debug!("Loaded environment from {:?}", path),
            Err(_) => debug!("No .env file found"),
        }

        let settings = Self::load_from_sources(config_dir, env_name)?;
        settings.validate()?;
        info!(
            "Configuration loaded from {:?} (env: {})",
            config_dir, env_name
        );
        Ok(settings)
    }

    pub fn load_from_sources(config_dir: &Path, env_name: &str) -> Result<Self, ConfigError> {
        let builder = cfg::Config::builder()
            .add_source(cfg::File::from(config_dir.join("default.toml")).required(false))
            .add_source(
                cfg::File::from(config_dir.join(format!("{}.toml", env_name))).required(false),
            )
            .add_source(cfg::File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                cfg::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("cors.allowed_origins")
                    .with_list_parse_key("moderation.extra_blocked")
                    .with_list_parse_key("moderation.extra_suspicious")
                    .try_parsing(true),
            );

        let settings: Settings = builder.build()?.try_deserialize()?;
        Ok(settings)
    }

    pub fn default_config_dir() -> PathBuf {
        PathBuf::from("config")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cors.allowed_origins.is_empty() {
            return Err(ConfigError::Invalid(
                "cors.allowed_origins must list at least one origin".into(),
            ));
        }
        for origin in &self.cors.allowed_origins {
            validate_http_url("cors.allowed_origins", origin)
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }

        match self.auth.mode {
            AuthMode::Jwt => {
                let secret = self.auth.jwt_secret().unwrap_or_default();
                if secret.len() < MIN_JWT_SECRET_LEN {
                    return Err(ConfigError::Invalid(format!(
                        "auth.jwt_secret must be at least {} characters",
                        MIN_JWT_SECRET_LEN
                    )));
                }
            }
            AuthMode::Remote => {
                require_url("auth.url", self.auth.url.as_deref())?;
                if self.auth.anon_key().map_or(true, str::is_empty) {
                    return Err(ConfigError::Invalid(
                        "auth.anon_key is required in remote mode".into(),
                    ));
                }
            }
        }

        if self.backend.mode == BackendMode::Rest {
            require_url("backend.url", self.backend.url.as_deref())?;
            if self.backend.service_key().map_or(true, str::is_empty) {
                return Err(ConfigError::Invalid(
                    "backend.service_key is required in rest mode".into(),
                ));
            }
        }

        require_url("llm.gateway_url", Some(&self.llm.gateway_url))?;
        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::Invalid("llm.model must not be empty".into()));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::Invalid(
                "llm.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        for feature in [
            Feature::Chat,
            Feature::Tank,
            Feature::Progress,
            Feature::Checkout,
            Feature::Admin,
        ] {
            if self.rate_limits.limit_for(feature).window_secs == 0 {
                return Err(ConfigError::Invalid(format!(
                    "rate_limits.{}.window_secs must be greater than zero",
                    feature
                )));
            }
        }
        if self.rate_limits.ip_per_minute == 0 {
            return Err(ConfigError::Invalid(
                "rate_limits.ip_per_minute must be greater than zero".into(),
            ));
        }

        if self.progression.max_xp_grant == 0 {
            return Err(ConfigError::Invalid(
                "progression.max_xp_grant must be greater than zero".into(),
            ));
        }

        for coupon in &self.backend.seed.coupons {
            coupon
                .discount
                .validate()
                .map_err(|e| ConfigError::Invalid(format!("coupon {}: {}", coupon.code, e)))?;
        }

        self.moderation.build_filter()?;
        Ok(())
    }
}

fn require_url(field: &str, value: Option<&str>) -> Result<(), ConfigError> {
    let value = value.ok_or_else(|| ConfigError::Invalid(format!("{} is required", field)))?;
    validate_http_url(field, value).map_err(|e| ConfigError::Invalid(e.to_string()))?;
    Ok(())
}
