pub mod config;
pub mod error;
pub mod moderation;
pub mod pricing;
pub mod progression;
pub mod rate_limit;
pub mod types;
pub mod validation;

pub use config::{
    AuthConfig, AuthMode, BackendConfig, BackendMode, ConfigError, CorsConfig, LlmConfig,
    LoggingConfig, ModerationConfig, ProgressionConfig, RateLimitConfig, SeedConfig,
    ServerConfig, Settings,
};
pub use error::*;
pub use moderation::*;
pub use pricing::*;
pub use progression::*;
pub use rate_limit::*;
pub use types::*;
pub use validation::*;
