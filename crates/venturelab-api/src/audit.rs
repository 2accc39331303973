use tracing::{error, info, warn};
use uuid::Uuid;

/// Security-relevant outcomes, emitted as structured `tracing` events under
/// the `security` target.
#[derive(Debug, Clone)]
pub enum SecurityEvent {
    AuthenticationFailure {
        ip_address: String,
        reason: String,
    },
    AuthenticationSuccess {
        user_id: Uuid,
        ip_address: String,
        method: &'static str,
    },
    PermissionDenied {
        user_id: Uuid,
        resource: String,
        required_tier: String,
    },
    AdminAccess {
        user_id: Uuid,
        action: String,
        resource: String,
    },
    RateLimitExceeded {
        user_id: Option<Uuid>,
        ip_address: String,
        feature: String,
    },
    ContentBlocked {
        user_id: Uuid,
        feature: String,
        stage: &'static str,
        category: String,
    },
    ContentFlagged {
        user_id: Uuid,
        feature: String,
        categories: Vec<String>,
    },
}

pub struct SecurityLogger;

impl SecurityLogger {
    pub fn log_event(event: SecurityEvent) {
        match event {
            SecurityEvent::AuthenticationFailure { ip_address, reason } => {
                warn!(
                    target: "security",
                    ip_address = %ip_address,
                    reason = %reason,
                    "Authentication failure"
                );
            }
            SecurityEvent::AuthenticationSuccess {
                user_id,
                ip_address,
                method,
            } => {
                info!(
                    target: "security",
                    user_id = %user_id,
                    ip_address = %ip_address,
                    method,
                    "Authentication success"
                );
            }
            SecurityEvent::PermissionDenied {
                user_id,
                resource,
                required_tier,
            } => {
                warn!(
                    target: "security",
                    user_id = %user_id,
                    resource = %resource,
                    required_tier = %required_tier,
                    "Permission denied"
                );
            }
            SecurityEvent::AdminAccess {
                user_id,
                action,
                resource,
            } => {
                info!(
                    target: "security",
                    user_id = %user_id,
                    action = %action,
                    resource = %resource,
                    "Admin access"
                );
            }
            SecurityEvent::RateLimitExceeded {
                user_id,
                ip_address,
                feature,
            } => {
                warn!(
                    target: "security",
                    user_id = ?user_id,
                    ip_address = %ip_address,
                    feature = %feature,
                    "Rate limit exceeded"
                );
            }
            SecurityEvent::ContentBlocked {
                user_id,
                feature,
                stage,
                category,
            } => {
                error!(
                    target: "security",
                    user_id = %user_id,
                    feature = %feature,
                    stage,
                    category = %category,
                    "Content blocked by moderation"
                );
            }
            SecurityEvent::ContentFlagged {
                user_id,
                feature,
                categories,
            } => {
                warn!(
                    target: "security",
                    user_id = %user_id,
                    feature = %feature,
                    categories = ?categories,
                    "Suspicious content allowed through"
                );
            }
        }
    }
}
