use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderName, HeaderValue, Method},
    middleware::Next,
    response::Response,
};
use chrono::{TimeDelta, Utc};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    num::NonZeroU32,
    time::Duration,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;
use venturelab_core::{CorsConfig, RateLimitDecision};

use crate::audit::{SecurityEvent, SecurityLogger};
use crate::error::ApiError;
use crate::metrics;
use crate::AppState;

/// Security headers middleware
pub async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let is_api = req.uri().path().starts_with("/api");
    let mut response = next.run(req).await;

    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );

    // Responses carry per-student data.
    if is_api {
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store, no-cache, must-revalidate, private"),
        );
    }

    response
}

/// Client address: first `X-Forwarded-For` hop, then `X-Real-IP`, then the
/// socket peer.
pub fn extract_client_ip(req: &Request) -> Option<IpAddr> {
    let header_ip = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .and_then(|ip| ip.trim().parse::<IpAddr>().ok())
    };

    header_ip("x-forwarded-for")
        .or_else(|| header_ip("x-real-ip"))
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip())
        })
}

pub fn client_ip_string(req: &Request) -> String {
    extract_client_ip(req)
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Per-IP GCRA flood guard that runs ahead of authentication.
pub struct IpGuard {
    limiter: DefaultKeyedRateLimiter<IpAddr>,
    per_minute: u32,
}

impl IpGuard {
    pub fn new(per_minute: u32) -> Self {
        let per_minute = per_minute.max(1);
        let quota = Quota::per_minute(NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN));
        Self {
            limiter: RateLimiter::keyed(quota),
            per_minute,
        }
    }

    /// Seconds until one more cell replenishes.
    fn replenish_secs(&self) -> u64 {
        60u64.div_ceil(u64::from(self.per_minute)).max(1)
    }

    pub fn check(&self, ip: IpAddr) -> Result<(), RateLimitDecision> {
        self.limiter.check_key(&ip).map_err(|_| RateLimitDecision {
            allowed: false,
            limit: self.per_minute,
            remaining: 0,
            reset_at: Utc::now() + TimeDelta::seconds(self.replenish_secs() as i64),
        })
    }

    pub fn sweep(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }

    pub fn len(&self) -> usize {
        self.limiter.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiter.is_empty()
    }
}

pub async fn ip_guard_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    // Requests without any address share one bucket.
    let ip = extract_client_ip(&req).unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    if let Err(decision) = state.ip_guard.check(ip) {
        SecurityLogger::log_event(SecurityEvent::RateLimitExceeded {
            user_id: None,
            ip_address: ip.to_string(),
            feature: "ip".to_string(),
        });
        metrics::record_rate_limited("ip");
        return Err(ApiError::RateLimited(decision));
    }

    Ok(next.run(req).await)
}

pub fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin.trim_end_matches('/')) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Skipping unusable CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-client-info"),
            HeaderName::from_static("apikey"),
        ])
        .expose_headers([
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderName::from_static("x-ratelimit-remaining"),
            HeaderName::from_static("x-ratelimit-reset"),
            header::RETRY_AFTER,
        ])
        .max_age(Duration::from_secs(config.max_age_secs))
}
