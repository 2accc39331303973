//! Fixed-window request limiter keyed by user and feature.
//!
//! State lives in process memory only, so every instance counts on its own
//! and all windows reset when the process restarts. Treat it as an abuse
//! deterrent rather than an exact quota.

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub max_requests: u32,
    pub window_secs: u64,
}

impl RateLimit {
    pub const fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            max_requests,
            window_secs,
        }
    }

    fn window(&self) -> TimeDelta {
        TimeDelta::try_seconds(self.window_secs.min(i64::MAX as u64) as i64)
            .unwrap_or(TimeDelta::MAX)
    }
}

/// Rate-limited surfaces. Each gets its own window per user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Chat,
    Tank,
    Progress,
    Checkout,
    Admin,
}

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Chat => "chat",
            Feature::Tank => "tank",
            Feature::Progress => "progress",
            Feature::Checkout => "checkout",
            Feature::Admin => "admin",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    pub fn new(user_id: Uuid, feature: &str) -> Self {
        Self(format!("{user_id}:{feature}"))
    }

    pub fn for_feature(user_id: Uuid, feature: Feature) -> Self {
        Self::new(user_id, feature.as_str())
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitDecision {
    /// Whole seconds until the window resets, never less than one.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let millis = (self.reset_at - now).num_milliseconds().max(0) as u64;
        millis.div_ceil(1000).max(1)
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    reset_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct FixedWindowLimiter {
    windows: DashMap<RateLimitKey, Window>,
}

impl FixedWindowLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, key: &RateLimitKey, limit: RateLimit) -> RateLimitDecision {
        self.check_at(key, limit, Utc::now())
    }

    pub fn check_at(
        &self,
        key: &RateLimitKey,
        limit: RateLimit,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        let mut entry = self.windows.entry(key.clone()).or_insert(Window {
            count: 0,
            reset_at: now,
        });
        let window = entry.value_mut();

        if window.count == 0 || now >= window.reset_at {
            window.count = 1;
            window.reset_at = now
                .checked_add_signed(limit.window())
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
        } else {
            window.count = window.count.saturating_add(1);
        }

        RateLimitDecision {
            allowed: window.count <= limit.max_requests,
            limit: limit.max_requests,
            remaining: limit.max_requests.saturating_sub(window.count),
            reset_at: window.reset_at,
        }
    }

    /// Drops every window that has already elapsed and returns how many went.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, window| window.reset_at > now);
        before.saturating_sub(self.windows.len())
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}
