use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Once;
use tracing::error;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref RATE_LIMIT_REJECTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "venturelab_rate_limit_rejections_total",
            "Requests rejected by a rate limiter"
        ),
        &["feature"]
    )
    .unwrap();

    pub static ref MODERATION_VERDICTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "venturelab_moderation_verdicts_total",
            "Moderation verdicts by kind and stage"
        ),
        &["kind", "stage"]
    )
    .unwrap();

    pub static ref LLM_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("venturelab_llm_requests_total", "Calls made to the LLM gateway"),
        &["operation"]
    )
    .unwrap();

    pub static ref LLM_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "venturelab_llm_failures_total",
            "LLM gateway calls that failed or returned unusable output"
        ),
        &["operation"]
    )
    .unwrap();

    pub static ref XP_AWARDED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("venturelab_xp_awarded_total", "XP granted to students"),
        &["source"]
    )
    .unwrap();
}

static REGISTER: Once = Once::new();

pub fn register_metrics() {
    REGISTER.call_once(|| {
        let collectors: [Box<dyn prometheus::core::Collector>; 5] = [
            Box::new(RATE_LIMIT_REJECTIONS_TOTAL.clone()),
            Box::new(MODERATION_VERDICTS_TOTAL.clone()),
            Box::new(LLM_REQUESTS_TOTAL.clone()),
            Box::new(LLM_FAILURES_TOTAL.clone()),
            Box::new(XP_AWARDED_TOTAL.clone()),
        ];
        for collector in collectors {
            if let Err(e) = REGISTRY.register(collector) {
                error!("Failed to register metric: {}", e);
            }
        }
    });
}

pub fn record_rate_limited(feature: &str) {
    RATE_LIMIT_REJECTIONS_TOTAL.with_label_values(&[feature]).inc();
}

pub fn record_moderation(kind: &str, stage: &str) {
    MODERATION_VERDICTS_TOTAL
        .with_label_values(&[kind, stage])
        .inc();
}

pub fn record_llm_request(operation: &str) {
    LLM_REQUESTS_TOTAL.with_label_values(&[operation]).inc();
}

pub fn record_llm_failure(operation: &str) {
    LLM_FAILURES_TOTAL.with_label_values(&[operation]).inc();
}

pub fn record_xp(source: &str, amount: u64) {
    XP_AWARDED_TOTAL.with_label_values(&[source]).inc_by(amount);
}

/// Prometheus text exposition of every registered metric.
pub fn gather_text() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_is_idempotent_and_exported() {
        register_metrics();
        register_metrics();

        record_rate_limited("chat");
        record_xp("tank", 70);

        let text = gather_text().unwrap();
        assert!(text.contains("venturelab_rate_limit_rejections_total{feature=\"chat\"}"));
        assert!(text.contains("venturelab_xp_awarded_total{source=\"tank\"}"));
    }
}
