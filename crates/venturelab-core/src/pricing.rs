use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::validation::{validate_range, ValidationError};

lazy_static! {
    static ref COUPON_CODE_REGEX: Regex = Regex::new(r"^[A-Z0-9_-]{3,32}$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Discount {
    /// Whole percent, 0..=100.
    Percentage(u32),
    /// Amount in the smallest currency unit.
    FixedAmount(u64),
}

impl Discount {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Discount::Percentage(percent) = self {
            validate_range("discount.percentage", *percent, 0, 100)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    pub code: String,
    pub discount: Discount,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

impl Coupon {
    pub fn is_redeemable(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at.map_or(true, |expires| expires > now)
    }
}

/// Trims and upper-cases a user-entered code, then checks its shape.
pub fn normalize_coupon_code(raw: &str) -> Result<String, ValidationError> {
    let code = raw.trim().to_uppercase();
    if code.is_empty() {
        return Err(ValidationError::RequiredField {
            field: "coupon_code".to_string(),
        });
    }
    if !COUPON_CODE_REGEX.is_match(&code) {
        return Err(ValidationError::InvalidFormat {
            field: "coupon_code".to_string(),
            reason: "expected 3-32 letters, digits, '-' or '_'".to_string(),
        });
    }
    Ok(code)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Quote {
    pub original_cents: u64,
    pub discount_cents: u64,
    pub final_cents: u64,
}

impl Quote {
    pub fn full_price(price_cents: u64) -> Self {
        Self {
            original_cents: price_cents,
            discount_cents: 0,
            final_cents: price_cents,
        }
    }
}

pub fn apply_discount(price_cents: u64, discount: &Discount) -> Result<Quote, ValidationError> {
    discount.validate()?;

    let discount_cents = match *discount {
        Discount::Percentage(percent) => {
            // Round half up in integer space; u128 keeps price * 100 exact.
            let scaled = price_cents as u128 * percent as u128;
            ((scaled + 50) / 100) as u64
        }
        Discount::FixedAmount(amount) => amount,
    }
    .min(price_cents);

    Ok(Quote {
        original_cents: price_cents,
        discount_cents,
        final_cents: price_cents.saturating_sub(discount_cents),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn test_percentage_discount() {
        let quote = apply_discount(4_999, &Discount::Percentage(20)).unwrap();
        assert_eq!(quote.original_cents, 4_999);
        assert_eq!(quote.discount_cents, 1_000);
        assert_eq!(quote.final_cents, 3_999);

        let half = apply_discount(999, &Discount::Percentage(50)).unwrap();
        assert_eq!(half.discount_cents, 500);
        assert_eq!(half.final_cents, 499);

        assert_eq!(
            apply_discount(1_000, &Discount::Percentage(100)).unwrap().final_cents,
            0
        );
        assert_eq!(
            apply_discount(1_000, &Discount::Percentage(0)).unwrap(),
            Quote::full_price(1_000)
        );
    }

    #[test]
    fn test_fixed_discount_clamps_at_zero() {
        let quote = apply_discount(2_500, &Discount::FixedAmount(1_000)).unwrap();
        assert_eq!(quote.final_cents, 1_500);

        let over = apply_discount(2_500, &Discount::FixedAmount(10_000)).unwrap();
        assert_eq!(over.discount_cents, 2_500);
        assert_eq!(over.final_cents, 0);
    }

    #[test]
    fn test_percentage_over_hundred_is_rejected() {
        assert!(apply_discount(1_000, &Discount::Percentage(101)).is_err());
    }

    #[test]
    fn test_coupon_redeemable_window() {
        let now = Utc::now();
        let mut coupon = Coupon {
            code: "LAUNCH20".to_string(),
            discount: Discount::Percentage(20),
            active: true,
            expires_at: Some(now + TimeDelta::days(1)),
        };
        assert!(coupon.is_redeemable(now));

        coupon.expires_at = Some(now - TimeDelta::seconds(1));
        assert!(!coupon.is_redeemable(now));

        coupon.expires_at = None;
        coupon.active = false;
        assert!(!coupon.is_redeemable(now));
    }

    #[test]
    fn test_coupon_code_normalization() {
        assert_eq!(normalize_coupon_code("  launch-20 ").unwrap(), "LAUNCH-20");
        assert!(normalize_coupon_code("").is_err());
        assert!(normalize_coupon_code("ab").is_err());
        assert!(normalize_coupon_code("bad code").is_err());
        assert!(normalize_coupon_code(&"X".repeat(33)).is_err());
    }

    #[test]
    fn test_discount_wire_format() {
        let json = serde_json::to_value(Discount::FixedAmount(500)).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "fixed_amount", "value": 500}));
        let parsed: Discount =
            serde_json::from_value(serde_json::json!({"kind": "percentage", "value": 15})).unwrap();
        assert_eq!(parsed, Discount::Percentage(15));
    }
}
