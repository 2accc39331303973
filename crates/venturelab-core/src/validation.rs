use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

pub const MAX_URL_LENGTH: usize = 2048;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Invalid format for field '{field}': {reason}")]
    InvalidFormat { field: String, reason: String },

    #[error("Invalid length for field '{field}': expected {min}-{max} characters, got {actual}")]
    InvalidLength {
        field: String,
        min: usize,
        max: usize,
        actual: usize,
    },

    #[error("Value out of range for field '{field}': {value}")]
    ValueOutOfRange { field: String, value: String },

    #[error("Invalid value for field '{field}': expected one of [{allowed}], got '{value}'")]
    InvalidChoice {
        field: String,
        value: String,
        allowed: String,
    },

    #[error("Required field '{field}' is missing")]
    RequiredField { field: String },
}

pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError>;
}

lazy_static! {
    static ref UUID_REGEX: Regex = Regex::new(
        r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$"
    )
    .unwrap();
}

/// Accepts only the canonical hyphenated form. `Uuid::parse_str` alone would
/// also take braced, URN and simple encodings.
pub fn validate_uuid(field: &str, value: &str) -> Result<Uuid, ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::RequiredField {
            field: field.to_string(),
        });
    }

    if !UUID_REGEX.is_match(value) {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "expected a UUID".to_string(),
        });
    }

    Uuid::parse_str(value).map_err(|e| ValidationError::InvalidFormat {
        field: field.to_string(),
        reason: e.to_string(),
    })
}

pub fn validate_http_url(field: &str, value: &str) -> Result<Url, ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::RequiredField {
            field: field.to_string(),
        });
    }

    if value.len() > MAX_URL_LENGTH {
        return Err(ValidationError::InvalidLength {
            field: field.to_string(),
            min: 1,
            max: MAX_URL_LENGTH,
            actual: value.len(),
        });
    }

    let url = Url::parse(value).map_err(|e| ValidationError::InvalidFormat {
        field: field.to_string(),
        reason: e.to_string(),
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "missing host".to_string(),
        });
    }

    Ok(url)
}

pub fn validate_duration_secs(field: &str, value: f64, max: f64) -> Result<f64, ValidationError> {
    if !value.is_finite() || value < 0.0 || value > max {
        return Err(ValidationError::ValueOutOfRange {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
    Ok(value)
}

/// Length is counted in characters after trimming surrounding whitespace.
pub fn validate_length(
    field: &str,
    value: &str,
    min: usize,
    max: usize,
) -> Result<(), ValidationError> {
    let actual = value.trim().chars().count();
    if actual == 0 && min > 0 {
        return Err(ValidationError::RequiredField {
            field: field.to_string(),
        });
    }
    if actual < min || actual > max {
        return Err(ValidationError::InvalidLength {
            field: field.to_string(),
            min,
            max,
            actual,
        });
    }
    Ok(())
}

pub fn validate_choice<'a>(
    field: &str,
    value: &'a str,
    allowed: &[&str],
) -> Result<&'a str, ValidationError> {
    if allowed.contains(&value) {
        Ok(value)
    } else {
        Err(ValidationError::InvalidChoice {
            field: field.to_string(),
            value: value.to_string(),
            allowed: allowed.join(", "),
        })
    }
}

pub fn validate_range<T>(field: &str, value: T, min: T, max: T) -> Result<T, ValidationError>
where
    T: PartialOrd + ToString + Copy,
{
    if value < min || value > max {
        return Err(ValidationError::ValueOutOfRange {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
    Ok(value)
}
