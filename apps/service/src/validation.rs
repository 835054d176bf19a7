use url::Url;

use crate::database::models::Monitor;
use crate::error::EngineError;

pub const MIN_THRESHOLD: u32 = 1;
pub const MAX_THRESHOLD: u32 = 10;
pub const DEFAULT_THRESHOLD: u32 = 3;

/// Validation results with specific error messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub error: Option<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self { is_valid: true, error: None }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self { is_valid: false, error: Some(msg.into()) }
    }

    pub fn into_result(self) -> Result<(), EngineError> {
        if self.is_valid {
            Ok(())
        } else {
            Err(EngineError::InvalidMonitor(
                self.error.unwrap_or_else(|| "Validation failed".to_string()),
            ))
        }
    }
}

/// Monitor URLs must be absolute http(s) URLs with a host
pub fn validate_monitor_url(target: &str) -> ValidationResult {
    if target.trim().is_empty() {
        return ValidationResult::err("URL cannot be empty");
    }

    match Url::parse(target) {
        Ok(url) => {
            let scheme = url.scheme();
            if scheme != "http" && scheme != "https" {
                return ValidationResult::err(format!(
                    "Invalid scheme '{scheme}'. Must be http or https"
                ));
            }

            if url.host_str().is_none_or(str::is_empty) {
                return ValidationResult::err("URL must have a valid host");
            }

            ValidationResult::ok()
        }
        Err(e) => {
            if !target.contains("://") {
                ValidationResult::err("URL must include scheme (http:// or https://)")
            } else {
                ValidationResult::err(format!("Invalid URL: {e}"))
            }
        }
    }
}

pub fn validate_threshold(threshold: u32) -> ValidationResult {
    if (MIN_THRESHOLD..=MAX_THRESHOLD).contains(&threshold) {
        ValidationResult::ok()
    } else {
        ValidationResult::err(format!(
            "Threshold must be between {MIN_THRESHOLD} and {MAX_THRESHOLD}, got {threshold}"
        ))
    }
}

pub fn validate_monitor_name(name: &str) -> ValidationResult {
    if name.trim().is_empty() {
        ValidationResult::err("Name cannot be empty")
    } else {
        ValidationResult::ok()
    }
}

/// Check everything a monitor needs before it is stored
pub fn validate_monitor(monitor: &Monitor) -> Result<(), EngineError> {
    validate_monitor_name(&monitor.name).into_result()?;
    validate_monitor_url(&monitor.url).into_result()?;
    validate_threshold(monitor.threshold).into_result()
}
