// SPDX-FileCopyrightText: 2026 Butlers Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde
//! attributes: non-empty paths, ordered delay bounds, and thresholds that
//! would leave the circuit breaker unable to close.

use crate::diagnostic::ConfigError;
use crate::model::ButlersConfig;

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &ButlersConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut fail = |message: String| errors.push(ConfigError::Validation { message });

    if config.storage.database_path.trim().is_empty() {
        fail("storage.database_path must not be empty".to_string());
    }

    let retry = &config.delivery.retry;
    if retry.max_attempts < 1 {
        fail("delivery.retry.max_attempts must be at least 1".to_string());
    }
    if !(0.0..=1.0).contains(&retry.jitter_factor) {
        fail(format!(
            "delivery.retry.jitter_factor must be between 0 and 1, got {}",
            retry.jitter_factor
        ));
    }
    if retry.base_delay_ms > retry.max_delay_ms {
        fail(format!(
            "delivery.retry.base_delay_ms ({}) must not exceed max_delay_ms ({})",
            retry.base_delay_ms, retry.max_delay_ms
        ));
    }

    let breaker = &config.delivery.circuit_breaker;
    for (name, value) in [
        ("failure_threshold", breaker.failure_threshold),
        ("half_open_max_attempts", breaker.half_open_max_attempts),
        ("half_open_success_threshold", breaker.half_open_success_threshold),
    ] {
        if value < 1 {
            fail(format!("delivery.circuit_breaker.{name} must be at least 1"));
        }
    }
    if breaker.half_open_success_threshold > breaker.half_open_max_attempts {
        fail(format!(
            "delivery.circuit_breaker.half_open_success_threshold ({}) exceeds half_open_max_attempts ({}); the circuit could never close",
            breaker.half_open_success_threshold, breaker.half_open_max_attempts
        ));
    }

    let timeouts = &config.delivery.timeouts;
    if timeouts.default_secs == 0 {
        fail("delivery.timeouts.default_secs must be greater than 0".to_string());
    }
    for (channel, secs) in &timeouts.channels {
        if *secs == 0 {
            fail(format!(
                "delivery.timeouts.channels.{channel} must be greater than 0"
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages(config: &ButlersConfig) -> Vec<String> {
        validate_config(config)
            .unwrap_err()
            .into_iter()
            .map(|e| e.to_string())
            .collect()
    }

    #[test]
    fn default_config_validates() {
        let config = ButlersConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn empty_database_path_fails_validation() {
        let mut config = ButlersConfig::default();
        config.storage.database_path = "  ".to_string();
        assert!(messages(&config).iter().any(|m| m.contains("database_path")));
    }

    #[test]
    fn zero_attempts_fails_validation() {
        let mut config = ButlersConfig::default();
        config.delivery.retry.max_attempts = 0;
        assert!(messages(&config).iter().any(|m| m.contains("max_attempts")));
    }

    #[test]
    fn jitter_out_of_range_fails_validation() {
        let mut config = ButlersConfig::default();
        config.delivery.retry.jitter_factor = 1.5;
        assert!(messages(&config).iter().any(|m| m.contains("jitter_factor")));
    }

    #[test]
    fn inverted_delays_fail_validation() {
        let mut config = ButlersConfig::default();
        config.delivery.retry.base_delay_ms = 60_000;
        config.delivery.retry.max_delay_ms = 1_000;
        assert!(messages(&config).iter().any(|m| m.contains("base_delay_ms")));
    }

    #[test]
    fn unreachable_success_threshold_fails_validation() {
        let mut config = ButlersConfig::default();
        config.delivery.circuit_breaker.half_open_success_threshold = 4;
        config.delivery.circuit_breaker.half_open_max_attempts = 3;
        assert!(messages(&config).iter().any(|m| m.contains("could never close")));
    }

    #[test]
    fn zero_channel_timeout_fails_validation() {
        let mut config = ButlersConfig::default();
        config.delivery.timeouts.channels.insert("sms".into(), 0);
        assert!(messages(&config).iter().any(|m| m.contains("channels.sms")));
    }

    #[test]
    fn all_errors_are_collected() {
        let mut config = ButlersConfig::default();
        config.storage.database_path = String::new();
        config.delivery.retry.max_attempts = 0;
        config.delivery.circuit_breaker.failure_threshold = 0;
        assert_eq!(messages(&config).len(), 3);
    }
}
