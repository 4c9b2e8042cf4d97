// SPDX-FileCopyrightText: 2026 Butlers Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the delivery core.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Top-level Butlers configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ButlersConfig {
    /// Logging settings.
    #[serde(default)]
    pub log: LogConfig,

    /// Storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Retry, circuit breaker, and timeout settings for outbound delivery.
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("butlers").join("delivery.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("delivery.db"))
        .to_string_lossy()
        .into_owned()
}

fn default_wal_mode() -> bool {
    true
}

/// Outbound delivery settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DeliveryConfig {
    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,

    #[serde(default)]
    pub timeouts: TimeoutSettings,
}

/// Retry policy settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySettings {
    /// Attempts per delivery, including the first try.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound on any single backoff, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Randomization applied to each backoff, as a fraction in `[0, 1]`.
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,

    #[serde(default = "default_true")]
    pub retry_on_timeout: bool,

    #[serde(default = "default_true")]
    pub retry_on_target_unavailable: bool,

    #[serde(default = "default_true")]
    pub retry_on_overload_rejected: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_factor: default_jitter_factor(),
            retry_on_timeout: true,
            retry_on_target_unavailable: true,
            retry_on_overload_rejected: true,
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter_factor() -> f64 {
    0.25
}

fn default_true() -> bool {
    true
}

/// Per-provider circuit breaker settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CircuitBreakerSettings {
    /// Consecutive counted failures that open a closed circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds an open circuit waits before admitting a probe.
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,

    /// Probes admitted while half-open before giving up and re-opening.
    #[serde(default = "default_half_open_max_attempts")]
    pub half_open_max_attempts: u32,

    /// Consecutive half-open successes that close the circuit.
    #[serde(default = "default_half_open_success_threshold")]
    pub half_open_success_threshold: u32,

    /// Count `timeout` failures toward opening.
    #[serde(default = "default_true")]
    pub count_timeouts: bool,

    /// Count `target_unavailable` failures toward opening.
    #[serde(default = "default_true")]
    pub count_target_unavailable: bool,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
            half_open_max_attempts: default_half_open_max_attempts(),
            half_open_success_threshold: default_half_open_success_threshold(),
            count_timeouts: true,
            count_target_unavailable: true,
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout_secs() -> u64 {
    60
}

fn default_half_open_max_attempts() -> u32 {
    3
}

fn default_half_open_success_threshold() -> u32 {
    2
}

/// Per-channel provider-call timeouts.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutSettings {
    /// Budget for channels without an explicit entry, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub default_secs: u64,

    /// Channel name to budget in seconds.
    #[serde(default = "default_channel_timeouts")]
    pub channels: BTreeMap<String, u64>,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            default_secs: default_timeout_secs(),
            channels: default_channel_timeouts(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_channel_timeouts() -> BTreeMap<String, u64> {
    BTreeMap::from([("telegram".to_string(), 15), ("email".to_string(), 60)])
}
