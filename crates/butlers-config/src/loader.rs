// SPDX-FileCopyrightText: 2026 Butlers Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./butlers.toml` > `~/.config/butlers/butlers.toml` > `/etc/butlers/butlers.toml`
//! with environment variable overrides via `BUTLERS_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::ButlersConfig;

/// Section prefixes for env var keys, longest first.
///
/// `BUTLERS_DELIVERY_RETRY_MAX_ATTEMPTS` arrives as `DELIVERY_RETRY_MAX_ATTEMPTS`
/// and must become `delivery.retry.max_attempts`; splitting on every `_` would
/// break field names such as `max_attempts`.
const ENV_SECTIONS: &[(&str, &str)] = &[
    ("delivery_circuit_breaker_", "delivery.circuit_breaker."),
    ("delivery_timeouts_channels_", "delivery.timeouts.channels."),
    ("delivery_timeouts_", "delivery.timeouts."),
    ("delivery_retry_", "delivery.retry."),
    ("storage_", "storage."),
    ("log_", "log."),
];

/// Config file locations in merge order (later overrides earlier).
pub fn config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("/etc/butlers/butlers.toml")];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("butlers/butlers.toml"));
    }
    paths.push(PathBuf::from("butlers.toml"));
    paths
}

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/butlers/butlers.toml` (system-wide)
/// 3. `~/.config/butlers/butlers.toml` (user XDG config)
/// 4. `./butlers.toml` (local directory)
/// 5. `BUTLERS_*` environment variables
pub fn load_config() -> Result<ButlersConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env).
pub fn load_config_from_str(toml_content: &str) -> Result<ButlersConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(ButlersConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<ButlersConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(ButlersConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// The Figment behind [`load_config`], before extraction.
pub fn build_figment() -> Figment {
    config_paths()
        .into_iter()
        .fold(
            Figment::new().merge(Serialized::defaults(ButlersConfig::default())),
            |figment, path| figment.merge(Toml::file(path)),
        )
        .merge(env_provider())
}

fn env_provider() -> Env {
    Env::prefixed("BUTLERS_").map(|key| map_env_key(key.as_str()).into())
}

/// Map a prefix-stripped env key onto its dotted config path.
///
/// Figment hands the key over in its original case and only lowercases it
/// after `map`, so matching happens on a lowercased copy.
pub(crate) fn map_env_key(key: &str) -> String {
    let key = key.to_ascii_lowercase();
    for (prefix, section) in ENV_SECTIONS {
        if let Some(field) = key.strip_prefix(prefix) {
            return format!("{section}{field}");
        }
    }
    key
}
