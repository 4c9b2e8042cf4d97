// SPDX-FileCopyrightText: 2026 Butlers Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-channel provider-call budgets.

use std::collections::HashMap;
use std::time::Duration;

use butlers_config::model::TimeoutSettings;

/// Channel name to timeout lookup with a default fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeoutConfig {
    default: Duration,
    channels: HashMap<String, Duration>,
}

impl TimeoutConfig {
    pub fn new(default: Duration, channels: impl IntoIterator<Item = (String, Duration)>) -> Self {
        Self {
            default,
            channels: channels
                .into_iter()
                .map(|(name, budget)| (normalize_channel(&name), budget))
                .collect(),
        }
    }

    /// Budget for `channel`; unknown channels get the default.
    ///
    /// Lookup ignores case and surrounding whitespace.
    pub fn get_timeout(&self, channel: &str) -> Duration {
        self.channels
            .get(&normalize_channel(channel))
            .copied()
            .unwrap_or(self.default)
    }

    pub fn default_timeout(&self) -> Duration {
        self.default
    }
}

impl From<&TimeoutSettings> for TimeoutConfig {
    fn from(settings: &TimeoutSettings) -> Self {
        Self::new(
            Duration::from_secs(settings.default_secs),
            settings
                .channels
                .iter()
                .map(|(name, secs)| (name.clone(), Duration::from_secs(*secs))),
        )
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self::from(&TimeoutSettings::default())
    }
}

fn normalize_channel(name: &str) -> String {
    name.trim().to_lowercase()
}
