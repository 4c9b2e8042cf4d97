// SPDX-FileCopyrightText: 2026 Butlers Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Exponential backoff retry with jitter and per-class retry toggles.

use std::future::Future;
use std::time::Duration;

use butlers_config::model::RetrySettings;
use butlers_core::{ButlersError, ErrorClass};
use rand::Rng;
use tracing::{debug, error, warn};

use crate::normalizer::{NormalizedError, ProviderContext, normalize};

/// How many times, and how far apart, a failed provider call is retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts per delivery, including the first try.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Randomization as a fraction of the delay (0.0 to 1.0).
    pub jitter_factor: f64,
    pub retry_on_timeout: bool,
    pub retry_on_target_unavailable: bool,
    pub retry_on_overload_rejected: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            jitter_factor: settings.jitter_factor,
            retry_on_timeout: settings.retry_on_timeout,
            retry_on_target_unavailable: settings.retry_on_target_unavailable,
            retry_on_overload_rejected: settings.retry_on_overload_rejected,
        }
    }
}

impl RetryPolicy {
    /// Whether this policy ever retries errors of `class`.
    ///
    /// `validation_error` and `internal_error` are never retried, whatever
    /// the toggles say.
    pub fn retries_class(&self, class: ErrorClass) -> bool {
        match class {
            ErrorClass::Timeout => self.retry_on_timeout,
            ErrorClass::TargetUnavailable => self.retry_on_target_unavailable,
            ErrorClass::OverloadRejected => self.retry_on_overload_rejected,
            ErrorClass::ValidationError | ErrorClass::InternalError => false,
        }
    }

    /// Un-jittered delay before `attempt_number`: zero for the first
    /// attempt, then `base * 2^(n-2)` capped at `max_delay`.
    pub fn base_backoff(&self, attempt_number: u32) -> Duration {
        if attempt_number <= 1 {
            return Duration::ZERO;
        }
        let factor = 2u32.checked_pow(attempt_number - 2).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Delay before `attempt_number` with jitter applied.
    ///
    /// The result lies in `[delay * (1 - j), delay * (1 + j)]`.
    pub fn calculate_backoff(&self, attempt_number: u32) -> Duration {
        let delay = self.base_backoff(attempt_number).as_secs_f64();
        if delay == 0.0 {
            return Duration::ZERO;
        }
        let spread = delay * self.jitter_factor.clamp(0.0, 1.0);
        let jitter = if spread > 0.0 {
            rand::thread_rng().gen_range(0.0..=2.0 * spread)
        } else {
            0.0
        };
        Duration::from_secs_f64((delay - spread + jitter).max(0.0))
    }

    /// Whether a failure on `attempt_number` should be followed by another try.
    pub fn should_retry(&self, error: &NormalizedError, attempt_number: u32) -> bool {
        if attempt_number >= self.max_attempts || !error.retryable {
            return false;
        }
        self.retries_class(error.error_class)
    }
}

/// Run `operation` until it succeeds or the policy gives up.
///
/// The closure receives the 1-based attempt number. Each failure is
/// normalized for the retry decision; the error returned is always the
/// original one from the last attempt.
pub async fn execute_with_retry<T, F, Fut>(
    mut operation: F,
    policy: &RetryPolicy,
    channel: &str,
    context: Option<&ProviderContext>,
) -> Result<T, ButlersError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ButlersError>>,
{
    let mut last_error = None;

    for attempt in 1..=policy.max_attempts {
        let err = match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(channel, attempt, "delivery succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_local() => {
                warn!(channel, attempt, error = %err, "local failure, not retrying");
                return Err(err);
            }
            Err(err) => err,
        };

        let normalized = normalize(&err, channel, context);
        if !policy.should_retry(&normalized, attempt) {
            if normalized.retryable && attempt >= policy.max_attempts {
                error!(
                    channel,
                    attempt,
                    error_class = %normalized.error_class,
                    error = %normalized.message,
                    "retries exhausted"
                );
            } else {
                warn!(
                    channel,
                    attempt,
                    error_class = %normalized.error_class,
                    error = %normalized.message,
                    "not retrying"
                );
            }
            return Err(err);
        }

        let delay = policy.calculate_backoff(attempt + 1);
        warn!(
            channel,
            attempt,
            max_attempts = policy.max_attempts,
            error_class = %normalized.error_class,
            delay_ms = delay.as_millis() as u64,
            error = %normalized.message,
            "attempt failed, retrying"
        );
        last_error = Some(err);
        tokio::time::sleep(delay).await;
    }

    Err(last_error.unwrap_or(ButlersError::RetryExhausted {
        attempts: policy.max_attempts,
    }))
}
