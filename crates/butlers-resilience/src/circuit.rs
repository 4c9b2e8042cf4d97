// SPDX-FileCopyrightText: 2026 Butlers Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-provider circuit breakers.
//!
//! ```text
//!   closed ──(failure_threshold counted failures)──▶ open
//!     ▲                                               │
//!     │                                     recovery_timeout
//!     │                                               ▼
//!     └──(half_open_success_threshold successes)── half_open
//!                                                     │
//!                     counted failure, or half_open_max_attempts
//!                     probes without enough successes ──▶ open
//! ```
//!
//! State lives behind a mutex that is held only while checking or updating
//! it; the wrapped operation always runs outside the lock. A half-open window
//! whose calls never report back (their futures were dropped) expires after
//! another `recovery_timeout` and admits a fresh set of calls.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use butlers_config::model::CircuitBreakerSettings;
use butlers_core::{ButlersError, ErrorClass};
use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::Display;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::normalizer::{ProviderContext, normalize};

/// Thresholds shared by every breaker in a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub half_open_max_attempts: u32,
    pub half_open_success_threshold: u32,
    pub count_timeouts: bool,
    pub count_target_unavailable: bool,
}

impl CircuitBreakerConfig {
    /// Whether a failure of `class` moves the breaker toward open.
    pub fn counts(&self, class: ErrorClass) -> bool {
        match class {
            ErrorClass::ValidationError => false,
            ErrorClass::Timeout => self.count_timeouts,
            ErrorClass::TargetUnavailable => self.count_target_unavailable,
            ErrorClass::OverloadRejected | ErrorClass::InternalError => true,
        }
    }
}

impl From<&CircuitBreakerSettings> for CircuitBreakerConfig {
    fn from(settings: &CircuitBreakerSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold,
            recovery_timeout: Duration::from_secs(settings.recovery_timeout_secs),
            half_open_max_attempts: settings.half_open_max_attempts,
            half_open_success_threshold: settings.half_open_success_threshold,
            count_timeouts: settings.count_timeouts,
            count_target_unavailable: settings.count_target_unavailable,
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::from(&CircuitBreakerSettings::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Snapshot of a breaker for dashboards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitBreakerStatus {
    pub provider: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub half_open_attempts: u32,
    pub half_open_successes: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub last_error_class: Option<ErrorClass>,
    pub last_error_message: Option<String>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
    pub half_open_max_attempts: u32,
    pub half_open_success_threshold: u32,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_attempts: u32,
    half_open_successes: u32,
    opened_at: Option<Instant>,
    half_open_since: Option<Instant>,
    opened_at_utc: Option<DateTime<Utc>>,
    last_error_class: Option<ErrorClass>,
    last_error_message: Option<String>,
    last_failure_at: Option<DateTime<Utc>>,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_attempts: 0,
            half_open_successes: 0,
            opened_at: None,
            half_open_since: None,
            opened_at_utc: None,
            last_error_class: None,
            last_error_message: None,
            last_failure_at: None,
        }
    }
}

/// Fail-fast guard for one provider.
#[derive(Debug)]
pub struct CircuitBreaker {
    provider: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(provider: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            provider: provider.into(),
            config,
            state: Mutex::new(BreakerState::new()),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Run `operation` unless the circuit is open.
    ///
    /// An open circuit returns [`ButlersError::CircuitOpen`] without calling
    /// `operation`. Failures are normalized with `context` to decide whether
    /// they count toward opening. Local failures (see
    /// [`ButlersError::is_local`]) are passed through without touching the
    /// breaker, and hand back a half-open slot.
    pub async fn execute<T, F, Fut>(
        &self,
        operation: F,
        context: Option<&ProviderContext>,
    ) -> Result<T, ButlersError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ButlersError>>,
    {
        self.admit().await?;

        match operation().await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(err) if err.is_local() => {
                self.release().await;
                Err(err)
            }
            Err(err) => {
                let normalized = normalize(&err, &self.provider, context);
                self.record_failure(normalized.error_class, &normalized.message)
                    .await;
                Err(err)
            }
        }
    }

    async fn admit(&self) -> Result<(), ButlersError> {
        let mut st = self.state.lock().await;

        if st.state == CircuitState::Open {
            let elapsed = st.opened_at.map(|at| at.elapsed()).unwrap_or_default();
            if elapsed < self.config.recovery_timeout {
                return Err(self.open_error(&st));
            }
            self.transition(&mut st, CircuitState::HalfOpen);
        }

        if st.state == CircuitState::HalfOpen {
            if st.half_open_attempts >= self.config.half_open_max_attempts {
                let stale = st
                    .half_open_since
                    .is_some_and(|since| since.elapsed() >= self.config.recovery_timeout);
                if !stale {
                    return Err(self.open_error(&st));
                }
                warn!(
                    provider = %self.provider,
                    outstanding = st.half_open_attempts,
                    "half-open calls never reported back, starting a new window"
                );
                st.half_open_attempts = 0;
                st.half_open_successes = 0;
                st.half_open_since = Some(Instant::now());
            }
            st.half_open_attempts += 1;
        }
        Ok(())
    }

    async fn release(&self) {
        let mut st = self.state.lock().await;
        if st.state == CircuitState::HalfOpen {
            st.half_open_attempts = st.half_open_attempts.saturating_sub(1);
        }
    }

    async fn record_success(&self) {
        let mut st = self.state.lock().await;
        match st.state {
            CircuitState::Closed => st.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                st.half_open_successes += 1;
                if st.half_open_successes >= self.config.half_open_success_threshold {
                    self.transition(&mut st, CircuitState::Closed);
                } else {
                    self.settle_half_open(&mut st);
                }
            }
            // A concurrent probe already re-opened the circuit.
            CircuitState::Open => {}
        }
    }

    async fn record_failure(&self, class: ErrorClass, message: &str) {
        let mut st = self.state.lock().await;
        st.last_error_class = Some(class);
        st.last_error_message = Some(message.to_string());
        st.last_failure_at = Some(Utc::now());

        if !self.config.counts(class) {
            if st.state == CircuitState::HalfOpen {
                self.settle_half_open(&mut st);
            }
            return;
        }

        match st.state {
            CircuitState::Closed => {
                st.consecutive_failures += 1;
                if st.consecutive_failures >= self.config.failure_threshold {
                    self.transition(&mut st, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => self.transition(&mut st, CircuitState::Open),
            CircuitState::Open => {}
        }
    }

    /// Re-open once every half-open probe has been spent without closing.
    fn settle_half_open(&self, st: &mut BreakerState) {
        if st.half_open_attempts >= self.config.half_open_max_attempts
            && st.half_open_successes < self.config.half_open_success_threshold
        {
            self.transition(st, CircuitState::Open);
        }
    }

    fn transition(&self, st: &mut BreakerState, to: CircuitState) {
        let from = st.state;
        st.state = to;
        st.half_open_attempts = 0;
        st.half_open_successes = 0;
        st.half_open_since = None;

        match to {
            CircuitState::Open => {
                st.opened_at = Some(Instant::now());
                st.opened_at_utc = Some(Utc::now());
                warn!(
                    provider = %self.provider,
                    %from,
                    consecutive_failures = st.consecutive_failures,
                    last_error_class = ?st.last_error_class,
                    "circuit breaker opened"
                );
            }
            CircuitState::HalfOpen => {
                st.half_open_since = Some(Instant::now());
                info!(provider = %self.provider, %from, "circuit breaker half-open, probing");
            }
            CircuitState::Closed => {
                st.consecutive_failures = 0;
                st.opened_at = None;
                st.opened_at_utc = None;
                info!(provider = %self.provider, %from, "circuit breaker closed");
            }
        }
    }

    fn open_error(&self, st: &BreakerState) -> ButlersError {
        ButlersError::CircuitOpen {
            provider: self.provider.clone(),
            opened_at: st.opened_at_utc.unwrap_or_else(Utc::now),
            last_error_class: st.last_error_class,
        }
    }

    pub async fn get_status(&self) -> CircuitBreakerStatus {
        let st = self.state.lock().await;
        CircuitBreakerStatus {
            provider: self.provider.clone(),
            state: st.state,
            consecutive_failures: st.consecutive_failures,
            half_open_attempts: st.half_open_attempts,
            half_open_successes: st.half_open_successes,
            opened_at: st.opened_at_utc,
            last_error_class: st.last_error_class,
            last_error_message: st.last_error_message.clone(),
            last_failure_at: st.last_failure_at,
            failure_threshold: self.config.failure_threshold,
            recovery_timeout_secs: self.config.recovery_timeout.as_secs(),
            half_open_max_attempts: self.config.half_open_max_attempts,
            half_open_success_threshold: self.config.half_open_success_threshold,
        }
    }

    /// Force the breaker closed and forget its history.
    pub async fn reset(&self) {
        let mut st = self.state.lock().await;
        *st = BreakerState::new();
        info!(provider = %self.provider, "circuit breaker reset");
    }
}

/// Lazily created breakers, one per provider, sharing one configuration.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// The breaker for `provider`, created closed on first use.
    pub async fn breaker(&self, provider: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().await;
        breakers
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(provider, self.config.clone())))
            .clone()
    }

    /// Status of every breaker, sorted by provider.
    pub async fn statuses(&self) -> Vec<CircuitBreakerStatus> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.lock().await.values().cloned().collect();
        let mut statuses = Vec::with_capacity(breakers.len());
        for breaker in breakers {
            statuses.push(breaker.get_status().await);
        }
        statuses.sort_by(|a, b| a.provider.cmp(&b.provider));
        statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_attempts: 3,
            half_open_success_threshold: 2,
            count_timeouts: true,
            count_target_unavailable: true,
        }
    }

    async fn fail(breaker: &CircuitBreaker, message: &str) -> ButlersError {
        let message = message.to_string();
        breaker
            .execute(|| async move { Err::<(), _>(ButlersError::channel(message)) }, None)
            .await
            .unwrap_err()
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<u32, ButlersError> {
        breaker.execute(|| async { Ok(7) }, None).await
    }

    async fn open(breaker: &CircuitBreaker) {
        for _ in 0..3 {
            fail(breaker, "service unavailable").await;
        }
        assert_eq!(breaker.get_status().await.state, CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_counted_failures() {
        let breaker = CircuitBreaker::new("telegram", config());
        fail(&breaker, "service unavailable").await;
        fail(&breaker, "service unavailable").await;
        assert_eq!(breaker.get_status().await.state, CircuitState::Closed);
        assert_eq!(breaker.get_status().await.consecutive_failures, 2);

        fail(&breaker, "service unavailable").await;
        let status = breaker.get_status().await;
        assert_eq!(status.state, CircuitState::Open);
        assert!(status.opened_at.is_some());
        assert_eq!(status.last_error_class, Some(ErrorClass::TargetUnavailable));
    }

    #[tokio::test(start_paused = true)]
    async fn default_config_opens_on_fifth_failure() {
        let breaker = CircuitBreaker::new("telegram", CircuitBreakerConfig::default());
        for _ in 0..4 {
            fail(&breaker, "connection refused").await;
        }
        assert_eq!(breaker.get_status().await.state, CircuitState::Closed);

        fail(&breaker, "connection refused").await;
        assert_eq!(breaker.get_status().await.state, CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_failure_count() {
        let breaker = CircuitBreaker::new("telegram", config());
        fail(&breaker, "timed out").await;
        fail(&breaker, "timed out").await;
        succeed(&breaker).await.unwrap();
        fail(&breaker, "timed out").await;
        assert_eq!(breaker.get_status().await.state, CircuitState::Closed);
        assert_eq!(breaker.get_status().await.consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn validation_errors_never_count() {
        let breaker = CircuitBreaker::new("telegram", config());
        for _ in 0..10 {
            fail(&breaker, "invalid chat id").await;
        }
        let status = breaker.get_status().await;
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(status.last_error_class, Some(ErrorClass::ValidationError));
    }

    #[tokio::test(start_paused = true)]
    async fn uncounted_timeouts_leave_circuit_closed() {
        let breaker = CircuitBreaker::new(
            "email",
            CircuitBreakerConfig {
                count_timeouts: false,
                ..config()
            },
        );
        for _ in 0..5 {
            fail(&breaker, "deadline exceeded").await;
        }
        assert_eq!(breaker.get_status().await.state, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn open_circuit_fails_fast_without_calling_operation() {
        let breaker = CircuitBreaker::new("telegram", config());
        open(&breaker).await;

        let mut called = false;
        let err = breaker
            .execute(
                || {
                    called = true;
                    async { Ok(()) }
                },
                None,
            )
            .await
            .unwrap_err();
        assert!(!called);
        match err {
            ButlersError::CircuitOpen {
                provider,
                last_error_class,
                ..
            } => {
                assert_eq!(provider, "telegram");
                assert_eq!(last_error_class, Some(ErrorClass::TargetUnavailable));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_successes_close_the_circuit() {
        let breaker = CircuitBreaker::new("telegram", config());
        open(&breaker).await;

        tokio::time::advance(Duration::from_secs(61)).await;
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.get_status().await.state, CircuitState::HalfOpen);
        succeed(&breaker).await.unwrap();

        let status = breaker.get_status().await;
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.consecutive_failures, 0);
        assert!(status.opened_at.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stays_open_before_recovery_timeout() {
        let breaker = CircuitBreaker::new("telegram", config());
        open(&breaker).await;

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(matches!(
            succeed(&breaker).await,
            Err(ButlersError::CircuitOpen { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("telegram", config());
        open(&breaker).await;

        tokio::time::advance(Duration::from_secs(61)).await;
        fail(&breaker, "connection refused").await;
        assert_eq!(breaker.get_status().await.state, CircuitState::Open);
        assert!(matches!(
            succeed(&breaker).await,
            Err(ButlersError::CircuitOpen { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_reopens_when_probes_run_out() {
        let breaker = CircuitBreaker::new("telegram", config());
        open(&breaker).await;
        tokio::time::advance(Duration::from_secs(61)).await;

        // Uncounted failures use up probes without closing the circuit.
        succeed(&breaker).await.unwrap();
        fail(&breaker, "invalid payload").await;
        assert_eq!(breaker.get_status().await.state, CircuitState::HalfOpen);
        fail(&breaker, "invalid payload").await;
        assert_eq!(breaker.get_status().await.state, CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_half_open_calls_do_not_wedge_the_breaker() {
        let breaker = CircuitBreaker::new(
            "telegram",
            CircuitBreakerConfig {
                failure_threshold: 1,
                ..config()
            },
        );
        fail(&breaker, "service unavailable").await;
        assert_eq!(breaker.get_status().await.state, CircuitState::Open);
        tokio::time::advance(Duration::from_secs(61)).await;

        // Callers give up on every half-open call, so none of them reports back.
        for _ in 0..3 {
            let abandoned = tokio::time::timeout(
                Duration::from_secs(1),
                breaker.execute(|| std::future::pending::<Result<(), ButlersError>>(), None),
            )
            .await;
            assert!(abandoned.is_err());
        }
        assert!(matches!(
            succeed(&breaker).await,
            Err(ButlersError::CircuitOpen { .. })
        ));

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!(succeed(&breaker).await.unwrap(), 7);
        assert_eq!(succeed(&breaker).await.unwrap(), 7);
        assert_eq!(breaker.get_status().await.state, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn local_failures_leave_breaker_untouched() {
        let breaker = CircuitBreaker::new("telegram", config());
        for _ in 0..5 {
            let err = breaker
                .execute(
                    || async {
                        Err::<(), _>(ButlersError::Storage {
                            source: "connection closed".into(),
                        })
                    },
                    None,
                )
                .await
                .unwrap_err();
            assert!(err.is_local());
        }
        let status = breaker.get_status().await;
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.consecutive_failures, 0);
        assert!(status.last_error_class.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_forces_closed() {
        let breaker = CircuitBreaker::new("telegram", config());
        open(&breaker).await;
        breaker.reset().await;
        assert_eq!(breaker.get_status().await.state, CircuitState::Closed);
        assert_eq!(succeed(&breaker).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn registry_shares_breakers_per_provider() {
        let registry = CircuitBreakerRegistry::new(config());
        let a = registry.breaker("telegram").await;
        let b = registry.breaker("telegram").await;
        let c = registry.breaker("email").await;
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));

        let statuses = registry.statuses().await;
        let providers: Vec<_> = statuses.iter().map(|s| s.provider.as_str()).collect();
        assert_eq!(providers, ["email", "telegram"]);
        assert_eq!(statuses[0].failure_threshold, 3);
        assert_eq!(statuses[0].recovery_timeout_secs, 60);
    }

    #[test]
    fn status_serializes_state_in_snake_case() {
        let json = serde_json::to_value(CircuitState::HalfOpen).unwrap();
        assert_eq!(json, "half_open");
        assert_eq!(CircuitState::HalfOpen.to_string(), "half_open");
    }
}
