// SPDX-FileCopyrightText: 2026 Butlers Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The circuit breaker wraps a whole retry sequence: one exhausted sequence
//! counts as one failure, and an open circuit never reaches the retry loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use butlers_core::ButlersError;
use butlers_resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryPolicy, TimeoutConfig,
    execute_with_retry,
};

fn breaker() -> CircuitBreaker {
    CircuitBreaker::new(
        "telegram",
        CircuitBreakerConfig {
            failure_threshold: 2,
            ..CircuitBreakerConfig::default()
        },
    )
}

async fn flaky_send(
    breaker: &CircuitBreaker,
    policy: &RetryPolicy,
    calls: Arc<AtomicU32>,
) -> Result<(), ButlersError> {
    let timeouts = TimeoutConfig::default();
    breaker
        .execute(
            || {
                execute_with_retry(
                    move |_attempt| {
                        let calls = calls.clone();
                        let budget = timeouts.get_timeout("telegram");
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            match tokio::time::timeout(budget, std::future::pending::<()>()).await
                            {
                                Ok(()) => Ok(()),
                                Err(_) => Err(ButlersError::Timeout { duration: budget }),
                            }
                        }
                    },
                    policy,
                    "telegram",
                    None,
                )
            },
            None,
        )
        .await
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_count_once_and_open_circuit_skips_calls() {
    let breaker = breaker();
    let policy = RetryPolicy::default();
    let calls = Arc::new(AtomicU32::new(0));

    let err = flaky_send(&breaker, &policy, calls.clone()).await.unwrap_err();
    assert!(matches!(err, ButlersError::Timeout { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(breaker.get_status().await.consecutive_failures, 1);

    flaky_send(&breaker, &policy, calls.clone()).await.unwrap_err();
    assert_eq!(breaker.get_status().await.state, CircuitState::Open);
    assert_eq!(calls.load(Ordering::SeqCst), 6);

    let err = flaky_send(&breaker, &policy, calls.clone()).await.unwrap_err();
    assert!(matches!(err, ButlersError::CircuitOpen { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 6, "open circuit must not call the provider");
}

#[tokio::test(start_paused = true)]
async fn provider_budget_is_enforced_per_attempt() {
    let breaker = breaker();
    let policy = RetryPolicy {
        max_attempts: 1,
        ..RetryPolicy::default()
    };
    let start = tokio::time::Instant::now();
    flaky_send(&breaker, &policy, Arc::new(AtomicU32::new(0)))
        .await
        .unwrap_err();
    assert_eq!(start.elapsed(), Duration::from_secs(15));
}
