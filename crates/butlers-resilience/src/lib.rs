// SPDX-FileCopyrightText: 2026 Butlers Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Resilience primitives for outbound delivery.
//!
//! Every provider failure is first mapped onto the closed [`ErrorClass`]
//! taxonomy by [`normalize`]; the retry policy and the circuit breakers
//! make their decisions on that class alone.
//!
//! [`ErrorClass`]: butlers_core::ErrorClass

pub mod circuit;
pub mod normalizer;
pub mod retry;
pub mod timeout;

pub use circuit::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerStatus,
    CircuitState,
};
pub use normalizer::{NormalizedError, ProviderContext, normalize};
pub use retry::{RetryPolicy, execute_with_retry};
pub use timeout::TimeoutConfig;
