// SPDX-FileCopyrightText: 2026 Butlers Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Maps any provider failure onto the canonical [`ErrorClass`] taxonomy.
//!
//! Rules are tried in order and the first match wins:
//!
//! | Class                | Matches on                                             |
//! |----------------------|--------------------------------------------------------|
//! | `validation_error`   | 400/401/403/422, client-side error kinds, keywords     |
//! | `timeout`            | timeout error kinds, keywords                          |
//! | `target_unavailable` | 429/502/503/504, connection error kinds, keywords      |
//! | `overload_rejected`  | keywords                                               |
//! | `internal_error`     | anything else (logged as unmapped)                     |

use std::error::Error as StdError;
use std::io;

use butlers_core::{ButlersError, ErrorClass};
use serde::{Deserialize, Serialize};
use tracing::warn;

const VALIDATION_STATUS: &[u16] = &[400, 401, 403, 422];
const UNAVAILABLE_STATUS: &[u16] = &[429, 502, 503, 504];

const VALIDATION_KEYWORDS: &[&str] = &[
    "invalid",
    "missing",
    "required",
    "malformed",
    "unauthorized",
    "forbidden",
    "permission denied",
    "not allowed",
];
const TIMEOUT_KEYWORDS: &[&str] = &["timeout", "timed out", "deadline exceeded"];
const UNAVAILABLE_KEYWORDS: &[&str] = &[
    "unavailable",
    "service unavailable",
    "too many requests",
    "rate limit",
    "throttled",
    "connection",
    "network",
    "dns",
];
const OVERLOAD_KEYWORDS: &[&str] = &[
    "queue full",
    "overload",
    "capacity exceeded",
    "too many pending",
    "admission rejected",
];

/// Provider-side details that travel with a failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderContext {
    /// HTTP-style status code returned by the provider.
    pub status_code: Option<u16>,
    /// Provider-specific error code, e.g. Telegram's `error_code`.
    pub provider_error_code: Option<String>,
    pub details: Option<serde_json::Value>,
}

impl ProviderContext {
    pub fn with_status(status_code: u16) -> Self {
        Self {
            status_code: Some(status_code),
            ..Self::default()
        }
    }
}

/// A failure after classification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedError {
    pub error_class: ErrorClass,
    pub message: String,
    pub retryable: bool,
    pub provider_context: Option<ProviderContext>,
}

/// Structural kind of an error, read from its variant and source chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorKind {
    Client,
    Timeout,
    Connection,
    Other,
}

/// Classify `error` raised while delivering on `channel`.
pub fn normalize(
    error: &ButlersError,
    channel: &str,
    provider_context: Option<&ProviderContext>,
) -> NormalizedError {
    let message = error.to_string();
    let lowered = message.to_lowercase();
    let status = provider_context
        .and_then(|ctx| ctx.status_code)
        .or(match error {
            ButlersError::Channel { status_code, .. } => *status_code,
            _ => None,
        });
    let kind = error_kind(error);
    let status_in = |codes: &[u16]| status.is_some_and(|s| codes.contains(&s));
    let mentions = |words: &[&str]| words.iter().any(|w| lowered.contains(w));

    let error_class = if status_in(VALIDATION_STATUS)
        || kind == ErrorKind::Client
        || mentions(VALIDATION_KEYWORDS)
    {
        ErrorClass::ValidationError
    } else if kind == ErrorKind::Timeout || mentions(TIMEOUT_KEYWORDS) {
        ErrorClass::Timeout
    } else if status_in(UNAVAILABLE_STATUS)
        || kind == ErrorKind::Connection
        || mentions(UNAVAILABLE_KEYWORDS)
    {
        ErrorClass::TargetUnavailable
    } else if mentions(OVERLOAD_KEYWORDS) {
        ErrorClass::OverloadRejected
    } else {
        warn!(
            channel,
            error_type = variant_name(error),
            status_code = status,
            unmapped = true,
            error = %message,
            "unmapped provider error, classifying as internal_error"
        );
        ErrorClass::InternalError
    };

    NormalizedError {
        error_class,
        message,
        retryable: error_class.is_retryable(),
        provider_context: provider_context.cloned(),
    }
}

fn error_kind(error: &ButlersError) -> ErrorKind {
    match error {
        ButlersError::Validation(_) | ButlersError::Config(_) => return ErrorKind::Client,
        ButlersError::Timeout { .. } => return ErrorKind::Timeout,
        _ => {}
    }

    let mut source = error.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            match io_err.kind() {
                io::ErrorKind::TimedOut => return ErrorKind::Timeout,
                io::ErrorKind::ConnectionRefused
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::NotConnected
                | io::ErrorKind::BrokenPipe => return ErrorKind::Connection,
                io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => {
                    return ErrorKind::Client;
                }
                _ => {}
            }
        }
        if cause.is::<tokio::time::error::Elapsed>() {
            return ErrorKind::Timeout;
        }
        if cause.is::<serde_json::Error>() {
            return ErrorKind::Client;
        }
        source = cause.source();
    }
    ErrorKind::Other
}

fn variant_name(error: &ButlersError) -> &'static str {
    match error {
        ButlersError::Config(_) => "config",
        ButlersError::Validation(_) => "validation",
        ButlersError::Storage { .. } => "storage",
        ButlersError::AlreadyExists { .. } => "already_exists",
        ButlersError::NotFound { .. } => "not_found",
        ButlersError::InvalidTransition { .. } => "invalid_transition",
        ButlersError::Channel { .. } => "channel",
        ButlersError::Timeout { .. } => "timeout",
        ButlersError::CircuitOpen { .. } => "circuit_open",
        ButlersError::RetryExhausted { .. } => "retry_exhausted",
        ButlersError::Internal(_) => "internal",
    }
}
