// SPDX-FileCopyrightText: 2026 Butlers Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Butlers delivery core.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{DeliveryStatus, ErrorClass};

/// The primary error type used across all Butlers adapter traits and core operations.
#[derive(Debug, Error)]
pub enum ButlersError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// The caller supplied a request that can never succeed as given.
    #[error("validation error: {0}")]
    Validation(String),

    /// Storage backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A delivery request with this idempotency key is already stored.
    #[error("delivery request already exists for idempotency key {idempotency_key}")]
    AlreadyExists { idempotency_key: String },

    /// A referenced row does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A state change that would move a record backwards or out of a terminal state.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Channel adapter errors (provider rejection, transport failure, rate limiting).
    #[error("channel error: {message}")]
    Channel {
        message: String,
        /// Provider status code, when the provider speaks HTTP.
        status_code: Option<u16>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// The provider's circuit breaker is open; the operation was not attempted.
    #[error("provider {provider} unavailable: circuit open since {opened_at}")]
    CircuitOpen {
        provider: String,
        opened_at: DateTime<Utc>,
        last_error_class: Option<ErrorClass>,
    },

    /// The retry loop finished without capturing an error to re-raise.
    #[error("retries exhausted after {attempts} attempts")]
    RetryExhausted { attempts: u32 },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ButlersError {
    /// Shorthand for a channel error without a status code or source.
    pub fn channel(message: impl Into<String>) -> Self {
        Self::Channel {
            message: message.into(),
            status_code: None,
            source: None,
        }
    }

    /// Shorthand for a channel error carrying the provider's status code.
    pub fn channel_status(status_code: u16, message: impl Into<String>) -> Self {
        Self::Channel {
            message: message.into(),
            status_code: Some(status_code),
            source: None,
        }
    }

    /// Failures of our own storage. They say nothing about a provider's health.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Storage { .. })
    }

    pub(crate) fn transition(from: DeliveryStatus, to: DeliveryStatus) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}
