// SPDX-FileCopyrightText: 2026 Butlers Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types used across adapter traits and the delivery pipeline.
//!
//! Every enumeration that is persisted as text uses the same snake_case
//! spelling for `Display`, `FromStr`, and serde, so a value read back from
//! SQLite parses into exactly the variant that was written.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::ButlersError;

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Identifies the type of adapter behind a [`PluginAdapter`](crate::PluginAdapter).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    Channel,
    Storage,
}

// --- Delivery vocabulary ---

/// Lifecycle status of a [`DeliveryRequest`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    InProgress,
    Delivered,
    Failed,
    DeadLettered,
}

impl DeliveryStatus {
    /// Terminal statuses carry `terminal_at` and never move back.
    pub fn is_terminal(self) -> bool {
        match self {
            Self::Pending | Self::InProgress => false,
            Self::Delivered | Self::Failed | Self::DeadLettered => true,
        }
    }

    /// Whether a request in `self` may be moved to `next`.
    ///
    /// `failed -> dead_lettered` is the only move out of a terminal status: a
    /// failed request may still be quarantined for replay.
    pub fn can_transition_to(self, next: DeliveryStatus) -> bool {
        use DeliveryStatus::*;
        match (self, next) {
            (Pending, InProgress | Delivered | Failed | DeadLettered) => true,
            (Pending, Pending) => false,
            (InProgress, InProgress | Delivered | Failed | DeadLettered) => true,
            (InProgress, Pending) => false,
            (Failed, DeadLettered) => true,
            (Failed, _) => false,
            (Delivered, _) | (DeadLettered, _) => false,
        }
    }

    /// Like [`can_transition_to`](Self::can_transition_to), as a `Result`.
    pub fn check_transition(self, next: DeliveryStatus) -> Result<(), ButlersError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(ButlersError::transition(self, next))
        }
    }
}

/// Why a message is being sent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryIntent {
    /// A fresh message to an explicit recipient.
    Send,
    /// A response routed back to the sender of an inbound message.
    Reply,
}

/// Outcome of a single provider-call attempt.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    RetryableError,
    NonRetryableError,
    Timeout,
    InProgress,
}

impl AttemptOutcome {
    /// Outcome recorded for an attempt that failed with `class`.
    pub fn for_failure(class: ErrorClass) -> Self {
        match class {
            ErrorClass::Timeout => Self::Timeout,
            ErrorClass::TargetUnavailable | ErrorClass::OverloadRejected => Self::RetryableError,
            ErrorClass::ValidationError | ErrorClass::InternalError => Self::NonRetryableError,
        }
    }
}

/// Kind of provider-side confirmation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReceiptType {
    Sent,
    Delivered,
    Read,
    WebhookConfirmation,
}

/// Canonical failure taxonomy every provider error is mapped into.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    ValidationError,
    Timeout,
    TargetUnavailable,
    OverloadRejected,
    InternalError,
}

impl ErrorClass {
    /// Whether errors of this class are worth another attempt.
    pub fn is_retryable(self) -> bool {
        match self {
            Self::Timeout | Self::TargetUnavailable | Self::OverloadRejected => true,
            Self::ValidationError | Self::InternalError => false,
        }
    }
}

// --- Persisted rows ---

/// One logical outbound-message intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRequest {
    pub id: String,
    pub idempotency_key: String,
    pub request_id: Option<String>,
    pub origin_butler: String,
    pub channel: String,
    pub intent: DeliveryIntent,
    pub target_identity: String,
    pub message_content: String,
    pub subject: Option<String>,
    pub request_envelope: serde_json::Value,
    pub status: DeliveryStatus,
    pub terminal_error_class: Option<ErrorClass>,
    pub terminal_error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub terminal_at: Option<String>,
}

/// Fields supplied by the caller when creating a delivery request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDeliveryRequest {
    pub idempotency_key: String,
    pub request_id: Option<String>,
    pub origin_butler: String,
    pub channel: String,
    pub intent: DeliveryIntent,
    pub target_identity: String,
    pub message_content: String,
    pub subject: Option<String>,
    pub request_envelope: serde_json::Value,
}

/// One provider-call attempt for a delivery request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub id: i64,
    pub delivery_request_id: String,
    pub attempt_number: u32,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub latency_ms: Option<i64>,
    pub outcome: AttemptOutcome,
    pub error_class: Option<ErrorClass>,
    pub error_message: Option<String>,
    pub provider_response: Option<serde_json::Value>,
}

/// The result written onto an attempt when it completes.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptCompletion {
    pub outcome: AttemptOutcome,
    pub latency_ms: i64,
    pub error_class: Option<ErrorClass>,
    pub error_message: Option<String>,
    pub provider_response: Option<serde_json::Value>,
}

impl AttemptCompletion {
    pub fn success(latency_ms: i64, provider_response: Option<serde_json::Value>) -> Self {
        Self {
            outcome: AttemptOutcome::Success,
            latency_ms,
            error_class: None,
            error_message: None,
            provider_response,
        }
    }

    pub fn failure(latency_ms: i64, class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            outcome: AttemptOutcome::for_failure(class),
            latency_ms,
            error_class: Some(class),
            error_message: Some(message.into()),
            provider_response: None,
        }
    }
}

/// Provider-side confirmation for a delivery request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub id: i64,
    pub delivery_request_id: String,
    pub provider_delivery_id: Option<String>,
    pub receipt_type: ReceiptType,
    pub received_at: String,
    pub metadata: Option<serde_json::Value>,
}

/// One element of a dead-letter entry's attempt history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptSummary {
    pub attempt_number: u32,
    pub outcome: AttemptOutcome,
    pub error_class: Option<ErrorClass>,
    pub error_message: Option<String>,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub latency_ms: Option<i64>,
}

impl From<&DeliveryAttempt> for AttemptSummary {
    fn from(attempt: &DeliveryAttempt) -> Self {
        Self {
            attempt_number: attempt.attempt_number,
            outcome: attempt.outcome,
            error_class: attempt.error_class,
            error_message: attempt.error_message.clone(),
            started_at: attempt.started_at.clone(),
            completed_at: attempt.completed_at.clone(),
            latency_ms: attempt.latency_ms,
        }
    }
}

/// Terminal quarantine record for a request that could not be delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub id: String,
    pub delivery_request_id: String,
    pub quarantine_reason: String,
    pub error_class: ErrorClass,
    pub error_summary: String,
    pub total_attempts: u32,
    pub first_attempt_at: Option<String>,
    pub last_attempt_at: Option<String>,
    pub original_request_envelope: serde_json::Value,
    pub all_attempt_outcomes: Vec<AttemptSummary>,
    pub replay_eligible: bool,
    pub replay_count: u32,
    pub discarded_at: Option<String>,
    pub discard_reason: Option<String>,
    pub created_at: String,
}

impl DeadLetterEntry {
    /// Eligible for replay and not permanently discarded.
    pub fn is_replayable(&self) -> bool {
        self.replay_eligible && self.discarded_at.is_none()
    }
}

/// Why and with which error a request is being quarantined.
#[derive(Debug, Clone, PartialEq)]
pub struct Quarantine {
    pub reason: String,
    pub error_class: ErrorClass,
    pub error_summary: String,
}

// --- Duplicate detection ---

/// What `check_duplicate` reports for a key that already has a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateStatus {
    pub delivery_id: String,
    pub status: DeliveryStatus,
    pub is_terminal: bool,
    /// `None` while the original request is still in flight.
    pub terminal_result: Option<TerminalResult>,
}

/// The cached outcome a resubmission receives instead of a new attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TerminalResult {
    Ok { delivery: DeliveryRef },
    Error { error: TerminalError },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRef {
    pub delivery_id: String,
    pub provider_delivery_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalError {
    pub class: Option<ErrorClass>,
    pub message: Option<String>,
    /// Always `false`: a failed key is never silently retried by resubmission.
    pub retryable: bool,
}

// --- Channel payloads ---

/// A message handed to a channel adapter for one provider call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub delivery_id: String,
    pub channel: String,
    pub intent: DeliveryIntent,
    pub target_identity: String,
    pub content: String,
    pub subject: Option<String>,
    pub envelope: serde_json::Value,
}

/// What a provider returns for an accepted message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderReceipt {
    pub provider_delivery_id: Option<String>,
    pub receipt_type: ReceiptType,
    pub metadata: Option<serde_json::Value>,
    /// Raw provider response kept on the attempt row.
    pub provider_response: Option<serde_json::Value>,
}

impl ProviderReceipt {
    /// A `sent` receipt carrying only the provider's message id.
    pub fn sent(provider_delivery_id: impl Into<String>) -> Self {
        Self {
            provider_delivery_id: Some(provider_delivery_id.into()),
            receipt_type: ReceiptType::Sent,
            metadata: None,
            provider_response: None,
        }
    }
}
