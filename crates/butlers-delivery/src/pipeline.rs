// SPDX-FileCopyrightText: 2026 Butlers Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The delivery pipeline: dedupe, persist, send under resilience guards,
//! and settle the request into a terminal status.
//!
//! Failure policy once a send gives up:
//!
//! | Final error                                   | Request status  | Reason            |
//! |-----------------------------------------------|-----------------|-------------------|
//! | `validation_error`, `internal_error`          | `failed`        |                   |
//! | retryable class with its retry toggle off     | `failed`        |                   |
//! | retryable class, retry budget spent           | `dead_lettered` | `retry_exhausted` |
//! | circuit open (no attempt made)                | `dead_lettered` | `circuit_open`    |
//!
//! A store write failing in the middle of an attempt aborts the send. The
//! store error is returned as is; it is never retried, never counted by the
//! breaker, and the request is left `in_progress`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use butlers_config::model::DeliveryConfig;
use butlers_core::{
    AttemptCompletion, ButlersError, ChannelAdapter, DeadLetterEntry, DeliveryStatus,
    DeliveryStore, DuplicateStatus, ErrorClass, NewDeliveryRequest, OutboundMessage,
    ProviderReceipt, Quarantine,
};
use butlers_resilience::{
    CircuitBreakerConfig, CircuitBreakerRegistry, RetryPolicy, TimeoutConfig, execute_with_retry,
    normalize,
};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::idempotency::{DeliverySubmission, derive_idempotency_key};

pub const REASON_RETRY_EXHAUSTED: &str = "retry_exhausted";
pub const REASON_CIRCUIT_OPEN: &str = "circuit_open";

/// How a call to [`DeliveryPipeline::deliver`] ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered {
        delivery_id: String,
        provider_delivery_id: Option<String>,
        attempts: u32,
    },
    /// The key already had a request; nothing was sent.
    Duplicate(DuplicateStatus),
    Failed {
        delivery_id: String,
        error_class: ErrorClass,
        message: String,
    },
    DeadLettered {
        delivery_id: String,
        entry: DeadLetterEntry,
    },
}

impl DeliveryOutcome {
    /// Id of the delivery request this outcome refers to.
    pub fn delivery_id(&self) -> &str {
        match self {
            Self::Delivered { delivery_id, .. }
            | Self::Failed { delivery_id, .. }
            | Self::DeadLettered { delivery_id, .. } => delivery_id,
            Self::Duplicate(status) => &status.delivery_id,
        }
    }
}

/// Per-send bookkeeping shared with the attempt closure.
#[derive(Debug, Default)]
struct AttemptTracker {
    attempts: AtomicU32,
    store_failure: Mutex<Option<ButlersError>>,
}

impl AttemptTracker {
    /// Keep `err` for the caller and hand the guards a local error instead.
    fn abort(&self, err: ButlersError) -> ButlersError {
        let local = ButlersError::Storage {
            source: format!("delivery store failed mid-attempt: {err}").into(),
        };
        *self.store_failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(err);
        local
    }

    fn take_store_failure(&self) -> Option<ButlersError> {
        self.store_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Composes the store, breakers, retry policy, and timeouts.
pub struct DeliveryPipeline {
    store: Arc<dyn DeliveryStore>,
    breakers: Arc<CircuitBreakerRegistry>,
    retry: RetryPolicy,
    timeouts: TimeoutConfig,
}

impl DeliveryPipeline {
    pub fn new(store: Arc<dyn DeliveryStore>, config: &DeliveryConfig) -> Self {
        Self::with_parts(
            store,
            Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::from(
                &config.circuit_breaker,
            ))),
            RetryPolicy::from(&config.retry),
            TimeoutConfig::from(&config.timeouts),
        )
    }

    pub fn with_parts(
        store: Arc<dyn DeliveryStore>,
        breakers: Arc<CircuitBreakerRegistry>,
        retry: RetryPolicy,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            store,
            breakers,
            retry,
            timeouts,
        }
    }

    pub fn store(&self) -> &Arc<dyn DeliveryStore> {
        &self.store
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Deliver `submission` through `adapter` at most once per idempotency key.
    ///
    /// Validation failures of the submission itself are returned as errors
    /// before anything is stored. Provider failures are recorded and
    /// reported through the returned [`DeliveryOutcome`].
    pub async fn deliver(
        &self,
        submission: &DeliverySubmission,
        adapter: Arc<dyn ChannelAdapter>,
    ) -> Result<DeliveryOutcome, ButlersError> {
        let (key, components) = derive_idempotency_key(submission)?;

        if let Some(existing) = self.store.check_duplicate(&key).await? {
            info!(delivery_id = %existing.delivery_id, status = %existing.status, "duplicate submission");
            return Ok(DeliveryOutcome::Duplicate(existing));
        }

        let envelope = serde_json::to_value(submission)
            .map_err(|e| ButlersError::Internal(format!("failed to serialize submission: {e}")))?;
        let new_request = NewDeliveryRequest {
            idempotency_key: key.clone(),
            request_id: submission.request_id.clone(),
            origin_butler: components.origin.clone(),
            channel: components.channel.clone(),
            intent: submission.intent,
            target_identity: components.target.clone(),
            message_content: submission.message.clone(),
            subject: submission.subject.clone(),
            request_envelope: envelope,
        };

        // The unique index decides concurrent races; the loser reports the winner.
        let delivery_id = match self.store.create_delivery_request(&new_request).await {
            Ok(id) => id,
            Err(ButlersError::AlreadyExists { idempotency_key }) => {
                return match self.store.check_duplicate(&key).await? {
                    Some(existing) => Ok(DeliveryOutcome::Duplicate(existing)),
                    None => Err(ButlersError::AlreadyExists { idempotency_key }),
                };
            }
            Err(e) => return Err(e),
        };

        self.store
            .update_delivery_status(&delivery_id, DeliveryStatus::InProgress, None, None)
            .await?;

        let message = OutboundMessage {
            delivery_id: delivery_id.clone(),
            channel: components.channel.clone(),
            intent: submission.intent,
            target_identity: submission
                .provider_target()
                .unwrap_or_else(|| components.target.clone()),
            content: submission.message.clone(),
            subject: submission.subject.clone(),
            envelope: submission.envelope.clone(),
        };

        let tracker = AttemptTracker::default();
        let result = self
            .send_guarded(&delivery_id, &message, adapter.as_ref(), &tracker)
            .await;
        if let Some(err) = tracker.take_store_failure() {
            error!(
                delivery_id = %delivery_id,
                channel = %message.channel,
                error = %err,
                "delivery store failed during send, request left in progress"
            );
            return Err(err);
        }
        let attempts = tracker.attempts.load(Ordering::SeqCst);

        match result {
            Ok(receipt) => {
                self.store
                    .record_provider_delivery_id(
                        &delivery_id,
                        receipt.provider_delivery_id.as_deref(),
                        receipt.receipt_type,
                        receipt.metadata.clone(),
                    )
                    .await?;
                self.store
                    .update_delivery_status(&delivery_id, DeliveryStatus::Delivered, None, None)
                    .await?;
                info!(
                    delivery_id = %delivery_id,
                    channel = %message.channel,
                    attempts,
                    "message delivered"
                );
                Ok(DeliveryOutcome::Delivered {
                    delivery_id,
                    provider_delivery_id: receipt.provider_delivery_id,
                    attempts,
                })
            }
            Err(err) => self.settle_failure(delivery_id, &message.channel, err).await,
        }
    }

    /// One provider send under the breaker, the retry loop, and the timeout.
    async fn send_guarded(
        &self,
        delivery_id: &str,
        message: &OutboundMessage,
        adapter: &dyn ChannelAdapter,
        tracker: &AttemptTracker,
    ) -> Result<ProviderReceipt, ButlersError> {
        let channel = message.channel.as_str();
        let budget = self.timeouts.get_timeout(channel);
        let breaker = self.breakers.breaker(adapter.name()).await;
        let store = &self.store;

        let attempt_once = move |attempt: u32| async move {
            tracker.attempts.store(attempt, Ordering::SeqCst);
            if let Err(err) = store.record_attempt_start(delivery_id, attempt).await {
                return Err(tracker.abort(err));
            }

            let started = Instant::now();
            let result = match tokio::time::timeout(budget, adapter.send(message)).await {
                Ok(result) => result,
                Err(_) => Err(ButlersError::Timeout { duration: budget }),
            };
            let latency_ms = started.elapsed().as_millis() as i64;

            let completion = match &result {
                Ok(receipt) => AttemptCompletion::success(latency_ms, receipt.provider_response.clone()),
                Err(err) => {
                    let normalized = normalize(err, channel, None);
                    AttemptCompletion::failure(latency_ms, normalized.error_class, normalized.message)
                }
            };
            if let Err(err) = store.complete_attempt(delivery_id, attempt, &completion).await {
                return Err(tracker.abort(err));
            }
            result
        };

        breaker
            .execute(
                || execute_with_retry(attempt_once, &self.retry, channel, None),
                None,
            )
            .await
    }

    async fn settle_failure(
        &self,
        delivery_id: String,
        channel: &str,
        err: ButlersError,
    ) -> Result<DeliveryOutcome, ButlersError> {
        let (reason, class, summary) = match &err {
            ButlersError::CircuitOpen { .. } => (
                Some(REASON_CIRCUIT_OPEN),
                ErrorClass::TargetUnavailable,
                err.to_string(),
            ),
            _ => {
                let normalized = normalize(&err, channel, None);
                let exhausted =
                    normalized.retryable && self.retry.retries_class(normalized.error_class);
                (
                    exhausted.then_some(REASON_RETRY_EXHAUSTED),
                    normalized.error_class,
                    normalized.message,
                )
            }
        };

        match reason {
            Some(reason) => {
                let entry = self
                    .store
                    .dead_letter_request(
                        &delivery_id,
                        &Quarantine {
                            reason: reason.to_string(),
                            error_class: class,
                            error_summary: summary,
                        },
                    )
                    .await?;
                Ok(DeliveryOutcome::DeadLettered { delivery_id, entry })
            }
            None => {
                self.store
                    .update_delivery_status(
                        &delivery_id,
                        DeliveryStatus::Failed,
                        Some(class),
                        Some(summary.as_str()),
                    )
                    .await?;
                warn!(
                    delivery_id = %delivery_id,
                    channel,
                    error_class = %class,
                    error = %summary,
                    "delivery failed"
                );
                Ok(DeliveryOutcome::Failed {
                    delivery_id,
                    error_class: class,
                    message: summary,
                })
            }
        }
    }

    /// Re-submit a dead-lettered request under a fresh idempotency key.
    ///
    /// The replay carries request id `replay:<delivery_id>:<n>`, so it is a
    /// new delivery request. The entry is marked replayed only once that
    /// request exists; a replay that failed before then can be run again, and
    /// one that failed after it resolves to the same request as a duplicate.
    pub async fn replay_dead_letter(
        &self,
        delivery_id: &str,
        adapter: Arc<dyn ChannelAdapter>,
    ) -> Result<DeliveryOutcome, ButlersError> {
        let entry = self
            .store
            .get_dead_letter(delivery_id)
            .await?
            .ok_or_else(|| ButlersError::NotFound {
                entity: "dead letter entry",
                id: delivery_id.to_string(),
            })?;
        if !entry.is_replayable() {
            let from = if entry.discarded_at.is_some() {
                "discarded"
            } else {
                "replayed"
            };
            return Err(ButlersError::InvalidTransition {
                from: from.to_string(),
                to: "replayed".to_string(),
            });
        }

        let mut submission: DeliverySubmission =
            serde_json::from_value(entry.original_request_envelope.clone()).map_err(|e| {
                ButlersError::Internal(format!(
                    "dead letter {delivery_id} has an unreadable request envelope: {e}"
                ))
            })?;
        submission.request_id = Some(format!("replay:{delivery_id}:{}", entry.replay_count + 1));

        info!(delivery_id, replay = entry.replay_count + 1, "replaying dead letter");
        let outcome = self.deliver(&submission, adapter).await?;

        match self.store.mark_dead_letter_replayed(delivery_id).await {
            Ok(_) => {}
            // A concurrent replay of the same entry got there first.
            Err(ButlersError::InvalidTransition { .. }) => {
                info!(
                    delivery_id,
                    successor = %outcome.delivery_id(),
                    "dead letter already marked replayed"
                );
            }
            Err(err) => return Err(err),
        }
        Ok(outcome)
    }

    /// Permanently exclude a dead letter from replay.
    pub async fn discard_dead_letter(
        &self,
        delivery_id: &str,
        reason: &str,
    ) -> Result<DeadLetterEntry, ButlersError> {
        self.store.discard_dead_letter(delivery_id, reason).await
    }
}
