// SPDX-FileCopyrightText: 2026 Butlers Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable state machine for delivery requests, attempts, receipts, and
//! dead-letter entries.

use async_trait::async_trait;

use crate::error::ButlersError;
use crate::traits::storage::StorageAdapter;
use crate::types::{
    AttemptCompletion, DeadLetterEntry, DeliveryAttempt, DeliveryReceipt, DeliveryRequest,
    DeliveryStatus, DuplicateStatus, ErrorClass, NewDeliveryRequest, Quarantine, ReceiptType,
};

/// Storage for the delivery pipeline.
///
/// Implementations must make the idempotency-key uniqueness check atomic
/// with the insert: [`create_delivery_request`](Self::create_delivery_request)
/// is the only cross-process deduplication primitive. The store owns no
/// retry or circuit-breaker logic.
#[async_trait]
pub trait DeliveryStore: StorageAdapter {
    /// Returns the existing request for `idempotency_key`, or `None`.
    async fn check_duplicate(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<DuplicateStatus>, ButlersError>;

    /// Inserts a `pending` request and returns its id.
    ///
    /// Fails with [`ButlersError::AlreadyExists`] when the key is taken.
    async fn create_delivery_request(
        &self,
        request: &NewDeliveryRequest,
    ) -> Result<String, ButlersError>;

    /// Moves a request forward. Terminal statuses stamp `terminal_at` once
    /// and record the error fields; non-terminal moves leave them untouched.
    async fn update_delivery_status(
        &self,
        delivery_request_id: &str,
        status: DeliveryStatus,
        error_class: Option<ErrorClass>,
        error_message: Option<&str>,
    ) -> Result<(), ButlersError>;

    /// Appends a provider receipt. Does not touch the request row.
    async fn record_provider_delivery_id(
        &self,
        delivery_request_id: &str,
        provider_delivery_id: Option<&str>,
        receipt_type: ReceiptType,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), ButlersError>;

    async fn get_delivery_request(&self, id: &str) -> Result<DeliveryRequest, ButlersError>;

    /// Reverse lookup from a provider's message id to the owning request.
    async fn find_by_provider_delivery_id(
        &self,
        provider_delivery_id: &str,
    ) -> Result<Option<DeliveryRequest>, ButlersError>;

    /// Inserts an `in_progress` attempt row.
    async fn record_attempt_start(
        &self,
        delivery_request_id: &str,
        attempt_number: u32,
    ) -> Result<(), ButlersError>;

    /// Completes an `in_progress` attempt. Completed attempts are immutable.
    async fn complete_attempt(
        &self,
        delivery_request_id: &str,
        attempt_number: u32,
        completion: &AttemptCompletion,
    ) -> Result<(), ButlersError>;

    async fn list_attempts(
        &self,
        delivery_request_id: &str,
    ) -> Result<Vec<DeliveryAttempt>, ButlersError>;

    async fn list_receipts(
        &self,
        delivery_request_id: &str,
    ) -> Result<Vec<DeliveryReceipt>, ButlersError>;

    /// Writes the dead-letter entry and moves the request to `dead_lettered`
    /// in one transaction.
    async fn dead_letter_request(
        &self,
        delivery_request_id: &str,
        quarantine: &Quarantine,
    ) -> Result<DeadLetterEntry, ButlersError>;

    /// Dead-letter entry for a delivery request, if one exists.
    async fn get_dead_letter(
        &self,
        delivery_request_id: &str,
    ) -> Result<Option<DeadLetterEntry>, ButlersError>;

    async fn list_dead_letters(
        &self,
        replayable_only: bool,
    ) -> Result<Vec<DeadLetterEntry>, ButlersError>;

    /// Counts a replay and clears eligibility.
    async fn mark_dead_letter_replayed(
        &self,
        delivery_request_id: &str,
    ) -> Result<DeadLetterEntry, ButlersError>;

    /// Permanently excludes an entry from replay.
    async fn discard_dead_letter(
        &self,
        delivery_request_id: &str,
        reason: &str,
    ) -> Result<DeadLetterEntry, ButlersError>;
}
