// SPDX-FileCopyrightText: 2026 Butlers Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A `DeliveryStore` wrapper that fails chosen writes on demand.
//!
//! Everything delegates to the wrapped store until a fault is switched on,
//! after which the matching operation returns a storage error shaped like a
//! dropped database connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use butlers_core::traits::adapter::PluginAdapter;
use butlers_core::types::{AdapterType, HealthStatus};
use butlers_core::{
    AttemptCompletion, ButlersError, DeadLetterEntry, DeliveryAttempt, DeliveryReceipt,
    DeliveryRequest, DeliveryStatus, DeliveryStore, DuplicateStatus, ErrorClass,
    NewDeliveryRequest, Quarantine, ReceiptType, StorageAdapter,
};

/// Store operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFault {
    CreateRequest,
    AttemptStart,
    AttemptComplete,
}

pub struct FaultyStore {
    inner: Arc<dyn DeliveryStore>,
    create_request: AtomicBool,
    attempt_start: AtomicBool,
    attempt_complete: AtomicBool,
}

impl FaultyStore {
    pub fn new(inner: Arc<dyn DeliveryStore>) -> Self {
        Self {
            inner,
            create_request: AtomicBool::new(false),
            attempt_start: AtomicBool::new(false),
            attempt_complete: AtomicBool::new(false),
        }
    }

    fn flag(&self, fault: StoreFault) -> &AtomicBool {
        match fault {
            StoreFault::CreateRequest => &self.create_request,
            StoreFault::AttemptStart => &self.attempt_start,
            StoreFault::AttemptComplete => &self.attempt_complete,
        }
    }

    /// Make `fault`'s operation fail until [`heal`](Self::heal) is called.
    pub fn inject(&self, fault: StoreFault) {
        self.flag(fault).store(true, Ordering::SeqCst);
    }

    pub fn heal(&self, fault: StoreFault) {
        self.flag(fault).store(false, Ordering::SeqCst);
    }

    fn check(&self, fault: StoreFault) -> Result<(), ButlersError> {
        if self.flag(fault).load(Ordering::SeqCst) {
            return Err(ButlersError::Storage {
                source: "database connection closed".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PluginAdapter for FaultyStore {
    fn name(&self) -> &str {
        "faulty-store"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Storage
    }

    async fn health_check(&self) -> Result<HealthStatus, ButlersError> {
        self.inner.health_check().await
    }

    async fn shutdown(&self) -> Result<(), ButlersError> {
        self.inner.shutdown().await
    }
}

#[async_trait]
impl StorageAdapter for FaultyStore {
    async fn initialize(&self) -> Result<(), ButlersError> {
        self.inner.initialize().await
    }

    async fn close(&self) -> Result<(), ButlersError> {
        self.inner.close().await
    }
}

#[async_trait]
impl DeliveryStore for FaultyStore {
    async fn check_duplicate(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<DuplicateStatus>, ButlersError> {
        self.inner.check_duplicate(idempotency_key).await
    }

    async fn create_delivery_request(
        &self,
        request: &NewDeliveryRequest,
    ) -> Result<String, ButlersError> {
        self.check(StoreFault::CreateRequest)?;
        self.inner.create_delivery_request(request).await
    }

    async fn update_delivery_status(
        &self,
        delivery_request_id: &str,
        status: DeliveryStatus,
        error_class: Option<ErrorClass>,
        error_message: Option<&str>,
    ) -> Result<(), ButlersError> {
        self.inner
            .update_delivery_status(delivery_request_id, status, error_class, error_message)
            .await
    }

    async fn record_provider_delivery_id(
        &self,
        delivery_request_id: &str,
        provider_delivery_id: Option<&str>,
        receipt_type: ReceiptType,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), ButlersError> {
        self.inner
            .record_provider_delivery_id(
                delivery_request_id,
                provider_delivery_id,
                receipt_type,
                metadata,
            )
            .await
    }

    async fn get_delivery_request(&self, id: &str) -> Result<DeliveryRequest, ButlersError> {
        self.inner.get_delivery_request(id).await
    }

    async fn find_by_provider_delivery_id(
        &self,
        provider_delivery_id: &str,
    ) -> Result<Option<DeliveryRequest>, ButlersError> {
        self.inner
            .find_by_provider_delivery_id(provider_delivery_id)
            .await
    }

    async fn record_attempt_start(
        &self,
        delivery_request_id: &str,
        attempt_number: u32,
    ) -> Result<(), ButlersError> {
        self.check(StoreFault::AttemptStart)?;
        self.inner
            .record_attempt_start(delivery_request_id, attempt_number)
            .await
    }

    async fn complete_attempt(
        &self,
        delivery_request_id: &str,
        attempt_number: u32,
        completion: &AttemptCompletion,
    ) -> Result<(), ButlersError> {
        self.check(StoreFault::AttemptComplete)?;
        self.inner
            .complete_attempt(delivery_request_id, attempt_number, completion)
            .await
    }

    async fn list_attempts(
        &self,
        delivery_request_id: &str,
    ) -> Result<Vec<DeliveryAttempt>, ButlersError> {
        self.inner.list_attempts(delivery_request_id).await
    }

    async fn list_receipts(
        &self,
        delivery_request_id: &str,
    ) -> Result<Vec<DeliveryReceipt>, ButlersError> {
        self.inner.list_receipts(delivery_request_id).await
    }

    async fn dead_letter_request(
        &self,
        delivery_request_id: &str,
        quarantine: &Quarantine,
    ) -> Result<DeadLetterEntry, ButlersError> {
        self.inner
            .dead_letter_request(delivery_request_id, quarantine)
            .await
    }

    async fn get_dead_letter(
        &self,
        delivery_request_id: &str,
    ) -> Result<Option<DeadLetterEntry>, ButlersError> {
        self.inner.get_dead_letter(delivery_request_id).await
    }

    async fn list_dead_letters(
        &self,
        replayable_only: bool,
    ) -> Result<Vec<DeadLetterEntry>, ButlersError> {
        self.inner.list_dead_letters(replayable_only).await
    }

    async fn mark_dead_letter_replayed(
        &self,
        delivery_request_id: &str,
    ) -> Result<DeadLetterEntry, ButlersError> {
        self.inner
            .mark_dead_letter_replayed(delivery_request_id)
            .await
    }

    async fn discard_dead_letter(
        &self,
        delivery_request_id: &str,
        reason: &str,
    ) -> Result<DeadLetterEntry, ButlersError> {
        self.inner
            .discard_dead_letter(delivery_request_id, reason)
            .await
    }
}
