// SPDX-FileCopyrightText: 2026 Butlers Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end delivery testing.
//!
//! `TestHarness` assembles a temp SQLite store, a delivery pipeline, and a
//! mock channel. The pipeline reaches storage through a [`FaultyStore`] so
//! tests can fail individual writes. Retry backoff is zero by default so scenario tests with
//! several attempts finish immediately.

use std::sync::Arc;

use butlers_config::model::{ButlersConfig, DeliveryConfig, StorageConfig};
use butlers_core::{ButlersError, ChannelAdapter, DeliveryStore, StorageAdapter};
use butlers_delivery::{DeliveryOutcome, DeliveryPipeline, DeliverySubmission};
use butlers_storage::SqliteStorage;

use crate::faulty_store::FaultyStore;
use crate::mock_channel::MockChannel;

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    channel_name: String,
    delivery: DeliveryConfig,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        let mut delivery = DeliveryConfig::default();
        delivery.retry.base_delay_ms = 0;
        delivery.retry.max_delay_ms = 0;
        delivery.retry.jitter_factor = 0.0;
        Self {
            channel_name: "mock-channel".to_string(),
            delivery,
        }
    }

    /// Name the mock channel reports, which keys its circuit breaker.
    pub fn with_channel_name(mut self, name: impl Into<String>) -> Self {
        self.channel_name = name.into();
        self
    }

    /// Adjust retry, breaker, or timeout settings.
    pub fn with_delivery(mut self, configure: impl FnOnce(&mut DeliveryConfig)) -> Self {
        configure(&mut self.delivery);
        self
    }

    /// Build the test harness, creating all required subsystems.
    pub async fn build(self) -> Result<TestHarness, ButlersError> {
        let temp_dir =
            tempfile::TempDir::new().map_err(|e| ButlersError::Storage { source: e.into() })?;
        let db_path = temp_dir.path().join("test.db");

        let storage_config = StorageConfig {
            database_path: db_path.to_string_lossy().into_owned(),
            wal_mode: true,
        };
        let storage = Arc::new(SqliteStorage::new(storage_config.clone()));
        storage.initialize().await?;

        let faults = Arc::new(FaultyStore::new(storage.clone()));
        let pipeline = DeliveryPipeline::new(faults.clone(), &self.delivery);
        let config = ButlersConfig {
            storage: storage_config,
            delivery: self.delivery,
            ..ButlersConfig::default()
        };

        Ok(TestHarness {
            mock_channel: Arc::new(MockChannel::named(self.channel_name)),
            storage,
            faults,
            pipeline,
            config,
            _temp_dir: temp_dir,
        })
    }
}

/// A complete delivery environment with a mock channel and temp storage.
pub struct TestHarness {
    /// The mock provider adapter.
    pub mock_channel: Arc<MockChannel>,
    /// SQLite storage (temp DB, cleaned up on drop).
    pub storage: Arc<SqliteStorage>,
    /// The store the pipeline writes through; switch faults on here.
    pub faults: Arc<FaultyStore>,
    pub pipeline: DeliveryPipeline,
    /// Configuration the pipeline was built from.
    pub config: ButlersConfig,
    /// Temp directory kept alive for cleanup on drop.
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    /// Create a new builder for configuring the test harness.
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// The mock channel as the adapter type the pipeline takes.
    pub fn adapter(&self) -> Arc<dyn ChannelAdapter> {
        self.mock_channel.clone()
    }

    /// Deliver `submission` through the mock channel.
    pub async fn deliver(
        &self,
        submission: &DeliverySubmission,
    ) -> Result<DeliveryOutcome, ButlersError> {
        self.pipeline.deliver(submission, self.adapter()).await
    }

    /// A `send` from the health butler to `user123` over telegram.
    pub fn submission(message: &str) -> DeliverySubmission {
        DeliverySubmission::send("health", "telegram", "user123", message)
    }

    pub fn store(&self) -> &dyn DeliveryStore {
        self.storage.as_ref()
    }
}
