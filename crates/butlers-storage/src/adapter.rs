// SPDX-FileCopyrightText: 2026 Butlers Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the DeliveryStore trait.

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

use butlers_config::model::StorageConfig;
use butlers_core::{
    AdapterType, AttemptCompletion, ButlersError, DeadLetterEntry, DeliveryAttempt,
    DeliveryReceipt, DeliveryRequest, DeliveryStatus, DeliveryStore, DuplicateStatus,
    ErrorClass, HealthStatus, NewDeliveryRequest, PluginAdapter, Quarantine, ReceiptType,
    StorageAdapter,
};

use crate::database::{Database, map_tr_err};
use crate::queries;

/// SQLite-backed delivery store.
///
/// Wraps a [`Database`] handle and delegates all query operations to the
/// typed query modules. The database is lazily opened on the first call to
/// [`StorageAdapter::initialize`].
pub struct SqliteStorage {
    config: StorageConfig,
    db: OnceCell<Database>,
}

impl SqliteStorage {
    /// Create a new SqliteStorage with the given configuration.
    ///
    /// The database connection is not opened until [`initialize`](StorageAdapter::initialize) is called.
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            db: OnceCell::new(),
        }
    }

    /// Wrap an already opened database, e.g. [`Database::open_in_memory`].
    pub fn from_database(config: StorageConfig, db: Database) -> Self {
        Self {
            config,
            db: OnceCell::new_with(Some(db)),
        }
    }

    fn db(&self) -> Result<&Database, ButlersError> {
        self.db.get().ok_or_else(|| ButlersError::Storage {
            source: "storage not initialized -- call initialize() first".into(),
        })
    }
}

#[async_trait]
impl PluginAdapter for SqliteStorage {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Storage
    }

    async fn health_check(&self) -> Result<HealthStatus, ButlersError> {
        let db = self.db()?;
        db.connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("SELECT 1;")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), ButlersError> {
        if let Some(db) = self.db.get() {
            db.checkpoint().await?;
            debug!("shutdown: WAL checkpoint complete");
        }
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for SqliteStorage {
    async fn initialize(&self) -> Result<(), ButlersError> {
        let path = &self.config.database_path;
        if let Some(parent) = std::path::Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| ButlersError::Storage {
                source: Box::new(e),
            })?;
        }
        let db = Database::open_with(path, self.config.wal_mode).await?;
        self.db.set(db).map_err(|_| ButlersError::Storage {
            source: "storage already initialized".into(),
        })?;
        debug!(path = %self.config.database_path, "SQLite delivery store initialized");
        Ok(())
    }

    async fn close(&self) -> Result<(), ButlersError> {
        self.db()?.checkpoint().await?;
        debug!("WAL checkpoint complete");
        Ok(())
    }
}

#[async_trait]
impl DeliveryStore for SqliteStorage {
    async fn check_duplicate(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<DuplicateStatus>, ButlersError> {
        queries::delivery_requests::check_duplicate(self.db()?, idempotency_key).await
    }

    async fn create_delivery_request(
        &self,
        request: &NewDeliveryRequest,
    ) -> Result<String, ButlersError> {
        queries::delivery_requests::create(self.db()?, request).await
    }

    async fn update_delivery_status(
        &self,
        delivery_request_id: &str,
        status: DeliveryStatus,
        error_class: Option<ErrorClass>,
        error_message: Option<&str>,
    ) -> Result<(), ButlersError> {
        queries::delivery_requests::update_status(
            self.db()?,
            delivery_request_id,
            status,
            error_class,
            error_message,
        )
        .await
    }

    async fn record_provider_delivery_id(
        &self,
        delivery_request_id: &str,
        provider_delivery_id: Option<&str>,
        receipt_type: ReceiptType,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), ButlersError> {
        queries::receipts::insert(
            self.db()?,
            delivery_request_id,
            provider_delivery_id,
            receipt_type,
            metadata,
        )
        .await
        .map(|_| ())
    }

    async fn get_delivery_request(&self, id: &str) -> Result<DeliveryRequest, ButlersError> {
        queries::delivery_requests::get(self.db()?, id).await
    }

    async fn find_by_provider_delivery_id(
        &self,
        provider_delivery_id: &str,
    ) -> Result<Option<DeliveryRequest>, ButlersError> {
        queries::delivery_requests::find_by_provider_delivery_id(self.db()?, provider_delivery_id)
            .await
    }

    async fn record_attempt_start(
        &self,
        delivery_request_id: &str,
        attempt_number: u32,
    ) -> Result<(), ButlersError> {
        queries::attempts::start(self.db()?, delivery_request_id, attempt_number).await
    }

    async fn complete_attempt(
        &self,
        delivery_request_id: &str,
        attempt_number: u32,
        completion: &AttemptCompletion,
    ) -> Result<(), ButlersError> {
        queries::attempts::complete(self.db()?, delivery_request_id, attempt_number, completion)
            .await
    }

    async fn list_attempts(
        &self,
        delivery_request_id: &str,
    ) -> Result<Vec<DeliveryAttempt>, ButlersError> {
        queries::attempts::list(self.db()?, delivery_request_id).await
    }

    async fn list_receipts(
        &self,
        delivery_request_id: &str,
    ) -> Result<Vec<DeliveryReceipt>, ButlersError> {
        queries::receipts::list(self.db()?, delivery_request_id).await
    }

    async fn dead_letter_request(
        &self,
        delivery_request_id: &str,
        quarantine: &Quarantine,
    ) -> Result<DeadLetterEntry, ButlersError> {
        queries::dead_letter::quarantine(self.db()?, delivery_request_id, quarantine).await
    }

    async fn get_dead_letter(
        &self,
        delivery_request_id: &str,
    ) -> Result<Option<DeadLetterEntry>, ButlersError> {
        queries::dead_letter::get(self.db()?, delivery_request_id).await
    }

    async fn list_dead_letters(
        &self,
        replayable_only: bool,
    ) -> Result<Vec<DeadLetterEntry>, ButlersError> {
        queries::dead_letter::list(self.db()?, replayable_only).await
    }

    async fn mark_dead_letter_replayed(
        &self,
        delivery_request_id: &str,
    ) -> Result<DeadLetterEntry, ButlersError> {
        queries::dead_letter::mark_replayed(self.db()?, delivery_request_id).await
    }

    async fn discard_dead_letter(
        &self,
        delivery_request_id: &str,
        reason: &str,
    ) -> Result<DeadLetterEntry, ButlersError> {
        queries::dead_letter::discard(self.db()?, delivery_request_id, reason).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_config(path: &str) -> StorageConfig {
        StorageConfig {
            database_path: path.to_string(),
            wal_mode: true,
        }
    }

    #[tokio::test]
    async fn sqlite_storage_implements_plugin_adapter() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let storage = SqliteStorage::new(make_config(db_path.to_str().unwrap()));

        assert_eq!(storage.name(), "sqlite");
        assert_eq!(storage.version(), semver::Version::new(0, 1, 0));
        assert_eq!(storage.adapter_type(), AdapterType::Storage);
    }

    #[tokio::test]
    async fn initialize_creates_missing_parent_directories() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested").join("state").join("delivery.db");
        let storage = SqliteStorage::new(make_config(db_path.to_str().unwrap()));

        storage.initialize().await.unwrap();
        assert!(db_path.exists(), "database file should be created");
    }

    #[tokio::test]
    async fn initialize_twice_returns_error() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("double_init.db");
        let storage = SqliteStorage::new(make_config(db_path.to_str().unwrap()));

        storage.initialize().await.unwrap();
        assert!(storage.initialize().await.is_err());
    }

    #[tokio::test]
    async fn health_check_requires_initialize() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("health.db");
        let storage = SqliteStorage::new(make_config(db_path.to_str().unwrap()));

        assert!(storage.health_check().await.is_err());
        storage.initialize().await.unwrap();
        assert_eq!(storage.health_check().await.unwrap(), HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn in_memory_store_is_ready_without_initialize() {
        let db = Database::open_in_memory().await.unwrap();
        let storage = SqliteStorage::from_database(make_config(":memory:"), db);
        assert_eq!(storage.health_check().await.unwrap(), HealthStatus::Healthy);
        storage.shutdown().await.unwrap();
    }
}
