// SPDX-FileCopyrightText: 2026 Butlers Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock channel adapter for deterministic testing.
//!
//! `MockChannel` implements `ChannelAdapter` with a script of provider results
//! and captures every outbound message for assertion in tests.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;

use butlers_core::traits::adapter::PluginAdapter;
use butlers_core::traits::channel::ChannelAdapter;
use butlers_core::types::{AdapterType, HealthStatus, OutboundMessage, ProviderReceipt};
use butlers_core::ButlersError;

/// How `send()` behaves once the script is empty.
#[derive(Debug, Clone, Default)]
enum Fallback {
    #[default]
    Succeed,
    Fail(String),
    Hang,
}

/// A mock provider adapter for testing.
///
/// Each `send()` is captured, then answered by:
/// - the next scripted result pushed via `push_ok()` / `push_err()`, or
/// - the fallback: a fresh `mock-msg-<uuid>` receipt, a persistent failure
///   set by `fail_always()`, or a send that never completes after `hang()`.
pub struct MockChannel {
    name: String,
    script: Mutex<VecDeque<Result<ProviderReceipt, ButlersError>>>,
    fallback: Mutex<Fallback>,
    sent: Mutex<Vec<OutboundMessage>>,
}

impl MockChannel {
    /// Create a new mock channel named `mock-channel` that always succeeds.
    pub fn new() -> Self {
        Self::named("mock-channel")
    }

    /// Create a mock channel reporting `name` as its provider name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Fallback::Succeed),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful send with the given provider message id.
    pub async fn push_ok(&self, provider_delivery_id: &str) {
        self.script
            .lock()
            .await
            .push_back(Ok(ProviderReceipt::sent(provider_delivery_id)));
    }

    /// Queue a failed send.
    pub async fn push_err(&self, error: ButlersError) {
        self.script.lock().await.push_back(Err(error));
    }

    /// Fail every unscripted send with a channel error carrying `message`.
    pub async fn fail_always(&self, message: impl Into<String>) {
        *self.fallback.lock().await = Fallback::Fail(message.into());
    }

    /// Never complete unscripted sends.
    pub async fn hang(&self) {
        *self.fallback.lock().await = Fallback::Hang;
    }

    /// Go back to succeeding on unscripted sends.
    pub async fn recover(&self) {
        *self.fallback.lock().await = Fallback::Succeed;
    }

    /// Get all messages that were passed to `send()`.
    pub async fn sent_messages(&self) -> Vec<OutboundMessage> {
        self.sent.lock().await.clone()
    }

    /// Get the count of `send()` calls.
    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }

    /// Clear all captured messages.
    pub async fn clear_sent(&self) {
        self.sent.lock().await.clear();
    }
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PluginAdapter for MockChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Channel
    }

    async fn health_check(&self) -> Result<HealthStatus, ButlersError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), ButlersError> {
        Ok(())
    }
}

#[async_trait]
impl ChannelAdapter for MockChannel {
    async fn send(&self, msg: &OutboundMessage) -> Result<ProviderReceipt, ButlersError> {
        self.sent.lock().await.push(msg.clone());

        if let Some(scripted) = self.script.lock().await.pop_front() {
            return scripted;
        }

        let fallback = self.fallback.lock().await.clone();
        match fallback {
            Fallback::Succeed => Ok(ProviderReceipt::sent(format!(
                "mock-msg-{}",
                uuid::Uuid::new_v4()
            ))),
            Fallback::Fail(message) => Err(ButlersError::channel(message)),
            Fallback::Hang => std::future::pending().await,
        }
    }
}
