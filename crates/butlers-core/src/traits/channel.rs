// SPDX-FileCopyrightText: 2026 Butlers Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channel adapter trait for outbound provider calls (Telegram, email, etc.).

use async_trait::async_trait;

use crate::error::ButlersError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{OutboundMessage, ProviderReceipt};

/// Adapter performing one provider call per invocation.
///
/// Adapters do not retry, time out, or deduplicate on their own; the
/// delivery pipeline wraps every `send` with those concerns. Failures should
/// be reported as [`ButlersError::Channel`] with the provider status code
/// when one exists, so the error normalizer can classify them.
#[async_trait]
pub trait ChannelAdapter: PluginAdapter {
    /// Sends one message and returns the provider's receipt.
    async fn send(&self, msg: &OutboundMessage) -> Result<ProviderReceipt, ButlersError>;
}
