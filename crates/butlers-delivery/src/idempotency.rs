// SPDX-FileCopyrightText: 2026 Butlers Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deterministic idempotency keys for outbound messages.
//!
//! A key is the ordered concatenation of its components:
//!
//! ```text
//! [request_id:<id>:]origin:<butler>:intent:<intent>:channel:<channel>:target:<target>:content:<sha256>
//! ```
//!
//! Textual components are lower-cased so that requests differing only in
//! case collapse onto one key.

use butlers_core::{ButlersError, DeliveryIntent};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Where an inbound message came from; required to address a reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub source_sender_identity: Option<String>,
    pub source_thread_identity: Option<String>,
    pub source_channel: Option<String>,
    pub source_message_id: Option<String>,
}

/// One outbound message as a butler submits it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliverySubmission {
    /// Upstream correlation id; distinguishes otherwise identical sends.
    #[serde(default)]
    pub request_id: Option<String>,
    pub origin_butler: String,
    pub intent: DeliveryIntent,
    pub channel: String,
    /// Explicit recipient, required for `send`.
    #[serde(default)]
    pub recipient: Option<String>,
    pub message: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub request_context: Option<RequestContext>,
    /// Opaque caller payload stored with the request.
    #[serde(default)]
    pub envelope: serde_json::Value,
}

impl DeliverySubmission {
    /// A `send` to `recipient` with no subject, context, or request id.
    pub fn send(
        origin_butler: impl Into<String>,
        channel: impl Into<String>,
        recipient: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            request_id: None,
            origin_butler: origin_butler.into(),
            intent: DeliveryIntent::Send,
            channel: channel.into(),
            recipient: Some(recipient.into()),
            message: message.into(),
            subject: None,
            request_context: None,
            envelope: serde_json::Value::Null,
        }
    }

    /// A `reply` addressed through `context`.
    pub fn reply(
        origin_butler: impl Into<String>,
        channel: impl Into<String>,
        context: RequestContext,
        message: impl Into<String>,
    ) -> Self {
        Self {
            request_id: None,
            origin_butler: origin_butler.into(),
            intent: DeliveryIntent::Reply,
            channel: channel.into(),
            recipient: None,
            message: message.into(),
            subject: None,
            request_context: Some(context),
            envelope: serde_json::Value::Null,
        }
    }

    /// The identity the provider should deliver to, in its original case.
    pub fn provider_target(&self) -> Option<String> {
        match self.intent {
            DeliveryIntent::Send => non_blank(self.recipient.as_deref()).map(str::to_string),
            DeliveryIntent::Reply => self
                .request_context
                .as_ref()
                .and_then(|ctx| non_blank(ctx.source_sender_identity.as_deref()))
                .map(str::to_string),
        }
    }
}

/// The pieces a key was built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyComponents {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub origin: String,
    pub intent: String,
    pub channel: String,
    pub target: String,
    /// Hex SHA-256 of the message and subject.
    pub content: String,
}

impl KeyComponents {
    /// Join the components into the key string.
    pub fn key(&self) -> String {
        let mut key = String::new();
        if let Some(id) = &self.request_id {
            key.push_str("request_id:");
            key.push_str(id);
            key.push(':');
        }
        key.push_str(&format!(
            "origin:{}:intent:{}:channel:{}:target:{}:content:{}",
            self.origin, self.intent, self.channel, self.target, self.content
        ));
        key
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Derive the idempotency key for `submission`.
///
/// Fails with [`ButlersError::Validation`] when `origin_butler` is empty,
/// when a `send` has no recipient, or when a `reply` has no
/// `request_context.source_sender_identity`.
pub fn derive_idempotency_key(
    submission: &DeliverySubmission,
) -> Result<(String, KeyComponents), ButlersError> {
    if submission.origin_butler.trim().is_empty() {
        return Err(ButlersError::Validation(
            "origin_butler must not be empty".into(),
        ));
    }

    let target = match submission.intent {
        DeliveryIntent::Send => non_blank(submission.recipient.as_deref())
            .ok_or_else(|| ButlersError::Validation("send requires a recipient".into()))?
            .to_string(),
        DeliveryIntent::Reply => {
            let ctx = submission.request_context.as_ref().ok_or_else(|| {
                ButlersError::Validation("reply requires a request_context".into())
            })?;
            let sender = non_blank(ctx.source_sender_identity.as_deref()).ok_or_else(|| {
                ButlersError::Validation(
                    "reply requires request_context.source_sender_identity".into(),
                )
            })?;
            match non_blank(ctx.source_thread_identity.as_deref()) {
                Some(thread) => format!("{sender}:{thread}"),
                None => sender.to_string(),
            }
        }
    };

    let components = KeyComponents {
        request_id: submission.request_id.clone(),
        origin: submission.origin_butler.to_lowercase(),
        intent: submission.intent.to_string(),
        channel: submission.channel.to_lowercase(),
        target: target.to_lowercase(),
        content: content_hash(&submission.message, submission.subject.as_deref()),
    };
    Ok((components.key(), components))
}

/// SHA-256 over length-prefixed fields, so `("ab", None)`, `("a", Some("b"))`
/// and `("ab", Some(""))` all hash differently.
fn content_hash(message: &str, subject: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update((message.len() as u64).to_be_bytes());
    hasher.update(message.as_bytes());
    match subject {
        Some(subject) => {
            hasher.update([1u8]);
            hasher.update((subject.len() as u64).to_be_bytes());
            hasher.update(subject.as_bytes());
        }
        None => hasher.update([0u8]),
    }
    hex::encode(hasher.finalize())
}
