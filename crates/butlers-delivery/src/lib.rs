// SPDX-FileCopyrightText: 2026 Butlers Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Exactly-once outbound delivery for Butlers.
//!
//! A submission is reduced to a deterministic idempotency key, deduplicated
//! against the [`DeliveryStore`](butlers_core::DeliveryStore), and sent
//! through a channel adapter under a per-provider circuit breaker, a retry
//! policy, and a per-channel timeout. Every attempt is audited; requests
//! that exhaust their retry budget are quarantined in the dead-letter table.

pub mod idempotency;
pub mod pipeline;

pub use idempotency::{DeliverySubmission, KeyComponents, RequestContext, derive_idempotency_key};
pub use pipeline::{DeliveryOutcome, DeliveryPipeline};
