// SPDX-FileCopyrightText: 2026 Butlers Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain model types for storage entities.
//!
//! The canonical types are defined in `butlers-core::types` for use across
//! adapter trait boundaries. This module re-exports the ones this crate
//! reads and writes.

pub use butlers_core::types::{
    AttemptCompletion, AttemptSummary, DeadLetterEntry, DeliveryAttempt, DeliveryReceipt,
    DeliveryRequest, DuplicateStatus, NewDeliveryRequest, Quarantine,
};
