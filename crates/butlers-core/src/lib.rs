// SPDX-FileCopyrightText: 2026 Butlers Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Butlers delivery subsystem.
//!
//! This crate provides the error type, the closed enumerations and row
//! models of the delivery state machine, and the adapter traits storage
//! backends and channel adapters implement.

pub mod error;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::ButlersError;
pub use types::{
    AdapterType, AttemptCompletion, AttemptOutcome, DeadLetterEntry, DeliveryAttempt,
    DeliveryIntent, DeliveryReceipt, DeliveryRequest, DeliveryStatus, DuplicateStatus,
    ErrorClass, HealthStatus, NewDeliveryRequest, OutboundMessage, ProviderReceipt, Quarantine,
    ReceiptType, TerminalResult,
};

pub use traits::{ChannelAdapter, DeliveryStore, PluginAdapter, StorageAdapter};

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    const ALL_STATUSES: [DeliveryStatus; 5] = [
        DeliveryStatus::Pending,
        DeliveryStatus::InProgress,
        DeliveryStatus::Delivered,
        DeliveryStatus::Failed,
        DeliveryStatus::DeadLettered,
    ];

    #[test]
    fn status_strings_match_schema_vocabulary() {
        let rendered: Vec<String> = ALL_STATUSES.iter().map(|s| s.to_string()).collect();
        assert_eq!(
            rendered,
            ["pending", "in_progress", "delivered", "failed", "dead_lettered"]
        );
        for status in ALL_STATUSES {
            assert_eq!(DeliveryStatus::from_str(&status.to_string()).unwrap(), status);
        }
    }

    #[test]
    fn terminal_statuses() {
        let terminal: Vec<_> = ALL_STATUSES.into_iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(
            terminal,
            [
                DeliveryStatus::Delivered,
                DeliveryStatus::Failed,
                DeliveryStatus::DeadLettered
            ]
        );
    }

    #[test]
    fn nothing_leaves_delivered_or_dead_lettered() {
        for next in ALL_STATUSES {
            assert!(!DeliveryStatus::Delivered.can_transition_to(next));
            assert!(!DeliveryStatus::DeadLettered.can_transition_to(next));
        }
    }

    #[test]
    fn failed_may_only_be_quarantined() {
        for next in ALL_STATUSES {
            assert_eq!(
                DeliveryStatus::Failed.can_transition_to(next),
                next == DeliveryStatus::DeadLettered
            );
        }
    }

    #[test]
    fn in_flight_never_regresses_to_pending() {
        assert!(!DeliveryStatus::InProgress.can_transition_to(DeliveryStatus::Pending));
        assert!(DeliveryStatus::InProgress.can_transition_to(DeliveryStatus::InProgress));
        let err = DeliveryStatus::Delivered
            .check_transition(DeliveryStatus::Pending)
            .unwrap_err();
        assert!(matches!(
            err,
            ButlersError::InvalidTransition { ref from, ref to } if from == "delivered" && to == "pending"
        ));
    }

    #[test]
    fn intent_parses_case_insensitively() {
        assert_eq!(DeliveryIntent::from_str("SEND").unwrap(), DeliveryIntent::Send);
        assert_eq!(DeliveryIntent::from_str("Reply").unwrap(), DeliveryIntent::Reply);
        assert!(DeliveryIntent::from_str("forward").is_err());
    }

    #[test]
    fn retryability_follows_taxonomy() {
        assert!(!ErrorClass::ValidationError.is_retryable());
        assert!(ErrorClass::Timeout.is_retryable());
        assert!(ErrorClass::TargetUnavailable.is_retryable());
        assert!(ErrorClass::OverloadRejected.is_retryable());
        assert!(!ErrorClass::InternalError.is_retryable());
    }

    #[test]
    fn attempt_outcome_for_failure_class() {
        assert_eq!(AttemptOutcome::for_failure(ErrorClass::Timeout), AttemptOutcome::Timeout);
        assert_eq!(
            AttemptOutcome::for_failure(ErrorClass::OverloadRejected),
            AttemptOutcome::RetryableError
        );
        assert_eq!(
            AttemptOutcome::for_failure(ErrorClass::ValidationError),
            AttemptOutcome::NonRetryableError
        );
    }

    #[test]
    fn terminal_result_serializes_with_status_tag() {
        let ok = TerminalResult::Ok {
            delivery: types::DeliveryRef {
                delivery_id: "d-1".into(),
                provider_delivery_id: Some("tg-9".into()),
            },
        };
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["delivery"]["provider_delivery_id"], "tg-9");

        let err = TerminalResult::Error {
            error: types::TerminalError {
                class: Some(ErrorClass::TargetUnavailable),
                message: Some("503".into()),
                retryable: false,
            },
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"]["class"], "target_unavailable");
        assert_eq!(json["error"]["retryable"], false);
    }

    #[test]
    fn all_trait_modules_are_exported() {
        fn _assert_plugin_adapter<T: PluginAdapter>() {}
        fn _assert_storage_adapter<T: StorageAdapter>() {}
        fn _assert_delivery_store<T: DeliveryStore>() {}
        fn _assert_channel_adapter<T: ChannelAdapter>() {}
    }
}
