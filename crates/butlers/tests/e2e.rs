// SPDX-FileCopyrightText: 2026 Butlers Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests for the delivery core.
//!
//! Each test creates an isolated TestHarness with temp SQLite and a mock
//! channel. Tests are independent and order-insensitive.

use butlers_core::{DeliveryStatus, NewDeliveryRequest, TerminalResult};
use butlers_delivery::{DeliveryOutcome, DeliverySubmission, derive_idempotency_key};
use butlers_test_utils::TestHarness;

fn scenario() -> DeliverySubmission {
    DeliverySubmission::send("health", "telegram", "user123", "Test")
}

fn new_request(submission: &DeliverySubmission) -> NewDeliveryRequest {
    let (key, components) = derive_idempotency_key(submission).unwrap();
    NewDeliveryRequest {
        idempotency_key: key,
        request_id: None,
        origin_butler: components.origin,
        channel: components.channel,
        intent: submission.intent,
        target_identity: components.target,
        message_content: submission.message.clone(),
        subject: None,
        request_envelope: serde_json::to_value(submission).unwrap(),
    }
}

// ---- Key, create, duplicate check ----

#[tokio::test]
async fn pending_request_is_detected_as_duplicate() {
    let h = TestHarness::builder().build().await.unwrap();
    let request = new_request(&scenario());

    assert!(h.store().check_duplicate(&request.idempotency_key).await.unwrap().is_none());
    let id = h.store().create_delivery_request(&request).await.unwrap();

    let existing = h
        .store()
        .check_duplicate(&request.idempotency_key)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(existing.delivery_id, id);
    assert_eq!(existing.status, DeliveryStatus::Pending);
    assert!(!existing.is_terminal);
    assert!(existing.terminal_result.is_none());
}

#[tokio::test]
async fn second_create_with_same_key_is_rejected_and_coalesced() {
    let h = TestHarness::builder().build().await.unwrap();
    let request = new_request(&scenario());
    let id = h.store().create_delivery_request(&request).await.unwrap();

    let err = h.store().create_delivery_request(&request).await.unwrap_err();
    assert!(matches!(err, butlers_core::ButlersError::AlreadyExists { .. }));

    let existing = h
        .store()
        .check_duplicate(&request.idempotency_key)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(existing.delivery_id, id);
}

#[tokio::test]
async fn failed_request_reports_non_retryable_duplicate() {
    let h = TestHarness::builder().build().await.unwrap();
    let request = new_request(&scenario());
    let id = h.store().create_delivery_request(&request).await.unwrap();
    h.store()
        .update_delivery_status(
            &id,
            DeliveryStatus::Failed,
            Some(butlers_core::ErrorClass::ValidationError),
            Some("chat not found"),
        )
        .await
        .unwrap();

    let existing = h
        .store()
        .check_duplicate(&request.idempotency_key)
        .await
        .unwrap()
        .unwrap();
    assert!(existing.is_terminal);
    match existing.terminal_result {
        Some(TerminalResult::Error { error }) => {
            assert!(!error.retryable);
            assert_eq!(error.message.as_deref(), Some("chat not found"));
        }
        other => panic!("unexpected terminal result: {other:?}"),
    }
}

// ---- Full pipeline ----

#[tokio::test]
async fn delivered_scenario_reports_ok_on_resubmission() {
    let h = TestHarness::builder().build().await.unwrap();
    h.mock_channel.push_ok("tg-555").await;

    let first = h.deliver(&scenario()).await.unwrap();
    assert!(matches!(first, DeliveryOutcome::Delivered { .. }));

    let second = h.deliver(&scenario()).await.unwrap();
    let DeliveryOutcome::Duplicate(existing) = second else {
        panic!("expected duplicate, got {second:?}");
    };
    let json = serde_json::to_value(&existing.terminal_result).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["delivery"]["delivery_id"], first.delivery_id());
    assert_eq!(json["delivery"]["provider_delivery_id"], "tg-555");
}

#[tokio::test]
async fn dead_letter_lifecycle() {
    let h = TestHarness::builder().build().await.unwrap();
    h.mock_channel.fail_always("503 service unavailable").await;

    let outcome = h.deliver(&scenario()).await.unwrap();
    let DeliveryOutcome::DeadLettered { delivery_id, entry } = outcome else {
        panic!("expected dead letter, got {outcome:?}");
    };
    assert_eq!(entry.delivery_request_id, delivery_id);
    assert_eq!(h.store().list_dead_letters(true).await.unwrap().len(), 1);

    h.mock_channel.recover().await;
    let replay = h
        .pipeline
        .replay_dead_letter(&delivery_id, h.adapter())
        .await
        .unwrap();
    assert!(matches!(replay, DeliveryOutcome::Delivered { .. }));
    assert!(h.store().list_dead_letters(true).await.unwrap().is_empty());

    // The original request stays quarantined; the replay is its own record.
    let original = h.store().get_delivery_request(&delivery_id).await.unwrap();
    assert_eq!(original.status, DeliveryStatus::DeadLettered);
}
