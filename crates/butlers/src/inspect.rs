// SPDX-FileCopyrightText: 2026 Butlers Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `butlers inspect` command implementation.

use butlers_core::{
    ButlersError, DeadLetterEntry, DeliveryAttempt, DeliveryReceipt, DeliveryRequest,
    DeliveryStatus, DeliveryStore,
};
use serde::Serialize;

/// Everything the ledger holds about one delivery request.
#[derive(Debug, Serialize)]
pub struct InspectReport {
    pub request: DeliveryRequest,
    pub attempts: Vec<DeliveryAttempt>,
    pub receipts: Vec<DeliveryReceipt>,
    pub dead_letter: Option<DeadLetterEntry>,
}

pub async fn collect(
    store: &dyn DeliveryStore,
    delivery_id: &str,
) -> Result<InspectReport, ButlersError> {
    Ok(InspectReport {
        request: store.get_delivery_request(delivery_id).await?,
        attempts: store.list_attempts(delivery_id).await?,
        receipts: store.list_receipts(delivery_id).await?,
        dead_letter: store.get_dead_letter(delivery_id).await?,
    })
}

/// Run the `butlers inspect` command.
pub async fn run_inspect(
    store: &dyn DeliveryStore,
    delivery_id: &str,
    json: bool,
    use_color: bool,
) -> Result<(), ButlersError> {
    let report = collect(store, delivery_id).await?;
    if json {
        let rendered = serde_json::to_string_pretty(&report)
            .map_err(|e| ButlersError::Internal(format!("failed to render report: {e}")))?;
        println!("{rendered}");
    } else {
        print_report(&report, use_color);
    }
    Ok(())
}

fn status_label(status: DeliveryStatus, use_color: bool) -> String {
    if !use_color {
        return status.to_string();
    }
    use colored::Colorize;
    match status {
        DeliveryStatus::Delivered => status.to_string().green().to_string(),
        DeliveryStatus::Failed | DeliveryStatus::DeadLettered => {
            status.to_string().red().to_string()
        }
        DeliveryStatus::Pending | DeliveryStatus::InProgress => {
            status.to_string().yellow().to_string()
        }
    }
}

fn print_report(report: &InspectReport, use_color: bool) {
    let request = &report.request;
    println!();
    println!("  delivery {}", request.id);
    println!("  {}", "-".repeat(50));
    println!("    Status:   {}", status_label(request.status, use_color));
    println!("    Origin:   {}", request.origin_butler);
    println!("    Route:    {} {} -> {}", request.intent, request.channel, request.target_identity);
    println!("    Key:      {}", request.idempotency_key);
    println!("    Created:  {}", request.created_at);
    if let Some(at) = &request.terminal_at {
        println!("    Terminal: {at}");
    }
    if let Some(class) = request.terminal_error_class {
        println!(
            "    Error:    {class}: {}",
            request.terminal_error_message.as_deref().unwrap_or("")
        );
    }

    println!();
    println!("  attempts ({})", report.attempts.len());
    for attempt in &report.attempts {
        let latency = attempt
            .latency_ms
            .map(|ms| format!("{ms}ms"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "    #{:<3} {:<20} {:>8}  {}",
            attempt.attempt_number,
            attempt.outcome,
            latency,
            attempt.error_message.as_deref().unwrap_or("")
        );
    }

    println!();
    println!("  receipts ({})", report.receipts.len());
    for receipt in &report.receipts {
        println!(
            "    {:<22} {}  {}",
            receipt.receipt_type,
            receipt.provider_delivery_id.as_deref().unwrap_or("-"),
            receipt.received_at
        );
    }

    if let Some(entry) = &report.dead_letter {
        println!();
        println!(
            "  dead letter: {} ({}), replays {}{}",
            entry.quarantine_reason,
            entry.error_class,
            entry.replay_count,
            if entry.discarded_at.is_some() { ", discarded" } else { "" }
        );
    }
    println!();
}

#[cfg(test)]
mod tests {
    use butlers_test_utils::TestHarness;

    use super::*;

    #[tokio::test]
    async fn collects_request_attempts_and_receipts() {
        let h = TestHarness::builder().build().await.unwrap();
        h.mock_channel.push_ok("tg-9").await;
        let outcome = h.deliver(&TestHarness::submission("Test")).await.unwrap();

        let report = collect(h.store(), outcome.delivery_id()).await.unwrap();
        assert_eq!(report.request.status, DeliveryStatus::Delivered);
        assert_eq!(report.attempts.len(), 1);
        assert_eq!(report.receipts.len(), 1);
        assert!(report.dead_letter.is_none());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["request"]["status"], "delivered");
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let h = TestHarness::builder().build().await.unwrap();
        let err = collect(h.store(), "nope").await.unwrap_err();
        assert!(matches!(err, ButlersError::NotFound { .. }));
    }
}
