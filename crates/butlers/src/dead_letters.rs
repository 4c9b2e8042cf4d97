// SPDX-FileCopyrightText: 2026 Butlers Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `butlers dead-letters` and `butlers discard` command implementations.

use butlers_core::{ButlersError, DeadLetterEntry, DeliveryStore};
use tracing::info;

/// Run the `butlers dead-letters` command.
pub async fn run_list(
    store: &dyn DeliveryStore,
    all: bool,
    json: bool,
    use_color: bool,
) -> Result<(), ButlersError> {
    let entries = store.list_dead_letters(!all).await?;
    if json {
        let rendered = serde_json::to_string_pretty(&entries)
            .map_err(|e| ButlersError::Internal(format!("failed to render entries: {e}")))?;
        println!("{rendered}");
        return Ok(());
    }

    println!();
    println!("  dead letters ({})", entries.len());
    println!("  {}", "-".repeat(50));
    for entry in &entries {
        println!("    {}", entry_line(entry, use_color));
    }
    println!();
    Ok(())
}

fn entry_line(entry: &DeadLetterEntry, use_color: bool) -> String {
    let state = if entry.discarded_at.is_some() {
        "discarded"
    } else if entry.is_replayable() {
        "replayable"
    } else {
        "replayed"
    };
    let state = if use_color {
        use colored::Colorize;
        match state {
            "replayable" => state.yellow().to_string(),
            _ => state.dimmed().to_string(),
        }
    } else {
        state.to_string()
    };
    format!(
        "{}  {:<16} {:<18} attempts={} {}",
        entry.delivery_request_id,
        entry.quarantine_reason,
        entry.error_class,
        entry.total_attempts,
        state
    )
}

/// Run the `butlers discard` command.
pub async fn run_discard(
    store: &dyn DeliveryStore,
    delivery_id: &str,
    reason: &str,
) -> Result<(), ButlersError> {
    if reason.trim().is_empty() {
        return Err(ButlersError::Validation(
            "discard reason must not be empty".into(),
        ));
    }
    let entry = store.discard_dead_letter(delivery_id, reason).await?;
    info!(delivery_id, reason, "dead letter discarded");
    println!(
        "discarded {} at {}",
        entry.delivery_request_id,
        entry.discarded_at.as_deref().unwrap_or("-")
    );
    Ok(())
}
