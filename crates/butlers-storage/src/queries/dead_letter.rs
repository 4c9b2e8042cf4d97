// SPDX-FileCopyrightText: 2026 Butlers Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Dead-letter quarantine: capture, replay bookkeeping, and discard.

use butlers_core::types::AttemptSummary;
use butlers_core::{ButlersError, DeadLetterEntry, DeliveryStatus, Quarantine};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, info};

use super::{NOW, attempts, enum_col, json_col, to_json};
use crate::database::{Database, map_tr_err};

const COLUMNS: &str = "id, delivery_request_id, quarantine_reason, error_class, error_summary,
    total_attempts, first_attempt_at, last_attempt_at, original_request_envelope,
    all_attempt_outcomes, replay_eligible, replay_count, discarded_at, discard_reason,
    created_at";

const ENTITY: &str = "dead letter entry";

fn from_row(row: &Row<'_>) -> rusqlite::Result<DeadLetterEntry> {
    Ok(DeadLetterEntry {
        id: row.get(0)?,
        delivery_request_id: row.get(1)?,
        quarantine_reason: row.get(2)?,
        error_class: enum_col(row, 3)?,
        error_summary: row.get(4)?,
        total_attempts: row.get(5)?,
        first_attempt_at: row.get(6)?,
        last_attempt_at: row.get(7)?,
        original_request_envelope: json_col(row, 8)?,
        all_attempt_outcomes: json_col(row, 9)?,
        replay_eligible: row.get(10)?,
        replay_count: row.get(11)?,
        discarded_at: row.get(12)?,
        discard_reason: row.get(13)?,
        created_at: row.get(14)?,
    })
}

fn fetch(conn: &Connection, delivery_request_id: &str) -> rusqlite::Result<Option<DeadLetterEntry>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM delivery_dead_letter WHERE delivery_request_id = ?1"),
        params![delivery_request_id],
        from_row,
    )
    .optional()
}

/// Quarantine a request: write its dead-letter entry and move it to
/// `dead_lettered` in a single transaction.
pub async fn quarantine(
    db: &Database,
    delivery_request_id: &str,
    quarantine: &Quarantine,
) -> Result<DeadLetterEntry, ButlersError> {
    let request_id = delivery_request_id.to_string();
    let quarantine = quarantine.clone();

    let entry = db
        .connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let request = tx
                .query_row(
                    "SELECT status, request_envelope FROM delivery_requests WHERE id = ?1",
                    params![request_id],
                    |row| Ok((enum_col::<DeliveryStatus>(row, 0)?, row.get::<_, String>(1)?)),
                )
                .optional()?;

            let Some((status, envelope)) = request else {
                return Ok(Err(ButlersError::NotFound {
                    entity: "delivery request",
                    id: request_id,
                }));
            };
            if let Err(e) = status.check_transition(DeliveryStatus::DeadLettered) {
                return Ok(Err(e));
            }

            let history = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {} FROM delivery_attempts
                     WHERE delivery_request_id = ?1 ORDER BY attempt_number ASC",
                    attempts::COLUMNS
                ))?;
                let rows = stmt.query_map(params![request_id], attempts::from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };
            let summaries: Vec<AttemptSummary> = history.iter().map(AttemptSummary::from).collect();
            let first_attempt_at = history.first().map(|a| a.started_at.clone());
            let last_attempt_at = history
                .last()
                .map(|a| a.completed_at.clone().unwrap_or_else(|| a.started_at.clone()));

            tx.execute(
                "INSERT INTO delivery_dead_letter (id, delivery_request_id, quarantine_reason,
                    error_class, error_summary, total_attempts, first_attempt_at,
                    last_attempt_at, original_request_envelope, all_attempt_outcomes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    uuid::Uuid::new_v4().to_string(),
                    request_id,
                    quarantine.reason,
                    quarantine.error_class.to_string(),
                    quarantine.error_summary,
                    summaries.len() as u32,
                    first_attempt_at,
                    last_attempt_at,
                    envelope,
                    to_json(&summaries)?,
                ],
            )?;
            tx.execute(
                &format!(
                    "UPDATE delivery_requests
                     SET status = 'dead_lettered',
                         terminal_error_class = ?2,
                         terminal_error_message = ?3,
                         terminal_at = COALESCE(terminal_at, {NOW}),
                         updated_at = {NOW}
                     WHERE id = ?1"
                ),
                params![
                    request_id,
                    quarantine.error_class.to_string(),
                    quarantine.error_summary
                ],
            )?;

            let entry = fetch(&tx, &request_id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
            tx.commit()?;
            Ok(Ok(entry))
        })
        .await
        .map_err(map_tr_err)??;

    info!(
        delivery_id = %entry.delivery_request_id,
        reason = %entry.quarantine_reason,
        error_class = %entry.error_class,
        total_attempts = entry.total_attempts,
        "delivery request dead-lettered"
    );
    Ok(entry)
}

/// Dead-letter entry for a request, if one exists.
pub async fn get(
    db: &Database,
    delivery_request_id: &str,
) -> Result<Option<DeadLetterEntry>, ButlersError> {
    let request_id = delivery_request_id.to_string();
    db.connection()
        .call(move |conn| fetch(conn, &request_id))
        .await
        .map_err(map_tr_err)
}

/// Entries oldest first. `replayable_only` hides discarded and already
/// replayed entries.
pub async fn list(db: &Database, replayable_only: bool) -> Result<Vec<DeadLetterEntry>, ButlersError> {
    db.connection()
        .call(move |conn| {
            let filter = if replayable_only {
                "WHERE replay_eligible = 1 AND discarded_at IS NULL"
            } else {
                ""
            };
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM delivery_dead_letter {filter} ORDER BY created_at ASC, id ASC"
            ))?;
            let rows = stmt.query_map([], from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
        .await
        .map_err(map_tr_err)
}

/// Count one replay and clear eligibility.
pub async fn mark_replayed(
    db: &Database,
    delivery_request_id: &str,
) -> Result<DeadLetterEntry, ButlersError> {
    let request_id = delivery_request_id.to_string();
    let entry = db
        .connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let Some(entry) = fetch(&tx, &request_id)? else {
                return Ok(Err(ButlersError::NotFound {
                    entity: ENTITY,
                    id: request_id,
                }));
            };
            if !entry.is_replayable() {
                let from = if entry.discarded_at.is_some() {
                    "discarded"
                } else {
                    "replayed"
                };
                return Ok(Err(ButlersError::InvalidTransition {
                    from: from.to_string(),
                    to: "replayed".to_string(),
                }));
            }

            tx.execute(
                "UPDATE delivery_dead_letter
                 SET replay_count = replay_count + 1, replay_eligible = 0
                 WHERE delivery_request_id = ?1",
                params![request_id],
            )?;
            let entry = fetch(&tx, &request_id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
            tx.commit()?;
            Ok(Ok(entry))
        })
        .await
        .map_err(map_tr_err)??;

    debug!(
        delivery_id = %entry.delivery_request_id,
        replay_count = entry.replay_count,
        "dead letter marked replayed"
    );
    Ok(entry)
}

/// Permanently exclude an entry from replay.
pub async fn discard(
    db: &Database,
    delivery_request_id: &str,
    reason: &str,
) -> Result<DeadLetterEntry, ButlersError> {
    let request_id = delivery_request_id.to_string();
    let reason = reason.to_string();
    let entry = db
        .connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let Some(entry) = fetch(&tx, &request_id)? else {
                return Ok(Err(ButlersError::NotFound {
                    entity: ENTITY,
                    id: request_id,
                }));
            };
            if entry.discarded_at.is_some() {
                return Ok(Err(ButlersError::InvalidTransition {
                    from: "discarded".to_string(),
                    to: "discarded".to_string(),
                }));
            }

            tx.execute(
                &format!(
                    "UPDATE delivery_dead_letter
                     SET discarded_at = {NOW}, discard_reason = ?2, replay_eligible = 0
                     WHERE delivery_request_id = ?1"
                ),
                params![request_id, reason],
            )?;
            let entry = fetch(&tx, &request_id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
            tx.commit()?;
            Ok(Ok(entry))
        })
        .await
        .map_err(map_tr_err)??;

    info!(delivery_id = %entry.delivery_request_id, "dead letter discarded");
    Ok(entry)
}
