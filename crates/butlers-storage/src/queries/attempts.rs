// SPDX-FileCopyrightText: 2026 Butlers Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-attempt audit rows.

use butlers_core::{AttemptCompletion, AttemptOutcome, ButlersError, DeliveryAttempt};
use rusqlite::{OptionalExtension, Row, params};

use super::delivery_requests::is_unique_violation;
use super::receipts::is_foreign_key_violation;
use super::{NOW, enum_col, opt_enum_col, opt_json_col, to_json};
use crate::database::{Database, map_tr_err};

pub(crate) const COLUMNS: &str = "id, delivery_request_id, attempt_number, started_at,
    completed_at, latency_ms, outcome, error_class, error_message, provider_response";

pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<DeliveryAttempt> {
    Ok(DeliveryAttempt {
        id: row.get(0)?,
        delivery_request_id: row.get(1)?,
        attempt_number: row.get(2)?,
        started_at: row.get(3)?,
        completed_at: row.get(4)?,
        latency_ms: row.get(5)?,
        outcome: enum_col(row, 6)?,
        error_class: opt_enum_col(row, 7)?,
        error_message: row.get(8)?,
        provider_response: opt_json_col(row, 9)?,
    })
}

fn attempt_key(delivery_request_id: &str, attempt_number: u32) -> String {
    format!("{delivery_request_id}#{attempt_number}")
}

/// Insert an `in_progress` attempt row.
pub async fn start(
    db: &Database,
    delivery_request_id: &str,
    attempt_number: u32,
) -> Result<(), ButlersError> {
    let request_id = delivery_request_id.to_string();
    db.connection()
        .call(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO delivery_attempts (delivery_request_id, attempt_number)
                 VALUES (?1, ?2)",
                params![request_id, attempt_number],
            );
            match inserted {
                Ok(_) => Ok(Ok(())),
                Err(e) if is_foreign_key_violation(&e) => Ok(Err(ButlersError::NotFound {
                    entity: "delivery request",
                    id: request_id,
                })),
                Err(e) if is_unique_violation(&e) => Ok(Err(ButlersError::InvalidTransition {
                    from: format!("attempt {attempt_number} already recorded"),
                    to: AttemptOutcome::InProgress.to_string(),
                })),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_CHECK =>
                {
                    Ok(Err(ButlersError::Validation(format!(
                        "attempt number {attempt_number} is out of range, attempts start at 1"
                    ))))
                }
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(map_tr_err)?
}

/// Write the result of an attempt. Only `in_progress` rows can be completed.
pub async fn complete(
    db: &Database,
    delivery_request_id: &str,
    attempt_number: u32,
    completion: &AttemptCompletion,
) -> Result<(), ButlersError> {
    let request_id = delivery_request_id.to_string();
    let completion = completion.clone();

    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let current = tx
                .query_row(
                    "SELECT outcome FROM delivery_attempts
                     WHERE delivery_request_id = ?1 AND attempt_number = ?2",
                    params![request_id, attempt_number],
                    |row| enum_col::<AttemptOutcome>(row, 0),
                )
                .optional()?;

            let Some(current) = current else {
                return Ok(Err(ButlersError::NotFound {
                    entity: "delivery attempt",
                    id: attempt_key(&request_id, attempt_number),
                }));
            };
            if current != AttemptOutcome::InProgress
                || completion.outcome == AttemptOutcome::InProgress
            {
                return Ok(Err(ButlersError::InvalidTransition {
                    from: current.to_string(),
                    to: completion.outcome.to_string(),
                }));
            }

            let response = completion.provider_response.as_ref().map(to_json).transpose()?;
            tx.execute(
                &format!(
                    "UPDATE delivery_attempts
                     SET completed_at = {NOW}, latency_ms = ?3, outcome = ?4,
                         error_class = ?5, error_message = ?6, provider_response = ?7
                     WHERE delivery_request_id = ?1 AND attempt_number = ?2"
                ),
                params![
                    request_id,
                    attempt_number,
                    completion.latency_ms,
                    completion.outcome.to_string(),
                    completion.error_class.map(|c| c.to_string()),
                    completion.error_message,
                    response,
                ],
            )?;
            tx.commit()?;
            Ok(Ok(()))
        })
        .await
        .map_err(map_tr_err)?
}

/// Attempts for a request, in attempt order.
pub async fn list(
    db: &Database,
    delivery_request_id: &str,
) -> Result<Vec<DeliveryAttempt>, ButlersError> {
    let request_id = delivery_request_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM delivery_attempts
                 WHERE delivery_request_id = ?1 ORDER BY attempt_number ASC"
            ))?;
            let rows = stmt.query_map(params![request_id], from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::delivery_requests;
    use crate::queries::test_support::{new_request, setup_db};
    use butlers_core::ErrorClass;

    #[tokio::test]
    async fn attempt_lifecycle() {
        let (db, _dir) = setup_db().await;
        let id = delivery_requests::create(&db, &new_request("a"))
            .await
            .unwrap();

        start(&db, &id, 1).await.unwrap();
        complete(
            &db,
            &id,
            1,
            &AttemptCompletion::failure(120, ErrorClass::Timeout, "deadline exceeded"),
        )
        .await
        .unwrap();
        start(&db, &id, 2).await.unwrap();
        complete(
            &db,
            &id,
            2,
            &AttemptCompletion::success(45, Some(serde_json::json!({"ok": true}))),
        )
        .await
        .unwrap();

        let attempts = list(&db, &id).await.unwrap();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].outcome, AttemptOutcome::Timeout);
        assert_eq!(attempts[0].error_class, Some(ErrorClass::Timeout));
        assert_eq!(attempts[0].latency_ms, Some(120));
        assert!(attempts[0].completed_at.is_some());
        assert_eq!(attempts[1].outcome, AttemptOutcome::Success);
        assert_eq!(
            attempts[1].provider_response,
            Some(serde_json::json!({"ok": true}))
        );
    }

    #[tokio::test]
    async fn started_attempt_is_in_progress() {
        let (db, _dir) = setup_db().await;
        let id = delivery_requests::create(&db, &new_request("b"))
            .await
            .unwrap();
        start(&db, &id, 1).await.unwrap();

        let attempts = list(&db, &id).await.unwrap();
        assert_eq!(attempts[0].outcome, AttemptOutcome::InProgress);
        assert!(attempts[0].completed_at.is_none());
    }

    #[tokio::test]
    async fn completed_attempt_is_immutable() {
        let (db, _dir) = setup_db().await;
        let id = delivery_requests::create(&db, &new_request("c"))
            .await
            .unwrap();
        start(&db, &id, 1).await.unwrap();
        complete(&db, &id, 1, &AttemptCompletion::success(10, None))
            .await
            .unwrap();

        let err = complete(
            &db,
            &id,
            1,
            &AttemptCompletion::failure(10, ErrorClass::InternalError, "late"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ButlersError::InvalidTransition { .. }));
        assert_eq!(
            list(&db, &id).await.unwrap()[0].outcome,
            AttemptOutcome::Success
        );
    }

    #[tokio::test]
    async fn duplicate_attempt_number_is_rejected() {
        let (db, _dir) = setup_db().await;
        let id = delivery_requests::create(&db, &new_request("d"))
            .await
            .unwrap();
        start(&db, &id, 1).await.unwrap();
        let err = start(&db, &id, 1).await.unwrap_err();
        assert!(matches!(err, ButlersError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn attempt_zero_is_a_validation_error() {
        let (db, _dir) = setup_db().await;
        let id = delivery_requests::create(&db, &new_request("z"))
            .await
            .unwrap();
        let err = start(&db, &id, 0).await.unwrap_err();
        assert!(matches!(err, ButlersError::Validation(_)));
        assert!(list(&db, &id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn completing_unknown_attempt_is_not_found() {
        let (db, _dir) = setup_db().await;
        let id = delivery_requests::create(&db, &new_request("e"))
            .await
            .unwrap();
        let err = complete(&db, &id, 3, &AttemptCompletion::success(1, None))
            .await
            .unwrap_err();
        assert!(matches!(err, ButlersError::NotFound { entity: "delivery attempt", .. }));
    }
}
