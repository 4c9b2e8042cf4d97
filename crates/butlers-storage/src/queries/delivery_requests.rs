// SPDX-FileCopyrightText: 2026 Butlers Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Delivery request lifecycle: creation, duplicate lookup, and status moves.

use butlers_core::types::{DeliveryRef, TerminalError, TerminalResult};
use butlers_core::{
    ButlersError, DeliveryRequest, DeliveryStatus, DuplicateStatus, ErrorClass,
    NewDeliveryRequest,
};
use rusqlite::{OptionalExtension, Row, params};
use tracing::debug;

use super::{NOW, enum_col, json_col, opt_enum_col, to_json};
use crate::database::{Database, map_tr_err};

const COLUMNS: &str = "id, idempotency_key, request_id, origin_butler, channel, intent,
    target_identity, message_content, subject, request_envelope, status,
    terminal_error_class, terminal_error_message, created_at, updated_at, terminal_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<DeliveryRequest> {
    Ok(DeliveryRequest {
        id: row.get(0)?,
        idempotency_key: row.get(1)?,
        request_id: row.get(2)?,
        origin_butler: row.get(3)?,
        channel: row.get(4)?,
        intent: enum_col(row, 5)?,
        target_identity: row.get(6)?,
        message_content: row.get(7)?,
        subject: row.get(8)?,
        request_envelope: json_col(row, 9)?,
        status: enum_col(row, 10)?,
        terminal_error_class: opt_enum_col(row, 11)?,
        terminal_error_message: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
        terminal_at: row.get(15)?,
    })
}

pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// Insert a `pending` request. Returns the generated id.
pub async fn create(db: &Database, request: &NewDeliveryRequest) -> Result<String, ButlersError> {
    let id = uuid::Uuid::new_v4().to_string();
    let request = request.clone();
    let row_id = id.clone();
    let key = request.idempotency_key.clone();

    db.connection()
        .call(move |conn| {
            let envelope = to_json(&request.request_envelope)?;
            let inserted = conn.execute(
                "INSERT INTO delivery_requests (id, idempotency_key, request_id, origin_butler,
                    channel, intent, target_identity, message_content, subject, request_envelope)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    row_id,
                    request.idempotency_key,
                    request.request_id,
                    request.origin_butler,
                    request.channel,
                    request.intent.to_string(),
                    request.target_identity,
                    request.message_content,
                    request.subject,
                    envelope,
                ],
            );
            match inserted {
                Ok(_) => Ok(Ok(())),
                Err(e) if is_unique_violation(&e) => Ok(Err(ButlersError::AlreadyExists {
                    idempotency_key: request.idempotency_key,
                })),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(map_tr_err)??;

    debug!(delivery_id = %id, idempotency_key = %key, "delivery request created");
    Ok(id)
}

/// Fetch a request by id.
pub async fn get(db: &Database, id: &str) -> Result<DeliveryRequest, ButlersError> {
    let id = id.to_string();
    let lookup = id.clone();
    let found = db
        .connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM delivery_requests WHERE id = ?1"),
                params![lookup],
                from_row,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)?;

    found.ok_or(ButlersError::NotFound {
        entity: "delivery request",
        id,
    })
}

/// The request whose most recent receipt carries `provider_delivery_id`.
pub async fn find_by_provider_delivery_id(
    db: &Database,
    provider_delivery_id: &str,
) -> Result<Option<DeliveryRequest>, ButlersError> {
    let provider_delivery_id = provider_delivery_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {COLUMNS} FROM delivery_requests WHERE id = (
                        SELECT delivery_request_id FROM delivery_receipts
                        WHERE provider_delivery_id = ?1
                        ORDER BY received_at DESC, id DESC LIMIT 1)"
                ),
                params![provider_delivery_id],
                from_row,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Look up the request owning `idempotency_key` and summarize where it stands.
pub async fn check_duplicate(
    db: &Database,
    idempotency_key: &str,
) -> Result<Option<DuplicateStatus>, ButlersError> {
    let key = idempotency_key.to_string();
    db.connection()
        .call(move |conn| {
            let existing = conn
                .query_row(
                    "SELECT id, status, terminal_error_class, terminal_error_message
                     FROM delivery_requests WHERE idempotency_key = ?1",
                    params![key],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            enum_col::<DeliveryStatus>(row, 1)?,
                            opt_enum_col::<ErrorClass>(row, 2)?,
                            row.get::<_, Option<String>>(3)?,
                        ))
                    },
                )
                .optional()?;

            let Some((delivery_id, status, class, message)) = existing else {
                return Ok(None);
            };

            let terminal_result = match status {
                DeliveryStatus::Pending | DeliveryStatus::InProgress => None,
                DeliveryStatus::Delivered => {
                    let provider_delivery_id = conn
                        .query_row(
                            "SELECT provider_delivery_id FROM delivery_receipts
                             WHERE delivery_request_id = ?1 AND provider_delivery_id IS NOT NULL
                             ORDER BY received_at DESC, id DESC LIMIT 1",
                            params![delivery_id],
                            |row| row.get::<_, String>(0),
                        )
                        .optional()?;
                    Some(TerminalResult::Ok {
                        delivery: DeliveryRef {
                            delivery_id: delivery_id.clone(),
                            provider_delivery_id,
                        },
                    })
                }
                DeliveryStatus::Failed | DeliveryStatus::DeadLettered => {
                    Some(TerminalResult::Error {
                        error: TerminalError {
                            class,
                            message,
                            retryable: false,
                        },
                    })
                }
            };

            Ok(Some(DuplicateStatus {
                delivery_id,
                status,
                is_terminal: status.is_terminal(),
                terminal_result,
            }))
        })
        .await
        .map_err(map_tr_err)
}

/// Move a request to `status`, enforcing the forward-only transition table.
///
/// Terminal moves stamp `terminal_at` only if it is still NULL, so a
/// `failed -> dead_lettered` move keeps the original terminal time.
pub async fn update_status(
    db: &Database,
    id: &str,
    status: DeliveryStatus,
    error_class: Option<ErrorClass>,
    error_message: Option<&str>,
) -> Result<(), ButlersError> {
    let id = id.to_string();
    let error_message = error_message.map(str::to_string);
    let log_id = id.clone();

    let previous = db
        .connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let current = tx
                .query_row(
                    "SELECT status FROM delivery_requests WHERE id = ?1",
                    params![id],
                    |row| enum_col::<DeliveryStatus>(row, 0),
                )
                .optional()?;

            let Some(current) = current else {
                return Ok(Err(ButlersError::NotFound {
                    entity: "delivery request",
                    id,
                }));
            };
            if let Err(e) = current.check_transition(status) {
                return Ok(Err(e));
            }

            if status.is_terminal() {
                tx.execute(
                    &format!(
                        "UPDATE delivery_requests
                         SET status = ?2,
                             terminal_error_class = COALESCE(?3, terminal_error_class),
                             terminal_error_message = COALESCE(?4, terminal_error_message),
                             terminal_at = COALESCE(terminal_at, {NOW}),
                             updated_at = {NOW}
                         WHERE id = ?1"
                    ),
                    params![
                        id,
                        status.to_string(),
                        error_class.map(|c| c.to_string()),
                        error_message,
                    ],
                )?;
            } else {
                tx.execute(
                    &format!(
                        "UPDATE delivery_requests SET status = ?2, updated_at = {NOW} WHERE id = ?1"
                    ),
                    params![id, status.to_string()],
                )?;
            }
            tx.commit()?;
            Ok(Ok(current))
        })
        .await
        .map_err(map_tr_err)??;

    debug!(delivery_id = %log_id, from = %previous, to = %status, "delivery status updated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::receipts;
    use crate::queries::test_support::{new_request, setup_db};
    use butlers_core::ReceiptType;

    #[tokio::test]
    async fn create_and_get_round_trip() {
        let (db, _dir) = setup_db().await;
        let mut request = new_request("key-1");
        request.subject = Some("Weekly report".into());
        request.request_id = Some("req-42".into());

        let id = create(&db, &request).await.unwrap();
        let stored = get(&db, &id).await.unwrap();

        assert_eq!(stored.idempotency_key, "key-1");
        assert_eq!(stored.status, DeliveryStatus::Pending);
        assert_eq!(stored.subject.as_deref(), Some("Weekly report"));
        assert_eq!(stored.request_id.as_deref(), Some("req-42"));
        assert_eq!(stored.request_envelope, serde_json::json!({"source": "test"}));
        assert!(stored.terminal_at.is_none());
        assert!(stored.terminal_error_class.is_none());

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_key_is_rejected() {
        let (db, _dir) = setup_db().await;
        let first = create(&db, &new_request("dup")).await.unwrap();

        let err = create(&db, &new_request("dup")).await.unwrap_err();
        assert!(matches!(err, ButlersError::AlreadyExists { ref idempotency_key } if idempotency_key == "dup"));

        let existing = check_duplicate(&db, "dup").await.unwrap().unwrap();
        assert_eq!(existing.delivery_id, first);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn get_missing_request_is_not_found() {
        let (db, _dir) = setup_db().await;
        let err = get(&db, "nope").await.unwrap_err();
        assert!(matches!(err, ButlersError::NotFound { .. }));
    }

    #[tokio::test]
    async fn check_duplicate_unknown_key_is_none() {
        let (db, _dir) = setup_db().await;
        assert!(check_duplicate(&db, "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn check_duplicate_pending_has_no_terminal_result() {
        let (db, _dir) = setup_db().await;
        let id = create(&db, &new_request("pending")).await.unwrap();

        let dup = check_duplicate(&db, "pending").await.unwrap().unwrap();
        assert_eq!(dup.delivery_id, id);
        assert_eq!(dup.status, DeliveryStatus::Pending);
        assert!(!dup.is_terminal);
        assert!(dup.terminal_result.is_none());
    }

    #[tokio::test]
    async fn check_duplicate_delivered_reports_latest_provider_id() {
        let (db, _dir) = setup_db().await;
        let id = create(&db, &new_request("done")).await.unwrap();
        update_status(&db, &id, DeliveryStatus::InProgress, None, None)
            .await
            .unwrap();
        receipts::insert(&db, &id, Some("tg-1"), ReceiptType::Sent, None)
            .await
            .unwrap();
        receipts::insert(&db, &id, Some("tg-2"), ReceiptType::Delivered, None)
            .await
            .unwrap();
        update_status(&db, &id, DeliveryStatus::Delivered, None, None)
            .await
            .unwrap();

        let dup = check_duplicate(&db, "done").await.unwrap().unwrap();
        assert!(dup.is_terminal);
        assert_eq!(
            dup.terminal_result,
            Some(TerminalResult::Ok {
                delivery: DeliveryRef {
                    delivery_id: id,
                    provider_delivery_id: Some("tg-2".into()),
                }
            })
        );
    }

    #[tokio::test]
    async fn check_duplicate_failed_is_never_retryable() {
        let (db, _dir) = setup_db().await;
        let id = create(&db, &new_request("bad")).await.unwrap();
        update_status(
            &db,
            &id,
            DeliveryStatus::Failed,
            Some(ErrorClass::ValidationError),
            Some("invalid chat id"),
        )
        .await
        .unwrap();

        let dup = check_duplicate(&db, "bad").await.unwrap().unwrap();
        assert_eq!(dup.status, DeliveryStatus::Failed);
        assert_eq!(
            dup.terminal_result,
            Some(TerminalResult::Error {
                error: TerminalError {
                    class: Some(ErrorClass::ValidationError),
                    message: Some("invalid chat id".into()),
                    retryable: false,
                }
            })
        );
    }

    #[tokio::test]
    async fn terminal_at_is_set_once() {
        let (db, _dir) = setup_db().await;
        let id = create(&db, &new_request("once")).await.unwrap();
        update_status(
            &db,
            &id,
            DeliveryStatus::Failed,
            Some(ErrorClass::Timeout),
            Some("timed out"),
        )
        .await
        .unwrap();
        let failed = get(&db, &id).await.unwrap();
        let stamped = failed.terminal_at.clone().unwrap();

        update_status(&db, &id, DeliveryStatus::DeadLettered, None, None)
            .await
            .unwrap();
        let dead = get(&db, &id).await.unwrap();
        assert_eq!(dead.status, DeliveryStatus::DeadLettered);
        assert_eq!(dead.terminal_at.as_deref(), Some(stamped.as_str()));
        assert_eq!(dead.terminal_error_class, Some(ErrorClass::Timeout));
        assert_eq!(dead.terminal_error_message.as_deref(), Some("timed out"));
    }

    #[tokio::test]
    async fn terminal_status_cannot_regress() {
        let (db, _dir) = setup_db().await;
        let id = create(&db, &new_request("fwd")).await.unwrap();
        update_status(&db, &id, DeliveryStatus::Delivered, None, None)
            .await
            .unwrap();

        for next in [
            DeliveryStatus::Pending,
            DeliveryStatus::InProgress,
            DeliveryStatus::Failed,
        ] {
            let err = update_status(&db, &id, next, None, None).await.unwrap_err();
            assert!(matches!(err, ButlersError::InvalidTransition { .. }), "{next}");
        }
        assert_eq!(get(&db, &id).await.unwrap().status, DeliveryStatus::Delivered);
    }

    #[tokio::test]
    async fn non_terminal_move_leaves_error_fields_empty() {
        let (db, _dir) = setup_db().await;
        let id = create(&db, &new_request("nt")).await.unwrap();
        update_status(
            &db,
            &id,
            DeliveryStatus::InProgress,
            Some(ErrorClass::Timeout),
            Some("ignored"),
        )
        .await
        .unwrap();

        let stored = get(&db, &id).await.unwrap();
        assert_eq!(stored.status, DeliveryStatus::InProgress);
        assert!(stored.terminal_error_class.is_none());
        assert!(stored.terminal_at.is_none());
    }

    #[tokio::test]
    async fn update_unknown_request_is_not_found() {
        let (db, _dir) = setup_db().await;
        let err = update_status(&db, "ghost", DeliveryStatus::Delivered, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ButlersError::NotFound { .. }));
    }

    #[tokio::test]
    async fn reverse_lookup_by_provider_id() {
        let (db, _dir) = setup_db().await;
        let id = create(&db, &new_request("rev")).await.unwrap();
        receipts::insert(&db, &id, Some("msg-77"), ReceiptType::Sent, None)
            .await
            .unwrap();

        let found = find_by_provider_delivery_id(&db, "msg-77").await.unwrap();
        assert_eq!(found.map(|r| r.id), Some(id));
        assert!(find_by_provider_delivery_id(&db, "msg-00").await.unwrap().is_none());
    }
}
