// SPDX-FileCopyrightText: 2026 Butlers Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Append-only provider receipts.

use butlers_core::{ButlersError, DeliveryReceipt, ReceiptType};
use rusqlite::{Row, params};

use super::{enum_col, opt_json_col, to_json};
use crate::database::{Database, map_tr_err};

fn from_row(row: &Row<'_>) -> rusqlite::Result<DeliveryReceipt> {
    Ok(DeliveryReceipt {
        id: row.get(0)?,
        delivery_request_id: row.get(1)?,
        provider_delivery_id: row.get(2)?,
        receipt_type: enum_col(row, 3)?,
        received_at: row.get(4)?,
        metadata: opt_json_col(row, 5)?,
    })
}

pub(crate) fn is_foreign_key_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY
    )
}

/// Append a receipt. The request row is left untouched.
pub async fn insert(
    db: &Database,
    delivery_request_id: &str,
    provider_delivery_id: Option<&str>,
    receipt_type: ReceiptType,
    metadata: Option<serde_json::Value>,
) -> Result<i64, ButlersError> {
    let request_id = delivery_request_id.to_string();
    let provider_delivery_id = provider_delivery_id.map(str::to_string);

    db.connection()
        .call(move |conn| {
            let metadata = metadata.as_ref().map(to_json).transpose()?;
            let inserted = conn.execute(
                "INSERT INTO delivery_receipts
                    (delivery_request_id, provider_delivery_id, receipt_type, metadata)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    request_id,
                    provider_delivery_id,
                    receipt_type.to_string(),
                    metadata
                ],
            );
            match inserted {
                Ok(_) => Ok(Ok(conn.last_insert_rowid())),
                Err(e) if is_foreign_key_violation(&e) => Ok(Err(ButlersError::NotFound {
                    entity: "delivery request",
                    id: request_id,
                })),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(map_tr_err)?
}

/// Receipts for a request, oldest first.
pub async fn list(
    db: &Database,
    delivery_request_id: &str,
) -> Result<Vec<DeliveryReceipt>, ButlersError> {
    let request_id = delivery_request_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, delivery_request_id, provider_delivery_id, receipt_type,
                        received_at, metadata
                 FROM delivery_receipts
                 WHERE delivery_request_id = ?1
                 ORDER BY received_at ASC, id ASC",
            )?;
            let rows = stmt.query_map(params![request_id], from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
        .await
        .map_err(map_tr_err)
}
