//! # Database Queries
//!
//! This module contains all the SQL queries for the `payments` table.
//! Each function performs a specific database operation.
//!
//! ## Error Handling
//!
//! All queries return `Result<T, DatabaseError>`. Common errors:
//! - `Duplicate` - Unique constraint violated (address collision)
//! - `QueryError` - SQL execution failed
//! - `Corrupt` - A row could not be mapped back to a record

use deadpool_postgres::Pool;
use tokio_postgres::error::SqlState;
use tokio_postgres::Row;
use tracing::{debug, info};
use uuid::Uuid;

use super::models::*;
use super::DatabaseError;
use crate::vault::EncryptedKey;

const PAYMENT_COLUMNS: &str =
    "id, address, encrypted_key, amount_sats, status, created_at, updated_at, expires_at";

// ============================================
// HELPER FUNCTIONS
// ============================================

/// Helper to convert a database row to PaymentRecord
fn row_to_payment(row: &Row) -> Result<PaymentRecord, DatabaseError> {
    let status: String = row.try_get("status")?;
    let status = status.parse().map_err(DatabaseError::Corrupt)?;
    let encrypted_key: String = row.try_get("encrypted_key")?;

    Ok(PaymentRecord {
        id: row.try_get("id")?,
        address: row.try_get("address")?,
        encrypted_key: EncryptedKey::from_stored(encrypted_key),
        amount_sats: row.try_get("amount_sats")?,
        status,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

async fn client(pool: &Pool) -> Result<deadpool_postgres::Object, DatabaseError> {
    pool.get()
        .await
        .map_err(|e| DatabaseError::ConnectionError(e.to_string()))
}

// ============================================
// PAYMENT QUERIES
// ============================================

/// Insert a new pending payment.
///
/// A second payment with the same address violates the unique
/// constraint and is reported as `DatabaseError::Duplicate`.
pub async fn insert_payment(
    pool: &Pool,
    payment: &NewPayment,
) -> Result<PaymentRecord, DatabaseError> {
    debug!("Inserting payment {}", payment.id);

    let client = client(pool).await?;

    let sql = format!(
        r#"
        INSERT INTO payments (id, address, encrypted_key, amount_sats, status, expires_at)
        VALUES ($1, $2, $3, $4, 'pending', $5)
        RETURNING {}
        "#,
        PAYMENT_COLUMNS
    );

    let row = client
        .query_one(
            sql.as_str(),
            &[
                &payment.id,
                &payment.address,
                &payment.encrypted_key.as_str(),
                &payment.amount_sats,
                &payment.expires_at,
            ],
        )
        .await
        .map_err(|e| {
            if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                DatabaseError::Duplicate(format!("payment address {}", payment.address))
            } else {
                DatabaseError::QueryError(e)
            }
        })?;

    info!("Payment {} stored", payment.id);
    row_to_payment(&row)
}

/// Get a payment by id.
pub async fn get_payment(pool: &Pool, id: Uuid) -> Result<Option<PaymentRecord>, DatabaseError> {
    let client = client(pool).await?;

    let sql = format!("SELECT {} FROM payments WHERE id = $1", PAYMENT_COLUMNS);
    let rows = client.query(sql.as_str(), &[&id]).await?;

    rows.first().map(row_to_payment).transpose()
}

/// Get all payments with the given statuses, oldest first.
pub async fn list_payments_by_status(
    pool: &Pool,
    statuses: &[PaymentStatus],
) -> Result<Vec<PaymentRecord>, DatabaseError> {
    let client = client(pool).await?;

    let statuses: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
    let sql = format!(
        "SELECT {} FROM payments WHERE status = ANY($1) ORDER BY created_at ASC",
        PAYMENT_COLUMNS
    );
    let rows = client.query(sql.as_str(), &[&statuses]).await?;

    rows.iter().map(row_to_payment).collect()
}

/// Move a payment from `from` to `to`.
///
/// The `WHERE status = $2` guard makes this a compare-and-set, so a
/// concurrent writer can never regress a terminal status.
///
/// ## Returns
///
/// * `Ok(true)` - Row updated
/// * `Ok(false)` - Payment missing or no longer in `from`
pub async fn transition_status(
    pool: &Pool,
    id: Uuid,
    from: PaymentStatus,
    to: PaymentStatus,
) -> Result<bool, DatabaseError> {
    debug!("Transitioning payment {} {} -> {}", id, from, to);

    let client = client(pool).await?;

    let rows_affected = client
        .execute(
            r#"
            UPDATE payments
            SET status = $3, updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
            &[&id, &from.as_str(), &to.as_str()],
        )
        .await?;

    Ok(rows_affected == 1)
}

/// Cheap connectivity check.
pub async fn ping(pool: &Pool) -> Result<(), DatabaseError> {
    let client = client(pool).await?;
    client.query_one("SELECT 1", &[]).await?;
    Ok(())
}
