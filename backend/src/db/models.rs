//! # Database Models
//!
//! This module defines the data structures that map to database tables.
//!
//! ## Table Overview
//!
//! | Table | Description |
//! |-------|-------------|
//! | `payments` | One row per payment request and its ephemeral address |
//!
//! ## Status Lifecycle
//!
//! ```text
//!             ┌──────────────▶ completed
//!   pending ──┤
//!             └──────────────▶ expired     (only when a TTL is configured)
//! ```
//!
//! Transitions only ever leave `pending`. A terminal payment is never
//! reopened.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::vault::EncryptedKey;

/// Status of a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Waiting for the full amount to arrive and confirm.
    Pending,
    /// Full amount received with enough confirmations.
    Completed,
    /// Not paid in full before `expires_at`.
    Expired,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Expired => "expired",
        }
    }

    /// Whether the status can no longer change.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "expired" => Ok(PaymentStatus::Expired),
            other => Err(format!("unknown payment status '{}'", other)),
        }
    }
}

/// Represents a payment record in the database.
///
/// ## Note on Types
///
/// Amounts are `i64` because PostgreSQL has no unsigned integers. The
/// table enforces `amount_sats > 0`.
#[derive(Debug, Clone)]
pub struct PaymentRecord {
    /// Opaque identifier handed to the caller.
    pub id: Uuid,

    /// Ephemeral bech32 receiving address. Unique.
    pub address: String,

    /// AES-GCM sealed private key for `address`.
    pub encrypted_key: EncryptedKey,

    /// Requested amount in litoshis.
    pub amount_sats: i64,

    pub status: PaymentStatus,

    pub created_at: DateTime<Utc>,

    /// Advances on every status change.
    pub updated_at: DateTime<Utc>,

    /// When a still-unpaid request lapses. `None` means never.
    pub expires_at: Option<DateTime<Utc>>,
}

impl PaymentRecord {
    /// Requested amount as an unsigned value.
    pub fn requested_sats(&self) -> u64 {
        self.amount_sats.max(0) as u64
    }

    /// Whether the payment is past its expiry at `now`.
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Values supplied when creating a payment.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub id: Uuid,
    pub address: String,
    pub encrypted_key: EncryptedKey,
    pub amount_sats: i64,
    pub expires_at: Option<DateTime<Utc>>,
}
