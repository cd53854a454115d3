//! # Confirmation Tracker
//!
//! Decides when a pending payment has settled.
//!
//! ## State Machine
//!
//! ```text
//!                 confirmed ≥ requested
//!                 AND every output depth ≥ CONFIRMATIONS
//!   pending ────────────────────────────────────────────▶ completed
//!      │
//!      │  past expires_at AND confirmed + unconfirmed < requested
//!      └────────────────────────────────────────────────▶ expired
//! ```
//!
//! The completion gate is all-or-nothing: one shallow output holds the
//! whole payment at `pending`. Underpayment is not an error, the payment
//! simply waits.
//!
//! ## Confirmation Depth
//!
//! ```text
//! tip = 1000
//! output height 997  → depth 4
//! output height 1000 → depth 1
//! output height 0    → depth 0   (mempool)
//! output height -1   → depth 0   (mempool, unconfirmed parents)
//! ```

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::{SettlementError, SharedChain, SharedStore};
use crate::chain::{Balance, Utxo};
use crate::db::{PaymentRecord, PaymentStatus};
use crate::vault::address::{self, Network};

/// Depth of an output mined at `height` when the chain tip is `tip`.
///
/// Heights `<= 0` are unconfirmed and have depth 0. A height above the
/// tip (indexer lag) also yields 0, never a negative depth.
pub fn confirmation_depth(tip: u64, height: i64) -> u64 {
    if height <= 0 {
        return 0;
    }
    (tip + 1).saturating_sub(height as u64)
}

/// Outcome of checking a payment against the completion gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Paid in full and deep enough.
    Completed,
    /// Confirmed balance is below the requested amount.
    Underpaid { confirmed: u64, requested: u64 },
    /// Paid in full but at least one output is too shallow.
    AwaitingConfirmations { min_depth: u64, needed: u64 },
    /// Balance claims funds but no spendable output is listed.
    NoOutputs,
}

/// Apply the completion gate to a chain snapshot.
pub fn decide(
    requested: u64,
    balance: &Balance,
    utxos: &[Utxo],
    tip: u64,
    needed: u64,
) -> Decision {
    if balance.confirmed_sats < requested {
        return Decision::Underpaid {
            confirmed: balance.confirmed_sats,
            requested,
        };
    }

    let min_depth = match utxos.iter().map(|u| confirmation_depth(tip, u.height)).min() {
        Some(depth) => depth,
        None => return Decision::NoOutputs,
    };

    if min_depth >= needed {
        Decision::Completed
    } else {
        Decision::AwaitingConfirmations { min_depth, needed }
    }
}

/// Whether a pending payment should lapse at `now`.
///
/// A payment whose full amount is already visible, confirmed or not, is
/// left to finish confirming.
pub fn should_expire(payment: &PaymentRecord, balance: &Balance, now: DateTime<Utc>) -> bool {
    payment.is_past_expiry(now) && balance.total_seen() < payment.requested_sats()
}

/// Moves pending payments to `completed` or `expired`.
#[derive(Clone)]
pub struct ConfirmationTracker {
    store: SharedStore,
    chain: SharedChain,
    network: Network,
    confirmations: u64,
}

impl ConfirmationTracker {
    /// Create a tracker requiring `confirmations` blocks per output.
    pub fn new(store: SharedStore, chain: SharedChain, network: Network, confirmations: u64) -> Self {
        Self {
            store,
            chain,
            network,
            confirmations,
        }
    }

    /// Re-evaluate one payment.
    ///
    /// ## Returns
    ///
    /// * `Ok(Some(status))` - This call moved the payment to `status`
    /// * `Ok(None)` - Nothing changed (still pending, or already terminal)
    /// * `Err(...)` - Chain or store failure; retry next cycle
    pub async fn evaluate(
        &self,
        payment: &PaymentRecord,
        now: DateTime<Utc>,
    ) -> Result<Option<PaymentStatus>, SettlementError> {
        if payment.status.is_terminal() {
            return Ok(None);
        }

        let script_hash = address::address_script_hash(&payment.address, self.network)?;
        let balance = self.chain.get_balance(&script_hash).await?;

        if should_expire(payment, &balance, now) {
            return self.transition(payment, PaymentStatus::Expired).await;
        }

        let requested = payment.requested_sats();
        if balance.confirmed_sats < requested {
            debug!(
                payment_id = %payment.id,
                confirmed = balance.confirmed_sats,
                requested,
                "Payment not yet satisfied"
            );
            return Ok(None);
        }

        let tip = self.chain.get_tip_height().await?;
        let utxos = self.chain.list_unspent(&script_hash).await?;

        match decide(requested, &balance, &utxos, tip, self.confirmations) {
            Decision::Completed => self.transition(payment, PaymentStatus::Completed).await,
            decision => {
                debug!(payment_id = %payment.id, ?decision, tip, "Payment still pending");
                Ok(None)
            }
        }
    }

    async fn transition(
        &self,
        payment: &PaymentRecord,
        to: PaymentStatus,
    ) -> Result<Option<PaymentStatus>, SettlementError> {
        let moved = self
            .store
            .transition_status(payment.id, PaymentStatus::Pending, to)
            .await?;

        if moved {
            info!(payment_id = %payment.id, address = %payment.address, "Payment {}", to);
            Ok(Some(to))
        } else {
            debug!(payment_id = %payment.id, "Payment already left pending");
            Ok(None)
        }
    }
}
