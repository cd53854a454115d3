//! # Payment Service
//!
//! The entry point the HTTP layer uses: issue a payment request and
//! report its current state.
//!
//! ## Flow Example: Create
//!
//! ```text
//! 1. POST /payments { amount }
//!                ↓
//! 2. Validate amount > 0
//!                ↓
//! 3. KeyVault issues a fresh key, address and encrypted key
//!                ↓
//! 4. Insert pending row (address collision is fatal, never overwritten)
//!                ↓
//! 5. Return { id, address }
//! ```
//!
//! ## Flow Example: Status
//!
//! ```text
//! 1. Load the payment row
//!                ↓
//! 2. Balance, history and tip height from the indexer (concurrently)
//!                ↓
//! 3. received = confirmed + unconfirmed, confirmations = shallowest
//!    confirmed transaction
//! ```

use chrono::{Duration, Utc};
use tracing::{debug, error, info};
use uuid::Uuid;

use super::confirmation_tracker::confirmation_depth;
use super::{SettlementError, SharedChain, SharedStore};
use crate::chain::HistoryEntry;
use crate::db::NewPayment;
use crate::models::{CreatePaymentResponse, PaymentStatusResponse};
use crate::utils::{format_ltc, truncate_middle};
use crate::vault::address;
use crate::vault::KeyVault;

/// Shallowest depth over confirmed history entries, 0 if none.
pub fn shallowest_confirmation(history: &[HistoryEntry], tip: u64) -> u64 {
    history
        .iter()
        .filter(|h| h.height > 0)
        .map(|h| confirmation_depth(tip, h.height))
        .min()
        .unwrap_or(0)
}

/// Creates payments and builds their status views.
///
/// ## Usage
///
/// ```rust,ignore
/// let payments = PaymentService::new(store, chain, vault, config.confirmations, config.payment_ttl_secs);
///
/// let created = payments.create_payment(50_000_000).await?;
/// let view = payments.get_payment_view(created.id).await?;
/// ```
#[derive(Clone)]
pub struct PaymentService {
    store: SharedStore,
    chain: SharedChain,
    vault: KeyVault,
    confirmations: u64,
    payment_ttl_secs: u64,
}

impl PaymentService {
    pub fn new(
        store: SharedStore,
        chain: SharedChain,
        vault: KeyVault,
        confirmations: u64,
        payment_ttl_secs: u64,
    ) -> Self {
        Self {
            store,
            chain,
            vault,
            confirmations,
            payment_ttl_secs,
        }
    }

    /// Issue a new payment request for `amount_sats` litoshis.
    ///
    /// ## Returns
    ///
    /// * `Ok(CreatePaymentResponse)` - Stored as `pending`
    /// * `Err(SettlementError::Validation)` - Amount is zero or negative
    /// * `Err(SettlementError::AddressCollision)` - Issued address already existed
    pub async fn create_payment(
        &self,
        amount_sats: i64,
    ) -> Result<CreatePaymentResponse, SettlementError> {
        if amount_sats <= 0 {
            return Err(SettlementError::Validation(
                "Amount must be greater than 0".to_string(),
            ));
        }

        let issued = self.vault.create_address()?;
        let expires_at = self.expiry_from_now();

        let record = self
            .store
            .insert_payment(NewPayment {
                id: Uuid::new_v4(),
                address: issued.address,
                encrypted_key: issued.encrypted_key,
                amount_sats,
                expires_at,
            })
            .await
            .map_err(|e| {
                let e = SettlementError::from(e);
                if let SettlementError::AddressCollision(_) = &e {
                    error!(target: "security", "Issued address collided with an existing payment");
                }
                e
            })?;

        info!(
            payment_id = %record.id,
            address = %truncate_middle(&record.address, 24),
            amount = %format_ltc(record.requested_sats()),
            "Payment created"
        );

        Ok(CreatePaymentResponse {
            id: record.id,
            address: record.address,
            amount: record.amount_sats,
            formatted_amount: format_ltc(amount_sats as u64),
            expires_at: record.expires_at,
        })
    }

    /// Current state of a payment, combining the stored row with live
    /// chain data.
    pub async fn get_payment_view(&self, id: Uuid) -> Result<PaymentStatusResponse, SettlementError> {
        let payment = self
            .store
            .get_payment(id)
            .await?
            .ok_or(SettlementError::NotFound(id))?;

        let script_hash = address::address_script_hash(&payment.address, self.vault.network())?;

        let (balance, history, tip) = tokio::try_join!(
            self.chain.get_balance(&script_hash),
            self.chain.get_history(&script_hash),
            self.chain.get_tip_height(),
        )?;

        let received = balance.total_seen();
        let confirmations = shallowest_confirmation(&history, tip);

        debug!(payment_id = %id, received, confirmations, "Payment view");

        Ok(PaymentStatusResponse {
            id: payment.id,
            address: payment.address,
            requested_amount: payment.amount_sats,
            received_amount: received,
            formatted_received: format_ltc(received),
            status: payment.status,
            confirmations,
            confirmations_needed: self.confirmations,
            created_at: payment.created_at,
            updated_at: payment.updated_at,
            expires_at: payment.expires_at,
        })
    }

    /// Readiness of the store and the indexer.
    pub async fn health(&self) -> (bool, bool) {
        let (database, electrum) = tokio::join!(self.store.ping(), self.chain.ping());
        (database.is_ok(), electrum.is_ok())
    }

    fn expiry_from_now(&self) -> Option<chrono::DateTime<Utc>> {
        if self.payment_ttl_secs == 0 {
            return None;
        }
        let ttl = i64::try_from(self.payment_ttl_secs)
            .ok()
            .and_then(Duration::try_seconds)?;
        Utc::now().checked_add_signed(ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{PaymentStatus, PaymentStore};
    use crate::services::test_support::{script_hash_of, txid, Fixture};
    use crate::vault::Network;
    use std::collections::HashSet;

    fn service(fx: &Fixture, ttl: u64) -> PaymentService {
        PaymentService::new(fx.store.clone(), fx.chain.clone(), fx.vault.clone(), 2, ttl)
    }

    #[test]
    fn test_shallowest_confirmation() {
        let history = vec![
            HistoryEntry { tx_hash: txid(1), height: 997 },
            HistoryEntry { tx_hash: txid(2), height: 999 },
            HistoryEntry { tx_hash: txid(3), height: 0 },
        ];
        assert_eq!(shallowest_confirmation(&history, 1000), 2);
        assert_eq!(shallowest_confirmation(&history[2..], 1000), 0);
        assert_eq!(shallowest_confirmation(&[], 1000), 0);
    }

    #[tokio::test]
    async fn test_create_rejects_non_positive_amounts() {
        let fx = Fixture::new(1000);
        let payments = service(&fx, 0);

        for amount in [0, -1, i64::MIN] {
            assert!(matches!(
                payments.create_payment(amount).await,
                Err(SettlementError::Validation(_))
            ));
        }
        assert!(fx.store.list_open_payments().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_created_payments_get_unique_addresses_and_keys() {
        let fx = Fixture::new(1000);
        let payments = service(&fx, 0);

        let mut addresses = HashSet::new();
        for _ in 0..20 {
            let created = payments.create_payment(50_000_000).await.unwrap();
            assert!(created.expires_at.is_none());
            assert!(addresses.insert(created.address.clone()));

            let stored = fx.store.get_payment(created.id).await.unwrap().unwrap();
            assert_eq!(stored.status, PaymentStatus::Pending);
            assert_eq!(stored.amount_sats, 50_000_000);

            // The stored key controls the issued address
            let derived = fx
                .vault
                .with_secret_key(&stored.encrypted_key, |_, public_key| {
                    address::p2wpkh_address(
                        &bitcoin::key::CompressedPublicKey(*public_key),
                        Network::Mainnet,
                    )
                })
                .unwrap()
                .unwrap();
            assert_eq!(derived, created.address);
        }
    }

    #[tokio::test]
    async fn test_ttl_sets_expiry() {
        let fx = Fixture::new(1000);
        let before = Utc::now();
        let created = service(&fx, 900).create_payment(1_000).await.unwrap();
        let expires_at = created.expires_at.unwrap();
        assert!(expires_at >= before + Duration::seconds(900));
        assert!(expires_at <= Utc::now() + Duration::seconds(900));
    }

    #[tokio::test]
    async fn test_address_collision_is_fatal() {
        let fx = Fixture::new(1000);
        let existing = fx.payment(1_000, None).await;

        let result = fx
            .store
            .insert_payment(NewPayment {
                id: Uuid::new_v4(),
                address: existing.address.clone(),
                encrypted_key: fx.vault.create_address().unwrap().encrypted_key,
                amount_sats: 2_000,
                expires_at: None,
            })
            .await
            .map_err(SettlementError::from);

        assert!(matches!(result, Err(SettlementError::AddressCollision(_))));
        assert_eq!(fx.reload(&existing).await.amount_sats, 1_000);
    }

    #[tokio::test]
    async fn test_view_reports_received_and_confirmations() {
        let fx = Fixture::new(1000);
        let payments = service(&fx, 0);
        let payment = fx.payment(50_000_000, None).await;
        let sh = script_hash_of(&payment);
        fx.chain.set_balance(&sh, 30_000_000, 20_000_000);
        fx.chain.add_utxo(&sh, &txid(1), 0, 30_000_000, 999);
        fx.chain.add_utxo(&sh, &txid(2), 0, 20_000_000, 0);

        let view = payments.get_payment_view(payment.id).await.unwrap();
        assert_eq!(view.requested_amount, 50_000_000);
        assert_eq!(view.received_amount, 50_000_000);
        assert_eq!(view.formatted_received, "0.50000000 LTC");
        assert_eq!(view.confirmations, 2);
        assert_eq!(view.confirmations_needed, 2);
        assert_eq!(view.status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_view_errors() {
        let fx = Fixture::new(1000);
        let payments = service(&fx, 0);

        assert!(matches!(
            payments.get_payment_view(Uuid::new_v4()).await,
            Err(SettlementError::NotFound(_))
        ));

        let payment = fx.payment(1_000, None).await;
        fx.chain.set_unavailable(true);
        assert!(matches!(
            payments.get_payment_view(payment.id).await,
            Err(SettlementError::ChainUnavailable(_))
        ));
        assert_eq!(payments.health().await, (true, false));
    }
}
