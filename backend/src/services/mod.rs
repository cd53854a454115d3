//! # Services Module
//!
//! This module contains the settlement engine. Each service handles one
//! step of a payment's life.
//!
//! ## Services Overview
//!
//! | Service | Responsibility |
//! |---------|---------------|
//! | `PaymentService` | Issue payments, build status views |
//! | `ConfirmationTracker` | Decide when a payment completes or expires |
//! | `SweepBuilder` | Consolidate confirmed outputs to the main address |
//! | `SettlementPoller` | Drive tracker and sweeper for every payment |
//! | `WebhookNotifier` | Signed `payment.completed` callbacks |
//!
//! ## Service Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        SERVICES LAYER                            │
//! │                                                                  │
//! │  HTTP ──▶ PaymentService          SettlementPoller (background)  │
//! │            • create_payment()      every POLL_INTERVAL_SECS      │
//! │            • get_payment_view()           │                      │
//! │                                ┌──────────┴──────────┐           │
//! │                                ▼                     ▼           │
//! │                       ┌────────────────┐    ┌────────────────┐   │
//! │                       │  Confirmation  │    │     Sweep      │   │
//! │                       │    Tracker     │    │    Builder     │   │
//! │                       └────────────────┘    └────────────────┘   │
//! │                                │                     │           │
//! │                                ▼                     ▼           │
//! │                         PaymentStore      ChainApi + KeyVault    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod confirmation_tracker;
pub mod payment_service;
pub mod settlement_poller;
pub mod sweep_builder;
#[cfg(test)]
pub(crate) mod test_support;
pub mod webhook;

use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use crate::chain::{ChainApi, ChainError};
use crate::db::{DatabaseError, PaymentStore};
use crate::vault::{AddressError, KeyVaultError};

pub use confirmation_tracker::ConfirmationTracker;
pub use payment_service::PaymentService;
pub use settlement_poller::SettlementPoller;
pub use sweep_builder::{SweepBuilder, SweepOutcome};
pub use webhook::WebhookNotifier;

/// Store handle shared by the services.
pub type SharedStore = Arc<dyn PaymentStore>;

/// Chain client handle shared by the services.
pub type SharedChain = Arc<dyn ChainApi>;

/// Errors that can occur while creating or settling a payment.
///
/// Only [`SettlementError::Validation`] reaches a caller as a client
/// error. Everything else raised during a poll cycle is logged by the
/// poller and retried on a later cycle.
#[derive(Debug, Error)]
pub enum SettlementError {
    /// Bad or zero requested amount.
    #[error("Invalid amount: {0}")]
    Validation(String),

    /// Payment does not exist.
    #[error("Payment not found: {0}")]
    NotFound(Uuid),

    /// Indexer unreachable after retries. Try again next cycle.
    #[error("Chain unavailable: {0}")]
    ChainUnavailable(ChainError),

    /// Indexer answered with an error or an unreadable response.
    #[error("Chain error: {0}")]
    Chain(ChainError),

    /// Encrypted key failed authentication. Never retried blindly.
    #[error("Payment key could not be decrypted")]
    Decryption,

    /// Any other key vault failure.
    #[error("Key vault error: {0}")]
    KeyVault(KeyVaultError),

    /// Address could not be parsed or derived.
    #[error("Address error: {0}")]
    Address(#[from] AddressError),

    /// The network refused the signed sweep.
    #[error("Broadcast rejected: {0}")]
    BroadcastRejected(String),

    /// Building or signing the sweep failed.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// A freshly issued address already exists in the store.
    #[error("Address collision: {0}")]
    AddressCollision(String),

    /// Store operation failed.
    #[error("Database error: {0}")]
    Store(DatabaseError),
}

impl From<ChainError> for SettlementError {
    fn from(e: ChainError) -> Self {
        match e {
            ChainError::Unavailable { .. } => SettlementError::ChainUnavailable(e),
            other => SettlementError::Chain(other),
        }
    }
}

impl From<KeyVaultError> for SettlementError {
    fn from(e: KeyVaultError) -> Self {
        match e {
            KeyVaultError::Decryption => SettlementError::Decryption,
            KeyVaultError::Address(address) => SettlementError::Address(address),
            other => SettlementError::KeyVault(other),
        }
    }
}

impl From<DatabaseError> for SettlementError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::Duplicate(what) => SettlementError::AddressCollision(what),
            other => SettlementError::Store(other),
        }
    }
}
