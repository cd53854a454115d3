//! # Chain Client Module
//!
//! A small RPC surface over the Electrum indexing protocol. Everything the
//! settlement engine knows about the chain comes through [`ChainApi`].
//!
//! ## Operations
//!
//! | Method | Electrum call | Returns |
//! |--------|---------------|---------|
//! | `get_balance` | `blockchain.scripthash.get_balance` | confirmed / unconfirmed sats |
//! | `get_history` | `blockchain.scripthash.get_history` | tx hashes with heights |
//! | `list_unspent` | `blockchain.scripthash.listunspent` | spendable outputs |
//! | `get_tip_height` | `blockchain.headers.subscribe` | current chain height |
//! | `estimate_fee_rate` | `blockchain.estimatefee` | sat/vB |
//! | `broadcast` | `blockchain.transaction.broadcast` | txid |
//!
//! Addresses are never sent to the server. Lookups use the scripthash
//! derived in [`crate::vault::address`].
//!
//! ## Failure Semantics
//!
//! [`ChainError::Unavailable`] means "the indexer could not be reached, try
//! again next cycle". It must never be read as "the payment failed".

pub mod electrum;
#[cfg(test)]
pub mod fake;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

pub use electrum::ElectrumChain;

/// Errors returned by the chain client.
#[derive(Error, Debug, Clone)]
pub enum ChainError {
    /// The connection kept failing after every retry.
    #[error("Chain indexer unavailable after {attempts} attempts ({method}): {last_error}")]
    Unavailable {
        method: String,
        attempts: u32,
        last_error: String,
    },

    /// The server answered with a JSON-RPC error (for example a rejected broadcast).
    #[error("Indexer rejected {method}: {message}")]
    Rpc { method: String, message: String },

    /// The server answered with something we could not decode.
    #[error("Unexpected response to {method}: {message}")]
    InvalidResponse { method: String, message: String },
}

/// Balance of a scripthash, in litoshis.
///
/// `unconfirmed` may be negative when mempool transactions spend
/// confirmed outputs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Balance {
    #[serde(rename = "confirmed")]
    pub confirmed_sats: u64,

    #[serde(rename = "unconfirmed")]
    pub unconfirmed_sats: i64,
}

impl Balance {
    /// Confirmed plus unconfirmed, never negative.
    pub fn total_seen(&self) -> u64 {
        let total = self.confirmed_sats as i128 + self.unconfirmed_sats as i128;
        total.clamp(0, u64::MAX as i128) as u64
    }
}

/// One transaction touching a scripthash.
///
/// Height `0` is mempool, `-1` is mempool with unconfirmed parents.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HistoryEntry {
    pub tx_hash: String,
    pub height: i64,
}

/// A spendable output paying a scripthash.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Utxo {
    pub tx_hash: String,

    #[serde(rename = "tx_pos")]
    pub output_index: u32,

    #[serde(rename = "value")]
    pub value_sats: u64,

    pub height: i64,
}

/// The chain operations the settlement engine depends on.
///
/// Implemented by [`ElectrumChain`] in production and by scripted fakes in
/// tests.
#[async_trait]
pub trait ChainApi: Send + Sync {
    async fn get_balance(&self, script_hash: &str) -> Result<Balance, ChainError>;

    async fn get_history(&self, script_hash: &str) -> Result<Vec<HistoryEntry>, ChainError>;

    async fn list_unspent(&self, script_hash: &str) -> Result<Vec<Utxo>, ChainError>;

    async fn get_tip_height(&self) -> Result<u64, ChainError>;

    /// Current fee rate in sat/vB, at least 1.
    async fn estimate_fee_rate(&self) -> Result<u64, ChainError>;

    /// Broadcast a raw transaction and return its txid.
    async fn broadcast(&self, raw_tx_hex: &str) -> Result<String, ChainError>;

    /// Cheap liveness probe.
    async fn ping(&self) -> Result<(), ChainError>;
}
