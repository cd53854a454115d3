//! # Sweep Builder
//!
//! Consolidates the confirmed outputs of a payment address into the
//! custodial main address.
//!
//! ## Sweep Flow
//!
//! ```text
//! 1. listunspent + tip height
//!              ↓
//! 2. Keep outputs with depth ≥ CONFIRMATIONS not already swept
//!              ↓
//! 3. fee = (inputs × 68 + 11 + 43) vB × fee rate
//!              ↓
//! 4. send = total − fee        (≤ 0 → no-op, nothing broadcast)
//!              ↓
//! 5. Decrypt key, sign every input (P2WPKH, SIGHASH_ALL), erase key
//!              ↓
//! 6. Broadcast, remember the spent outpoints
//! ```
//!
//! ## Transaction Structure
//!
//! ```text
//! Transaction (version 2, locktime 0)
//! ├── Inputs[]   every eligible output, sequence 0xffffffff
//! │   └── Witness  <signature> <compressed pubkey>
//! └── Output     send amount → MAIN_ADDRESS
//! ```
//!
//! ## Double-Spend Guard
//!
//! Outpoints of a successful broadcast are remembered per payment and left
//! out of later sweeps until the indexer stops listing them. Sweeping
//! twice without new eligible outputs therefore broadcasts at most once.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::hashes::Hash;
use bitcoin::key::CompressedPublicKey;
use bitcoin::secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::confirmation_tracker::confirmation_depth;
use super::{SettlementError, SharedChain};
use crate::chain::{ChainError, Utxo};
use crate::db::PaymentRecord;
use crate::utils::format_ltc;
use crate::vault::address::{self, AddressError, Network};
use crate::vault::KeyVault;

/// Virtual size of one signed P2WPKH input.
pub const INPUT_VSIZE: u64 = 68;

/// Version, locktime, counts and segwit marker.
pub const TX_OVERHEAD_VSIZE: u64 = 11;

/// One output, sized for the largest (P2WSH) destination.
pub const OUTPUT_VSIZE: u64 = 43;

/// Result of a sweep attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepOutcome {
    /// A sweep transaction was accepted by the indexer.
    Broadcast {
        txid: String,
        inputs: usize,
        amount_sats: u64,
        fee_sats: u64,
    },
    /// Eligible funds do not cover the fee.
    Dust { total_sats: u64, fee_sats: u64 },
    /// No output is deep enough (or all were already swept).
    NothingEligible,
}

/// Estimated virtual size of a sweep with `inputs` inputs.
pub fn estimate_vsize(inputs: usize) -> u64 {
    (inputs as u64)
        .saturating_mul(INPUT_VSIZE)
        .saturating_add(TX_OVERHEAD_VSIZE + OUTPUT_VSIZE)
}

/// Total fee for a sweep with `inputs` inputs at `sat_per_vb`.
pub fn estimate_fee(inputs: usize, sat_per_vb: u64) -> u64 {
    estimate_vsize(inputs).saturating_mul(sat_per_vb)
}

/// Amount left for the destination after paying `fee`.
///
/// `None` when nothing would remain.
pub fn send_amount(total: u64, fee: u64) -> Option<u64> {
    total.checked_sub(fee).filter(|amount| *amount > 0)
}

/// Outputs at least `needed` blocks deep.
pub fn select_eligible(utxos: &[Utxo], tip: u64, needed: u64) -> Vec<Utxo> {
    utxos
        .iter()
        .filter(|u| confirmation_depth(tip, u.height) >= needed)
        .cloned()
        .collect()
}

fn outpoint(utxo: &Utxo) -> Result<OutPoint, SettlementError> {
    let txid: Txid = utxo
        .tx_hash
        .parse()
        .map_err(|e| SettlementError::Chain(ChainError::InvalidResponse {
            method: "blockchain.scripthash.listunspent".to_string(),
            message: format!("bad tx_hash {}: {}", utxo.tx_hash, e),
        }))?;
    Ok(OutPoint::new(txid, utxo.output_index))
}

/// Build the unsigned sweep: every input, one output.
pub fn build_unsigned(
    inputs: &[Utxo],
    amount_sats: u64,
    destination: &ScriptBuf,
) -> Result<Transaction, SettlementError> {
    let input = inputs
        .iter()
        .map(|utxo| {
            Ok(TxIn {
                previous_output: outpoint(utxo)?,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            })
        })
        .collect::<Result<Vec<_>, SettlementError>>()?;

    Ok(Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input,
        output: vec![TxOut {
            value: Amount::from_sat(amount_sats),
            script_pubkey: destination.clone(),
        }],
    })
}

/// Sign every input of `tx` as a P2WPKH spend by `secret_key`.
///
/// `inputs` must be in the same order as `tx.input`.
pub fn sign_p2wpkh_inputs(
    secp: &Secp256k1<All>,
    tx: Transaction,
    inputs: &[Utxo],
    secret_key: &SecretKey,
    public_key: &PublicKey,
) -> Result<Transaction, SettlementError> {
    let script_code = address::p2wpkh_script(&CompressedPublicKey(*public_key));
    let mut cache = SighashCache::new(tx);

    for (index, utxo) in inputs.iter().enumerate() {
        let sighash = cache
            .p2wpkh_signature_hash(
                index,
                &script_code,
                Amount::from_sat(utxo.value_sats),
                EcdsaSighashType::All,
            )
            .map_err(|e| SettlementError::Transaction(format!("sighash input {}: {}", index, e)))?;

        let message = Message::from_digest(sighash.to_byte_array());
        let signature = bitcoin::ecdsa::Signature {
            signature: secp.sign_ecdsa(&message, secret_key),
            sighash_type: EcdsaSighashType::All,
        };

        let witness = cache
            .witness_mut(index)
            .ok_or_else(|| SettlementError::Transaction(format!("missing input {}", index)))?;
        witness.push(signature.to_vec());
        witness.push(public_key.serialize());
    }

    Ok(cache.into_transaction())
}

/// Builds, signs and broadcasts sweep transactions.
///
/// ## Usage
///
/// ```rust,ignore
/// let sweeper = SweepBuilder::new(chain, vault, &config)?;
/// match sweeper.sweep(&payment).await? {
///     SweepOutcome::Broadcast { txid, .. } => info!("swept in {}", txid),
///     _ => {}
/// }
/// ```
#[derive(Clone)]
pub struct SweepBuilder {
    chain: SharedChain,
    vault: KeyVault,
    destination: ScriptBuf,
    network: Network,
    confirmations: u64,

    /// Outpoints already spent by a broadcast sweep, per payment.
    swept: Arc<Mutex<HashMap<Uuid, HashSet<OutPoint>>>>,
}

impl SweepBuilder {
    /// Create a sweep builder paying to `main_address`.
    pub fn new(
        chain: SharedChain,
        vault: KeyVault,
        main_address: &str,
        confirmations: u64,
    ) -> Result<Self, AddressError> {
        let network = vault.network();
        let destination = address::script_pubkey(main_address, network)?;

        Ok(Self {
            chain,
            vault,
            destination,
            network,
            confirmations,
            swept: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Sweep every sufficiently confirmed output of `payment`.
    ///
    /// ## Returns
    ///
    /// * `Ok(SweepOutcome::Broadcast {..})` - Sweep accepted by the indexer
    /// * `Ok(SweepOutcome::Dust {..})` - Fee would eat everything; retried later
    /// * `Ok(SweepOutcome::NothingEligible)` - Nothing deep enough to spend
    /// * `Err(SettlementError::BroadcastRejected)` - Network refused the tx
    /// * `Err(SettlementError::Decryption)` - Stored key failed authentication
    pub async fn sweep(&self, payment: &PaymentRecord) -> Result<SweepOutcome, SettlementError> {
        let source_script = address::script_pubkey(&payment.address, self.network)?;
        let script_hash = address::script_hash(&source_script);

        let utxos = self.chain.list_unspent(&script_hash).await?;
        let tip = self.chain.get_tip_height().await?;

        let eligible = self.unswept(payment.id, &utxos, tip)?;
        if eligible.is_empty() {
            debug!(payment_id = %payment.id, listed = utxos.len(), "No eligible outputs to sweep");
            return Ok(SweepOutcome::NothingEligible);
        }

        let total: u64 = eligible.iter().map(|u| u.value_sats).sum();
        let fee_rate = self.chain.estimate_fee_rate().await?;
        let fee = estimate_fee(eligible.len(), fee_rate);

        let amount = match send_amount(total, fee) {
            Some(amount) => amount,
            None => {
                info!(
                    payment_id = %payment.id,
                    total = %format_ltc(total),
                    fee = %format_ltc(fee),
                    "Sweep skipped: fee exceeds eligible funds"
                );
                return Ok(SweepOutcome::Dust {
                    total_sats: total,
                    fee_sats: fee,
                });
            }
        };

        let unsigned = build_unsigned(&eligible, amount, &self.destination)?;
        let secp = self.vault.secp();
        let signed = self
            .vault
            .with_secret_key(&payment.encrypted_key, |secret_key, public_key| {
                if address::p2wpkh_script(&CompressedPublicKey(*public_key)) != source_script {
                    return Err(SettlementError::Transaction(
                        "stored key does not control the payment address".to_string(),
                    ));
                }
                sign_p2wpkh_inputs(secp, unsigned, &eligible, secret_key, public_key)
            })??;

        let local_txid = signed.compute_txid();
        let raw = serialize_hex(&signed);

        let txid = match self.chain.broadcast(&raw).await {
            Ok(txid) => txid,
            Err(ChainError::Rpc { message, .. }) => {
                warn!(payment_id = %payment.id, %local_txid, %message, "Sweep broadcast rejected");
                self.forget(payment.id);
                return Err(SettlementError::BroadcastRejected(message));
            }
            Err(e) => return Err(e.into()),
        };

        if txid != local_txid.to_string() {
            warn!(payment_id = %payment.id, %txid, %local_txid, "Indexer reported a different txid");
        }

        self.remember(payment.id, &signed);

        info!(
            payment_id = %payment.id,
            %txid,
            inputs = eligible.len(),
            amount = %format_ltc(amount),
            fee = %format_ltc(fee),
            "Sweep broadcast"
        );

        Ok(SweepOutcome::Broadcast {
            txid,
            inputs: eligible.len(),
            amount_sats: amount,
            fee_sats: fee,
        })
    }

    /// Eligible outputs minus those a previous sweep already spent.
    ///
    /// Also prunes remembered outpoints the indexer no longer lists.
    fn unswept(&self, id: Uuid, utxos: &[Utxo], tip: u64) -> Result<Vec<Utxo>, SettlementError> {
        let listed = utxos.iter().map(outpoint).collect::<Result<HashSet<_>, _>>()?;

        let mut swept = self.swept.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(spent) = swept.get_mut(&id) {
            spent.retain(|op| listed.contains(op));
            if spent.is_empty() {
                swept.remove(&id);
            }
        }
        let spent = swept.get(&id);

        let mut eligible = Vec::new();
        for utxo in select_eligible(utxos, tip, self.confirmations) {
            let op = outpoint(&utxo)?;
            if spent.map(|s| s.contains(&op)).unwrap_or(false) {
                continue;
            }
            eligible.push(utxo);
        }
        Ok(eligible)
    }

    fn remember(&self, id: Uuid, tx: &Transaction) {
        let mut swept = self.swept.lock().unwrap_or_else(|p| p.into_inner());
        swept
            .entry(id)
            .or_default()
            .extend(tx.input.iter().map(|input| input.previous_output));
    }

    fn forget(&self, id: Uuid) {
        self.swept
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&id);
    }
}
