//! Scripted [`ChainApi`] used by service tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{Balance, ChainApi, ChainError, HistoryEntry, Utxo};

#[derive(Default)]
struct State {
    tip: u64,
    fee_rate: u64,
    balances: HashMap<String, Balance>,
    history: HashMap<String, Vec<HistoryEntry>>,
    utxos: HashMap<String, Vec<Utxo>>,
    broadcasts: Vec<String>,
    reject_broadcast: Option<String>,
    unavailable: bool,
}

#[derive(Default)]
pub struct FakeChain {
    state: Mutex<State>,
}

fn unavailable(method: &str) -> ChainError {
    ChainError::Unavailable {
        method: method.to_string(),
        attempts: 3,
        last_error: "connection refused".to_string(),
    }
}

impl FakeChain {
    pub fn new(tip: u64) -> Self {
        let chain = Self::default();
        {
            let mut state = chain.state.lock().unwrap();
            state.tip = tip;
            state.fee_rate = 1;
        }
        chain
    }

    pub fn set_tip(&self, tip: u64) {
        self.state.lock().unwrap().tip = tip;
    }

    pub fn set_fee_rate(&self, rate: u64) {
        self.state.lock().unwrap().fee_rate = rate;
    }

    pub fn set_balance(&self, script_hash: &str, confirmed: u64, unconfirmed: i64) {
        self.state.lock().unwrap().balances.insert(
            script_hash.to_string(),
            Balance {
                confirmed_sats: confirmed,
                unconfirmed_sats: unconfirmed,
            },
        );
    }

    /// Add an output and the matching history entry.
    pub fn add_utxo(&self, script_hash: &str, tx_hash: &str, output_index: u32, value: u64, height: i64) {
        let mut state = self.state.lock().unwrap();
        state
            .utxos
            .entry(script_hash.to_string())
            .or_default()
            .push(Utxo {
                tx_hash: tx_hash.to_string(),
                output_index,
                value_sats: value,
                height,
            });
        state
            .history
            .entry(script_hash.to_string())
            .or_default()
            .push(HistoryEntry {
                tx_hash: tx_hash.to_string(),
                height,
            });
    }

    pub fn clear_utxos(&self, script_hash: &str) {
        self.state.lock().unwrap().utxos.remove(script_hash);
    }

    pub fn reject_broadcasts(&self, message: Option<&str>) {
        self.state.lock().unwrap().reject_broadcast = message.map(str::to_string);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().unavailable = unavailable;
    }

    pub fn broadcasts(&self) -> Vec<String> {
        self.state.lock().unwrap().broadcasts.clone()
    }
}

#[async_trait]
impl ChainApi for FakeChain {
    async fn get_balance(&self, script_hash: &str) -> Result<Balance, ChainError> {
        let state = self.state.lock().unwrap();
        if state.unavailable {
            return Err(unavailable("blockchain.scripthash.get_balance"));
        }
        Ok(state.balances.get(script_hash).copied().unwrap_or_default())
    }

    async fn get_history(&self, script_hash: &str) -> Result<Vec<HistoryEntry>, ChainError> {
        let state = self.state.lock().unwrap();
        if state.unavailable {
            return Err(unavailable("blockchain.scripthash.get_history"));
        }
        Ok(state.history.get(script_hash).cloned().unwrap_or_default())
    }

    async fn list_unspent(&self, script_hash: &str) -> Result<Vec<Utxo>, ChainError> {
        let state = self.state.lock().unwrap();
        if state.unavailable {
            return Err(unavailable("blockchain.scripthash.listunspent"));
        }
        Ok(state.utxos.get(script_hash).cloned().unwrap_or_default())
    }

    async fn get_tip_height(&self) -> Result<u64, ChainError> {
        let state = self.state.lock().unwrap();
        if state.unavailable {
            return Err(unavailable("blockchain.headers.subscribe"));
        }
        Ok(state.tip)
    }

    async fn estimate_fee_rate(&self) -> Result<u64, ChainError> {
        let state = self.state.lock().unwrap();
        if state.unavailable {
            return Err(unavailable("blockchain.estimatefee"));
        }
        Ok(state.fee_rate)
    }

    async fn broadcast(&self, raw_tx_hex: &str) -> Result<String, ChainError> {
        let mut state = self.state.lock().unwrap();
        if state.unavailable {
            return Err(unavailable("blockchain.transaction.broadcast"));
        }
        if let Some(message) = &state.reject_broadcast {
            return Err(ChainError::Rpc {
                method: "blockchain.transaction.broadcast".to_string(),
                message: message.clone(),
            });
        }
        state.broadcasts.push(raw_tx_hex.to_string());
        Ok(format!("{:064x}", state.broadcasts.len()))
    }

    async fn ping(&self) -> Result<(), ChainError> {
        if self.state.lock().unwrap().unavailable {
            return Err(unavailable("server.ping"));
        }
        Ok(())
    }
}
