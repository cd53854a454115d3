//! # Electrum Client
//!
//! [`ChainApi`] over a single Electrum server connection.
//!
//! ## Connection Handling
//!
//! ```text
//! call(method)
//!     │
//!     ├── attempt 1 ──▶ connect if needed ──▶ raw_call ──▶ Ok
//!     │                                          │
//!     │                         connection error: drop connection
//!     │                                          │
//!     ├── sleep 500ms ─▶ attempt 2 (fresh connect) ...
//!     │
//!     └── attempt 3 failed ──▶ ChainError::Unavailable
//! ```
//!
//! A JSON-RPC error from the server is an answer, not a broken connection,
//! so it is returned straight away as [`ChainError::Rpc`].
//!
//! The underlying `electrum-client` is blocking; every call runs on the
//! tokio blocking pool.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use electrum_client::{Client, ConfigBuilder, ElectrumApi, Param};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, trace, warn};

use super::{Balance, ChainApi, ChainError, HistoryEntry, Utxo};
use crate::config::AppConfig;

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_STEP_MS: u64 = 500;
const CLIENT_NAME: &str = "ltc-settlement/0.1";
const PROTOCOL_VERSION: &str = "1.4";
const HEADERS_SUBSCRIBE: &str = "blockchain.headers.subscribe";

/// Why a single attempt failed.
enum CallFailure {
    /// Transport broke; reconnect and retry.
    Connection(String),
    /// Server returned a JSON-RPC error; do not retry.
    Server(String),
}

#[derive(Deserialize)]
struct HeaderNotification {
    height: u64,
}

/// Convert an `estimatefee` answer (coin per kB) into sat/vB.
///
/// Servers answer `-1` when they have no estimate; that and any other
/// non-positive value fall back to 1 sat/vB.
pub fn fee_rate_from_estimate(coin_per_kb: f64) -> u64 {
    if !coin_per_kb.is_finite() || coin_per_kb <= 0.0 {
        return 1;
    }
    ((coin_per_kb * 1e8) / 1000.0).ceil().max(1.0) as u64
}

struct Connection {
    url: String,
    timeout_secs: u8,
    validate_domain: bool,
    client: Mutex<Option<Client>>,
}

impl Connection {
    fn connect(&self) -> Result<Client, CallFailure> {
        debug!(url = %self.url, "Connecting to Electrum server");

        let config = ConfigBuilder::new()
            .timeout(Some(self.timeout_secs))
            .retry(0)
            .validate_domain(self.validate_domain)
            .build();

        let client = Client::from_config(&self.url, config)
            .map_err(|e| CallFailure::Connection(format!("dial {}: {}", self.url, e)))?;

        client
            .raw_call(
                "server.version",
                vec![
                    Param::String(CLIENT_NAME.to_string()),
                    Param::String(PROTOCOL_VERSION.to_string()),
                ],
            )
            .map_err(|e| CallFailure::Connection(format!("handshake {}: {}", self.url, e)))?;

        info!(url = %self.url, "Electrum connection ready");
        Ok(client)
    }

    /// One attempt: reuse or open the connection, then issue the call.
    fn call_once(&self, method: &str, params: Vec<Param>) -> Result<Value, CallFailure> {
        let mut guard = self.client.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if guard.is_none() {
            *guard = Some(self.connect()?);
        }

        let result = match guard.as_ref() {
            Some(client) => client.raw_call(method, params),
            None => return Err(CallFailure::Connection("no connection".to_string())),
        };

        match result {
            Ok(value) => {
                if method == HEADERS_SUBSCRIBE {
                    if let Some(client) = guard.as_ref() {
                        drain_header_notifications(client);
                    }
                }
                Ok(value)
            }
            Err(electrum_client::Error::Protocol(value)) => Err(CallFailure::Server(value.to_string())),
            Err(e) => {
                // Drop the broken connection so the next attempt redials
                *guard = None;
                Err(CallFailure::Connection(e.to_string()))
            }
        }
    }
}

/// Discard queued header notifications.
///
/// Subscribing to headers makes the server push every new block on this
/// connection; the client queues them until popped. The tip is read from
/// the subscribe answer itself, so the queue is emptied after each call.
fn drain_header_notifications(client: &Client) {
    let mut dropped = 0usize;
    while let Ok(Some(_)) = client.block_headers_pop_raw() {
        dropped += 1;
    }
    if dropped > 0 {
        trace!(dropped, "Dropped queued header notifications");
    }
}

/// Electrum-backed chain client.
///
/// Cheap to clone; clones share one connection.
///
/// ## Usage
///
/// ```rust,ignore
/// let chain = ElectrumChain::new(&config);
/// let tip = chain.get_tip_height().await?;
/// ```
#[derive(Clone)]
pub struct ElectrumChain {
    connection: Arc<Connection>,
    fee_target_blocks: usize,
}

impl ElectrumChain {
    /// Create a client from configuration. No connection is opened until
    /// the first call.
    pub fn new(config: &AppConfig) -> Self {
        let scheme = if config.electrum_tls { "ssl" } else { "tcp" };
        let url = format!("{}://{}:{}", scheme, config.electrum_host, config.electrum_port);

        info!("Electrum client configured:");
        info!("  Server: {}", url);
        info!("  Fee target: {} blocks", config.fee_target_blocks);

        Self {
            connection: Arc::new(Connection {
                url,
                timeout_secs: config.electrum_timeout_secs,
                validate_domain: config.electrum_validate_domain,
                client: Mutex::new(None),
            }),
            fee_target_blocks: config.fee_target_blocks,
        }
    }

    /// Issue a call with reconnect-and-retry.
    async fn call(&self, method: &'static str, params: Vec<Param>) -> Result<Value, ChainError> {
        let mut last_error = String::new();

        for attempt in 1..=MAX_ATTEMPTS {
            trace!(method, attempt, "Electrum call");

            let connection = self.connection.clone();
            let attempt_params = params.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                connection.call_once(method, attempt_params)
            })
            .await
            .unwrap_or_else(|e| Err(CallFailure::Connection(format!("blocking task failed: {}", e))));

            match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        info!(method, attempt, "Electrum call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(CallFailure::Server(message)) => {
                    debug!(method, %message, "Electrum server returned an error");
                    return Err(ChainError::Rpc {
                        method: method.to_string(),
                        message,
                    });
                }
                Err(CallFailure::Connection(e)) => {
                    warn!(method, attempt, error = %e, "Electrum call failed");
                    last_error = e;
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(Duration::from_millis(BACKOFF_STEP_MS * attempt as u64)).await;
                    }
                }
            }
        }

        Err(ChainError::Unavailable {
            method: method.to_string(),
            attempts: MAX_ATTEMPTS,
            last_error,
        })
    }

    async fn call_typed<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: Vec<Param>,
    ) -> Result<T, ChainError> {
        let value = self.call(method, params).await?;
        decode(method, value)
    }
}

fn decode<T: DeserializeOwned>(method: &str, value: Value) -> Result<T, ChainError> {
    serde_json::from_value(value).map_err(|e| ChainError::InvalidResponse {
        method: method.to_string(),
        message: e.to_string(),
    })
}

#[async_trait]
impl ChainApi for ElectrumChain {
    async fn get_balance(&self, script_hash: &str) -> Result<Balance, ChainError> {
        self.call_typed(
            "blockchain.scripthash.get_balance",
            vec![Param::String(script_hash.to_string())],
        )
        .await
    }

    async fn get_history(&self, script_hash: &str) -> Result<Vec<HistoryEntry>, ChainError> {
        self.call_typed(
            "blockchain.scripthash.get_history",
            vec![Param::String(script_hash.to_string())],
        )
        .await
    }

    async fn list_unspent(&self, script_hash: &str) -> Result<Vec<Utxo>, ChainError> {
        self.call_typed(
            "blockchain.scripthash.listunspent",
            vec![Param::String(script_hash.to_string())],
        )
        .await
    }

    async fn get_tip_height(&self) -> Result<u64, ChainError> {
        let header: HeaderNotification = self
            .call_typed(HEADERS_SUBSCRIBE, vec![])
            .await?;
        Ok(header.height)
    }

    async fn estimate_fee_rate(&self) -> Result<u64, ChainError> {
        let estimate = self
            .call(
                "blockchain.estimatefee",
                vec![Param::Usize(self.fee_target_blocks)],
            )
            .await?;

        let rate = fee_rate_from_estimate(estimate.as_f64().unwrap_or(-1.0));
        debug!(estimate = %estimate, sat_per_vb = rate, "Fee estimate");
        Ok(rate)
    }

    async fn broadcast(&self, raw_tx_hex: &str) -> Result<String, ChainError> {
        self.call_typed(
            "blockchain.transaction.broadcast",
            vec![Param::String(raw_tx_hex.to_string())],
        )
        .await
    }

    async fn ping(&self) -> Result<(), ChainError> {
        self.call("server.ping", vec![]).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn chain_at(url: String) -> ElectrumChain {
        ElectrumChain {
            connection: Arc::new(Connection {
                url,
                timeout_secs: 2,
                validate_domain: false,
                client: Mutex::new(None),
            }),
            fee_target_blocks: 6,
        }
    }

    /// Line-delimited JSON-RPC server on loopback.
    ///
    /// Each entry of `limits` is one accepted connection: `Some(n)` hangs
    /// up after answering `n` requests, `None` keeps answering. A header
    /// subscription is preceded by a pushed notification for block 999.
    fn spawn_server(limits: Vec<Option<usize>>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("tcp://{}", listener.local_addr().unwrap());
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();

        std::thread::spawn(move || {
            for limit in limits {
                let Ok((stream, _)) = listener.accept() else { return };
                counter.fetch_add(1, Ordering::SeqCst);
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut writer = stream;
                let mut answered = 0;
                let mut line = String::new();

                while limit.map_or(true, |n| answered < n) {
                    line.clear();
                    if reader.read_line(&mut line).unwrap_or(0) == 0 {
                        break;
                    }
                    let request: Value = serde_json::from_str(&line).unwrap();
                    let result = match request["method"].as_str() {
                        Some(HEADERS_SUBSCRIBE) => {
                            let push = json!({
                                "jsonrpc": "2.0",
                                "method": HEADERS_SUBSCRIBE,
                                "params": [{"height": 999, "hex": "00"}]
                            });
                            writeln!(writer, "{}", push).unwrap();
                            json!({"height": 1000, "hex": "00"})
                        }
                        _ => json!(["stub", PROTOCOL_VERSION]),
                    };
                    let response = json!({"jsonrpc": "2.0", "id": request["id"], "result": result});
                    writeln!(writer, "{}", response).unwrap();
                    writer.flush().unwrap();
                    answered += 1;
                }
            }
        });

        (url, accepted)
    }

    fn queued_headers(chain: &ElectrumChain) -> usize {
        let guard = chain.connection.client.lock().unwrap();
        let client = guard.as_ref().expect("connected");
        let mut count = 0;
        while client.block_headers_pop_raw().unwrap().is_some() {
            count += 1;
        }
        count
    }

    #[test]
    fn test_fee_rate_from_estimate() {
        // 0.0001 LTC/kB = 10 sat/vB
        assert_eq!(fee_rate_from_estimate(0.0001), 10);
        assert_eq!(fee_rate_from_estimate(0.000012), 2);
        assert_eq!(fee_rate_from_estimate(0.000001), 1);
        assert_eq!(fee_rate_from_estimate(-1.0), 1);
        assert_eq!(fee_rate_from_estimate(0.0), 1);
        assert_eq!(fee_rate_from_estimate(f64::NAN), 1);
    }

    #[test]
    fn test_decode_reports_method() {
        let err = decode::<HeaderNotification>("blockchain.headers.subscribe", json!("oops"))
            .err()
            .unwrap();
        match err {
            ChainError::InvalidResponse { method, .. } => {
                assert_eq!(method, "blockchain.headers.subscribe")
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let header: HeaderNotification =
            decode("blockchain.headers.subscribe", json!({"height": 1000, "hex": "00"})).unwrap();
        assert_eq!(header.height, 1000);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable_after_retries() {
        let chain = ElectrumChain {
            connection: Arc::new(Connection {
                // Port 1 on localhost refuses immediately
                url: "tcp://127.0.0.1:1".to_string(),
                timeout_secs: 1,
                validate_domain: false,
                client: Mutex::new(None),
            }),
            fee_target_blocks: 6,
        };

        match chain.get_tip_height().await {
            Err(ChainError::Unavailable { attempts, method, .. }) => {
                assert_eq!(attempts, MAX_ATTEMPTS);
                assert_eq!(method, "blockchain.headers.subscribe");
            }
            other => panic!("expected Unavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dropped_connection_reconnects_and_succeeds() {
        // First connection answers the handshake, then hangs up
        let (url, accepted) = spawn_server(vec![Some(1), None]);
        let chain = chain_at(url);

        assert_eq!(chain.get_tip_height().await.unwrap(), 1000);
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_tip_query_leaves_no_queued_headers() {
        let (url, accepted) = spawn_server(vec![None]);
        let chain = chain_at(url);

        for _ in 0..3 {
            assert_eq!(chain.get_tip_height().await.unwrap(), 1000);
        }
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        assert_eq!(queued_headers(&chain), 0);
    }
}
