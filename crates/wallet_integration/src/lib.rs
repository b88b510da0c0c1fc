//! Wallet gateway integration.
//!
//! Everything the client does on chain goes through the wallet's EIP-1193
//! `request` surface: account discovery, chain switching, transaction
//! submission, reads and receipt polling. The production implementation
//! talks JSON-RPC to a local wallet bridge that fronts the user's browser
//! wallet, following the Moccasin-style bridge pattern.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use alloy_primitives::{Address, Bytes, TxHash};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use shared::{
    domain::ChainId,
    protocol::{ChainDescriptor, ReceiptView, TransactionCall},
};
use thiserror::Error;
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, warn};
use url::Url;

/// EIP-1193 error code for a user-rejected request.
pub const USER_REJECTED_CODE: i64 = 4001;
/// EIP-1193 error code for a chain the wallet has no parameters for.
pub const UNRECOGNIZED_CHAIN_CODE: i64 = 4902;

pub const INSTALL_WALLET_HINT: &str = "no wallet detected; get MetaMask -> https://metamask.io/";

const CHAIN_POLL_INTERVAL: Duration = Duration::from_secs(5);
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const RECEIPT_POLL_ATTEMPTS: usize = 120;
const CHAIN_EVENT_CAPACITY: usize = 16;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("{INSTALL_WALLET_HINT}")]
    Unavailable,
    #[error("wallet rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("invalid wallet response: {0}")]
    InvalidResponse(String),
}

impl WalletError {
    pub fn is_user_rejected(&self) -> bool {
        matches!(self, Self::Rpc { code, .. } if *code == USER_REJECTED_CODE)
    }

    pub fn is_unrecognized_chain(&self) -> bool {
        matches!(self, Self::Rpc { code, .. } if *code == UNRECOGNIZED_CHAIN_CODE)
    }
}

/// The wallet as the application consumes it: one request entry point plus
/// a chain-change subscription. Receiving a chain id on the subscription
/// means the wallet moved networks underneath us.
#[async_trait]
pub trait WalletGateway: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value>;

    fn subscribe_chain_changes(&self) -> broadcast::Receiver<ChainId>;
}

/// Stand-in used when no wallet bridge is reachable. Every call fails with
/// the installation hint; the subscription never fires.
pub struct MissingWalletGateway {
    chain_events: broadcast::Sender<ChainId>,
}

impl Default for MissingWalletGateway {
    fn default() -> Self {
        let (chain_events, _) = broadcast::channel(CHAIN_EVENT_CAPACITY);
        Self { chain_events }
    }
}

#[async_trait]
impl WalletGateway for MissingWalletGateway {
    async fn request(&self, _method: &str, _params: Value) -> Result<Value> {
        Err(WalletError::Unavailable.into())
    }

    fn subscribe_chain_changes(&self) -> broadcast::Receiver<ChainId> {
        self.chain_events.subscribe()
    }
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

async fn rpc_call(
    http: &reqwest::Client,
    endpoint: &Url,
    id: u64,
    method: &str,
    params: Value,
) -> Result<Value> {
    let response: RpcResponse = http
        .post(endpoint.clone())
        .json(&RpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        })
        .send()
        .await
        .with_context(|| format!("wallet bridge unreachable at {endpoint}"))?
        .error_for_status()?
        .json()
        .await
        .with_context(|| format!("malformed wallet bridge reply to {method}"))?;

    if let Some(error) = response.error {
        return Err(WalletError::Rpc {
            code: error.code,
            message: error.message,
        }
        .into());
    }

    Ok(response.result.unwrap_or(Value::Null))
}

/// JSON-RPC gateway to a local wallet bridge. Owns a background task that
/// watches `eth_chainId` and broadcasts whenever the wallet's active chain
/// moves; the task is torn down with the gateway.
pub struct HttpWalletGateway {
    http: reqwest::Client,
    endpoint: Url,
    next_id: Arc<AtomicU64>,
    chain_events: broadcast::Sender<ChainId>,
    chain_task: Option<JoinHandle<()>>,
}

impl HttpWalletGateway {
    /// Must be called from within a tokio runtime: the chain watcher is
    /// spawned here.
    pub fn connect(endpoint: &str) -> Result<Self> {
        let endpoint: Url = endpoint
            .parse()
            .with_context(|| format!("invalid wallet bridge url '{endpoint}'"))?;
        let http = reqwest::Client::new();
        let next_id = Arc::new(AtomicU64::new(1));
        let (chain_events, _) = broadcast::channel(CHAIN_EVENT_CAPACITY);

        let chain_task = tokio::spawn(watch_chain(
            http.clone(),
            endpoint.clone(),
            Arc::clone(&next_id),
            chain_events.clone(),
        ));

        Ok(Self {
            http,
            endpoint,
            next_id,
            chain_events,
            chain_task: Some(chain_task),
        })
    }
}

impl Drop for HttpWalletGateway {
    fn drop(&mut self) {
        if let Some(task) = self.chain_task.take() {
            task.abort();
        }
    }
}

#[async_trait]
impl WalletGateway for HttpWalletGateway {
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        rpc_call(&self.http, &self.endpoint, id, method, params).await
    }

    fn subscribe_chain_changes(&self) -> broadcast::Receiver<ChainId> {
        self.chain_events.subscribe()
    }
}

async fn watch_chain(
    http: reqwest::Client,
    endpoint: Url,
    next_id: Arc<AtomicU64>,
    chain_events: broadcast::Sender<ChainId>,
) {
    let mut last_seen: Option<ChainId> = None;
    loop {
        tokio::time::sleep(CHAIN_POLL_INTERVAL).await;
        let id = next_id.fetch_add(1, Ordering::Relaxed);
        let raw = match rpc_call(&http, &endpoint, id, "eth_chainId", json!([])).await {
            Ok(raw) => raw,
            Err(err) => {
                debug!("chain watch poll failed: {err:#}");
                continue;
            }
        };
        let chain = match raw.as_str().and_then(|s| s.parse::<ChainId>().ok()) {
            Some(chain) => chain,
            None => {
                warn!("chain watch received non-hex chain id: {raw}");
                continue;
            }
        };
        if last_seen.is_some() && last_seen != Some(chain) {
            let _ = chain_events.send(chain);
        }
        last_seen = Some(chain);
    }
}

fn decode<T: DeserializeOwned>(value: Value, what: &str) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|err| WalletError::InvalidResponse(format!("{what}: {err}")).into())
}

/// Typed view over a [`WalletGateway`]. Cheap to clone; all helpers funnel
/// into the gateway's single `request` entry point.
#[derive(Clone)]
pub struct Wallet {
    gateway: Arc<dyn WalletGateway>,
}

impl Wallet {
    pub fn new(gateway: Arc<dyn WalletGateway>) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> Arc<dyn WalletGateway> {
        Arc::clone(&self.gateway)
    }

    pub fn subscribe_chain_changes(&self) -> broadcast::Receiver<ChainId> {
        self.gateway.subscribe_chain_changes()
    }

    /// Prompting account discovery (`eth_requestAccounts`).
    pub async fn request_accounts(&self) -> Result<Vec<Address>> {
        let raw = self.gateway.request("eth_requestAccounts", json!([])).await?;
        decode(raw, "eth_requestAccounts")
    }

    /// Non-prompting discovery of already-authorized accounts.
    pub async fn accounts(&self) -> Result<Vec<Address>> {
        let raw = self.gateway.request("eth_accounts", json!([])).await?;
        decode(raw, "eth_accounts")
    }

    pub async fn chain_id(&self) -> Result<ChainId> {
        let raw = self.gateway.request("eth_chainId", json!([])).await?;
        raw.as_str()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| WalletError::InvalidResponse(format!("eth_chainId: {raw}")).into())
    }

    pub async fn switch_chain(&self, chain: ChainId) -> Result<()> {
        self.gateway
            .request(
                "wallet_switchEthereumChain",
                json!([{ "chainId": chain.as_hex() }]),
            )
            .await?;
        Ok(())
    }

    pub async fn add_chain(&self, descriptor: &ChainDescriptor) -> Result<()> {
        self.gateway
            .request("wallet_addEthereumChain", json!([descriptor]))
            .await?;
        Ok(())
    }

    pub async fn send_transaction(&self, call: &TransactionCall) -> Result<TxHash> {
        let raw = self.gateway.request("eth_sendTransaction", json!([call])).await?;
        decode(raw, "eth_sendTransaction")
    }

    pub async fn call(&self, call: &TransactionCall) -> Result<Bytes> {
        let raw = self
            .gateway
            .request("eth_call", json!([call, "latest"]))
            .await?;
        decode(raw, "eth_call")
    }

    pub async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<ReceiptView>> {
        let raw = self
            .gateway
            .request("eth_getTransactionReceipt", json!([hash]))
            .await?;
        if raw.is_null() {
            return Ok(None);
        }
        decode(raw, "eth_getTransactionReceipt").map(Some)
    }

    /// Wait for a submitted transaction to be mined. Polls at a fixed
    /// interval; timeout handling beyond the bounded attempts is left to
    /// the wallet and node defaults.
    pub async fn await_receipt(&self, hash: TxHash) -> Result<ReceiptView> {
        for _ in 0..RECEIPT_POLL_ATTEMPTS {
            if let Some(receipt) = self.transaction_receipt(hash).await? {
                return Ok(receipt);
            }
            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }
        Err(anyhow!("transaction {hash} not mined after {RECEIPT_POLL_ATTEMPTS} polls"))
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
