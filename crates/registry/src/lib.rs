//! Typed proxy over the deployed name-registry contract.
//!
//! The contract owns all business logic (pricing enforcement, uniqueness,
//! ownership); this crate only encodes the four operations the client
//! consumes and routes them through the wallet gateway, so every mutating
//! call is signed by the user's wallet.

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::{sol, SolCall};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use shared::{domain::TxOutcome, protocol::TransactionCall};
use tracing::info;
use wallet_integration::Wallet;

sol! {
    function register(string name) external payable;
    function setRecord(string name, string record) external;
    function getAllNames() external view returns (string[] memory);
    function records(string name) external view returns (string memory);
    function domains(string name) external view returns (address);
}

/// The registry operations this client consumes. Mutating calls resolve to
/// a [`TxOutcome`] only once the transaction has reached finality.
#[async_trait]
pub trait NameRegistry: Send + Sync {
    async fn register(&self, name: &str, value: U256) -> Result<TxOutcome>;
    async fn set_record(&self, name: &str, record: &str) -> Result<TxOutcome>;
    async fn all_names(&self) -> Result<Vec<String>>;
    async fn record_of(&self, name: &str) -> Result<String>;
    async fn owner_of(&self, name: &str) -> Result<Address>;
}

/// Fallback used before a registry is wired up; every call fails.
pub struct MissingNameRegistry;

#[async_trait]
impl NameRegistry for MissingNameRegistry {
    async fn register(&self, name: &str, _value: U256) -> Result<TxOutcome> {
        Err(anyhow!("name registry unavailable; cannot register '{name}'"))
    }

    async fn set_record(&self, name: &str, _record: &str) -> Result<TxOutcome> {
        Err(anyhow!("name registry unavailable; cannot set record for '{name}'"))
    }

    async fn all_names(&self) -> Result<Vec<String>> {
        Err(anyhow!("name registry unavailable"))
    }

    async fn record_of(&self, name: &str) -> Result<String> {
        Err(anyhow!("name registry unavailable; cannot read record of '{name}'"))
    }

    async fn owner_of(&self, name: &str) -> Result<Address> {
        Err(anyhow!("name registry unavailable; cannot read owner of '{name}'"))
    }
}

/// Registry proxy bound to a deployed contract. Reads go through `eth_call`;
/// writes are submitted with `eth_sendTransaction` from the bound sender and
/// awaited to finality.
pub struct WalletRegistry {
    wallet: Wallet,
    contract: Address,
    sender: Option<Address>,
}

impl WalletRegistry {
    pub fn new(wallet: Wallet, contract: Address, sender: Address) -> Self {
        Self {
            wallet,
            contract,
            sender: Some(sender),
        }
    }

    /// A registry that can only serve reads.
    pub fn read_only(wallet: Wallet, contract: Address) -> Self {
        Self {
            wallet,
            contract,
            sender: None,
        }
    }

    async fn send(&self, data: Vec<u8>, value: Option<U256>) -> Result<TxOutcome> {
        let sender = self
            .sender
            .ok_or_else(|| anyhow!("no connected account bound; connect a wallet first"))?;
        let mut call = TransactionCall::new(self.contract, data).with_from(sender);
        if let Some(value) = value {
            call = call.with_value(value);
        }

        let hash = self.wallet.send_transaction(&call).await?;
        info!(%hash, "transaction submitted; waiting for finality");
        let receipt = self.wallet.await_receipt(hash).await?;
        Ok(TxOutcome {
            hash,
            status: receipt.tx_status(),
        })
    }

    async fn read(&self, data: Vec<u8>) -> Result<Bytes> {
        let mut call = TransactionCall::new(self.contract, data);
        if let Some(sender) = self.sender {
            call = call.with_from(sender);
        }
        self.wallet.call(&call).await
    }
}

#[async_trait]
impl NameRegistry for WalletRegistry {
    async fn register(&self, name: &str, value: U256) -> Result<TxOutcome> {
        let data = registerCall {
            name: name.to_string(),
        }
        .abi_encode();
        self.send(data, Some(value))
            .await
            .with_context(|| format!("register('{name}') failed"))
    }

    async fn set_record(&self, name: &str, record: &str) -> Result<TxOutcome> {
        let data = setRecordCall {
            name: name.to_string(),
            record: record.to_string(),
        }
        .abi_encode();
        self.send(data, None)
            .await
            .with_context(|| format!("setRecord('{name}') failed"))
    }

    async fn all_names(&self) -> Result<Vec<String>> {
        let raw = self.read(getAllNamesCall {}.abi_encode()).await?;
        let decoded = getAllNamesCall::abi_decode_returns(&raw, true)
            .context("getAllNames returned undecodable data")?;
        Ok(decoded._0)
    }

    async fn record_of(&self, name: &str) -> Result<String> {
        let raw = self
            .read(
                recordsCall {
                    name: name.to_string(),
                }
                .abi_encode(),
            )
            .await?;
        let decoded = recordsCall::abi_decode_returns(&raw, true)
            .with_context(|| format!("records('{name}') returned undecodable data"))?;
        Ok(decoded._0)
    }

    async fn owner_of(&self, name: &str) -> Result<Address> {
        let raw = self
            .read(
                domainsCall {
                    name: name.to_string(),
                }
                .abi_encode(),
            )
            .await?;
        let decoded = domainsCall::abi_decode_returns(&raw, true)
            .with_context(|| format!("domains('{name}') returned undecodable data"))?;
        Ok(decoded._0)
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
