use alloy_primitives::{Address, Bytes, TxHash, U256, U64};
use serde::{Deserialize, Serialize};

use crate::domain::{ChainId, TxStatus};

/// Native-currency descriptor inside a `wallet_addEthereumChain` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Chain parameters in the exact shape `wallet_addEthereumChain` expects,
/// also reused as the client's expected-network profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainDescriptor {
    pub chain_id: ChainId,
    pub chain_name: String,
    pub rpc_urls: Vec<String>,
    pub native_currency: NativeCurrency,
    pub block_explorer_urls: Vec<String>,
}

impl ChainDescriptor {
    /// The Polygon Mumbai test network the registry contract is deployed on.
    pub fn polygon_mumbai() -> Self {
        Self {
            chain_id: ChainId(0x13881),
            chain_name: "Polygon Mumbai Testnet".to_string(),
            rpc_urls: vec!["https://rpc-mumbai.maticvigil.com".to_string()],
            native_currency: NativeCurrency {
                name: "Mumbai Matic".to_string(),
                symbol: "MATIC".to_string(),
                decimals: 18,
            },
            block_explorer_urls: vec!["https://mumbai.polygonscan.com/".to_string()],
        }
    }
}

/// Call object for `eth_sendTransaction` and `eth_call`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    pub to: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
    pub data: Bytes,
}

impl TransactionCall {
    pub fn new(to: Address, data: impl Into<Bytes>) -> Self {
        Self {
            from: None,
            to,
            value: None,
            data: data.into(),
        }
    }

    pub fn with_from(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = Some(value);
        self
    }
}

/// The slice of a transaction receipt this client actually reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptView {
    pub transaction_hash: TxHash,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<U64>,
}

impl ReceiptView {
    pub fn tx_status(&self) -> TxStatus {
        if self.status == Some(U64::from(1)) {
            TxStatus::Succeeded
        } else {
            TxStatus::Reverted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mumbai_descriptor_serializes_in_wallet_shape() {
        let value = serde_json::to_value(ChainDescriptor::polygon_mumbai()).expect("serialize");
        assert_eq!(value["chainId"], "0x13881");
        assert_eq!(value["chainName"], "Polygon Mumbai Testnet");
        assert_eq!(value["nativeCurrency"]["symbol"], "MATIC");
        assert_eq!(value["nativeCurrency"]["decimals"], 18);
        assert_eq!(value["rpcUrls"][0], "https://rpc-mumbai.maticvigil.com");
        assert_eq!(
            value["blockExplorerUrls"][0],
            "https://mumbai.polygonscan.com/"
        );
    }

    #[test]
    fn transaction_call_omits_unset_fields() {
        let call = TransactionCall::new(Address::ZERO, vec![0xab, 0xcd]);
        let value = serde_json::to_value(&call).expect("serialize");
        assert!(value.get("from").is_none());
        assert!(value.get("value").is_none());
        assert_eq!(value["data"], "0xabcd");
    }

    #[test]
    fn receipt_status_one_is_success() {
        let receipt: ReceiptView = serde_json::from_value(serde_json::json!({
            "transactionHash": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "status": "0x1",
        }))
        .expect("deserialize");
        assert_eq!(receipt.tx_status(), TxStatus::Succeeded);

        let reverted: ReceiptView = serde_json::from_value(serde_json::json!({
            "transactionHash": "0x2222222222222222222222222222222222222222222222222222222222222222",
            "status": "0x0",
        }))
        .expect("deserialize");
        assert_eq!(reverted.tx_status(), TxStatus::Reverted);
    }
}
