use std::fmt;
use std::str::FromStr;

use alloy_primitives::{Address, TxHash};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// EVM chain id. Serialized as a `0x`-prefixed hex quantity, which is the
/// form every wallet RPC method exchanges it in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChainId(pub u64);

impl ChainId {
    pub fn as_hex(&self) -> String {
        format!("0x{:x}", self.0)
    }
}

impl FromStr for ChainId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        u64::from_str_radix(digits, 16).map(ChainId)
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_hex())
    }
}

impl Serialize for ChainId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_hex())
    }
}

impl<'de> Deserialize<'de> for ChainId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// One minted name as projected for display. `id` is the index of the name
/// within the fetch that produced it; it is not stable across fetches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mint {
    pub id: u64,
    pub name: String,
    pub record: String,
    pub owner: Address,
}

/// Connection state as the network guard sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkState {
    Disconnected,
    WrongNetwork { actual: ChainId },
    Ready { account: Address, chain: ChainId },
}

/// Outcome of an awaited transaction receipt. Receipt status 1 means the
/// transaction executed successfully; anything else is a revert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Succeeded,
    Reverted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxOutcome {
    pub hash: TxHash,
    pub status: TxStatus,
}

impl TxOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == TxStatus::Succeeded
    }
}
