use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse failure taxonomy surfaced to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Validation,
    WalletUnavailable,
    TxFailed,
    Gateway,
}

/// A user-visible notification. The message is ready for display; `code`
/// lets a front end pick severity or iconography.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct Notice {
    pub code: ErrorCode,
    pub message: String,
}

impl Notice {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Validation, message)
    }

    pub fn tx_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TxFailed, message)
    }

    pub fn wallet_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::WalletUnavailable, message)
    }
}
