/*
 * Shared data models and error types for the trading service
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse lifecycle of a submitted transaction as surfaced to the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxState {
    New,
    Sending,
    Sent,
    Failed,
    Rejected,
}

impl std::fmt::Display for TxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TxState::New => "New",
            TxState::Sending => "Sending",
            TxState::Sent => "Sent",
            TxState::Failed => "Failed",
            TxState::Rejected => "Rejected",
        };
        write!(f, "{s}")
    }
}

/// Latest formatted balances for the active wallet, refreshed on new blocks.
/// Last write wins when blocks arrive in quick succession.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub address: String,
    pub native: String,
    pub token_in_symbol: String,
    pub token_in: String,
    pub token_out_symbol: String,
    pub token_out: String,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum ProteusError {
    #[error("RPC error: {0}")]
    RpcError(String),

    #[error("Contract interaction error: {0}")]
    ContractError(String),

    #[error("Calculation error: {0}")]
    CalculationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Wallet error: {0}")]
    WalletError(String),

    #[error("no provider available for the configured environment")]
    NoProvider,

    #[error("no wallet address available")]
    NoWallet,

    #[error("transaction receipt not observed within {0} seconds")]
    ReceiptTimeout(u64),

    #[error("operation already in flight: {0}")]
    Busy(&'static str),
}

pub type Result<T> = std::result::Result<T, ProteusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_state_serializes_as_bare_string() {
        assert_eq!(serde_json::to_string(&TxState::Sent).unwrap(), "\"Sent\"");
        assert_eq!(
            serde_json::to_string(&TxState::Rejected).unwrap(),
            "\"Rejected\""
        );
    }

    #[test]
    fn tx_state_display_matches_serialized_form() {
        for state in [
            TxState::New,
            TxState::Sending,
            TxState::Sent,
            TxState::Failed,
            TxState::Rejected,
        ] {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{state}\""));
        }
    }
}
