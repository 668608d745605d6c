/*
 * Configuration management for the trading service
 */

use crate::models::{ProteusError, Result};
use ethers::types::Address;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

/// Which connection the service trades through. `WalletExtension` points at
/// an external signer endpoint that manages its own accounts; the other two
/// sign locally with the configured key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Local,
    Mainnet,
    WalletExtension,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub env: Environment,
    pub server: ServerConfig,
    pub rpc: RpcConfig,
    pub wallet: WalletConfig,
    pub pair: PairConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RpcConfig {
    pub local: String,
    pub mainnet: String,
    pub extension: Option<String>,
    pub chain_id: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WalletConfig {
    pub address: String,
    pub private_key: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenInfo {
    pub address: Address,
    pub decimals: u8,
    pub symbol: String,
}

/// The token pair and amount parameters every orchestrator works against.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PairConfig {
    pub token_in: TokenInfo,
    pub token_out: TokenInfo,
    pub amount_in: Decimal,
    pub amount_out: Decimal,
    pub pool_fee: u32,
    pub fraction_to_remove: Decimal,
    pub fraction_to_add: Decimal,
    pub amount_in_to_collect: Decimal,
    pub amount_out_to_collect: Decimal,
}

pub const USDC_ADDRESS: &str = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48";
pub const DAI_ADDRESS: &str = "0x6B175474E89094C44Da98b954EedeAC495271d0F";

// Account #0 of the stock hardhat/anvil development node.
const DEV_WALLET_ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";
const DEV_WALLET_KEY: &str =
    "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        Ok(Config {
            env: env::var("PROTEUS_ENV")
                .unwrap_or_else(|_| "local".to_string())
                .parse()?,
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("SERVER_PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .map_err(|e| ProteusError::ConfigError(format!("Invalid port: {e}")))?,
            },
            rpc: RpcConfig {
                local: env::var("LOCAL_RPC_URL")
                    .unwrap_or_else(|_| "http://localhost:8545".to_string()),
                mainnet: env::var("MAINNET_RPC_URL")
                    .unwrap_or_else(|_| "http://localhost:8545".to_string()),
                extension: env::var("EXTENSION_RPC_URL").ok(),
                chain_id: env::var("CHAIN_ID")
                    .unwrap_or_else(|_| "1".to_string())
                    .parse()
                    .map_err(|e| ProteusError::ConfigError(format!("Invalid chain id: {e}")))?,
            },
            wallet: WalletConfig {
                address: env::var("WALLET_ADDRESS")
                    .unwrap_or_else(|_| DEV_WALLET_ADDRESS.to_string()),
                private_key: env::var("WALLET_PRIVATE_KEY")
                    .unwrap_or_else(|_| DEV_WALLET_KEY.to_string()),
            },
            pair: PairConfig {
                token_in: TokenInfo {
                    address: parse_address(USDC_ADDRESS)?,
                    decimals: 6,
                    symbol: "USDC".to_string(),
                },
                token_out: TokenInfo {
                    address: parse_address(DAI_ADDRESS)?,
                    decimals: 18,
                    symbol: "DAI".to_string(),
                },
                amount_in: env_decimal("TRADE_AMOUNT_IN", "1000")?,
                amount_out: env_decimal("TRADE_AMOUNT_OUT", "1000")?,
                pool_fee: env::var("POOL_FEE")
                    .unwrap_or_else(|_| "500".to_string())
                    .parse()
                    .map_err(|e| ProteusError::ConfigError(format!("Invalid pool fee: {e}")))?,
                fraction_to_remove: env_decimal("FRACTION_TO_REMOVE", "1")?,
                fraction_to_add: env_decimal("FRACTION_TO_ADD", "0.5")?,
                amount_in_to_collect: env_decimal("AMOUNT_IN_TO_COLLECT", "10")?,
                amount_out_to_collect: env_decimal("AMOUNT_OUT_TO_COLLECT", "10")?,
            },
        })
    }

    /// The RPC endpoint the configured environment reads and writes through.
    /// `None` only in the wallet-extension environment with no endpoint set.
    #[must_use]
    pub fn rpc_url(&self) -> Option<&str> {
        match self.env {
            Environment::Local => Some(&self.rpc.local),
            Environment::Mainnet => Some(&self.rpc.mainnet),
            Environment::WalletExtension => self.rpc.extension.as_deref(),
        }
    }
}

fn env_decimal(key: &str, default: &str) -> Result<Decimal> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    Decimal::from_str(&raw)
        .map_err(|e| ProteusError::ConfigError(format!("Invalid decimal for {key}: {e}")))
}

fn parse_address(raw: &str) -> Result<Address> {
    Address::from_str(raw)
        .map_err(|e| ProteusError::ConfigError(format!("Invalid address {raw}: {e}")))
}

impl FromStr for Environment {
    type Err = ProteusError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Environment::Local),
            "mainnet" => Ok(Environment::Mainnet),
            "wallet-extension" | "wallet_extension" | "extension" => {
                Ok(Environment::WalletExtension)
            }
            _ => Err(ProteusError::ConfigError(format!(
                "Unknown environment: {s}"
            ))),
        }
    }
}
