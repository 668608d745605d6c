/*
 * RPC client wrapper and environment-based provider selection
 */

use crate::config::{Config, Environment};
use crate::models::{ProteusError, Result};
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest};
use std::sync::Arc;
use tracing::warn;

pub struct RpcClient {
    provider: Arc<Provider<Http>>,
    chain_id: u64,
}

impl RpcClient {
    pub async fn new(rpc_url: &str, chain_id: u64) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| ProteusError::RpcError(format!("Failed to create provider: {e}")))?;

        let chain = provider
            .get_chainid()
            .await
            .map_err(|e| ProteusError::RpcError(format!("Failed to get chain ID: {e}")))?;

        if chain.as_u64() != chain_id {
            return Err(ProteusError::RpcError(format!(
                "Chain ID mismatch: expected {}, got {}",
                chain_id,
                chain.as_u64()
            )));
        }

        Ok(Self::from_provider(Arc::new(provider), chain_id))
    }

    #[must_use]
    pub fn from_provider(provider: Arc<Provider<Http>>, chain_id: u64) -> Self {
        Self { provider, chain_id }
    }

    /// Resolves the client for the configured environment. In the
    /// wallet-extension environment a missing or unreachable signer endpoint
    /// yields `None`: dependent features are disabled, not failed.
    pub async fn for_environment(config: &Config) -> Result<Option<Self>> {
        let Some(url) = config.rpc_url() else {
            warn!("No external signer endpoint configured");
            return Ok(None);
        };

        match config.env {
            Environment::WalletExtension => match Self::new(url, config.rpc.chain_id).await {
                Ok(client) => Ok(Some(client)),
                Err(e) => {
                    warn!("External signer endpoint unavailable: {e}");
                    Ok(None)
                }
            },
            Environment::Local | Environment::Mainnet => {
                Ok(Some(Self::new(url, config.rpc.chain_id).await?))
            }
        }
    }

    #[must_use]
    pub fn provider(&self) -> Arc<Provider<Http>> {
        self.provider.clone()
    }

    #[must_use]
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Issues a read-only `eth_call` of raw calldata against `to`.
    pub async fn call(&self, to: Address, data: Vec<u8>) -> Result<Bytes> {
        let tx: TypedTransaction = TransactionRequest::new()
            .to(to)
            .data(Bytes::from(data))
            .into();

        self.provider
            .call(&tx, None)
            .await
            .map_err(|e| ProteusError::ContractError(format!("eth_call failed: {e}")))
    }
}
