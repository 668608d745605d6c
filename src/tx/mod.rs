/*
 * Transaction dispatch: node-managed signing or a locally held key
 */

use crate::config::{Config, Environment};
use crate::models::{ProteusError, Result, TxState};
use crate::rpc::RpcClient;
use async_trait::async_trait;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::H256;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

// Demo-grade gas caps applied to every state-changing submission.
pub const MAX_FEE_PER_GAS: u64 = 2_100_000;
pub const MAX_PRIORITY_FEE_PER_GAS: u64 = 8_000_000_000;

/// Allowance ceiling, in readable token units, granted by every approval.
pub const TOKEN_AMOUNT_TO_APPROVE: u64 = 1_000_000_000_000;

/// Deadline window for swaps and liquidity calls.
pub const TX_DEADLINE_SECS: i64 = 20 * 60;

pub const RECEIPT_TIMEOUT_SECS: u64 = 120;
const RECEIPT_POLL_INTERVAL_MS: u64 = 500;

/// Seam between the orchestrators and whichever signing path the
/// environment provides. Dispatch is not idempotent: retrying a failed
/// send may double-submit.
#[async_trait]
pub trait TxDispatcher: Send + Sync {
    async fn dispatch(&self, tx: TypedTransaction) -> Result<TxState>;
}

pub fn create_dispatcher(config: &Config, rpc: &RpcClient) -> Result<Arc<dyn TxDispatcher>> {
    match config.env {
        Environment::WalletExtension => Ok(Arc::new(ExternalDispatcher::new(rpc.provider()))),
        Environment::Local | Environment::Mainnet => {
            Ok(Arc::new(LocalDispatcher::new(config, rpc)?))
        }
    }
}

/// Sends through an external signer endpoint that manages its own keys.
/// Fire-and-confirm: a returned hash is `Sent`, there is no local polling.
pub struct ExternalDispatcher {
    provider: Arc<Provider<Http>>,
}

impl ExternalDispatcher {
    #[must_use]
    pub fn new(provider: Arc<Provider<Http>>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl TxDispatcher for ExternalDispatcher {
    async fn dispatch(&self, tx: TypedTransaction) -> Result<TxState> {
        let params = serde_json::json!([tx]);
        match self
            .provider
            .request::<_, H256>("eth_sendTransaction", params)
            .await
        {
            Ok(hash) => {
                info!("Transaction accepted by signer endpoint: {hash:?}");
                Ok(TxState::Sent)
            }
            Err(e) => {
                let message = e.to_string();
                if is_user_rejection(&message) {
                    warn!("Transaction rejected by the signer: {message}");
                    Ok(TxState::Rejected)
                } else {
                    warn!("Signer endpoint refused transaction: {message}");
                    Ok(TxState::Failed)
                }
            }
        }
    }
}

/// Signs with the configured key, broadcasts, then polls for the receipt on
/// a fixed interval under an explicit deadline.
pub struct LocalDispatcher {
    client: SignerMiddleware<Provider<Http>, LocalWallet>,
    provider: Arc<Provider<Http>>,
}

impl LocalDispatcher {
    pub fn new(config: &Config, rpc: &RpcClient) -> Result<Self> {
        let raw_key = config.wallet.private_key.as_str();
        let wallet: LocalWallet = raw_key
            .strip_prefix("0x")
            .unwrap_or(raw_key)
            .parse()
            .map_err(|e| ProteusError::WalletError(format!("Invalid private key: {e}")))?;
        let wallet = wallet.with_chain_id(rpc.chain_id());

        let provider = rpc.provider();
        Ok(Self {
            client: SignerMiddleware::new((*provider).clone(), wallet),
            provider,
        })
    }

    async fn await_receipt(&self, tx_hash: H256) -> Result<TxState> {
        let deadline = Instant::now() + Duration::from_secs(RECEIPT_TIMEOUT_SECS);
        loop {
            match self.provider.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    info!(
                        "Transaction {tx_hash:?} confirmed in block {:?}",
                        receipt.block_number
                    );
                    return Ok(TxState::Sent);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Receipt polling error for {tx_hash:?}: {e}");
                    return Ok(TxState::Failed);
                }
            }

            if Instant::now() >= deadline {
                return Err(ProteusError::ReceiptTimeout(RECEIPT_TIMEOUT_SECS));
            }
            tokio::time::sleep(Duration::from_millis(RECEIPT_POLL_INTERVAL_MS)).await;
        }
    }
}

#[async_trait]
impl TxDispatcher for LocalDispatcher {
    async fn dispatch(&self, tx: TypedTransaction) -> Result<TxState> {
        let pending = match self.client.send_transaction(tx, None).await {
            Ok(pending) => pending,
            Err(e) => {
                let message = e.to_string();
                if is_user_rejection(&message) {
                    return Ok(TxState::Rejected);
                }
                return Err(ProteusError::RpcError(format!(
                    "Failed to send transaction: {message}"
                )));
            }
        };

        let tx_hash = *pending;
        info!("Transaction broadcast: {tx_hash:?}");
        self.await_receipt(tx_hash).await
    }
}

/// Dispatches `tx` and collapses infrastructure failures into
/// `TxState::Failed`. The distinct receipt-timeout kind still propagates so
/// a slow chain is not mistaken for a failed send.
pub async fn dispatch_or_fail(
    dispatcher: &dyn TxDispatcher,
    tx: TypedTransaction,
    label: &str,
) -> Result<TxState> {
    match dispatcher.dispatch(tx).await {
        Ok(state) => Ok(state),
        Err(ProteusError::ReceiptTimeout(secs)) => Err(ProteusError::ReceiptTimeout(secs)),
        Err(e) => {
            warn!("{label} submission failed: {e}");
            Ok(TxState::Failed)
        }
    }
}

/// A declined signature surfaces as JSON-RPC error 4001 or a
/// "rejected"/"denied" message, depending on the signer.
#[must_use]
pub fn is_user_rejection(message: &str) -> bool {
    let lowered = message.to_lowercase();
    lowered.contains("4001") || lowered.contains("rejected") || lowered.contains("denied")
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ErringDispatcher {
        timeout: bool,
    }

    #[async_trait]
    impl TxDispatcher for ErringDispatcher {
        async fn dispatch(&self, _tx: TypedTransaction) -> Result<TxState> {
            if self.timeout {
                Err(ProteusError::ReceiptTimeout(RECEIPT_TIMEOUT_SECS))
            } else {
                Err(ProteusError::RpcError("connection refused".to_string()))
            }
        }
    }

    fn empty_tx() -> TypedTransaction {
        ethers::types::Eip1559TransactionRequest::new().into()
    }

    #[tokio::test]
    async fn infrastructure_errors_collapse_to_failed() {
        let dispatcher = ErringDispatcher { timeout: false };
        let state = dispatch_or_fail(&dispatcher, empty_tx(), "Test")
            .await
            .unwrap();
        assert_eq!(state, TxState::Failed);
    }

    #[tokio::test]
    async fn receipt_timeouts_stay_distinct() {
        let dispatcher = ErringDispatcher { timeout: true };
        let result = dispatch_or_fail(&dispatcher, empty_tx(), "Test").await;
        assert!(matches!(result, Err(ProteusError::ReceiptTimeout(_))));
    }

    #[test]
    fn user_rejection_matches_signer_phrasings() {
        assert!(is_user_rejection("JsonRpcError { code: 4001, .. }"));
        assert!(is_user_rejection("User rejected the request"));
        assert!(is_user_rejection("signature denied"));
        assert!(!is_user_rejection("insufficient funds for gas"));
    }

    #[test]
    fn local_dispatcher_accepts_the_dev_key() {
        let config = Config::from_env().unwrap();
        let provider = Provider::<Http>::try_from(config.rpc.local.as_str()).unwrap();
        let rpc = RpcClient::from_provider(Arc::new(provider), config.rpc.chain_id);
        assert!(LocalDispatcher::new(&config, &rpc).is_ok());
    }
}
