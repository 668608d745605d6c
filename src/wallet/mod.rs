/*
 * Wallet accessor: address resolution, balances, approvals and wrapping
 */

use crate::config::{Config, Environment, TokenInfo};
use crate::models::{ProteusError, Result, TxState};
use crate::rpc::RpcClient;
use crate::tx::{
    dispatch_or_fail, TxDispatcher, MAX_FEE_PER_GAS, MAX_PRIORITY_FEE_PER_GAS,
    TOKEN_AMOUNT_TO_APPROVE,
};
use crate::utils::{encode_call, from_readable_amount, to_readable_amount, word};
use ethers::abi::Token;
use ethers::providers::Middleware;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, Eip1559TransactionRequest, U256};
use ethers::utils::format_ether;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

pub const WETH_ADDRESS: &str = "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2";

/// How the active address is known: derived from the locally held key, or
/// reported by the external signer after an explicit connect.
enum WalletIdentity {
    Local(LocalWallet),
    External(RwLock<Option<Address>>),
}

pub struct WalletAccessor {
    rpc: Arc<RpcClient>,
    dispatcher: Arc<dyn TxDispatcher>,
    identity: WalletIdentity,
    wrap_guard: Mutex<()>,
}

impl WalletAccessor {
    pub fn new(
        config: &Config,
        rpc: Arc<RpcClient>,
        dispatcher: Arc<dyn TxDispatcher>,
    ) -> Result<Self> {
        let identity = match config.env {
            Environment::WalletExtension => WalletIdentity::External(RwLock::new(None)),
            Environment::Local | Environment::Mainnet => {
                let raw_key = config.wallet.private_key.as_str();
                let wallet: LocalWallet = raw_key
                    .strip_prefix("0x")
                    .unwrap_or(raw_key)
                    .parse()
                    .map_err(|e| ProteusError::WalletError(format!("Invalid private key: {e}")))?;
                WalletIdentity::Local(wallet.with_chain_id(rpc.chain_id()))
            }
        };

        Ok(Self {
            rpc,
            dispatcher,
            identity,
            wrap_guard: Mutex::new(()),
        })
    }

    /// The single source of truth for "who is trading".
    pub async fn address(&self) -> Option<Address> {
        match &self.identity {
            WalletIdentity::Local(wallet) => Some(wallet.address()),
            WalletIdentity::External(slot) => *slot.read().await,
        }
    }

    /// Asks the external signer for its accounts. Exactly one account is
    /// required; zero or several leaves the accessor disconnected.
    pub async fn connect_external(&self) -> Result<Option<Address>> {
        let WalletIdentity::External(slot) = &self.identity else {
            return Err(ProteusError::WalletError(
                "Account connection only applies to the wallet-extension environment".to_string(),
            ));
        };

        let accounts: Vec<Address> = self
            .rpc
            .provider()
            .request("eth_requestAccounts", ())
            .await
            .map_err(|e| ProteusError::WalletError(format!("Account request failed: {e}")))?;

        if accounts.len() != 1 {
            warn!(
                "Ambiguous account response from signer: {} accounts",
                accounts.len()
            );
            return Ok(None);
        }

        *slot.write().await = Some(accounts[0]);
        info!("Connected wallet {:?}", accounts[0]);
        Ok(Some(accounts[0]))
    }

    /// Formatted balance of the native currency (`token` = `None`) or an
    /// ERC-20 token, whose decimals are read from the contract.
    pub async fn currency_balance(
        &self,
        address: Address,
        token: Option<&TokenInfo>,
    ) -> Result<String> {
        let Some(token) = token else {
            let balance = self
                .rpc
                .provider()
                .get_balance(address, None)
                .await
                .map_err(|e| ProteusError::RpcError(format!("Failed to get balance: {e}")))?;
            return Ok(format_ether(balance));
        };

        let data = encode_call("balanceOf(address)", &[Token::Address(address)]);
        let raw = self.rpc.call(token.address, data).await?;
        let balance = U256::from_big_endian(word(&raw, 0)?);

        let raw = self.rpc.call(token.address, encode_call("decimals()", &[])).await?;
        #[allow(clippy::cast_possible_truncation)]
        let decimals = U256::from_big_endian(word(&raw, 0)?).low_u64() as u8;

        to_readable_amount(balance, decimals)
    }

    /// ERC-20 approval for the fixed ceiling amount. Every failure mode
    /// collapses to `Failed`: callers treat an ungranted approval as a hard
    /// stop for the whole attempt.
    pub async fn approve_token_transfer(&self, token: &TokenInfo, spender: Address) -> TxState {
        match self.try_approve(token, spender).await {
            Ok(state) => state,
            Err(e) => {
                warn!("Token approval for {} failed: {e}", token.symbol);
                TxState::Failed
            }
        }
    }

    async fn try_approve(&self, token: &TokenInfo, spender: Address) -> Result<TxState> {
        let owner = self.address().await.ok_or(ProteusError::NoWallet)?;
        let amount = from_readable_amount(Decimal::from(TOKEN_AMOUNT_TO_APPROVE), token.decimals)?;
        let data = encode_call(
            "approve(address,uint256)",
            &[Token::Address(spender), Token::Uint(amount)],
        );

        let tx = Eip1559TransactionRequest::new()
            .to(token.address)
            .from(owner)
            .data(Bytes::from(data));
        self.dispatcher.dispatch(tx.into()).await
    }

    /// Wraps native currency by calling `deposit()` on the wrapped-token
    /// contract with the amount attached as value.
    pub async fn wrap_eth(&self, amount: Decimal) -> Result<TxState> {
        let _guard = self
            .wrap_guard
            .try_lock()
            .map_err(|_| ProteusError::Busy("wrap"))?;

        let address = self.address().await.ok_or(ProteusError::NoWallet)?;
        let weth = Address::from_str(WETH_ADDRESS)
            .map_err(|e| ProteusError::ConfigError(format!("Invalid WETH address: {e}")))?;
        let value = from_readable_amount(amount, 18)?;

        let tx = Eip1559TransactionRequest::new()
            .to(weth)
            .from(address)
            .data(Bytes::from(encode_call("deposit()", &[])))
            .value(value)
            .max_fee_per_gas(MAX_FEE_PER_GAS)
            .max_priority_fee_per_gas(MAX_PRIORITY_FEE_PER_GAS);

        dispatch_or_fail(self.dispatcher.as_ref(), tx.into(), "Wrap").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ethers::providers::{Http, Provider};
    use ethers::types::transaction::eip2718::TypedTransaction;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubDispatcher {
        state: TxState,
        calls: AtomicUsize,
    }

    impl StubDispatcher {
        fn new(state: TxState) -> Arc<Self> {
            Arc::new(Self {
                state,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TxDispatcher for StubDispatcher {
        async fn dispatch(&self, _tx: TypedTransaction) -> Result<TxState> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.state)
        }
    }

    fn offline_rpc(config: &Config) -> Arc<RpcClient> {
        let provider = Provider::<Http>::try_from(config.rpc.local.as_str()).unwrap();
        Arc::new(RpcClient::from_provider(
            Arc::new(provider),
            config.rpc.chain_id,
        ))
    }

    #[tokio::test]
    async fn local_identity_derives_the_configured_address() {
        let config = Config::from_env().unwrap();
        let dispatcher = StubDispatcher::new(TxState::Sent);
        let wallet =
            WalletAccessor::new(&config, offline_rpc(&config), dispatcher).unwrap();

        let expected = Address::from_str(&config.wallet.address).unwrap();
        assert_eq!(wallet.address().await, Some(expected));
    }

    #[tokio::test]
    async fn external_identity_starts_disconnected() {
        let mut config = Config::from_env().unwrap();
        config.env = Environment::WalletExtension;
        let dispatcher = StubDispatcher::new(TxState::Sent);
        let wallet =
            WalletAccessor::new(&config, offline_rpc(&config), dispatcher).unwrap();
        assert_eq!(wallet.address().await, None);
    }

    #[tokio::test]
    async fn approval_reports_the_dispatcher_state() {
        let config = Config::from_env().unwrap();
        let dispatcher = StubDispatcher::new(TxState::Sent);
        let wallet = WalletAccessor::new(&config, offline_rpc(&config), dispatcher.clone())
            .unwrap();

        let state = wallet
            .approve_token_transfer(&config.pair.token_in, Address::zero())
            .await;
        assert_eq!(state, TxState::Sent);
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn approval_without_a_wallet_degrades_to_failed() {
        let mut config = Config::from_env().unwrap();
        config.env = Environment::WalletExtension;
        let dispatcher = StubDispatcher::new(TxState::Sent);
        let wallet = WalletAccessor::new(&config, offline_rpc(&config), dispatcher.clone())
            .unwrap();

        let state = wallet
            .approve_token_transfer(&config.pair.token_in, Address::zero())
            .await;
        assert_eq!(state, TxState::Failed);
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 0);
    }
}
