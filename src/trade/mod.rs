/*
 * Trade orchestrator: construct an exact-input trade and execute it through
 * the swap router
 */

use crate::config::{Config, TokenInfo};
use crate::models::{ProteusError, Result, TxState};
use crate::pool::PoolReader;
use crate::quote::QuoteClient;
use crate::tx::{
    dispatch_or_fail, TxDispatcher, MAX_FEE_PER_GAS, MAX_PRIORITY_FEE_PER_GAS, TX_DEADLINE_SECS,
};
use crate::utils::{encode_call, from_readable_amount, to_readable_amount};
use crate::wallet::WalletAccessor;
use chrono::Utc;
use ethers::abi::Token;
use ethers::types::{Address, Bytes, Eip1559TransactionRequest, U256};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub const SWAP_ROUTER_ADDRESS: &str = "0xE592427A0AEce92De3Edee1F18E0157C05861564";

/// Fixed slippage tolerance: 50 bips, or 0.50%.
pub const SLIPPAGE_TOLERANCE_BPS: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeKind {
    ExactInput,
}

/// Immutable trade value: a route of pool addresses (single-hop in
/// practice), the input amount and the quoted output. Constructed fresh per
/// attempt and discarded after execution.
#[derive(Debug, Clone)]
pub struct Trade {
    pub route: Vec<Address>,
    pub token_in: TokenInfo,
    pub token_out: TokenInfo,
    pub amount_in: U256,
    pub amount_out: U256,
    pub fee: u32,
    pub kind: TradeKind,
}

pub struct TradeOrchestrator {
    config: Config,
    reader: Arc<PoolReader>,
    quoter: Arc<QuoteClient>,
    wallet: Arc<WalletAccessor>,
    dispatcher: Arc<dyn TxDispatcher>,
    in_flight: Mutex<()>,
}

impl TradeOrchestrator {
    #[must_use]
    pub fn new(
        config: Config,
        reader: Arc<PoolReader>,
        quoter: Arc<QuoteClient>,
        wallet: Arc<WalletAccessor>,
        dispatcher: Arc<dyn TxDispatcher>,
    ) -> Self {
        Self {
            config,
            reader,
            quoter,
            wallet,
            dispatcher,
            in_flight: Mutex::new(()),
        }
    }

    /// Builds an unchecked trade from a fresh pool snapshot and a simulated
    /// output quote. No on-chain effect.
    pub async fn create_trade(&self) -> Result<Trade> {
        let pool = self.reader.pool_info().await?;
        let pair = &self.config.pair;

        let amount_in = from_readable_amount(pair.amount_in, pair.token_in.decimals)?;
        let amount_out = self.quoter.output_quote(pool.fee, amount_in).await?;

        Ok(Trade {
            route: vec![self.reader.pool_address()?],
            token_in: pair.token_in.clone(),
            token_out: pair.token_out.clone(),
            amount_in,
            amount_out,
            fee: pool.fee,
            kind: TradeKind::ExactInput,
        })
    }

    /// Approves the router for the input token, then submits the swap with
    /// the slippage-bounded minimum output and the fixed deadline window.
    /// The swap is never submitted unless the approval reached `Sent`.
    pub async fn execute(&self, trade: &Trade) -> Result<TxState> {
        let _guard = self
            .in_flight
            .try_lock()
            .map_err(|_| ProteusError::Busy("trade"))?;

        let recipient = self.wallet.address().await.ok_or(ProteusError::NoWallet)?;
        let router = Address::from_str(SWAP_ROUTER_ADDRESS)
            .map_err(|e| ProteusError::ConfigError(format!("Invalid router address: {e}")))?;

        let approval = self
            .wallet
            .approve_token_transfer(&trade.token_in, router)
            .await;
        if approval != TxState::Sent {
            warn!("Router approval not granted ({approval}); trade abandoned");
            return Ok(TxState::Failed);
        }

        let minimum_out =
            trade.amount_out * U256::from(10_000 - SLIPPAGE_TOLERANCE_BPS) / U256::from(10_000u32);
        #[allow(clippy::cast_sign_loss)]
        let deadline = (Utc::now().timestamp() + TX_DEADLINE_SECS) as u64;

        let data = encode_call(
            "exactInputSingle((address,address,uint24,address,uint256,uint256,uint256,uint160))",
            &[Token::Tuple(vec![
                Token::Address(trade.token_in.address),
                Token::Address(trade.token_out.address),
                Token::Uint(trade.fee.into()),
                Token::Address(recipient),
                Token::Uint(U256::from(deadline)),
                Token::Uint(trade.amount_in),
                Token::Uint(minimum_out),
                Token::Uint(U256::zero()),
            ])],
        );

        let tx = Eip1559TransactionRequest::new()
            .to(router)
            .from(recipient)
            .data(Bytes::from(data))
            .value(U256::zero())
            .max_fee_per_gas(MAX_FEE_PER_GAS)
            .max_priority_fee_per_gas(MAX_PRIORITY_FEE_PER_GAS);

        info!("Executing {}", self.display(trade));
        dispatch_or_fail(self.dispatcher.as_ref(), tx.into(), "Trade").await
    }

    /// Human-readable summary, e.g. `1000 USDC for 999. DAI`.
    #[must_use]
    pub fn display(&self, trade: &Trade) -> String {
        let amount_in = to_readable_amount(trade.amount_in, trade.token_in.decimals)
            .unwrap_or_else(|_| "?".to_string());
        let amount_out = to_readable_amount(trade.amount_out, trade.token_out.decimals)
            .unwrap_or_else(|_| "?".to_string());
        format!(
            "{amount_in} {} for {amount_out} {}",
            trade.token_in.symbol, trade.token_out.symbol
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::RpcClient;
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

    fn orchestrator(dispatcher: Arc<StubDispatcher>) -> TradeOrchestrator {
        let config = Config::from_env().unwrap();
        let provider = Provider::<Http>::try_from(config.rpc.local.as_str()).unwrap();
        let rpc = Arc::new(RpcClient::from_provider(
            Arc::new(provider),
            config.rpc.chain_id,
        ));
        let reader = Arc::new(PoolReader::new(config.clone(), rpc.clone()));
        let quoter = Arc::new(QuoteClient::new(config.clone(), rpc.clone(), reader.clone()));
        let wallet = Arc::new(
            WalletAccessor::new(&config, rpc.clone(), dispatcher.clone()).unwrap(),
        );
        TradeOrchestrator::new(config, reader, quoter, wallet, dispatcher)
    }

    fn sample_trade(config: &Config) -> Trade {
        Trade {
            route: vec![Address::zero()],
            token_in: config.pair.token_in.clone(),
            token_out: config.pair.token_out.clone(),
            amount_in: U256::from(1_000_000_000u64),
            amount_out: U256::from(999_000_000_000_000_000_000u128),
            fee: 500,
            kind: TradeKind::ExactInput,
        }
    }

    #[tokio::test]
    async fn failed_approval_short_circuits_the_swap() {
        let dispatcher = StubDispatcher::new(TxState::Failed);
        let orchestrator = orchestrator(dispatcher.clone());
        let trade = sample_trade(&Config::from_env().unwrap());

        let state = orchestrator.execute(&trade).await.unwrap();
        assert_eq!(state, TxState::Failed);
        // only the approval was dispatched, never the swap
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn granted_approval_is_followed_by_the_swap() {
        let dispatcher = StubDispatcher::new(TxState::Sent);
        let orchestrator = orchestrator(dispatcher.clone());
        let trade = sample_trade(&Config::from_env().unwrap());

        let state = orchestrator.execute(&trade).await.unwrap();
        assert_eq!(state, TxState::Sent);
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn display_truncates_both_legs() {
        let dispatcher = StubDispatcher::new(TxState::Sent);
        let orchestrator = orchestrator(dispatcher);
        let trade = sample_trade(&Config::from_env().unwrap());
        assert_eq!(orchestrator.display(&trade), "1000 USDC for 999. DAI");
    }
}
