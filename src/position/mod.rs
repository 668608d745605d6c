/*
 * Position orchestrator: mint, grow, shrink and collect concentrated
 * liquidity through the position manager
 */

use crate::config::{Config, TokenInfo};
use crate::models::{ProteusError, Result, TxState};
use crate::pool::PoolReader;
use crate::rpc::RpcClient;
use crate::tx::{
    dispatch_or_fail, TxDispatcher, MAX_FEE_PER_GAS, MAX_PRIORITY_FEE_PER_GAS, TX_DEADLINE_SECS,
};
use crate::utils::{
    encode_call, fraction_of_u128, from_readable_amount, i24_from_word, int24_word,
    tick_range_around, word,
};
use crate::wallet::WalletAccessor;
use chrono::Utc;
use ethers::abi::Token;
use ethers::types::{Address, Bytes, Eip1559TransactionRequest, U256};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

pub const NONFUNGIBLE_POSITION_MANAGER_ADDRESS: &str =
    "0xC36442b4a4522E871399CD717aBDD847Ab11FE88";

/// On-chain view of a minted position.
#[derive(Debug, Clone, Serialize)]
pub struct PositionInfo {
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub liquidity: u128,
    pub fee_growth_inside0_last_x128: U256,
    pub fee_growth_inside1_last_x128: U256,
    pub tokens_owed0: u128,
    pub tokens_owed1: u128,
}

/// One lock per mutating action kind; overlapping invocations of the same
/// action are rejected instead of double-submitting.
struct ActionGuards {
    mint: Mutex<()>,
    increase: Mutex<()>,
    decrease: Mutex<()>,
    collect: Mutex<()>,
}

pub struct PositionOrchestrator {
    config: Config,
    rpc: Arc<RpcClient>,
    reader: Arc<PoolReader>,
    wallet: Arc<WalletAccessor>,
    dispatcher: Arc<dyn TxDispatcher>,
    guards: ActionGuards,
}

impl PositionOrchestrator {
    #[must_use]
    pub fn new(
        config: Config,
        rpc: Arc<RpcClient>,
        reader: Arc<PoolReader>,
        wallet: Arc<WalletAccessor>,
        dispatcher: Arc<dyn TxDispatcher>,
    ) -> Self {
        Self {
            config,
            rpc,
            reader,
            wallet,
            dispatcher,
            guards: ActionGuards {
                mint: Mutex::new(()),
                increase: Mutex::new(()),
                decrease: Mutex::new(()),
                collect: Mutex::new(()),
            },
        }
    }

    /// Mints a new position around the current tick. Both pair tokens must
    /// be approved for the position manager before anything is submitted.
    pub async fn mint(&self) -> Result<TxState> {
        let _guard = self
            .guards
            .mint
            .try_lock()
            .map_err(|_| ProteusError::Busy("mint"))?;

        let recipient = self.wallet.address().await.ok_or(ProteusError::NoWallet)?;
        let manager = manager_address()?;
        if !self.approve_pair(manager).await {
            return Ok(TxState::Failed);
        }

        let pool = self.reader.pool_info().await?;
        let (tick_lower, tick_upper) = tick_range_around(pool.tick, pool.tick_spacing);

        let pair = &self.config.pair;
        let amount_in = from_readable_amount(pair.amount_in, pair.token_in.decimals)?;
        let amount_out = from_readable_amount(pair.amount_out, pair.token_out.decimals)?;
        let (token0, token1, amount0, amount1) = self.ordered_amounts(amount_in, amount_out);

        let data = encode_call(
            "mint((address,address,uint24,int24,int24,uint256,uint256,uint256,uint256,address,uint256))",
            &[Token::Tuple(vec![
                Token::Address(token0),
                Token::Address(token1),
                Token::Uint(pool.fee.into()),
                Token::Int(int24_word(tick_lower)),
                Token::Int(int24_word(tick_upper)),
                Token::Uint(amount0),
                Token::Uint(amount1),
                Token::Uint(U256::zero()),
                Token::Uint(U256::zero()),
                Token::Address(recipient),
                Token::Uint(deadline()),
            ])],
        );

        self.submit(manager, recipient, data, "Mint").await
    }

    /// Adds liquidity to an existing position, with both desired amounts
    /// scaled by the configured fraction of the base trade amount.
    pub async fn increase(&self, position_id: U256) -> Result<TxState> {
        let _guard = self
            .guards
            .increase
            .try_lock()
            .map_err(|_| ProteusError::Busy("increase"))?;

        let sender = self.wallet.address().await.ok_or(ProteusError::NoWallet)?;
        let manager = manager_address()?;
        if !self.approve_pair(manager).await {
            return Ok(TxState::Failed);
        }

        let pair = &self.config.pair;
        let scaled = pair.amount_in * pair.fraction_to_add;
        let amount_in = from_readable_amount(scaled, pair.token_in.decimals)?;
        let amount_out = from_readable_amount(scaled, pair.token_out.decimals)?;
        let (_, _, amount0, amount1) = self.ordered_amounts(amount_in, amount_out);

        let data = encode_call(
            "increaseLiquidity((uint256,uint256,uint256,uint256,uint256,uint256))",
            &[Token::Tuple(vec![
                Token::Uint(position_id),
                Token::Uint(amount0),
                Token::Uint(amount1),
                Token::Uint(U256::zero()),
                Token::Uint(U256::zero()),
                Token::Uint(deadline()),
            ])],
        );

        self.submit(manager, sender, data, "Increase").await
    }

    /// Burns the configured fraction of the position's current liquidity
    /// and, in the same call, collects everything the burn makes owed.
    pub async fn decrease(&self, position_id: U256) -> Result<TxState> {
        let _guard = self
            .guards
            .decrease
            .try_lock()
            .map_err(|_| ProteusError::Busy("decrease"))?;

        let recipient = self.wallet.address().await.ok_or(ProteusError::NoWallet)?;
        let manager = manager_address()?;
        if !self.approve_pair(manager).await {
            return Ok(TxState::Failed);
        }

        let position = self.position_info(position_id).await?;
        let liquidity_to_burn =
            fraction_of_u128(position.liquidity, self.config.pair.fraction_to_remove)?;

        let decrease_data = encode_call(
            "decreaseLiquidity((uint256,uint128,uint256,uint256,uint256))",
            &[Token::Tuple(vec![
                Token::Uint(position_id),
                Token::Uint(U256::from(liquidity_to_burn)),
                Token::Uint(U256::zero()),
                Token::Uint(U256::zero()),
                Token::Uint(deadline()),
            ])],
        );
        let collect_data = encode_call(
            "collect((uint256,address,uint128,uint128))",
            &[Token::Tuple(vec![
                Token::Uint(position_id),
                Token::Address(recipient),
                Token::Uint(U256::from(u128::MAX)),
                Token::Uint(U256::from(u128::MAX)),
            ])],
        );

        let data = encode_call(
            "multicall(bytes[])",
            &[Token::Array(vec![
                Token::Bytes(decrease_data),
                Token::Bytes(collect_data),
            ])],
        );

        self.submit(manager, recipient, data, "Decrease").await
    }

    /// Collects accrued fees up to the configured per-token ceilings.
    pub async fn collect_fees(&self, position_id: U256) -> Result<TxState> {
        let _guard = self
            .guards
            .collect
            .try_lock()
            .map_err(|_| ProteusError::Busy("collect"))?;

        let recipient = self.wallet.address().await.ok_or(ProteusError::NoWallet)?;
        let manager = manager_address()?;
        if !self.approve_pair(manager).await {
            return Ok(TxState::Failed);
        }

        let pair = &self.config.pair;
        let in_ceiling =
            from_readable_amount(pair.amount_in_to_collect, pair.token_in.decimals)?;
        let out_ceiling =
            from_readable_amount(pair.amount_out_to_collect, pair.token_out.decimals)?;
        let (_, _, amount0_max, amount1_max) = self.ordered_amounts(in_ceiling, out_ceiling);

        let data = encode_call(
            "collect((uint256,address,uint128,uint128))",
            &[Token::Tuple(vec![
                Token::Uint(position_id),
                Token::Address(recipient),
                Token::Uint(amount0_max),
                Token::Uint(amount1_max),
            ])],
        );

        self.submit(manager, recipient, data, "Collect").await
    }

    /// Token identifiers owned by the active wallet, read one index per
    /// call over the reported balance.
    pub async fn list_positions(&self) -> Result<Vec<U256>> {
        let owner = self.wallet.address().await.ok_or(ProteusError::NoWallet)?;
        let manager = manager_address()?;

        let raw = self
            .rpc
            .call(manager, encode_call("balanceOf(address)", &[Token::Address(owner)]))
            .await?;
        let balance = U256::from_big_endian(word(&raw, 0)?).as_u64();

        let mut ids = Vec::with_capacity(balance as usize);
        for index in 0..balance {
            let raw = self
                .rpc
                .call(
                    manager,
                    encode_call(
                        "tokenOfOwnerByIndex(address,uint256)",
                        &[Token::Address(owner), Token::Uint(U256::from(index))],
                    ),
                )
                .await?;
            ids.push(U256::from_big_endian(word(&raw, 0)?));
        }

        Ok(ids)
    }

    /// Decodes the position record for a token identifier.
    pub async fn position_info(&self, position_id: U256) -> Result<PositionInfo> {
        let manager = manager_address()?;
        let raw = self
            .rpc
            .call(
                manager,
                encode_call("positions(uint256)", &[Token::Uint(position_id)]),
            )
            .await?;

        Ok(PositionInfo {
            tick_lower: i24_from_word(word(&raw, 5)?),
            tick_upper: i24_from_word(word(&raw, 6)?),
            liquidity: U256::from_big_endian(word(&raw, 7)?).as_u128(),
            fee_growth_inside0_last_x128: U256::from_big_endian(word(&raw, 8)?),
            fee_growth_inside1_last_x128: U256::from_big_endian(word(&raw, 9)?),
            tokens_owed0: U256::from_big_endian(word(&raw, 10)?).as_u128(),
            tokens_owed1: U256::from_big_endian(word(&raw, 11)?).as_u128(),
        })
    }

    /// Approves both pair tokens for the position manager. Both legs are
    /// always attempted; the operation proceeds only when both reached
    /// `Sent`.
    async fn approve_pair(&self, manager: Address) -> bool {
        let pair = &self.config.pair;
        let in_approval = self
            .wallet
            .approve_token_transfer(&pair.token_in, manager)
            .await;
        let out_approval = self
            .wallet
            .approve_token_transfer(&pair.token_out, manager)
            .await;

        let granted = in_approval == TxState::Sent && out_approval == TxState::Sent;
        if !granted {
            warn!(
                "Position-manager approvals not granted (in: {in_approval}, out: {out_approval})"
            );
        }
        granted
    }

    /// Maps the configured in/out amounts onto the pool's canonical token
    /// order.
    fn ordered_amounts(
        &self,
        amount_in: U256,
        amount_out: U256,
    ) -> (Address, Address, U256, U256) {
        let input: &TokenInfo = &self.config.pair.token_in;
        let output: &TokenInfo = &self.config.pair.token_out;
        if input.address < output.address {
            (input.address, output.address, amount_in, amount_out)
        } else {
            (output.address, input.address, amount_out, amount_in)
        }
    }

    async fn submit(
        &self,
        manager: Address,
        from: Address,
        data: Vec<u8>,
        label: &str,
    ) -> Result<TxState> {
        let tx = Eip1559TransactionRequest::new()
            .to(manager)
            .from(from)
            .data(Bytes::from(data))
            .value(U256::zero())
            .max_fee_per_gas(MAX_FEE_PER_GAS)
            .max_priority_fee_per_gas(MAX_PRIORITY_FEE_PER_GAS);

        dispatch_or_fail(self.dispatcher.as_ref(), tx.into(), label).await
    }
}

fn manager_address() -> Result<Address> {
    Address::from_str(NONFUNGIBLE_POSITION_MANAGER_ADDRESS)
        .map_err(|e| ProteusError::ConfigError(format!("Invalid position manager address: {e}")))
}

fn deadline() -> U256 {
    #[allow(clippy::cast_sign_loss)]
    let timestamp = (Utc::now().timestamp() + TX_DEADLINE_SECS) as u64;
    U256::from(timestamp)
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

    fn orchestrator(dispatcher: Arc<StubDispatcher>) -> PositionOrchestrator {
        let config = Config::from_env().unwrap();
        let provider = Provider::<Http>::try_from(config.rpc.local.as_str()).unwrap();
        let rpc = Arc::new(RpcClient::from_provider(
            Arc::new(provider),
            config.rpc.chain_id,
        ));
        let reader = Arc::new(PoolReader::new(config.clone(), rpc.clone()));
        let wallet = Arc::new(
            WalletAccessor::new(&config, rpc.clone(), dispatcher.clone()).unwrap(),
        );
        PositionOrchestrator::new(config, rpc, reader, wallet, dispatcher)
    }

    #[tokio::test]
    async fn mint_stops_after_ungranted_approvals() {
        let dispatcher = StubDispatcher::new(TxState::Failed);
        let orchestrator = orchestrator(dispatcher.clone());

        let state = orchestrator.mint().await.unwrap();
        assert_eq!(state, TxState::Failed);
        // both approval legs were attempted, the mint itself never was
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn increase_stops_after_ungranted_approvals() {
        let dispatcher = StubDispatcher::new(TxState::Failed);
        let orchestrator = orchestrator(dispatcher.clone());

        let state = orchestrator.increase(U256::from(1u8)).await.unwrap();
        assert_eq!(state, TxState::Failed);
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn decrease_stops_after_ungranted_approvals() {
        let dispatcher = StubDispatcher::new(TxState::Failed);
        let orchestrator = orchestrator(dispatcher.clone());

        let state = orchestrator.decrease(U256::from(1u8)).await.unwrap();
        assert_eq!(state, TxState::Failed);
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn collect_stops_after_ungranted_approvals() {
        let dispatcher = StubDispatcher::new(TxState::Failed);
        let orchestrator = orchestrator(dispatcher.clone());

        let state = orchestrator.collect_fees(U256::from(1u8)).await.unwrap();
        assert_eq!(state, TxState::Failed);
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn amounts_follow_the_canonical_token_order() {
        let dispatcher = StubDispatcher::new(TxState::Sent);
        let orchestrator = orchestrator(dispatcher);

        let amount_in = U256::from(7u8);
        let amount_out = U256::from(11u8);
        let (token0, token1, amount0, amount1) =
            orchestrator.ordered_amounts(amount_in, amount_out);

        // DAI sorts below USDC, so the configured out-token leads
        assert_eq!(token0, orchestrator.config.pair.token_out.address);
        assert_eq!(token1, orchestrator.config.pair.token_in.address);
        assert_eq!(amount0, amount_out);
        assert_eq!(amount1, amount_in);
        assert!(token0 < token1);
    }
}
