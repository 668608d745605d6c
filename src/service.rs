/*
 * Service composition: provider resolution, orchestrator wiring and the
 * block-driven balance watcher
 */

use crate::config::{Config, Environment};
use crate::models::{BalanceSnapshot, ProteusError, Result};
use crate::pool::PoolReader;
use crate::position::PositionOrchestrator;
use crate::quote::QuoteClient;
use crate::rpc::RpcClient;
use crate::trade::TradeOrchestrator;
use crate::tx::create_dispatcher;
use crate::wallet::WalletAccessor;
use chrono::Utc;
use ethers::providers::{Middleware, StreamExt};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Everything that needs a live provider. Absent when the wallet-extension
/// environment has no signer endpoint: the API then reports the trading
/// surface as unavailable instead of the process failing at startup.
pub struct ServiceCore {
    pub config: Config,
    pub rpc: Arc<RpcClient>,
    pub wallet: Arc<WalletAccessor>,
    pub reader: Arc<PoolReader>,
    pub quoter: Arc<QuoteClient>,
    pub trade: TradeOrchestrator,
    pub positions: PositionOrchestrator,
}

pub struct TradingService {
    config: Config,
    core: Option<Arc<ServiceCore>>,
    balances: Arc<RwLock<Option<BalanceSnapshot>>>,
}

impl TradingService {
    pub async fn new(config: Config) -> Result<Self> {
        info!(
            "Initializing trading service: {} -> {} at fee tier {}",
            config.pair.token_in.symbol, config.pair.token_out.symbol, config.pair.pool_fee
        );

        let balances = Arc::new(RwLock::new(None));

        let Some(rpc) = RpcClient::for_environment(&config).await? else {
            warn!("Provider unavailable; trading features disabled");
            return Ok(Self {
                config,
                core: None,
                balances,
            });
        };
        let rpc = Arc::new(rpc);
        info!("Connected to RPC (chain id {})", rpc.chain_id());

        let dispatcher = create_dispatcher(&config, &rpc)?;
        let wallet = Arc::new(WalletAccessor::new(&config, rpc.clone(), dispatcher.clone())?);

        if config.env == Environment::WalletExtension {
            match wallet.connect_external().await {
                Ok(Some(address)) => info!("External wallet connected: {address:?}"),
                Ok(None) => warn!("External wallet not connected; actions requiring a wallet stay disabled"),
                Err(e) => warn!("External wallet connection failed: {e}"),
            }
        }

        let reader = Arc::new(PoolReader::new(config.clone(), rpc.clone()));
        let quoter = Arc::new(QuoteClient::new(config.clone(), rpc.clone(), reader.clone()));
        let trade = TradeOrchestrator::new(
            config.clone(),
            reader.clone(),
            quoter.clone(),
            wallet.clone(),
            dispatcher.clone(),
        );
        let positions = PositionOrchestrator::new(
            config.clone(),
            rpc.clone(),
            reader.clone(),
            wallet.clone(),
            dispatcher,
        );

        let core = Arc::new(ServiceCore {
            config: config.clone(),
            rpc,
            wallet,
            reader,
            quoter,
            trade,
            positions,
        });

        spawn_balance_watcher(core.clone(), balances.clone());

        Ok(Self {
            config,
            core: Some(core),
            balances,
        })
    }

    #[must_use]
    pub fn core(&self) -> Option<Arc<ServiceCore>> {
        self.core.clone()
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Latest snapshot written by the balance watcher, if any block has
    /// arrived since startup.
    pub async fn balances(&self) -> Option<BalanceSnapshot> {
        self.balances.read().await.clone()
    }
}

impl ServiceCore {
    /// Reads native and pair-token balances for the active wallet.
    pub async fn refresh_balances(&self) -> Result<BalanceSnapshot> {
        let address = self.wallet.address().await.ok_or(ProteusError::NoWallet)?;
        let pair = &self.config.pair;

        let (native, token_in, token_out) = tokio::try_join!(
            self.wallet.currency_balance(address, None),
            self.wallet.currency_balance(address, Some(&pair.token_in)),
            self.wallet.currency_balance(address, Some(&pair.token_out)),
        )?;

        Ok(BalanceSnapshot {
            address: format!("{address:?}"),
            native,
            token_in_symbol: pair.token_in.symbol.clone(),
            token_in,
            token_out_symbol: pair.token_out.symbol.clone(),
            token_out,
            observed_at: Utc::now(),
        })
    }
}

/// Every new block triggers a fresh balance read. Reads are not pinned to a
/// particular block: when blocks arrive in quick succession the last write
/// wins.
fn spawn_balance_watcher(
    core: Arc<ServiceCore>,
    slot: Arc<RwLock<Option<BalanceSnapshot>>>,
) {
    tokio::spawn(async move {
        let provider = core.rpc.provider();
        let mut blocks = match provider.watch_blocks().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Block subscription failed; balances will not refresh: {e}");
                return;
            }
        };
        info!("Balance watcher subscribed to new blocks");

        while let Some(block_hash) = blocks.next().await {
            match core.refresh_balances().await {
                Ok(snapshot) => {
                    *slot.write().await = Some(snapshot);
                }
                Err(e) => warn!("Balance refresh failed after block {block_hash:?}: {e}"),
            }
        }
    });
}
