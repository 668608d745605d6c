/*
 * REST surface for the quoting, trading and position screens
 */

use crate::config::Config;
use crate::models::{BalanceSnapshot, ProteusError, TxState};
use crate::position::PositionInfo;
use crate::service::{ServiceCore, TradingService};
use crate::utils::sqrt_price_x96_to_price;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use rocket::{get, post, routes, State};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

pub struct ApiState {
    pub config: Config,
    pub service: TradingService,
}

#[derive(Debug, Serialize)]
pub struct PoolView {
    pub address: String,
    pub token0: String,
    pub token1: String,
    pub fee: u32,
    pub tick_spacing: i32,
    pub tick: i32,
    pub sqrt_price_x96: String,
    pub liquidity: String,
    pub price: String,
}

#[derive(Debug, Serialize)]
pub struct QuoteView {
    pub token_in: String,
    pub amount_in: String,
    pub token_out: String,
    pub amount_out: String,
}

#[derive(Debug, Serialize)]
pub struct TradeView {
    pub summary: String,
    pub state: TxState,
}

#[derive(Debug, Serialize)]
pub struct TxView {
    pub state: TxState,
}

#[derive(Debug, Serialize)]
pub struct ConnectView {
    pub address: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PositionView {
    pub id: String,
    #[serde(flatten)]
    pub info: PositionInfo,
}

#[derive(Debug, Deserialize)]
pub struct WrapRequest {
    pub amount: Decimal,
}

#[get("/health")]
pub async fn health_check() -> &'static str {
    "OK"
}

#[get("/api/v1/pool")]
pub async fn get_pool(state: &State<ApiState>) -> Result<Json<PoolView>, Custom<String>> {
    let core = require_core(state)?;
    let info = core.reader.pool_info().await.map_err(map_error)?;

    let pair = &core.config.pair;
    let (decimals0, decimals1) = if info.token0 == pair.token_in.address {
        (pair.token_in.decimals, pair.token_out.decimals)
    } else {
        (pair.token_out.decimals, pair.token_in.decimals)
    };
    let price = sqrt_price_x96_to_price(info.sqrt_price_x96, decimals0, decimals1)
        .map_err(map_error)?;

    let address = core.reader.pool_address().map_err(map_error)?;
    Ok(Json(PoolView {
        address: format!("{address:?}"),
        token0: format!("{:?}", info.token0),
        token1: format!("{:?}", info.token1),
        fee: info.fee,
        tick_spacing: info.tick_spacing,
        tick: info.tick,
        sqrt_price_x96: info.sqrt_price_x96.to_string(),
        liquidity: info.liquidity.to_string(),
        price: price.to_string(),
    }))
}

#[get("/api/v1/quote")]
pub async fn get_quote(state: &State<ApiState>) -> Result<Json<QuoteView>, Custom<String>> {
    let core = require_core(state)?;
    let amount_out = core.quoter.quote().await.map_err(map_error)?;

    let pair = &core.config.pair;
    Ok(Json(QuoteView {
        token_in: pair.token_in.symbol.clone(),
        amount_in: pair.amount_in.to_string(),
        token_out: pair.token_out.symbol.clone(),
        amount_out,
    }))
}

#[post("/api/v1/trade")]
pub async fn execute_trade(state: &State<ApiState>) -> Result<Json<TradeView>, Custom<String>> {
    let core = require_core(state)?;
    let trade = core.trade.create_trade().await.map_err(map_error)?;
    let summary = core.trade.display(&trade);
    let state = core.trade.execute(&trade).await.map_err(map_error)?;
    Ok(Json(TradeView { summary, state }))
}

#[get("/api/v1/balances")]
pub async fn get_balances(
    state: &State<ApiState>,
) -> Result<Json<Option<BalanceSnapshot>>, Custom<String>> {
    require_core(state)?;
    Ok(Json(state.service.balances().await))
}

#[post("/api/v1/wallet/connect")]
pub async fn connect_wallet(
    state: &State<ApiState>,
) -> Result<Json<ConnectView>, Custom<String>> {
    let core = require_core(state)?;
    let address = core.wallet.connect_external().await.map_err(map_error)?;
    Ok(Json(ConnectView {
        address: address.map(|a| format!("{a:?}")),
    }))
}

#[post("/api/v1/wallet/wrap", data = "<request>")]
pub async fn wrap_eth(
    request: Json<WrapRequest>,
    state: &State<ApiState>,
) -> Result<Json<TxView>, Custom<String>> {
    let core = require_core(state)?;
    let state = core.wallet.wrap_eth(request.amount).await.map_err(map_error)?;
    Ok(Json(TxView { state }))
}

#[get("/api/v1/positions")]
pub async fn list_positions(
    state: &State<ApiState>,
) -> Result<Json<Vec<String>>, Custom<String>> {
    let core = require_core(state)?;
    let ids = core.positions.list_positions().await.map_err(map_error)?;
    Ok(Json(ids.iter().map(ToString::to_string).collect()))
}

#[get("/api/v1/positions/<id>")]
pub async fn get_position(
    id: u64,
    state: &State<ApiState>,
) -> Result<Json<PositionView>, Custom<String>> {
    let core = require_core(state)?;
    let info = core.positions.position_info(id.into()).await.map_err(map_error)?;
    Ok(Json(PositionView {
        id: id.to_string(),
        info,
    }))
}

#[post("/api/v1/positions")]
pub async fn mint_position(state: &State<ApiState>) -> Result<Json<TxView>, Custom<String>> {
    let core = require_core(state)?;
    let state = core.positions.mint().await.map_err(map_error)?;
    Ok(Json(TxView { state }))
}

#[post("/api/v1/positions/<id>/increase")]
pub async fn increase_position(
    id: u64,
    state: &State<ApiState>,
) -> Result<Json<TxView>, Custom<String>> {
    let core = require_core(state)?;
    let state = core.positions.increase(id.into()).await.map_err(map_error)?;
    Ok(Json(TxView { state }))
}

#[post("/api/v1/positions/<id>/decrease")]
pub async fn decrease_position(
    id: u64,
    state: &State<ApiState>,
) -> Result<Json<TxView>, Custom<String>> {
    let core = require_core(state)?;
    let state = core.positions.decrease(id.into()).await.map_err(map_error)?;
    Ok(Json(TxView { state }))
}

#[post("/api/v1/positions/<id>/collect")]
pub async fn collect_position_fees(
    id: u64,
    state: &State<ApiState>,
) -> Result<Json<TxView>, Custom<String>> {
    let core = require_core(state)?;
    let state = core.positions.collect_fees(id.into()).await.map_err(map_error)?;
    Ok(Json(TxView { state }))
}

#[must_use]
pub fn create_rocket(state: ApiState) -> rocket::Rocket<rocket::Build> {
    rocket::build().manage(state).mount(
        "/",
        routes![
            health_check,
            get_pool,
            get_quote,
            execute_trade,
            get_balances,
            connect_wallet,
            wrap_eth,
            list_positions,
            get_position,
            mint_position,
            increase_position,
            decrease_position,
            collect_position_fees,
        ],
    )
}

fn require_core(state: &State<ApiState>) -> Result<Arc<ServiceCore>, Custom<String>> {
    state.service.core().ok_or_else(|| {
        Custom(
            Status::ServiceUnavailable,
            "No provider available for the configured environment".to_string(),
        )
    })
}

fn map_error(e: ProteusError) -> Custom<String> {
    error!("Request failed: {e}");
    let status = match &e {
        ProteusError::NoProvider => Status::ServiceUnavailable,
        ProteusError::NoWallet | ProteusError::Busy(_) => Status::Conflict,
        ProteusError::ReceiptTimeout(_) => Status::GatewayTimeout,
        _ => Status::InternalServerError,
    };
    Custom(status, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_meaningful_statuses() {
        assert_eq!(map_error(ProteusError::NoWallet).0, Status::Conflict);
        assert_eq!(map_error(ProteusError::Busy("trade")).0, Status::Conflict);
        assert_eq!(
            map_error(ProteusError::ReceiptTimeout(120)).0,
            Status::GatewayTimeout
        );
        assert_eq!(
            map_error(ProteusError::NoProvider).0,
            Status::ServiceUnavailable
        );
        assert_eq!(
            map_error(ProteusError::RpcError("boom".to_string())).0,
            Status::InternalServerError
        );
    }
}
