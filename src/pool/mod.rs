/*
 * Pool reader: deterministic address derivation and on-chain snapshot reads
 */

use crate::config::Config;
use crate::models::{ProteusError, Result};
use crate::rpc::RpcClient;
use crate::utils::{encode_call, i24_from_word, word};
use ethers::abi::Token;
use ethers::types::{Address, H256, U256};
use ethers::utils::{get_create2_address_from_hash, keccak256};
use std::str::FromStr;
use std::sync::Arc;

pub const POOL_FACTORY_ADDRESS: &str = "0x1F98431c8aD98523631AE4a59f267346ea31F984";
pub const POOL_INIT_CODE_HASH: &str =
    "0xe34f199b19b2b4f47f68442619d555527d244f78a3297ea89325f843f87b8b54";

/// Point-in-time pool state. Read fresh for every quote, trade and position
/// construction; never cached across calls.
#[derive(Debug, Clone)]
pub struct PoolInfo {
    pub token0: Address,
    pub token1: Address,
    pub fee: u32,
    pub tick_spacing: i32,
    pub sqrt_price_x96: U256,
    pub liquidity: u128,
    pub tick: i32,
}

/// CREATE2 derivation of the canonical pool address for a pair and fee
/// tier. Pure: the same three inputs always produce the same address, and
/// the token order does not matter.
pub fn compute_pool_address(token_a: Address, token_b: Address, fee: u32) -> Result<Address> {
    let factory = Address::from_str(POOL_FACTORY_ADDRESS)
        .map_err(|e| ProteusError::ConfigError(format!("Invalid factory address: {e}")))?;
    let init_code_hash = H256::from_str(POOL_INIT_CODE_HASH)
        .map_err(|e| ProteusError::ConfigError(format!("Invalid init code hash: {e}")))?;

    let (token0, token1) = if token_a < token_b {
        (token_a, token_b)
    } else {
        (token_b, token_a)
    };

    let salt = keccak256(ethers::abi::encode(&[
        Token::Address(token0),
        Token::Address(token1),
        Token::Uint(fee.into()),
    ]));

    Ok(get_create2_address_from_hash(
        factory,
        salt.to_vec(),
        init_code_hash.as_bytes().to_vec(),
    ))
}

pub struct PoolReader {
    rpc: Arc<RpcClient>,
    config: Config,
}

impl PoolReader {
    #[must_use]
    pub fn new(config: Config, rpc: Arc<RpcClient>) -> Self {
        Self { rpc, config }
    }

    pub fn pool_address(&self) -> Result<Address> {
        compute_pool_address(
            self.config.pair.token_in.address,
            self.config.pair.token_out.address,
            self.config.pair.pool_fee,
        )
    }

    /// Reads the six pool parameters in parallel. RPC failures propagate to
    /// the caller; there is no retry at this layer.
    pub async fn pool_info(&self) -> Result<PoolInfo> {
        let pool = self.pool_address()?;

        let (token0, token1, fee, tick_spacing, liquidity, (sqrt_price_x96, tick)) = tokio::try_join!(
            self.read_address(pool, "token0()"),
            self.read_address(pool, "token1()"),
            self.read_u32(pool, "fee()"),
            self.read_i24(pool, "tickSpacing()"),
            self.read_u128(pool, "liquidity()"),
            self.read_slot0(pool),
        )?;

        Ok(PoolInfo {
            token0,
            token1,
            fee,
            tick_spacing,
            sqrt_price_x96,
            liquidity,
            tick,
        })
    }

    async fn read_address(&self, pool: Address, signature: &str) -> Result<Address> {
        let raw = self.rpc.call(pool, encode_call(signature, &[])).await?;
        Ok(Address::from_slice(&word(&raw, 0)?[12..]))
    }

    async fn read_u32(&self, pool: Address, signature: &str) -> Result<u32> {
        let raw = self.rpc.call(pool, encode_call(signature, &[])).await?;
        Ok(U256::from_big_endian(word(&raw, 0)?).low_u32())
    }

    async fn read_i24(&self, pool: Address, signature: &str) -> Result<i32> {
        let raw = self.rpc.call(pool, encode_call(signature, &[])).await?;
        Ok(i24_from_word(word(&raw, 0)?))
    }

    async fn read_u128(&self, pool: Address, signature: &str) -> Result<u128> {
        let raw = self.rpc.call(pool, encode_call(signature, &[])).await?;
        Ok(U256::from_big_endian(word(&raw, 0)?).as_u128())
    }

    async fn read_slot0(&self, pool: Address) -> Result<(U256, i32)> {
        let raw = self.rpc.call(pool, encode_call("slot0()", &[])).await?;
        let sqrt_price_x96 = U256::from_big_endian(word(&raw, 0)?);
        let tick = i24_from_word(word(&raw, 1)?);
        Ok((sqrt_price_x96, tick))
    }
}
