/*
 * Quote orchestrator: simulated exact-input quotes against the quoter lens
 */

use crate::config::Config;
use crate::models::{ProteusError, Result};
use crate::pool::PoolReader;
use crate::rpc::RpcClient;
use crate::utils::{encode_call, from_readable_amount, to_readable_amount, word};
use ethers::abi::Token;
use ethers::types::{Address, U256};
use std::str::FromStr;
use std::sync::Arc;

pub const QUOTER_CONTRACT_ADDRESS: &str = "0xb27308f9F90D607463bb33eA1BeBb41C27CE5AB6";
pub const QUOTER_V2_CONTRACT_ADDRESS: &str = "0x61fFE014bA17989E743c5F6cB21bF9697530B21e";

pub struct QuoteClient {
    rpc: Arc<RpcClient>,
    reader: Arc<PoolReader>,
    config: Config,
}

impl QuoteClient {
    #[must_use]
    pub fn new(config: Config, rpc: Arc<RpcClient>, reader: Arc<PoolReader>) -> Self {
        Self {
            rpc,
            reader,
            config,
        }
    }

    /// Display quote: the configured input amount through the first-revision
    /// quoter, formatted to the fixed display width. Read-only simulation,
    /// no approval involved.
    pub async fn quote(&self) -> Result<String> {
        let pool = self.reader.pool_info().await?;
        let pair = &self.config.pair;
        let amount_in = from_readable_amount(pair.amount_in, pair.token_in.decimals)?;

        let data = build_quote_calldata(
            pair.token_in.address,
            pair.token_out.address,
            pool.fee,
            amount_in,
        );
        let quoter = Address::from_str(QUOTER_CONTRACT_ADDRESS)
            .map_err(|e| ProteusError::ConfigError(format!("Invalid quoter address: {e}")))?;

        let raw = self.rpc.call(quoter, data).await?;
        let amount_out = U256::from_big_endian(word(&raw, 0)?);
        to_readable_amount(amount_out, pair.token_out.decimals)
    }

    /// Trade-construction quote: raw output amount through the struct-based
    /// second-revision quoter.
    pub async fn output_quote(&self, fee: u32, amount_in: U256) -> Result<U256> {
        let pair = &self.config.pair;
        let data = build_output_quote_calldata(
            pair.token_in.address,
            pair.token_out.address,
            fee,
            amount_in,
        );
        let quoter = Address::from_str(QUOTER_V2_CONTRACT_ADDRESS)
            .map_err(|e| ProteusError::ConfigError(format!("Invalid quoter address: {e}")))?;

        let raw = self.rpc.call(quoter, data).await?;
        Ok(U256::from_big_endian(word(&raw, 0)?))
    }
}

fn build_quote_calldata(token_in: Address, token_out: Address, fee: u32, amount_in: U256) -> Vec<u8> {
    encode_call(
        "quoteExactInputSingle(address,address,uint24,uint256,uint160)",
        &[
            Token::Address(token_in),
            Token::Address(token_out),
            Token::Uint(fee.into()),
            Token::Uint(amount_in),
            Token::Uint(U256::zero()),
        ],
    )
}

fn build_output_quote_calldata(
    token_in: Address,
    token_out: Address,
    fee: u32,
    amount_in: U256,
) -> Vec<u8> {
    encode_call(
        "quoteExactInputSingle((address,address,uint256,uint24,uint160))",
        &[Token::Tuple(vec![
            Token::Address(token_in),
            Token::Address(token_out),
            Token::Uint(amount_in),
            Token::Uint(fee.into()),
            Token::Uint(U256::zero()),
        ])],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_calldata_encodes_five_words() {
        let data = build_quote_calldata(Address::zero(), Address::zero(), 500, U256::from(1u8));
        assert_eq!(data.len(), 4 + 5 * 32);
    }

    #[test]
    fn output_quote_calldata_encodes_the_param_struct_inline() {
        // a static tuple encodes without an offset head, so the payload is
        // the same five words behind a different selector
        let data =
            build_output_quote_calldata(Address::zero(), Address::zero(), 500, U256::from(1u8));
        assert_eq!(data.len(), 4 + 5 * 32);
    }
}
