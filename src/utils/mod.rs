/*
 * Calldata, amount-formatting and tick helpers shared by the orchestrators
 */

use crate::models::{ProteusError, Result};
use ethers::abi::{encode, Token};
use ethers::types::U256;
use ethers::utils::{format_units, keccak256, parse_units};
use num_bigint::BigUint;
use rust_decimal::Decimal;
use std::str::FromStr;

/// Display width for formatted token amounts, counted over the whole
/// formatted string including the decimal point.
pub const READABLE_FORM_LEN: usize = 4;

pub const MIN_TICK: i32 = -887_272;
pub const MAX_TICK: i32 = 887_272;

/// Builds calldata for `signature` (canonical form, e.g.
/// `approve(address,uint256)`): 4-byte keccak selector followed by the
/// ABI-encoded arguments.
#[must_use]
pub fn encode_call(signature: &str, args: &[Token]) -> Vec<u8> {
    let selector = &keccak256(signature.as_bytes())[0..4];
    let mut data = Vec::from(selector);
    data.extend_from_slice(&encode(args));
    data
}

/// Formats a raw amount at the given decimals and truncates to the fixed
/// display width. Total: zero and dust amounts format without error.
pub fn to_readable_amount(raw: U256, decimals: u8) -> Result<String> {
    let formatted = format_units(raw, u32::from(decimals))
        .map_err(|e| ProteusError::CalculationError(format!("Failed to format amount: {e}")))?;
    Ok(formatted.chars().take(READABLE_FORM_LEN).collect())
}

/// Parses a human-readable amount into raw token units.
pub fn from_readable_amount(amount: Decimal, decimals: u8) -> Result<U256> {
    let parsed = parse_units(amount.to_string(), u32::from(decimals))
        .map_err(|e| ProteusError::CalculationError(format!("Failed to parse amount: {e}")))?;
    Ok(parsed.into())
}

/// Rounds a tick to the nearest multiple of `tick_spacing` (half rounds up),
/// clamped so the result stays a usable tick inside the global bounds.
#[must_use]
pub fn nearest_usable_tick(tick: i32, tick_spacing: i32) -> i32 {
    let spacing = i64::from(tick_spacing);
    let rounded = (2 * i64::from(tick) + spacing).div_euclid(2 * spacing) * spacing;

    #[allow(clippy::cast_possible_truncation)]
    let rounded = rounded as i32;
    if rounded < MIN_TICK {
        rounded + tick_spacing
    } else if rounded > MAX_TICK {
        rounded - tick_spacing
    } else {
        rounded
    }
}

/// The position range used by every liquidity operation: the nearest usable
/// tick widened by two spacings on each side.
#[must_use]
pub fn tick_range_around(tick: i32, tick_spacing: i32) -> (i32, i32) {
    let base = nearest_usable_tick(tick, tick_spacing);
    (base - tick_spacing * 2, base + tick_spacing * 2)
}

/// Two's-complement word for an int24 ABI value.
#[must_use]
pub fn int24_word(value: i32) -> U256 {
    if value >= 0 {
        U256::from(value.unsigned_abs())
    } else {
        U256::MAX - U256::from(u64::from(value.unsigned_abs()) - 1)
    }
}

/// Sign-extended int24 from the low bytes of a 32-byte ABI word.
#[must_use]
pub fn i24_from_word(word: &[u8]) -> i32 {
    let raw = (i32::from(word[29]) << 16) | (i32::from(word[30]) << 8) | i32::from(word[31]);
    if word[29] >= 0x80 {
        #[allow(clippy::cast_possible_wrap)]
        let extended = raw | 0xFF00_0000_u32 as i32;
        extended
    } else {
        raw
    }
}

/// Borrows the `index`-th 32-byte word of an ABI-encoded response.
pub fn word(data: &[u8], index: usize) -> Result<&[u8]> {
    data.get(index * 32..(index + 1) * 32)
        .ok_or_else(|| ProteusError::ContractError(format!("Response too short for word {index}")))
}

/// Scales an integer quantity by a decimal fraction in `[0, 1]` without
/// intermediate precision loss.
pub fn fraction_of_u128(value: u128, fraction: Decimal) -> Result<u128> {
    if fraction < Decimal::ZERO || fraction > Decimal::ONE {
        return Err(ProteusError::CalculationError(format!(
            "Fraction out of range: {fraction}"
        )));
    }
    #[allow(clippy::cast_sign_loss)]
    let numerator = fraction.mantissa() as u128;
    let denominator = 10u128.pow(fraction.scale());
    let scaled = U256::from(value) * U256::from(numerator) / U256::from(denominator);
    Ok(scaled.as_u128())
}

/// Converts a Q64.96 sqrt price into a display price of token0 quoted in
/// token1, adjusted for the tokens' decimals.
pub fn sqrt_price_x96_to_price(
    sqrt_price_x96: U256,
    decimals0: u8,
    decimals1: u8,
) -> Result<Decimal> {
    if sqrt_price_x96.is_zero() {
        return Err(ProteusError::CalculationError(
            "Invalid sqrt price: zero".to_string(),
        ));
    }

    const DISPLAY_SCALE: u32 = 6;

    let mut buf = [0u8; 32];
    sqrt_price_x96.to_big_endian(&mut buf);
    let sqrt_price = BigUint::from_bytes_be(&buf);
    let price_x192 = sqrt_price.pow(2u32);

    let numerator = price_x192 * BigUint::from(10u32).pow(u32::from(decimals0) + DISPLAY_SCALE);
    let denominator =
        (BigUint::from(1u8) << 192usize) * BigUint::from(10u32).pow(u32::from(decimals1));
    let scaled = (numerator / denominator).to_string();

    let scaled = Decimal::from_str(&scaled)
        .map_err(|e| ProteusError::CalculationError(format!("Failed to parse price: {e}")))?;
    Ok(scaled / Decimal::from(10u64.pow(DISPLAY_SCALE)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::Address;

    #[test]
    fn encode_call_uses_the_canonical_selector() {
        let data = encode_call(
            "approve(address,uint256)",
            &[
                Token::Address(Address::zero()),
                Token::Uint(U256::from(1u8)),
            ],
        );
        // keccak256("approve(address,uint256)")[..4]
        assert_eq!(&data[0..4], &[0x09, 0x5e, 0xa7, 0xb3]);
        assert_eq!(data.len(), 4 + 64);
    }

    #[test]
    fn readable_amount_truncates_to_display_width() {
        let raw = U256::from(1_234_567u64);
        assert_eq!(to_readable_amount(raw, 6).unwrap(), "1.23");
        let thousand = U256::from(1_000_123_456u64);
        assert_eq!(to_readable_amount(thousand, 6).unwrap(), "1000");
    }

    #[test]
    fn readable_amount_never_fails_for_zero() {
        let formatted = to_readable_amount(U256::zero(), 18).unwrap();
        assert_eq!(formatted, "0.00");
    }

    #[test]
    fn from_readable_amount_scales_by_decimals() {
        let amount = Decimal::from(1000);
        assert_eq!(
            from_readable_amount(amount, 6).unwrap(),
            U256::from(1_000_000_000u64)
        );
        let half = Decimal::from_str("0.5").unwrap();
        assert_eq!(
            from_readable_amount(half, 18).unwrap(),
            U256::from(500_000_000_000_000_000u64)
        );
    }

    #[test]
    fn nearest_usable_tick_rounds_to_spacing() {
        assert_eq!(nearest_usable_tick(100, 10), 100);
        assert_eq!(nearest_usable_tick(104, 10), 100);
        assert_eq!(nearest_usable_tick(105, 10), 110);
        assert_eq!(nearest_usable_tick(-23, 60), 0);
        assert_eq!(nearest_usable_tick(-31, 60), -60);
    }

    #[test]
    fn nearest_usable_tick_clamps_to_global_bounds() {
        let low = nearest_usable_tick(MIN_TICK, 10);
        assert!(low >= MIN_TICK);
        assert_eq!(low % 10, 0);
        let high = nearest_usable_tick(MAX_TICK, 60);
        assert!(high <= MAX_TICK);
        assert_eq!(high % 60, 0);
    }

    #[test]
    fn tick_range_widens_by_two_spacings() {
        assert_eq!(tick_range_around(100, 10), (80, 120));
        assert_eq!(tick_range_around(-23, 60), (-120, 120));
    }

    #[test]
    fn int24_words_round_trip() {
        for tick in [0, 1, -1, 120, -120, MAX_TICK, MIN_TICK] {
            let mut buf = [0u8; 32];
            int24_word(tick).to_big_endian(&mut buf);
            assert_eq!(i24_from_word(&buf), tick, "tick {tick}");
        }
    }

    #[test]
    fn fraction_scaling_is_exact() {
        assert_eq!(fraction_of_u128(1000, Decimal::ONE).unwrap(), 1000);
        let half = Decimal::from_str("0.5").unwrap();
        assert_eq!(fraction_of_u128(1000, half).unwrap(), 500);
        assert_eq!(fraction_of_u128(u128::MAX, Decimal::ONE).unwrap(), u128::MAX);
        assert!(fraction_of_u128(10, Decimal::from(2)).is_err());
    }

    #[test]
    fn sqrt_price_conversion_handles_decimal_skew() {
        // sqrt price of exactly 1.0 between equal-decimals tokens
        let one = U256::from(1u8) << 96;
        assert_eq!(sqrt_price_x96_to_price(one, 18, 18).unwrap(), Decimal::ONE);

        // raw price 1e12 between a 6-decimals token0 and an 18-decimals
        // token1 is a display price of 1.0
        let skewed = (U256::from(1u8) << 96) * U256::from(1_000_000u64);
        assert_eq!(sqrt_price_x96_to_price(skewed, 6, 18).unwrap(), Decimal::ONE);

        assert!(sqrt_price_x96_to_price(U256::zero(), 6, 6).is_err());
    }
}
