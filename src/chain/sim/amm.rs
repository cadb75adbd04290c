// Pool pricing used by the simulated venues
use anyhow::{anyhow, bail, Result};
use ethers::types::U256;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, MathematicalOps};
use std::str::FromStr;

use crate::math::mul_div;
use crate::v3_math::sqrt_u256;

/// Balancer fixed-point one.
pub const ONE: u64 = 1_000_000_000_000_000_000;

fn u256_to_decimal(value: U256) -> Result<Decimal> {
    Decimal::from_str(&value.to_string()).map_err(|e| anyhow!("invalid decimal {}: {}", value, e))
}

fn decimal_to_u256(value: Decimal) -> Result<U256> {
    value
        .floor()
        .to_u128()
        .map(U256::from)
        .ok_or_else(|| anyhow!("decimal {} does not fit into uint128", value))
}

/// UniswapV2Library.getAmountOut (0.3% fee).
pub fn v2_amount_out(amount_in: U256, reserve_in: U256, reserve_out: U256) -> Result<U256> {
    if amount_in.is_zero() {
        bail!("UniswapV2Library: INSUFFICIENT_INPUT_AMOUNT");
    }
    if reserve_in.is_zero() || reserve_out.is_zero() {
        bail!("UniswapV2Library: INSUFFICIENT_LIQUIDITY");
    }
    let amount_in_with_fee = amount_in * 997;
    let numerator = amount_in_with_fee * reserve_out;
    let denominator = reserve_in * 1000 + amount_in_with_fee;
    Ok(numerator / denominator)
}

/// UniswapV2Library.quote
pub fn v2_quote(amount_a: U256, reserve_a: U256, reserve_b: U256) -> Result<U256> {
    mul_div(amount_a, reserve_b, reserve_a).ok_or_else(|| anyhow!("UniswapV2Library: INSUFFICIENT_LIQUIDITY"))
}

/// Initial LP supply of a fresh pair before the locked minimum is subtracted.
pub fn v2_initial_liquidity(amount0: U256, amount1: U256) -> U256 {
    sqrt_u256(amount0 * amount1)
}

/// WeightedMath.calcOutGivenIn on an amount that already had the swap fee removed.
pub fn weighted_out_given_in(
    balance_in: U256,
    weight_in: U256,
    balance_out: U256,
    weight_out: U256,
    amount_in: U256,
) -> Result<U256> {
    if balance_in.is_zero() || balance_out.is_zero() {
        bail!("BAL#004 zero balance");
    }
    // equal weights reduce to the constant product formula
    if weight_in == weight_out {
        return mul_div(balance_out, amount_in, balance_in + amount_in)
            .ok_or_else(|| anyhow!("BAL#000 overflow"));
    }

    let base = u256_to_decimal(balance_in)? / u256_to_decimal(balance_in + amount_in)?;
    let exponent = u256_to_decimal(weight_in)? / u256_to_decimal(weight_out)?;
    let power = base.powd(exponent);
    let out = u256_to_decimal(balance_out)? * (Decimal::ONE - power);
    if out.is_sign_negative() {
        return Ok(U256::zero());
    }
    decimal_to_u256(out)
}

/// Removes a fee expressed as an 18-decimal fraction.
pub fn subtract_fee(amount: U256, fee: U256) -> Result<U256> {
    let fee_amount = mul_div(amount, fee, U256::from(ONE)).ok_or_else(|| anyhow!("fee overflow"))?;
    Ok(amount - fee_amount)
}

/// Constant-product swap on Ambient virtual reserves with a fee in parts per million.
pub fn ambient_amount_out(qty: U256, fee_ppm: u32, reserve_in: U256, reserve_out: U256) -> Result<U256> {
    if reserve_in.is_zero() || reserve_out.is_zero() {
        bail!("ambient pool has no liquidity");
    }
    let fee = mul_div(qty, U256::from(fee_ppm), U256::from(1_000_000u32))
        .ok_or_else(|| anyhow!("fee overflow"))?;
    let net = qty - fee;
    mul_div(reserve_out, net, reserve_in + net).ok_or_else(|| anyhow!("ambient swap overflow"))
}

/// sqrt(quote / base) as Q64.64.
pub fn ambient_sqrt_price(base_reserve: U256, quote_reserve: U256) -> Result<u128> {
    if base_reserve.is_zero() {
        bail!("ambient pool has no base reserve");
    }
    let ratio_x128 = mul_div(quote_reserve, U256::one() << 128, base_reserve)
        .ok_or_else(|| anyhow!("price overflow"))?;
    u128::try_from(sqrt_u256(ratio_x128)).map_err(|_| anyhow!("price overflow"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v2_amount_out_matches_library() {
        // 1000 in against 1e6/1e6 reserves
        let out = v2_amount_out(U256::from(1000), U256::from(1_000_000), U256::from(1_000_000)).unwrap();
        assert_eq!(out, U256::from(996));
        assert!(v2_amount_out(U256::from(1), U256::zero(), U256::from(5)).is_err());
    }

    #[test]
    fn test_weighted_equal_weights_is_constant_product() {
        let half = U256::from(ONE / 2);
        let out = weighted_out_given_in(U256::from(1000), half, U256::from(1000), half, U256::from(1000)).unwrap();
        assert_eq!(out, U256::from(500));
    }

    #[test]
    fn test_weighted_uneven_weights() {
        let e18 = U256::exp10(18);
        let third = U256::from(ONE / 3);
        let two_thirds = U256::from(ONE) - third;
        // spot price is 1 for 1000 @ 1/3 against 2000 @ 2/3
        let out = weighted_out_given_in(e18 * 1000, third, e18 * 2000, two_thirds, e18).unwrap();
        assert!(out < e18);
        assert!(out > e18 * 999 / 1000);
    }

    #[test]
    fn test_ambient_price_at_parity() {
        let price = ambient_sqrt_price(U256::from(5000), U256::from(5000)).unwrap();
        assert_eq!(price, 1u128 << 64);
    }
}
