// UniswapV3 math: exact TickMath, OracleLibrary quotes and LiquidityAmounts helpers
use ethers::types::{Address, U256};

use crate::error::{RouterError, RouterResult};
use crate::math::{mul_div, mul_div_rounding_up};

/// Uniswap V3 constants
pub const MIN_TICK: i32 = -887272;
pub const MAX_TICK: i32 = 887272;
pub const MIN_SQRT_RATIO: U256 = U256([4295128739, 0, 0, 0]); // sqrt(1.0001^-887272) * 2^96
pub const MAX_SQRT_RATIO: U256 = U256([6743328256752651558, 17280870778742802505, 4294805859, 0]); // sqrt(1.0001^887272) * 2^96

/// Q96 fixed point constant
pub const Q96: U256 = U256([0, 0, 4294967296, 0]); // 2^96

/// Fee denominator for fee tiers expressed in hundredths of a bip.
pub const FEE_DENOMINATOR: u32 = 1_000_000;

// 1 / sqrt(1.0001^(2^i)) as Q128.128, for i = 0..20
const TICK_FACTORS: [u128; 20] = [
    0xfffcb933bd6fad37aa2d162d1a594001,
    0xfff97272373d413259a46990580e213a,
    0xfff2e50f5f656932ef12357cf3c7fdcc,
    0xffe5caca7e10e4e61c3624eaa0941cd0,
    0xffcb9843d60f6159c9db58835c926644,
    0xff973b41fa98c081472e6896dfb254c0,
    0xff2ea16466c96a3843ec78b326b52861,
    0xfe5dee046a99a2a811c461f1969c3053,
    0xfcbe86c7900a88aedcffc83b479aa3a4,
    0xf987a7253ac413176f2b074cf7815e54,
    0xf3392b0822b70005940c7a398e4b70f3,
    0xe7159475a2c29b7443b29c7fa6e889d9,
    0xd097f3bdfd2022b8845ad8f792aa5825,
    0xa9f746462d870fdf8a65dc1f90e061e5,
    0x70d869a156d2a1b890bb3df62baf32f7,
    0x31be135f97d08fd981231505542fcfa6,
    0x9aa508b5b7a84e1c677de54f3e99bc9,
    0x5d6af8dedb81196699c329225ee604,
    0x2216e584f5fa1ea926041bedfe98,
    0x48a170391f7dc42444e8fa2,
];

/// Calculate sqrt price from tick (TickMath.getSqrtRatioAtTick, bit exact)
pub fn get_sqrt_ratio_at_tick(tick: i32) -> RouterResult<U256> {
    if !(MIN_TICK..=MAX_TICK).contains(&tick) {
        return Err(RouterError::Overflow("tick out of range"));
    }
    let abs_tick = tick.unsigned_abs();

    let mut ratio = if abs_tick & 1 != 0 {
        U256::from(TICK_FACTORS[0])
    } else {
        U256::one() << 128
    };
    for (bit, factor) in TICK_FACTORS.iter().enumerate().skip(1) {
        if abs_tick & (1 << bit) != 0 {
            ratio = (ratio * U256::from(*factor)) >> 128;
        }
    }
    if tick > 0 {
        ratio = U256::MAX / ratio;
    }

    // Q128.128 -> Q64.96, rounding up
    let remainder = ratio & U256::from(u32::MAX);
    let sqrt_price = (ratio >> 32) + if remainder.is_zero() { U256::zero() } else { U256::one() };
    Ok(sqrt_price)
}

/// Greatest tick whose sqrt ratio is <= `sqrt_price_x96` (TickMath.getTickAtSqrtRatio)
pub fn get_tick_at_sqrt_ratio(sqrt_price_x96: U256) -> RouterResult<i32> {
    if sqrt_price_x96 < MIN_SQRT_RATIO || sqrt_price_x96 >= MAX_SQRT_RATIO {
        return Err(RouterError::Overflow("sqrt price out of range"));
    }

    let mut low = MIN_TICK;
    let mut high = MAX_TICK;
    while high - low > 1 {
        let mid = low + (high - low) / 2;
        if get_sqrt_ratio_at_tick(mid)? <= sqrt_price_x96 {
            low = mid;
        } else {
            high = mid;
        }
    }
    Ok(low)
}

/// Amount of `quote_token` received for `base_amount` of `base_token` at `tick`
/// (OracleLibrary.getQuoteAtTick)
pub fn get_quote_at_tick(
    tick: i32,
    base_amount: u128,
    base_token: Address,
    quote_token: Address,
) -> RouterResult<U256> {
    let sqrt_ratio_x96 = get_sqrt_ratio_at_tick(tick)?;
    let base_amount = U256::from(base_amount);
    let base_is_token0 = base_token < quote_token;

    let quote = if sqrt_ratio_x96 <= U256::from(u128::MAX) {
        let ratio_x192 = sqrt_ratio_x96 * sqrt_ratio_x96;
        let q192 = U256::one() << 192;
        if base_is_token0 {
            mul_div(ratio_x192, base_amount, q192)
        } else {
            mul_div(q192, base_amount, ratio_x192)
        }
    } else {
        let ratio_x128 = mul_div(sqrt_ratio_x96, sqrt_ratio_x96, U256::one() << 64)
            .ok_or(RouterError::Overflow("quote at tick"))?;
        let q128 = U256::one() << 128;
        if base_is_token0 {
            mul_div(ratio_x128, base_amount, q128)
        } else {
            mul_div(q128, base_amount, ratio_x128)
        }
    };
    quote.ok_or(RouterError::Overflow("quote at tick"))
}

/// Input remaining after a V3 fee tier is taken.
pub fn apply_fee(amount: U256, fee_pips: u32) -> RouterResult<U256> {
    let keep = FEE_DENOMINATOR.saturating_sub(fee_pips);
    mul_div(amount, U256::from(keep), U256::from(FEE_DENOMINATOR))
        .ok_or(RouterError::Overflow("fee"))
}

fn ordered(a: U256, b: U256) -> (U256, U256) {
    if a > b {
        (b, a)
    } else {
        (a, b)
    }
}

/// SqrtPriceMath.getAmount0Delta
pub fn get_amount0_delta(sqrt_a: U256, sqrt_b: U256, liquidity: u128, round_up: bool) -> RouterResult<U256> {
    let (sqrt_a, sqrt_b) = ordered(sqrt_a, sqrt_b);
    if sqrt_a.is_zero() {
        return Err(RouterError::Overflow("zero sqrt price"));
    }
    let numerator1 = U256::from(liquidity) << 96;
    let numerator2 = sqrt_b - sqrt_a;

    let amount = if round_up {
        let inner = mul_div_rounding_up(numerator1, numerator2, sqrt_b)
            .ok_or(RouterError::Overflow("amount0 delta"))?;
        let (q, r) = inner.div_mod(sqrt_a);
        if r.is_zero() {
            q
        } else {
            q + 1
        }
    } else {
        mul_div(numerator1, numerator2, sqrt_b).ok_or(RouterError::Overflow("amount0 delta"))? / sqrt_a
    };
    Ok(amount)
}

/// SqrtPriceMath.getAmount1Delta
pub fn get_amount1_delta(sqrt_a: U256, sqrt_b: U256, liquidity: u128, round_up: bool) -> RouterResult<U256> {
    let (sqrt_a, sqrt_b) = ordered(sqrt_a, sqrt_b);
    let liquidity = U256::from(liquidity);
    let amount = if round_up {
        mul_div_rounding_up(liquidity, sqrt_b - sqrt_a, Q96)
    } else {
        mul_div(liquidity, sqrt_b - sqrt_a, Q96)
    };
    amount.ok_or(RouterError::Overflow("amount1 delta"))
}

/// LiquidityAmounts.getLiquidityForAmount0
pub fn get_liquidity_for_amount0(sqrt_a: U256, sqrt_b: U256, amount0: U256) -> RouterResult<u128> {
    let (sqrt_a, sqrt_b) = ordered(sqrt_a, sqrt_b);
    if sqrt_a == sqrt_b {
        return Ok(0);
    }
    let intermediate = mul_div(sqrt_a, sqrt_b, Q96).ok_or(RouterError::Overflow("liquidity0"))?;
    let liquidity =
        mul_div(amount0, intermediate, sqrt_b - sqrt_a).ok_or(RouterError::Overflow("liquidity0"))?;
    u128::try_from(liquidity).map_err(|_| RouterError::Overflow("liquidity0"))
}

/// LiquidityAmounts.getLiquidityForAmount1
pub fn get_liquidity_for_amount1(sqrt_a: U256, sqrt_b: U256, amount1: U256) -> RouterResult<u128> {
    let (sqrt_a, sqrt_b) = ordered(sqrt_a, sqrt_b);
    if sqrt_a == sqrt_b {
        return Ok(0);
    }
    let liquidity = mul_div(amount1, Q96, sqrt_b - sqrt_a).ok_or(RouterError::Overflow("liquidity1"))?;
    u128::try_from(liquidity).map_err(|_| RouterError::Overflow("liquidity1"))
}

/// LiquidityAmounts.getLiquidityForAmounts
pub fn get_liquidity_for_amounts(
    sqrt_price: U256,
    sqrt_a: U256,
    sqrt_b: U256,
    amount0: U256,
    amount1: U256,
) -> RouterResult<u128> {
    let (sqrt_a, sqrt_b) = ordered(sqrt_a, sqrt_b);
    if sqrt_price <= sqrt_a {
        get_liquidity_for_amount0(sqrt_a, sqrt_b, amount0)
    } else if sqrt_price < sqrt_b {
        let liquidity0 = get_liquidity_for_amount0(sqrt_price, sqrt_b, amount0)?;
        let liquidity1 = get_liquidity_for_amount1(sqrt_a, sqrt_price, amount1)?;
        Ok(liquidity0.min(liquidity1))
    } else {
        get_liquidity_for_amount1(sqrt_a, sqrt_b, amount1)
    }
}

/// LiquidityAmounts.getAmountsForLiquidity, rounding as requested (up when minting)
pub fn get_amounts_for_liquidity(
    sqrt_price: U256,
    sqrt_a: U256,
    sqrt_b: U256,
    liquidity: u128,
    round_up: bool,
) -> RouterResult<(U256, U256)> {
    let (sqrt_a, sqrt_b) = ordered(sqrt_a, sqrt_b);
    if sqrt_price <= sqrt_a {
        Ok((get_amount0_delta(sqrt_a, sqrt_b, liquidity, round_up)?, U256::zero()))
    } else if sqrt_price < sqrt_b {
        Ok((
            get_amount0_delta(sqrt_price, sqrt_b, liquidity, round_up)?,
            get_amount1_delta(sqrt_a, sqrt_price, liquidity, round_up)?,
        ))
    } else {
        Ok((U256::zero(), get_amount1_delta(sqrt_a, sqrt_b, liquidity, round_up)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapStep {
    pub sqrt_price_next: U256,
    pub amount_in: U256,
    pub amount_out: U256,
    pub fee_amount: U256,
}

/// Exact-input swap inside a single liquidity range (SwapMath.computeSwapStep with
/// the target price at the protocol bound). Fails when the input would push the price
/// past the bound.
pub fn compute_swap_step(
    sqrt_price_current: U256,
    liquidity: u128,
    amount_remaining: U256,
    fee_pips: u32,
    zero_for_one: bool,
) -> RouterResult<SwapStep> {
    if liquidity == 0 {
        return Err(RouterError::Overflow("swap against zero liquidity"));
    }
    let amount_less_fee = apply_fee(amount_remaining, fee_pips)?;
    let liquidity_u256 = U256::from(liquidity);

    let sqrt_price_next = if zero_for_one {
        let numerator1 = liquidity_u256 << 96;
        match amount_less_fee
            .checked_mul(sqrt_price_current)
            .and_then(|product| numerator1.checked_add(product))
        {
            Some(denominator) => mul_div_rounding_up(numerator1, sqrt_price_current, denominator)
                .ok_or(RouterError::Overflow("next sqrt price"))?,
            None => {
                let denominator = numerator1 / sqrt_price_current + amount_less_fee;
                let (q, r) = numerator1.div_mod(denominator);
                if r.is_zero() {
                    q
                } else {
                    q + 1
                }
            }
        }
    } else {
        let quotient = mul_div(amount_less_fee, Q96, liquidity_u256)
            .ok_or(RouterError::Overflow("next sqrt price"))?;
        sqrt_price_current
            .checked_add(quotient)
            .ok_or(RouterError::Overflow("next sqrt price"))?
    };

    if sqrt_price_next <= MIN_SQRT_RATIO || sqrt_price_next >= MAX_SQRT_RATIO {
        return Err(RouterError::Overflow("swap exhausts pool liquidity"));
    }

    let amount_out = if zero_for_one {
        get_amount1_delta(sqrt_price_next, sqrt_price_current, liquidity, false)?
    } else {
        get_amount0_delta(sqrt_price_current, sqrt_price_next, liquidity, false)?
    };

    Ok(SwapStep {
        sqrt_price_next,
        amount_in: amount_less_fee,
        amount_out,
        fee_amount: amount_remaining - amount_less_fee,
    })
}

/// Integer square root (Babylonian), used to seed pool prices and V2 liquidity.
pub fn sqrt_u256(value: U256) -> U256 {
    if value.is_zero() {
        return U256::zero();
    }
    let mut x = value;
    let mut y = (x >> 1) + (x & U256::one());
    while y < x {
        x = y;
        y = (x + value / x) >> 1;
    }
    x
}

/// sqrt(amount1 / amount0) as Q64.96, i.e. the V3 initial price for a reserve ratio.
pub fn encode_price_sqrt(amount1: U256, amount0: U256) -> RouterResult<U256> {
    if amount0.is_zero() {
        return Err(RouterError::Overflow("zero reserve"));
    }
    let ratio_x192 = mul_div(amount1, U256::one() << 192, amount0)
        .ok_or(RouterError::Overflow("price ratio"))?;
    Ok(sqrt_u256(ratio_x192))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_bounds_are_exact() {
        assert_eq!(get_sqrt_ratio_at_tick(MIN_TICK).unwrap(), MIN_SQRT_RATIO);
        assert_eq!(get_sqrt_ratio_at_tick(MAX_TICK).unwrap(), MAX_SQRT_RATIO);
        assert_eq!(get_sqrt_ratio_at_tick(0).unwrap(), Q96);
        assert!(get_sqrt_ratio_at_tick(MAX_TICK + 1).is_err());
        assert!(get_sqrt_ratio_at_tick(MIN_TICK - 1).is_err());
    }

    #[test]
    fn test_known_tick_values() {
        assert_eq!(
            get_sqrt_ratio_at_tick(1).unwrap(),
            U256::from_dec_str("79232123823359799118286999568").unwrap()
        );
        assert_eq!(
            get_sqrt_ratio_at_tick(-1).unwrap(),
            U256::from_dec_str("79224201403219477170569942574").unwrap()
        );
    }

    #[test]
    fn test_tick_sqrt_conversion() {
        for tick in [MIN_TICK, -23028, -1, 0, 1, 100, 200_000, MAX_TICK - 1] {
            let sqrt_ratio = get_sqrt_ratio_at_tick(tick).unwrap();
            assert_eq!(get_tick_at_sqrt_ratio(sqrt_ratio).unwrap(), tick);
        }
        assert!(get_tick_at_sqrt_ratio(MAX_SQRT_RATIO).is_err());
    }

    #[test]
    fn test_quote_at_tick() {
        let low = Address::repeat_byte(1);
        let high = Address::repeat_byte(2);
        assert_eq!(get_quote_at_tick(0, 1000, low, high).unwrap(), U256::from(1000));
        assert_eq!(
            get_quote_at_tick(100, 1_000_000_000_000_000_000, low, high).unwrap(),
            U256::from_dec_str("1010049662092876568").unwrap()
        );
        assert_eq!(
            get_quote_at_tick(100, 1_000_000_000_000_000_000, high, low).unwrap(),
            U256::from_dec_str("990050328741209481").unwrap()
        );
    }

    #[test]
    fn test_liquidity_amounts_consistency() {
        let price = Q96;
        let lower = get_sqrt_ratio_at_tick(-600).unwrap();
        let upper = get_sqrt_ratio_at_tick(600).unwrap();
        let amount = U256::exp10(18);
        let liquidity = get_liquidity_for_amounts(price, lower, upper, amount, amount).unwrap();
        let (a0, a1) = get_amounts_for_liquidity(price, lower, upper, liquidity, true).unwrap();
        assert!(a0 <= amount && a1 <= amount);
        // symmetric range at price 1: both sides are used almost fully
        assert!(a0 > amount * 99 / 100 && a1 > amount * 99 / 100);
    }

    #[test]
    fn test_swap_step_respects_fee() {
        let liquidity = 1_000_000_000_000_000_000_000u128;
        let amount_in = U256::exp10(18);
        let step = compute_swap_step(Q96, liquidity, amount_in, 3000, true).unwrap();
        assert_eq!(step.fee_amount, U256::from(3_000_000_000_000_000u64));
        assert!(step.amount_out < step.amount_in);
        assert!(step.sqrt_price_next < Q96);

        let back = compute_swap_step(Q96, liquidity, amount_in, 3000, false).unwrap();
        assert!(back.sqrt_price_next > Q96);
        assert!(back.amount_out < amount_in);
    }

    #[test]
    fn test_sqrt_u256() {
        assert_eq!(sqrt_u256(U256::from(1_000_000)), U256::from(1000));
        assert_eq!(sqrt_u256(U256::from(99)), U256::from(9));
        assert_eq!(encode_price_sqrt(U256::one(), U256::one()).unwrap(), Q96);
    }
}
