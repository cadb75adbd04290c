//! Integer-only ratio helpers shared by the swap and liquidity engines.

use ethers::types::{U256, U512};

use crate::error::{RouterError, RouterResult};

/// `a * b / denominator` with a 512-bit intermediate. `None` on a zero denominator or
/// when the result does not fit in 256 bits.
pub fn mul_div(a: U256, b: U256, denominator: U256) -> Option<U256> {
    if denominator.is_zero() {
        return None;
    }
    let product: U512 = a.full_mul(b);
    let quotient = product / U512::from(denominator);
    U256::try_from(quotient).ok()
}

/// Like [`mul_div`] but rounds the quotient up.
pub fn mul_div_rounding_up(a: U256, b: U256, denominator: U256) -> Option<U256> {
    if denominator.is_zero() {
        return None;
    }
    let product: U512 = a.full_mul(b);
    let denominator = U512::from(denominator);
    let mut quotient = product / denominator;
    if !(product % denominator).is_zero() {
        quotient += U512::one();
    }
    U256::try_from(quotient).ok()
}

/// Splits `amount` into `(amount * ratio0 / (ratio0 + ratio1), amount - that)`.
///
/// The two parts always sum to `amount`, and a zero `ratio0` yields a zero first part.
pub fn divide_in_ratio(amount: U256, ratio0: U256, ratio1: U256) -> RouterResult<(U256, U256)> {
    let parts = divide_in_ratios(amount, &[ratio0, ratio1])?;
    Ok((parts[0], parts[1]))
}

/// N-way generalisation of [`divide_in_ratio`]: every part but the last is
/// `amount * ratio_i / total`, the last one takes the remainder.
pub fn divide_in_ratios(amount: U256, ratios: &[U256]) -> RouterResult<Vec<U256>> {
    let total = ratios
        .iter()
        .try_fold(U256::zero(), |acc, r| acc.checked_add(*r))
        .ok_or(RouterError::Overflow("ratio total"))?;
    if total.is_zero() {
        return Err(RouterError::ZeroTotalRatio);
    }

    let mut parts = Vec::with_capacity(ratios.len());
    let mut allocated = U256::zero();
    for (i, ratio) in ratios.iter().enumerate() {
        let part = if i + 1 == ratios.len() {
            amount - allocated
        } else {
            mul_div(amount, *ratio, total).ok_or(RouterError::Overflow("ratio split"))?
        };
        allocated += part;
        parts.push(part);
    }
    Ok(parts)
}

/// Narrows an amount to the 128-bit quantities some venues take.
pub fn to_u128(amount: U256) -> RouterResult<u128> {
    u128::try_from(amount).map_err(|_| RouterError::AmountOverflow(amount))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_divide_in_ratio_value_weighted() {
        let (a0, a1) =
            divide_in_ratio(U256::from(300), U256::from(1000), U256::from(2000)).unwrap();
        assert_eq!(a0, U256::from(100));
        assert_eq!(a1, U256::from(200));
    }

    #[test]
    fn test_divide_in_ratio_totals_exactly() {
        let cases = [
            (7u64, 1u64, 2u64),
            (1_000_003, 333, 777),
            (1, 5, 5),
            (0, 3, 9),
            (u32::MAX as u64, 2, 3),
        ];
        for (amount, r0, r1) in cases {
            let (a0, a1) =
                divide_in_ratio(U256::from(amount), U256::from(r0), U256::from(r1)).unwrap();
            assert_eq!(a0 + a1, U256::from(amount), "split of {amount} must total exactly");
        }
    }

    #[test]
    fn test_zero_ratio0_gets_nothing() {
        let (a0, a1) = divide_in_ratio(U256::from(500), U256::zero(), U256::from(3)).unwrap();
        assert!(a0.is_zero());
        assert_eq!(a1, U256::from(500));
    }

    #[test]
    fn test_zero_total_ratio_fails() {
        assert!(matches!(
            divide_in_ratio(U256::from(500), U256::zero(), U256::zero()),
            Err(RouterError::ZeroTotalRatio)
        ));
    }

    #[test]
    fn test_three_way_split() {
        let parts =
            divide_in_ratios(U256::from(1000), &[U256::from(1), U256::from(1), U256::from(1)])
                .unwrap();
        assert_eq!(parts, vec![U256::from(333), U256::from(333), U256::from(334)]);
    }

    #[test]
    fn test_mul_div_wide_intermediate() {
        let big = U256::MAX / 2;
        assert_eq!(mul_div(big, U256::from(4), U256::from(8)), Some(big / 2));
        assert_eq!(mul_div(U256::one(), U256::one(), U256::zero()), None);
        assert_eq!(
            mul_div_rounding_up(U256::from(10), U256::from(1), U256::from(3)),
            Some(U256::from(4))
        );
    }

    #[test]
    fn test_to_u128() {
        assert_eq!(to_u128(U256::from(42)).unwrap(), 42u128);
        assert!(to_u128(U256::MAX).is_err());
    }
}
