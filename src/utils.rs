// src/utils.rs
// Small helpers shared across the router

use ethers::types::{Address, U256};

/// Orders a token pair the way factories key their pools (lower address first).
pub fn sort_tokens(token_a: Address, token_b: Address) -> (Address, Address) {
    if token_a < token_b {
        (token_a, token_b)
    } else {
        (token_b, token_a)
    }
}

/// Parses a decimal or `0x`-prefixed hex amount.
pub fn parse_amount(value: &str) -> anyhow::Result<U256> {
    let value = value.trim().replace('_', "");
    if let Some(hex) = value.strip_prefix("0x") {
        U256::from_str_radix(hex, 16).map_err(|e| anyhow::anyhow!("invalid hex amount {}: {}", value, e))
    } else {
        U256::from_dec_str(&value).map_err(|e| anyhow::anyhow!("invalid amount {}: {}", value, e))
    }
}

/// Formats a raw token amount with `decimals` fractional digits, trimming trailing zeros.
/// Decimals whose unit does not fit a U256 print the raw amount.
pub fn format_units(amount: U256, decimals: u8) -> String {
    let Some(unit) = U256::from(10u8).checked_pow(U256::from(decimals)) else {
        return amount.to_string();
    };
    let whole = amount / unit;
    let fraction = amount % unit;
    if fraction.is_zero() {
        return whole.to_string();
    }
    let fraction = format!("{:0>width$}", fraction.to_string(), width = decimals as usize);
    format!("{}.{}", whole, fraction.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_tokens() {
        let low = Address::repeat_byte(1);
        let high = Address::repeat_byte(2);
        assert_eq!(sort_tokens(high, low), (low, high));
        assert_eq!(sort_tokens(low, high), (low, high));
    }

    #[test]
    fn test_parse_and_format_amounts() {
        assert_eq!(parse_amount("1_000").unwrap(), U256::from(1000));
        assert_eq!(parse_amount("0x10").unwrap(), U256::from(16));
        assert!(parse_amount("ten").is_err());
        assert_eq!(format_units(U256::from(1_500_000u64), 6), "1.5");
        assert_eq!(format_units(U256::exp10(18) * 3, 18), "3");
        assert_eq!(format_units(U256::from(42), 78), "42");
        assert_eq!(format_units(U256::from(42), u8::MAX), "42");
    }
}
