//! ABI helpers: selectors, packed V3 paths, Balancer user data, Ambient liquidity
//! commands and flavour-specific V3 router calldata.

use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Bytes, I256, U256};
use ethers::utils::id;

use crate::chain::{ExactInputParams, ExactInputSingleParams};
use crate::error::{RouterError, RouterResult};
use crate::venue::V3Flavor;

pub const ERC20_TRANSFER: &str = "transfer(address,uint256)";
pub const ERC20_TRANSFER_FROM: &str = "transferFrom(address,address,uint256)";
pub const ERC20_APPROVE: &str = "approve(address,uint256)";
pub const ERC20_BALANCE_OF: &str = "balanceOf(address)";
pub const ERC20_TOTAL_SUPPLY: &str = "totalSupply()";
pub const ERC20_DECIMALS: &str = "decimals()";

pub const V2_GET_PAIR: &str = "getPair(address,address)";
pub const V2_GET_RESERVES: &str = "getReserves()";
pub const PAIR_TOKEN0: &str = "token0()";
pub const PAIR_TOKEN1: &str = "token1()";
pub const V2_GET_AMOUNTS_OUT: &str = "getAmountsOut(uint256,address[])";
pub const V2_SWAP_EXACT_TOKENS_FOR_TOKENS: &str =
    "swapExactTokensForTokens(uint256,uint256,address[],address,uint256)";
pub const V2_ADD_LIQUIDITY: &str =
    "addLiquidity(address,address,uint256,uint256,uint256,uint256,address,uint256)";
pub const V2_REMOVE_LIQUIDITY: &str =
    "removeLiquidity(address,address,uint256,uint256,uint256,address,uint256)";

pub const V3_GET_POOL: &str = "getPool(address,address,uint24)";
pub const V3_LIQUIDITY: &str = "liquidity()";
pub const V3_SLOT0: &str = "slot0()";
pub const V3_FEE: &str = "fee()";
pub const V3_EXACT_INPUT_SINGLE: &str =
    "exactInputSingle((address,address,uint24,address,uint256,uint256,uint256,uint160))";
pub const V3_EXACT_INPUT: &str = "exactInput((bytes,address,uint256,uint256,uint256))";
pub const PANCAKE_EXACT_INPUT_SINGLE: &str =
    "exactInputSingle((address,address,uint24,address,uint256,uint256,uint160))";
pub const PANCAKE_EXACT_INPUT: &str = "exactInput((bytes,address,uint256,uint256))";
pub const NPM_MINT: &str =
    "mint((address,address,uint24,int24,int24,uint256,uint256,uint256,uint256,address,uint256))";
pub const NPM_INCREASE_LIQUIDITY: &str =
    "increaseLiquidity((uint256,uint256,uint256,uint256,uint256,uint256))";
pub const NPM_DECREASE_LIQUIDITY: &str =
    "decreaseLiquidity((uint256,uint128,uint256,uint256,uint256))";
pub const NPM_COLLECT: &str = "collect((uint256,address,uint128,uint128))";
pub const NPM_POSITIONS: &str = "positions(uint256)";
pub const NPM_TRANSFER_FROM: &str = "safeTransferFrom(address,address,uint256)";

pub const BALANCER_GET_POOL_TOKENS: &str = "getPoolTokens(bytes32)";
pub const BALANCER_GET_POOL: &str = "getPool(bytes32)";
pub const BALANCER_SWAP: &str =
    "swap((bytes32,uint8,address,address,uint256,bytes),(address,bool,address,bool),uint256,uint256)";
pub const BALANCER_QUERY_SWAP: &str =
    "querySwap((bytes32,uint8,address,address,uint256,bytes),(address,bool,address,bool))";
pub const BALANCER_JOIN_POOL: &str =
    "joinPool(bytes32,address,address,(address[],uint256[],bytes,bool))";
pub const BALANCER_EXIT_POOL: &str =
    "exitPool(bytes32,address,address,(address[],uint256[],bytes,bool))";

pub const AMBIENT_SWAP: &str =
    "swap(address,address,uint256,bool,bool,uint128,uint16,uint128,uint128,uint8)";
pub const AMBIENT_USER_CMD: &str = "userCmd(uint16,bytes)";
pub const AMBIENT_QUERY_LIQUIDITY: &str = "queryLiquidity(address,address,uint256)";
pub const AMBIENT_QUERY_PRICE: &str = "queryPrice(address,address,uint256)";
pub const AMBIENT_QUERY_AMBIENT_TOKENS: &str =
    "queryAmbientTokens(address,address,address,uint256)";
pub const AMBIENT_CALC_IMPACT: &str =
    "calcImpact(address,address,uint256,bool,bool,uint128,uint16,uint128)";

/// Ambient proxy path for liquidity commands.
pub const AMBIENT_LP_PROXY_PATH: u16 = 128;
/// Ambient square-root price bounds (Q64.64).
pub const AMBIENT_MIN_SQRT_PRICE: u128 = 65538;
pub const AMBIENT_MAX_SQRT_PRICE: u128 = 21267430153580247136652501917186561137;

/// Balancer weighted-pool join / exit kinds used by the router.
pub const JOIN_KIND_EXACT_TOKENS_IN_FOR_BPT_OUT: u8 = 1;
pub const EXIT_KIND_EXACT_BPT_IN_FOR_TOKENS_OUT: u8 = 1;

/// 4-byte function selector of a canonical signature.
pub fn selector(signature: &str) -> [u8; 4] {
    id(signature)
}

/// `selector ++ abi.encode(tokens)`.
pub fn calldata(signature: &str, tokens: &[Token]) -> Bytes {
    let mut data = selector(signature).to_vec();
    data.extend(abi::encode(tokens));
    Bytes::from(data)
}

/// Decodes return data against `types`.
pub fn decode_output(types: &[ParamType], data: &[u8]) -> anyhow::Result<Vec<Token>> {
    abi::decode(types, data).map_err(|e| anyhow::anyhow!("failed to decode return data: {}", e))
}

pub fn int_token(value: i32) -> Token {
    Token::Int(I256::from(value).into_raw())
}

pub fn uint_token(value: impl Into<U256>) -> Token {
    Token::Uint(value.into())
}

/// Packs `token0 | fee0 | token1 | fee1 | ... | tokenN` for V3 multi-hop routers.
pub fn encode_v3_path(tokens: &[Address], fees: &[u32]) -> RouterResult<Bytes> {
    if tokens.len() < 2 {
        return Err(RouterError::PathTooShort(tokens.len()));
    }
    if fees.len() + 1 != tokens.len() {
        return Err(RouterError::InvalidRoute(format!(
            "{} tokens need {} fees, got {}",
            tokens.len(),
            tokens.len() - 1,
            fees.len()
        )));
    }

    let mut packed = Vec::with_capacity(tokens.len() * 20 + fees.len() * 3);
    for (i, token) in tokens.iter().enumerate() {
        packed.extend_from_slice(token.as_bytes());
        if let Some(fee) = fees.get(i) {
            if *fee >= 1 << 24 {
                return Err(RouterError::Overflow("uint24 fee"));
            }
            packed.extend_from_slice(&fee.to_be_bytes()[1..]);
        }
    }
    Ok(Bytes::from(packed))
}

/// Inverse of [`encode_v3_path`].
pub fn decode_v3_path(path: &[u8]) -> RouterResult<(Vec<Address>, Vec<u32>)> {
    if path.len() < 43 || (path.len() - 20) % 23 != 0 {
        return Err(RouterError::InvalidRoute(format!(
            "malformed packed path of {} bytes",
            path.len()
        )));
    }
    let hops = (path.len() - 20) / 23;
    let mut tokens = Vec::with_capacity(hops + 1);
    let mut fees = Vec::with_capacity(hops);
    for hop in 0..hops {
        let offset = hop * 23;
        tokens.push(Address::from_slice(&path[offset..offset + 20]));
        let fee = &path[offset + 20..offset + 23];
        fees.push(u32::from_be_bytes([0, fee[0], fee[1], fee[2]]));
    }
    tokens.push(Address::from_slice(&path[path.len() - 20..]));
    Ok((tokens, fees))
}

/// V3 router `exactInputSingle` calldata for the router flavour.
pub fn v3_exact_input_single(flavor: V3Flavor, params: &ExactInputSingleParams) -> Bytes {
    let mut fields = vec![
        Token::Address(params.token_in),
        Token::Address(params.token_out),
        uint_token(params.fee),
        Token::Address(params.recipient),
    ];
    if flavor == V3Flavor::Canonical {
        fields.push(Token::Uint(params.deadline));
    }
    fields.extend([
        Token::Uint(params.amount_in),
        Token::Uint(params.amount_out_minimum),
        Token::Uint(U256::zero()), // sqrtPriceLimitX96
    ]);
    let signature = match flavor {
        V3Flavor::Canonical => V3_EXACT_INPUT_SINGLE,
        V3Flavor::PancakeFork => PANCAKE_EXACT_INPUT_SINGLE,
    };
    calldata(signature, &[Token::Tuple(fields)])
}

/// V3 router `exactInput` calldata for the router flavour.
pub fn v3_exact_input(flavor: V3Flavor, params: &ExactInputParams) -> Bytes {
    let mut fields = vec![
        Token::Bytes(params.path.to_vec()),
        Token::Address(params.recipient),
    ];
    if flavor == V3Flavor::Canonical {
        fields.push(Token::Uint(params.deadline));
    }
    fields.extend([
        Token::Uint(params.amount_in),
        Token::Uint(params.amount_out_minimum),
    ]);
    let signature = match flavor {
        V3Flavor::Canonical => V3_EXACT_INPUT,
        V3Flavor::PancakeFork => PANCAKE_EXACT_INPUT,
    };
    calldata(signature, &[Token::Tuple(fields)])
}

/// Parameter types of `slot0()` for the pool flavour. PancakeSwap widens
/// `feeProtocol` from `uint8` to `uint32`.
pub fn slot0_output_types(flavor: V3Flavor) -> Vec<ParamType> {
    let fee_protocol = match flavor {
        V3Flavor::Canonical => ParamType::Uint(8),
        V3Flavor::PancakeFork => ParamType::Uint(32),
    };
    vec![
        ParamType::Uint(160),
        ParamType::Int(24),
        ParamType::Uint(16),
        ParamType::Uint(16),
        ParamType::Uint(16),
        fee_protocol,
        ParamType::Bool,
    ]
}

/// Decoded weighted-pool join / exit user data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BalancerUserData {
    ExactTokensInForBptOut { amounts_in: Vec<U256>, min_bpt_out: U256 },
    ExactBptInForTokensOut { bpt_amount_in: U256 },
}

/// `abi.encode(EXACT_TOKENS_IN_FOR_BPT_OUT, amountsIn, minimumBPT)`.
pub fn encode_join_exact_tokens_in(amounts_in: &[U256], min_bpt_out: U256) -> Bytes {
    Bytes::from(abi::encode(&[
        uint_token(JOIN_KIND_EXACT_TOKENS_IN_FOR_BPT_OUT),
        Token::Array(amounts_in.iter().copied().map(Token::Uint).collect()),
        Token::Uint(min_bpt_out),
    ]))
}

/// `abi.encode(EXACT_BPT_IN_FOR_TOKENS_OUT, bptAmountIn)`.
pub fn encode_exit_exact_bpt_in(bpt_amount_in: U256) -> Bytes {
    Bytes::from(abi::encode(&[
        uint_token(EXIT_KIND_EXACT_BPT_IN_FOR_TOKENS_OUT),
        Token::Uint(bpt_amount_in),
    ]))
}

pub fn decode_join_user_data(data: &[u8]) -> anyhow::Result<BalancerUserData> {
    let tokens = decode_output(
        &[
            ParamType::Uint(256),
            ParamType::Array(Box::new(ParamType::Uint(256))),
            ParamType::Uint(256),
        ],
        data,
    )?;
    match tokens.as_slice() {
        [Token::Uint(kind), Token::Array(amounts), Token::Uint(min_bpt_out)]
            if *kind == U256::from(JOIN_KIND_EXACT_TOKENS_IN_FOR_BPT_OUT) =>
        {
            let amounts_in = amounts
                .iter()
                .map(|t| t.clone().into_uint())
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| anyhow::anyhow!("join amounts must be uint256"))?;
            Ok(BalancerUserData::ExactTokensInForBptOut {
                amounts_in,
                min_bpt_out: *min_bpt_out,
            })
        }
        _ => Err(anyhow::anyhow!("unsupported join kind")),
    }
}

pub fn decode_exit_user_data(data: &[u8]) -> anyhow::Result<BalancerUserData> {
    let tokens = decode_output(&[ParamType::Uint(256), ParamType::Uint(256)], data)?;
    match tokens.as_slice() {
        [Token::Uint(kind), Token::Uint(bpt_amount_in)]
            if *kind == U256::from(EXIT_KIND_EXACT_BPT_IN_FOR_TOKENS_OUT) =>
        {
            Ok(BalancerUserData::ExactBptInForTokensOut {
                bpt_amount_in: *bpt_amount_in,
            })
        }
        _ => Err(anyhow::anyhow!("unsupported exit kind")),
    }
}

/// Ambient liquidity command codes on the LP proxy path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AmbientLiqCode {
    /// Full-range mint sized by a base-token quantity.
    MintAmbientBase = 31,
    /// Full-range burn sized in liquidity units.
    BurnAmbientLiq = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmbientLiquidityCmd {
    pub code: AmbientLiqCode,
    pub base: Address,
    pub quote: Address,
    pub pool_idx: u64,
    pub qty: u128,
    pub limit_lower: u128,
    pub limit_higher: u128,
}

/// `abi.encode(code, base, quote, poolIdx, bidTick, askTick, qty, limitLower,
/// limitHigher, reserveFlags, lpConduit)` with zero ticks for full-range positions.
pub fn encode_ambient_liquidity_cmd(cmd: &AmbientLiquidityCmd) -> Bytes {
    Bytes::from(abi::encode(&[
        uint_token(cmd.code as u8),
        Token::Address(cmd.base),
        Token::Address(cmd.quote),
        uint_token(cmd.pool_idx),
        int_token(0),
        int_token(0),
        uint_token(cmd.qty),
        uint_token(cmd.limit_lower),
        uint_token(cmd.limit_higher),
        uint_token(0u8),
        Token::Address(Address::zero()),
    ]))
}

pub fn decode_ambient_liquidity_cmd(data: &[u8]) -> anyhow::Result<AmbientLiquidityCmd> {
    let tokens = decode_output(
        &[
            ParamType::Uint(8),
            ParamType::Address,
            ParamType::Address,
            ParamType::Uint(256),
            ParamType::Int(24),
            ParamType::Int(24),
            ParamType::Uint(128),
            ParamType::Uint(128),
            ParamType::Uint(128),
            ParamType::Uint(8),
            ParamType::Address,
        ],
        data,
    )?;
    let uint = |i: usize| -> anyhow::Result<U256> {
        tokens
            .get(i)
            .cloned()
            .and_then(Token::into_uint)
            .ok_or_else(|| anyhow::anyhow!("ambient command field {} is not a uint", i))
    };
    let address = |i: usize| -> anyhow::Result<Address> {
        tokens
            .get(i)
            .cloned()
            .and_then(Token::into_address)
            .ok_or_else(|| anyhow::anyhow!("ambient command field {} is not an address", i))
    };

    let code = match uint(0)?.low_u32() {
        31 => AmbientLiqCode::MintAmbientBase,
        4 => AmbientLiqCode::BurnAmbientLiq,
        other => return Err(anyhow::anyhow!("unsupported ambient liquidity code {}", other)),
    };
    Ok(AmbientLiquidityCmd {
        code,
        base: address(1)?,
        quote: address(2)?,
        pool_idx: uint(3)?.low_u64(),
        qty: uint(6)?.low_u128(),
        limit_lower: uint(7)?.low_u128(),
        limit_higher: uint(8)?.low_u128(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_selectors() {
        assert_eq!(hex::encode(selector(ERC20_TRANSFER)), "a9059cbb");
        assert_eq!(hex::encode(selector(ERC20_APPROVE)), "095ea7b3");
        assert_eq!(hex::encode(selector(ERC20_BALANCE_OF)), "70a08231");
        assert_eq!(hex::encode(selector(V3_SLOT0)), "3850c7bd");
        assert_eq!(hex::encode(selector(V2_GET_RESERVES)), "0902f1ac");
        assert_eq!(hex::encode(selector(V2_SWAP_EXACT_TOKENS_FOR_TOKENS)), "38ed1739");
        assert_eq!(hex::encode(selector(V3_EXACT_INPUT_SINGLE)), "414bf389");
        assert_eq!(hex::encode(selector(V3_EXACT_INPUT)), "c04b8d59");
        assert_eq!(hex::encode(selector(PANCAKE_EXACT_INPUT_SINGLE)), "04e45aaf");
        assert_eq!(hex::encode(selector(PANCAKE_EXACT_INPUT)), "b858183f");
    }

    #[test]
    fn test_v3_path_layout() {
        let a = Address::repeat_byte(0xaa);
        let b = Address::repeat_byte(0xbb);
        let c = Address::repeat_byte(0xcc);
        let path = encode_v3_path(&[a, b, c], &[500, 3000]).unwrap();
        assert_eq!(path.len(), 66);
        assert_eq!(&path[20..23], &[0x00, 0x01, 0xf4]);
        assert_eq!(&path[43..46], &[0x00, 0x0b, 0xb8]);

        let (tokens, fees) = decode_v3_path(&path).unwrap();
        assert_eq!(tokens, vec![a, b, c]);
        assert_eq!(fees, vec![500, 3000]);
    }

    #[test]
    fn test_v3_path_rejects_mismatched_fees() {
        let a = Address::repeat_byte(1);
        assert!(matches!(
            encode_v3_path(&[a], &[]),
            Err(RouterError::PathTooShort(1))
        ));
        assert!(encode_v3_path(&[a, a], &[500, 500]).is_err());
        assert!(decode_v3_path(&[0u8; 42]).is_err());
    }

    #[test]
    fn test_pancake_calldata_has_no_deadline() {
        let params = ExactInputSingleParams {
            token_in: Address::repeat_byte(1),
            token_out: Address::repeat_byte(2),
            fee: 2500,
            recipient: Address::repeat_byte(3),
            deadline: U256::from(1_700_000_000u64),
            amount_in: U256::from(1000),
            amount_out_minimum: U256::zero(),
        };
        let canonical = v3_exact_input_single(V3Flavor::Canonical, &params);
        let pancake = v3_exact_input_single(V3Flavor::PancakeFork, &params);
        assert_eq!(canonical.len(), 4 + 8 * 32);
        assert_eq!(pancake.len(), 4 + 7 * 32);
        assert_eq!(&pancake[..4], &selector(PANCAKE_EXACT_INPUT_SINGLE));
    }

    #[test]
    fn test_balancer_user_data() {
        let amounts = vec![U256::from(100), U256::from(200)];
        let join = encode_join_exact_tokens_in(&amounts, U256::zero());
        assert_eq!(
            decode_join_user_data(&join).unwrap(),
            BalancerUserData::ExactTokensInForBptOut {
                amounts_in: amounts,
                min_bpt_out: U256::zero()
            }
        );
        let exit = encode_exit_exact_bpt_in(U256::from(7));
        assert_eq!(exit.len(), 64);
        assert_eq!(
            decode_exit_user_data(&exit).unwrap(),
            BalancerUserData::ExactBptInForTokensOut {
                bpt_amount_in: U256::from(7)
            }
        );
        assert!(decode_join_user_data(&exit).is_err());
    }

    #[test]
    fn test_ambient_liquidity_cmd() {
        let cmd = AmbientLiquidityCmd {
            code: AmbientLiqCode::MintAmbientBase,
            base: Address::repeat_byte(1),
            quote: Address::repeat_byte(2),
            pool_idx: 420,
            qty: 5_000,
            limit_lower: AMBIENT_MIN_SQRT_PRICE,
            limit_higher: AMBIENT_MAX_SQRT_PRICE,
        };
        let data = encode_ambient_liquidity_cmd(&cmd);
        assert_eq!(data.len(), 11 * 32);
        assert_eq!(data[31], 31);
        assert_eq!(decode_ambient_liquidity_cmd(&data).unwrap(), cmd);
    }
}
