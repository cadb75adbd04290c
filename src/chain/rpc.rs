//! JSON-RPC backed chain.
//!
//! Reads are `eth_call`s with hand-encoded calldata. Writes are first executed as an
//! `eth_call` to capture their return data, then sent with `eth_sendTransaction` from
//! the configured account, which must be unlocked (or impersonated) on the node.
//! Checkpoints map onto `evm_snapshot` / `evm_revert`, so writes are meant for forked
//! dev nodes (anvil, hardhat).

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use ethers::abi::{ParamType, Token};
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::{Address, BlockNumber, Bytes, TransactionRequest, H256, I256, U256};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use super::{
    AmbientApi, AmbientFlows, AmbientPoolKey, AmbientSwap, BalancerApi, BalancerSingleSwap, BlockApi, Chain,
    Checkpoint, DecreaseLiquidityParams, Erc20Api, ExactInputParams, ExactInputSingleParams,
    ExitPoolRequest, FundManagement, IncreaseLiquidityParams, JoinPoolRequest, MintParams,
    MintedPosition, PositionInfo, Slot0, UniswapV2Api, UniswapV3Api, V2AddLiquidity,
    V2RemoveLiquidity,
};
use crate::encoding::{self as enc, calldata, decode_output, int_token, uint_token};
use crate::venue::V3Flavor;

pub struct EthersChain {
    provider: Arc<Provider<Http>>,
    account: Address,
    call_timeout: Duration,
}

impl EthersChain {
    pub fn new(rpc_url: &str, account: Address, call_timeout: Duration) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .with_context(|| format!("invalid RPC url {}", rpc_url))?;
        info!("Connected RPC chain at {} acting as {:?}", rpc_url, account);
        Ok(Self {
            provider: Arc::new(provider),
            account,
            call_timeout,
        })
    }

    pub fn provider(&self) -> Arc<Provider<Http>> {
        self.provider.clone()
    }

    fn request(&self, to: Address, data: Bytes) -> TransactionRequest {
        TransactionRequest::new().from(self.account).to(to).data(data)
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        let tx = self.request(to, data).into();
        match timeout(self.call_timeout, self.provider.call(&tx, None)).await {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(e)) => Err(anyhow!("eth_call to {:?} failed: {}", to, e)),
            Err(_) => Err(anyhow!("eth_call to {:?} timed out after {:?}", to, self.call_timeout)),
        }
    }

    async fn call_decode(&self, to: Address, data: Bytes, types: &[ParamType]) -> Result<Vec<Token>> {
        let bytes = self.call(to, data).await?;
        decode_output(types, &bytes)
    }

    async fn send(&self, to: Address, data: Bytes) -> Result<()> {
        let tx = self.request(to, data);
        let pending = self
            .provider
            .send_transaction(tx, None)
            .await
            .map_err(|e| anyhow!("eth_sendTransaction to {:?} failed: {}", to, e))?;
        let hash = pending.tx_hash();
        let receipt = pending
            .await
            .map_err(|e| anyhow!("waiting for {:?} failed: {}", hash, e))?
            .ok_or_else(|| anyhow!("transaction {:?} dropped", hash))?;
        if receipt.status != Some(1u64.into()) {
            warn!("Transaction {:?} to {:?} reverted", hash, to);
            bail!("transaction {:?} reverted", hash);
        }
        debug!("Transaction {:?} to {:?} mined in block {:?}", hash, to, receipt.block_number);
        Ok(())
    }

    /// Simulates the write for its return data, then sends it.
    async fn execute(&self, to: Address, data: Bytes, types: &[ParamType]) -> Result<Vec<Token>> {
        let output = self.call_decode(to, data.clone(), types).await?;
        self.send(to, data).await?;
        Ok(output)
    }
}

fn uint_at(tokens: &[Token], i: usize) -> Result<U256> {
    tokens
        .get(i)
        .cloned()
        .and_then(Token::into_uint)
        .ok_or_else(|| anyhow!("return value {} is not a uint", i))
}

fn int_at(tokens: &[Token], i: usize) -> Result<I256> {
    tokens
        .get(i)
        .cloned()
        .and_then(Token::into_int)
        .map(I256::from_raw)
        .ok_or_else(|| anyhow!("return value {} is not an int", i))
}

fn address_at(tokens: &[Token], i: usize) -> Result<Address> {
    tokens
        .get(i)
        .cloned()
        .and_then(Token::into_address)
        .ok_or_else(|| anyhow!("return value {} is not an address", i))
}

fn uints_at(tokens: &[Token], i: usize) -> Result<Vec<U256>> {
    tokens
        .get(i)
        .cloned()
        .and_then(Token::into_array)
        .and_then(|items| items.into_iter().map(Token::into_uint).collect::<Option<Vec<_>>>())
        .ok_or_else(|| anyhow!("return value {} is not a uint array", i))
}

fn addresses_at(tokens: &[Token], i: usize) -> Result<Vec<Address>> {
    tokens
        .get(i)
        .cloned()
        .and_then(Token::into_array)
        .and_then(|items| items.into_iter().map(Token::into_address).collect::<Option<Vec<_>>>())
        .ok_or_else(|| anyhow!("return value {} is not an address array", i))
}

fn u128_at(tokens: &[Token], i: usize) -> Result<u128> {
    let value = uint_at(tokens, i)?;
    u128::try_from(value).map_err(|_| anyhow!("return value {} exceeds uint128", i))
}

fn address_array(addresses: &[Address]) -> Token {
    Token::Array(addresses.iter().copied().map(Token::Address).collect())
}

fn uint_array(values: &[U256]) -> Token {
    Token::Array(values.iter().copied().map(Token::Uint).collect())
}

fn single_swap_token(swap: &BalancerSingleSwap) -> Token {
    Token::Tuple(vec![
        Token::FixedBytes(swap.pool_id.as_bytes().to_vec()),
        uint_token(0u8), // GIVEN_IN
        Token::Address(swap.asset_in),
        Token::Address(swap.asset_out),
        Token::Uint(swap.amount),
        Token::Bytes(Vec::new()),
    ])
}

fn funds_token(funds: FundManagement) -> Token {
    Token::Tuple(vec![
        Token::Address(funds.sender),
        Token::Bool(false),
        Token::Address(funds.recipient),
        Token::Bool(false),
    ])
}

fn pool_key_tokens(pool: &AmbientPoolKey) -> [Token; 3] {
    [
        Token::Address(pool.base),
        Token::Address(pool.quote),
        uint_token(pool.pool_idx),
    ]
}

fn ambient_swap_tokens(swap: &AmbientSwap) -> Vec<Token> {
    let mut tokens = pool_key_tokens(&swap.pool).to_vec();
    tokens.extend([
        Token::Bool(swap.is_buy),
        Token::Bool(swap.in_base_qty),
        uint_token(swap.qty),
        uint_token(0u16), // tip
        uint_token(swap.limit_price),
    ]);
    tokens
}

fn flows_from(tokens: &[Token]) -> Result<AmbientFlows> {
    Ok(AmbientFlows {
        base_flow: int_at(tokens, 0)?,
        quote_flow: int_at(tokens, 1)?,
    })
}

#[async_trait]
impl Erc20Api for EthersChain {
    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256> {
        let data = calldata(enc::ERC20_BALANCE_OF, &[Token::Address(owner)]);
        uint_at(&self.call_decode(token, data, &[ParamType::Uint(256)]).await?, 0)
    }

    async fn total_supply(&self, token: Address) -> Result<U256> {
        let data = calldata(enc::ERC20_TOTAL_SUPPLY, &[]);
        uint_at(&self.call_decode(token, data, &[ParamType::Uint(256)]).await?, 0)
    }

    async fn decimals(&self, token: Address) -> Result<u8> {
        let data = calldata(enc::ERC20_DECIMALS, &[]);
        let decimals = uint_at(&self.call_decode(token, data, &[ParamType::Uint(8)]).await?, 0)?;
        u8::try_from(decimals.low_u32()).map_err(|_| anyhow!("invalid decimals for {:?}", token))
    }

    async fn transfer(&self, token: Address, to: Address, amount: U256) -> Result<()> {
        self.send(token, calldata(enc::ERC20_TRANSFER, &[Token::Address(to), Token::Uint(amount)]))
            .await
    }

    async fn transfer_from(&self, token: Address, from: Address, to: Address, amount: U256) -> Result<()> {
        let data = calldata(
            enc::ERC20_TRANSFER_FROM,
            &[Token::Address(from), Token::Address(to), Token::Uint(amount)],
        );
        self.send(token, data).await
    }

    async fn approve(&self, token: Address, spender: Address, amount: U256) -> Result<()> {
        self.send(token, calldata(enc::ERC20_APPROVE, &[Token::Address(spender), Token::Uint(amount)]))
            .await
    }
}

#[async_trait]
impl UniswapV2Api for EthersChain {
    async fn v2_get_pair(&self, factory: Address, token_a: Address, token_b: Address) -> Result<Address> {
        let data = calldata(enc::V2_GET_PAIR, &[Token::Address(token_a), Token::Address(token_b)]);
        address_at(&self.call_decode(factory, data, &[ParamType::Address]).await?, 0)
    }

    async fn v2_get_reserves(&self, pair: Address) -> Result<(U256, U256)> {
        let data = calldata(enc::V2_GET_RESERVES, &[]);
        let types = [ParamType::Uint(112), ParamType::Uint(112), ParamType::Uint(32)];
        let out = self.call_decode(pair, data, &types).await?;
        Ok((uint_at(&out, 0)?, uint_at(&out, 1)?))
    }

    async fn v2_pair_tokens(&self, pair: Address) -> Result<(Address, Address)> {
        let token0 = self
            .call_decode(pair, calldata(enc::PAIR_TOKEN0, &[]), &[ParamType::Address])
            .await?;
        let token1 = self
            .call_decode(pair, calldata(enc::PAIR_TOKEN1, &[]), &[ParamType::Address])
            .await?;
        Ok((address_at(&token0, 0)?, address_at(&token1, 0)?))
    }

    async fn v2_get_amounts_out(&self, router: Address, amount_in: U256, path: &[Address]) -> Result<Vec<U256>> {
        let data = calldata(enc::V2_GET_AMOUNTS_OUT, &[Token::Uint(amount_in), address_array(path)]);
        let types = [ParamType::Array(Box::new(ParamType::Uint(256)))];
        uints_at(&self.call_decode(router, data, &types).await?, 0)
    }

    async fn v2_swap_exact_tokens_for_tokens(
        &self,
        router: Address,
        amount_in: U256,
        amount_out_min: U256,
        path: &[Address],
        to: Address,
        deadline: U256,
    ) -> Result<Vec<U256>> {
        let data = calldata(
            enc::V2_SWAP_EXACT_TOKENS_FOR_TOKENS,
            &[
                Token::Uint(amount_in),
                Token::Uint(amount_out_min),
                address_array(path),
                Token::Address(to),
                Token::Uint(deadline),
            ],
        );
        let types = [ParamType::Array(Box::new(ParamType::Uint(256)))];
        uints_at(&self.execute(router, data, &types).await?, 0)
    }

    async fn v2_add_liquidity(&self, router: Address, params: &V2AddLiquidity) -> Result<(U256, U256, U256)> {
        let data = calldata(
            enc::V2_ADD_LIQUIDITY,
            &[
                Token::Address(params.token_a),
                Token::Address(params.token_b),
                Token::Uint(params.amount_a_desired),
                Token::Uint(params.amount_b_desired),
                Token::Uint(params.amount_a_min),
                Token::Uint(params.amount_b_min),
                Token::Address(params.to),
                Token::Uint(params.deadline),
            ],
        );
        let types = [ParamType::Uint(256), ParamType::Uint(256), ParamType::Uint(256)];
        let out = self.execute(router, data, &types).await?;
        Ok((uint_at(&out, 0)?, uint_at(&out, 1)?, uint_at(&out, 2)?))
    }

    async fn v2_remove_liquidity(&self, router: Address, params: &V2RemoveLiquidity) -> Result<(U256, U256)> {
        let data = calldata(
            enc::V2_REMOVE_LIQUIDITY,
            &[
                Token::Address(params.token_a),
                Token::Address(params.token_b),
                Token::Uint(params.liquidity),
                Token::Uint(params.amount_a_min),
                Token::Uint(params.amount_b_min),
                Token::Address(params.to),
                Token::Uint(params.deadline),
            ],
        );
        let out = self
            .execute(router, data, &[ParamType::Uint(256), ParamType::Uint(256)])
            .await?;
        Ok((uint_at(&out, 0)?, uint_at(&out, 1)?))
    }
}

#[async_trait]
impl UniswapV3Api for EthersChain {
    async fn v3_get_pool(&self, factory: Address, token_a: Address, token_b: Address, fee: u32) -> Result<Address> {
        let data = calldata(
            enc::V3_GET_POOL,
            &[Token::Address(token_a), Token::Address(token_b), uint_token(fee)],
        );
        address_at(&self.call_decode(factory, data, &[ParamType::Address]).await?, 0)
    }

    async fn v3_liquidity(&self, pool: Address) -> Result<u128> {
        let out = self
            .call_decode(pool, calldata(enc::V3_LIQUIDITY, &[]), &[ParamType::Uint(128)])
            .await?;
        u128_at(&out, 0)
    }

    async fn v3_slot0(&self, pool: Address, flavor: V3Flavor) -> Result<Slot0> {
        let out = self
            .call_decode(pool, calldata(enc::V3_SLOT0, &[]), &enc::slot0_output_types(flavor))
            .await?;
        Ok(Slot0 {
            sqrt_price_x96: uint_at(&out, 0)?,
            tick: int_at(&out, 1)?.low_i32(),
        })
    }

    async fn v3_pool_tokens(&self, pool: Address) -> Result<(Address, Address, u32)> {
        let token0 = self
            .call_decode(pool, calldata(enc::PAIR_TOKEN0, &[]), &[ParamType::Address])
            .await?;
        let token1 = self
            .call_decode(pool, calldata(enc::PAIR_TOKEN1, &[]), &[ParamType::Address])
            .await?;
        let fee = self
            .call_decode(pool, calldata(enc::V3_FEE, &[]), &[ParamType::Uint(24)])
            .await?;
        Ok((address_at(&token0, 0)?, address_at(&token1, 0)?, uint_at(&fee, 0)?.low_u32()))
    }

    async fn v3_exact_input_single(&self, router: Address, flavor: V3Flavor, params: &ExactInputSingleParams) -> Result<U256> {
        let data = enc::v3_exact_input_single(flavor, params);
        uint_at(&self.execute(router, data, &[ParamType::Uint(256)]).await?, 0)
    }

    async fn v3_exact_input(&self, router: Address, flavor: V3Flavor, params: &ExactInputParams) -> Result<U256> {
        let data = enc::v3_exact_input(flavor, params);
        uint_at(&self.execute(router, data, &[ParamType::Uint(256)]).await?, 0)
    }

    async fn v3_mint(&self, position_manager: Address, params: &MintParams) -> Result<MintedPosition> {
        let data = calldata(
            enc::NPM_MINT,
            &[Token::Tuple(vec![
                Token::Address(params.token0),
                Token::Address(params.token1),
                uint_token(params.fee),
                int_token(params.tick_lower),
                int_token(params.tick_upper),
                Token::Uint(params.amount0_desired),
                Token::Uint(params.amount1_desired),
                Token::Uint(params.amount0_min),
                Token::Uint(params.amount1_min),
                Token::Address(params.recipient),
                Token::Uint(params.deadline),
            ])],
        );
        let types = [
            ParamType::Uint(256),
            ParamType::Uint(128),
            ParamType::Uint(256),
            ParamType::Uint(256),
        ];
        let out = self.execute(position_manager, data, &types).await?;
        Ok(MintedPosition {
            token_id: uint_at(&out, 0)?,
            liquidity: u128_at(&out, 1)?,
            amount0: uint_at(&out, 2)?,
            amount1: uint_at(&out, 3)?,
        })
    }

    async fn v3_increase_liquidity(
        &self,
        position_manager: Address,
        params: &IncreaseLiquidityParams,
    ) -> Result<(u128, U256, U256)> {
        let data = calldata(
            enc::NPM_INCREASE_LIQUIDITY,
            &[Token::Tuple(vec![
                Token::Uint(params.token_id),
                Token::Uint(params.amount0_desired),
                Token::Uint(params.amount1_desired),
                Token::Uint(params.amount0_min),
                Token::Uint(params.amount1_min),
                Token::Uint(params.deadline),
            ])],
        );
        let types = [ParamType::Uint(128), ParamType::Uint(256), ParamType::Uint(256)];
        let out = self.execute(position_manager, data, &types).await?;
        Ok((u128_at(&out, 0)?, uint_at(&out, 1)?, uint_at(&out, 2)?))
    }

    async fn v3_position(&self, position_manager: Address, token_id: U256) -> Result<PositionInfo> {
        let data = calldata(enc::NPM_POSITIONS, &[Token::Uint(token_id)]);
        let types = [
            ParamType::Uint(96),
            ParamType::Address,
            ParamType::Address,
            ParamType::Address,
            ParamType::Uint(24),
            ParamType::Int(24),
            ParamType::Int(24),
            ParamType::Uint(128),
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Uint(128),
            ParamType::Uint(128),
        ];
        let out = self.call_decode(position_manager, data, &types).await?;
        Ok(PositionInfo {
            token0: address_at(&out, 2)?,
            token1: address_at(&out, 3)?,
            fee: uint_at(&out, 4)?.low_u32(),
            tick_lower: int_at(&out, 5)?.low_i32(),
            tick_upper: int_at(&out, 6)?.low_i32(),
            liquidity: u128_at(&out, 7)?,
        })
    }

    async fn v3_decrease_liquidity(&self, position_manager: Address, params: &DecreaseLiquidityParams) -> Result<(U256, U256)> {
        let data = calldata(
            enc::NPM_DECREASE_LIQUIDITY,
            &[Token::Tuple(vec![
                Token::Uint(params.token_id),
                uint_token(params.liquidity),
                Token::Uint(params.amount0_min),
                Token::Uint(params.amount1_min),
                Token::Uint(params.deadline),
            ])],
        );
        let out = self
            .execute(position_manager, data, &[ParamType::Uint(256), ParamType::Uint(256)])
            .await?;
        Ok((uint_at(&out, 0)?, uint_at(&out, 1)?))
    }

    async fn v3_collect(&self, position_manager: Address, token_id: U256, recipient: Address) -> Result<(U256, U256)> {
        let data = calldata(
            enc::NPM_COLLECT,
            &[Token::Tuple(vec![
                Token::Uint(token_id),
                Token::Address(recipient),
                uint_token(u128::MAX),
                uint_token(u128::MAX),
            ])],
        );
        let out = self
            .execute(position_manager, data, &[ParamType::Uint(256), ParamType::Uint(256)])
            .await?;
        Ok((uint_at(&out, 0)?, uint_at(&out, 1)?))
    }

    async fn v3_transfer_position(&self, position_manager: Address, from: Address, to: Address, token_id: U256) -> Result<()> {
        let data = calldata(
            enc::NPM_TRANSFER_FROM,
            &[Token::Address(from), Token::Address(to), Token::Uint(token_id)],
        );
        self.send(position_manager, data).await
    }
}

#[async_trait]
impl BalancerApi for EthersChain {
    async fn balancer_get_pool_tokens(&self, vault: Address, pool_id: H256) -> Result<(Vec<Address>, Vec<U256>)> {
        let data = calldata(
            enc::BALANCER_GET_POOL_TOKENS,
            &[Token::FixedBytes(pool_id.as_bytes().to_vec())],
        );
        let types = [
            ParamType::Array(Box::new(ParamType::Address)),
            ParamType::Array(Box::new(ParamType::Uint(256))),
            ParamType::Uint(256),
        ];
        let out = self.call_decode(vault, data, &types).await?;
        Ok((addresses_at(&out, 0)?, uints_at(&out, 1)?))
    }

    async fn balancer_get_pool(&self, vault: Address, pool_id: H256) -> Result<Address> {
        let data = calldata(
            enc::BALANCER_GET_POOL,
            &[Token::FixedBytes(pool_id.as_bytes().to_vec())],
        );
        let out = self
            .call_decode(vault, data, &[ParamType::Address, ParamType::Uint(8)])
            .await?;
        address_at(&out, 0)
    }

    async fn balancer_swap(
        &self,
        vault: Address,
        swap: &BalancerSingleSwap,
        funds: FundManagement,
        limit: U256,
        deadline: U256,
    ) -> Result<U256> {
        let data = calldata(
            enc::BALANCER_SWAP,
            &[
                single_swap_token(swap),
                funds_token(funds),
                Token::Uint(limit),
                Token::Uint(deadline),
            ],
        );
        uint_at(&self.execute(vault, data, &[ParamType::Uint(256)]).await?, 0)
    }

    async fn balancer_query_swap(&self, queries: Address, swap: &BalancerSingleSwap, funds: FundManagement) -> Result<U256> {
        let data = calldata(enc::BALANCER_QUERY_SWAP, &[single_swap_token(swap), funds_token(funds)]);
        uint_at(&self.call_decode(queries, data, &[ParamType::Uint(256)]).await?, 0)
    }

    async fn balancer_join_pool(&self, vault: Address, pool_id: H256, funds: FundManagement, request: &JoinPoolRequest) -> Result<()> {
        let data = calldata(
            enc::BALANCER_JOIN_POOL,
            &[
                Token::FixedBytes(pool_id.as_bytes().to_vec()),
                Token::Address(funds.sender),
                Token::Address(funds.recipient),
                Token::Tuple(vec![
                    address_array(&request.assets),
                    uint_array(&request.max_amounts_in),
                    Token::Bytes(request.user_data.to_vec()),
                    Token::Bool(false),
                ]),
            ],
        );
        self.send(vault, data).await
    }

    async fn balancer_exit_pool(&self, vault: Address, pool_id: H256, funds: FundManagement, request: &ExitPoolRequest) -> Result<()> {
        let data = calldata(
            enc::BALANCER_EXIT_POOL,
            &[
                Token::FixedBytes(pool_id.as_bytes().to_vec()),
                Token::Address(funds.sender),
                Token::Address(funds.recipient),
                Token::Tuple(vec![
                    address_array(&request.assets),
                    uint_array(&request.min_amounts_out),
                    Token::Bytes(request.user_data.to_vec()),
                    Token::Bool(false),
                ]),
            ],
        );
        self.send(vault, data).await
    }
}

#[async_trait]
impl AmbientApi for EthersChain {
    async fn ambient_query_liquidity(&self, query: Address, pool: AmbientPoolKey) -> Result<u128> {
        let data = calldata(enc::AMBIENT_QUERY_LIQUIDITY, &pool_key_tokens(&pool));
        u128_at(&self.call_decode(query, data, &[ParamType::Uint(128)]).await?, 0)
    }

    async fn ambient_query_price(&self, query: Address, pool: AmbientPoolKey) -> Result<u128> {
        let data = calldata(enc::AMBIENT_QUERY_PRICE, &pool_key_tokens(&pool));
        u128_at(&self.call_decode(query, data, &[ParamType::Uint(128)]).await?, 0)
    }

    async fn ambient_query_ambient_tokens(&self, query: Address, owner: Address, pool: AmbientPoolKey) -> Result<(u128, U256, U256)> {
        let mut args = vec![Token::Address(owner)];
        args.extend(pool_key_tokens(&pool));
        let data = calldata(enc::AMBIENT_QUERY_AMBIENT_TOKENS, &args);
        let types = [ParamType::Uint(128), ParamType::Uint(128), ParamType::Uint(128)];
        let out = self.call_decode(query, data, &types).await?;
        Ok((u128_at(&out, 0)?, uint_at(&out, 1)?, uint_at(&out, 2)?))
    }

    async fn ambient_calc_impact(&self, impact: Address, swap: &AmbientSwap) -> Result<AmbientFlows> {
        let data = calldata(enc::AMBIENT_CALC_IMPACT, &ambient_swap_tokens(swap));
        let types = [ParamType::Int(128), ParamType::Int(128), ParamType::Uint(128)];
        flows_from(&self.call_decode(impact, data, &types).await?)
    }

    async fn ambient_swap(&self, dex: Address, swap: &AmbientSwap) -> Result<AmbientFlows> {
        let mut args = ambient_swap_tokens(swap);
        args.extend([uint_token(swap.min_out), uint_token(0u8)]);
        let data = calldata(enc::AMBIENT_SWAP, &args);
        flows_from(&self.execute(dex, data, &[ParamType::Int(128), ParamType::Int(128)]).await?)
    }

    async fn ambient_user_cmd(&self, dex: Address, callpath: u16, cmd: Bytes) -> Result<AmbientFlows> {
        let data = calldata(enc::AMBIENT_USER_CMD, &[uint_token(callpath), Token::Bytes(cmd.to_vec())]);
        let out = self.execute(dex, data, &[ParamType::Bytes]).await?;
        let inner = out
            .into_iter()
            .next()
            .and_then(Token::into_bytes)
            .ok_or_else(|| anyhow!("userCmd returned no bytes"))?;
        flows_from(&decode_output(&[ParamType::Int(128), ParamType::Int(128)], &inner)?)
    }
}

#[async_trait]
impl Checkpoint for EthersChain {
    async fn snapshot(&self) -> Result<U256> {
        self.provider
            .request::<_, U256>("evm_snapshot", ())
            .await
            .map_err(|e| anyhow!("evm_snapshot failed: {}", e))
    }

    async fn revert_to(&self, id: U256) -> Result<()> {
        let reverted = self
            .provider
            .request::<_, bool>("evm_revert", [id])
            .await
            .map_err(|e| anyhow!("evm_revert failed: {}", e))?;
        if !reverted {
            bail!("node refused to revert snapshot {}", id);
        }
        Ok(())
    }

    async fn release(&self, id: U256) -> Result<()> {
        // dev nodes drop snapshots lazily, nothing to free
        debug!("Released snapshot {}", id);
        Ok(())
    }
}

#[async_trait]
impl BlockApi for EthersChain {
    async fn block_timestamp(&self) -> Result<U256> {
        let block = match timeout(self.call_timeout, self.provider.get_block(BlockNumber::Latest)).await {
            Ok(Ok(block)) => block,
            Ok(Err(e)) => bail!("eth_getBlockByNumber failed: {}", e),
            Err(_) => bail!("eth_getBlockByNumber timed out after {:?}", self.call_timeout),
        };
        block
            .map(|block| block.timestamp)
            .ok_or_else(|| anyhow!("node returned no latest block"))
    }
}

impl Chain for EthersChain {
    fn account(&self) -> Address {
        self.account
    }
}
