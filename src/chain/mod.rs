//! # Chain Collaborators
//!
//! The router never talks to a node directly: every token movement and venue call
//! goes through the traits in this module. [`sim::SimulatedChain`] implements them in
//! memory for tests and dry runs, [`rpc::EthersChain`] implements them against an
//! Ethereum JSON-RPC endpoint.
//!
//! All write calls are issued by the chain's [`Chain::account`] (the router's own
//! account). Venue request bundles mirror the on-chain parameter structs.

pub mod rpc;
pub mod sim;

use anyhow::Result;
use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, I256, U256};
use std::future::Future;
use tracing::warn;

use crate::error::RouterResult;
use crate::venue::V3Flavor;

/// Caller of a top-level operation and the deadline forwarded to venue primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext {
    pub sender: Address,
    pub deadline: U256,
}

impl CallContext {
    pub fn new(sender: Address, deadline: U256) -> Self {
        Self { sender, deadline }
    }
}

#[async_trait]
pub trait Erc20Api: Send + Sync {
    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256>;
    async fn total_supply(&self, token: Address) -> Result<U256>;
    async fn decimals(&self, token: Address) -> Result<u8>;
    async fn transfer(&self, token: Address, to: Address, amount: U256) -> Result<()>;
    /// Moves `amount` from `from` using the allowance granted to the chain account.
    async fn transfer_from(&self, token: Address, from: Address, to: Address, amount: U256) -> Result<()>;
    async fn approve(&self, token: Address, spender: Address, amount: U256) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V2AddLiquidity {
    pub token_a: Address,
    pub token_b: Address,
    pub amount_a_desired: U256,
    pub amount_b_desired: U256,
    pub amount_a_min: U256,
    pub amount_b_min: U256,
    pub to: Address,
    pub deadline: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V2RemoveLiquidity {
    pub token_a: Address,
    pub token_b: Address,
    pub liquidity: U256,
    pub amount_a_min: U256,
    pub amount_b_min: U256,
    pub to: Address,
    pub deadline: U256,
}

#[async_trait]
pub trait UniswapV2Api: Send + Sync {
    /// Pair address from the factory, zero when the pair does not exist.
    async fn v2_get_pair(&self, factory: Address, token_a: Address, token_b: Address) -> Result<Address>;
    async fn v2_get_reserves(&self, pair: Address) -> Result<(U256, U256)>;
    async fn v2_pair_tokens(&self, pair: Address) -> Result<(Address, Address)>;
    async fn v2_get_amounts_out(&self, router: Address, amount_in: U256, path: &[Address]) -> Result<Vec<U256>>;
    async fn v2_swap_exact_tokens_for_tokens(
        &self,
        router: Address,
        amount_in: U256,
        amount_out_min: U256,
        path: &[Address],
        to: Address,
        deadline: U256,
    ) -> Result<Vec<U256>>;
    /// Returns `(amount_a, amount_b, liquidity)`.
    async fn v2_add_liquidity(&self, router: Address, params: &V2AddLiquidity) -> Result<(U256, U256, U256)>;
    async fn v2_remove_liquidity(&self, router: Address, params: &V2RemoveLiquidity) -> Result<(U256, U256)>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot0 {
    pub sqrt_price_x96: U256,
    pub tick: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExactInputSingleParams {
    pub token_in: Address,
    pub token_out: Address,
    pub fee: u32,
    pub recipient: Address,
    /// Ignored by deadline-free router flavours.
    pub deadline: U256,
    pub amount_in: U256,
    pub amount_out_minimum: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExactInputParams {
    /// Packed `token (20) | fee (3) | token (20) ...` path.
    pub path: Bytes,
    pub recipient: Address,
    pub deadline: U256,
    pub amount_in: U256,
    pub amount_out_minimum: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintParams {
    pub token0: Address,
    pub token1: Address,
    pub fee: u32,
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub amount0_desired: U256,
    pub amount1_desired: U256,
    pub amount0_min: U256,
    pub amount1_min: U256,
    pub recipient: Address,
    pub deadline: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncreaseLiquidityParams {
    pub token_id: U256,
    pub amount0_desired: U256,
    pub amount1_desired: U256,
    pub amount0_min: U256,
    pub amount1_min: U256,
    pub deadline: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecreaseLiquidityParams {
    pub token_id: U256,
    pub liquidity: u128,
    pub amount0_min: U256,
    pub amount1_min: U256,
    pub deadline: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MintedPosition {
    pub token_id: U256,
    pub liquidity: u128,
    pub amount0: U256,
    pub amount1: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionInfo {
    pub token0: Address,
    pub token1: Address,
    pub fee: u32,
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub liquidity: u128,
}

#[async_trait]
pub trait UniswapV3Api: Send + Sync {
    /// Pool address from the factory, zero when undeployed.
    async fn v3_get_pool(&self, factory: Address, token_a: Address, token_b: Address, fee: u32) -> Result<Address>;
    async fn v3_liquidity(&self, pool: Address) -> Result<u128>;
    async fn v3_slot0(&self, pool: Address, flavor: V3Flavor) -> Result<Slot0>;
    /// `(token0, token1, fee)` of a pool.
    async fn v3_pool_tokens(&self, pool: Address) -> Result<(Address, Address, u32)>;
    async fn v3_exact_input_single(&self, router: Address, flavor: V3Flavor, params: &ExactInputSingleParams) -> Result<U256>;
    async fn v3_exact_input(&self, router: Address, flavor: V3Flavor, params: &ExactInputParams) -> Result<U256>;
    async fn v3_mint(&self, position_manager: Address, params: &MintParams) -> Result<MintedPosition>;
    /// Returns `(liquidity, amount0, amount1)`.
    async fn v3_increase_liquidity(
        &self,
        position_manager: Address,
        params: &IncreaseLiquidityParams,
    ) -> Result<(u128, U256, U256)>;
    async fn v3_position(&self, position_manager: Address, token_id: U256) -> Result<PositionInfo>;
    async fn v3_decrease_liquidity(&self, position_manager: Address, params: &DecreaseLiquidityParams) -> Result<(U256, U256)>;
    /// Collects everything owed to the position.
    async fn v3_collect(&self, position_manager: Address, token_id: U256, recipient: Address) -> Result<(U256, U256)>;
    async fn v3_transfer_position(&self, position_manager: Address, from: Address, to: Address, token_id: U256) -> Result<()>;
}

/// Balancer `SingleSwap` with `GIVEN_IN` kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalancerSingleSwap {
    pub pool_id: H256,
    pub asset_in: Address,
    pub asset_out: Address,
    pub amount: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FundManagement {
    pub sender: Address,
    pub recipient: Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinPoolRequest {
    pub assets: Vec<Address>,
    pub max_amounts_in: Vec<U256>,
    pub user_data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitPoolRequest {
    pub assets: Vec<Address>,
    pub min_amounts_out: Vec<U256>,
    pub user_data: Bytes,
}

#[async_trait]
pub trait BalancerApi: Send + Sync {
    async fn balancer_get_pool_tokens(&self, vault: Address, pool_id: H256) -> Result<(Vec<Address>, Vec<U256>)>;
    /// Address of the pool (and its BPT token).
    async fn balancer_get_pool(&self, vault: Address, pool_id: H256) -> Result<Address>;
    async fn balancer_swap(
        &self,
        vault: Address,
        swap: &BalancerSingleSwap,
        funds: FundManagement,
        limit: U256,
        deadline: U256,
    ) -> Result<U256>;
    async fn balancer_query_swap(&self, queries: Address, swap: &BalancerSingleSwap, funds: FundManagement) -> Result<U256>;
    async fn balancer_join_pool(&self, vault: Address, pool_id: H256, funds: FundManagement, request: &JoinPoolRequest) -> Result<()>;
    async fn balancer_exit_pool(&self, vault: Address, pool_id: H256, funds: FundManagement, request: &ExitPoolRequest) -> Result<()>;
}

/// Ambient pool key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AmbientPoolKey {
    pub base: Address,
    pub quote: Address,
    pub pool_idx: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmbientSwap {
    pub pool: AmbientPoolKey,
    pub is_buy: bool,
    pub in_base_qty: bool,
    pub qty: u128,
    pub limit_price: u128,
    pub min_out: u128,
}

/// Token flows of an Ambient call from the user's side: positive is paid into the
/// pool, negative is paid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmbientFlows {
    pub base_flow: I256,
    pub quote_flow: I256,
}

impl AmbientFlows {
    /// Amount paid out on the base (`true`) or quote side, zero if that side was paid in.
    pub fn paid_out(&self, base_side: bool) -> U256 {
        let flow = if base_side { self.base_flow } else { self.quote_flow };
        if flow.is_negative() {
            flow.unsigned_abs()
        } else {
            U256::zero()
        }
    }
}

#[async_trait]
pub trait AmbientApi: Send + Sync {
    async fn ambient_query_liquidity(&self, query: Address, pool: AmbientPoolKey) -> Result<u128>;
    /// Q64.64 square-root price.
    async fn ambient_query_price(&self, query: Address, pool: AmbientPoolKey) -> Result<u128>;
    /// `(liquidity, base, quote)` of `owner`'s ambient position.
    async fn ambient_query_ambient_tokens(&self, query: Address, owner: Address, pool: AmbientPoolKey) -> Result<(u128, U256, U256)>;
    async fn ambient_calc_impact(&self, impact: Address, swap: &AmbientSwap) -> Result<AmbientFlows>;
    async fn ambient_swap(&self, dex: Address, swap: &AmbientSwap) -> Result<AmbientFlows>;
    /// Executes an encoded command on the dex proxy path `callpath`.
    async fn ambient_user_cmd(&self, dex: Address, callpath: u16, cmd: Bytes) -> Result<AmbientFlows>;
}

#[async_trait]
pub trait Checkpoint: Send + Sync {
    async fn snapshot(&self) -> Result<U256>;
    /// Restores the state captured by `id` and drops every later checkpoint.
    async fn revert_to(&self, id: U256) -> Result<()>;
    async fn release(&self, id: U256) -> Result<()>;
}

#[async_trait]
pub trait BlockApi: Send + Sync {
    /// Timestamp of the latest block, in seconds.
    async fn block_timestamp(&self) -> Result<U256>;
}

/// Everything the router needs from a chain.
pub trait Chain: Erc20Api + UniswapV2Api + UniswapV3Api + BalancerApi + AmbientApi + Checkpoint + BlockApi {
    /// Account the router acts from; intermediate tokens are held here.
    fn account(&self) -> Address;
}

/// Runs `op` inside a checkpoint: reverted on error, released on success.
pub async fn atomically<C, T, F>(chain: &C, op: F) -> RouterResult<T>
where
    C: Checkpoint + ?Sized,
    F: Future<Output = RouterResult<T>>,
{
    let id = chain.snapshot().await?;
    match op.await {
        Ok(value) => {
            chain.release(id).await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(revert_err) = chain.revert_to(id).await {
                warn!("failed to revert checkpoint {}: {:?}", id, revert_err);
            }
            Err(err)
        }
    }
}
