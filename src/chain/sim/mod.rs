//! # Simulated Chain
//!
//! An in-memory chain implementing every collaborator trait: an ERC-20 ledger with
//! allowances, UniswapV2-style pairs, single-range UniswapV3-style pools with a
//! position manager, Balancer weighted pools and Ambient pools addressed by index.
//!
//! Venues pull tokens from the chain account through the allowances it granted, just
//! like the deployed contracts would, and reject calls whose deadline is older than the
//! simulated block timestamp. Concentrated pools keep a single active liquidity value
//! (ticks are not crossed).

mod amm;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, I256, U256};
use std::collections::HashMap;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::{
    AmbientApi, AmbientFlows, AmbientPoolKey, AmbientSwap, BalancerApi, BalancerSingleSwap, BlockApi, Chain,
    Checkpoint, DecreaseLiquidityParams, Erc20Api, ExactInputParams, ExactInputSingleParams,
    ExitPoolRequest, FundManagement, IncreaseLiquidityParams, JoinPoolRequest, MintParams,
    MintedPosition, PositionInfo, Slot0, UniswapV2Api, UniswapV3Api, V2AddLiquidity,
    V2RemoveLiquidity,
};
use crate::encoding::{
    decode_ambient_liquidity_cmd, decode_exit_user_data, decode_join_user_data, decode_v3_path,
    AmbientLiqCode, BalancerUserData, AMBIENT_LP_PROXY_PATH,
};
use crate::math::mul_div;
use crate::utils::sort_tokens;
use crate::v3_math::{
    compute_swap_step, get_amounts_for_liquidity, get_liquidity_for_amounts,
    get_sqrt_ratio_at_tick, get_tick_at_sqrt_ratio, MAX_SQRT_RATIO, MAX_TICK, MIN_SQRT_RATIO,
    MIN_TICK,
};
use crate::venue::V3Flavor;

pub use amm::ONE as BALANCER_ONE;

/// Holder of the liquidity seeded by the setup helpers.
pub const LIQUIDITY_PROVIDER: Address = Address::repeat_byte(0x1f);

const V2_MINIMUM_LIQUIDITY: u64 = 1000;

#[derive(Debug, Clone, Default)]
struct TokenLedger {
    decimals: u8,
    total_supply: U256,
    balances: HashMap<Address, U256>,
    allowances: HashMap<(Address, Address), U256>,
}

#[derive(Debug, Clone, Copy)]
struct V2Pair {
    token0: Address,
    token1: Address,
}

#[derive(Debug, Clone, Copy)]
struct V3Pool {
    token0: Address,
    token1: Address,
    fee: u32,
    sqrt_price_x96: U256,
    tick: i32,
    liquidity: u128,
}

impl V3Pool {
    fn in_range(&self, tick_lower: i32, tick_upper: i32) -> bool {
        tick_lower <= self.tick && self.tick < tick_upper
    }
}

#[derive(Debug, Clone, Copy)]
struct V3Position {
    owner: Address,
    operator: Option<Address>,
    pool: Address,
    tick_lower: i32,
    tick_upper: i32,
    liquidity: u128,
    owed0: U256,
    owed1: U256,
}

#[derive(Debug, Clone)]
struct WeightedPool {
    address: Address,
    tokens: Vec<Address>,
    weights: Vec<U256>,
    swap_fee: U256,
    balances: Vec<U256>,
}

impl WeightedPool {
    fn index_of(&self, token: Address) -> Result<usize> {
        self.tokens
            .iter()
            .position(|t| *t == token)
            .ok_or_else(|| anyhow!("BAL#521 token {:?} not registered in pool", token))
    }

    fn out_given_in(&self, asset_in: Address, asset_out: Address, amount: U256) -> Result<(usize, usize, U256)> {
        let i = self.index_of(asset_in)?;
        let o = self.index_of(asset_out)?;
        if i == o {
            bail!("BAL#510 cannot swap same token");
        }
        let net = amm::subtract_fee(amount, self.swap_fee)?;
        let out = amm::weighted_out_given_in(
            self.balances[i],
            self.weights[i],
            self.balances[o],
            self.weights[o],
            net,
        )?;
        Ok((i, o, out))
    }
}

#[derive(Debug, Clone, Default)]
struct AmbientCurve {
    base_reserve: U256,
    quote_reserve: U256,
    fee_ppm: u32,
    total_liquidity: U256,
    positions: HashMap<Address, U256>,
}

impl AmbientCurve {
    /// `(qty, out)` of a swap paying the input side.
    fn swap_amounts(&self, swap: &AmbientSwap) -> Result<(U256, U256)> {
        if swap.is_buy != swap.in_base_qty {
            bail!("only input-denominated ambient swaps are supported");
        }
        let qty = U256::from(swap.qty);
        let (reserve_in, reserve_out) = if swap.is_buy {
            (self.base_reserve, self.quote_reserve)
        } else {
            (self.quote_reserve, self.base_reserve)
        };
        let out = amm::ambient_amount_out(qty, self.fee_ppm, reserve_in, reserve_out)?;
        Ok((qty, out))
    }

    fn flows(is_buy: bool, qty: U256, out: U256) -> Result<AmbientFlows> {
        let paid = I256::try_from(qty).map_err(|_| anyhow!("flow overflow"))?;
        let received = -I256::try_from(out).map_err(|_| anyhow!("flow overflow"))?;
        Ok(if is_buy {
            AmbientFlows {
                base_flow: paid,
                quote_flow: received,
            }
        } else {
            AmbientFlows {
                base_flow: received,
                quote_flow: paid,
            }
        })
    }
}

#[derive(Debug, Clone, Default)]
struct State {
    timestamp: u64,
    next_address: u64,
    tokens: HashMap<Address, TokenLedger>,

    v2_factories: HashMap<Address, HashMap<(Address, Address), Address>>,
    v2_routers: HashMap<Address, Address>,
    v2_pairs: HashMap<Address, V2Pair>,

    v3_factories: HashMap<Address, HashMap<(Address, Address, u32), Address>>,
    v3_routers: HashMap<Address, Address>,
    v3_position_managers: HashMap<Address, Address>,
    v3_pools: HashMap<Address, V3Pool>,
    v3_positions: HashMap<(Address, U256), V3Position>,
    next_token_id: u64,

    balancer_vaults: HashMap<Address, HashMap<H256, WeightedPool>>,
    balancer_queries: HashMap<Address, Address>,

    ambient_dexes: HashMap<Address, HashMap<AmbientPoolKey, AmbientCurve>>,
    ambient_queries: HashMap<Address, Address>,
    ambient_impacts: HashMap<Address, Address>,
}

impl State {
    fn allocate(&mut self) -> Address {
        self.next_address += 1;
        Address::from_low_u64_be(0x5100_0000 + self.next_address)
    }

    fn check_deadline(&self, deadline: U256) -> Result<()> {
        if U256::from(self.timestamp) > deadline {
            bail!("Transaction too old");
        }
        Ok(())
    }

    fn ledger(&self, token: Address) -> Result<&TokenLedger> {
        self.tokens
            .get(&token)
            .ok_or_else(|| anyhow!("no token contract at {:?}", token))
    }

    fn ledger_mut(&mut self, token: Address) -> Result<&mut TokenLedger> {
        self.tokens
            .get_mut(&token)
            .ok_or_else(|| anyhow!("no token contract at {:?}", token))
    }

    fn balance(&self, token: Address, owner: Address) -> Result<U256> {
        Ok(self.ledger(token)?.balances.get(&owner).copied().unwrap_or_default())
    }

    fn mint(&mut self, token: Address, to: Address, amount: U256) -> Result<()> {
        let ledger = self.ledger_mut(token)?;
        ledger.total_supply += amount;
        *ledger.balances.entry(to).or_default() += amount;
        Ok(())
    }

    fn burn(&mut self, token: Address, from: Address, amount: U256) -> Result<()> {
        let ledger = self.ledger_mut(token)?;
        let balance = ledger.balances.entry(from).or_default();
        if *balance < amount {
            bail!("burn amount exceeds balance");
        }
        *balance -= amount;
        ledger.total_supply -= amount;
        Ok(())
    }

    fn move_balance(&mut self, token: Address, from: Address, to: Address, amount: U256) -> Result<()> {
        let ledger = self.ledger_mut(token)?;
        let from_balance = ledger.balances.entry(from).or_default();
        if *from_balance < amount {
            bail!(
                "ERC20: transfer amount exceeds balance (token {:?}, from {:?}, amount {})",
                token,
                from,
                amount
            );
        }
        *from_balance -= amount;
        *ledger.balances.entry(to).or_default() += amount;
        Ok(())
    }

    /// `transferFrom` executed by `spender`; no allowance is needed to move one's own tokens.
    fn pull(&mut self, token: Address, owner: Address, spender: Address, to: Address, amount: U256) -> Result<()> {
        if owner != spender {
            let ledger = self.ledger_mut(token)?;
            let allowance = ledger.allowances.entry((owner, spender)).or_default();
            if *allowance < amount {
                bail!(
                    "ERC20: insufficient allowance (token {:?}, owner {:?}, spender {:?})",
                    token,
                    owner,
                    spender
                );
            }
            if *allowance != U256::MAX {
                *allowance -= amount;
            }
        }
        self.move_balance(token, owner, to, amount)
    }

    fn deploy_token(&mut self, decimals: u8) -> Address {
        let address = self.allocate();
        self.tokens.insert(
            address,
            TokenLedger {
                decimals,
                ..Default::default()
            },
        );
        address
    }

    // ---- UniswapV2 ----

    fn v2_factory_of(&self, router: Address) -> Result<Address> {
        self.v2_routers
            .get(&router)
            .copied()
            .ok_or_else(|| anyhow!("no V2 router at {:?}", router))
    }

    fn v2_pair_for(&self, factory: Address, token_a: Address, token_b: Address) -> Result<Option<Address>> {
        let pairs = self
            .v2_factories
            .get(&factory)
            .ok_or_else(|| anyhow!("no V2 factory at {:?}", factory))?;
        Ok(pairs.get(&sort_tokens(token_a, token_b)).copied())
    }

    fn v2_create_pair(&mut self, factory: Address, token_a: Address, token_b: Address) -> Result<Address> {
        if token_a == token_b {
            bail!("UniswapV2: IDENTICAL_ADDRESSES");
        }
        if let Some(pair) = self.v2_pair_for(factory, token_a, token_b)? {
            return Ok(pair);
        }
        let (token0, token1) = sort_tokens(token_a, token_b);
        let pair = self.deploy_token(18);
        self.v2_pairs.insert(pair, V2Pair { token0, token1 });
        self.v2_factories
            .entry(factory)
            .or_default()
            .insert((token0, token1), pair);
        Ok(pair)
    }

    fn v2_pair(&self, pair: Address) -> Result<V2Pair> {
        self.v2_pairs
            .get(&pair)
            .copied()
            .ok_or_else(|| anyhow!("no V2 pair at {:?}", pair))
    }

    fn v2_reserves(&self, pair: Address) -> Result<(U256, U256)> {
        let info = self.v2_pair(pair)?;
        Ok((self.balance(info.token0, pair)?, self.balance(info.token1, pair)?))
    }

    fn v2_oriented_reserves(&self, pair: Address, token_in: Address) -> Result<(U256, U256)> {
        let info = self.v2_pair(pair)?;
        let (reserve0, reserve1) = self.v2_reserves(pair)?;
        if token_in == info.token0 {
            Ok((reserve0, reserve1))
        } else {
            Ok((reserve1, reserve0))
        }
    }

    fn v2_amounts_out(&self, router: Address, amount_in: U256, path: &[Address]) -> Result<(Vec<U256>, Vec<Address>)> {
        if path.len() < 2 {
            bail!("UniswapV2Library: INVALID_PATH");
        }
        let factory = self.v2_factory_of(router)?;
        let mut amounts = vec![amount_in];
        let mut pairs = Vec::with_capacity(path.len() - 1);
        for window in path.windows(2) {
            let pair = self
                .v2_pair_for(factory, window[0], window[1])?
                .ok_or_else(|| anyhow!("UniswapV2Library: pair {:?}/{:?} does not exist", window[0], window[1]))?;
            let (reserve_in, reserve_out) = self.v2_oriented_reserves(pair, window[0])?;
            let last = amounts[amounts.len() - 1];
            amounts.push(amm::v2_amount_out(last, reserve_in, reserve_out)?);
            pairs.push(pair);
        }
        Ok((amounts, pairs))
    }

    fn v2_mint_liquidity(&mut self, pair: Address, reserve0: U256, reserve1: U256, to: Address) -> Result<U256> {
        let (balance0, balance1) = self.v2_reserves(pair)?;
        let amount0 = balance0 - reserve0;
        let amount1 = balance1 - reserve1;
        let supply = self.ledger(pair)?.total_supply;
        let liquidity = if supply.is_zero() {
            let minimum = U256::from(V2_MINIMUM_LIQUIDITY);
            let initial = amm::v2_initial_liquidity(amount0, amount1);
            if initial <= minimum {
                bail!("UniswapV2: INSUFFICIENT_LIQUIDITY_MINTED");
            }
            self.mint(pair, Address::zero(), minimum)?;
            initial - minimum
        } else {
            let l0 = mul_div(amount0, supply, reserve0).unwrap_or_default();
            let l1 = mul_div(amount1, supply, reserve1).unwrap_or_default();
            l0.min(l1)
        };
        if liquidity.is_zero() {
            bail!("UniswapV2: INSUFFICIENT_LIQUIDITY_MINTED");
        }
        self.mint(pair, to, liquidity)?;
        Ok(liquidity)
    }

    // ---- UniswapV3 ----

    fn v3_pool_for(&self, factory: Address, token_a: Address, token_b: Address, fee: u32) -> Result<Option<Address>> {
        let pools = self
            .v3_factories
            .get(&factory)
            .ok_or_else(|| anyhow!("no V3 factory at {:?}", factory))?;
        let (token0, token1) = sort_tokens(token_a, token_b);
        Ok(pools.get(&(token0, token1, fee)).copied())
    }

    fn v3_pool(&self, pool: Address) -> Result<V3Pool> {
        self.v3_pools
            .get(&pool)
            .copied()
            .ok_or_else(|| anyhow!("no V3 pool at {:?}", pool))
    }

    /// Swaps inside `pool`, paying `amount_in` from `payer` (through `spender`) and the
    /// output to `recipient`.
    fn v3_swap(
        &mut self,
        pool_address: Address,
        token_in: Address,
        amount_in: U256,
        payer: Address,
        spender: Address,
        recipient: Address,
    ) -> Result<U256> {
        let mut pool = self.v3_pool(pool_address)?;
        let zero_for_one = if token_in == pool.token0 {
            true
        } else if token_in == pool.token1 {
            false
        } else {
            bail!("token {:?} not in pool {:?}", token_in, pool_address);
        };
        let step = compute_swap_step(pool.sqrt_price_x96, pool.liquidity, amount_in, pool.fee, zero_for_one)?;
        pool.sqrt_price_x96 = step.sqrt_price_next;
        pool.tick = get_tick_at_sqrt_ratio(step.sqrt_price_next)?;
        self.v3_pools.insert(pool_address, pool);

        let token_out = if zero_for_one { pool.token1 } else { pool.token0 };
        self.pull(token_in, payer, spender, pool_address, amount_in)?;
        self.move_balance(token_out, pool_address, recipient, step.amount_out)?;
        Ok(step.amount_out)
    }

    fn v3_factory_of_router(&self, router: Address) -> Result<Address> {
        self.v3_routers
            .get(&router)
            .copied()
            .ok_or_else(|| anyhow!("no V3 router at {:?}", router))
    }

    fn v3_factory_of_manager(&self, manager: Address) -> Result<Address> {
        self.v3_position_managers
            .get(&manager)
            .copied()
            .ok_or_else(|| anyhow!("no position manager at {:?}", manager))
    }

    fn v3_position(&self, manager: Address, token_id: U256) -> Result<V3Position> {
        self.v3_positions
            .get(&(manager, token_id))
            .copied()
            .ok_or_else(|| anyhow!("Invalid token ID {}", token_id))
    }

    fn v3_authorize(&self, position: &V3Position, caller: Address) -> Result<()> {
        if position.owner == caller || position.operator == Some(caller) {
            Ok(())
        } else {
            bail!("Not approved")
        }
    }

    /// Adds liquidity to `pool` for the range, pulling the rounded-up amounts.
    fn v3_add_liquidity(
        &mut self,
        manager: Address,
        pool_address: Address,
        tick_lower: i32,
        tick_upper: i32,
        amount0_desired: U256,
        amount1_desired: U256,
        amount0_min: U256,
        amount1_min: U256,
        payer: Address,
    ) -> Result<(u128, U256, U256)> {
        if tick_lower >= tick_upper || tick_lower < MIN_TICK || tick_upper > MAX_TICK {
            bail!("invalid tick range [{}, {})", tick_lower, tick_upper);
        }
        let mut pool = self.v3_pool(pool_address)?;
        let sqrt_lower = get_sqrt_ratio_at_tick(tick_lower)?;
        let sqrt_upper = get_sqrt_ratio_at_tick(tick_upper)?;
        let liquidity = get_liquidity_for_amounts(
            pool.sqrt_price_x96,
            sqrt_lower,
            sqrt_upper,
            amount0_desired,
            amount1_desired,
        )?;
        if liquidity == 0 {
            bail!("zero liquidity minted");
        }
        let (amount0, amount1) =
            get_amounts_for_liquidity(pool.sqrt_price_x96, sqrt_lower, sqrt_upper, liquidity, true)?;
        let amount0 = amount0.min(amount0_desired);
        let amount1 = amount1.min(amount1_desired);
        if amount0 < amount0_min || amount1 < amount1_min {
            bail!("Price slippage check");
        }

        if pool.in_range(tick_lower, tick_upper) {
            pool.liquidity += liquidity;
        }
        self.v3_pools.insert(pool_address, pool);
        self.pull(pool.token0, payer, manager, pool_address, amount0)?;
        self.pull(pool.token1, payer, manager, pool_address, amount1)?;
        Ok((liquidity, amount0, amount1))
    }

    // ---- Balancer ----

    fn balancer_pools(&self, vault: Address) -> Result<&HashMap<H256, WeightedPool>> {
        self.balancer_vaults
            .get(&vault)
            .ok_or_else(|| anyhow!("no Balancer vault at {:?}", vault))
    }

    fn balancer_pool(&self, vault: Address, pool_id: H256) -> Result<WeightedPool> {
        self.balancer_pools(vault)?
            .get(&pool_id)
            .cloned()
            .ok_or_else(|| anyhow!("BAL#500 invalid pool id {:?}", pool_id))
    }

    fn store_balancer_pool(&mut self, vault: Address, pool_id: H256, pool: WeightedPool) {
        self.balancer_vaults.entry(vault).or_default().insert(pool_id, pool);
    }

    // ---- Ambient ----

    fn ambient_curve(&self, dex: Address, key: &AmbientPoolKey) -> Result<AmbientCurve> {
        self.ambient_dexes
            .get(&dex)
            .ok_or_else(|| anyhow!("no Ambient dex at {:?}", dex))?
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow!("ambient pool {:?}/{:?}#{} not initialized", key.base, key.quote, key.pool_idx))
    }

    fn store_ambient_curve(&mut self, dex: Address, key: AmbientPoolKey, curve: AmbientCurve) {
        self.ambient_dexes.entry(dex).or_default().insert(key, curve);
    }

    fn ambient_dex_of(map: &HashMap<Address, Address>, lens: Address) -> Result<Address> {
        map.get(&lens)
            .copied()
            .ok_or_else(|| anyhow!("no Ambient lens contract at {:?}", lens))
    }
}

#[derive(Debug, Default)]
struct Inner {
    state: State,
    snapshots: Vec<(U256, State)>,
    next_snapshot: u64,
}

/// Addresses of a deployed UniswapV2-style venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct V2Deployment {
    pub factory: Address,
    pub router: Address,
}

/// Addresses of a deployed UniswapV3-style venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct V3Deployment {
    pub factory: Address,
    pub router: Address,
    pub position_manager: Address,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalancerDeployment {
    pub vault: Address,
    pub queries: Address,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmbientDeployment {
    pub dex: Address,
    pub query: Address,
    pub impact: Address,
}

pub struct SimulatedChain {
    account: Address,
    inner: Mutex<Inner>,
    yield_on_call: bool,
}

impl SimulatedChain {
    pub fn new(account: Address) -> Self {
        let state = State {
            timestamp: 1_700_000_000,
            next_token_id: 1,
            ..Default::default()
        };
        Self {
            account,
            inner: Mutex::new(Inner {
                state,
                ..Default::default()
            }),
            yield_on_call: false,
        }
    }

    /// Every call yields to the scheduler before touching state, like a network round
    /// trip would, so concurrent callers interleave at each await.
    pub fn with_yielding(mut self) -> Self {
        self.yield_on_call = true;
        self
    }

    async fn lock(&self) -> MutexGuard<'_, Inner> {
        if self.yield_on_call {
            tokio::task::yield_now().await;
        }
        self.inner.lock().await
    }

    pub async fn timestamp(&self) -> u64 {
        self.lock().await.state.timestamp
    }

    pub async fn set_timestamp(&self, timestamp: u64) {
        self.lock().await.state.timestamp = timestamp;
    }

    pub async fn deploy_token(&self, decimals: u8) -> Address {
        self.lock().await.state.deploy_token(decimals)
    }

    pub async fn mint(&self, token: Address, to: Address, amount: U256) -> Result<()> {
        self.lock().await.state.mint(token, to, amount)
    }

    /// `approve` sent by `owner`.
    pub async fn approve_from(&self, owner: Address, token: Address, spender: Address, amount: U256) -> Result<()> {
        let mut inner = self.lock().await;
        inner
            .state
            .ledger_mut(token)?
            .allowances
            .insert((owner, spender), amount);
        Ok(())
    }

    pub async fn allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256> {
        let inner = self.lock().await;
        Ok(inner
            .state
            .ledger(token)?
            .allowances
            .get(&(owner, spender))
            .copied()
            .unwrap_or_default())
    }

    pub async fn deploy_uniswap_v2(&self) -> V2Deployment {
        let mut inner = self.lock().await;
        let state = &mut inner.state;
        let factory = state.allocate();
        let router = state.allocate();
        state.v2_factories.insert(factory, HashMap::new());
        state.v2_routers.insert(router, factory);
        V2Deployment { factory, router }
    }

    /// Creates a pair holding the given reserves; the LP tokens go to [`LIQUIDITY_PROVIDER`].
    pub async fn seed_v2_pair(
        &self,
        factory: Address,
        token_a: Address,
        token_b: Address,
        amount_a: U256,
        amount_b: U256,
    ) -> Result<Address> {
        let mut inner = self.lock().await;
        let state = &mut inner.state;
        let pair = state.v2_create_pair(factory, token_a, token_b)?;
        let (reserve0, reserve1) = state.v2_reserves(pair)?;
        state.mint(token_a, pair, amount_a)?;
        state.mint(token_b, pair, amount_b)?;
        state.v2_mint_liquidity(pair, reserve0, reserve1, LIQUIDITY_PROVIDER)?;
        Ok(pair)
    }

    pub async fn deploy_uniswap_v3(&self) -> V3Deployment {
        let mut inner = self.lock().await;
        let state = &mut inner.state;
        let factory = state.allocate();
        let router = state.allocate();
        let position_manager = state.allocate();
        state.v3_factories.insert(factory, HashMap::new());
        state.v3_routers.insert(router, factory);
        state.v3_position_managers.insert(position_manager, factory);
        V3Deployment {
            factory,
            router,
            position_manager,
        }
    }

    /// Creates a pool at `sqrt_price_x96` backed by `liquidity` over the full tick range.
    pub async fn create_v3_pool(
        &self,
        factory: Address,
        token_a: Address,
        token_b: Address,
        fee: u32,
        sqrt_price_x96: U256,
        liquidity: u128,
    ) -> Result<Address> {
        let mut inner = self.lock().await;
        let state = &mut inner.state;
        if state.v3_pool_for(factory, token_a, token_b, fee)?.is_some() {
            bail!("pool already exists");
        }
        let (token0, token1) = sort_tokens(token_a, token_b);
        let pool = state.allocate();
        let tick = get_tick_at_sqrt_ratio(sqrt_price_x96)?;
        state.v3_pools.insert(
            pool,
            V3Pool {
                token0,
                token1,
                fee,
                sqrt_price_x96,
                tick,
                liquidity,
            },
        );
        state
            .v3_factories
            .entry(factory)
            .or_default()
            .insert((token0, token1, fee), pool);

        let (amount0, amount1) =
            get_amounts_for_liquidity(sqrt_price_x96, MIN_SQRT_RATIO, MAX_SQRT_RATIO, liquidity, true)?;
        state.mint(token0, pool, amount0)?;
        state.mint(token1, pool, amount1)?;
        Ok(pool)
    }

    /// Lets `operator` move or modify position `token_id` on behalf of `owner`.
    pub async fn approve_position(&self, position_manager: Address, owner: Address, operator: Address, token_id: U256) -> Result<()> {
        let mut inner = self.lock().await;
        let position = inner
            .state
            .v3_positions
            .get_mut(&(position_manager, token_id))
            .ok_or_else(|| anyhow!("Invalid token ID {}", token_id))?;
        if position.owner != owner {
            bail!("approve caller is not owner");
        }
        position.operator = Some(operator);
        Ok(())
    }

    pub async fn position_owner(&self, position_manager: Address, token_id: U256) -> Result<Address> {
        let inner = self.lock().await;
        Ok(inner.state.v3_position(position_manager, token_id)?.owner)
    }

    pub async fn deploy_balancer(&self) -> BalancerDeployment {
        let mut inner = self.lock().await;
        let state = &mut inner.state;
        let vault = state.allocate();
        let queries = state.allocate();
        state.balancer_vaults.insert(vault, HashMap::new());
        state.balancer_queries.insert(queries, vault);
        BalancerDeployment { vault, queries }
    }

    /// Registers a weighted pool. Weights and swap fee are 18-decimal fractions; the
    /// initial BPT supply (sum of balances) goes to [`LIQUIDITY_PROVIDER`].
    pub async fn create_balancer_pool(
        &self,
        vault: Address,
        tokens: Vec<Address>,
        weights: Vec<U256>,
        swap_fee: U256,
        balances: Vec<U256>,
    ) -> Result<(H256, Address)> {
        if tokens.len() < 2 || tokens.len() != weights.len() || tokens.len() != balances.len() {
            bail!("BAL#103 input length mismatch");
        }
        let mut inner = self.lock().await;
        let state = &mut inner.state;
        state.balancer_pools(vault)?;
        let address = state.deploy_token(18);

        let mut id = [0u8; 32];
        id[..20].copy_from_slice(address.as_bytes());
        id[21] = 1;
        let pool_id = H256::from(id);

        let mut supply = U256::zero();
        for (token, balance) in tokens.iter().zip(&balances) {
            state.mint(*token, vault, *balance)?;
            supply += *balance;
        }
        state.mint(address, LIQUIDITY_PROVIDER, supply)?;
        state.store_balancer_pool(
            vault,
            pool_id,
            WeightedPool {
                address,
                tokens,
                weights,
                swap_fee,
                balances,
            },
        );
        Ok((pool_id, address))
    }

    pub async fn deploy_ambient(&self) -> AmbientDeployment {
        let mut inner = self.lock().await;
        let state = &mut inner.state;
        let dex = state.allocate();
        let query = state.allocate();
        let impact = state.allocate();
        state.ambient_dexes.insert(dex, HashMap::new());
        state.ambient_queries.insert(query, dex);
        state.ambient_impacts.insert(impact, dex);
        AmbientDeployment { dex, query, impact }
    }

    /// Initializes an ambient pool at index `pool_idx` holding the given reserves.
    pub async fn create_ambient_pool(
        &self,
        dex: Address,
        token_a: Address,
        token_b: Address,
        pool_idx: u64,
        amount_a: U256,
        amount_b: U256,
        fee_ppm: u32,
    ) -> Result<AmbientPoolKey> {
        let (base, quote) = sort_tokens(token_a, token_b);
        let (base_reserve, quote_reserve) = if base == token_a {
            (amount_a, amount_b)
        } else {
            (amount_b, amount_a)
        };
        let key = AmbientPoolKey { base, quote, pool_idx };

        let mut inner = self.lock().await;
        let state = &mut inner.state;
        if !state.ambient_dexes.contains_key(&dex) {
            bail!("no Ambient dex at {:?}", dex);
        }
        state.mint(base, dex, base_reserve)?;
        state.mint(quote, dex, quote_reserve)?;
        let total_liquidity = crate::v3_math::sqrt_u256(base_reserve * quote_reserve);
        let mut positions = HashMap::new();
        positions.insert(LIQUIDITY_PROVIDER, total_liquidity);
        state.store_ambient_curve(
            dex,
            key,
            AmbientCurve {
                base_reserve,
                quote_reserve,
                fee_ppm,
                total_liquidity,
                positions,
            },
        );
        Ok(key)
    }
}

#[async_trait]
impl Erc20Api for SimulatedChain {
    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256> {
        self.lock().await.state.balance(token, owner)
    }

    async fn total_supply(&self, token: Address) -> Result<U256> {
        Ok(self.lock().await.state.ledger(token)?.total_supply)
    }

    async fn decimals(&self, token: Address) -> Result<u8> {
        Ok(self.lock().await.state.ledger(token)?.decimals)
    }

    async fn transfer(&self, token: Address, to: Address, amount: U256) -> Result<()> {
        self.inner
            .lock()
            .await
            .state
            .move_balance(token, self.account, to, amount)
    }

    async fn transfer_from(&self, token: Address, from: Address, to: Address, amount: U256) -> Result<()> {
        self.inner
            .lock()
            .await
            .state
            .pull(token, from, self.account, to, amount)
    }

    async fn approve(&self, token: Address, spender: Address, amount: U256) -> Result<()> {
        self.approve_from(self.account, token, spender, amount).await
    }
}

#[async_trait]
impl UniswapV2Api for SimulatedChain {
    async fn v2_get_pair(&self, factory: Address, token_a: Address, token_b: Address) -> Result<Address> {
        let inner = self.lock().await;
        Ok(inner
            .state
            .v2_pair_for(factory, token_a, token_b)?
            .unwrap_or_else(Address::zero))
    }

    async fn v2_get_reserves(&self, pair: Address) -> Result<(U256, U256)> {
        self.lock().await.state.v2_reserves(pair)
    }

    async fn v2_pair_tokens(&self, pair: Address) -> Result<(Address, Address)> {
        let info = self.lock().await.state.v2_pair(pair)?;
        Ok((info.token0, info.token1))
    }

    async fn v2_get_amounts_out(&self, router: Address, amount_in: U256, path: &[Address]) -> Result<Vec<U256>> {
        let inner = self.lock().await;
        Ok(inner.state.v2_amounts_out(router, amount_in, path)?.0)
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
        let mut inner = self.lock().await;
        let state = &mut inner.state;
        state.check_deadline(deadline)?;
        let (amounts, pairs) = state.v2_amounts_out(router, amount_in, path)?;
        let amount_out = amounts[amounts.len() - 1];
        if amount_out < amount_out_min {
            bail!("UniswapV2Router: INSUFFICIENT_OUTPUT_AMOUNT");
        }

        state.pull(path[0], self.account, router, pairs[0], amount_in)?;
        for (i, pair) in pairs.iter().enumerate() {
            let next = pairs.get(i + 1).copied().unwrap_or(to);
            state.move_balance(path[i + 1], *pair, next, amounts[i + 1])?;
        }
        debug!("sim v2 swap {:?} -> {}", path, amount_out);
        Ok(amounts)
    }

    async fn v2_add_liquidity(&self, router: Address, params: &V2AddLiquidity) -> Result<(U256, U256, U256)> {
        let mut inner = self.lock().await;
        let state = &mut inner.state;
        state.check_deadline(params.deadline)?;
        let factory = state.v2_factory_of(router)?;
        let pair = state.v2_create_pair(factory, params.token_a, params.token_b)?;
        let (reserve_a, reserve_b) = state.v2_oriented_reserves(pair, params.token_a)?;

        let (amount_a, amount_b) = if reserve_a.is_zero() && reserve_b.is_zero() {
            (params.amount_a_desired, params.amount_b_desired)
        } else {
            let amount_b_optimal = amm::v2_quote(params.amount_a_desired, reserve_a, reserve_b)?;
            if amount_b_optimal <= params.amount_b_desired {
                if amount_b_optimal < params.amount_b_min {
                    bail!("UniswapV2Router: INSUFFICIENT_B_AMOUNT");
                }
                (params.amount_a_desired, amount_b_optimal)
            } else {
                let amount_a_optimal = amm::v2_quote(params.amount_b_desired, reserve_b, reserve_a)?;
                if amount_a_optimal < params.amount_a_min {
                    bail!("UniswapV2Router: INSUFFICIENT_A_AMOUNT");
                }
                (amount_a_optimal, params.amount_b_desired)
            }
        };

        let (reserve0, reserve1) = state.v2_reserves(pair)?;
        state.pull(params.token_a, self.account, router, pair, amount_a)?;
        state.pull(params.token_b, self.account, router, pair, amount_b)?;
        let liquidity = state.v2_mint_liquidity(pair, reserve0, reserve1, params.to)?;
        Ok((amount_a, amount_b, liquidity))
    }

    async fn v2_remove_liquidity(&self, router: Address, params: &V2RemoveLiquidity) -> Result<(U256, U256)> {
        let mut inner = self.lock().await;
        let state = &mut inner.state;
        state.check_deadline(params.deadline)?;
        let factory = state.v2_factory_of(router)?;
        let pair = state
            .v2_pair_for(factory, params.token_a, params.token_b)?
            .ok_or_else(|| anyhow!("UniswapV2Router: pair does not exist"))?;
        state.pull(pair, self.account, router, pair, params.liquidity)?;

        let info = state.v2_pair(pair)?;
        let (balance0, balance1) = state.v2_reserves(pair)?;
        let supply = state.ledger(pair)?.total_supply;
        let amount0 = mul_div(params.liquidity, balance0, supply).unwrap_or_default();
        let amount1 = mul_div(params.liquidity, balance1, supply).unwrap_or_default();
        if amount0.is_zero() || amount1.is_zero() {
            bail!("UniswapV2: INSUFFICIENT_LIQUIDITY_BURNED");
        }
        state.burn(pair, pair, params.liquidity)?;
        state.move_balance(info.token0, pair, params.to, amount0)?;
        state.move_balance(info.token1, pair, params.to, amount1)?;

        let (amount_a, amount_b) = if params.token_a == info.token0 {
            (amount0, amount1)
        } else {
            (amount1, amount0)
        };
        if amount_a < params.amount_a_min {
            bail!("UniswapV2Router: INSUFFICIENT_A_AMOUNT");
        }
        if amount_b < params.amount_b_min {
            bail!("UniswapV2Router: INSUFFICIENT_B_AMOUNT");
        }
        Ok((amount_a, amount_b))
    }
}

#[async_trait]
impl UniswapV3Api for SimulatedChain {
    async fn v3_get_pool(&self, factory: Address, token_a: Address, token_b: Address, fee: u32) -> Result<Address> {
        let inner = self.lock().await;
        Ok(inner
            .state
            .v3_pool_for(factory, token_a, token_b, fee)?
            .unwrap_or_else(Address::zero))
    }

    async fn v3_liquidity(&self, pool: Address) -> Result<u128> {
        Ok(self.lock().await.state.v3_pool(pool)?.liquidity)
    }

    async fn v3_slot0(&self, pool: Address, _flavor: V3Flavor) -> Result<Slot0> {
        let pool = self.lock().await.state.v3_pool(pool)?;
        Ok(Slot0 {
            sqrt_price_x96: pool.sqrt_price_x96,
            tick: pool.tick,
        })
    }

    async fn v3_pool_tokens(&self, pool: Address) -> Result<(Address, Address, u32)> {
        let pool = self.lock().await.state.v3_pool(pool)?;
        Ok((pool.token0, pool.token1, pool.fee))
    }

    async fn v3_exact_input_single(&self, router: Address, flavor: V3Flavor, params: &ExactInputSingleParams) -> Result<U256> {
        let mut inner = self.lock().await;
        let state = &mut inner.state;
        if flavor == V3Flavor::Canonical {
            state.check_deadline(params.deadline)?;
        }
        let factory = state.v3_factory_of_router(router)?;
        let pool = state
            .v3_pool_for(factory, params.token_in, params.token_out, params.fee)?
            .ok_or_else(|| anyhow!("no pool for {:?}/{:?} at fee {}", params.token_in, params.token_out, params.fee))?;
        let amount_out = state.v3_swap(
            pool,
            params.token_in,
            params.amount_in,
            self.account,
            router,
            params.recipient,
        )?;
        if amount_out < params.amount_out_minimum {
            bail!("Too little received");
        }
        Ok(amount_out)
    }

    async fn v3_exact_input(&self, router: Address, flavor: V3Flavor, params: &ExactInputParams) -> Result<U256> {
        let mut inner = self.lock().await;
        let state = &mut inner.state;
        if flavor == V3Flavor::Canonical {
            state.check_deadline(params.deadline)?;
        }
        let factory = state.v3_factory_of_router(router)?;
        let (tokens, fees) = decode_v3_path(&params.path)?;

        let mut amount = params.amount_in;
        let mut payer = self.account;
        for (i, fee) in fees.iter().enumerate() {
            let pool = state
                .v3_pool_for(factory, tokens[i], tokens[i + 1], *fee)?
                .ok_or_else(|| anyhow!("no pool for {:?}/{:?} at fee {}", tokens[i], tokens[i + 1], fee))?;
            let recipient = if i + 1 == fees.len() { params.recipient } else { router };
            amount = state.v3_swap(pool, tokens[i], amount, payer, router, recipient)?;
            payer = router;
        }
        if amount < params.amount_out_minimum {
            bail!("Too little received");
        }
        Ok(amount)
    }

    async fn v3_mint(&self, position_manager: Address, params: &MintParams) -> Result<MintedPosition> {
        let mut inner = self.lock().await;
        let state = &mut inner.state;
        state.check_deadline(params.deadline)?;
        let factory = state.v3_factory_of_manager(position_manager)?;
        if params.token0 >= params.token1 {
            bail!("token0 must sort before token1");
        }
        let pool = state
            .v3_pool_for(factory, params.token0, params.token1, params.fee)?
            .ok_or_else(|| anyhow!("pool not initialized"))?;
        let (liquidity, amount0, amount1) = state.v3_add_liquidity(
            position_manager,
            pool,
            params.tick_lower,
            params.tick_upper,
            params.amount0_desired,
            params.amount1_desired,
            params.amount0_min,
            params.amount1_min,
            self.account,
        )?;

        let token_id = U256::from(state.next_token_id);
        state.next_token_id += 1;
        state.v3_positions.insert(
            (position_manager, token_id),
            V3Position {
                owner: params.recipient,
                operator: None,
                pool,
                tick_lower: params.tick_lower,
                tick_upper: params.tick_upper,
                liquidity,
                owed0: U256::zero(),
                owed1: U256::zero(),
            },
        );
        Ok(MintedPosition {
            token_id,
            liquidity,
            amount0,
            amount1,
        })
    }

    async fn v3_increase_liquidity(
        &self,
        position_manager: Address,
        params: &IncreaseLiquidityParams,
    ) -> Result<(u128, U256, U256)> {
        let mut inner = self.lock().await;
        let state = &mut inner.state;
        state.check_deadline(params.deadline)?;
        let mut position = state.v3_position(position_manager, params.token_id)?;
        let (liquidity, amount0, amount1) = state.v3_add_liquidity(
            position_manager,
            position.pool,
            position.tick_lower,
            position.tick_upper,
            params.amount0_desired,
            params.amount1_desired,
            params.amount0_min,
            params.amount1_min,
            self.account,
        )?;
        position.liquidity += liquidity;
        state
            .v3_positions
            .insert((position_manager, params.token_id), position);
        Ok((liquidity, amount0, amount1))
    }

    async fn v3_position(&self, position_manager: Address, token_id: U256) -> Result<PositionInfo> {
        let inner = self.lock().await;
        let position = inner.state.v3_position(position_manager, token_id)?;
        let pool = inner.state.v3_pool(position.pool)?;
        Ok(PositionInfo {
            token0: pool.token0,
            token1: pool.token1,
            fee: pool.fee,
            tick_lower: position.tick_lower,
            tick_upper: position.tick_upper,
            liquidity: position.liquidity,
        })
    }

    async fn v3_decrease_liquidity(&self, position_manager: Address, params: &DecreaseLiquidityParams) -> Result<(U256, U256)> {
        let mut inner = self.lock().await;
        let state = &mut inner.state;
        state.check_deadline(params.deadline)?;
        let mut position = state.v3_position(position_manager, params.token_id)?;
        state.v3_authorize(&position, self.account)?;
        if params.liquidity > position.liquidity {
            bail!("liquidity exceeds position");
        }
        let mut pool = state.v3_pool(position.pool)?;
        let (amount0, amount1) = get_amounts_for_liquidity(
            pool.sqrt_price_x96,
            get_sqrt_ratio_at_tick(position.tick_lower)?,
            get_sqrt_ratio_at_tick(position.tick_upper)?,
            params.liquidity,
            false,
        )?;
        if amount0 < params.amount0_min || amount1 < params.amount1_min {
            bail!("Price slippage check");
        }
        if pool.in_range(position.tick_lower, position.tick_upper) {
            pool.liquidity = pool.liquidity.saturating_sub(params.liquidity);
        }
        state.v3_pools.insert(position.pool, pool);
        position.liquidity -= params.liquidity;
        position.owed0 += amount0;
        position.owed1 += amount1;
        state
            .v3_positions
            .insert((position_manager, params.token_id), position);
        Ok((amount0, amount1))
    }

    async fn v3_collect(&self, position_manager: Address, token_id: U256, recipient: Address) -> Result<(U256, U256)> {
        let mut inner = self.lock().await;
        let state = &mut inner.state;
        let mut position = state.v3_position(position_manager, token_id)?;
        state.v3_authorize(&position, self.account)?;
        let pool = state.v3_pool(position.pool)?;
        let (owed0, owed1) = (position.owed0, position.owed1);
        state.move_balance(pool.token0, position.pool, recipient, owed0)?;
        state.move_balance(pool.token1, position.pool, recipient, owed1)?;
        position.owed0 = U256::zero();
        position.owed1 = U256::zero();
        state.v3_positions.insert((position_manager, token_id), position);
        Ok((owed0, owed1))
    }

    async fn v3_transfer_position(&self, position_manager: Address, from: Address, to: Address, token_id: U256) -> Result<()> {
        let mut inner = self.lock().await;
        let state = &mut inner.state;
        let mut position = state.v3_position(position_manager, token_id)?;
        if position.owner != from {
            bail!("ERC721: transfer from incorrect owner");
        }
        state.v3_authorize(&position, self.account)?;
        position.owner = to;
        position.operator = None;
        state.v3_positions.insert((position_manager, token_id), position);
        Ok(())
    }
}

#[async_trait]
impl BalancerApi for SimulatedChain {
    async fn balancer_get_pool_tokens(&self, vault: Address, pool_id: H256) -> Result<(Vec<Address>, Vec<U256>)> {
        let pool = self.lock().await.state.balancer_pool(vault, pool_id)?;
        Ok((pool.tokens, pool.balances))
    }

    async fn balancer_get_pool(&self, vault: Address, pool_id: H256) -> Result<Address> {
        Ok(self.lock().await.state.balancer_pool(vault, pool_id)?.address)
    }

    async fn balancer_swap(
        &self,
        vault: Address,
        swap: &BalancerSingleSwap,
        funds: FundManagement,
        limit: U256,
        deadline: U256,
    ) -> Result<U256> {
        let mut inner = self.lock().await;
        let state = &mut inner.state;
        state.check_deadline(deadline)?;
        if funds.sender != self.account {
            bail!("BAL#401 sender not allowed");
        }
        let mut pool = state.balancer_pool(vault, swap.pool_id)?;
        let (i, o, amount_out) = pool.out_given_in(swap.asset_in, swap.asset_out, swap.amount)?;
        if amount_out < limit {
            bail!("BAL#507 swap limit");
        }
        pool.balances[i] += swap.amount;
        pool.balances[o] -= amount_out;
        state.pull(swap.asset_in, funds.sender, vault, vault, swap.amount)?;
        state.move_balance(swap.asset_out, vault, funds.recipient, amount_out)?;
        state.store_balancer_pool(vault, swap.pool_id, pool);
        Ok(amount_out)
    }

    async fn balancer_query_swap(&self, queries: Address, swap: &BalancerSingleSwap, _funds: FundManagement) -> Result<U256> {
        let inner = self.lock().await;
        let vault = inner
            .state
            .balancer_queries
            .get(&queries)
            .copied()
            .ok_or_else(|| anyhow!("no Balancer queries contract at {:?}", queries))?;
        let pool = inner.state.balancer_pool(vault, swap.pool_id)?;
        Ok(pool.out_given_in(swap.asset_in, swap.asset_out, swap.amount)?.2)
    }

    async fn balancer_join_pool(&self, vault: Address, pool_id: H256, funds: FundManagement, request: &JoinPoolRequest) -> Result<()> {
        let mut inner = self.lock().await;
        let state = &mut inner.state;
        if funds.sender != self.account {
            bail!("BAL#401 sender not allowed");
        }
        let mut pool = state.balancer_pool(vault, pool_id)?;
        if request.assets != pool.tokens || request.max_amounts_in.len() != pool.tokens.len() {
            bail!("BAL#520 tokens mismatch");
        }
        let (amounts_in, min_bpt_out) = match decode_join_user_data(&request.user_data)? {
            BalancerUserData::ExactTokensInForBptOut {
                amounts_in,
                min_bpt_out,
            } => (amounts_in, min_bpt_out),
            BalancerUserData::ExactBptInForTokensOut { .. } => bail!("BAL#310 unhandled join kind"),
        };
        if amounts_in.len() != pool.tokens.len() {
            bail!("BAL#103 input length mismatch");
        }

        let supply = state.ledger(pool.address)?.total_supply;
        let one = U256::from(amm::ONE);
        let mut bpt_out = U256::zero();
        for (i, amount) in amounts_in.iter().enumerate() {
            if *amount > request.max_amounts_in[i] {
                bail!("BAL#506 join above max");
            }
            let share = mul_div(supply, *amount, pool.balances[i]).ok_or_else(|| anyhow!("BAL#000 overflow"))?;
            bpt_out += mul_div(share, pool.weights[i], one).ok_or_else(|| anyhow!("BAL#000 overflow"))?;
        }
        if bpt_out < min_bpt_out {
            bail!("BAL#208 BPT out below minimum");
        }

        for (i, amount) in amounts_in.iter().enumerate() {
            state.pull(pool.tokens[i], funds.sender, vault, vault, *amount)?;
            pool.balances[i] += *amount;
        }
        state.mint(pool.address, funds.recipient, bpt_out)?;
        state.store_balancer_pool(vault, pool_id, pool);
        Ok(())
    }

    async fn balancer_exit_pool(&self, vault: Address, pool_id: H256, funds: FundManagement, request: &ExitPoolRequest) -> Result<()> {
        let mut inner = self.lock().await;
        let state = &mut inner.state;
        if funds.sender != self.account {
            bail!("BAL#401 sender not allowed");
        }
        let mut pool = state.balancer_pool(vault, pool_id)?;
        if request.assets != pool.tokens || request.min_amounts_out.len() != pool.tokens.len() {
            bail!("BAL#520 tokens mismatch");
        }
        let bpt_in = match decode_exit_user_data(&request.user_data)? {
            BalancerUserData::ExactBptInForTokensOut { bpt_amount_in } => bpt_amount_in,
            BalancerUserData::ExactTokensInForBptOut { .. } => bail!("BAL#310 unhandled exit kind"),
        };

        let supply = state.ledger(pool.address)?.total_supply;
        let mut amounts_out = Vec::with_capacity(pool.tokens.len());
        for (i, balance) in pool.balances.iter().enumerate() {
            let amount = mul_div(*balance, bpt_in, supply).ok_or_else(|| anyhow!("BAL#000 overflow"))?;
            if amount < request.min_amounts_out[i] {
                bail!("BAL#505 exit below min");
            }
            amounts_out.push(amount);
        }

        state.burn(pool.address, funds.sender, bpt_in)?;
        for (i, amount) in amounts_out.iter().enumerate() {
            pool.balances[i] -= *amount;
            state.move_balance(pool.tokens[i], vault, funds.recipient, *amount)?;
        }
        state.store_balancer_pool(vault, pool_id, pool);
        Ok(())
    }
}

#[async_trait]
impl AmbientApi for SimulatedChain {
    async fn ambient_query_liquidity(&self, query: Address, pool: AmbientPoolKey) -> Result<u128> {
        let inner = self.lock().await;
        let dex = State::ambient_dex_of(&inner.state.ambient_queries, query)?;
        // uninitialized pools report zero liquidity
        let liquidity = match inner.state.ambient_curve(dex, &pool) {
            Ok(curve) => curve.total_liquidity,
            Err(_) => U256::zero(),
        };
        u128::try_from(liquidity).map_err(|_| anyhow!("liquidity overflow"))
    }

    async fn ambient_query_price(&self, query: Address, pool: AmbientPoolKey) -> Result<u128> {
        let inner = self.lock().await;
        let dex = State::ambient_dex_of(&inner.state.ambient_queries, query)?;
        let curve = inner.state.ambient_curve(dex, &pool)?;
        amm::ambient_sqrt_price(curve.base_reserve, curve.quote_reserve)
    }

    async fn ambient_query_ambient_tokens(&self, query: Address, owner: Address, pool: AmbientPoolKey) -> Result<(u128, U256, U256)> {
        let inner = self.lock().await;
        let dex = State::ambient_dex_of(&inner.state.ambient_queries, query)?;
        let curve = inner.state.ambient_curve(dex, &pool)?;
        let liquidity = curve.positions.get(&owner).copied().unwrap_or_default();
        let base = mul_div(curve.base_reserve, liquidity, curve.total_liquidity).unwrap_or_default();
        let quote = mul_div(curve.quote_reserve, liquidity, curve.total_liquidity).unwrap_or_default();
        let liquidity = u128::try_from(liquidity).map_err(|_| anyhow!("liquidity overflow"))?;
        Ok((liquidity, base, quote))
    }

    async fn ambient_calc_impact(&self, impact: Address, swap: &AmbientSwap) -> Result<AmbientFlows> {
        let inner = self.lock().await;
        let dex = State::ambient_dex_of(&inner.state.ambient_impacts, impact)?;
        let curve = inner.state.ambient_curve(dex, &swap.pool)?;
        let (qty, out) = curve.swap_amounts(swap)?;
        AmbientCurve::flows(swap.is_buy, qty, out)
    }

    async fn ambient_swap(&self, dex: Address, swap: &AmbientSwap) -> Result<AmbientFlows> {
        let mut inner = self.lock().await;
        let state = &mut inner.state;
        let mut curve = state.ambient_curve(dex, &swap.pool)?;
        let (qty, out) = curve.swap_amounts(swap)?;
        if out < U256::from(swap.min_out) {
            bail!("SL: slippage limit");
        }

        let (token_in, token_out) = if swap.is_buy {
            curve.base_reserve += qty;
            curve.quote_reserve -= out;
            (swap.pool.base, swap.pool.quote)
        } else {
            curve.quote_reserve += qty;
            curve.base_reserve -= out;
            (swap.pool.quote, swap.pool.base)
        };
        let price_after = amm::ambient_sqrt_price(curve.base_reserve, curve.quote_reserve)?;
        let limit_ok = if swap.is_buy {
            price_after <= swap.limit_price
        } else {
            price_after >= swap.limit_price
        };
        if !limit_ok {
            bail!("SD: price limit");
        }

        state.pull(token_in, self.account, dex, dex, qty)?;
        state.move_balance(token_out, dex, self.account, out)?;
        state.store_ambient_curve(dex, swap.pool, curve);
        AmbientCurve::flows(swap.is_buy, qty, out)
    }

    async fn ambient_user_cmd(&self, dex: Address, callpath: u16, cmd: Bytes) -> Result<AmbientFlows> {
        if callpath != AMBIENT_LP_PROXY_PATH {
            bail!("unsupported ambient callpath {}", callpath);
        }
        let cmd = decode_ambient_liquidity_cmd(&cmd)?;
        let key = AmbientPoolKey {
            base: cmd.base,
            quote: cmd.quote,
            pool_idx: cmd.pool_idx,
        };

        let mut inner = self.lock().await;
        let state = &mut inner.state;
        let mut curve = state.ambient_curve(dex, &key)?;
        let price = amm::ambient_sqrt_price(curve.base_reserve, curve.quote_reserve)?;
        if price < cmd.limit_lower || price > cmd.limit_higher {
            bail!("RC: range check");
        }

        let flows = match cmd.code {
            AmbientLiqCode::MintAmbientBase => {
                let base = U256::from(cmd.qty);
                let quote = crate::math::mul_div_rounding_up(base, curve.quote_reserve, curve.base_reserve)
                    .ok_or_else(|| anyhow!("mint overflow"))?;
                let liquidity = mul_div(curve.total_liquidity, base, curve.base_reserve)
                    .ok_or_else(|| anyhow!("mint overflow"))?;
                if liquidity.is_zero() {
                    bail!("zero liquidity minted");
                }
                state.pull(key.base, self.account, dex, dex, base)?;
                state.pull(key.quote, self.account, dex, dex, quote)?;
                curve.base_reserve += base;
                curve.quote_reserve += quote;
                curve.total_liquidity += liquidity;
                *curve.positions.entry(self.account).or_default() += liquidity;
                AmbientFlows {
                    base_flow: I256::try_from(base).map_err(|_| anyhow!("flow overflow"))?,
                    quote_flow: I256::try_from(quote).map_err(|_| anyhow!("flow overflow"))?,
                }
            }
            AmbientLiqCode::BurnAmbientLiq => {
                let liquidity = U256::from(cmd.qty);
                let owned = curve.positions.get(&self.account).copied().unwrap_or_default();
                if liquidity > owned {
                    bail!("burn exceeds position liquidity");
                }
                let base = mul_div(curve.base_reserve, liquidity, curve.total_liquidity).unwrap_or_default();
                let quote = mul_div(curve.quote_reserve, liquidity, curve.total_liquidity).unwrap_or_default();
                curve.base_reserve -= base;
                curve.quote_reserve -= quote;
                curve.total_liquidity -= liquidity;
                curve.positions.insert(self.account, owned - liquidity);
                state.move_balance(key.base, dex, self.account, base)?;
                state.move_balance(key.quote, dex, self.account, quote)?;
                AmbientFlows {
                    base_flow: -I256::try_from(base).map_err(|_| anyhow!("flow overflow"))?,
                    quote_flow: -I256::try_from(quote).map_err(|_| anyhow!("flow overflow"))?,
                }
            }
        };
        state.store_ambient_curve(dex, key, curve);
        Ok(flows)
    }
}

#[async_trait]
impl Checkpoint for SimulatedChain {
    async fn snapshot(&self) -> Result<U256> {
        let mut inner = self.lock().await;
        inner.next_snapshot += 1;
        let id = U256::from(inner.next_snapshot);
        let state = inner.state.clone();
        inner.snapshots.push((id, state));
        Ok(id)
    }

    async fn revert_to(&self, id: U256) -> Result<()> {
        let mut inner = self.lock().await;
        let index = inner
            .snapshots
            .iter()
            .position(|(snapshot, _)| *snapshot == id)
            .ok_or_else(|| anyhow!("unknown snapshot {}", id))?;
        let mut dropped = inner.snapshots.split_off(index);
        let (_, state) = dropped.swap_remove(0);
        inner.state = state;
        Ok(())
    }

    async fn release(&self, id: U256) -> Result<()> {
        let mut inner = self.lock().await;
        inner.snapshots.retain(|(snapshot, _)| *snapshot != id);
        Ok(())
    }
}

#[async_trait]
impl BlockApi for SimulatedChain {
    async fn block_timestamp(&self) -> Result<U256> {
        Ok(U256::from(self.lock().await.state.timestamp))
    }
}

impl Chain for SimulatedChain {
    fn account(&self) -> Address {
        self.account
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn e18(n: u64) -> U256 {
        U256::from(n) * U256::exp10(18)
    }

    #[tokio::test]
    async fn test_transfer_from_needs_allowance() {
        let account = Address::repeat_byte(0xee);
        let user = Address::repeat_byte(0x11);
        let chain = SimulatedChain::new(account);
        let token = chain.deploy_token(18).await;
        chain.mint(token, user, e18(5)).await.unwrap();

        assert!(chain.transfer_from(token, user, account, e18(1)).await.is_err());
        chain.approve_from(user, token, account, e18(2)).await.unwrap();
        chain.transfer_from(token, user, account, e18(2)).await.unwrap();
        assert_eq!(chain.balance_of(token, account).await.unwrap(), e18(2));
        assert_eq!(chain.allowance(token, user, account).await.unwrap(), U256::zero());
    }

    #[tokio::test]
    async fn test_revert_restores_state() {
        let account = Address::repeat_byte(0xee);
        let chain = SimulatedChain::new(account);
        let token = chain.deploy_token(6).await;
        chain.mint(token, account, U256::from(100)).await.unwrap();

        let id = chain.snapshot().await.unwrap();
        chain.transfer(token, Address::repeat_byte(1), U256::from(40)).await.unwrap();
        assert_eq!(chain.balance_of(token, account).await.unwrap(), U256::from(60));
        chain.revert_to(id).await.unwrap();
        assert_eq!(chain.balance_of(token, account).await.unwrap(), U256::from(100));
        assert!(chain.revert_to(id).await.is_err());
    }

    #[tokio::test]
    async fn test_block_timestamp_follows_clock() {
        let chain = SimulatedChain::new(Address::repeat_byte(0xee)).with_yielding();
        let now = chain.timestamp().await;
        assert_eq!(chain.block_timestamp().await.unwrap(), U256::from(now));
        chain.set_timestamp(now + 60).await;
        assert_eq!(chain.block_timestamp().await.unwrap(), U256::from(now + 60));
    }

    #[tokio::test]
    async fn test_v2_swap_respects_deadline() {
        let account = Address::repeat_byte(0xee);
        let chain = SimulatedChain::new(account);
        let a = chain.deploy_token(18).await;
        let b = chain.deploy_token(18).await;
        let v2 = chain.deploy_uniswap_v2().await;
        chain.seed_v2_pair(v2.factory, a, b, e18(1000), e18(1000)).await.unwrap();
        chain.mint(a, account, e18(1)).await.unwrap();
        chain.approve(a, v2.router, e18(1)).await.unwrap();

        let stale = U256::from(chain.timestamp().await - 1);
        assert!(chain
            .v2_swap_exact_tokens_for_tokens(v2.router, e18(1), U256::zero(), &[a, b], account, stale)
            .await
            .is_err());
        let amounts = chain
            .v2_swap_exact_tokens_for_tokens(v2.router, e18(1), U256::zero(), &[a, b], account, U256::MAX)
            .await
            .unwrap();
        assert_eq!(chain.balance_of(b, account).await.unwrap(), amounts[1]);
    }
}
