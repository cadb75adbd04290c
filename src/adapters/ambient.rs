//! Ambient: a single dex contract holding every pool, addressed by
//! `(base, quote, pool index)` with the lower token address as base.
//!
//! Swaps are executed step by step and pay the chain account, which forwards the
//! final output. Liquidity is full range ("ambient") and owned by the chain account.

use async_trait::async_trait;
use ethers::types::{Address, U256};
use tracing::debug;

use super::{AdapterContext, AddedLiquidity, Composition, LiquidityTarget, SwapRequest, VenueAdapter};
use crate::chain::{AmbientPoolKey, AmbientSwap, Chain};
use crate::discovery::{ambient_pool_key, PoolRef};
use crate::encoding::{
    encode_ambient_liquidity_cmd, AmbientLiqCode, AmbientLiquidityCmd, AMBIENT_LP_PROXY_PATH, AMBIENT_MAX_SQRT_PRICE,
    AMBIENT_MIN_SQRT_PRICE,
};
use crate::error::{RouterError, RouterResult};
use crate::math::{mul_div, to_u128};
use crate::venue::{EndpointKind, VenueId};

/// Base quantity used to express a pool's token ratio.
const REFERENCE_BASE: u64 = 1_000_000_000_000_000_000;

/// Orientation of a swap step: paying base (`is_buy`) or paying quote.
fn step_swap(pool: AmbientPoolKey, token_in: Address, qty: u128) -> AmbientSwap {
    let is_buy = token_in == pool.base;
    AmbientSwap {
        pool,
        is_buy,
        in_base_qty: is_buy,
        qty,
        limit_price: if is_buy { AMBIENT_MAX_SQRT_PRICE } else { AMBIENT_MIN_SQRT_PRICE },
        min_out: 0,
    }
}

fn q64() -> U256 {
    U256::one() << 64
}

/// `amount * price` for a Q64.64 square-root price.
fn base_to_quote(amount: U256, sqrt_price: u128) -> Option<U256> {
    let sqrt_price = U256::from(sqrt_price);
    mul_div(mul_div(amount, sqrt_price, q64())?, sqrt_price, q64())
}

/// `amount / price` for a Q64.64 square-root price.
fn quote_to_base(amount: U256, sqrt_price: u128) -> Option<U256> {
    let sqrt_price = U256::from(sqrt_price);
    if sqrt_price.is_zero() {
        return None;
    }
    mul_div(mul_div(amount, q64(), sqrt_price)?, q64(), sqrt_price)
}

pub struct AmbientAdapter<'a, C: Chain + ?Sized> {
    ctx: AdapterContext<'a, C>,
}

impl<'a, C: Chain + ?Sized> AmbientAdapter<'a, C> {
    pub fn new(ctx: AdapterContext<'a, C>) -> Self {
        Self { ctx }
    }

    async fn pool_key(&self, token_in: Address, token_out: Address, pinned_pool: Option<PoolRef>) -> RouterResult<Option<AmbientPoolKey>> {
        match self.ctx.pool_for(token_in, token_out, pinned_pool).await? {
            Some(candidate) => match candidate.pool {
                PoolRef::AmbientIndex(pool_idx) => Ok(Some(ambient_pool_key(token_in, token_out, pool_idx))),
                _ => Err(RouterError::TargetMismatch(self.ctx.venue)),
            },
            None => Ok(None),
        }
    }

    /// Steps `(pool, token_in)` for a pair: the direct pool, else two steps through the
    /// wrapped-native token.
    async fn plan(&self, token_in: Address, token_out: Address, pinned_pool: Option<PoolRef>) -> RouterResult<Vec<(AmbientPoolKey, Address)>> {
        if let Some(pool) = self.pool_key(token_in, token_out, pinned_pool).await? {
            return Ok(vec![(pool, token_in)]);
        }
        let no_pool = RouterError::NoPool {
            token_a: token_in,
            token_b: token_out,
            venue: self.ctx.venue,
        };
        let intermediary = self.ctx.wrapped_native;
        if intermediary.is_zero() || token_in == intermediary || token_out == intermediary {
            return Err(no_pool);
        }
        let first = self.pool_key(token_in, intermediary, None).await?;
        let second = self.pool_key(intermediary, token_out, None).await?;
        match (first, second) {
            (Some(first), Some(second)) => Ok(vec![(first, token_in), (second, intermediary)]),
            _ => Err(no_pool),
        }
    }

    /// One step per consecutive pair of `path`.
    async fn path_plan(&self, path: &[Address]) -> RouterResult<Vec<(AmbientPoolKey, Address)>> {
        let mut steps = Vec::with_capacity(path.len().saturating_sub(1));
        for pair in path.windows(2) {
            let pool = self
                .pool_key(pair[0], pair[1], None)
                .await?
                .ok_or(RouterError::NoPoolForMultihop {
                    token_a: pair[0],
                    token_b: pair[1],
                    venue: self.ctx.venue,
                })?;
            steps.push((pool, pair[0]));
        }
        Ok(steps)
    }

    async fn execute(&self, steps: &[(AmbientPoolKey, Address)], amount_in: U256, token_out: Address, recipient: Address) -> RouterResult<()> {
        let dex = self.ctx.endpoint(EndpointKind::Execution)?;
        let mut amount = amount_in;
        for (pool, token_in) in steps {
            let swap = step_swap(*pool, *token_in, to_u128(amount)?);
            self.ctx.approve(*token_in, dex, amount).await?;
            let flows = self.ctx.chain.ambient_swap(dex, &swap).await?;
            amount = flows.paid_out(!swap.is_buy);
            debug!(pool_idx = pool.pool_idx, is_buy = swap.is_buy, amount_out = %amount, "ambient swap step");
        }
        self.ctx.deliver(token_out, recipient, amount).await
    }

    async fn preview(&self, steps: &[(AmbientPoolKey, Address)], amount_in: U256) -> RouterResult<U256> {
        let impact = self.ctx.endpoint(EndpointKind::Preview)?;
        let mut amount = amount_in;
        for (pool, token_in) in steps {
            let swap = step_swap(*pool, *token_in, to_u128(amount)?);
            let flows = self.ctx.chain.ambient_calc_impact(impact, &swap).await?;
            amount = flows.paid_out(!swap.is_buy);
        }
        Ok(amount)
    }

    fn target_pool(&self, target: &LiquidityTarget) -> RouterResult<AmbientPoolKey> {
        match *target {
            LiquidityTarget::AmbientPool { base, quote, pool_idx } => Ok(ambient_pool_key(base, quote, pool_idx)),
            _ => Err(RouterError::TargetMismatch(self.ctx.venue)),
        }
    }

    async fn sqrt_price(&self, pool: AmbientPoolKey) -> RouterResult<u128> {
        let query = self.ctx.endpoint(EndpointKind::Query)?;
        let sqrt_price = self.ctx.chain.ambient_query_price(query, pool).await?;
        if sqrt_price == 0 {
            return Err(RouterError::NoPool {
                token_a: pool.base,
                token_b: pool.quote,
                venue: self.ctx.venue,
            });
        }
        Ok(sqrt_price)
    }

    async fn owned_liquidity(&self, pool: AmbientPoolKey) -> RouterResult<u128> {
        let query = self.ctx.endpoint(EndpointKind::Query)?;
        let (liquidity, _, _) = self
            .ctx
            .chain
            .ambient_query_ambient_tokens(query, self.ctx.account(), pool)
            .await?;
        Ok(liquidity)
    }

    async fn liquidity_cmd(&self, code: AmbientLiqCode, pool: AmbientPoolKey, qty: u128) -> RouterResult<()> {
        let dex = self.ctx.endpoint(EndpointKind::Execution)?;
        let cmd = AmbientLiquidityCmd {
            code,
            base: pool.base,
            quote: pool.quote,
            pool_idx: pool.pool_idx,
            qty,
            limit_lower: AMBIENT_MIN_SQRT_PRICE,
            limit_higher: AMBIENT_MAX_SQRT_PRICE,
        };
        let flows = self
            .ctx
            .chain
            .ambient_user_cmd(dex, AMBIENT_LP_PROXY_PATH, encode_ambient_liquidity_cmd(&cmd))
            .await?;
        debug!(code = ?code, pool_idx = pool.pool_idx, base_flow = %flows.base_flow, quote_flow = %flows.quote_flow, "ambient liquidity");
        Ok(())
    }
}

#[async_trait]
impl<'a, C: Chain + ?Sized> VenueAdapter for AmbientAdapter<'a, C> {
    fn venue(&self) -> VenueId {
        self.ctx.venue
    }

    async fn swap(&self, request: &SwapRequest) -> RouterResult<()> {
        self.ctx.ensure_deadline(request.deadline).await?;
        let steps = self
            .plan(request.token_in, request.token_out, request.pinned_pool)
            .await?;
        self.execute(&steps, request.amount_in, request.token_out, request.recipient)
            .await
    }

    async fn swap_path(&self, path: &[Address], amount_in: U256, recipient: Address, deadline: U256) -> RouterResult<()> {
        self.ctx.ensure_deadline(deadline).await?;
        let steps = self.path_plan(path).await?;
        let token_out = path[path.len() - 1];
        self.execute(&steps, amount_in, token_out, recipient).await
    }

    async fn quote(&self, token_in: Address, token_out: Address, amount_in: U256, pinned_pool: Option<PoolRef>) -> RouterResult<U256> {
        let steps = self.plan(token_in, token_out, pinned_pool).await?;
        self.preview(&steps, amount_in).await
    }

    async fn quote_path(&self, path: &[Address], amount_in: U256) -> RouterResult<U256> {
        let steps = self.path_plan(path).await?;
        self.preview(&steps, amount_in).await
    }

    async fn composition(&self, target: &LiquidityTarget) -> RouterResult<Composition> {
        let pool = self.target_pool(target)?;
        let sqrt_price = self.sqrt_price(pool).await?;
        let base = U256::from(REFERENCE_BASE);
        let quote = base_to_quote(base, sqrt_price).ok_or(RouterError::Overflow("ambient composition"))?;
        Ok(Composition {
            pool: PoolRef::AmbientIndex(pool.pool_idx),
            tokens: vec![pool.base, pool.quote],
            amounts: vec![base, quote],
        })
    }

    async fn add_liquidity(
        &self,
        target: &LiquidityTarget,
        amounts: &[U256],
        _recipient: Address,
        deadline: U256,
    ) -> RouterResult<AddedLiquidity> {
        let pool = self.target_pool(target)?;
        self.ctx.ensure_deadline(deadline).await?;
        let (base_amount, quote_amount) = match amounts {
            [base, quote] => (*base, *quote),
            _ => return Err(RouterError::TargetMismatch(self.ctx.venue)),
        };
        let sqrt_price = self.sqrt_price(pool).await?;

        // the quote side is rounded up by the dex, keep headroom below the quote balance
        let affordable = quote_to_base(quote_amount, sqrt_price).ok_or(RouterError::Overflow("ambient mint"))?;
        let base_qty = base_amount.min(affordable);
        let base_qty = base_qty.saturating_sub(base_qty / U256::from(1_000_000u64) + U256::one());
        if base_qty.is_zero() {
            return Err(RouterError::ZeroAmount);
        }

        let dex = self.ctx.endpoint(EndpointKind::Execution)?;
        self.ctx.approve(pool.base, dex, base_amount).await?;
        self.ctx.approve(pool.quote, dex, quote_amount).await?;
        let before = self.owned_liquidity(pool).await?;
        self.liquidity_cmd(AmbientLiqCode::MintAmbientBase, pool, to_u128(base_qty)?)
            .await?;
        let after = self.owned_liquidity(pool).await?;
        Ok(AddedLiquidity {
            position_tokens: U256::from(after.saturating_sub(before)),
            token_id: None,
        })
    }

    async fn remove_liquidity(
        &self,
        target: &LiquidityTarget,
        amount: U256,
        _owner: Address,
        deadline: U256,
    ) -> RouterResult<Vec<Address>> {
        let pool = self.target_pool(target)?;
        self.ctx.ensure_deadline(deadline).await?;
        self.liquidity_cmd(AmbientLiqCode::BurnAmbientLiq, pool, to_u128(amount)?)
            .await?;
        Ok(vec![pool.base, pool.quote])
    }
}
