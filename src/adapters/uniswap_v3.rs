//! Concentrated-liquidity venues: UniswapV3, its SushiSwap deployment and the
//! PancakeSwap fork (deadline-free router params, `uint32` fee protocol in `slot0`).

use async_trait::async_trait;
use ethers::types::{Address, U256};
use tracing::debug;

use super::{AdapterContext, AddedLiquidity, Composition, LiquidityTarget, SwapRequest, VenueAdapter};
use crate::chain::{
    Chain, DecreaseLiquidityParams, ExactInputParams, ExactInputSingleParams, IncreaseLiquidityParams, MintParams,
};
use crate::discovery::{PoolCandidate, PoolRef};
use crate::encoding::encode_v3_path;
use crate::error::{RouterError, RouterResult};
use crate::math::to_u128;
use crate::v3_math::{apply_fee, get_amounts_for_liquidity, get_quote_at_tick, get_sqrt_ratio_at_tick};
use crate::venue::{EndpointKind, V3Flavor, VenueId};

/// Liquidity used to express a range's token ratio.
const REFERENCE_LIQUIDITY: u128 = 1_000_000_000_000_000_000;

pub struct UniswapV3Adapter<'a, C: Chain + ?Sized> {
    ctx: AdapterContext<'a, C>,
    flavor: V3Flavor,
}

/// A resolved hop: pool contract and fee tier.
#[derive(Debug, Clone, Copy)]
struct Leg {
    pool: Address,
    fee: u32,
}

impl<'a, C: Chain + ?Sized> UniswapV3Adapter<'a, C> {
    pub fn new(ctx: AdapterContext<'a, C>, flavor: V3Flavor) -> Self {
        Self { ctx, flavor }
    }

    fn leg(&self, candidate: PoolCandidate) -> RouterResult<Leg> {
        let pool = candidate
            .pool
            .address()
            .ok_or(RouterError::TargetMismatch(self.ctx.venue))?;
        let fee = u32::try_from(candidate.tier).map_err(|_| RouterError::Overflow("fee tier"))?;
        Ok(Leg { pool, fee })
    }

    async fn direct_leg(&self, token_in: Address, token_out: Address, pinned_pool: Option<PoolRef>) -> RouterResult<Option<Leg>> {
        match self.ctx.pool_for(token_in, token_out, pinned_pool).await? {
            Some(candidate) => Ok(Some(self.leg(candidate)?)),
            None => Ok(None),
        }
    }

    /// Tokens and legs of the two-hop fallback through the wrapped-native token.
    async fn intermediary_legs(&self, token_in: Address, token_out: Address) -> RouterResult<(Vec<Address>, Vec<Leg>)> {
        let no_pool = RouterError::NoPool {
            token_a: token_in,
            token_b: token_out,
            venue: self.ctx.venue,
        };
        let intermediary = self.ctx.wrapped_native;
        if intermediary.is_zero() || token_in == intermediary || token_out == intermediary {
            return Err(no_pool);
        }
        let first = self.direct_leg(token_in, intermediary, None).await?;
        let second = self.direct_leg(intermediary, token_out, None).await?;
        match (first, second) {
            (Some(first), Some(second)) => Ok((vec![token_in, intermediary, token_out], vec![first, second])),
            _ => Err(no_pool),
        }
    }

    /// Legs for every consecutive pair of `path`.
    async fn path_legs(&self, path: &[Address]) -> RouterResult<Vec<Leg>> {
        let mut legs = Vec::with_capacity(path.len().saturating_sub(1));
        for pair in path.windows(2) {
            let leg = self
                .direct_leg(pair[0], pair[1], None)
                .await?
                .ok_or(RouterError::NoPoolForMultihop {
                    token_a: pair[0],
                    token_b: pair[1],
                    venue: self.ctx.venue,
                })?;
            legs.push(leg);
        }
        Ok(legs)
    }

    async fn exact_input(&self, tokens: &[Address], legs: &[Leg], amount_in: U256, recipient: Address, deadline: U256) -> RouterResult<()> {
        let router = self.ctx.endpoint(EndpointKind::Execution)?;
        let fees: Vec<u32> = legs.iter().map(|leg| leg.fee).collect();
        let params = ExactInputParams {
            path: encode_v3_path(tokens, &fees)?,
            recipient,
            deadline,
            amount_in,
            amount_out_minimum: U256::zero(),
        };
        self.ctx.approve(tokens[0], router, amount_in).await?;
        let amount_out = self
            .ctx
            .chain
            .v3_exact_input(router, self.flavor, &params)
            .await?;
        debug!(venue = %self.ctx.venue, hops = legs.len(), amount_out = %amount_out, "v3 exact input");
        Ok(())
    }

    /// OracleLibrary-style spot quote across one leg.
    async fn quote_leg(&self, leg: Leg, token_in: Address, token_out: Address, amount_in: U256) -> RouterResult<U256> {
        let slot0 = self.ctx.chain.v3_slot0(leg.pool, self.flavor).await?;
        let after_fee = apply_fee(amount_in, leg.fee)?;
        get_quote_at_tick(slot0.tick, to_u128(after_fee)?, token_in, token_out)
    }

    async fn quote_legs(&self, tokens: &[Address], legs: &[Leg], amount_in: U256) -> RouterResult<U256> {
        let mut amount = amount_in;
        for (i, leg) in legs.iter().enumerate() {
            amount = self.quote_leg(*leg, tokens[i], tokens[i + 1], amount).await?;
        }
        Ok(amount)
    }

    async fn range_composition(&self, pool: Address, tick_lower: i32, tick_upper: i32) -> RouterResult<Composition> {
        let (token0, token1, _) = self.ctx.chain.v3_pool_tokens(pool).await?;
        let slot0 = self.ctx.chain.v3_slot0(pool, self.flavor).await?;
        let (amount0, amount1) = get_amounts_for_liquidity(
            slot0.sqrt_price_x96,
            get_sqrt_ratio_at_tick(tick_lower)?,
            get_sqrt_ratio_at_tick(tick_upper)?,
            REFERENCE_LIQUIDITY,
            false,
        )?;
        Ok(Composition {
            pool: PoolRef::Address(pool),
            tokens: vec![token0, token1],
            amounts: vec![amount0, amount1],
        })
    }

    async fn position_pool(&self, token_id: U256) -> RouterResult<(Address, i32, i32)> {
        let manager = self.ctx.endpoint(EndpointKind::PositionManager)?;
        let factory = self.ctx.endpoint(EndpointKind::Factory)?;
        let position = self.ctx.chain.v3_position(manager, token_id).await?;
        let pool = self
            .ctx
            .chain
            .v3_get_pool(factory, position.token0, position.token1, position.fee)
            .await?;
        if pool.is_zero() {
            return Err(RouterError::NoPool {
                token_a: position.token0,
                token_b: position.token1,
                venue: self.ctx.venue,
            });
        }
        Ok((pool, position.tick_lower, position.tick_upper))
    }
}

#[async_trait]
impl<'a, C: Chain + ?Sized> VenueAdapter for UniswapV3Adapter<'a, C> {
    fn venue(&self) -> VenueId {
        self.ctx.venue
    }

    async fn swap(&self, request: &SwapRequest) -> RouterResult<()> {
        let direct = self
            .direct_leg(request.token_in, request.token_out, request.pinned_pool)
            .await?;
        let leg = match direct {
            Some(leg) => leg,
            None => {
                let (tokens, legs) = self
                    .intermediary_legs(request.token_in, request.token_out)
                    .await?;
                return self
                    .exact_input(&tokens, &legs, request.amount_in, request.recipient, request.deadline)
                    .await;
            }
        };

        let router = self.ctx.endpoint(EndpointKind::Execution)?;
        let params = ExactInputSingleParams {
            token_in: request.token_in,
            token_out: request.token_out,
            fee: leg.fee,
            recipient: request.recipient,
            deadline: request.deadline,
            amount_in: request.amount_in,
            amount_out_minimum: U256::zero(),
        };
        self.ctx.approve(request.token_in, router, request.amount_in).await?;
        let amount_out = self
            .ctx
            .chain
            .v3_exact_input_single(router, self.flavor, &params)
            .await?;
        debug!(venue = %self.ctx.venue, pool = ?leg.pool, fee = leg.fee, amount_out = %amount_out, "v3 exact input single");
        Ok(())
    }

    async fn swap_path(&self, path: &[Address], amount_in: U256, recipient: Address, deadline: U256) -> RouterResult<()> {
        let legs = self.path_legs(path).await?;
        self.exact_input(path, &legs, amount_in, recipient, deadline).await
    }

    async fn quote(&self, token_in: Address, token_out: Address, amount_in: U256, pinned_pool: Option<PoolRef>) -> RouterResult<U256> {
        match self.direct_leg(token_in, token_out, pinned_pool).await? {
            Some(leg) => self.quote_leg(leg, token_in, token_out, amount_in).await,
            None => {
                let (tokens, legs) = self.intermediary_legs(token_in, token_out).await?;
                self.quote_legs(&tokens, &legs, amount_in).await
            }
        }
    }

    async fn quote_path(&self, path: &[Address], amount_in: U256) -> RouterResult<U256> {
        let legs = self.path_legs(path).await?;
        self.quote_legs(path, &legs, amount_in).await
    }

    async fn composition(&self, target: &LiquidityTarget) -> RouterResult<Composition> {
        match *target {
            LiquidityTarget::Range {
                pool,
                tick_lower,
                tick_upper,
            } => self.range_composition(pool, tick_lower, tick_upper).await,
            LiquidityTarget::Position(token_id) => {
                let (pool, tick_lower, tick_upper) = self.position_pool(token_id).await?;
                self.range_composition(pool, tick_lower, tick_upper).await
            }
            _ => Err(RouterError::TargetMismatch(self.ctx.venue)),
        }
    }

    async fn add_liquidity(
        &self,
        target: &LiquidityTarget,
        amounts: &[U256],
        recipient: Address,
        deadline: U256,
    ) -> RouterResult<AddedLiquidity> {
        let (amount0, amount1) = match amounts {
            [amount0, amount1] => (*amount0, *amount1),
            _ => return Err(RouterError::TargetMismatch(self.ctx.venue)),
        };
        let manager = self.ctx.endpoint(EndpointKind::PositionManager)?;

        match *target {
            LiquidityTarget::Range {
                pool,
                tick_lower,
                tick_upper,
            } => {
                let (token0, token1, fee) = self.ctx.chain.v3_pool_tokens(pool).await?;
                self.ctx.approve(token0, manager, amount0).await?;
                self.ctx.approve(token1, manager, amount1).await?;
                let params = MintParams {
                    token0,
                    token1,
                    fee,
                    tick_lower,
                    tick_upper,
                    amount0_desired: amount0,
                    amount1_desired: amount1,
                    amount0_min: U256::zero(),
                    amount1_min: U256::zero(),
                    recipient,
                    deadline,
                };
                let minted = self.ctx.chain.v3_mint(manager, &params).await?;
                debug!(pool = ?pool, token_id = %minted.token_id, liquidity = minted.liquidity, "v3 mint");
                Ok(AddedLiquidity {
                    position_tokens: U256::from(minted.liquidity),
                    token_id: Some(minted.token_id),
                })
            }
            LiquidityTarget::Position(token_id) => {
                let position = self.ctx.chain.v3_position(manager, token_id).await?;
                self.ctx.approve(position.token0, manager, amount0).await?;
                self.ctx.approve(position.token1, manager, amount1).await?;
                let params = IncreaseLiquidityParams {
                    token_id,
                    amount0_desired: amount0,
                    amount1_desired: amount1,
                    amount0_min: U256::zero(),
                    amount1_min: U256::zero(),
                    deadline,
                };
                let (liquidity, _, _) = self
                    .ctx
                    .chain
                    .v3_increase_liquidity(manager, &params)
                    .await?;
                Ok(AddedLiquidity {
                    position_tokens: U256::from(liquidity),
                    token_id: Some(token_id),
                })
            }
            _ => Err(RouterError::TargetMismatch(self.ctx.venue)),
        }
    }

    async fn remove_liquidity(
        &self,
        target: &LiquidityTarget,
        amount: U256,
        owner: Address,
        deadline: U256,
    ) -> RouterResult<Vec<Address>> {
        let token_id = match target {
            LiquidityTarget::Position(token_id) => *token_id,
            _ => return Err(RouterError::TargetMismatch(self.ctx.venue)),
        };
        let manager = self.ctx.endpoint(EndpointKind::PositionManager)?;
        let account = self.ctx.account();
        let position = self.ctx.chain.v3_position(manager, token_id).await?;
        let liquidity = to_u128(amount)?;

        if owner != account {
            self.ctx
                .chain
                .v3_transfer_position(manager, owner, account, token_id)
                .await?;
        }
        if liquidity > 0 {
            let params = DecreaseLiquidityParams {
                token_id,
                liquidity,
                amount0_min: U256::zero(),
                amount1_min: U256::zero(),
                deadline,
            };
            self.ctx.chain.v3_decrease_liquidity(manager, &params).await?;
        }
        let (amount0, amount1) = self.ctx.chain.v3_collect(manager, token_id, account).await?;
        if owner != account {
            self.ctx
                .chain
                .v3_transfer_position(manager, account, owner, token_id)
                .await?;
        }
        debug!(token_id = %token_id, amount0 = %amount0, amount1 = %amount1, "v3 remove liquidity");
        Ok(vec![position.token0, position.token1])
    }
}
