//! Constant-product venues (UniswapV2 and forks) behind a V2 router.

use async_trait::async_trait;
use ethers::types::{Address, U256};
use tracing::debug;

use super::{AdapterContext, AddedLiquidity, Composition, LiquidityTarget, SwapRequest, VenueAdapter};
use crate::chain::{Chain, V2AddLiquidity, V2RemoveLiquidity};
use crate::discovery::PoolRef;
use crate::error::{RouterError, RouterResult};
use crate::venue::{EndpointKind, VenueId};

pub struct UniswapV2Adapter<'a, C: Chain + ?Sized> {
    ctx: AdapterContext<'a, C>,
}

impl<'a, C: Chain + ?Sized> UniswapV2Adapter<'a, C> {
    pub fn new(ctx: AdapterContext<'a, C>) -> Self {
        Self { ctx }
    }

    /// Router path for a pair: direct when either side is the intermediary or a pool is
    /// pinned, otherwise through the intermediary.
    fn path_for(&self, token_in: Address, token_out: Address, pinned_pool: Option<PoolRef>) -> Vec<Address> {
        let pinned = pinned_pool.is_some()
            || self
                .ctx
                .registry
                .pinned_pool(self.ctx.venue, token_in, token_out)
                .is_some();
        if pinned
            || self.ctx.wrapped_native.is_zero()
            || self.ctx.is_intermediary(token_in)
            || self.ctx.is_intermediary(token_out)
        {
            vec![token_in, token_out]
        } else {
            vec![token_in, self.ctx.wrapped_native, token_out]
        }
    }

    fn pair(&self, target: &LiquidityTarget) -> RouterResult<Address> {
        match target {
            LiquidityTarget::Pair(pair) => Ok(*pair),
            _ => Err(RouterError::TargetMismatch(self.ctx.venue)),
        }
    }

    async fn execute(&self, path: &[Address], amount_in: U256, recipient: Address, deadline: U256) -> RouterResult<()> {
        let router = self.ctx.endpoint(EndpointKind::Execution)?;
        self.ctx.approve(path[0], router, amount_in).await?;
        let amounts = self
            .ctx
            .chain
            .v2_swap_exact_tokens_for_tokens(router, amount_in, U256::zero(), path, recipient, deadline)
            .await?;
        debug!(venue = %self.ctx.venue, hops = path.len() - 1, amounts = ?amounts, "v2 swap");
        Ok(())
    }
}

#[async_trait]
impl<'a, C: Chain + ?Sized> VenueAdapter for UniswapV2Adapter<'a, C> {
    fn venue(&self) -> VenueId {
        self.ctx.venue
    }

    async fn swap(&self, request: &SwapRequest) -> RouterResult<()> {
        let path = self.path_for(request.token_in, request.token_out, request.pinned_pool);
        self.execute(&path, request.amount_in, request.recipient, request.deadline)
            .await
    }

    async fn swap_path(&self, path: &[Address], amount_in: U256, recipient: Address, deadline: U256) -> RouterResult<()> {
        self.execute(path, amount_in, recipient, deadline).await
    }

    async fn quote(&self, token_in: Address, token_out: Address, amount_in: U256, pinned_pool: Option<PoolRef>) -> RouterResult<U256> {
        let path = self.path_for(token_in, token_out, pinned_pool);
        self.quote_path(&path, amount_in).await
    }

    async fn quote_path(&self, path: &[Address], amount_in: U256) -> RouterResult<U256> {
        let router = self.ctx.endpoint(EndpointKind::Execution)?;
        let amounts = self
            .ctx
            .chain
            .v2_get_amounts_out(router, amount_in, path)
            .await?;
        Ok(amounts.last().copied().unwrap_or_default())
    }

    async fn composition(&self, target: &LiquidityTarget) -> RouterResult<Composition> {
        let pair = self.pair(target)?;
        let (token0, token1) = self.ctx.chain.v2_pair_tokens(pair).await?;
        let (reserve0, reserve1) = self.ctx.chain.v2_get_reserves(pair).await?;
        Ok(Composition {
            pool: PoolRef::Address(pair),
            tokens: vec![token0, token1],
            amounts: vec![reserve0, reserve1],
        })
    }

    async fn add_liquidity(
        &self,
        target: &LiquidityTarget,
        amounts: &[U256],
        recipient: Address,
        deadline: U256,
    ) -> RouterResult<AddedLiquidity> {
        let pair = self.pair(target)?;
        let (amount0, amount1) = match amounts {
            [amount0, amount1] => (*amount0, *amount1),
            _ => return Err(RouterError::TargetMismatch(self.ctx.venue)),
        };
        let router = self.ctx.endpoint(EndpointKind::Execution)?;
        let (token0, token1) = self.ctx.chain.v2_pair_tokens(pair).await?;
        self.ctx.approve(token0, router, amount0).await?;
        self.ctx.approve(token1, router, amount1).await?;

        let params = V2AddLiquidity {
            token_a: token0,
            token_b: token1,
            amount_a_desired: amount0,
            amount_b_desired: amount1,
            amount_a_min: U256::zero(),
            amount_b_min: U256::zero(),
            to: recipient,
            deadline,
        };
        let (used0, used1, liquidity) = self.ctx.chain.v2_add_liquidity(router, &params).await?;
        debug!(pair = ?pair, used0 = %used0, used1 = %used1, liquidity = %liquidity, "v2 add liquidity");
        Ok(AddedLiquidity {
            position_tokens: liquidity,
            token_id: None,
        })
    }

    async fn remove_liquidity(
        &self,
        target: &LiquidityTarget,
        amount: U256,
        owner: Address,
        deadline: U256,
    ) -> RouterResult<Vec<Address>> {
        let pair = self.pair(target)?;
        let router = self.ctx.endpoint(EndpointKind::Execution)?;
        let account = self.ctx.account();
        let (token0, token1) = self.ctx.chain.v2_pair_tokens(pair).await?;

        if owner != account {
            self.ctx.chain.transfer_from(pair, owner, account, amount).await?;
        }
        self.ctx.approve(pair, router, amount).await?;
        let params = V2RemoveLiquidity {
            token_a: token0,
            token_b: token1,
            liquidity: amount,
            amount_a_min: U256::zero(),
            amount_b_min: U256::zero(),
            to: account,
            deadline,
        };
        let (amount0, amount1) = self.ctx.chain.v2_remove_liquidity(router, &params).await?;
        debug!(pair = ?pair, amount0 = %amount0, amount1 = %amount1, "v2 remove liquidity");
        Ok(vec![token0, token1])
    }
}
