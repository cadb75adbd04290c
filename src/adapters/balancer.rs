//! Balancer-style weighted / stable pools behind a single vault.
//!
//! Pools are addressed by pool id and must be pinned for a pair; the vault executes
//! swaps, joins and exits, a separate queries contract previews swaps.

use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use tracing::debug;

use super::{AdapterContext, AddedLiquidity, Composition, LiquidityTarget, SwapRequest, VenueAdapter};
use crate::chain::{BalancerSingleSwap, Chain, ExitPoolRequest, FundManagement, JoinPoolRequest};
use crate::discovery::PoolRef;
use crate::encoding::{encode_exit_exact_bpt_in, encode_join_exact_tokens_in};
use crate::error::{RouterError, RouterResult};
use crate::venue::{EndpointKind, VenueId};

pub struct BalancerAdapter<'a, C: Chain + ?Sized> {
    ctx: AdapterContext<'a, C>,
}

impl<'a, C: Chain + ?Sized> BalancerAdapter<'a, C> {
    pub fn new(ctx: AdapterContext<'a, C>) -> Self {
        Self { ctx }
    }

    async fn pool_id(&self, token_in: Address, token_out: Address, pinned_pool: Option<PoolRef>) -> RouterResult<Option<H256>> {
        match self.ctx.pool_for(token_in, token_out, pinned_pool).await? {
            Some(candidate) => match candidate.pool {
                PoolRef::BalancerPool(pool_id) => Ok(Some(pool_id)),
                _ => Err(RouterError::TargetMismatch(self.ctx.venue)),
            },
            None => Ok(None),
        }
    }

    fn target_pool(&self, target: &LiquidityTarget) -> RouterResult<H256> {
        match target {
            LiquidityTarget::BalancerPool(pool_id) => Ok(*pool_id),
            _ => Err(RouterError::TargetMismatch(self.ctx.venue)),
        }
    }

    fn funds(&self, recipient: Address) -> FundManagement {
        FundManagement {
            sender: self.ctx.account(),
            recipient,
        }
    }

    async fn swap_in_pool(
        &self,
        pool_id: H256,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
        recipient: Address,
        deadline: U256,
    ) -> RouterResult<U256> {
        let vault = self.ctx.endpoint(EndpointKind::Execution)?;
        let swap = BalancerSingleSwap {
            pool_id,
            asset_in: token_in,
            asset_out: token_out,
            amount: amount_in,
        };
        self.ctx.approve(token_in, vault, amount_in).await?;
        let amount_out = self
            .ctx
            .chain
            .balancer_swap(vault, &swap, self.funds(recipient), U256::zero(), deadline)
            .await?;
        debug!(pool_id = ?pool_id, amount_in = %amount_in, amount_out = %amount_out, "balancer swap");
        Ok(amount_out)
    }

    async fn query(&self, pool_id: H256, token_in: Address, token_out: Address, amount_in: U256) -> RouterResult<U256> {
        let queries = self.ctx.endpoint(EndpointKind::Query)?;
        let swap = BalancerSingleSwap {
            pool_id,
            asset_in: token_in,
            asset_out: token_out,
            amount: amount_in,
        };
        let account = self.ctx.account();
        Ok(self
            .ctx
            .chain
            .balancer_query_swap(queries, &swap, self.funds(account))
            .await?)
    }

    async fn path_pools(&self, path: &[Address]) -> RouterResult<Vec<H256>> {
        let mut pools = Vec::with_capacity(path.len().saturating_sub(1));
        for pair in path.windows(2) {
            let pool_id = self
                .pool_id(pair[0], pair[1], None)
                .await?
                .ok_or(RouterError::NoPoolForMultihop {
                    token_a: pair[0],
                    token_b: pair[1],
                    venue: self.ctx.venue,
                })?;
            pools.push(pool_id);
        }
        Ok(pools)
    }
}

#[async_trait]
impl<'a, C: Chain + ?Sized> VenueAdapter for BalancerAdapter<'a, C> {
    fn venue(&self) -> VenueId {
        self.ctx.venue
    }

    async fn swap(&self, request: &SwapRequest) -> RouterResult<()> {
        let pool_id = self
            .pool_id(request.token_in, request.token_out, request.pinned_pool)
            .await?
            .ok_or(RouterError::NoPool {
                token_a: request.token_in,
                token_b: request.token_out,
                venue: self.ctx.venue,
            })?;
        self.swap_in_pool(
            pool_id,
            request.token_in,
            request.token_out,
            request.amount_in,
            request.recipient,
            request.deadline,
        )
        .await?;
        Ok(())
    }

    async fn swap_path(&self, path: &[Address], amount_in: U256, recipient: Address, deadline: U256) -> RouterResult<()> {
        let pools = self.path_pools(path).await?;
        let account = self.ctx.account();
        let mut amount = amount_in;
        for (i, pool_id) in pools.iter().enumerate() {
            let to = if i + 1 == pools.len() { recipient } else { account };
            amount = self
                .swap_in_pool(*pool_id, path[i], path[i + 1], amount, to, deadline)
                .await?;
        }
        Ok(())
    }

    async fn quote(&self, token_in: Address, token_out: Address, amount_in: U256, pinned_pool: Option<PoolRef>) -> RouterResult<U256> {
        let pool_id = self
            .pool_id(token_in, token_out, pinned_pool)
            .await?
            .ok_or(RouterError::NoPool {
                token_a: token_in,
                token_b: token_out,
                venue: self.ctx.venue,
            })?;
        self.query(pool_id, token_in, token_out, amount_in).await
    }

    async fn quote_path(&self, path: &[Address], amount_in: U256) -> RouterResult<U256> {
        let pools = self.path_pools(path).await?;
        let mut amount = amount_in;
        for (i, pool_id) in pools.iter().enumerate() {
            amount = self.query(*pool_id, path[i], path[i + 1], amount).await?;
        }
        Ok(amount)
    }

    async fn composition(&self, target: &LiquidityTarget) -> RouterResult<Composition> {
        let pool_id = self.target_pool(target)?;
        let vault = self.ctx.endpoint(EndpointKind::Execution)?;
        let (tokens, balances) = self.ctx.chain.balancer_get_pool_tokens(vault, pool_id).await?;
        Ok(Composition {
            pool: PoolRef::BalancerPool(pool_id),
            tokens,
            amounts: balances,
        })
    }

    async fn add_liquidity(
        &self,
        target: &LiquidityTarget,
        amounts: &[U256],
        recipient: Address,
        deadline: U256,
    ) -> RouterResult<AddedLiquidity> {
        let pool_id = self.target_pool(target)?;
        self.ctx.ensure_deadline(deadline).await?;
        let vault = self.ctx.endpoint(EndpointKind::Execution)?;
        let (tokens, _) = self.ctx.chain.balancer_get_pool_tokens(vault, pool_id).await?;
        if tokens.len() != amounts.len() {
            return Err(RouterError::TargetMismatch(self.ctx.venue));
        }
        for (token, amount) in tokens.iter().zip(amounts) {
            if !amount.is_zero() {
                self.ctx.approve(*token, vault, *amount).await?;
            }
        }

        let bpt = self.ctx.chain.balancer_get_pool(vault, pool_id).await?;
        let before = self.ctx.chain.balance_of(bpt, recipient).await?;
        let request = JoinPoolRequest {
            assets: tokens,
            max_amounts_in: amounts.to_vec(),
            user_data: encode_join_exact_tokens_in(amounts, U256::zero()),
        };
        self.ctx
            .chain
            .balancer_join_pool(vault, pool_id, self.funds(recipient), &request)
            .await?;
        let after = self.ctx.chain.balance_of(bpt, recipient).await?;
        let minted = after.saturating_sub(before);
        debug!(pool_id = ?pool_id, bpt = %minted, "balancer join");
        Ok(AddedLiquidity {
            position_tokens: minted,
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
        let pool_id = self.target_pool(target)?;
        self.ctx.ensure_deadline(deadline).await?;
        let vault = self.ctx.endpoint(EndpointKind::Execution)?;
        let account = self.ctx.account();
        let (tokens, _) = self.ctx.chain.balancer_get_pool_tokens(vault, pool_id).await?;
        let bpt = self.ctx.chain.balancer_get_pool(vault, pool_id).await?;

        if owner != account {
            self.ctx.chain.transfer_from(bpt, owner, account, amount).await?;
        }
        let request = ExitPoolRequest {
            assets: tokens.clone(),
            min_amounts_out: vec![U256::zero(); tokens.len()],
            user_data: encode_exit_exact_bpt_in(amount),
        };
        self.ctx
            .chain
            .balancer_exit_pool(vault, pool_id, self.funds(account), &request)
            .await?;
        debug!(pool_id = ?pool_id, bpt = %amount, "balancer exit");
        Ok(tokens)
    }
}
