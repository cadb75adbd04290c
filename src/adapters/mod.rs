//! # Venue Adapters
//!
//! One execution strategy per venue family. The engine never branches on a venue
//! itself: [`adapter_for`] matches exhaustively on [`VenueKind`] and hands back the
//! adapter that knows how to swap, quote and provide liquidity on that family.
//!
//! Adapters operate on tokens already held by the chain account. They approve the
//! venue spender, issue the venue call with a zero venue-side minimum (slippage is
//! enforced once, by the engine) and deliver the output to the requested recipient.

pub mod ambient;
pub mod balancer;
pub mod uniswap_v2;
pub mod uniswap_v3;

use async_trait::async_trait;
use ethers::types::{Address, H256, U256};

use crate::chain::Chain;
use crate::discovery::{PoolCandidate, PoolDiscovery, PoolRef};
use crate::error::{RouterError, RouterResult};
use crate::registry::VenueRegistry;
use crate::venue::{EndpointKind, VenueId, VenueKind};

pub use ambient::AmbientAdapter;
pub use balancer::BalancerAdapter;
pub use uniswap_v2::UniswapV2Adapter;
pub use uniswap_v3::UniswapV3Adapter;

/// Venue-agnostic identification of a liquidity position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiquidityTarget {
    /// Constant-product pair; position tokens are the pair's LP token.
    Pair(Address),
    /// New concentrated-liquidity position on `pool` between two ticks.
    Range {
        pool: Address,
        tick_lower: i32,
        tick_upper: i32,
    },
    /// Existing concentrated-liquidity position NFT.
    Position(U256),
    /// Weighted / stable pool; position tokens are BPT.
    BalancerPool(H256),
    /// Full-range Ambient position held by the router account.
    AmbientPool {
        base: Address,
        quote: Address,
        pool_idx: u64,
    },
}

/// Underlying tokens of a liquidity target with amounts in the pool's current ratio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Composition {
    pub pool: PoolRef,
    pub tokens: Vec<Address>,
    pub amounts: Vec<U256>,
}

impl Composition {
    pub fn contains(&self, token: Address) -> bool {
        self.tokens.contains(&token)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddedLiquidity {
    /// LP / BPT tokens minted, or liquidity units for concentrated and Ambient positions.
    pub position_tokens: U256,
    pub token_id: Option<U256>,
}

/// Single-hop swap of tokens held by the chain account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapRequest {
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: U256,
    pub recipient: Address,
    pub deadline: U256,
    pub pinned_pool: Option<PoolRef>,
}

#[async_trait]
pub trait VenueAdapter: Send + Sync {
    fn venue(&self) -> VenueId;

    /// Swaps `amount_in` of `token_in`, delivering `token_out` to the recipient. Falls
    /// back to the wrapped-native intermediary where the venue family does.
    async fn swap(&self, request: &SwapRequest) -> RouterResult<()>;

    /// Swaps along an explicit token path (`path.len() >= 2`, checked by the caller).
    async fn swap_path(&self, path: &[Address], amount_in: U256, recipient: Address, deadline: U256) -> RouterResult<()>;

    async fn quote(&self, token_in: Address, token_out: Address, amount_in: U256, pinned_pool: Option<PoolRef>) -> RouterResult<U256>;

    async fn quote_path(&self, path: &[Address], amount_in: U256) -> RouterResult<U256>;

    async fn composition(&self, target: &LiquidityTarget) -> RouterResult<Composition>;

    /// Adds `amounts` (aligned with [`Composition::tokens`]) from the chain account.
    async fn add_liquidity(
        &self,
        target: &LiquidityTarget,
        amounts: &[U256],
        recipient: Address,
        deadline: U256,
    ) -> RouterResult<AddedLiquidity>;

    /// Takes `amount` of the position from `owner` and redeems it into the chain
    /// account. Returns the underlying tokens that were paid out.
    async fn remove_liquidity(
        &self,
        target: &LiquidityTarget,
        amount: U256,
        owner: Address,
        deadline: U256,
    ) -> RouterResult<Vec<Address>>;
}

/// Everything an adapter needs for one venue during one call.
pub struct AdapterContext<'a, C: Chain + ?Sized> {
    pub chain: &'a C,
    pub registry: &'a VenueRegistry,
    pub discovery: &'a PoolDiscovery<C>,
    pub venue: VenueId,
    pub wrapped_native: Address,
}

impl<'a, C: Chain + ?Sized> Clone for AdapterContext<'a, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, C: Chain + ?Sized> Copy for AdapterContext<'a, C> {}

impl<'a, C: Chain + ?Sized> AdapterContext<'a, C> {
    pub fn endpoint(&self, endpoint: EndpointKind) -> RouterResult<Address> {
        self.registry.endpoint(self.venue, endpoint)
    }

    pub fn account(&self) -> Address {
        self.chain.account()
    }

    /// Pool for a pair: the hop's pinned pool, else the registry pin, else discovery.
    pub async fn pool_for(
        &self,
        token_in: Address,
        token_out: Address,
        pinned_pool: Option<PoolRef>,
    ) -> RouterResult<Option<PoolCandidate>> {
        let pinned = pinned_pool.or_else(|| self.registry.pinned_pool(self.venue, token_in, token_out));
        self.discovery
            .resolve_pool(token_in, token_out, self.venue, pinned)
            .await
    }

    /// Rejects a deadline that is already behind the latest block. For venue calls that
    /// take no deadline of their own.
    pub async fn ensure_deadline(&self, deadline: U256) -> RouterResult<()> {
        let now = self.chain.block_timestamp().await?;
        if deadline < now {
            return Err(RouterError::DeadlineExpired { deadline, now });
        }
        Ok(())
    }

    pub fn is_intermediary(&self, token: Address) -> bool {
        !self.wrapped_native.is_zero() && token == self.wrapped_native
    }

    /// Exact approval of `spender` for the next venue call.
    pub async fn approve(&self, token: Address, spender: Address, amount: U256) -> RouterResult<()> {
        self.chain.approve(token, spender, amount).await?;
        Ok(())
    }

    /// Forwards tokens the venue paid to the chain account when the recipient is elsewhere.
    pub async fn deliver(&self, token: Address, recipient: Address, amount: U256) -> RouterResult<()> {
        if recipient != self.account() && !amount.is_zero() {
            self.chain.transfer(token, recipient, amount).await?;
        }
        Ok(())
    }
}

/// Adapter for the venue in `ctx`; exhaustive over every venue family.
pub fn adapter_for<'a, C>(ctx: AdapterContext<'a, C>) -> Box<dyn VenueAdapter + 'a>
where
    C: Chain + ?Sized + 'a,
{
    match ctx.venue.kind() {
        VenueKind::ConstantProduct => Box::new(UniswapV2Adapter::new(ctx)),
        VenueKind::Concentrated(flavor) => Box::new(UniswapV3Adapter::new(ctx, flavor)),
        VenueKind::WeightedPool => Box::new(BalancerAdapter::new(ctx)),
        VenueKind::TickIndexed => Box::new(AmbientAdapter::new(ctx)),
    }
}
