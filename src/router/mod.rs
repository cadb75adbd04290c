//! # Swap Router
//!
//! Top-level swap entry points. Every call validates its inputs, takes a chain
//! checkpoint, pulls the input from the caller into the router account, dispatches to
//! the venue adapter and measures the output as the recipient's balance delta. Any
//! failure, including an output below the caller's minimum, reverts the checkpoint.
//!
//! Top-level calls run one at a time: a checkpoint covers the whole chain, so a
//! concurrent call reverting it, or moving router-account balances in between, would
//! corrupt another call's accounting.
//!
//! Route-based swaps consult the [`RouteStore`]; composite hops expand into the route
//! stored for their own pair, bounded by a [`RouteDepth`] created per call.

pub mod quote;

use std::sync::Arc;

use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::adapters::{adapter_for, AdapterContext, SwapRequest, VenueAdapter};
use crate::chain::{atomically, CallContext, Chain};
use crate::discovery::{CandidateSets, PoolDiscovery, PoolRef};
use crate::error::{ensure_address, ensure_amount, RouterError, RouterResult};
use crate::metrics;
use crate::registry::VenueRegistry;
use crate::route_store::{HopDescriptor, Route, RouteDepth, RouteStore};
use crate::venue::{VenueEndpoints, VenueId};

pub const DEFAULT_MAX_ROUTE_DEPTH: usize = 20;
/// Smallest depth bound that can run a routed swap: the top-level expansion counts
/// as the first descent.
pub const MIN_ROUTE_DEPTH: usize = 2;

/// What a routed swap does when no route is stored for a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Single hop on the default venue, which tries a direct pool and then the
    /// wrapped-native intermediary.
    #[default]
    DirectThenIntermediary,
    /// Fail with `NoRoute`.
    RequireConfiguredRoute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingPolicy {
    /// Only account allowed to change the registry and routes.
    pub operator: Address,
    /// Intermediary token for two-hop fallbacks; zero disables them.
    pub wrapped_native: Address,
    /// Descent bound for route expansion, top level included. Below
    /// [`MIN_ROUTE_DEPTH`] every routed swap fails.
    pub max_route_depth: usize,
    pub fallback: FallbackPolicy,
}

impl RoutingPolicy {
    pub fn new(operator: Address, wrapped_native: Address) -> Self {
        Self {
            operator,
            wrapped_native,
            max_route_depth: DEFAULT_MAX_ROUTE_DEPTH,
            fallback: FallbackPolicy::default(),
        }
    }

    pub fn with_fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_max_route_depth(mut self, max_route_depth: usize) -> Self {
        self.max_route_depth = max_route_depth;
        self
    }
}

pub struct SwapRouter<C: Chain + ?Sized> {
    chain: Arc<C>,
    registry: Arc<VenueRegistry>,
    routes: RouteStore,
    discovery: PoolDiscovery<C>,
    policy: RoutingPolicy,
    exec_lock: Mutex<()>,
}

impl<C: Chain + ?Sized> SwapRouter<C> {
    pub fn new(chain: Arc<C>, policy: RoutingPolicy, default_venue: VenueId, candidates: CandidateSets) -> Self {
        let registry = Arc::new(VenueRegistry::new(default_venue));
        let discovery = PoolDiscovery::new(Arc::clone(&chain), Arc::clone(&registry), candidates);
        Self {
            chain,
            registry,
            routes: RouteStore::new(),
            discovery,
            policy,
            exec_lock: Mutex::new(()),
        }
    }

    pub fn chain(&self) -> &Arc<C> {
        &self.chain
    }

    pub fn registry(&self) -> &VenueRegistry {
        &self.registry
    }

    pub fn routes(&self) -> &RouteStore {
        &self.routes
    }

    pub fn discovery(&self) -> &PoolDiscovery<C> {
        &self.discovery
    }

    pub fn policy(&self) -> &RoutingPolicy {
        &self.policy
    }

    /// Serializes top-level calls. Held from before the checkpoint is taken until it
    /// is released or reverted.
    pub(crate) async fn exclusive(&self) -> MutexGuard<'_, ()> {
        self.exec_lock.lock().await
    }

    /// Configuration surface, available to the operator only.
    pub fn configure(&self, caller: Address) -> RouterResult<Configurator<'_, C>> {
        if caller != self.policy.operator {
            return Err(RouterError::Unauthorized(caller));
        }
        Ok(Configurator { router: self })
    }

    /// Adapter for a registered venue.
    pub(crate) fn adapter(&self, venue: VenueId) -> RouterResult<Box<dyn VenueAdapter + '_>> {
        if !self.registry.is_registered(venue) {
            return Err(RouterError::UnsupportedVenue(venue.name().to_string()));
        }
        Ok(adapter_for(AdapterContext {
            chain: self.chain.as_ref(),
            registry: self.registry.as_ref(),
            discovery: &self.discovery,
            venue,
            wrapped_native: self.policy.wrapped_native,
        }))
    }

    fn validate_pair(token_in: Address, token_out: Address, amount_in: U256) -> RouterResult<()> {
        ensure_address(token_in, "token in")?;
        ensure_address(token_out, "token out")?;
        ensure_amount(amount_in)?;
        if token_in == token_out {
            return Err(RouterError::IdenticalTokens(token_in));
        }
        Ok(())
    }

    fn validate_path(path: &[Address], amount_in: U256) -> RouterResult<()> {
        if path.len() < 2 {
            return Err(RouterError::PathTooShort(path.len()));
        }
        for token in path {
            ensure_address(*token, "path token")?;
        }
        for pair in path.windows(2) {
            if pair[0] == pair[1] {
                return Err(RouterError::IdenticalTokens(pair[0]));
            }
        }
        ensure_amount(amount_in)
    }

    /// Moves the caller's input into the router account.
    pub(crate) async fn pull(&self, ctx: &CallContext, token: Address, amount: U256) -> RouterResult<()> {
        let account = self.chain.account();
        if ctx.sender != account {
            self.chain
                .transfer_from(token, ctx.sender, account, amount)
                .await?;
        }
        Ok(())
    }

    async fn settle(&self, token_out: Address, recipient: Address, before: U256, min_out: U256) -> RouterResult<U256> {
        let after = self.chain.balance_of(token_out, recipient).await?;
        let amount_out = after.saturating_sub(before);
        if amount_out < min_out {
            return Err(RouterError::InsufficientOutput {
                actual: amount_out,
                minimum: min_out,
            });
        }
        Ok(amount_out)
    }

    fn record(&self, venue: Option<VenueId>, result: &RouterResult<U256>) {
        let label = venue.map(VenueId::name).unwrap_or("route");
        metrics::increment_swaps(label, metrics::outcome(result));
        if let Err(err) = result {
            metrics::increment_errors(err.category().as_str());
            warn!(venue = label, category = err.category().as_str(), "swap failed: {}", err);
        }
    }

    /// Swaps `amount_in` of `token_in` held by the router account into `token_out` for
    /// `recipient` through one hop descriptor. Returns the recipient's balance delta.
    pub(crate) async fn execute_hop(&self, hop: &HopDescriptor, amount_in: U256, recipient: Address, deadline: U256) -> RouterResult<U256> {
        let adapter = self.adapter(hop.venue)?;
        let before = self.chain.balance_of(hop.token_out, recipient).await?;
        adapter
            .swap(&SwapRequest {
                token_in: hop.token_in,
                token_out: hop.token_out,
                amount_in,
                recipient,
                deadline,
                pinned_pool: hop.pinned_pool,
            })
            .await?;
        let after = self.chain.balance_of(hop.token_out, recipient).await?;
        let amount_out = after.saturating_sub(before);
        debug!(venue = %hop.venue, amount_in = %amount_in, amount_out = %amount_out, "hop executed");
        Ok(amount_out)
    }

    /// Single conversion on `venue`, with the venue's direct / intermediary fallback.
    #[allow(clippy::too_many_arguments)]
    pub async fn swap(
        &self,
        ctx: &CallContext,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
        min_out: U256,
        recipient: Address,
        venue: VenueId,
    ) -> RouterResult<U256> {
        let result = async {
            Self::validate_pair(token_in, token_out, amount_in)?;
            ensure_address(recipient, "recipient")?;
            let adapter = self.adapter(venue)?;
            let _guard = self.exclusive().await;
            atomically(self.chain.as_ref(), async {
                let before = self.chain.balance_of(token_out, recipient).await?;
                self.pull(ctx, token_in, amount_in).await?;
                adapter
                    .swap(&SwapRequest {
                        token_in,
                        token_out,
                        amount_in,
                        recipient,
                        deadline: ctx.deadline,
                        pinned_pool: None,
                    })
                    .await?;
                self.settle(token_out, recipient, before, min_out).await
            })
            .await
        }
        .await;

        self.record(Some(venue), &result);
        if let Ok(amount_out) = &result {
            info!(venue = %venue, token_in = ?token_in, token_out = ?token_out, amount_in = %amount_in, amount_out = %amount_out, "swap");
        }
        result
    }

    /// Conversion along an explicit token path on one venue.
    pub async fn swap_with_path(
        &self,
        ctx: &CallContext,
        path: &[Address],
        amount_in: U256,
        min_out: U256,
        recipient: Address,
        venue: VenueId,
    ) -> RouterResult<U256> {
        let result = async {
            Self::validate_path(path, amount_in)?;
            ensure_address(recipient, "recipient")?;
            let adapter = self.adapter(venue)?;
            let token_in = path[0];
            let token_out = path[path.len() - 1];
            let _guard = self.exclusive().await;
            atomically(self.chain.as_ref(), async {
                let before = self.chain.balance_of(token_out, recipient).await?;
                self.pull(ctx, token_in, amount_in).await?;
                adapter
                    .swap_path(path, amount_in, recipient, ctx.deadline)
                    .await?;
                self.settle(token_out, recipient, before, min_out).await
            })
            .await
        }
        .await;

        self.record(Some(venue), &result);
        if let Ok(amount_out) = &result {
            info!(venue = %venue, hops = path.len() - 1, amount_in = %amount_in, amount_out = %amount_out, "path swap");
        }
        result
    }

    /// Conversion following the stored route for the pair (or the fallback policy).
    pub async fn swap_with_route(
        &self,
        ctx: &CallContext,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
        min_out: U256,
        recipient: Address,
    ) -> RouterResult<U256> {
        let result = async {
            Self::validate_pair(token_in, token_out, amount_in)?;
            ensure_address(recipient, "recipient")?;
            let hops = self.expand_route(token_in, token_out)?;
            metrics::record_route_hops(hops.len());
            let account = self.chain.account();

            let _guard = self.exclusive().await;
            atomically(self.chain.as_ref(), async {
                let before = self.chain.balance_of(token_out, recipient).await?;
                self.pull(ctx, token_in, amount_in).await?;
                let mut amount = amount_in;
                for (i, hop) in hops.iter().enumerate() {
                    let to = if i + 1 == hops.len() { recipient } else { account };
                    amount = self.execute_hop(hop, amount, to, ctx.deadline).await?;
                }
                self.settle(token_out, recipient, before, min_out).await
            })
            .await
        }
        .await;

        self.record(None, &result);
        if let Ok(amount_out) = &result {
            info!(token_in = ?token_in, token_out = ?token_out, amount_in = %amount_in, amount_out = %amount_out, "routed swap");
        }
        result
    }

    pub async fn swap_with_default_venue(
        &self,
        ctx: &CallContext,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
        min_out: U256,
        recipient: Address,
    ) -> RouterResult<U256> {
        let venue = self.registry.default_venue()?;
        self.swap(ctx, token_in, token_out, amount_in, min_out, recipient, venue)
            .await
    }

    pub async fn swap_with_path_with_default_venue(
        &self,
        ctx: &CallContext,
        path: &[Address],
        amount_in: U256,
        min_out: U256,
        recipient: Address,
    ) -> RouterResult<U256> {
        let venue = self.registry.default_venue()?;
        self.swap_with_path(ctx, path, amount_in, min_out, recipient, venue)
            .await
    }

    /// Leaf hops a routed swap from `from` to `to` would execute.
    pub fn expand_route(&self, from: Address, to: Address) -> RouterResult<Vec<HopDescriptor>> {
        let default_venue = self.registry.default_venue()?;
        let mut depth = RouteDepth::new(self.policy.max_route_depth);
        let mut hops = Vec::new();
        self.expand_into(from, to, default_venue, &mut depth, &mut hops)?;
        Ok(hops)
    }

    fn expand_into(
        &self,
        from: Address,
        to: Address,
        venue: VenueId,
        depth: &mut RouteDepth,
        hops: &mut Vec<HopDescriptor>,
    ) -> RouterResult<()> {
        depth.descend()?;
        let route = match self.routes.route(from, to) {
            Some(route) => route,
            None => match self.policy.fallback {
                FallbackPolicy::DirectThenIntermediary => Route::new(vec![HopDescriptor::leaf(from, to, venue)]),
                FallbackPolicy::RequireConfiguredRoute => return Err(RouterError::NoRoute { from, to }),
            },
        };
        for hop in route.hops {
            if hop.composite {
                self.expand_into(hop.token_in, hop.token_out, hop.venue, depth, hops)?;
            } else {
                hops.push(hop);
            }
        }
        Ok(())
    }
}

/// Operator-gated mutations of the registry and route store.
pub struct Configurator<'a, C: Chain + ?Sized> {
    router: &'a SwapRouter<C>,
}

impl<'a, C: Chain + ?Sized> Configurator<'a, C> {
    pub fn set_venue(&self, venue: VenueId, endpoints: VenueEndpoints) -> RouterResult<()> {
        self.router.registry.set_venue(venue, endpoints)?;
        info!(venue = %venue, execution = ?endpoints.execution, "venue configured");
        Ok(())
    }

    pub fn remove_venue(&self, venue: VenueId) -> Option<VenueEndpoints> {
        self.router.registry.remove_venue(venue)
    }

    pub fn set_pinned_pool(&self, venue: VenueId, token_a: Address, token_b: Address, pool: PoolRef) -> RouterResult<()> {
        self.router
            .registry
            .set_pinned_pool(venue, token_a, token_b, pool)?;
        info!(venue = %venue, token_a = ?token_a, token_b = ?token_b, pool = ?pool, "pool pinned");
        Ok(())
    }

    pub fn clear_pinned_pool(&self, venue: VenueId, token_a: Address, token_b: Address) -> Option<PoolRef> {
        self.router
            .registry
            .clear_pinned_pool(venue, token_a, token_b)
    }

    pub fn set_route(&self, from: Address, to: Address, hops: Vec<HopDescriptor>, derive_reverse: bool) -> RouterResult<()> {
        let count = hops.len();
        self.router
            .routes
            .set_route(from, to, Route::new(hops), derive_reverse)?;
        info!(from = ?from, to = ?to, hops = count, derive_reverse, "route configured");
        Ok(())
    }

    pub fn clear_route(&self, from: Address, to: Address) -> Option<Route> {
        self.router.routes.clear_route(from, to)
    }

    pub fn set_default_venue(&self, venue: VenueId) {
        self.router.registry.set_default_venue(venue);
        info!(venue = %venue, "default venue set");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::sim::SimulatedChain;

    fn token(n: u8) -> Address {
        Address::repeat_byte(n)
    }

    fn router(policy: RoutingPolicy) -> SwapRouter<SimulatedChain> {
        let chain = Arc::new(SimulatedChain::new(token(0xaa)));
        SwapRouter::new(chain, policy, VenueId::UniswapV2, CandidateSets::default())
    }

    #[test]
    fn test_configure_requires_operator() {
        let router = router(RoutingPolicy::new(token(0xee), token(0x0e)));
        assert!(matches!(
            router.configure(token(0x01)),
            Err(RouterError::Unauthorized(_))
        ));
        assert!(router.configure(token(0xee)).is_ok());
    }

    #[test]
    fn test_missing_route_falls_back_to_default_venue() {
        let router = router(RoutingPolicy::new(token(0xee), token(0x0e)));
        let hops = router.expand_route(token(1), token(2)).unwrap();
        assert_eq!(hops, vec![HopDescriptor::leaf(token(1), token(2), VenueId::UniswapV2)]);

        let strict = self::router(
            RoutingPolicy::new(token(0xee), token(0x0e)).with_fallback(FallbackPolicy::RequireConfiguredRoute),
        );
        assert!(matches!(
            strict.expand_route(token(1), token(2)),
            Err(RouterError::NoRoute { .. })
        ));
    }

    #[test]
    fn test_composite_hops_expand_in_order() {
        let router = router(RoutingPolicy::new(token(0xee), token(0x0e)));
        let config = router.configure(token(0xee)).unwrap();
        config
            .set_route(
                token(1),
                token(3),
                vec![
                    HopDescriptor::composite(token(1), token(2), VenueId::UniswapV3),
                    HopDescriptor::leaf(token(2), token(3), VenueId::Balancer),
                ],
                false,
            )
            .unwrap();
        config
            .set_route(
                token(1),
                token(2),
                vec![
                    HopDescriptor::leaf(token(1), token(0x0e), VenueId::UniswapV2),
                    HopDescriptor::leaf(token(0x0e), token(2), VenueId::Ambient),
                ],
                false,
            )
            .unwrap();

        let venues: Vec<VenueId> = router
            .expand_route(token(1), token(3))
            .unwrap()
            .iter()
            .map(|hop| hop.venue)
            .collect();
        assert_eq!(venues, vec![VenueId::UniswapV2, VenueId::Ambient, VenueId::Balancer]);
    }

    #[test]
    fn test_route_cycle_hits_depth_bound() {
        let router = router(RoutingPolicy::new(token(0xee), token(0x0e)));
        router
            .configure(token(0xee))
            .unwrap()
            .set_route(
                token(1),
                token(2),
                vec![HopDescriptor::composite(token(1), token(2), VenueId::UniswapV2)],
                false,
            )
            .unwrap();
        assert!(matches!(
            router.expand_route(token(1), token(2)),
            Err(RouterError::PathLengthExceeded { max: DEFAULT_MAX_ROUTE_DEPTH })
        ));
        // a fresh counter per call: the next expansion fails the same way, not earlier
        assert!(matches!(
            router.expand_route(token(1), token(2)),
            Err(RouterError::PathLengthExceeded { .. })
        ));
    }
}
