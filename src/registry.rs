//! # Venue Registry
//!
//! Holds the endpoint addresses of every enabled venue, the pools pinned for
//! specific pairs, and the default venue. Reads are lock-free (`DashMap`); mutation
//! happens only through the operator-gated configurator on the swap router.

use dashmap::DashMap;
use ethers::types::Address;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::discovery::PoolRef;
use crate::error::{RouterError, RouterResult};
use crate::utils::sort_tokens;
use crate::venue::{EndpointKind, VenueEndpoints, VenueId};

#[derive(Debug)]
pub struct VenueRegistry {
    endpoints: DashMap<VenueId, VenueEndpoints>,
    pinned_pools: DashMap<(VenueId, Address, Address), PoolRef>,
    default_venue: AtomicU8,
}

impl VenueRegistry {
    pub fn new(default_venue: VenueId) -> Self {
        Self {
            endpoints: DashMap::new(),
            pinned_pools: DashMap::new(),
            default_venue: AtomicU8::new(default_venue.index()),
        }
    }

    pub fn set_venue(&self, venue: VenueId, endpoints: VenueEndpoints) -> RouterResult<()> {
        if endpoints.execution.is_zero() {
            return Err(RouterError::ZeroAddress("venue execution endpoint"));
        }
        self.endpoints.insert(venue, endpoints);
        Ok(())
    }

    pub fn remove_venue(&self, venue: VenueId) -> Option<VenueEndpoints> {
        self.endpoints.remove(&venue).map(|(_, endpoints)| endpoints)
    }

    /// Endpoints of a registered venue; `UnsupportedVenue` when it was never configured.
    pub fn endpoints(&self, venue: VenueId) -> RouterResult<VenueEndpoints> {
        self.endpoints
            .get(&venue)
            .map(|entry| *entry.value())
            .ok_or_else(|| RouterError::UnsupportedVenue(venue.name().to_string()))
    }

    pub fn endpoint(&self, venue: VenueId, endpoint: EndpointKind) -> RouterResult<Address> {
        self.endpoints(venue)?.require(venue, endpoint)
    }

    pub fn is_registered(&self, venue: VenueId) -> bool {
        self.endpoints.contains_key(&venue)
    }

    /// Registered venues in index order.
    pub fn venues(&self) -> Vec<(VenueId, VenueEndpoints)> {
        let mut venues: Vec<_> = self
            .endpoints
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        venues.sort_by_key(|(venue, _)| *venue);
        venues
    }

    pub fn default_venue(&self) -> RouterResult<VenueId> {
        VenueId::try_from(self.default_venue.load(Ordering::Acquire))
    }

    pub fn set_default_venue(&self, venue: VenueId) {
        self.default_venue.store(venue.index(), Ordering::Release);
    }

    fn pin_key(venue: VenueId, token_a: Address, token_b: Address) -> (VenueId, Address, Address) {
        let (token0, token1) = sort_tokens(token_a, token_b);
        (venue, token0, token1)
    }

    /// Pins `pool` for the unordered pair on `venue`.
    pub fn set_pinned_pool(&self, venue: VenueId, token_a: Address, token_b: Address, pool: PoolRef) -> RouterResult<()> {
        if token_a == token_b {
            return Err(RouterError::IdenticalTokens(token_a));
        }
        if !pool.fits(venue.kind()) {
            return Err(RouterError::TargetMismatch(venue));
        }
        self.pinned_pools
            .insert(Self::pin_key(venue, token_a, token_b), pool);
        Ok(())
    }

    pub fn clear_pinned_pool(&self, venue: VenueId, token_a: Address, token_b: Address) -> Option<PoolRef> {
        self.pinned_pools
            .remove(&Self::pin_key(venue, token_a, token_b))
            .map(|(_, pool)| pool)
    }

    pub fn pinned_pool(&self, venue: VenueId, token_a: Address, token_b: Address) -> Option<PoolRef> {
        self.pinned_pools
            .get(&Self::pin_key(venue, token_a, token_b))
            .map(|entry| *entry.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::H256;

    #[test]
    fn test_unregistered_venue_is_unsupported() {
        let registry = VenueRegistry::new(VenueId::UniswapV3);
        assert!(matches!(
            registry.endpoints(VenueId::Balancer),
            Err(RouterError::UnsupportedVenue(_))
        ));
        registry
            .set_venue(VenueId::Balancer, VenueEndpoints::new(Address::repeat_byte(9)))
            .unwrap();
        assert!(registry.is_registered(VenueId::Balancer));
        assert!(matches!(
            registry.endpoint(VenueId::Balancer, EndpointKind::Query),
            Err(RouterError::MissingEndpoint { .. })
        ));
        assert!(registry
            .set_venue(VenueId::UniswapV2, VenueEndpoints::new(Address::zero()))
            .is_err());
    }

    #[test]
    fn test_pinned_pools_ignore_pair_order() {
        let registry = VenueRegistry::new(VenueId::UniswapV2);
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        let pool = PoolRef::BalancerPool(H256::repeat_byte(7));
        registry.set_pinned_pool(VenueId::Balancer, b, a, pool).unwrap();
        assert_eq!(registry.pinned_pool(VenueId::Balancer, a, b), Some(pool));
        assert_eq!(registry.pinned_pool(VenueId::UniswapV2, a, b), None);
        assert_eq!(registry.clear_pinned_pool(VenueId::Balancer, a, b), Some(pool));
        assert_eq!(registry.pinned_pool(VenueId::Balancer, a, b), None);
    }

    #[test]
    fn test_pinned_pool_kind_must_match_venue() {
        let registry = VenueRegistry::new(VenueId::UniswapV2);
        let pool = PoolRef::AmbientIndex(420);
        assert!(matches!(
            registry.set_pinned_pool(VenueId::UniswapV2, Address::repeat_byte(1), Address::repeat_byte(2), pool),
            Err(RouterError::TargetMismatch(VenueId::UniswapV2))
        ));
    }

    #[test]
    fn test_default_venue() {
        let registry = VenueRegistry::new(VenueId::UniswapV2);
        assert_eq!(registry.default_venue().unwrap(), VenueId::UniswapV2);
        registry.set_default_venue(VenueId::Ambient);
        assert_eq!(registry.default_venue().unwrap(), VenueId::Ambient);
    }
}
