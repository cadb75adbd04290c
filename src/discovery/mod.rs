//! # Pool Discovery
//!
//! Finds the most liquid concrete pool for a token pair on a venue. Concentrated and
//! tick-indexed venues scan a small configured candidate set (fee tiers / pool indices)
//! and keep the deepest one; constant-product venues resolve the factory pair and
//! weighted-pool venues resolve the pinned pool. Selection is greedy on static depth,
//! it does not look at price impact for the traded size.

use std::sync::Arc;

use ethers::types::{Address, H256, U256};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::chain::{AmbientPoolKey, Chain};
use crate::error::{RouterError, RouterResult};
use crate::registry::VenueRegistry;
use crate::utils::sort_tokens;
use crate::v3_math::sqrt_u256;
use crate::venue::{EndpointKind, V3Flavor, VenueId, VenueKind};

/// A concrete pool on some venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolRef {
    /// V2 pair or V3 pool contract.
    Address(Address),
    BalancerPool(H256),
    AmbientIndex(u64),
}

impl PoolRef {
    /// Whether this kind of reference can identify a pool on `kind`.
    pub fn fits(&self, kind: VenueKind) -> bool {
        matches!(
            (self, kind),
            (PoolRef::Address(_), VenueKind::ConstantProduct)
                | (PoolRef::Address(_), VenueKind::Concentrated(_))
                | (PoolRef::BalancerPool(_), VenueKind::WeightedPool)
                | (PoolRef::AmbientIndex(_), VenueKind::TickIndexed)
        )
    }

    pub fn address(&self) -> Option<Address> {
        match self {
            PoolRef::Address(address) => Some(*address),
            _ => None,
        }
    }
}

/// Discovery result. `tier` is the fee tier (V3 family), the pool index (Ambient), or
/// zero for venues without tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolCandidate {
    pub pool: PoolRef,
    pub tier: u64,
    pub liquidity: U256,
}

fn default_v3_fee_tiers() -> Vec<u32> {
    vec![100, 500, 3000, 10000]
}

fn default_pancake_fee_tiers() -> Vec<u32> {
    vec![100, 500, 2500, 10000]
}

fn default_ambient_pool_indices() -> Vec<u64> {
    vec![420, 36000]
}

/// Per-venue candidate lists scanned by discovery, in scan order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateSets {
    #[serde(default = "default_v3_fee_tiers")]
    pub v3_fee_tiers: Vec<u32>,
    #[serde(default = "default_pancake_fee_tiers")]
    pub pancake_fee_tiers: Vec<u32>,
    #[serde(default = "default_ambient_pool_indices")]
    pub ambient_pool_indices: Vec<u64>,
}

impl Default for CandidateSets {
    fn default() -> Self {
        Self {
            v3_fee_tiers: default_v3_fee_tiers(),
            pancake_fee_tiers: default_pancake_fee_tiers(),
            ambient_pool_indices: default_ambient_pool_indices(),
        }
    }
}

impl CandidateSets {
    pub fn fee_tiers(&self, flavor: V3Flavor) -> &[u32] {
        match flavor {
            V3Flavor::Canonical => &self.v3_fee_tiers,
            V3Flavor::PancakeFork => &self.pancake_fee_tiers,
        }
    }
}

/// Keeps the first candidate whose liquidity is strictly greater than every earlier one.
/// Zero-liquidity candidates are never selected.
pub fn select_most_liquid<I>(candidates: I) -> Option<PoolCandidate>
where
    I: IntoIterator<Item = PoolCandidate>,
{
    candidates.into_iter().fold(None, |best, candidate| {
        let floor = best.map(|b: PoolCandidate| b.liquidity).unwrap_or_default();
        if candidate.liquidity > floor {
            Some(candidate)
        } else {
            best
        }
    })
}

/// Ambient pool key for an unordered pair: the lower address is the base side.
pub fn ambient_pool_key(token_a: Address, token_b: Address, pool_idx: u64) -> AmbientPoolKey {
    let (base, quote) = sort_tokens(token_a, token_b);
    AmbientPoolKey { base, quote, pool_idx }
}

pub struct PoolDiscovery<C: Chain + ?Sized> {
    chain: Arc<C>,
    registry: Arc<VenueRegistry>,
    candidates: CandidateSets,
}

impl<C: Chain + ?Sized> PoolDiscovery<C> {
    pub fn new(chain: Arc<C>, registry: Arc<VenueRegistry>, candidates: CandidateSets) -> Self {
        Self {
            chain,
            registry,
            candidates,
        }
    }

    pub fn candidates(&self) -> &CandidateSets {
        &self.candidates
    }

    /// Most liquid pool for the pair, honouring a pool pinned in the registry.
    pub async fn find_most_liquid_pool(
        &self,
        token_a: Address,
        token_b: Address,
        venue: VenueId,
    ) -> RouterResult<Option<PoolCandidate>> {
        let pinned = self.registry.pinned_pool(venue, token_a, token_b);
        self.resolve_pool(token_a, token_b, venue, pinned).await
    }

    /// Like [`find_most_liquid_pool`](Self::find_most_liquid_pool) but an explicit
    /// `pinned` pool takes precedence over the scan.
    pub async fn resolve_pool(
        &self,
        token_a: Address,
        token_b: Address,
        venue: VenueId,
        pinned: Option<PoolRef>,
    ) -> RouterResult<Option<PoolCandidate>> {
        if token_a == token_b {
            return Err(RouterError::IdenticalTokens(token_a));
        }
        if let Some(pool) = pinned {
            if !pool.fits(venue.kind()) {
                return Err(RouterError::TargetMismatch(venue));
            }
        }

        let found = match venue.kind() {
            VenueKind::ConstantProduct => self.constant_product_pool(token_a, token_b, venue, pinned).await?,
            VenueKind::Concentrated(flavor) => self.concentrated_pool(token_a, token_b, venue, flavor, pinned).await?,
            VenueKind::WeightedPool => self.weighted_pool(token_a, token_b, venue, pinned).await?,
            VenueKind::TickIndexed => self.tick_indexed_pool(token_a, token_b, venue, pinned).await?,
        };

        debug!(
            venue = %venue,
            token_a = ?token_a,
            token_b = ?token_b,
            pool = ?found.map(|c| c.pool),
            "pool discovery"
        );
        Ok(found)
    }

    async fn constant_product_pool(
        &self,
        token_a: Address,
        token_b: Address,
        venue: VenueId,
        pinned: Option<PoolRef>,
    ) -> RouterResult<Option<PoolCandidate>> {
        let pair = match pinned.and_then(|p| p.address()) {
            Some(pair) => pair,
            None => {
                let factory = self.registry.endpoint(venue, EndpointKind::Factory)?;
                self.chain.v2_get_pair(factory, token_a, token_b).await?
            }
        };
        if pair.is_zero() {
            return Ok(None);
        }
        let (reserve0, reserve1) = self.chain.v2_get_reserves(pair).await?;
        let liquidity = match reserve0.checked_mul(reserve1) {
            Some(product) => sqrt_u256(product),
            None => reserve0.min(reserve1),
        };
        Ok(select_most_liquid([PoolCandidate {
            pool: PoolRef::Address(pair),
            tier: 0,
            liquidity,
        }]))
    }

    async fn concentrated_pool(
        &self,
        token_a: Address,
        token_b: Address,
        venue: VenueId,
        flavor: V3Flavor,
        pinned: Option<PoolRef>,
    ) -> RouterResult<Option<PoolCandidate>> {
        if let Some(pool) = pinned.and_then(|p| p.address()) {
            let (_, _, fee) = self.chain.v3_pool_tokens(pool).await?;
            let liquidity = self.chain.v3_liquidity(pool).await?;
            return Ok(select_most_liquid([PoolCandidate {
                pool: PoolRef::Address(pool),
                tier: fee as u64,
                liquidity: U256::from(liquidity),
            }]));
        }

        let factory = self.registry.endpoint(venue, EndpointKind::Factory)?;
        let chain = &self.chain;
        let lookups = self.candidates.fee_tiers(flavor).iter().map(|&fee| async move {
            let pool = chain.v3_get_pool(factory, token_a, token_b, fee).await?;
            if pool.is_zero() {
                return Ok::<_, anyhow::Error>(None);
            }
            let liquidity = chain.v3_liquidity(pool).await?;
            Ok(Some(PoolCandidate {
                pool: PoolRef::Address(pool),
                tier: fee as u64,
                liquidity: U256::from(liquidity),
            }))
        });

        let mut candidates = Vec::new();
        for lookup in join_all(lookups).await {
            if let Some(candidate) = lookup? {
                candidates.push(candidate);
            }
        }
        Ok(select_most_liquid(candidates))
    }

    async fn weighted_pool(
        &self,
        token_a: Address,
        token_b: Address,
        venue: VenueId,
        pinned: Option<PoolRef>,
    ) -> RouterResult<Option<PoolCandidate>> {
        let pool_id = match pinned {
            Some(PoolRef::BalancerPool(pool_id)) => pool_id,
            _ => return Ok(None),
        };
        let vault = self.registry.endpoint(venue, EndpointKind::Execution)?;
        let (tokens, balances) = self.chain.balancer_get_pool_tokens(vault, pool_id).await?;
        let balance_of = |token: Address| {
            tokens
                .iter()
                .position(|t| *t == token)
                .and_then(|i| balances.get(i).copied())
        };
        let liquidity = match (balance_of(token_a), balance_of(token_b)) {
            (Some(a), Some(b)) => a.min(b),
            _ => return Ok(None),
        };
        Ok(select_most_liquid([PoolCandidate {
            pool: PoolRef::BalancerPool(pool_id),
            tier: 0,
            liquidity,
        }]))
    }

    async fn tick_indexed_pool(
        &self,
        token_a: Address,
        token_b: Address,
        venue: VenueId,
        pinned: Option<PoolRef>,
    ) -> RouterResult<Option<PoolCandidate>> {
        let query = self.registry.endpoint(venue, EndpointKind::Query)?;
        let indices: Vec<u64> = match pinned {
            Some(PoolRef::AmbientIndex(index)) => vec![index],
            _ => self.candidates.ambient_pool_indices.clone(),
        };

        let chain = &self.chain;
        let lookups = indices.into_iter().map(|pool_idx| async move {
            let liquidity = chain
                .ambient_query_liquidity(query, ambient_pool_key(token_a, token_b, pool_idx))
                .await?;
            Ok::<_, anyhow::Error>(PoolCandidate {
                pool: PoolRef::AmbientIndex(pool_idx),
                tier: pool_idx,
                liquidity: U256::from(liquidity),
            })
        });

        let mut candidates = Vec::new();
        for lookup in join_all(lookups).await {
            candidates.push(lookup?);
        }
        Ok(select_most_liquid(candidates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(n: u8, liquidity: u64) -> PoolCandidate {
        PoolCandidate {
            pool: PoolRef::Address(Address::repeat_byte(n)),
            tier: n as u64,
            liquidity: U256::from(liquidity),
        }
    }

    #[test]
    fn test_selects_deepest_pool() {
        let best = select_most_liquid(vec![candidate(1, 5), candidate(2, 50), candidate(3, 10)]).unwrap();
        assert_eq!(best.pool, PoolRef::Address(Address::repeat_byte(2)));
        assert_eq!(best.liquidity, U256::from(50));
    }

    #[test]
    fn test_ties_keep_first_and_zero_is_ignored() {
        let best = select_most_liquid(vec![candidate(1, 0), candidate(2, 7), candidate(3, 7)]).unwrap();
        assert_eq!(best.tier, 2);
        assert!(select_most_liquid(vec![candidate(1, 0), candidate(2, 0)]).is_none());
        assert!(select_most_liquid(Vec::new()).is_none());
    }

    #[test]
    fn test_pool_ref_fits_venue_kind() {
        assert!(PoolRef::Address(Address::zero()).fits(VenueId::PancakeSwapV3.kind()));
        assert!(PoolRef::Address(Address::zero()).fits(VenueId::SushiSwapV2.kind()));
        assert!(!PoolRef::Address(Address::zero()).fits(VenueId::Balancer.kind()));
        assert!(PoolRef::AmbientIndex(420).fits(VenueId::Ambient.kind()));
        assert!(!PoolRef::BalancerPool(H256::zero()).fits(VenueId::Ambient.kind()));
    }

    #[test]
    fn test_ambient_key_orders_base_first() {
        let low = Address::repeat_byte(1);
        let high = Address::repeat_byte(9);
        let key = ambient_pool_key(high, low, 420);
        assert_eq!((key.base, key.quote, key.pool_idx), (low, high, 420));
    }

    #[test]
    fn test_default_candidate_sets() {
        let sets = CandidateSets::default();
        assert_eq!(sets.fee_tiers(V3Flavor::Canonical), &[100, 500, 3000, 10000]);
        assert_eq!(sets.fee_tiers(V3Flavor::PancakeFork), &[100, 500, 2500, 10000]);
        assert_eq!(sets.ambient_pool_indices, vec![420, 36000]);
    }
}
