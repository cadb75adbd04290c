//! # Route Store
//!
//! Operator-configured routes between token pairs. A route is an ordered list of hops;
//! a composite hop is not executed directly but expanded into the route stored for its
//! own pair, so routes can be assembled from other routes.

use dashmap::DashMap;
use ethers::types::Address;
use serde::{Deserialize, Serialize};

use crate::discovery::PoolRef;
use crate::error::{RouterError, RouterResult};
use crate::venue::VenueId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopDescriptor {
    pub token_in: Address,
    pub token_out: Address,
    pub venue: VenueId,
    /// Expand through the route stored for `(token_in, token_out)` instead of swapping.
    #[serde(default)]
    pub composite: bool,
    #[serde(default)]
    pub pinned_pool: Option<PoolRef>,
}

impl HopDescriptor {
    pub fn leaf(token_in: Address, token_out: Address, venue: VenueId) -> Self {
        Self {
            token_in,
            token_out,
            venue,
            composite: false,
            pinned_pool: None,
        }
    }

    pub fn composite(token_in: Address, token_out: Address, venue: VenueId) -> Self {
        Self {
            composite: true,
            ..Self::leaf(token_in, token_out, venue)
        }
    }

    pub fn with_pinned_pool(mut self, pool: PoolRef) -> Self {
        self.pinned_pool = Some(pool);
        self
    }

    /// Same hop in the opposite direction.
    pub fn reversed(&self) -> Self {
        Self {
            token_in: self.token_out,
            token_out: self.token_in,
            ..*self
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub hops: Vec<HopDescriptor>,
}

impl Route {
    pub fn new(hops: Vec<HopDescriptor>) -> Self {
        Self { hops }
    }

    /// Checks the hops chain from `from` to `to`.
    pub fn validate(&self, from: Address, to: Address) -> RouterResult<()> {
        let (first, last) = match (self.hops.first(), self.hops.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(RouterError::InvalidRoute("route has no hops".into())),
        };
        if first.token_in != from {
            return Err(RouterError::InvalidRoute(format!(
                "first hop starts at {:?}, expected {:?}",
                first.token_in, from
            )));
        }
        if last.token_out != to {
            return Err(RouterError::InvalidRoute(format!(
                "last hop ends at {:?}, expected {:?}",
                last.token_out, to
            )));
        }
        for (i, hop) in self.hops.iter().enumerate() {
            if hop.token_in == hop.token_out {
                return Err(RouterError::InvalidRoute(format!("hop {} swaps a token for itself", i)));
            }
            if let Some(next) = self.hops.get(i + 1) {
                if hop.token_out != next.token_in {
                    return Err(RouterError::InvalidRoute(format!(
                        "hop {} ends at {:?} but hop {} starts at {:?}",
                        i,
                        hop.token_out,
                        i + 1,
                        next.token_in
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn reversed(&self) -> Self {
        Self {
            hops: self.hops.iter().rev().map(HopDescriptor::reversed).collect(),
        }
    }
}

/// Route descents taken by one top-level call. Created fresh per call and threaded
/// through expansion explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteDepth {
    count: usize,
    max: usize,
}

impl RouteDepth {
    pub fn new(max: usize) -> Self {
        Self { count: 0, max }
    }

    /// Records one descent; fails once the counter reaches the maximum. The top-level
    /// expansion is a descent too, so a maximum of 1 admits nothing.
    pub fn descend(&mut self) -> RouterResult<()> {
        self.count += 1;
        if self.count >= self.max {
            return Err(RouterError::PathLengthExceeded { max: self.max });
        }
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

#[derive(Debug, Default)]
pub struct RouteStore {
    routes: DashMap<(Address, Address), Route>,
}

impl RouteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a validated route; with `derive_reverse` the mirrored route is stored for
    /// `(to, from)` as well.
    pub fn set_route(&self, from: Address, to: Address, route: Route, derive_reverse: bool) -> RouterResult<()> {
        if from == to {
            return Err(RouterError::IdenticalTokens(from));
        }
        route.validate(from, to)?;
        if derive_reverse {
            self.routes.insert((to, from), route.reversed());
        }
        self.routes.insert((from, to), route);
        Ok(())
    }

    pub fn clear_route(&self, from: Address, to: Address) -> Option<Route> {
        self.routes.remove(&(from, to)).map(|(_, route)| route)
    }

    pub fn route(&self, from: Address, to: Address) -> Option<Route> {
        self.routes.get(&(from, to)).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(n: u8) -> Address {
        Address::repeat_byte(n)
    }

    #[test]
    fn test_route_must_chain() {
        let store = RouteStore::new();
        let broken = Route::new(vec![
            HopDescriptor::leaf(token(1), token(2), VenueId::UniswapV2),
            HopDescriptor::leaf(token(3), token(4), VenueId::UniswapV2),
        ]);
        assert!(matches!(
            store.set_route(token(1), token(4), broken, false),
            Err(RouterError::InvalidRoute(_))
        ));
        assert!(matches!(
            store.set_route(token(1), token(4), Route::new(vec![]), false),
            Err(RouterError::InvalidRoute(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_depth_fails_at_maximum() {
        let mut depth = RouteDepth::new(3);
        assert!(depth.descend().is_ok());
        assert!(depth.descend().is_ok());
        assert!(matches!(
            depth.descend(),
            Err(RouterError::PathLengthExceeded { max: 3 })
        ));
        assert_eq!(depth.count(), 3);
    }

    #[test]
    fn test_reverse_route_is_derived() {
        let store = RouteStore::new();
        let route = Route::new(vec![
            HopDescriptor::leaf(token(1), token(2), VenueId::UniswapV3),
            HopDescriptor::composite(token(2), token(3), VenueId::Balancer),
        ]);
        store.set_route(token(1), token(3), route, true).unwrap();
        let reverse = store.route(token(3), token(1)).unwrap();
        assert_eq!(
            reverse.hops,
            vec![
                HopDescriptor::composite(token(3), token(2), VenueId::Balancer),
                HopDescriptor::leaf(token(2), token(1), VenueId::UniswapV3),
            ]
        );
        assert_eq!(store.len(), 2);
        assert!(store.clear_route(token(3), token(1)).is_some());
        assert!(store.route(token(3), token(1)).is_none());
        assert!(store.route(token(1), token(3)).is_some());
    }
}
