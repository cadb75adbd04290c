//! # Venues
//!
//! Identifiers for the DEX protocols the router can trade on, and the endpoints each
//! venue exposes. Every dispatch site matches exhaustively on [`VenueKind`], so adding a
//! venue is a compile-time checked change.

use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RouterError;

/// DEX protocol identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum VenueId {
    UniswapV2 = 0,
    SushiSwapV2 = 1,
    UniswapV3 = 2,
    SushiSwapV3 = 3,
    PancakeSwapV3 = 4,
    Balancer = 5,
    Ambient = 6,
}

/// Pricing / execution family of a venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VenueKind {
    /// x * y = k pairs behind a V2-style router.
    ConstantProduct,
    /// Tick-based concentrated liquidity (Uniswap V3 and forks).
    Concentrated(V3Flavor),
    /// Balancer-style weighted / stable pools addressed by pool id.
    WeightedPool,
    /// Tick-indexed custom AMM addressing pools by (base, quote, pool index).
    TickIndexed,
}

/// ABI flavour of a concentrated-liquidity venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum V3Flavor {
    /// Uniswap V3 `SwapRouter`: params carry a deadline, `slot0.feeProtocol` is `uint8`.
    Canonical,
    /// PancakeSwap V3 `SmartRouter`: no deadline field, `slot0.feeProtocol` is `uint32`.
    PancakeFork,
}

impl VenueId {
    pub const ALL: [VenueId; 7] = [
        VenueId::UniswapV2,
        VenueId::SushiSwapV2,
        VenueId::UniswapV3,
        VenueId::SushiSwapV3,
        VenueId::PancakeSwapV3,
        VenueId::Balancer,
        VenueId::Ambient,
    ];

    pub fn kind(self) -> VenueKind {
        match self {
            VenueId::UniswapV2 | VenueId::SushiSwapV2 => VenueKind::ConstantProduct,
            VenueId::UniswapV3 | VenueId::SushiSwapV3 => VenueKind::Concentrated(V3Flavor::Canonical),
            VenueId::PancakeSwapV3 => VenueKind::Concentrated(V3Flavor::PancakeFork),
            VenueId::Balancer => VenueKind::WeightedPool,
            VenueId::Ambient => VenueKind::TickIndexed,
        }
    }

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            VenueId::UniswapV2 => "uniswap_v2",
            VenueId::SushiSwapV2 => "sushiswap_v2",
            VenueId::UniswapV3 => "uniswap_v3",
            VenueId::SushiSwapV3 => "sushiswap_v3",
            VenueId::PancakeSwapV3 => "pancakeswap_v3",
            VenueId::Balancer => "balancer",
            VenueId::Ambient => "ambient",
        }
    }
}

impl TryFrom<u8> for VenueId {
    type Error = RouterError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        VenueId::ALL
            .iter()
            .copied()
            .find(|venue| venue.index() == value)
            .ok_or_else(|| RouterError::UnsupportedVenue(value.to_string()))
    }
}

impl FromStr for VenueId {
    type Err = RouterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        if let Ok(index) = normalized.parse::<u8>() {
            return VenueId::try_from(index);
        }
        VenueId::ALL
            .iter()
            .copied()
            .find(|venue| venue.name() == normalized)
            .ok_or_else(|| RouterError::UnsupportedVenue(s.to_string()))
    }
}

impl fmt::Display for VenueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VenueId::UniswapV2 => write!(f, "UniswapV2"),
            VenueId::SushiSwapV2 => write!(f, "SushiSwapV2"),
            VenueId::UniswapV3 => write!(f, "UniswapV3"),
            VenueId::SushiSwapV3 => write!(f, "SushiSwapV3"),
            VenueId::PancakeSwapV3 => write!(f, "PancakeSwapV3"),
            VenueId::Balancer => write!(f, "Balancer"),
            VenueId::Ambient => write!(f, "Ambient"),
        }
    }
}

/// Which endpoint of a venue an operation needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    Execution,
    Factory,
    Query,
    Preview,
    PositionManager,
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EndpointKind::Execution => "execution",
            EndpointKind::Factory => "factory",
            EndpointKind::Query => "query",
            EndpointKind::Preview => "preview",
            EndpointKind::PositionManager => "position manager",
        };
        f.write_str(name)
    }
}

/// Contract addresses a venue is reached through.
///
/// | venue family     | execution        | factory  | query           | preview    | position_manager |
/// |------------------|------------------|----------|-----------------|------------|------------------|
/// | constant product | V2 router        | factory  |                 |            |                  |
/// | concentrated     | swap router      | factory  |                 |            | NFT manager      |
/// | weighted pool    | vault            |          | queries helper  |            |                  |
/// | tick indexed     | dex              |          | query contract  | impact     |                  |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VenueEndpoints {
    pub execution: Address,
    #[serde(default)]
    pub factory: Option<Address>,
    #[serde(default)]
    pub query: Option<Address>,
    #[serde(default)]
    pub preview: Option<Address>,
    #[serde(default)]
    pub position_manager: Option<Address>,
}

impl VenueEndpoints {
    pub fn new(execution: Address) -> Self {
        Self {
            execution,
            ..Default::default()
        }
    }

    pub fn with_factory(mut self, factory: Address) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn with_query(mut self, query: Address) -> Self {
        self.query = Some(query);
        self
    }

    pub fn with_preview(mut self, preview: Address) -> Self {
        self.preview = Some(preview);
        self
    }

    pub fn with_position_manager(mut self, position_manager: Address) -> Self {
        self.position_manager = Some(position_manager);
        self
    }

    /// Looks up an endpoint, failing with `MissingEndpoint` when it is not configured.
    pub fn require(&self, venue: VenueId, endpoint: EndpointKind) -> Result<Address, RouterError> {
        let address = match endpoint {
            EndpointKind::Execution => Some(self.execution),
            EndpointKind::Factory => self.factory,
            EndpointKind::Query => self.query,
            EndpointKind::Preview => self.preview,
            EndpointKind::PositionManager => self.position_manager,
        };
        address
            .filter(|a| !a.is_zero())
            .ok_or(RouterError::MissingEndpoint { venue, endpoint })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_range_index_is_unsupported() {
        assert_eq!(VenueId::try_from(2).unwrap(), VenueId::UniswapV3);
        for raw in [7u8, 42, 255] {
            assert!(matches!(
                VenueId::try_from(raw),
                Err(RouterError::UnsupportedVenue(_))
            ));
        }
    }

    #[test]
    fn test_parse_names_and_indices() {
        assert_eq!("balancer".parse::<VenueId>().unwrap(), VenueId::Balancer);
        assert_eq!("PancakeSwap_V3".parse::<VenueId>().unwrap(), VenueId::PancakeSwapV3);
        assert_eq!("6".parse::<VenueId>().unwrap(), VenueId::Ambient);
        assert!("curve".parse::<VenueId>().is_err());
    }

    #[test]
    fn test_every_venue_has_a_kind() {
        for venue in VenueId::ALL {
            // round trip through the raw index
            assert_eq!(VenueId::try_from(venue.index()).unwrap(), venue);
            let _ = venue.kind();
        }
        assert_eq!(
            VenueId::PancakeSwapV3.kind(),
            VenueKind::Concentrated(V3Flavor::PancakeFork)
        );
    }

    #[test]
    fn test_missing_endpoint() {
        let endpoints = VenueEndpoints::new(Address::repeat_byte(1));
        assert!(endpoints.require(VenueId::UniswapV2, EndpointKind::Execution).is_ok());
        assert!(matches!(
            endpoints.require(VenueId::UniswapV2, EndpointKind::Factory),
            Err(RouterError::MissingEndpoint {
                endpoint: EndpointKind::Factory,
                ..
            })
        ));
    }
}
