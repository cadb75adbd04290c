//! # Vault Router SDK
//!
//! Swap routing, quoting and single-token liquidity provisioning for a vault that
//! trades across several DEX venues: Uniswap V2 style pairs, Uniswap V3 style
//! concentrated liquidity (including the PancakeSwap fork), Balancer weighted pools
//! and Ambient.
//!
//! ## Architecture
//!
//! ### Registry & Routes
//! [`registry::VenueRegistry`] maps venue ids to their contract endpoints and pinned
//! pools. [`route_store::RouteStore`] holds multi-hop routes per token pair; composite
//! hops expand into other stored routes under a bounded depth.
//!
//! ### Discovery
//! [`discovery::PoolDiscovery`] picks the most liquid pool for a pair on a venue by
//! scanning configured fee tiers / pool indices.
//!
//! ### Execution
//! [`router::SwapRouter`] validates, dispatches to a per-venue
//! [`adapters::VenueAdapter`] and enforces minimum output inside a chain checkpoint.
//! [`lp_router::LpRouter`] builds on it to zap a single token into (and out of)
//! liquidity positions.
//!
//! ### Chain
//! Every on-chain interaction goes through the [`chain::Chain`] traits:
//! [`chain::rpc::EthersChain`] talks to a node, [`chain::sim::SimulatedChain`] keeps
//! everything in memory for tests and dry runs.

// Core Types
/// Error type and validation helpers
pub mod error;
/// Venue identifiers and endpoints
pub mod venue;

// Math & Encoding
/// Fixed-point helpers and ratio splitting
pub mod math;
/// Tick math and liquidity amounts for concentrated-liquidity pools
pub mod v3_math;
/// Calldata, packed paths and venue user data
pub mod encoding;
/// Shared utilities
pub mod utils;

// Chain Access
/// Collaborator traits plus RPC and simulated implementations
pub mod chain;

// Configuration State
/// Venue endpoints, default venue and pinned pools
pub mod registry;
/// Per-pair multi-hop routes
pub mod route_store;
/// Most-liquid pool selection
pub mod discovery;

// Execution
/// Per-venue swap, quote and liquidity adapters
pub mod adapters;
/// Swap and quote engine
pub mod router;
/// Single-token liquidity engine
pub mod lp_router;

// Infrastructure
/// Configuration management
pub mod settings;
/// Logger initialization
pub mod logging;
/// Metrics and observability
pub mod metrics;

pub use error::{ErrorCategory, RouterError, RouterResult};
pub use lp_router::{AddLiquidityOutcome, LpRouter, RemoveLiquidityOutcome};
pub use router::{FallbackPolicy, RoutingPolicy, SwapRouter};
pub use venue::{EndpointKind, VenueEndpoints, VenueId};
