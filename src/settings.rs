use config::{Config, ConfigError, File, FileFormat, Source};
use ethers::types::{Address, H256, U256};
use serde::Deserialize;
use std::env;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use crate::chain::Chain;
use crate::discovery::{CandidateSets, PoolRef};
use crate::route_store::HopDescriptor;
use crate::router::{FallbackPolicy, RoutingPolicy, SwapRouter, DEFAULT_MAX_ROUTE_DEPTH, MIN_ROUTE_DEPTH};
use crate::venue::{VenueEndpoints, VenueId, VenueKind};

#[derive(Debug, Deserialize, Clone)]
pub struct RouterSection {
    pub operator: Address,
    /// Zero disables intermediary fallbacks.
    #[serde(default)]
    pub wrapped_native: Address,
    #[serde(default = "default_venue")]
    pub default_venue: VenueId,
    #[serde(default = "default_max_route_depth")]
    pub max_route_depth: usize,
    #[serde(default)]
    pub fallback: FallbackPolicy,
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
}

fn default_venue() -> VenueId {
    VenueId::UniswapV3
}
fn default_max_route_depth() -> usize {
    DEFAULT_MAX_ROUTE_DEPTH
}
fn default_deadline_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct VenueSettings {
    pub venue: VenueId,
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

impl VenueSettings {
    pub fn endpoints(&self) -> VenueEndpoints {
        VenueEndpoints {
            execution: self.execution,
            factory: self.factory,
            query: self.query,
            preview: self.preview,
            position_manager: self.position_manager,
        }
    }
}

/// Pool reference as written in config: an address, a Balancer pool id or an Ambient
/// pool index, depending on the venue.
fn parse_pool(venue: VenueId, raw: &str) -> Result<PoolRef, ConfigError> {
    let raw = raw.trim();
    let invalid = |e: String| ConfigError::Message(format!("invalid pool {} for {}: {}", raw, venue, e));
    match venue.kind() {
        VenueKind::ConstantProduct | VenueKind::Concentrated(_) => raw
            .parse::<Address>()
            .map(PoolRef::Address)
            .map_err(|e| invalid(e.to_string())),
        VenueKind::WeightedPool => raw
            .parse::<H256>()
            .map(PoolRef::BalancerPool)
            .map_err(|e| invalid(e.to_string())),
        VenueKind::TickIndexed => raw
            .parse::<u64>()
            .map(PoolRef::AmbientIndex)
            .map_err(|e| invalid(e.to_string())),
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PinnedPoolSettings {
    pub venue: VenueId,
    pub token_a: Address,
    pub token_b: Address,
    pub pool: String,
}

impl PinnedPoolSettings {
    pub fn pool_ref(&self) -> Result<PoolRef, ConfigError> {
        parse_pool(self.venue, &self.pool)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HopSettings {
    pub token_in: Address,
    pub token_out: Address,
    pub venue: VenueId,
    #[serde(default)]
    pub composite: bool,
    #[serde(default)]
    pub pool: Option<String>,
}

impl HopSettings {
    pub fn descriptor(&self) -> Result<HopDescriptor, ConfigError> {
        let hop = if self.composite {
            HopDescriptor::composite(self.token_in, self.token_out, self.venue)
        } else {
            HopDescriptor::leaf(self.token_in, self.token_out, self.venue)
        };
        match &self.pool {
            Some(raw) => Ok(hop.with_pinned_pool(parse_pool(self.venue, raw)?)),
            None => Ok(hop),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RouteSettings {
    pub from: Address,
    pub to: Address,
    pub hops: Vec<HopSettings>,
    #[serde(default)]
    pub derive_reverse: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Rpc {
    #[serde(default = "default_rpc_url")]
    pub url: String,
    /// Account the router sends from; must be unlocked or impersonated on the node.
    #[serde(default)]
    pub account: Option<Address>,
    #[serde(default = "default_rpc_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_rpc_url() -> String {
    "http://127.0.0.1:8545".to_string()
}
fn default_rpc_timeout_ms() -> u64 {
    10_000
}

impl Default for Rpc {
    fn default() -> Self {
        Self {
            url: default_rpc_url(),
            account: None,
            timeout_ms: default_rpc_timeout_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// JSON output; needs the `observability` feature.
    #[serde(default)]
    pub json: bool,
    /// Prometheus listener, e.g. `0.0.0.0:9100`; needs the `observability` feature.
    #[serde(default)]
    pub metrics_addr: Option<SocketAddr>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            metrics_addr: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub router: RouterSection,
    #[serde(default)]
    pub discovery: CandidateSets,
    #[serde(default)]
    pub venues: Vec<VenueSettings>,
    #[serde(default)]
    pub pinned_pools: Vec<PinnedPoolSettings>,
    #[serde(default)]
    pub routes: Vec<RouteSettings>,
    #[serde(default)]
    pub rpc: Rpc,
    #[serde(default)]
    pub log: LogSettings,
}

impl Settings {
    /// Loads `Config.toml` from the working directory.
    pub fn new() -> Result<Self, ConfigError> {
        Self::load(File::with_name("Config.toml"))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::load(File::from(path))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Self::load(File::from_str(raw, FileFormat::Toml))
    }

    fn load<S>(source: S) -> Result<Self, ConfigError>
    where
        S: Source + Send + Sync + 'static,
    {
        // Environment variable overrides
        let s = Config::builder()
            .add_source(source)
            .set_override_option("rpc.url", non_empty_env("ROUTER_RPC_URL"))?
            .set_override_option("rpc.account", non_empty_env("ROUTER_ACCOUNT"))?
            .set_override_option("router.default_venue", non_empty_env("ROUTER_DEFAULT_VENUE"))?
            .build()?;
        s.try_deserialize()
    }

    pub fn policy(&self) -> RoutingPolicy {
        RoutingPolicy::new(self.router.operator, self.router.wrapped_native)
            .with_fallback(self.router.fallback)
            .with_max_route_depth(self.router.max_route_depth)
    }

    /// Deadline `deadline_secs` after `now`.
    pub fn deadline(&self, now: u64) -> U256 {
        U256::from(now.saturating_add(self.router.deadline_secs))
    }

    /// Builds a router over `chain` with every configured venue, pinned pool and route
    /// applied through the operator surface.
    pub fn build_router<C: Chain + ?Sized>(&self, chain: Arc<C>) -> anyhow::Result<SwapRouter<C>> {
        if self.router.max_route_depth < MIN_ROUTE_DEPTH {
            anyhow::bail!(
                "router.max_route_depth must be at least {}, got {}",
                MIN_ROUTE_DEPTH,
                self.router.max_route_depth
            );
        }
        let router = SwapRouter::new(
            chain,
            self.policy(),
            self.router.default_venue,
            self.discovery.clone(),
        );
        let config = router.configure(self.router.operator)?;
        for venue in &self.venues {
            config.set_venue(venue.venue, venue.endpoints())?;
        }
        for pinned in &self.pinned_pools {
            config.set_pinned_pool(pinned.venue, pinned.token_a, pinned.token_b, pinned.pool_ref()?)?;
        }
        for route in &self.routes {
            let hops = route
                .hops
                .iter()
                .map(HopSettings::descriptor)
                .collect::<Result<Vec<_>, _>>()?;
            config.set_route(route.from, route.to, hops, route.derive_reverse)?;
        }
        Ok(router)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
