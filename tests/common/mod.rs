// Shared fixture: a simulated chain with every venue family deployed and seeded,
// and a router configured for all of them.
#![allow(dead_code)]

use ethers::types::{Address, H256, U256};
use std::sync::Arc;

use vault_router_sdk::chain::sim::{AmbientDeployment, BalancerDeployment, SimulatedChain, V2Deployment, V3Deployment};
use vault_router_sdk::chain::{CallContext, Erc20Api, UniswapV2Api};
use vault_router_sdk::discovery::{CandidateSets, PoolRef};
use vault_router_sdk::v3_math::encode_price_sqrt;
use vault_router_sdk::{LpRouter, RoutingPolicy, SwapRouter, VenueEndpoints, VenueId};

pub const ACCOUNT: Address = Address::repeat_byte(0xaa);
pub const OPERATOR: Address = Address::repeat_byte(0xee);
pub const USER: Address = Address::repeat_byte(0x11);
pub const RECIPIENT: Address = Address::repeat_byte(0x22);
/// Second funded caller.
pub const OTHER_USER: Address = Address::repeat_byte(0x33);

pub const AMBIENT_POOL_IDX: u64 = 420;

pub fn e18(n: u64) -> U256 {
    U256::from(n) * U256::exp10(18)
}

pub fn sqrt_price_at_parity() -> U256 {
    encode_price_sqrt(U256::one(), U256::one()).unwrap()
}

pub struct Fixture {
    pub chain: Arc<SimulatedChain>,
    pub router: Arc<SwapRouter<SimulatedChain>>,
    pub lp: LpRouter<SimulatedChain>,
    pub tka: Address,
    pub tkb: Address,
    pub tkc: Address,
    /// Wrapped-native intermediary.
    pub tkd: Address,
    pub v2: V2Deployment,
    pub v3: V3Deployment,
    pub balancer: BalancerDeployment,
    pub ambient: AmbientDeployment,
    pub v2_ab: Address,
    pub v3_ab: Address,
    pub balancer_pool: H256,
    pub bpt: Address,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_chain(SimulatedChain::new(ACCOUNT)).await
    }

    /// Fixture whose chain yields on every call, so concurrent callers interleave.
    pub async fn yielding() -> Self {
        Self::with_chain(SimulatedChain::new(ACCOUNT).with_yielding()).await
    }

    pub async fn with_chain(chain: SimulatedChain) -> Self {
        let chain = Arc::new(chain);
        let tka = chain.deploy_token(18).await;
        let tkb = chain.deploy_token(18).await;
        let tkc = chain.deploy_token(18).await;
        let tkd = chain.deploy_token(18).await;

        let v2 = chain.deploy_uniswap_v2().await;
        let v2_ab = chain
            .seed_v2_pair(v2.factory, tka, tkb, e18(10_000), e18(10_000))
            .await
            .unwrap();
        for (a, b) in [(tka, tkd), (tkb, tkd), (tkc, tkd)] {
            chain
                .seed_v2_pair(v2.factory, a, b, e18(10_000), e18(10_000))
                .await
                .unwrap();
        }

        let v3 = chain.deploy_uniswap_v3().await;
        let v3_ab = chain
            .create_v3_pool(v3.factory, tka, tkb, 500, sqrt_price_at_parity(), 1_000_000_000_000_000_000_000_000)
            .await
            .unwrap();
        // thinner tier that discovery must not pick
        chain
            .create_v3_pool(v3.factory, tka, tkb, 3000, sqrt_price_at_parity(), 1_000_000_000_000_000_000_000)
            .await
            .unwrap();

        let balancer = chain.deploy_balancer().await;
        let third = U256::from(333_333_333_333_333_333u64);
        let two_thirds = e18(1) - third;
        let (balancer_pool, bpt) = chain
            .create_balancer_pool(
                balancer.vault,
                vec![tka, tkb],
                vec![third, two_thirds],
                U256::from(3_000_000_000_000_000u64),
                vec![e18(1000), e18(2000)],
            )
            .await
            .unwrap();

        let ambient = chain.deploy_ambient().await;
        chain
            .create_ambient_pool(ambient.dex, tka, tkb, AMBIENT_POOL_IDX, e18(10_000), e18(10_000), 500)
            .await
            .unwrap();

        let router = SwapRouter::new(
            Arc::clone(&chain),
            RoutingPolicy::new(OPERATOR, tkd),
            VenueId::UniswapV3,
            CandidateSets::default(),
        );
        let config = router.configure(OPERATOR).unwrap();
        config
            .set_venue(
                VenueId::UniswapV2,
                VenueEndpoints::new(v2.router).with_factory(v2.factory),
            )
            .unwrap();
        config
            .set_venue(
                VenueId::UniswapV3,
                VenueEndpoints::new(v3.router)
                    .with_factory(v3.factory)
                    .with_position_manager(v3.position_manager),
            )
            .unwrap();
        config
            .set_venue(VenueId::Balancer, VenueEndpoints::new(balancer.vault).with_query(balancer.queries))
            .unwrap();
        config
            .set_venue(
                VenueId::Ambient,
                VenueEndpoints::new(ambient.dex)
                    .with_query(ambient.query)
                    .with_preview(ambient.impact),
            )
            .unwrap();
        config
            .set_pinned_pool(VenueId::Balancer, tka, tkb, PoolRef::BalancerPool(balancer_pool))
            .unwrap();

        for token in [tka, tkb, tkc, tkd] {
            for user in [USER, OTHER_USER] {
                chain.mint(token, user, e18(100_000)).await.unwrap();
                chain.approve_from(user, token, ACCOUNT, U256::MAX).await.unwrap();
            }
        }

        let router = Arc::new(router);
        let lp = LpRouter::new(Arc::clone(&router));
        Self {
            chain,
            router,
            lp,
            tka,
            tkb,
            tkc,
            tkd,
            v2,
            v3,
            balancer,
            ambient,
            v2_ab,
            v3_ab,
            balancer_pool,
            bpt,
        }
    }

    pub async fn ctx(&self) -> CallContext {
        self.ctx_for(USER).await
    }

    pub async fn ctx_for(&self, sender: Address) -> CallContext {
        CallContext::new(sender, U256::from(self.chain.timestamp().await + 300))
    }

    /// Moves block time past every deadline handed out by [`Fixture::ctx`].
    pub async fn expire_deadlines(&self) {
        self.chain.set_timestamp(self.chain.timestamp().await + 3_600).await;
    }

    pub async fn balance(&self, token: Address, owner: Address) -> U256 {
        self.chain.balance_of(token, owner).await.unwrap()
    }

    pub async fn v2_amount_out(&self, amount_in: U256, path: &[Address]) -> U256 {
        let amounts = self
            .chain
            .v2_get_amounts_out(self.v2.router, amount_in, path)
            .await
            .unwrap();
        amounts[amounts.len() - 1]
    }

    /// The router account never keeps tokens between calls.
    pub async fn assert_account_empty(&self) {
        for token in [self.tka, self.tkb, self.tkc, self.tkd] {
            assert_eq!(self.balance(token, ACCOUNT).await, U256::zero(), "account kept {:?}", token);
        }
    }
}

/// `|a - b| <= max(a, b) * bps / 10_000`
pub fn assert_close(a: U256, b: U256, bps: u64) {
    let (hi, lo) = if a > b { (a, b) } else { (b, a) };
    assert!(
        (hi - lo) * U256::from(10_000u64) <= hi * U256::from(bps),
        "{} and {} differ by more than {} bps",
        a,
        b,
        bps
    );
}
