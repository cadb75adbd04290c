mod common;

use common::{e18, Fixture, ACCOUNT, AMBIENT_POOL_IDX, OPERATOR, OTHER_USER, RECIPIENT, USER};
use ethers::types::{Address, U256};
use vault_router_sdk::adapters::LiquidityTarget;
use vault_router_sdk::chain::{BalancerApi, UniswapV3Api};
use vault_router_sdk::{RouterError, VenueEndpoints, VenueId};

fn dust_of(dust: &[(Address, U256)], token: Address) -> U256 {
    dust.iter()
        .filter(|(t, _)| *t == token)
        .fold(U256::zero(), |acc, (_, amount)| acc + *amount)
}

#[tokio::test]
async fn test_balancer_zap_joins_exact_amounts() {
    let f = Fixture::new().await;
    let ctx = f.ctx().await;
    let tka_before = f.balance(f.tka, USER).await;

    let outcome = f
        .lp
        .add_liquidity(&ctx, f.tka, e18(300), LiquidityTarget::BalancerPool(f.balancer_pool), VenueId::Balancer)
        .await
        .unwrap();

    assert!(outcome.position_tokens > U256::zero());
    assert_eq!(outcome.token_id, None);
    assert!(outcome.dust.is_empty());
    assert_eq!(f.balance(f.tka, USER).await, tka_before - e18(300));
    assert_eq!(f.balance(f.bpt, USER).await, outcome.position_tokens);

    // the converted part went through the same pool, so every input unit ends up there
    let (tokens, balances) = f
        .chain
        .balancer_get_pool_tokens(f.balancer.vault, f.balancer_pool)
        .await
        .unwrap();
    assert_eq!(tokens, vec![f.tka, f.tkb]);
    assert_eq!(balances, vec![e18(1300), e18(2000)]);
    f.assert_account_empty().await;
}

#[tokio::test]
async fn test_balancer_remove_into_single_token() {
    let f = Fixture::new().await;
    let ctx = f.ctx().await;
    let target = LiquidityTarget::BalancerPool(f.balancer_pool);
    let added = f
        .lp
        .add_liquidity(&ctx, f.tka, e18(300), target, VenueId::Balancer)
        .await
        .unwrap();
    f.chain
        .approve_from(USER, f.bpt, ACCOUNT, U256::MAX)
        .await
        .unwrap();
    let tka_before = f.balance(f.tka, USER).await;

    let outcome = f
        .lp
        .remove_liquidity(&ctx, target, added.position_tokens, f.tka, VenueId::Balancer)
        .await
        .unwrap();

    assert!(outcome.amount_out > e18(250));
    assert!(outcome.dust.is_empty());
    assert_eq!(f.balance(f.tka, USER).await, tka_before + outcome.amount_out);
    assert_eq!(f.balance(f.bpt, USER).await, U256::zero());
    assert_eq!(f.balance(f.bpt, ACCOUNT).await, U256::zero());
    f.assert_account_empty().await;
}

#[tokio::test]
async fn test_pair_zap_refunds_dust() {
    let f = Fixture::new().await;
    let ctx = f.ctx().await;
    let tka_before = f.balance(f.tka, USER).await;
    let tkb_before = f.balance(f.tkb, USER).await;

    let outcome = f
        .lp
        .add_liquidity(&ctx, f.tka, e18(300), LiquidityTarget::Pair(f.v2_ab), VenueId::UniswapV2)
        .await
        .unwrap();

    assert!(outcome.position_tokens > U256::zero());
    assert_eq!(f.balance(f.v2_ab, USER).await, outcome.position_tokens);
    assert_eq!(
        f.balance(f.tka, USER).await,
        tka_before - e18(300) + dust_of(&outcome.dust, f.tka)
    );
    assert_eq!(f.balance(f.tkb, USER).await, tkb_before + dust_of(&outcome.dust, f.tkb));
    f.assert_account_empty().await;

    f.chain
        .approve_from(USER, f.v2_ab, ACCOUNT, U256::MAX)
        .await
        .unwrap();
    let tkb_before = f.balance(f.tkb, USER).await;
    let removed = f
        .lp
        .remove_liquidity(&ctx, LiquidityTarget::Pair(f.v2_ab), outcome.position_tokens, f.tkb, VenueId::UniswapV2)
        .await
        .unwrap();

    assert!(removed.amount_out > U256::zero());
    assert!(removed.dust.is_empty());
    assert_eq!(f.balance(f.tkb, USER).await, tkb_before + removed.amount_out);
    assert_eq!(f.balance(f.v2_ab, USER).await, U256::zero());
    f.assert_account_empty().await;
}

#[tokio::test]
async fn test_range_zap_mints_position_for_caller() {
    let f = Fixture::new().await;
    let ctx = f.ctx().await;
    let target = LiquidityTarget::Range {
        pool: f.v3_ab,
        tick_lower: -600,
        tick_upper: 600,
    };

    let outcome = f
        .lp
        .add_liquidity(&ctx, f.tka, e18(300), target, VenueId::UniswapV3)
        .await
        .unwrap();
    let token_id = outcome.token_id.unwrap();
    assert!(outcome.position_tokens > U256::zero());
    assert_eq!(
        f.chain.position_owner(f.v3.position_manager, token_id).await.unwrap(),
        USER
    );
    f.assert_account_empty().await;

    f.chain
        .approve_position(f.v3.position_manager, USER, ACCOUNT, token_id)
        .await
        .unwrap();
    let tka_before = f.balance(f.tka, USER).await;
    let removed = f
        .lp
        .remove_liquidity(&ctx, LiquidityTarget::Position(token_id), outcome.position_tokens, f.tka, VenueId::UniswapV3)
        .await
        .unwrap();

    assert!(removed.amount_out > e18(290));
    assert_eq!(f.balance(f.tka, USER).await, tka_before + removed.amount_out);
    assert_eq!(
        f.chain.position_owner(f.v3.position_manager, token_id).await.unwrap(),
        USER
    );
    let position = f
        .chain
        .v3_position(f.v3.position_manager, token_id)
        .await
        .unwrap();
    assert_eq!(position.liquidity, 0);
    f.assert_account_empty().await;
}

#[tokio::test]
async fn test_ambient_zap_and_exit() {
    let f = Fixture::new().await;
    let ctx = f.ctx().await;
    let target = LiquidityTarget::AmbientPool {
        base: f.tka,
        quote: f.tkb,
        pool_idx: AMBIENT_POOL_IDX,
    };
    let tka_before = f.balance(f.tka, USER).await;

    let outcome = f
        .lp
        .add_liquidity(&ctx, f.tka, e18(200), target, VenueId::Ambient)
        .await
        .unwrap();
    assert!(outcome.position_tokens > U256::zero());
    assert_eq!(
        f.balance(f.tka, USER).await,
        tka_before - e18(200) + dust_of(&outcome.dust, f.tka)
    );
    f.assert_account_empty().await;

    let tkb_before = f.balance(f.tkb, USER).await;
    let removed = f
        .lp
        .remove_liquidity(&ctx, target, outcome.position_tokens, f.tkb, VenueId::Ambient)
        .await
        .unwrap();
    assert!(removed.amount_out > e18(190));
    assert_eq!(f.balance(f.tkb, USER).await, tkb_before + removed.amount_out);
    f.assert_account_empty().await;
}

#[tokio::test]
async fn test_failure_after_pull_reverts_the_zap() {
    let f = Fixture::new().await;
    let ctx = f.ctx().await;
    // valuation needs the query endpoint, which is now missing
    f.router
        .configure(OPERATOR)
        .unwrap()
        .set_venue(VenueId::Balancer, VenueEndpoints::new(f.balancer.vault))
        .unwrap();
    let tka_before = f.balance(f.tka, USER).await;

    let result = f
        .lp
        .add_liquidity(&ctx, f.tka, e18(300), LiquidityTarget::BalancerPool(f.balancer_pool), VenueId::Balancer)
        .await;

    assert!(matches!(result, Err(RouterError::MissingEndpoint { venue: VenueId::Balancer, .. })));
    assert_eq!(f.balance(f.tka, USER).await, tka_before);
    f.assert_account_empty().await;
}

#[tokio::test]
async fn test_target_must_match_venue() {
    let f = Fixture::new().await;
    let ctx = f.ctx().await;

    let result = f
        .lp
        .add_liquidity(&ctx, f.tka, e18(1), LiquidityTarget::Pair(f.v2_ab), VenueId::Balancer)
        .await;
    assert!(matches!(result, Err(RouterError::TargetMismatch(VenueId::Balancer))));

    let result = f
        .lp
        .add_liquidity(&ctx, f.tka, U256::zero(), LiquidityTarget::Pair(f.v2_ab), VenueId::UniswapV2)
        .await;
    assert!(matches!(result, Err(RouterError::ZeroAmount)));

    let result = f
        .lp
        .remove_liquidity(&ctx, LiquidityTarget::Pair(f.v2_ab), e18(1), f.tka, VenueId::SushiSwapV2)
        .await;
    assert!(matches!(result, Err(RouterError::UnsupportedVenue(_))));
}

#[tokio::test]
async fn test_default_venue_zap() {
    let f = Fixture::new().await;
    let ctx = f.ctx().await;
    let target = LiquidityTarget::Range {
        pool: f.v3_ab,
        tick_lower: -1200,
        tick_upper: 1200,
    };

    let outcome = f
        .lp
        .add_liquidity_with_default_venue(&ctx, f.tkb, e18(50), target)
        .await
        .unwrap();
    assert!(outcome.token_id.is_some());
    assert!(outcome.position_tokens > U256::zero());
    f.assert_account_empty().await;
}

#[tokio::test]
async fn test_ambient_position_is_redeemable_by_its_owner_only() {
    let f = Fixture::new().await;
    let ctx = f.ctx().await;
    let target = LiquidityTarget::AmbientPool {
        base: f.tka,
        quote: f.tkb,
        pool_idx: AMBIENT_POOL_IDX,
    };
    let added = f
        .lp
        .add_liquidity(&ctx, f.tka, e18(200), target, VenueId::Ambient)
        .await
        .unwrap();
    assert_eq!(
        f.lp.ambient_position(USER, f.tka, f.tkb, AMBIENT_POOL_IDX),
        added.position_tokens
    );

    let attacker = Address::repeat_byte(0x66);
    let attacker_ctx = f.ctx_for(attacker).await;
    let result = f
        .lp
        .remove_liquidity(&attacker_ctx, target, added.position_tokens, f.tkb, VenueId::Ambient)
        .await;
    assert!(matches!(
        result,
        Err(RouterError::InsufficientPosition { owner, held, .. }) if owner == attacker && held.is_zero()
    ));
    assert_eq!(f.balance(f.tkb, attacker).await, U256::zero());

    // the owner cannot take more than was credited either
    let result = f
        .lp
        .remove_liquidity(&ctx, target, added.position_tokens + U256::one(), f.tkb, VenueId::Ambient)
        .await;
    assert!(matches!(result, Err(RouterError::InsufficientPosition { .. })));

    // partial exit debits the ledger, the rest stays redeemable
    let half = added.position_tokens / 2;
    f.lp
        .remove_liquidity(&ctx, target, half, f.tkb, VenueId::Ambient)
        .await
        .unwrap();
    let rest = added.position_tokens - half;
    assert_eq!(f.lp.ambient_position(USER, f.tka, f.tkb, AMBIENT_POOL_IDX), rest);
    f.lp
        .remove_liquidity(&ctx, target, rest, f.tkb, VenueId::Ambient)
        .await
        .unwrap();
    assert_eq!(
        f.lp.ambient_position(USER, f.tka, f.tkb, AMBIENT_POOL_IDX),
        U256::zero()
    );
    f.assert_account_empty().await;
}

#[tokio::test]
async fn test_ambient_ledger_is_per_caller() {
    let f = Fixture::new().await;
    let target = LiquidityTarget::AmbientPool {
        base: f.tka,
        quote: f.tkb,
        pool_idx: AMBIENT_POOL_IDX,
    };
    let user_ctx = f.ctx_for(USER).await;
    let other_ctx = f.ctx_for(OTHER_USER).await;
    let mine = f
        .lp
        .add_liquidity(&user_ctx, f.tka, e18(100), target, VenueId::Ambient)
        .await
        .unwrap();
    let theirs = f
        .lp
        .add_liquidity(&other_ctx, f.tkb, e18(50), target, VenueId::Ambient)
        .await
        .unwrap();

    // OTHER_USER cannot redeem USER's share on top of their own
    let result = f
        .lp
        .remove_liquidity(&other_ctx, target, theirs.position_tokens + mine.position_tokens, f.tka, VenueId::Ambient)
        .await;
    assert!(matches!(result, Err(RouterError::InsufficientPosition { .. })));
    assert_eq!(
        f.lp.ambient_position(USER, f.tka, f.tkb, AMBIENT_POOL_IDX),
        mine.position_tokens
    );

    // a failed removal leaves the ledger untouched
    f.expire_deadlines().await;
    let result = f
        .lp
        .remove_liquidity(&user_ctx, target, mine.position_tokens, f.tka, VenueId::Ambient)
        .await;
    assert!(matches!(result, Err(RouterError::DeadlineExpired { .. })));
    assert_eq!(
        f.lp.ambient_position(USER, f.tka, f.tkb, AMBIENT_POOL_IDX),
        mine.position_tokens
    );
}

#[tokio::test]
async fn test_liquidity_rejects_expired_deadline() {
    let f = Fixture::new().await;
    let ctx = f.ctx().await;
    let ambient = LiquidityTarget::AmbientPool {
        base: f.tka,
        quote: f.tkb,
        pool_idx: AMBIENT_POOL_IDX,
    };
    let balancer = LiquidityTarget::BalancerPool(f.balancer_pool);
    let bpt = f
        .lp
        .add_liquidity(&ctx, f.tka, e18(100), balancer, VenueId::Balancer)
        .await
        .unwrap()
        .position_tokens;
    f.chain
        .approve_from(USER, f.bpt, ACCOUNT, U256::MAX)
        .await
        .unwrap();
    f.expire_deadlines().await;
    let tka_before = f.balance(f.tka, USER).await;

    let result = f
        .lp
        .add_liquidity(&ctx, f.tka, e18(100), ambient, VenueId::Ambient)
        .await;
    assert!(matches!(result, Err(RouterError::DeadlineExpired { .. })));
    assert_eq!(
        f.lp.ambient_position(USER, f.tka, f.tkb, AMBIENT_POOL_IDX),
        U256::zero()
    );

    let result = f
        .lp
        .add_liquidity(&ctx, f.tka, e18(100), balancer, VenueId::Balancer)
        .await;
    assert!(result.is_err());

    let result = f
        .lp
        .remove_liquidity(&ctx, balancer, bpt, f.tka, VenueId::Balancer)
        .await;
    assert!(matches!(result, Err(RouterError::DeadlineExpired { .. })));
    assert_eq!(f.balance(f.bpt, USER).await, bpt);

    assert_eq!(f.balance(f.tka, USER).await, tka_before);
    f.assert_account_empty().await;
}

#[tokio::test]
async fn test_zap_with_unrepresentable_decimals_fails_cleanly() {
    let f = Fixture::new().await;
    let ctx = f.ctx().await;
    let wide = f.chain.deploy_token(78).await;
    let pair = f
        .chain
        .seed_v2_pair(f.v2.factory, f.tka, wide, e18(1_000), e18(1_000))
        .await
        .unwrap();
    let tka_before = f.balance(f.tka, USER).await;

    let result = f
        .lp
        .add_liquidity(&ctx, f.tka, e18(10), LiquidityTarget::Pair(pair), VenueId::UniswapV2)
        .await;

    assert!(matches!(result, Err(RouterError::Overflow(_))));
    assert_eq!(f.balance(f.tka, USER).await, tka_before);
    f.assert_account_empty().await;
}

#[tokio::test]
async fn test_concurrent_swap_cannot_take_zap_refund() {
    let f = Fixture::yielding().await;
    let zapper = f.ctx_for(USER).await;
    let swapper = f.ctx_for(OTHER_USER).await;
    let tka_before = f.balance(f.tka, USER).await;
    let other_tka_before = f.balance(f.tka, OTHER_USER).await;

    let (zap, swap) = tokio::join!(
        f.lp
            .add_liquidity(&zapper, f.tka, e18(300), LiquidityTarget::Pair(f.v2_ab), VenueId::UniswapV2),
        f.router
            .swap(&swapper, f.tka, f.tkd, e18(4), e18(1_000), RECIPIENT, VenueId::UniswapV2),
    );

    assert!(matches!(swap, Err(RouterError::InsufficientOutput { .. })));
    let zap = zap.unwrap();
    assert_eq!(f.balance(f.v2_ab, USER).await, zap.position_tokens);
    assert_eq!(
        f.balance(f.tka, USER).await,
        tka_before - e18(300) + dust_of(&zap.dust, f.tka)
    );
    assert_eq!(f.balance(f.tka, OTHER_USER).await, other_tka_before);
    f.assert_account_empty().await;
}
