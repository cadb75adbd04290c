mod common;

use common::{assert_close, e18, Fixture, OPERATOR, OTHER_USER, RECIPIENT, USER};
use ethers::types::U256;
use vault_router_sdk::discovery::PoolRef;
use vault_router_sdk::route_store::HopDescriptor;
use vault_router_sdk::router::DEFAULT_MAX_ROUTE_DEPTH;
use vault_router_sdk::{EndpointKind, RouterError, VenueEndpoints, VenueId};

#[tokio::test]
async fn test_v3_direct_swap_debits_exact_input() {
    let f = Fixture::new().await;
    let ctx = f.ctx().await;
    let tka_before = f.balance(f.tka, USER).await;
    let tkb_before = f.balance(f.tkb, RECIPIENT).await;

    let amount_out = f
        .router
        .swap(&ctx, f.tka, f.tkb, e18(1000), e18(990), RECIPIENT, VenueId::UniswapV3)
        .await
        .unwrap();

    assert!(amount_out >= e18(990));
    assert_eq!(f.balance(f.tka, USER).await, tka_before - e18(1000));
    assert_eq!(f.balance(f.tkb, RECIPIENT).await, tkb_before + amount_out);
    f.assert_account_empty().await;
}

#[tokio::test]
async fn test_discovery_picks_deepest_fee_tier() {
    let f = Fixture::new().await;
    let best = f
        .router
        .discovery()
        .find_most_liquid_pool(f.tka, f.tkb, VenueId::UniswapV3)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(best.pool, PoolRef::Address(f.v3_ab));
    assert_eq!(best.tier, 500);

    // unregistered candidate index reports zero liquidity and is skipped
    let ambient = f
        .router
        .discovery()
        .find_most_liquid_pool(f.tka, f.tkb, VenueId::Ambient)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ambient.pool, PoolRef::AmbientIndex(common::AMBIENT_POOL_IDX));
}

#[tokio::test]
async fn test_swap_into_intermediary_is_single_hop() {
    let f = Fixture::new().await;
    let ctx = f.ctx().await;
    let expected = f.v2_amount_out(U256::from(500), &[f.tkc, f.tkd]).await;

    let amount_out = f
        .router
        .swap(&ctx, f.tkc, f.tkd, U256::from(500), U256::one(), RECIPIENT, VenueId::UniswapV2)
        .await
        .unwrap();

    assert_eq!(amount_out, expected);
    assert_eq!(f.balance(f.tkd, RECIPIENT).await, expected);
}

#[tokio::test]
async fn test_constant_product_swap_routes_through_intermediary() {
    let f = Fixture::new().await;
    let ctx = f.ctx().await;
    let expected = f.v2_amount_out(e18(10), &[f.tka, f.tkd, f.tkb]).await;
    let direct_pair_before = f.balance(f.tka, f.v2_ab).await;

    let amount_out = f
        .router
        .swap(&ctx, f.tka, f.tkb, e18(10), U256::one(), RECIPIENT, VenueId::UniswapV2)
        .await
        .unwrap();

    assert_eq!(amount_out, expected);
    assert_eq!(f.balance(f.tka, f.v2_ab).await, direct_pair_before);
}

#[tokio::test]
async fn test_quotes_match_execution_per_venue() {
    let f = Fixture::new().await;
    let ctx = f.ctx().await;

    for venue in [VenueId::UniswapV2, VenueId::Balancer, VenueId::Ambient] {
        let quoted = f
            .router
            .get_quote(f.tka, f.tkb, e18(5), venue)
            .await
            .unwrap();
        let executed = f
            .router
            .swap(&ctx, f.tka, f.tkb, e18(5), U256::one(), USER, venue)
            .await
            .unwrap();
        assert_eq!(quoted, executed, "venue {}", venue);
    }

    // spot quote after fee, execution also pays price impact
    let quoted = f
        .router
        .get_quote_with_default_venue(f.tka, f.tkb, e18(5))
        .await
        .unwrap();
    let executed = f
        .router
        .swap_with_default_venue(&ctx, f.tka, f.tkb, e18(5), U256::one(), USER)
        .await
        .unwrap();
    assert_close(quoted, executed, 50);
}

#[tokio::test]
async fn test_path_quote_and_swap() {
    let f = Fixture::new().await;
    let ctx = f.ctx().await;
    let path = [f.tkc, f.tkd, f.tka];

    let quoted = f
        .router
        .get_quote_with_path(&path, e18(3), VenueId::UniswapV2)
        .await
        .unwrap();
    let executed = f
        .router
        .swap_with_path(&ctx, &path, e18(3), quoted, RECIPIENT, VenueId::UniswapV2)
        .await
        .unwrap();
    assert_eq!(quoted, executed);
    assert_eq!(f.balance(f.tka, RECIPIENT).await, executed);

    assert!(matches!(
        f.router
            .get_quote_with_path(&[f.tka], e18(1), VenueId::UniswapV2)
            .await,
        Err(RouterError::PathTooShort(1))
    ));
    // no Ambient pool between tkc and tkd
    assert!(matches!(
        f.router
            .get_quote_with_path(&[f.tka, f.tkb, f.tkc], e18(1), VenueId::Ambient)
            .await,
        Err(RouterError::NoPoolForMultihop { .. })
    ));
}

#[tokio::test]
async fn test_insufficient_output_reverts_everything() {
    let f = Fixture::new().await;
    let ctx = f.ctx().await;
    let tka_before = f.balance(f.tka, USER).await;
    let pool_before = f.balance(f.tka, f.v3_ab).await;

    let result = f
        .router
        .swap(&ctx, f.tka, f.tkb, e18(1000), e18(1001), RECIPIENT, VenueId::UniswapV3)
        .await;

    assert!(matches!(result, Err(RouterError::InsufficientOutput { .. })));
    assert_eq!(f.balance(f.tka, USER).await, tka_before);
    assert_eq!(f.balance(f.tka, f.v3_ab).await, pool_before);
    assert_eq!(f.balance(f.tkb, RECIPIENT).await, U256::zero());
    f.assert_account_empty().await;
}

#[tokio::test]
async fn test_unsupported_venue_and_missing_endpoint() {
    let f = Fixture::new().await;
    let ctx = f.ctx().await;
    let tka_before = f.balance(f.tka, USER).await;

    let result = f
        .router
        .swap(&ctx, f.tka, f.tkb, e18(1), U256::one(), RECIPIENT, VenueId::SushiSwapV2)
        .await;
    assert!(matches!(result, Err(RouterError::UnsupportedVenue(_))));
    assert!(matches!(
        f.router
            .get_quote(f.tka, f.tkb, e18(1), VenueId::PancakeSwapV3)
            .await,
        Err(RouterError::UnsupportedVenue(_))
    ));

    // registered without a factory: discovery cannot run
    f.router
        .configure(OPERATOR)
        .unwrap()
        .set_venue(VenueId::PancakeSwapV3, VenueEndpoints::new(f.v3.router))
        .unwrap();
    let result = f
        .router
        .swap(&ctx, f.tka, f.tkb, e18(1), U256::one(), RECIPIENT, VenueId::PancakeSwapV3)
        .await;
    assert!(matches!(
        result,
        Err(RouterError::MissingEndpoint {
            venue: VenueId::PancakeSwapV3,
            endpoint: EndpointKind::Factory,
        })
    ));
    assert_eq!(f.balance(f.tka, USER).await, tka_before);
}

#[tokio::test]
async fn test_input_validation() {
    let f = Fixture::new().await;
    let ctx = f.ctx().await;

    assert!(matches!(
        f.router
            .swap(&ctx, f.tka, f.tka, e18(1), U256::zero(), RECIPIENT, VenueId::UniswapV2)
            .await,
        Err(RouterError::IdenticalTokens(_))
    ));
    assert!(matches!(
        f.router
            .swap(&ctx, f.tka, f.tkb, U256::zero(), U256::zero(), RECIPIENT, VenueId::UniswapV2)
            .await,
        Err(RouterError::ZeroAmount)
    ));
    assert!(matches!(
        f.router
            .swap(&ctx, f.tka, f.tkb, e18(1), U256::zero(), ethers::types::Address::zero(), VenueId::UniswapV2)
            .await,
        Err(RouterError::ZeroAddress(_))
    ));
}

#[tokio::test]
async fn test_routed_swap_follows_configured_hops() {
    let f = Fixture::new().await;
    let ctx = f.ctx().await;
    f.router
        .configure(OPERATOR)
        .unwrap()
        .set_route(
            f.tka,
            f.tkc,
            vec![
                HopDescriptor::leaf(f.tka, f.tkd, VenueId::UniswapV2),
                HopDescriptor::leaf(f.tkd, f.tkc, VenueId::UniswapV2),
            ],
            true,
        )
        .unwrap();
    let expected = f.v2_amount_out(e18(7), &[f.tka, f.tkd, f.tkc]).await;

    let amount_out = f
        .router
        .swap_with_route(&ctx, f.tka, f.tkc, e18(7), U256::one(), RECIPIENT)
        .await
        .unwrap();
    assert_eq!(amount_out, expected);
    assert_eq!(f.balance(f.tkc, RECIPIENT).await, expected);
    f.assert_account_empty().await;

    // derived reverse route
    let back = f
        .router
        .swap_with_route(&ctx, f.tkc, f.tka, e18(1), U256::one(), USER)
        .await
        .unwrap();
    assert!(back > U256::zero());
}

#[tokio::test]
async fn test_missing_route_falls_back_to_default_venue() {
    let f = Fixture::new().await;
    let ctx = f.ctx().await;
    let quoted = f
        .router
        .get_quote(f.tka, f.tkb, e18(2), VenueId::UniswapV3)
        .await
        .unwrap();

    let amount_out = f
        .router
        .swap_with_route(&ctx, f.tka, f.tkb, e18(2), U256::one(), RECIPIENT)
        .await
        .unwrap();
    assert_close(quoted, amount_out, 50);
}

#[tokio::test]
async fn test_route_cycle_fails_with_depth_bound() {
    let f = Fixture::new().await;
    let ctx = f.ctx().await;
    let tka_before = f.balance(f.tka, USER).await;
    f.router
        .configure(OPERATOR)
        .unwrap()
        .set_route(
            f.tka,
            f.tkb,
            vec![HopDescriptor::composite(f.tka, f.tkb, VenueId::UniswapV2)],
            false,
        )
        .unwrap();

    let result = f
        .router
        .swap_with_route(&ctx, f.tka, f.tkb, e18(1), U256::one(), RECIPIENT)
        .await;
    assert!(matches!(
        result,
        Err(RouterError::PathLengthExceeded { max: DEFAULT_MAX_ROUTE_DEPTH })
    ));
    assert_eq!(f.balance(f.tka, USER).await, tka_before);
}

#[tokio::test]
async fn test_expired_deadline_is_rejected() {
    let f = Fixture::new().await;
    let ctx = f.ctx().await;
    f.expire_deadlines().await;
    let tka_before = f.balance(f.tka, USER).await;

    for venue in [VenueId::UniswapV2, VenueId::UniswapV3, VenueId::Balancer, VenueId::Ambient] {
        let result = f
            .router
            .swap(&ctx, f.tka, f.tkb, e18(1), U256::one(), RECIPIENT, venue)
            .await;
        assert!(result.is_err(), "venue {} accepted an expired deadline", venue);
    }
    // Ambient takes no deadline of its own, the router checks block time
    assert!(matches!(
        f.router
            .swap(&ctx, f.tka, f.tkb, e18(1), U256::one(), RECIPIENT, VenueId::Ambient)
            .await,
        Err(RouterError::DeadlineExpired { .. })
    ));
    assert!(matches!(
        f.router
            .swap_with_path(&ctx, &[f.tka, f.tkb], e18(1), U256::one(), RECIPIENT, VenueId::Ambient)
            .await,
        Err(RouterError::DeadlineExpired { .. })
    ));
    assert!(matches!(
        f.router
            .swap(&ctx, f.tka, f.tkd, e18(1), U256::one(), RECIPIENT, VenueId::UniswapV2)
            .await,
        Err(RouterError::Chain(_))
    ));

    assert_eq!(f.balance(f.tka, USER).await, tka_before);
    assert_eq!(f.balance(f.tkb, RECIPIENT).await, U256::zero());
    f.assert_account_empty().await;
}

#[tokio::test]
async fn test_deadline_equal_to_block_time_is_accepted() {
    let f = Fixture::new().await;
    let now = f.chain.timestamp().await;
    let ctx = vault_router_sdk::chain::CallContext::new(USER, U256::from(now));

    let amount_out = f
        .router
        .swap(&ctx, f.tka, f.tkb, e18(1), U256::one(), RECIPIENT, VenueId::Ambient)
        .await
        .unwrap();
    assert_eq!(f.balance(f.tkb, RECIPIENT).await, amount_out);
}

#[tokio::test]
async fn test_failed_call_does_not_undo_concurrent_call() {
    let f = Fixture::yielding().await;
    let failing = f.ctx_for(USER).await;
    let succeeding = f.ctx_for(OTHER_USER).await;
    let user_before = f.balance(f.tka, USER).await;
    let other_before = f.balance(f.tka, OTHER_USER).await;
    let expected = f.v2_amount_out(e18(5), &[f.tka, f.tkd]).await;

    let (failed, succeeded) = tokio::join!(
        f.router
            .swap(&failing, f.tka, f.tkd, e18(3), e18(1_000), USER, VenueId::UniswapV2),
        f.router
            .swap(&succeeding, f.tka, f.tkd, e18(5), U256::one(), RECIPIENT, VenueId::UniswapV2),
    );

    assert!(matches!(failed, Err(RouterError::InsufficientOutput { .. })));
    let amount_out = succeeded.unwrap();
    assert_eq!(f.balance(f.tkd, RECIPIENT).await, amount_out);
    assert_eq!(f.balance(f.tka, USER).await, user_before);
    assert_eq!(f.balance(f.tka, OTHER_USER).await, other_before - e18(5));
    f.assert_account_empty().await;

    // one of the two ran first; either way the pair saw exactly one 5e18 swap
    assert_eq!(amount_out, expected);
}

#[tokio::test]
async fn test_concurrent_swaps_settle_their_own_output() {
    let f = Fixture::yielding().await;
    let first = f.ctx_for(USER).await;
    let second = f.ctx_for(OTHER_USER).await;

    // both pay the same token to the same recipient, so interleaved balance deltas would
    // count the other call's output
    let (a, b) = tokio::join!(
        f.router
            .swap(&first, f.tka, f.tkd, e18(2), U256::one(), RECIPIENT, VenueId::UniswapV2),
        f.router
            .swap(&second, f.tkb, f.tkd, e18(3), U256::one(), RECIPIENT, VenueId::UniswapV2),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(f.balance(f.tkd, RECIPIENT).await, a + b);
    assert!(a < e18(2));
    assert!(b < e18(3) && b > e18(2));
    f.assert_account_empty().await;
}

#[tokio::test]
async fn test_configuration_requires_operator() {
    let f = Fixture::new().await;
    assert!(matches!(
        f.router.configure(USER),
        Err(RouterError::Unauthorized(_))
    ));
}
