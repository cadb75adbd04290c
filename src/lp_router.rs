//! # LP Router
//!
//! Single-token liquidity provisioning. Adding liquidity values every underlying
//! token of the target in the input token, splits the input in that value-weighted
//! ratio, converts the parts through the swap router and calls the venue's add
//! primitive. Removing liquidity redeems the position and converts every underlying
//! token into the requested output. Leftovers go back to the caller as dust.
//!
//! Both operations run inside one chain checkpoint: a failure at any step reverts the
//! swaps already executed.
//!
//! Ambient positions are held by the router account itself, so the router keeps a
//! per-caller ledger of the liquidity units each caller added and only lets that
//! caller redeem them.

use std::sync::Arc;

use dashmap::DashMap;
use ethers::types::{Address, U256};
use tracing::{debug, info, warn};

use crate::adapters::{Composition, LiquidityTarget, VenueAdapter};
use crate::chain::{atomically, AmbientPoolKey, CallContext, Chain};
use crate::discovery::{ambient_pool_key, PoolRef};
use crate::error::{ensure_address, ensure_amount, RouterError, RouterResult};
use crate::math::{divide_in_ratios, mul_div};
use crate::metrics;
use crate::route_store::HopDescriptor;
use crate::router::SwapRouter;
use crate::venue::{VenueId, VenueKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddLiquidityOutcome {
    /// LP / BPT tokens, or liquidity units for concentrated and Ambient positions.
    pub position_tokens: U256,
    /// Position NFT for concentrated-liquidity targets.
    pub token_id: Option<U256>,
    /// Leftover balances refunded to the caller.
    pub dust: Vec<(Address, U256)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveLiquidityOutcome {
    pub amount_out: U256,
    pub dust: Vec<(Address, U256)>,
}

/// Router-account balances captured before an operation.
struct Baseline(Vec<(Address, U256)>);

impl Baseline {
    fn of(&self, token: Address) -> U256 {
        self.0
            .iter()
            .find(|(t, _)| *t == token)
            .map(|(_, balance)| *balance)
            .unwrap_or_default()
    }
}

type AmbientLedgerKey = (Address, AmbientPoolKey);

pub struct LpRouter<C: Chain + ?Sized> {
    router: Arc<SwapRouter<C>>,
    ambient_positions: DashMap<AmbientLedgerKey, U256>,
}

impl<C: Chain + ?Sized> LpRouter<C> {
    pub fn new(router: Arc<SwapRouter<C>>) -> Self {
        Self {
            router,
            ambient_positions: DashMap::new(),
        }
    }

    pub fn router(&self) -> &SwapRouter<C> {
        &self.router
    }

    fn chain(&self) -> &C {
        self.router.chain().as_ref()
    }

    /// Ledger key for targets whose position the router account holds on the owner's behalf.
    fn ledger_key(owner: Address, target: &LiquidityTarget, venue: VenueId) -> Option<AmbientLedgerKey> {
        match (*target, venue.kind()) {
            (LiquidityTarget::AmbientPool { base, quote, pool_idx }, VenueKind::TickIndexed) => {
                Some((owner, ambient_pool_key(base, quote, pool_idx)))
            }
            _ => None,
        }
    }

    /// Ambient liquidity units `owner` added through this router and has not removed.
    pub fn ambient_position(&self, owner: Address, base: Address, quote: Address, pool_idx: u64) -> U256 {
        self.ambient_positions
            .get(&(owner, ambient_pool_key(base, quote, pool_idx)))
            .map(|held| *held)
            .unwrap_or_default()
    }

    fn ensure_held(&self, key: &AmbientLedgerKey, requested: U256) -> RouterResult<()> {
        let held = self
            .ambient_positions
            .get(key)
            .map(|held| *held)
            .unwrap_or_default();
        if held < requested {
            return Err(RouterError::InsufficientPosition {
                owner: key.0,
                held,
                requested,
            });
        }
        Ok(())
    }

    fn credit(&self, key: AmbientLedgerKey, amount: U256) {
        let mut held = self.ambient_positions.entry(key).or_default();
        *held = held.saturating_add(amount);
    }

    fn debit(&self, key: AmbientLedgerKey, amount: U256) {
        let emptied = match self.ambient_positions.get_mut(&key) {
            Some(mut held) => {
                *held = held.saturating_sub(amount);
                held.is_zero()
            }
            None => false,
        };
        if emptied {
            self.ambient_positions.remove(&key);
        }
    }

    async fn baseline(&self, tokens: &[Address]) -> RouterResult<Baseline> {
        let account = self.chain().account();
        let mut balances = Vec::with_capacity(tokens.len());
        for token in tokens {
            balances.push((*token, self.chain().balance_of(*token, account).await?));
        }
        Ok(Baseline(balances))
    }

    /// Balance gained by the router account since `baseline` was taken.
    async fn gained(&self, token: Address, baseline: &Baseline) -> RouterResult<U256> {
        let now = self.chain().balance_of(token, self.chain().account()).await?;
        Ok(now.saturating_sub(baseline.of(token)))
    }

    /// Sends everything gained in `tokens` back to the caller.
    async fn refund(&self, ctx: &CallContext, tokens: &[Address], baseline: &Baseline) -> RouterResult<Vec<(Address, U256)>> {
        let account = self.chain().account();
        let mut dust = Vec::new();
        for token in tokens {
            let extra = self.gained(*token, baseline).await?;
            if extra.is_zero() {
                continue;
            }
            if ctx.sender != account {
                self.chain().transfer(*token, ctx.sender, extra).await?;
            }
            dust.push((*token, extra));
        }
        Ok(dust)
    }

    /// Pool to route conversions through: the target itself when it trades `token`.
    fn conversion_pool(composition: &Composition, token: Address) -> Option<PoolRef> {
        composition.contains(token).then_some(composition.pool)
    }

    /// Value of each underlying amount expressed in `input_token`.
    async fn values_in(&self, composition: &Composition, input_token: Address, venue: VenueId) -> RouterResult<Vec<U256>> {
        let pin = Self::conversion_pool(composition, input_token);
        let mut values = Vec::with_capacity(composition.tokens.len());
        for (token, amount) in composition.tokens.iter().zip(&composition.amounts) {
            if *token == input_token || amount.is_zero() {
                values.push(*amount);
                continue;
            }
            let decimals = self.chain().decimals(*token).await?;
            let unit = U256::from(10u8)
                .checked_pow(U256::from(decimals))
                .ok_or(RouterError::Overflow("token decimals"))?;
            let unit_price = self
                .router
                .quote_through(*token, input_token, unit, venue, pin)
                .await?;
            let value = mul_div(unit_price, *amount, unit).ok_or(RouterError::Overflow("liquidity valuation"))?;
            values.push(value);
        }
        Ok(values)
    }

    pub async fn add_liquidity(
        &self,
        ctx: &CallContext,
        input_token: Address,
        input_amount: U256,
        target: LiquidityTarget,
        venue: VenueId,
    ) -> RouterResult<AddLiquidityOutcome> {
        let result = async {
            ensure_address(input_token, "input token")?;
            ensure_address(ctx.sender, "sender")?;
            ensure_amount(input_amount)?;
            let adapter = self.router.adapter(venue)?;
            let _guard = self.router.exclusive().await;
            let outcome = atomically(self.chain(), self.add_liquidity_inner(ctx, adapter.as_ref(), input_token, input_amount, &target, venue))
                .await?;
            if let Some(key) = Self::ledger_key(ctx.sender, &target, venue) {
                self.credit(key, outcome.position_tokens);
            }
            Ok::<_, RouterError>(outcome)
        }
        .await;

        metrics::increment_liquidity_ops("add", venue.name(), metrics::outcome(&result));
        match &result {
            Ok(outcome) => info!(
                venue = %venue,
                target = ?target,
                input_amount = %input_amount,
                position_tokens = %outcome.position_tokens,
                "liquidity added"
            ),
            Err(err) => {
                metrics::increment_errors(err.category().as_str());
                warn!(venue = %venue, target = ?target, "add liquidity failed: {}", err);
            }
        }
        result
    }

    async fn add_liquidity_inner(
        &self,
        ctx: &CallContext,
        adapter: &dyn VenueAdapter,
        input_token: Address,
        input_amount: U256,
        target: &LiquidityTarget,
        venue: VenueId,
    ) -> RouterResult<AddLiquidityOutcome> {
        let account = self.chain().account();
        let composition = adapter.composition(target).await?;
        let mut watched = composition.tokens.clone();
        if !composition.contains(input_token) {
            watched.push(input_token);
        }
        let baseline = self.baseline(&watched).await?;
        self.router.pull(ctx, input_token, input_amount).await?;

        let values = self.values_in(&composition, input_token, venue).await?;
        let parts = divide_in_ratios(input_amount, &values)?;
        debug!(venue = %venue, values = ?values, parts = ?parts, "liquidity split");

        let pin = Self::conversion_pool(&composition, input_token);
        let mut amounts = Vec::with_capacity(parts.len());
        for (token, part) in composition.tokens.iter().zip(&parts) {
            if *token == input_token || part.is_zero() {
                amounts.push(*part);
                continue;
            }
            let hop = HopDescriptor {
                token_in: input_token,
                token_out: *token,
                venue,
                composite: false,
                pinned_pool: pin,
            };
            amounts.push(self.router.execute_hop(&hop, *part, account, ctx.deadline).await?);
        }

        let added = adapter
            .add_liquidity(target, &amounts, ctx.sender, ctx.deadline)
            .await?;
        let dust = self.refund(ctx, &watched, &baseline).await?;
        Ok(AddLiquidityOutcome {
            position_tokens: added.position_tokens,
            token_id: added.token_id,
            dust,
        })
    }

    pub async fn remove_liquidity(
        &self,
        ctx: &CallContext,
        target: LiquidityTarget,
        amount: U256,
        output_token: Address,
        venue: VenueId,
    ) -> RouterResult<RemoveLiquidityOutcome> {
        let result = async {
            ensure_address(output_token, "output token")?;
            ensure_address(ctx.sender, "sender")?;
            ensure_amount(amount)?;
            let adapter = self.router.adapter(venue)?;
            let _guard = self.router.exclusive().await;
            let key = Self::ledger_key(ctx.sender, &target, venue);
            if let Some(key) = &key {
                self.ensure_held(key, amount)?;
            }
            let outcome = atomically(self.chain(), self.remove_liquidity_inner(ctx, adapter.as_ref(), &target, amount, output_token, venue))
                .await?;
            if let Some(key) = key {
                self.debit(key, amount);
            }
            Ok::<_, RouterError>(outcome)
        }
        .await;

        metrics::increment_liquidity_ops("remove", venue.name(), metrics::outcome(&result));
        match &result {
            Ok(outcome) => info!(
                venue = %venue,
                target = ?target,
                amount = %amount,
                amount_out = %outcome.amount_out,
                "liquidity removed"
            ),
            Err(err) => {
                metrics::increment_errors(err.category().as_str());
                warn!(venue = %venue, target = ?target, "remove liquidity failed: {}", err);
            }
        }
        result
    }

    async fn remove_liquidity_inner(
        &self,
        ctx: &CallContext,
        adapter: &dyn VenueAdapter,
        target: &LiquidityTarget,
        amount: U256,
        output_token: Address,
        venue: VenueId,
    ) -> RouterResult<RemoveLiquidityOutcome> {
        let account = self.chain().account();
        let composition = adapter.composition(target).await?;
        let mut watched = composition.tokens.clone();
        if !composition.contains(output_token) {
            watched.push(output_token);
        }
        let baseline = self.baseline(&watched).await?;

        let redeemed = adapter
            .remove_liquidity(target, amount, ctx.sender, ctx.deadline)
            .await?;

        let pin = Self::conversion_pool(&composition, output_token);
        for token in redeemed.iter().filter(|token| **token != output_token) {
            let received = self.gained(*token, &baseline).await?;
            if received.is_zero() {
                continue;
            }
            let hop = HopDescriptor {
                token_in: *token,
                token_out: output_token,
                venue,
                composite: false,
                pinned_pool: pin,
            };
            self.router
                .execute_hop(&hop, received, account, ctx.deadline)
                .await?;
        }

        let amount_out = self.gained(output_token, &baseline).await?;
        if ctx.sender != account && !amount_out.is_zero() {
            self.chain().transfer(output_token, ctx.sender, amount_out).await?;
        }
        let leftovers: Vec<Address> = watched
            .into_iter()
            .filter(|token| *token != output_token)
            .collect();
        let dust = self.refund(ctx, &leftovers, &baseline).await?;
        Ok(RemoveLiquidityOutcome { amount_out, dust })
    }

    pub async fn add_liquidity_with_default_venue(
        &self,
        ctx: &CallContext,
        input_token: Address,
        input_amount: U256,
        target: LiquidityTarget,
    ) -> RouterResult<AddLiquidityOutcome> {
        let venue = self.router.registry().default_venue()?;
        self.add_liquidity(ctx, input_token, input_amount, target, venue)
            .await
    }

    pub async fn remove_liquidity_with_default_venue(
        &self,
        ctx: &CallContext,
        target: LiquidityTarget,
        amount: U256,
        output_token: Address,
    ) -> RouterResult<RemoveLiquidityOutcome> {
        let venue = self.router.registry().default_venue()?;
        self.remove_liquidity(ctx, target, amount, output_token, venue)
            .await
    }
}
