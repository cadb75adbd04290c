//! Read-only mirror of the swap entry points. Quotes use each venue's pricing
//! primitive (tick price, `getAmountsOut`, `querySwap`, `calcImpact`) and build the
//! same paths as execution, so validation and discovery failures match.

use ethers::types::{Address, U256};
use tracing::debug;

use super::SwapRouter;
use crate::chain::Chain;
use crate::discovery::PoolRef;
use crate::error::RouterResult;
use crate::metrics;
use crate::venue::VenueId;

impl<C: Chain + ?Sized> SwapRouter<C> {
    pub async fn get_quote(&self, token_in: Address, token_out: Address, amount_in: U256, venue: VenueId) -> RouterResult<U256> {
        self.quote_through(token_in, token_out, amount_in, venue, None)
            .await
    }

    /// Quote restricted to a specific pool when `pinned_pool` is set.
    pub(crate) async fn quote_through(
        &self,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
        venue: VenueId,
        pinned_pool: Option<PoolRef>,
    ) -> RouterResult<U256> {
        Self::validate_pair(token_in, token_out, amount_in)?;
        let adapter = self.adapter(venue)?;
        let amount_out = adapter
            .quote(token_in, token_out, amount_in, pinned_pool)
            .await?;
        metrics::increment_quotes(venue.name());
        debug!(venue = %venue, token_in = ?token_in, token_out = ?token_out, amount_in = %amount_in, amount_out = %amount_out, "quote");
        Ok(amount_out)
    }

    pub async fn get_quote_with_path(&self, path: &[Address], amount_in: U256, venue: VenueId) -> RouterResult<U256> {
        Self::validate_path(path, amount_in)?;
        let adapter = self.adapter(venue)?;
        let amount_out = adapter.quote_path(path, amount_in).await?;
        metrics::increment_quotes(venue.name());
        debug!(venue = %venue, hops = path.len() - 1, amount_in = %amount_in, amount_out = %amount_out, "path quote");
        Ok(amount_out)
    }

    pub async fn get_quote_with_default_venue(&self, token_in: Address, token_out: Address, amount_in: U256) -> RouterResult<U256> {
        let venue = self.registry.default_venue()?;
        self.get_quote(token_in, token_out, amount_in, venue).await
    }

    pub async fn get_quote_with_path_with_default_venue(&self, path: &[Address], amount_in: U256) -> RouterResult<U256> {
        let venue = self.registry.default_venue()?;
        self.get_quote_with_path(path, amount_in, venue).await
    }
}
