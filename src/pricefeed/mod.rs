// =============================================================================
// Price Feed Module
// =============================================================================
//
// The price-lookup seam. The scheduler only ever talks to the `PriceFeed`
// trait, so the production CoinGecko client can be swapped for a mock in
// tests without touching the verification logic.

pub mod coingecko;

pub use coingecko::CoinGeckoClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Why a price lookup failed. Callers branch on `RateLimited` to decide
/// whether a backoff retry within the tick is worthwhile.
#[derive(Debug, Clone, Error)]
pub enum PriceFeedError {
    #[error("rate limited by price provider")]
    RateLimited,
    #[error("no price mapping for symbol '{0}'")]
    UnknownSymbol(String),
    #[error("price unavailable: {0}")]
    Unavailable(String),
}

/// A source of USD prices for asset symbols.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Current USD price for `symbol`, or the price as of `as_of` when given.
    async fn price(
        &self,
        symbol: &str,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<f64, PriceFeedError>;
}
