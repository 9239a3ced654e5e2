// =============================================================================
// CoinGecko REST Client — production price feed
// =============================================================================
//
// Uses the public `/simple/price` endpoint for current prices and
// `/coins/{id}/history` for as-of lookups. Symbols are resolved through a
// fixed symbol -> CoinGecko-id table covering the Avalanche ecosystem plus
// majors; anything outside the table is a typed `UnknownSymbol` error the
// scheduler logs and skips.
//
// HTTP 429 maps to `PriceFeedError::RateLimited` so the caller can back off
// within the tick. An optional demo API key is sent as the
// `x-cg-demo-api-key` header.
// =============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use tracing::{debug, instrument, warn};

use crate::pricefeed::{PriceFeed, PriceFeedError};

const DEFAULT_BASE_URL: &str = "https://api.coingecko.com/api/v3";

/// Symbol -> CoinGecko id. Uppercase keys.
fn coingecko_id(symbol: &str) -> Option<&'static str> {
    let id = match symbol {
        "AVAX" => "avalanche-2",
        "JOE" => "joe",
        "GMX" => "gmx",
        "AAVE" => "aave",
        "LINK" => "chainlink",
        "BTC" => "bitcoin",
        "WBTC" => "wrapped-bitcoin",
        "ETH" => "ethereum",
        "WETH" => "weth",
        "USDC" => "usd-coin",
        "USDT" => "tether",
        "DAI" => "dai",
        "PNG" => "pangolin",
        "QI" => "benqi",
        "XAVA" => "avalaunch",
        "PTP" => "platypus-finance",
        "STG" => "stargate-finance",
        "SUSHI" => "sushi",
        "CRV" => "curve-dao-token",
        "YAK" => "yield-yak",
        "BSGG" => "betswirl",
        "COQ" => "coq-inu",
        "KIMBO" => "kimbo",
        _ => return None,
    };
    Some(id)
}

/// CoinGecko REST price feed.
#[derive(Clone)]
pub struct CoinGeckoClient {
    client: reqwest::Client,
    base_url: String,
    has_api_key: bool,
}

impl CoinGeckoClient {
    /// Create a client. `api_key` is the optional demo-tier key.
    pub fn new(api_key: Option<String>) -> Self {
        let mut default_headers = HeaderMap::new();
        let mut has_api_key = false;
        if let Some(key) = api_key.as_deref() {
            if let Ok(val) = HeaderValue::from_str(key) {
                default_headers.insert("x-cg-demo-api-key", val);
                has_api_key = true;
            }
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        debug!(has_api_key, "CoinGeckoClient initialised (base_url={DEFAULT_BASE_URL})");

        Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            has_api_key,
        }
    }

    async fn current_price(&self, id: &str) -> Result<f64, PriceFeedError> {
        let url = format!(
            "{}/simple/price?ids={}&vs_currencies=usd",
            self.base_url, id
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PriceFeedError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!(id, "CoinGecko rate limit hit");
            return Err(PriceFeedError::RateLimited);
        }
        if !status.is_success() {
            return Err(PriceFeedError::Unavailable(format!(
                "GET /simple/price returned {status}"
            )));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| PriceFeedError::Unavailable(e.to_string()))?;

        body.get(id)
            .and_then(|v| v.get("usd"))
            .and_then(|v| v.as_f64())
            .ok_or_else(|| {
                PriceFeedError::Unavailable(format!("no usd price for '{id}' in response"))
            })
    }

    async fn historical_price(
        &self,
        id: &str,
        as_of: DateTime<Utc>,
    ) -> Result<f64, PriceFeedError> {
        // History endpoint takes dd-mm-yyyy and returns that day's snapshot.
        let date = as_of.format("%d-%m-%Y");
        let url = format!("{}/coins/{}/history?date={}", self.base_url, id, date);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PriceFeedError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!(id, "CoinGecko rate limit hit");
            return Err(PriceFeedError::RateLimited);
        }
        if !status.is_success() {
            return Err(PriceFeedError::Unavailable(format!(
                "GET /coins/{id}/history returned {status}"
            )));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| PriceFeedError::Unavailable(e.to_string()))?;

        body.pointer("/market_data/current_price/usd")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| {
                PriceFeedError::Unavailable(format!("no historical usd price for '{id}'"))
            })
    }
}

#[async_trait]
impl PriceFeed for CoinGeckoClient {
    #[instrument(skip(self), name = "coingecko::price")]
    async fn price(
        &self,
        symbol: &str,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<f64, PriceFeedError> {
        let symbol = symbol.to_uppercase();
        let id = coingecko_id(&symbol)
            .ok_or_else(|| PriceFeedError::UnknownSymbol(symbol.clone()))?;

        let price = match as_of {
            Some(at) => self.historical_price(id, at).await?,
            None => self.current_price(id).await?,
        };

        debug!(symbol = %symbol, id, price, "price retrieved");
        Ok(price)
    }
}

impl std::fmt::Debug for CoinGeckoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoinGeckoClient")
            .field("base_url", &self.base_url)
            .field("has_api_key", &self.has_api_key)
            .finish()
    }
}
