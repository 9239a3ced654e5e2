// =============================================================================
// Price Observation Monitor — one scheduler tick of verification work
// =============================================================================
//
// Each tick:
//   1. Collect the distinct symbols across all PENDING signals (one lookup
//      per symbol no matter how many signals reference it).
//   2. Fetch prices for those symbols concurrently. Rate-limited lookups
//      retry with doubling backoff bounded by the remainder of the tick;
//      any other failure skips the symbol for this cycle only.
//   3. Deliver each observation to every PENDING signal of that symbol.
//   4. Sweep all pending signals for passed deadlines — a signal expires on
//      time even if no fetch ever succeeded for it.
//   5. Flush the store snapshot when anything changed.
//
// A lookup failure never advances or fails a signal; the next tick simply
// retries.
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, info, warn};

use crate::app_state::AppState;
use crate::pricefeed::{PriceFeed, PriceFeedError};
use crate::signal_store::ObservationOutcome;

/// First retry delay after a rate-limit response; doubles on each retry.
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Fetch one symbol's price, retrying rate-limit responses with doubling
/// backoff until `tick_deadline`. Returns `None` when the symbol must be
/// skipped this cycle.
async fn fetch_with_backoff(
    feed: &dyn PriceFeed,
    symbol: &str,
    tick_deadline: Instant,
) -> Option<f64> {
    let mut delay = INITIAL_BACKOFF;

    loop {
        match feed.price(symbol, None).await {
            Ok(price) => return Some(price),
            Err(PriceFeedError::RateLimited) => {
                if Instant::now() + delay >= tick_deadline {
                    warn!(symbol, "rate-limit backoff budget exhausted, skipping this tick");
                    return None;
                }
                debug!(symbol, delay_secs = delay.as_secs(), "rate limited, backing off");
                sleep(delay).await;
                delay *= 2;
            }
            Err(PriceFeedError::UnknownSymbol(sym)) => {
                debug!(symbol = %sym, "no price mapping, skipping");
                return None;
            }
            Err(PriceFeedError::Unavailable(reason)) => {
                warn!(symbol, reason = %reason, "price lookup failed, skipping this tick");
                return None;
            }
        }
    }
}

/// Run one full price-observation tick. `tick_interval` bounds the in-tick
/// backoff budget.
pub async fn run_price_check_tick(
    state: &Arc<AppState>,
    feed: &Arc<dyn PriceFeed>,
    tick_interval: Duration,
) {
    if state.runtime_config.read().paused {
        debug!("verification paused, skipping price tick");
        return;
    }

    let tick_deadline = Instant::now() + tick_interval;
    let symbols = state.store.pending_symbols();

    let mut resolved = 0usize;
    let mut recorded = 0usize;

    if symbols.is_empty() {
        debug!("no pending signals to observe");
    } else {
        debug!(symbols = ?symbols, "fetching prices for pending symbols");

        // One concurrent fetch per distinct symbol.
        let fetches = symbols.iter().map(|symbol| {
            let feed = feed.clone();
            async move {
                let price = fetch_with_backoff(feed.as_ref(), symbol, tick_deadline).await;
                (symbol.clone(), price)
            }
        });
        let results = join_all(fetches).await;

        for (symbol, price) in results {
            let Some(price) = price else { continue };
            let observed_at = Utc::now();

            for id in state.store.pending_ids_for_symbol(&symbol) {
                match state.store.apply_observation(&id, price, observed_at) {
                    ObservationOutcome::Resolved(sig) => {
                        resolved += 1;
                        info!(
                            id = %sig.id,
                            symbol = %sig.symbol,
                            state = %sig.state,
                            realized_return = ?sig.realized_return,
                            "signal resolved by observation"
                        );
                    }
                    ObservationOutcome::Recorded => recorded += 1,
                    ObservationOutcome::Ignored => {}
                }
            }
        }
    }

    // Deadline sweep runs even when every fetch failed or nothing is
    // fetchable: expiry does not depend on the price feed.
    let expired = state.store.sweep_deadlines(Utc::now());

    if resolved > 0 || !expired.is_empty() {
        state.increment_version();
    }

    if resolved > 0 || recorded > 0 || !expired.is_empty() {
        let store_path = state.runtime_config.read().store_path.clone();
        if let Err(e) = state.store.save(&store_path) {
            warn!(error = %e, "failed to flush signal store snapshot");
            state.push_error(format!("store flush failed: {e}"));
        }
    }

    debug!(
        symbols = symbols.len(),
        resolved,
        recorded,
        expired = expired.len(),
        "price tick complete"
    );
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime_config::RuntimeConfig;
    use crate::signal_store::{Signal, SignalStore};
    use crate::types::{SignalDirection, SignalState};
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration};
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Scriptable price feed: per-symbol response queues plus a call counter.
    struct MockFeed {
        responses: Mutex<HashMap<String, Vec<Result<f64, PriceFeedError>>>>,
        calls: Mutex<Vec<String>>,
    }

    impl MockFeed {
        fn new() -> Self {
            Self {
                responses: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn script(&self, symbol: &str, responses: Vec<Result<f64, PriceFeedError>>) {
            self.responses.lock().insert(symbol.to_string(), responses);
        }

        fn call_count(&self, symbol: &str) -> usize {
            self.calls.lock().iter().filter(|s| *s == symbol).count()
        }
    }

    #[async_trait]
    impl PriceFeed for MockFeed {
        async fn price(
            &self,
            symbol: &str,
            _as_of: Option<DateTime<Utc>>,
        ) -> Result<f64, PriceFeedError> {
            self.calls.lock().push(symbol.to_string());
            let mut responses = self.responses.lock();
            match responses.get_mut(symbol) {
                Some(queue) if !queue.is_empty() => queue.remove(0),
                _ => Err(PriceFeedError::UnknownSymbol(symbol.to_string())),
            }
        }
    }

    fn state_with(signals: Vec<Signal>) -> Arc<AppState> {
        let store = Arc::new(SignalStore::new());
        for sig in signals {
            store.insert(sig);
        }
        let mut config = RuntimeConfig::default();
        // Keep test runs out of the working directory.
        config.store_path = std::env::temp_dir()
            .join(format!("tipster-tick-{}.json", uuid::Uuid::new_v4()))
            .to_string_lossy()
            .into_owned();
        Arc::new(AppState::new(config, store))
    }

    fn signal(symbol: &str, entry: f64, targets: Vec<f64>, stop: Option<f64>) -> Signal {
        let mut sig = Signal::fixture(SignalDirection::Buy, entry, targets, stop, Utc::now());
        sig.symbol = symbol.to_string();
        sig
    }

    #[tokio::test]
    async fn one_fetch_per_symbol_regardless_of_signal_count() {
        let state = state_with(vec![
            signal("AVAX", 25.0, vec![], None),
            signal("AVAX", 26.0, vec![], None),
            signal("AVAX", 27.0, vec![], None),
            signal("BTC", 60000.0, vec![], None),
        ]);

        let feed = Arc::new(MockFeed::new());
        feed.script("AVAX", vec![Ok(25.5)]);
        feed.script("BTC", vec![Ok(61000.0)]);

        let dyn_feed: Arc<dyn PriceFeed> = feed.clone();
        run_price_check_tick(&state, &dyn_feed, Duration::from_secs(900)).await;

        assert_eq!(feed.call_count("AVAX"), 1);
        assert_eq!(feed.call_count("BTC"), 1);

        // All three AVAX signals saw the observation.
        for sig in state.store.pending() {
            if sig.symbol == "AVAX" {
                assert_eq!(sig.last_price, Some(25.5));
                assert_eq!(sig.observation_count, 1);
            }
        }
    }

    #[tokio::test]
    async fn observation_resolves_matching_signals() {
        let state = state_with(vec![signal("AVAX", 25.50, vec![28.0, 32.0], Some(23.0))]);

        let feed = Arc::new(MockFeed::new());
        feed.script("AVAX", vec![Ok(28.50)]);

        let dyn_feed: Arc<dyn PriceFeed> = feed.clone();
        run_price_check_tick(&state, &dyn_feed, Duration::from_secs(900)).await;

        let all = state.store.all();
        assert_eq!(all[0].state, SignalState::TargetHit);
        assert_eq!(all[0].exit_price, Some(28.50));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_retries_with_backoff_then_succeeds() {
        let state = state_with(vec![signal("AVAX", 25.0, vec![], None)]);

        let feed = Arc::new(MockFeed::new());
        feed.script(
            "AVAX",
            vec![
                Err(PriceFeedError::RateLimited),
                Err(PriceFeedError::RateLimited),
                Ok(25.2),
            ],
        );

        let dyn_feed: Arc<dyn PriceFeed> = feed.clone();
        run_price_check_tick(&state, &dyn_feed, Duration::from_secs(900)).await;

        assert_eq!(feed.call_count("AVAX"), 3);
        assert_eq!(state.store.pending()[0].last_price, Some(25.2));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_gives_up_when_budget_exhausted() {
        let state = state_with(vec![signal("AVAX", 25.0, vec![], None)]);

        let feed = Arc::new(MockFeed::new());
        feed.script("AVAX", vec![Err(PriceFeedError::RateLimited); 20]);

        let dyn_feed: Arc<dyn PriceFeed> = feed.clone();
        // A 3-second budget allows the 1s retry but not the 2s one.
        run_price_check_tick(&state, &dyn_feed, Duration::from_secs(3)).await;

        assert!(feed.call_count("AVAX") <= 2);
        let sig = &state.store.pending()[0];
        assert_eq!(sig.state, SignalState::Pending);
        assert_eq!(sig.last_price, None);
    }

    #[tokio::test]
    async fn failed_symbol_does_not_block_others() {
        let state = state_with(vec![
            signal("AVAX", 25.0, vec![], None),
            signal("BTC", 60000.0, vec![], None),
        ]);

        let feed = Arc::new(MockFeed::new());
        feed.script("AVAX", vec![Err(PriceFeedError::Unavailable("boom".into()))]);
        feed.script("BTC", vec![Ok(61000.0)]);

        let dyn_feed: Arc<dyn PriceFeed> = feed.clone();
        run_price_check_tick(&state, &dyn_feed, Duration::from_secs(900)).await;

        let pending = state.store.pending();
        let avax = pending.iter().find(|s| s.symbol == "AVAX").unwrap();
        let btc = pending.iter().find(|s| s.symbol == "BTC").unwrap();

        // The failed symbol saw nothing and was not failed.
        assert_eq!(avax.state, SignalState::Pending);
        assert_eq!(avax.observation_count, 0);
        assert_eq!(btc.last_price, Some(61000.0));
    }

    #[tokio::test]
    async fn deadline_sweep_runs_even_without_observations() {
        let created = Utc::now() - ChronoDuration::hours(200);
        let mut sig = Signal::fixture(SignalDirection::Buy, 25.0, vec![], None, created);
        sig.symbol = "NOTLISTED".to_string();
        let state = state_with(vec![sig]);

        let feed: Arc<dyn PriceFeed> = Arc::new(MockFeed::new());
        run_price_check_tick(&state, &feed, Duration::from_secs(900)).await;

        let all = state.store.all();
        assert_eq!(all[0].state, SignalState::Expired);
        assert_eq!(all[0].exit_price, Some(25.0));
        assert_eq!(all[0].realized_return, Some(0.0));
    }

    #[tokio::test]
    async fn paused_engine_skips_the_tick() {
        let state = state_with(vec![signal("AVAX", 25.0, vec![], None)]);
        state.runtime_config.write().paused = true;

        let feed = Arc::new(MockFeed::new());
        feed.script("AVAX", vec![Ok(25.5)]);

        let dyn_feed: Arc<dyn PriceFeed> = feed.clone();
        run_price_check_tick(&state, &dyn_feed, Duration::from_secs(900)).await;

        assert_eq!(feed.call_count("AVAX"), 0);
        assert_eq!(state.store.pending()[0].observation_count, 0);
    }
}
