// =============================================================================
// Verification Scheduler — background loop ownership
// =============================================================================
//
// Owns the two periodic tasks of the engine:
//   - the price-observation loop, which runs one verification tick every
//     `price_check_interval_secs` (15 minutes by default), and
//   - the report loop, which wakes every `report_check_interval_secs` and
//     generates the weekly report once per Monday 12:00 UTC boundary.
//
// Both loops read their cadence from the runtime config on every wake, so a
// config change takes effect without a restart. `stop()` aborts the tasks;
// ticks are internally short-lived, so an abort between ticks loses nothing.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use crate::app_state::AppState;
use crate::outcome::monitor::run_price_check_tick;
use crate::pricefeed::PriceFeed;
use crate::report;

/// Length of the reporting window preceding each boundary.
const REPORT_WINDOW_HOURS: i64 = 168;

/// Handles to the engine's background loops.
pub struct VerificationScheduler {
    price_handle: Option<JoinHandle<()>>,
    report_handle: Option<JoinHandle<()>>,
}

/// The boundary a report is due for, or `None` when the last generated
/// report already covers it.
fn due_boundary(last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let boundary = report::latest_boundary(now);
    match last {
        Some(last) if last >= boundary => None,
        _ => Some(boundary),
    }
}

impl VerificationScheduler {
    /// Spawn both loops against the shared state and price feed.
    pub fn start(state: Arc<AppState>, feed: Arc<dyn PriceFeed>) -> Self {
        // ── Price observation loop ──────────────────────────────────────
        let price_state = state.clone();
        let price_handle = tokio::spawn(async move {
            let mut secs = price_state
                .runtime_config
                .read()
                .price_check_interval_secs
                .max(1);
            info!(interval_secs = secs, "price observation loop started");

            let mut ticker = interval(Duration::from_secs(secs));
            loop {
                ticker.tick().await;

                let tick_secs = price_state
                    .runtime_config
                    .read()
                    .price_check_interval_secs
                    .max(1);
                run_price_check_tick(&price_state, &feed, Duration::from_secs(tick_secs)).await;

                // Cadence may have been reconfigured while we worked.
                if tick_secs != secs {
                    info!(interval_secs = tick_secs, "price check cadence changed");
                    secs = tick_secs;
                    ticker = interval(Duration::from_secs(secs));
                    ticker.tick().await;
                }
            }
        });

        // ── Weekly report loop ──────────────────────────────────────────
        let report_state = state;
        let report_handle = tokio::spawn(async move {
            let secs = report_state.runtime_config.read().report_check_interval_secs;
            info!(interval_secs = secs, "report loop started");

            let mut ticker = interval(Duration::from_secs(secs.max(1)));
            loop {
                ticker.tick().await;

                if report_state.runtime_config.read().paused {
                    debug!("verification paused, skipping report check");
                    continue;
                }

                let now = Utc::now();
                let last = *report_state.last_report_boundary.read();
                let Some(boundary) = due_boundary(last, now) else {
                    continue;
                };

                let window_start = boundary - ChronoDuration::hours(REPORT_WINDOW_HOURS);
                let terminal = report_state.store.terminal_in_window(window_start, boundary);
                let weekly = report::assemble(window_start, boundary, &terminal, now);

                info!(
                    period_end = %boundary,
                    total_signals = weekly.total_signals,
                    score = ?weekly.score,
                    digest = %weekly.digest,
                    "weekly report generated"
                );
                report_state.push_report(weekly);
            }
        });

        Self {
            price_handle: Some(price_handle),
            report_handle: Some(report_handle),
        }
    }

    /// Abort both loops. Idempotent.
    pub fn stop(&mut self) {
        if let Some(h) = self.price_handle.take() {
            h.abort();
        }
        if let Some(h) = self.report_handle.take() {
            h.abort();
        }
        info!("verification scheduler stopped");
    }
}

impl Drop for VerificationScheduler {
    fn drop(&mut self) {
        if self.price_handle.is_some() || self.report_handle.is_some() {
            warn!("scheduler dropped while running, aborting loops");
            self.stop();
        }
    }
}
