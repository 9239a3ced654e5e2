// =============================================================================
// Reliability Aggregator — per-channel statistics over a reporting window
// =============================================================================
//
// Operates on the terminal signals whose outcome timestamp fell inside the
// window, grouped by channel. Stats are recomputed from scratch every window
// and never carried across windows, so there is no incremental drift.
//
// Reliability per channel:
//
//   0.6 * win_rate + 0.4 * scaled_avg_return
//
// where the average return is scaled onto [0, 1] against a fixed ±20%
// reference band. Channels with no terminal signals in the window are simply
// absent from the ranking — they are not scored as zero.
// =============================================================================

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::signal_store::Signal;

/// Reference band: an average return of -20% scales to 0.0, +20% to 1.0.
pub const REFERENCE_BAND: f64 = 0.20;

/// Weight of the win rate in the reliability score.
const WIN_RATE_WEIGHT: f64 = 0.6;

/// Weight of the scaled average return in the reliability score.
const AVG_RETURN_WEIGHT: f64 = 0.4;

/// Scale a signed return fraction onto [0, 1] against the reference band.
pub fn scale_return(avg_return: f64) -> f64 {
    ((avg_return + REFERENCE_BAND) / (2.0 * REFERENCE_BAND)).clamp(0.0, 1.0)
}

/// Per-channel statistics for one reporting window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelStats {
    pub channel_id: i64,
    /// Terminal signals from this channel in the window.
    pub total: usize,
    /// Signals with strictly positive realized return.
    pub profitable: usize,
    pub win_rate: f64,
    /// Arithmetic mean of realized returns (zero-movement expiries included).
    pub avg_return: f64,
    /// Weighted reliability in [0, 1].
    pub reliability: f64,
}

/// Compute per-channel stats from the window's terminal signals, sorted by
/// reliability descending (channel id as the deterministic tie-break).
pub fn channel_stats(terminal: &[Signal]) -> Vec<ChannelStats> {
    let mut by_channel: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
    for sig in terminal {
        let ret = sig.realized_return.unwrap_or(0.0);
        by_channel.entry(sig.channel_id).or_default().push(ret);
    }

    let mut stats: Vec<ChannelStats> = by_channel
        .into_iter()
        .map(|(channel_id, returns)| {
            let total = returns.len();
            let profitable = returns.iter().filter(|&&r| r > 0.0).count();
            let win_rate = profitable as f64 / total as f64;
            let avg_return = returns.iter().sum::<f64>() / total as f64;
            let reliability = (WIN_RATE_WEIGHT * win_rate
                + AVG_RETURN_WEIGHT * scale_return(avg_return))
            .clamp(0.0, 1.0);

            ChannelStats {
                channel_id,
                total,
                profitable,
                win_rate,
                avg_return,
                reliability,
            }
        })
        .collect();

    stats.sort_by(|a, b| {
        b.reliability
            .partial_cmp(&a.reliability)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.channel_id.cmp(&b.channel_id))
    });
    stats
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SignalDirection, SignalState};
    use chrono::Utc;

    const EPS: f64 = 1e-9;

    fn terminal_signal(channel_id: i64, realized_return: f64) -> Signal {
        let now = Utc::now();
        let mut sig = Signal::fixture(SignalDirection::Buy, 100.0, vec![], None, now);
        sig.channel_id = channel_id;
        sig.state = SignalState::Expired;
        sig.exit_price = Some(100.0 * (1.0 + realized_return));
        sig.realized_return = Some(realized_return);
        sig.resolved_at = Some(now);
        sig
    }

    #[test]
    fn scale_return_clamps_to_reference_band() {
        assert!((scale_return(0.0) - 0.5).abs() < EPS);
        assert!((scale_return(0.20) - 1.0).abs() < EPS);
        assert!((scale_return(-0.20)).abs() < EPS);
        assert!((scale_return(0.50) - 1.0).abs() < EPS);
        assert!((scale_return(-0.50)).abs() < EPS);
        assert!((scale_return(0.10) - 0.75).abs() < EPS);
    }

    #[test]
    fn empty_window_yields_no_channels() {
        assert!(channel_stats(&[]).is_empty());
    }

    #[test]
    fn per_channel_grouping_and_weighting() {
        let signals = vec![
            terminal_signal(1, 0.10),
            terminal_signal(1, -0.05),
            terminal_signal(2, 0.20),
        ];
        let stats = channel_stats(&signals);
        assert_eq!(stats.len(), 2);

        // Channel 2: one winner at the band edge -> reliability 1.0.
        assert_eq!(stats[0].channel_id, 2);
        assert_eq!(stats[0].total, 1);
        assert_eq!(stats[0].profitable, 1);
        assert!((stats[0].reliability - 1.0).abs() < EPS);

        // Channel 1: win_rate 0.5, avg 0.025 -> scaled 0.5625.
        let ch1 = &stats[1];
        assert_eq!(ch1.channel_id, 1);
        assert_eq!(ch1.total, 2);
        assert_eq!(ch1.profitable, 1);
        assert!((ch1.win_rate - 0.5).abs() < EPS);
        assert!((ch1.avg_return - 0.025).abs() < EPS);
        let expected = 0.6 * 0.5 + 0.4 * scale_return(0.025);
        assert!((ch1.reliability - expected).abs() < EPS);
    }

    #[test]
    fn zero_return_expiry_counts_in_total_but_not_profitable() {
        let signals = vec![terminal_signal(3, 0.0), terminal_signal(3, 0.0)];
        let stats = channel_stats(&signals);
        assert_eq!(stats[0].total, 2);
        assert_eq!(stats[0].profitable, 0);
        assert!((stats[0].avg_return).abs() < EPS);
        // win_rate 0, avg 0 -> 0.4 * 0.5 = 0.2.
        assert!((stats[0].reliability - 0.2).abs() < EPS);
    }

    #[test]
    fn recomputation_is_deterministic() {
        let signals = vec![
            terminal_signal(1, 0.10),
            terminal_signal(2, -0.10),
            terminal_signal(1, 0.02),
        ];
        let a = channel_stats(&signals);
        let b = channel_stats(&signals);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.channel_id, y.channel_id);
            assert!((x.reliability - y.reliability).abs() < EPS);
        }
    }
}
