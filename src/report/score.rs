// =============================================================================
// Weekly Score — single 0-100 performance number for the window
// =============================================================================
//
// Computed over the full cross-channel terminal set:
//
//   round(100 * (0.5 * profitable_fraction + 0.5 * scaled_avg_return))
//
// using the same ±20% reference band as the reliability aggregation. Pure
// function of the terminal set; an empty window has no score rather than a
// defaulted one. The result is the already-rounded integer handed to the
// external submission collaborator.
// =============================================================================

use crate::report::aggregator::scale_return;
use crate::signal_store::Signal;

/// Weekly 0-100 score, or `None` for an empty window.
pub fn weekly_score(terminal: &[Signal]) -> Option<u8> {
    if terminal.is_empty() {
        return None;
    }

    let total = terminal.len() as f64;
    let profitable = terminal
        .iter()
        .filter(|s| s.realized_return.unwrap_or(0.0) > 0.0)
        .count() as f64;
    let avg_return = terminal
        .iter()
        .map(|s| s.realized_return.unwrap_or(0.0))
        .sum::<f64>()
        / total;

    let raw = 100.0 * (0.5 * (profitable / total) + 0.5 * scale_return(avg_return));
    Some(raw.round().clamp(0.0, 100.0) as u8)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SignalDirection, SignalState};
    use chrono::Utc;

    fn terminal_signal(realized_return: f64) -> Signal {
        let now = Utc::now();
        let mut sig = Signal::fixture(SignalDirection::Buy, 100.0, vec![], None, now);
        sig.state = SignalState::Expired;
        sig.exit_price = Some(100.0 * (1.0 + realized_return));
        sig.realized_return = Some(realized_return);
        sig.resolved_at = Some(now);
        sig
    }

    #[test]
    fn empty_window_has_no_score() {
        assert_eq!(weekly_score(&[]), None);
    }

    #[test]
    fn all_winners_at_band_edge_scores_100() {
        let signals = vec![terminal_signal(0.20), terminal_signal(0.25)];
        assert_eq!(weekly_score(&signals), Some(100));
    }

    #[test]
    fn all_losers_at_band_edge_scores_0() {
        let signals = vec![terminal_signal(-0.20), terminal_signal(-0.30)];
        assert_eq!(weekly_score(&signals), Some(0));
    }

    #[test]
    fn zero_movement_window_scores_25() {
        // profitable 0/1, avg 0 -> 100 * (0 + 0.5 * 0.5) = 25.
        let signals = vec![terminal_signal(0.0)];
        assert_eq!(weekly_score(&signals), Some(25));
    }

    #[test]
    fn mixed_window_rounds_to_integer() {
        // 1/2 profitable, avg 0.05 scales to 0.625 ->
        // 100 * (0.25 + 0.5 * 0.625) = 56.25 -> 56.
        let signals = vec![terminal_signal(0.10), terminal_signal(0.0)];
        assert_eq!(weekly_score(&signals), Some(56));
    }

    #[test]
    fn score_is_a_pure_function_of_the_set() {
        let signals = vec![
            terminal_signal(0.10),
            terminal_signal(-0.04),
            terminal_signal(0.0),
        ];
        let first = weekly_score(&signals);
        for _ in 0..10 {
            assert_eq!(weekly_score(&signals), first);
        }
    }
}
