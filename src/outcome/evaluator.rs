// =============================================================================
// Outcome Evaluator — the per-signal verification state machine
// =============================================================================
//
// Pure decision function over (signal, observation, now). Check order:
//
//   1. Deadline — past it the signal is EXPIRED no matter what the
//      observation says. Exit price falls back through: current observation,
//      last recorded price, entry price.
//   2. Stop-loss — evaluated before targets. An observation that satisfies
//      both the stop and a target resolves as a loss (conservative ordering).
//   3. Target — the observation reaching the nearest configured target in the
//      favorable direction resolves TARGET_HIT; when one observation clears
//      several targets the furthest attained is reported as the milestone.
//   4. Otherwise the signal stays PENDING.
//
// HOLD and AVOID assert no favorable direction: they skip 2 and 3 entirely
// and only ever resolve via the deadline (or a manual discard).
//
// Terminal signals evaluate to `None` unconditionally, which makes replaying
// observations idempotent.
// =============================================================================

use chrono::{DateTime, Utc};

use crate::signal_store::Signal;
use crate::types::{SignalDirection, SignalState};

/// The terminal transition an observation produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub state: SignalState,
    /// Price the outcome is booked at (the observation price, except for the
    /// EXPIRED fallback chain).
    pub exit_price: f64,
    /// For TARGET_HIT: the furthest configured target the resolving
    /// observation attained.
    pub milestone: Option<f64>,
}

/// Signed fraction relative to entry. BUY profits from rises, SELL from
/// falls; HOLD/AVOID carry the raw price change with sign unchanged since
/// they assert no profit direction.
pub fn realized_return(direction: SignalDirection, entry: f64, exit: f64) -> f64 {
    match direction {
        SignalDirection::Buy | SignalDirection::Hold | SignalDirection::Avoid => {
            (exit - entry) / entry
        }
        SignalDirection::Sell => (entry - exit) / entry,
    }
}

/// Evaluate one signal against an optional new observation at `now`.
///
/// Returns `Some(Verdict)` when the signal must leave PENDING, `None` when it
/// stays (or already left — terminal signals never re-transition).
pub fn evaluate(signal: &Signal, observation: Option<f64>, now: DateTime<Utc>) -> Option<Verdict> {
    if signal.state.is_terminal() {
        return None;
    }

    // 1. Deadline. Forced even if no observation ever arrived.
    if now >= signal.deadline {
        let exit_price = observation
            .or(signal.last_price)
            .unwrap_or(signal.entry_price);
        return Some(Verdict {
            state: SignalState::Expired,
            exit_price,
            milestone: None,
        });
    }

    let price = observation?;

    if !signal.direction.is_directional() {
        return None;
    }
    let is_buy = signal.direction == SignalDirection::Buy;

    // 2. Stop-loss before targets.
    if let Some(stop) = signal.stop_loss {
        let crossed = if is_buy { price <= stop } else { price >= stop };
        if crossed {
            return Some(Verdict {
                state: SignalState::StopLossHit,
                exit_price: price,
                milestone: None,
            });
        }
    }

    // 3. Targets. The list is validated monotonic (ascending for BUY,
    // descending for SELL), so the nearest target is the first element.
    if let Some(&nearest) = signal.targets.first() {
        let reached = if is_buy {
            price >= nearest
        } else {
            price <= nearest
        };
        if reached {
            let milestone = signal
                .targets
                .iter()
                .copied()
                .filter(|&t| if is_buy { price >= t } else { price <= t })
                .last();
            return Some(Verdict {
                state: SignalState::TargetHit,
                exit_price: price,
                milestone,
            });
        }
    }

    // 4. No threshold crossed.
    None
}
