// =============================================================================
// Signal Validator — admission gate between the parser and the store
// =============================================================================
//
// A candidate either becomes a PENDING signal with its tracking deadline
// fixed at admission, or it is rejected with a typed reason. Nothing below
// the admission thresholds ever reaches the store.
//
// Monotonicity and stop-side checks only apply to BUY/SELL: HOLD and AVOID
// assert no favorable direction, so no ordering is implied for them.
// =============================================================================

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::ingest::candidate::SignalCandidate;
use crate::signal_store::Signal;
use crate::types::{SignalDirection, SignalState};

/// Minimum upstream confidence required for admission.
pub const MIN_CONFIDENCE: f64 = 0.3;

/// Confidence at or above which an admission is logged as high-confidence.
pub const HIGH_CONFIDENCE: f64 = 0.7;

/// Maximum number of target prices per signal.
pub const MAX_TARGETS: usize = 5;

/// Tracking window per signal: 7 days from admission, never extended.
pub const TRACK_DURATION_HOURS: i64 = 168;

/// Why a candidate was refused admission.
///
/// Rejections are expected outcomes, not faults; callers log and count them.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RejectReason {
    #[error("confidence {0:.2} below minimum {MIN_CONFIDENCE}")]
    LowConfidence(f64),
    #[error("unknown signal direction '{0}'")]
    UnknownDirection(String),
    #[error("token symbol is blank")]
    BlankSymbol,
    #[error("entry price is missing")]
    MissingEntryPrice,
    #[error("entry price {0} is not positive")]
    NonPositiveEntry(f64),
    #[error("{0} target prices exceed the maximum of {MAX_TARGETS}")]
    TooManyTargets(usize),
    #[error("target price {0} is not positive")]
    NonPositiveTarget(f64),
    #[error("target prices are not strictly {expected} for a {direction} signal")]
    TargetsNotMonotonic {
        direction: SignalDirection,
        expected: &'static str,
    },
    #[error("stop loss {0} is not positive")]
    NonPositiveStop(f64),
    #[error("stop loss {stop} is on the wrong side of entry {entry} for a {direction} signal")]
    StopOnWrongSide {
        direction: SignalDirection,
        stop: f64,
        entry: f64,
    },
    #[error("message {message_id} from channel {channel_id} was already ingested")]
    DuplicateMessage { channel_id: i64, message_id: i64 },
}

impl RejectReason {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::LowConfidence(_) => "low_confidence",
            Self::UnknownDirection(_) => "unknown_direction",
            Self::BlankSymbol => "blank_symbol",
            Self::MissingEntryPrice => "missing_entry_price",
            Self::NonPositiveEntry(_) => "non_positive_entry",
            Self::TooManyTargets(_) => "too_many_targets",
            Self::NonPositiveTarget(_) => "non_positive_target",
            Self::TargetsNotMonotonic { .. } => "targets_not_monotonic",
            Self::NonPositiveStop(_) => "non_positive_stop",
            Self::StopOnWrongSide { .. } => "stop_on_wrong_side",
            Self::DuplicateMessage { .. } => "duplicate_message",
        }
    }
}

/// Stateless admission gate. Validation has no side effect beyond
/// constructing the signal; persistence is the caller's responsibility.
pub struct SignalValidator;

impl SignalValidator {
    /// Admit a candidate, producing a PENDING signal with `created_at = now`
    /// and a fixed 7-day deadline, or reject it with a reason.
    pub fn admit(candidate: &SignalCandidate, now: DateTime<Utc>) -> Result<Signal, RejectReason> {
        if candidate.confidence < MIN_CONFIDENCE {
            return Err(RejectReason::LowConfidence(candidate.confidence));
        }

        let direction = SignalDirection::parse(&candidate.signal_type)
            .ok_or_else(|| RejectReason::UnknownDirection(candidate.signal_type.clone()))?;

        let symbol = candidate.token_symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(RejectReason::BlankSymbol);
        }

        let entry_price = candidate.entry_price.ok_or(RejectReason::MissingEntryPrice)?;
        if entry_price <= 0.0 {
            return Err(RejectReason::NonPositiveEntry(entry_price));
        }

        if candidate.target_prices.len() > MAX_TARGETS {
            return Err(RejectReason::TooManyTargets(candidate.target_prices.len()));
        }
        if let Some(&bad) = candidate.target_prices.iter().find(|&&t| t <= 0.0) {
            return Err(RejectReason::NonPositiveTarget(bad));
        }

        // Targets must march strictly away from entry in the favorable
        // direction: ascending for BUY, descending for SELL.
        if direction.is_directional() {
            let monotonic = candidate.target_prices.windows(2).all(|w| match direction {
                SignalDirection::Buy => w[0] < w[1],
                SignalDirection::Sell => w[0] > w[1],
                _ => unreachable!(),
            });
            if !monotonic {
                return Err(RejectReason::TargetsNotMonotonic {
                    direction,
                    expected: if direction == SignalDirection::Buy {
                        "ascending"
                    } else {
                        "descending"
                    },
                });
            }
        }

        if let Some(stop) = candidate.stop_loss {
            if stop <= 0.0 {
                return Err(RejectReason::NonPositiveStop(stop));
            }
            let wrong_side = match direction {
                SignalDirection::Buy => stop >= entry_price,
                SignalDirection::Sell => stop <= entry_price,
                _ => false,
            };
            if wrong_side {
                return Err(RejectReason::StopOnWrongSide {
                    direction,
                    stop,
                    entry: entry_price,
                });
            }
        }

        let signal = Signal {
            id: Uuid::new_v4().to_string(),
            channel_id: candidate.channel_id,
            message_id: candidate.message_id,
            symbol,
            direction,
            confidence: candidate.confidence,
            entry_price,
            targets: candidate.target_prices.clone(),
            stop_loss: candidate.stop_loss,
            rationale: candidate.reasoning.clone(),
            timeframe: candidate.timeframe.clone(),
            source_timestamp: candidate.source_timestamp,
            created_at: now,
            deadline: now + Duration::hours(TRACK_DURATION_HOURS),
            state: SignalState::Pending,
            exit_price: None,
            realized_return: None,
            resolved_at: None,
            last_price: None,
            last_observed_at: None,
            observation_count: 0,
            recent_checks: Vec::new(),
        };

        if signal.confidence >= HIGH_CONFIDENCE {
            info!(
                id = %signal.id,
                channel_id = signal.channel_id,
                symbol = %signal.symbol,
                direction = %signal.direction,
                confidence = signal.confidence,
                "high-confidence signal admitted"
            );
        } else {
            debug!(
                id = %signal.id,
                channel_id = signal.channel_id,
                symbol = %signal.symbol,
                direction = %signal.direction,
                confidence = signal.confidence,
                "signal admitted"
            );
        }

        Ok(signal)
    }
}
