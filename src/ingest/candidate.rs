// =============================================================================
// Signal Candidate — the record handed to us by the parsing collaborator
// =============================================================================
//
// The upstream collaborator turns free-form channel messages into this
// structured record. The engine accepts it unmodified and never depends on
// how it was produced, so any language-understanding backend can sit in
// front of the validator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A candidate directional claim awaiting admission.
///
/// Field names follow the upstream record. `signal_type` is a free string at
/// this stage; the validator parses it into a typed direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalCandidate {
    /// Source channel identifier.
    pub channel_id: i64,

    /// Message id within the channel, when the upstream still has it.
    /// Used to reject duplicate ingestion of the same message.
    #[serde(default)]
    pub message_id: Option<i64>,

    /// Asset ticker the claim refers to (normalised to uppercase on admission).
    pub token_symbol: String,

    /// Claimed direction: expected `BUY`, `SELL`, `HOLD` or `AVOID`.
    pub signal_type: String,

    /// Upstream confidence in the extraction, 0.0–1.0.
    #[serde(default = "default_confidence")]
    pub confidence: f64,

    /// Entry price the claim was made at. Required for admission.
    #[serde(default)]
    pub entry_price: Option<f64>,

    /// Target prices, nearest first.
    #[serde(default)]
    pub target_prices: Vec<f64>,

    /// Optional stop-loss level.
    #[serde(default)]
    pub stop_loss: Option<f64>,

    /// Claimed timeframe, carried as provenance only.
    #[serde(default)]
    pub timeframe: Option<String>,

    /// Free-text rationale extracted from the message.
    #[serde(default)]
    pub reasoning: String,

    /// When the source message was posted. Provenance only: tracking starts
    /// at admission time, so replaying old messages cannot create
    /// pre-expired signals.
    #[serde(default)]
    pub source_timestamp: Option<DateTime<Utc>>,
}

fn default_confidence() -> f64 {
    0.5
}
