// =============================================================================
// Shared types used across the Tipster verification engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Direction claimed by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalDirection {
    Buy,
    Sell,
    Hold,
    Avoid,
}

impl SignalDirection {
    /// Parse the upstream string form (`BUY`, `SELL`, `HOLD`, `AVOID`).
    /// Case-insensitive; anything else is not a direction.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "BUY" => Some(Self::Buy),
            "SELL" => Some(Self::Sell),
            "HOLD" => Some(Self::Hold),
            "AVOID" => Some(Self::Avoid),
            _ => None,
        }
    }

    /// Whether this direction asserts a favorable price move at all.
    /// HOLD and AVOID only ever resolve by expiry.
    pub fn is_directional(&self) -> bool {
        matches!(self, Self::Buy | Self::Sell)
    }
}

impl std::fmt::Display for SignalDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
            Self::Hold => write!(f, "HOLD"),
            Self::Avoid => write!(f, "AVOID"),
        }
    }
}

/// Lifecycle state of a tracked signal.
///
/// PENDING is the only non-terminal state; every signal leaves it exactly
/// once, and never re-enters it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalState {
    Pending,
    TargetHit,
    StopLossHit,
    Expired,
    Discarded,
}

impl SignalState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl Default for SignalState {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for SignalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::TargetHit => write!(f, "TARGET_HIT"),
            Self::StopLossHit => write!(f, "STOP_LOSS_HIT"),
            Self::Expired => write!(f, "EXPIRED"),
            Self::Discarded => write!(f, "DISCARDED"),
        }
    }
}

/// A tracked source channel in the directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub channel_id: i64,
    pub channel_name: String,
    #[serde(default)]
    pub channel_username: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_parses_all_four_values() {
        assert_eq!(SignalDirection::parse("BUY"), Some(SignalDirection::Buy));
        assert_eq!(SignalDirection::parse("sell"), Some(SignalDirection::Sell));
        assert_eq!(SignalDirection::parse(" Hold "), Some(SignalDirection::Hold));
        assert_eq!(SignalDirection::parse("AVOID"), Some(SignalDirection::Avoid));
        assert_eq!(SignalDirection::parse("LONG"), None);
        assert_eq!(SignalDirection::parse(""), None);
    }

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!SignalState::Pending.is_terminal());
        assert!(SignalState::TargetHit.is_terminal());
        assert!(SignalState::StopLossHit.is_terminal());
        assert!(SignalState::Expired.is_terminal());
        assert!(SignalState::Discarded.is_terminal());
    }

    #[test]
    fn state_serialises_to_screaming_snake_case() {
        let json = serde_json::to_string(&SignalState::StopLossHit).unwrap();
        assert_eq!(json, "\"STOP_LOSS_HIT\"");
        let back: SignalState = serde_json::from_str("\"TARGET_HIT\"").unwrap();
        assert_eq!(back, SignalState::TargetHit);
    }

    #[test]
    fn direction_serialises_to_upstream_form() {
        let json = serde_json::to_string(&SignalDirection::Buy).unwrap();
        assert_eq!(json, "\"BUY\"");
    }
}
