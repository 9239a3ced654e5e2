// =============================================================================
// Report Assembler — immutable weekly report object
// =============================================================================
//
// Pure data transformation over the window's terminal signals: totals,
// top-3 / worst-3 by realized return, the channel ranking, the weekly score,
// and a SHA-256 digest over the canonical JSON of the report body (the
// digest the external proof collaborator anchors). No formatting, no I/O,
// and no signal is mutated.
//
// Reports are anchored to Monday 12:00 UTC and cover the preceding 7 days.
// =============================================================================

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::report::aggregator::{channel_stats, ChannelStats};
use crate::report::score::weekly_score;
use crate::signal_store::Signal;
use crate::types::{SignalDirection, SignalState};

/// Hour of day (UTC) the weekly report is anchored to.
const REPORT_HOUR: u32 = 12;

/// Number of top / worst signals surfaced in the report.
const HIGHLIGHT_COUNT: usize = 3;

/// Condensed view of one terminal signal for the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalSummary {
    pub id: String,
    pub channel_id: i64,
    pub symbol: String,
    pub direction: SignalDirection,
    pub state: SignalState,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub realized_return: Option<f64>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl From<&Signal> for SignalSummary {
    fn from(sig: &Signal) -> Self {
        Self {
            id: sig.id.clone(),
            channel_id: sig.channel_id,
            symbol: sig.symbol.clone(),
            direction: sig.direction,
            state: sig.state,
            entry_price: sig.entry_price,
            exit_price: sig.exit_price,
            realized_return: sig.realized_return,
            resolved_at: sig.resolved_at,
        }
    }
}

/// The weekly accountability report. Immutable once assembled; the rendering
/// collaborator reads it as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyReport {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total_signals: usize,
    pub profitable_signals: usize,
    pub profitable_fraction: f64,
    pub avg_return: f64,
    pub top_signals: Vec<SignalSummary>,
    pub worst_signals: Vec<SignalSummary>,
    pub channel_ranking: Vec<ChannelStats>,
    /// Absent for an empty window — never defaulted.
    #[serde(default)]
    pub score: Option<u8>,
    /// `0x` + SHA-256 hex over the canonical JSON of the fields above.
    pub digest: String,
    pub generated_at: DateTime<Utc>,
}

/// Assemble the report for `[period_start, period_end)` from its terminal
/// signal set.
pub fn assemble(
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    terminal: &[Signal],
    generated_at: DateTime<Utc>,
) -> WeeklyReport {
    let total_signals = terminal.len();
    let profitable_signals = terminal
        .iter()
        .filter(|s| s.realized_return.unwrap_or(0.0) > 0.0)
        .count();
    let profitable_fraction = if total_signals > 0 {
        profitable_signals as f64 / total_signals as f64
    } else {
        0.0
    };
    let avg_return = if total_signals > 0 {
        terminal
            .iter()
            .map(|s| s.realized_return.unwrap_or(0.0))
            .sum::<f64>()
            / total_signals as f64
    } else {
        0.0
    };

    let mut by_return: Vec<&Signal> = terminal.iter().collect();
    by_return.sort_by(|a, b| {
        let ra = a.realized_return.unwrap_or(0.0);
        let rb = b.realized_return.unwrap_or(0.0);
        rb.partial_cmp(&ra)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.id.cmp(&b.id))
    });

    let top_signals: Vec<SignalSummary> = by_return
        .iter()
        .take(HIGHLIGHT_COUNT)
        .map(|s| SignalSummary::from(*s))
        .collect();
    let worst_signals: Vec<SignalSummary> = by_return
        .iter()
        .rev()
        .take(HIGHLIGHT_COUNT)
        .map(|s| SignalSummary::from(*s))
        .collect();

    let mut report = WeeklyReport {
        period_start,
        period_end,
        total_signals,
        profitable_signals,
        profitable_fraction,
        avg_return,
        top_signals,
        worst_signals,
        channel_ranking: channel_stats(terminal),
        score: weekly_score(terminal),
        digest: String::new(),
        generated_at,
    };
    report.digest = compute_digest(&report);
    report
}

/// `0x` + SHA-256 hex over the report body with the digest field excluded.
fn compute_digest(report: &WeeklyReport) -> String {
    let mut value = serde_json::to_value(report).expect("report serialises to JSON");
    if let Some(obj) = value.as_object_mut() {
        obj.remove("digest");
    }
    let canonical = value.to_string();
    format!("0x{}", hex::encode(Sha256::digest(canonical.as_bytes())))
}

/// The most recent Monday 12:00 UTC at or before `now` — the boundary the
/// report loop checks due-ness against. The report for a boundary covers the
/// preceding 168 hours.
pub fn latest_boundary(now: DateTime<Utc>) -> DateTime<Utc> {
    let days_since_monday = now.weekday().num_days_from_monday() as i64;
    let candidate = (now - Duration::days(days_since_monday))
        .with_hour(REPORT_HOUR)
        .and_then(|t| t.with_minute(0))
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .expect("noon is a valid time");

    if candidate > now {
        candidate - Duration::weeks(1)
    } else {
        candidate
    }
}
