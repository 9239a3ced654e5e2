// =============================================================================
// Signal Store — signal model + the engine's only shared mutable state
// =============================================================================
//
// Life-cycle:
//   PENDING -> TARGET_HIT | STOP_LOSS_HIT | EXPIRED | DISCARDED
//
// Records are addressed by stable id and individually locked: the outer map
// lock is held only long enough to clone a per-signal Arc, so transitions on
// unrelated signals never serialise on one global lock. The terminal check
// runs inside the per-signal write lock, making every terminal transition
// exactly-once even under racing evaluators. Readers take point-in-time
// clones and can never observe a half-applied transition.
//
// Persistence is a JSON snapshot with the atomic tmp + rename pattern. A
// missing snapshot means a fresh store; an unreadable one is fatal — the
// engine refuses to start rather than compute on partial data.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::outcome::evaluator::{self, Verdict};
use crate::types::{SignalDirection, SignalState};

/// Observation history ring kept per signal for the detail API.
const MAX_RECENT_CHECKS: usize = 16;

// ---------------------------------------------------------------------------
// Signal model
// ---------------------------------------------------------------------------

/// One recorded price observation against a signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceCheck {
    pub price: f64,
    /// Change versus entry, percent.
    pub change_pct: f64,
    pub checked_at: DateTime<Utc>,
}

/// A single tracked directional claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Unique identifier (UUID v4).
    pub id: String,
    pub channel_id: i64,
    #[serde(default)]
    pub message_id: Option<i64>,
    pub symbol: String,
    pub direction: SignalDirection,
    pub confidence: f64,
    pub entry_price: f64,
    /// Validated target prices, nearest first.
    pub targets: Vec<f64>,
    #[serde(default)]
    pub stop_loss: Option<f64>,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub timeframe: Option<String>,
    /// When the source message was posted (provenance only).
    #[serde(default)]
    pub source_timestamp: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    /// created_at + 7 days, fixed at admission.
    pub deadline: DateTime<Utc>,
    #[serde(default)]
    pub state: SignalState,

    // Outcome fields, set exactly once on the terminal transition.
    #[serde(default)]
    pub exit_price: Option<f64>,
    #[serde(default)]
    pub realized_return: Option<f64>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,

    // Observation bookkeeping. `last_price` serves the EXPIRED fallback exit
    // price; the ring feeds the signal detail response.
    #[serde(default)]
    pub last_price: Option<f64>,
    #[serde(default)]
    pub last_observed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub observation_count: u32,
    #[serde(default)]
    pub recent_checks: Vec<PriceCheck>,
}

impl Signal {
    /// Record a non-resolving observation: latest price/time, counter, ring.
    pub fn record_observation(&mut self, price: f64, observed_at: DateTime<Utc>) {
        self.last_price = Some(price);
        self.last_observed_at = Some(observed_at);
        self.observation_count += 1;

        self.recent_checks.push(PriceCheck {
            price,
            change_pct: ((price - self.entry_price) / self.entry_price) * 100.0,
            checked_at: observed_at,
        });
        while self.recent_checks.len() > MAX_RECENT_CHECKS {
            self.recent_checks.remove(0);
        }
    }

    /// Apply a terminal verdict. Caller must already hold the write lock and
    /// have checked the signal is still PENDING.
    fn apply_verdict(&mut self, verdict: &Verdict, now: DateTime<Utc>) {
        self.state = verdict.state;
        self.exit_price = Some(verdict.exit_price);
        self.realized_return = Some(evaluator::realized_return(
            self.direction,
            self.entry_price,
            verdict.exit_price,
        ));
        self.resolved_at = Some(now);
    }

    /// Bare signal for state-machine tests.
    #[cfg(test)]
    pub fn fixture(
        direction: SignalDirection,
        entry_price: f64,
        targets: Vec<f64>,
        stop_loss: Option<f64>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            channel_id: 1,
            message_id: None,
            symbol: "AVAX".to_string(),
            direction,
            confidence: 0.8,
            entry_price,
            targets,
            stop_loss,
            rationale: String::new(),
            timeframe: None,
            source_timestamp: None,
            created_at,
            deadline: created_at + chrono::Duration::hours(168),
            state: SignalState::Pending,
            exit_price: None,
            realized_return: None,
            resolved_at: None,
            last_price: None,
            last_observed_at: None,
            observation_count: 0,
            recent_checks: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Effect of delivering one observation to one signal.
#[derive(Debug, Clone)]
pub enum ObservationOutcome {
    /// The signal left PENDING; the clone is the terminal record.
    Resolved(Box<Signal>),
    /// Bookkeeping updated, signal stays PENDING.
    Recorded,
    /// Signal already terminal (or unknown id) — nothing changed.
    Ignored,
}

/// Result of a manual operator discard.
#[derive(Debug, Clone)]
pub enum DiscardOutcome {
    Discarded(Box<Signal>),
    AlreadyTerminal,
    NotFound,
}

/// Thread-safe store of all tracked signals, active and terminal.
pub struct SignalStore {
    signals: RwLock<HashMap<String, Arc<RwLock<Signal>>>>,
}

impl SignalStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            signals: RwLock::new(HashMap::new()),
        }
    }

    // -------------------------------------------------------------------------
    // Ingestion
    // -------------------------------------------------------------------------

    /// Insert a freshly admitted signal and return its id.
    pub fn insert(&self, signal: Signal) -> String {
        let id = signal.id.clone();
        info!(
            id = %id,
            channel_id = signal.channel_id,
            symbol = %signal.symbol,
            direction = %signal.direction,
            entry_price = signal.entry_price,
            targets = ?signal.targets,
            stop_loss = ?signal.stop_loss,
            deadline = %signal.deadline,
            "signal stored"
        );
        self.signals
            .write()
            .insert(id.clone(), Arc::new(RwLock::new(signal)));
        id
    }

    /// Insert unless a signal from the same (channel, message) already
    /// exists. The check and the insert run under one map write lock, so
    /// racing ingests of the same message admit exactly one signal. Returns
    /// the new id, or `None` for a duplicate.
    pub fn insert_unique(&self, signal: Signal) -> Option<String> {
        let mut signals = self.signals.write();

        if let Some(message_id) = signal.message_id {
            let duplicate = signals.values().any(|arc| {
                let existing = arc.read();
                existing.channel_id == signal.channel_id
                    && existing.message_id == Some(message_id)
            });
            if duplicate {
                return None;
            }
        }

        let id = signal.id.clone();
        info!(
            id = %id,
            channel_id = signal.channel_id,
            symbol = %signal.symbol,
            direction = %signal.direction,
            entry_price = signal.entry_price,
            targets = ?signal.targets,
            stop_loss = ?signal.stop_loss,
            deadline = %signal.deadline,
            "signal stored"
        );
        signals.insert(id.clone(), Arc::new(RwLock::new(signal)));
        Some(id)
    }

    /// Whether a message from a channel was already ingested. Guards against
    /// the upstream replaying the same channel message.
    pub fn has_message(&self, channel_id: i64, message_id: i64) -> bool {
        self.signals.read().values().any(|arc| {
            let sig = arc.read();
            sig.channel_id == channel_id && sig.message_id == Some(message_id)
        })
    }

    // -------------------------------------------------------------------------
    // Observation delivery
    // -------------------------------------------------------------------------

    /// Deliver one price observation to one signal under its write lock.
    ///
    /// Terminal signals are left untouched, so replaying an observation
    /// against a resolved signal is a no-op.
    pub fn apply_observation(
        &self,
        id: &str,
        price: f64,
        observed_at: DateTime<Utc>,
    ) -> ObservationOutcome {
        let arc = match self.signals.read().get(id) {
            Some(arc) => arc.clone(),
            None => return ObservationOutcome::Ignored,
        };

        let mut sig = arc.write();
        if sig.state.is_terminal() {
            return ObservationOutcome::Ignored;
        }

        match evaluator::evaluate(&sig, Some(price), observed_at) {
            Some(verdict) => {
                sig.record_observation(price, observed_at);
                sig.apply_verdict(&verdict, observed_at);
                info!(
                    id = %sig.id,
                    symbol = %sig.symbol,
                    state = %sig.state,
                    exit_price = verdict.exit_price,
                    realized_return = ?sig.realized_return,
                    milestone = ?verdict.milestone,
                    "signal resolved"
                );
                ObservationOutcome::Resolved(Box::new(sig.clone()))
            }
            None => {
                sig.record_observation(price, observed_at);
                debug!(
                    id = %sig.id,
                    symbol = %sig.symbol,
                    price,
                    observation_count = sig.observation_count,
                    "observation recorded, signal pending"
                );
                ObservationOutcome::Recorded
            }
        }
    }

    /// Force-expire every pending signal whose deadline has passed, whether
    /// or not a price was ever observed for it. Returns the expired clones.
    pub fn sweep_deadlines(&self, now: DateTime<Utc>) -> Vec<Signal> {
        let arcs: Vec<Arc<RwLock<Signal>>> = self.signals.read().values().cloned().collect();

        let mut expired = Vec::new();
        for arc in arcs {
            let mut sig = arc.write();
            if sig.state.is_terminal() {
                continue;
            }
            if let Some(verdict) = evaluator::evaluate(&sig, None, now) {
                sig.apply_verdict(&verdict, now);
                info!(
                    id = %sig.id,
                    symbol = %sig.symbol,
                    exit_price = verdict.exit_price,
                    observation_count = sig.observation_count,
                    "signal expired at deadline"
                );
                expired.push(sig.clone());
            }
        }
        expired
    }

    /// Manual operator override: a direct terminal transition bypassing all
    /// price logic. The outcome is booked at the last observed price (entry
    /// when nothing was ever observed).
    pub fn discard(&self, id: &str, now: DateTime<Utc>) -> DiscardOutcome {
        let arc = match self.signals.read().get(id) {
            Some(arc) => arc.clone(),
            None => return DiscardOutcome::NotFound,
        };

        let mut sig = arc.write();
        if sig.state.is_terminal() {
            return DiscardOutcome::AlreadyTerminal;
        }

        let exit_price = sig.last_price.unwrap_or(sig.entry_price);
        let verdict = Verdict {
            state: SignalState::Discarded,
            exit_price,
            milestone: None,
        };
        sig.apply_verdict(&verdict, now);
        info!(id = %sig.id, symbol = %sig.symbol, "signal discarded by operator");
        DiscardOutcome::Discarded(Box::new(sig.clone()))
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Point-in-time clone of a single signal.
    pub fn get(&self, id: &str) -> Option<Signal> {
        let arc = self.signals.read().get(id)?.clone();
        let sig = arc.read().clone();
        Some(sig)
    }

    /// Clones of all signals, newest first.
    pub fn all(&self) -> Vec<Signal> {
        let mut out: Vec<Signal> = self
            .signals
            .read()
            .values()
            .map(|arc| arc.read().clone())
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    /// Clones of all PENDING signals.
    pub fn pending(&self) -> Vec<Signal> {
        self.signals
            .read()
            .values()
            .map(|arc| arc.read().clone())
            .filter(|s| !s.state.is_terminal())
            .collect()
    }

    /// Distinct symbols across all PENDING signals — one entry per symbol no
    /// matter how many signals reference it.
    pub fn pending_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .pending()
            .into_iter()
            .map(|s| s.symbol)
            .collect();
        symbols.sort();
        symbols.dedup();
        symbols
    }

    /// Ids of PENDING signals referencing `symbol`.
    pub fn pending_ids_for_symbol(&self, symbol: &str) -> Vec<String> {
        self.pending()
            .into_iter()
            .filter(|s| s.symbol == symbol)
            .map(|s| s.id)
            .collect()
    }

    /// Terminal signals whose outcome timestamp falls within `[start, end)`.
    pub fn terminal_in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<Signal> {
        self.signals
            .read()
            .values()
            .map(|arc| arc.read().clone())
            .filter(|s| {
                s.state.is_terminal()
                    && s.resolved_at
                        .map(|t| t >= start && t < end)
                        .unwrap_or(false)
            })
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }

    pub fn len(&self) -> usize {
        self.signals.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.read().is_empty()
    }

    /// Signals created since UTC midnight of `now`'s day.
    pub fn created_today(&self, now: DateTime<Utc>) -> usize {
        let midnight = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .expect("midnight is a valid time")
            .and_utc();
        self.signals
            .read()
            .values()
            .filter(|arc| arc.read().created_at >= midnight)
            .count()
    }

    // -------------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------------

    /// Load a store from the JSON snapshot at `path`.
    ///
    /// A missing file yields a fresh empty store. A present but unreadable or
    /// unparsable snapshot is an error: the caller must treat it as fatal
    /// rather than silently start from partial data.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "no signal store snapshot, starting fresh");
            return Ok(Self::new());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read signal store from {}", path.display()))?;
        let records: Vec<Signal> = serde_json::from_str(&content)
            .with_context(|| format!("corrupt signal store snapshot at {}", path.display()))?;

        let mut map = HashMap::new();
        for sig in records {
            map.insert(sig.id.clone(), Arc::new(RwLock::new(sig)));
        }
        info!(path = %path.display(), count = map.len(), "signal store loaded");

        Ok(Self {
            signals: RwLock::new(map),
        })
    }

    /// Persist a snapshot of every signal using the atomic tmp + rename
    /// pattern.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let mut records = self.all();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let content = serde_json::to_string_pretty(&records)
            .context("failed to serialise signal store to JSON")?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp store to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp store to {}", path.display()))?;

        debug!(path = %path.display(), count = records.len(), "signal store saved (atomic)");
        Ok(())
    }
}

impl Default for SignalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SignalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalStore")
            .field("signals", &self.len())
            .field("pending", &self.pending_count())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store_with(signals: Vec<Signal>) -> SignalStore {
        let store = SignalStore::new();
        for s in signals {
            store.insert(s);
        }
        store
    }

    #[test]
    fn observation_resolves_target_and_is_idempotent() {
        let now = Utc::now();
        let sig = Signal::fixture(
            SignalDirection::Buy,
            25.50,
            vec![28.00, 32.00],
            Some(23.00),
            now,
        );
        let id = sig.id.clone();
        let store = store_with(vec![sig]);

        // Pending observations record bookkeeping only.
        assert!(matches!(
            store.apply_observation(&id, 25.80, now),
            ObservationOutcome::Recorded
        ));

        // Target hit resolves exactly once.
        match store.apply_observation(&id, 28.50, now + Duration::hours(1)) {
            ObservationOutcome::Resolved(sig) => {
                assert_eq!(sig.state, SignalState::TargetHit);
                assert_eq!(sig.exit_price, Some(28.50));
                assert!((sig.realized_return.unwrap() - 0.117647).abs() < 1e-4);
                assert!(sig.resolved_at.is_some());
            }
            other => panic!("expected resolution, got {other:?}"),
        }

        // Replaying any observation afterwards changes nothing.
        assert!(matches!(
            store.apply_observation(&id, 10.0, now + Duration::hours(2)),
            ObservationOutcome::Ignored
        ));
        let after = store.get(&id).unwrap();
        assert_eq!(after.state, SignalState::TargetHit);
        assert_eq!(after.exit_price, Some(28.50));
    }

    #[test]
    fn pending_symbols_are_deduplicated() {
        let now = Utc::now();
        let store = store_with(vec![
            Signal::fixture(SignalDirection::Buy, 25.0, vec![], None, now),
            Signal::fixture(SignalDirection::Sell, 26.0, vec![], None, now),
            Signal::fixture(SignalDirection::Hold, 27.0, vec![], None, now),
        ]);
        // All fixtures share the AVAX symbol.
        assert_eq!(store.pending_symbols(), vec!["AVAX".to_string()]);
        assert_eq!(store.pending_ids_for_symbol("AVAX").len(), 3);
    }

    #[test]
    fn deadline_sweep_expires_unobserved_signals() {
        let created = Utc::now() - Duration::hours(200);
        let sig = Signal::fixture(SignalDirection::Buy, 25.50, vec![28.0], Some(23.0), created);
        let id = sig.id.clone();
        let store = store_with(vec![sig]);

        let expired = store.sweep_deadlines(Utc::now());
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].state, SignalState::Expired);
        assert_eq!(expired[0].exit_price, Some(25.50));
        assert_eq!(expired[0].realized_return, Some(0.0));

        // Second sweep finds nothing.
        assert!(store.sweep_deadlines(Utc::now()).is_empty());
        assert_eq!(store.get(&id).unwrap().state, SignalState::Expired);
    }

    #[test]
    fn discard_is_guarded_like_any_transition() {
        let now = Utc::now();
        let sig = Signal::fixture(SignalDirection::Buy, 25.0, vec![], None, now);
        let id = sig.id.clone();
        let store = store_with(vec![sig]);

        match store.discard(&id, now) {
            DiscardOutcome::Discarded(sig) => {
                assert_eq!(sig.state, SignalState::Discarded);
                assert_eq!(sig.exit_price, Some(25.0));
            }
            other => panic!("expected discard, got {other:?}"),
        }
        assert!(matches!(
            store.discard(&id, now),
            DiscardOutcome::AlreadyTerminal
        ));
        assert!(matches!(store.discard("nope", now), DiscardOutcome::NotFound));
    }

    #[test]
    fn insert_unique_admits_a_message_exactly_once() {
        let now = Utc::now();
        let store = SignalStore::new();

        let mut first = Signal::fixture(SignalDirection::Buy, 25.0, vec![], None, now);
        first.channel_id = -100;
        first.message_id = Some(77);
        let mut replay = Signal::fixture(SignalDirection::Buy, 25.0, vec![], None, now);
        replay.channel_id = -100;
        replay.message_id = Some(77);

        assert!(store.insert_unique(first).is_some());
        assert!(store.insert_unique(replay).is_none());
        assert_eq!(store.len(), 1);

        // A different message from the same channel is fine, as are signals
        // carrying no message id at all.
        let mut other = Signal::fixture(SignalDirection::Buy, 26.0, vec![], None, now);
        other.channel_id = -100;
        other.message_id = Some(78);
        assert!(store.insert_unique(other).is_some());

        let anonymous = Signal::fixture(SignalDirection::Buy, 27.0, vec![], None, now);
        assert!(store.insert_unique(anonymous).is_some());
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn duplicate_message_is_detected() {
        let now = Utc::now();
        let mut sig = Signal::fixture(SignalDirection::Buy, 25.0, vec![], None, now);
        sig.channel_id = -100;
        sig.message_id = Some(77);
        let store = store_with(vec![sig]);

        assert!(store.has_message(-100, 77));
        assert!(!store.has_message(-100, 78));
        assert!(!store.has_message(-101, 77));
    }

    #[test]
    fn terminal_window_filters_by_resolution_time() {
        let now = Utc::now();
        let sig = Signal::fixture(SignalDirection::Buy, 25.0, vec![26.0], None, now);
        let id = sig.id.clone();
        let store = store_with(vec![sig]);

        let resolved_at = now + Duration::hours(1);
        store.apply_observation(&id, 26.5, resolved_at);

        let hit = store.terminal_in_window(now, now + Duration::days(7));
        assert_eq!(hit.len(), 1);

        // A window ending before resolution misses it.
        let miss = store.terminal_in_window(now - Duration::days(7), now);
        assert!(miss.is_empty());
    }

    #[test]
    fn snapshot_roundtrip() {
        let dir = std::env::temp_dir().join(format!("tipster-store-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("signal_store.json");

        let now = Utc::now();
        let sig = Signal::fixture(SignalDirection::Sell, 100.0, vec![90.0], Some(105.0), now);
        let id = sig.id.clone();
        let store = store_with(vec![sig]);
        store.apply_observation(&id, 89.0, now + Duration::hours(1));
        store.save(&path).unwrap();

        let reloaded = SignalStore::load(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        let sig = reloaded.get(&id).unwrap();
        assert_eq!(sig.state, SignalState::TargetHit);
        assert_eq!(sig.exit_price, Some(89.0));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_snapshot_is_a_fresh_store() {
        let path = std::env::temp_dir().join(format!("absent-{}.json", uuid::Uuid::new_v4()));
        let store = SignalStore::load(&path).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn corrupt_snapshot_is_an_error() {
        let path = std::env::temp_dir().join(format!("corrupt-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, "{ not json ]").unwrap();
        assert!(SignalStore::load(&path).is_err());
        std::fs::remove_file(&path).ok();
    }
}
