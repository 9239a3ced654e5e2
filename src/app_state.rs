// =============================================================================
// Central Application State — Tipster Verification Engine
// =============================================================================
//
// The single source of truth for the engine. The signal store is the only
// shared mutable collection with per-record locking; everything else here is
// directory/ring bookkeeping for the API surface.
//
// Thread safety:
//   - Atomic counters for lock-free version and throughput tracking.
//   - parking_lot::RwLock for mutable shared collections.
//   - Arc wrappers for subsystems that manage their own interior mutability.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use crate::ingest::{RejectReason, SignalCandidate, SignalValidator};
use crate::report::WeeklyReport;
use crate::runtime_config::RuntimeConfig;
use crate::signal_store::{Signal, SignalStore};
use crate::types::ChannelInfo;

/// Maximum number of recent errors to retain.
const MAX_RECENT_ERRORS: usize = 50;
/// Maximum number of weekly reports to retain.
const MAX_RECENT_REPORTS: usize = 12;

/// A recorded error event for the API error log.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    /// Human-readable error message.
    pub message: String,
    /// ISO 8601 timestamp.
    pub at: String,
}

/// Central application state shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    // ── Version tracking ────────────────────────────────────────────────
    /// Monotonically increasing version counter, incremented on every
    /// meaningful state mutation.
    pub state_version: AtomicU64,

    // ── Configuration ───────────────────────────────────────────────────
    pub runtime_config: Arc<RwLock<RuntimeConfig>>,
    /// Resolved path of the config file; every runtime save targets this so
    /// an env-overridden path is honored everywhere, not just at boot.
    pub config_path: String,

    // ── Signals ─────────────────────────────────────────────────────────
    pub store: Arc<SignalStore>,

    // ── Channel directory ───────────────────────────────────────────────
    pub channels: RwLock<Vec<ChannelInfo>>,

    // ── Reports ─────────────────────────────────────────────────────────
    pub reports: RwLock<Vec<WeeklyReport>>,
    /// Period end of the most recently generated report; the report loop
    /// uses this to decide due-ness.
    pub last_report_boundary: RwLock<Option<DateTime<Utc>>>,

    // ── Throughput counters ─────────────────────────────────────────────
    pub signals_admitted: AtomicU64,
    pub signals_rejected: AtomicU64,

    // ── Error Log ───────────────────────────────────────────────────────
    pub recent_errors: RwLock<Vec<ErrorRecord>>,

    // ── Timing ──────────────────────────────────────────────────────────
    /// Instant when the engine was started. Used for uptime calculations.
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Construct the state from configuration and a loaded store. The channel
    /// directory is seeded from the config.
    pub fn new(config: RuntimeConfig, store: Arc<SignalStore>) -> Self {
        let channels = config.channels.clone();

        Self {
            state_version: AtomicU64::new(1),
            runtime_config: Arc::new(RwLock::new(config)),
            config_path: RuntimeConfig::resolve_path(),
            store,
            channels: RwLock::new(channels),
            reports: RwLock::new(Vec::new()),
            last_report_boundary: RwLock::new(None),
            signals_admitted: AtomicU64::new(0),
            signals_rejected: AtomicU64::new(0),
            recent_errors: RwLock::new(Vec::new()),
            start_time: std::time::Instant::now(),
        }
    }

    // ── Version Management ──────────────────────────────────────────────

    /// Atomically increment the state version. Call after every meaningful
    /// mutation.
    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    /// Read the current state version without modifying it.
    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Ingestion ───────────────────────────────────────────────────────

    /// Run a candidate through the admission gate and, on success, store the
    /// resulting PENDING signal. The library entry point behind
    /// `POST /api/v1/signals`.
    pub fn ingest(
        &self,
        candidate: &SignalCandidate,
        now: DateTime<Utc>,
    ) -> Result<Signal, RejectReason> {
        // Duplicate ingestion guard: the upstream may replay a channel
        // message; admit it once. Cheap pre-check here, the authoritative
        // check runs atomically inside `insert_unique`.
        if let Some(message_id) = candidate.message_id {
            if self.store.has_message(candidate.channel_id, message_id) {
                self.signals_rejected.fetch_add(1, Ordering::Relaxed);
                return Err(RejectReason::DuplicateMessage {
                    channel_id: candidate.channel_id,
                    message_id,
                });
            }
        }

        match SignalValidator::admit(candidate, now) {
            Ok(signal) => {
                if self.store.insert_unique(signal.clone()).is_none() {
                    // A racing ingest of the same message won.
                    self.signals_rejected.fetch_add(1, Ordering::Relaxed);
                    return Err(RejectReason::DuplicateMessage {
                        channel_id: candidate.channel_id,
                        message_id: candidate.message_id.unwrap_or_default(),
                    });
                }
                self.signals_admitted.fetch_add(1, Ordering::Relaxed);
                self.increment_version();
                Ok(signal)
            }
            Err(reason) => {
                debug!(
                    channel_id = candidate.channel_id,
                    symbol = %candidate.token_symbol,
                    reason = %reason,
                    "candidate rejected"
                );
                self.signals_rejected.fetch_add(1, Ordering::Relaxed);
                Err(reason)
            }
        }
    }

    // ── Channel directory ───────────────────────────────────────────────

    /// Add a channel to the directory. Returns `false` when the id already
    /// exists (the API maps this to 409).
    pub fn add_channel(&self, channel: ChannelInfo) -> bool {
        let mut channels = self.channels.write();
        if channels.iter().any(|c| c.channel_id == channel.channel_id) {
            return false;
        }
        info!(
            channel_id = channel.channel_id,
            channel_name = %channel.channel_name,
            "channel added to directory"
        );
        channels.push(channel);
        drop(channels);
        self.increment_version();
        true
    }

    pub fn active_channel_count(&self) -> usize {
        self.channels.read().iter().filter(|c| c.is_active).count()
    }

    // ── Reports ─────────────────────────────────────────────────────────

    /// Retain a freshly assembled report. The ring is capped at
    /// [`MAX_RECENT_REPORTS`]; oldest entries are evicted.
    pub fn push_report(&self, report: WeeklyReport) {
        *self.last_report_boundary.write() = Some(report.period_end);

        let mut reports = self.reports.write();
        reports.push(report);
        while reports.len() > MAX_RECENT_REPORTS {
            reports.remove(0);
        }
        drop(reports);

        self.increment_version();
    }

    /// The most recently generated report, if any.
    pub fn latest_report(&self) -> Option<WeeklyReport> {
        self.reports.read().last().cloned()
    }

    // ── Error Logging ───────────────────────────────────────────────────

    /// Record an error message. The ring buffer is capped at
    /// [`MAX_RECENT_ERRORS`]; oldest entries are evicted when the limit is
    /// reached.
    pub fn push_error(&self, msg: String) {
        let record = ErrorRecord {
            message: msg,
            at: Utc::now().to_rfc3339(),
        };

        let mut errors = self.recent_errors.write();
        errors.push(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }
        drop(errors);

        self.increment_version();
    }
}
