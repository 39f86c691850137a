//! State reports and the board that holds them
//!
//! Modules claim screen time by submitting a [`StateReport`]. The board keeps
//! at most one report per module; a new submission replaces the previous one
//! and a `None` label removes it. The board is the only arbitration state
//! written from more than one thread, so everything sits behind one mutex
//! and callers only ever see cloned snapshots.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::clock::SharedClock;

/// Metadata attached to a report
pub type ReportMetadata = serde_json::Map<String, serde_json::Value>;

/// A module's claim that it deserves visibility
#[derive(Clone, Debug, PartialEq)]
pub struct StateReport {
    /// Reporting module
    pub module: String,
    /// State label matched against rules
    pub label: String,
    /// Overrides the matched rule's weight when set
    pub weight: Option<i64>,
    /// Free-form metadata, not interpreted by the engine
    pub metadata: ReportMetadata,
    /// When the report was submitted
    pub reported_at: Instant,
    /// When the report stops counting; `None` means never
    pub expires_at: Option<Instant>,
}

impl StateReport {
    /// Whether the report still counts at `now`
    #[must_use]
    pub fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// How long a report stays live
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Lifetime {
    /// Use the board's default (`priorities.timeout_seconds`)
    #[default]
    Default,
    /// Never expires
    Never,
    /// Expires this long after submission
    After(Duration),
}

/// Optional parts of a report
///
/// ```
/// use sentinel_core::arbitration::ReportOptions;
///
/// let options = ReportOptions::new()
///     .weight(100)
///     .metadata("zone", "porch")
///     .expires_in_secs(5.0);
/// assert_eq!(options.weight, Some(100));
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReportOptions {
    /// Weight override
    pub weight: Option<i64>,
    /// Metadata
    pub metadata: ReportMetadata,
    /// Lifetime
    pub lifetime: Lifetime,
}

impl ReportOptions {
    /// No weight override, no metadata, default lifetime
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the rule weight
    #[must_use]
    pub fn weight(mut self, weight: i64) -> Self {
        self.weight = Some(weight);
        self
    }

    /// Add a metadata entry
    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Expire after `duration`; zero means never
    #[must_use]
    pub fn expires_in(mut self, duration: Duration) -> Self {
        self.lifetime = if duration.is_zero() {
            Lifetime::Never
        } else {
            Lifetime::After(duration)
        };
        self
    }

    /// Expire after `secs` seconds; non-positive or non-finite means never
    #[must_use]
    pub fn expires_in_secs(mut self, secs: f64) -> Self {
        self.lifetime = match Duration::try_from_secs_f64(secs) {
            Ok(duration) if !duration.is_zero() => Lifetime::After(duration),
            _ => Lifetime::Never,
        };
        self
    }

    /// Never expire, even when the board has a default lifetime
    #[must_use]
    pub fn never_expires(mut self) -> Self {
        self.lifetime = Lifetime::Never;
        self
    }
}

#[derive(Debug, Default)]
struct BoardState {
    reports: HashMap<String, StateReport>,
    faulted: HashSet<String>,
}

/// Thread-safe set of live reports, keyed by module
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ReportBoard {
    state: Arc<Mutex<BoardState>>,
    clock: SharedClock,
    default_lifetime: Option<Duration>,
}

impl std::fmt::Debug for ReportBoard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ReportBoard")
            .field("reports", &state.reports.len())
            .field("faulted", &state.faulted.len())
            .field("default_lifetime", &self.default_lifetime)
            .finish()
    }
}

impl ReportBoard {
    /// Create a board; `timeout_seconds <= 0` disables the default lifetime
    #[must_use]
    pub fn new(clock: SharedClock, timeout_seconds: f64) -> Self {
        let default_lifetime = Duration::try_from_secs_f64(timeout_seconds)
            .ok()
            .filter(|d| !d.is_zero());
        Self {
            state: Arc::new(Mutex::new(BoardState::default())),
            clock,
            default_lifetime,
        }
    }

    /// Lifetime applied to reports submitted with [`Lifetime::Default`]
    #[must_use]
    pub fn default_lifetime(&self) -> Option<Duration> {
        self.default_lifetime
    }

    /// Record, replace or (with `None`) clear a module's report
    ///
    /// A non-null label also lifts a fault on the module.
    pub fn submit(&self, module: &str, label: Option<&str>, options: ReportOptions) {
        let Some(label) = label else {
            self.clear(module);
            return;
        };

        let now = self.clock.now();
        let lifetime = match options.lifetime {
            Lifetime::Default => self.default_lifetime,
            Lifetime::Never => None,
            Lifetime::After(duration) => Some(duration),
        };
        let report = StateReport {
            module: module.to_string(),
            label: label.to_string(),
            weight: options.weight,
            metadata: options.metadata,
            reported_at: now,
            // a lifetime past the end of `Instant` never expires
            expires_at: lifetime.and_then(|d| now.checked_add(d)),
        };

        tracing::debug!(
            module = %module,
            label = %label,
            weight = ?report.weight,
            expires_in = ?lifetime,
            "State reported"
        );

        let mut state = self.state.lock();
        if state.faulted.remove(module) {
            tracing::info!(module = %module, "Module recovered from fault");
        }
        state.reports.insert(module.to_string(), report);
    }

    /// Remove a module's report; returns whether one existed
    pub fn clear(&self, module: &str) -> bool {
        let removed = self.state.lock().reports.remove(module).is_some();
        if removed {
            tracing::debug!(module = %module, "State cleared");
        }
        removed
    }

    /// Remove every report and lift every fault
    pub fn clear_all(&self) {
        let mut state = self.state.lock();
        state.reports.clear();
        state.faulted.clear();
    }

    /// Drop reports whose expiry has passed; returns the affected modules
    pub fn expire(&self, now: Instant) -> Vec<String> {
        let mut state = self.state.lock();
        let mut expired: Vec<String> = state
            .reports
            .iter()
            .filter(|(_, report)| !report.is_live(now))
            .map(|(module, _)| module.clone())
            .collect();
        for module in &expired {
            state.reports.remove(module);
        }
        drop(state);

        expired.sort();
        for module in &expired {
            tracing::debug!(module = %module, "State report expired");
        }
        expired
    }

    /// Snapshot of the reports live at `now`, sorted by module
    #[must_use]
    pub fn live(&self, now: Instant) -> Vec<StateReport> {
        let mut live: Vec<StateReport> = self
            .state
            .lock()
            .reports
            .values()
            .filter(|r| r.is_live(now))
            .cloned()
            .collect();
        live.sort_by(|a, b| a.module.cmp(&b.module));
        live
    }

    /// Current report of one module, live or not
    #[must_use]
    pub fn get(&self, module: &str) -> Option<StateReport> {
        self.state.lock().reports.get(module).cloned()
    }

    /// Clear a module's report and exclude it until it reports again
    pub fn mark_faulted(&self, module: &str) {
        let mut state = self.state.lock();
        state.reports.remove(module);
        if state.faulted.insert(module.to_string()) {
            tracing::warn!(module = %module, "Module faulted, excluded from arbitration");
        }
    }

    /// Whether the module is currently faulted
    #[must_use]
    pub fn is_faulted(&self, module: &str) -> bool {
        self.state.lock().faulted.contains(module)
    }

    /// Handle a module uses to report on its own behalf
    #[must_use]
    pub fn reporter(&self, module: impl Into<String>) -> StateReporter {
        StateReporter {
            module: module.into(),
            board: self.clone(),
        }
    }
}

/// Reporting handle bound to a single module
///
/// `Send + Sync`, so a module may hand it to a helper thread.
#[derive(Clone, Debug)]
pub struct StateReporter {
    module: String,
    board: ReportBoard,
}

impl StateReporter {
    /// Module this reporter speaks for
    #[must_use]
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Submit (or with `None`, clear) the module's report
    pub fn report(&self, label: Option<&str>, options: ReportOptions) {
        self.board.submit(&self.module, label, options);
    }

    /// Clear the module's report
    pub fn clear(&self) {
        self.board.clear(&self.module);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};

    fn board(timeout: f64) -> (ManualClock, ReportBoard) {
        let clock = ManualClock::new();
        let board = ReportBoard::new(clock.shared(), timeout);
        (clock, board)
    }

    #[test]
    fn test_new_report_replaces_previous() {
        let (_, board) = board(0.0);
        board.submit("camera", Some("warning"), ReportOptions::new());
        board.submit("camera", Some("danger"), ReportOptions::new().weight(7));

        let live = board.live(board.clock.now());
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].label, "danger");
        assert_eq!(live[0].weight, Some(7));
    }

    #[test]
    fn test_null_label_clears() {
        let (_, board) = board(0.0);
        board.submit("camera", Some("danger"), ReportOptions::new());
        board.submit("camera", None, ReportOptions::new());
        assert!(board.get("camera").is_none());
    }

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let (clock, board) = board(0.0);
        board.submit("camera", Some("danger"), ReportOptions::new().expires_in_secs(2.0));

        clock.advance_secs(1.999);
        assert!(board.expire(clock.now()).is_empty());

        clock.set_elapsed_secs(2.0);
        assert_eq!(board.expire(clock.now()), vec!["camera".to_string()]);
        assert!(board.live(clock.now()).is_empty());
    }

    #[test]
    fn test_default_lifetime_only_applies_without_expiry() {
        let (clock, board) = board(10.0);
        board.submit("a", Some("x"), ReportOptions::new());
        board.submit("b", Some("x"), ReportOptions::new().never_expires());
        board.submit("c", Some("x"), ReportOptions::new().expires_in_secs(-1.0));
        board.submit("d", Some("x"), ReportOptions::new().expires_in(Duration::from_secs(3)));

        clock.advance_secs(5.0);
        assert_eq!(board.expire(clock.now()), vec!["d".to_string()]);
        clock.advance_secs(5.0);
        assert_eq!(board.expire(clock.now()), vec!["a".to_string()]);

        let live: Vec<_> = board.live(clock.now()).into_iter().map(|r| r.module).collect();
        assert_eq!(live, vec!["b", "c"]);
    }

    #[test]
    fn test_no_default_lifetime_means_never() {
        let (clock, board) = board(0.0);
        assert_eq!(board.default_lifetime(), None);
        board.submit("radar", Some("present"), ReportOptions::new());
        clock.advance_secs(86_400.0);
        assert_eq!(board.live(clock.now()).len(), 1);
    }

    #[test]
    fn test_lifetime_beyond_instant_range_never_expires() {
        let (clock, board) = board(0.0);
        board.submit("camera", Some("danger"), ReportOptions::new().expires_in_secs(1e19));
        let report = board.get("camera").unwrap();
        assert_eq!(report.expires_at, None);

        clock.advance_secs(86_400.0);
        assert!(board.expire(clock.now()).is_empty());
        assert_eq!(board.live(clock.now()).len(), 1);
    }

    #[test]
    fn test_huge_default_lifetime_never_expires() {
        let (clock, board) = board(1e19);
        assert!(board.default_lifetime().is_some());
        board.submit("camera", Some("danger"), ReportOptions::new());
        board.submit("radar", Some("present"), ReportOptions::new().expires_in_secs(2.0));

        assert_eq!(board.get("camera").unwrap().expires_at, None);
        clock.advance_secs(5.0);
        assert_eq!(board.expire(clock.now()), vec!["radar".to_string()]);
        assert_eq!(board.live(clock.now()).len(), 1);
    }

    #[test]
    fn test_fault_clears_and_report_recovers() {
        let (_, board) = board(0.0);
        let reporter = board.reporter("radar");
        reporter.report(Some("present"), ReportOptions::new());

        board.mark_faulted("radar");
        assert!(board.is_faulted("radar"));
        assert!(board.get("radar").is_none());

        reporter.report(None, ReportOptions::new());
        assert!(board.is_faulted("radar"));

        reporter.report(Some("present"), ReportOptions::new());
        assert!(!board.is_faulted("radar"));
        assert_eq!(reporter.module(), "radar");
    }

    #[test]
    fn test_reporter_from_another_thread() {
        let (_, board) = board(0.0);
        let reporter = board.reporter("camera");
        std::thread::spawn(move || reporter.report(Some("danger"), ReportOptions::new()))
            .join()
            .unwrap();
        assert_eq!(board.get("camera").map(|r| r.label), Some("danger".to_string()));
    }
}
