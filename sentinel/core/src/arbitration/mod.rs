//! Priority Arbitration Engine
//!
//! Resolves the live state reports into the one screen that should be shown
//! on the next frame.
//!
//! # Algorithm
//!
//! ```text
//!   live reports ──► match rules ──► candidates ──► highest weight wins
//!                                        │            (ties: rule order,
//!                                        │             then module order)
//!                                        ▼
//!                                   none at all ──► idle cycle
//!                                                   (dwell per screen)
//! ```
//!
//! Expiry is done by the caller through [`ReportBoard::expire`] before every
//! evaluation, so decisions decay with time even when nothing is published.
//!
//! # Idle Cycling
//!
//! The idle cursor only exists while the engine is in idle fallback. A rule
//! winning discards it; re-entering idle creates a fresh one, restarting the
//! dwell timer. The cursor advances by whole dwell periods measured from the
//! moment it was created, so evaluation jitter never accumulates.

mod reports;

pub use reports::{
    Lifetime, ReportBoard, ReportMetadata, ReportOptions, StateReport, StateReporter,
};

use std::cmp::{Ordering, Reverse};
use std::fmt;
use std::time::{Duration, Instant};

use crate::config::{PriorityConfig, RuleConfig};

// ============================================================================
// Rules & Policy
// ============================================================================

/// A rule, immutable once loaded
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PriorityRule {
    /// Position in the configured list (tie-break key)
    pub index: usize,
    /// Module whose report is matched
    pub module: String,
    /// Matching labels; empty means any
    pub states: Vec<String>,
    /// Candidate weight
    pub weight: i64,
    /// Screen shown when the rule wins
    pub screen: String,
}

impl PriorityRule {
    /// Build a rule from its configuration entry
    #[must_use]
    pub fn from_config(index: usize, config: &RuleConfig) -> Self {
        Self {
            index,
            module: config.when.module.clone(),
            states: config.when.state.labels(),
            weight: config.weight,
            screen: config.target_screen().to_string(),
        }
    }

    /// Whether the rule matches `report`
    #[must_use]
    pub fn matches(&self, report: &StateReport) -> bool {
        self.module == report.module
            && (self.states.is_empty() || self.states.iter().any(|s| *s == report.label))
    }
}

/// Idle fallback policy
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdlePolicy {
    /// Screens in rotation order
    pub cycle: Vec<String>,
    /// Time spent on each; zero disables rotation
    pub dwell: Duration,
}

impl IdlePolicy {
    /// Build from the `[priorities.idle]` section
    #[must_use]
    pub fn from_config(cycle: &[String], dwell_seconds: f64) -> Self {
        Self {
            cycle: cycle.to_vec(),
            dwell: Duration::try_from_secs_f64(dwell_seconds).unwrap_or(Duration::ZERO),
        }
    }
}

// ============================================================================
// Decisions
// ============================================================================

/// A rule match that competes for the screen
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    /// Screen to show
    pub screen: String,
    /// Module whose report matched
    pub module: String,
    /// Effective weight (report override or rule weight)
    pub weight: i64,
    /// Index of the matched rule
    pub rule_index: usize,
    /// Registration position of the reporting module
    pub registration_index: usize,
}

impl Candidate {
    /// Ranking key: higher wins
    fn rank(&self) -> (i64, Reverse<usize>, Reverse<usize>) {
        (self.weight, Reverse(self.rule_index), Reverse(self.registration_index))
    }
}

/// Outcome of one evaluation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// A rule candidate won
    Rule(Candidate),
    /// Idle cycling selected a screen
    Idle {
        /// Selected screen
        screen: String,
        /// Its position in the idle cycle
        position: usize,
    },
    /// Nothing is eligible to be shown
    Nothing,
}

impl Decision {
    /// Screen the decision asks for
    #[must_use]
    pub fn screen(&self) -> Option<&str> {
        match self {
            Self::Rule(candidate) => Some(&candidate.screen),
            Self::Idle { screen, .. } => Some(screen),
            Self::Nothing => None,
        }
    }

    /// Whether the decision came from idle fallback
    #[must_use]
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle { .. })
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rule(c) => write!(
                f,
                "{} (rule #{} on {}, weight {})",
                c.screen, c.rule_index, c.module, c.weight
            ),
            Self::Idle { screen, position } => write!(f, "{screen} (idle #{position})"),
            Self::Nothing => write!(f, "nothing"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct IdleCursor {
    index: usize,
    since: Instant,
}

// ============================================================================
// Engine
// ============================================================================

/// The arbitration engine
///
/// Pure with respect to I/O: it is handed reports, the current time, the
/// shown screen and an eligibility predicate, and returns a [`Decision`].
#[derive(Debug)]
pub struct ArbitrationEngine {
    rules: Vec<PriorityRule>,
    configured_cycle: Vec<String>,
    idle: IdlePolicy,
    registration_order: Vec<String>,
    cursor: Option<IdleCursor>,
}

impl ArbitrationEngine {
    /// Build from the `[priorities]` section
    #[must_use]
    pub fn new(config: &PriorityConfig) -> Self {
        let rules = config
            .rules
            .iter()
            .enumerate()
            .map(|(i, rule)| PriorityRule::from_config(i, rule))
            .collect();
        let idle = IdlePolicy::from_config(&config.idle.cycle, config.idle.dwell_seconds);
        Self {
            rules,
            configured_cycle: idle.cycle.clone(),
            idle,
            registration_order: Vec::new(),
            cursor: None,
        }
    }

    /// Loaded rules in declaration order
    #[must_use]
    pub fn rules(&self) -> &[PriorityRule] {
        &self.rules
    }

    /// Effective idle policy
    #[must_use]
    pub fn idle_policy(&self) -> &IdlePolicy {
        &self.idle
    }

    /// Record module registration order and normalise the idle cycle
    ///
    /// Cycle entries naming unknown modules are dropped; an empty cycle
    /// becomes every registered module. Rules naming unknown modules are
    /// kept but logged, they simply never match.
    pub fn set_registration_order(&mut self, slugs: Vec<String>) {
        let mut cycle: Vec<String> = Vec::with_capacity(self.configured_cycle.len());
        for slug in &self.configured_cycle {
            if slugs.contains(slug) {
                cycle.push(slug.clone());
            } else {
                tracing::warn!(module = %slug, "Idle cycle names an unknown module, dropped");
            }
        }
        if cycle.is_empty() {
            cycle.clone_from(&slugs);
        }

        for rule in &self.rules {
            if !slugs.contains(&rule.module) || !slugs.contains(&rule.screen) {
                tracing::warn!(
                    rule = rule.index,
                    module = %rule.module,
                    screen = %rule.screen,
                    "Priority rule refers to an unknown module"
                );
            }
        }

        tracing::debug!(cycle = ?cycle, "Idle cycle normalised");
        self.idle.cycle = cycle;
        self.registration_order = slugs;
        self.cursor = None;
    }

    /// Forget the idle cursor; the next idle evaluation starts afresh
    pub fn reset_idle(&mut self) {
        self.cursor = None;
    }

    /// Start idle cycling at `slug` from `now`, if it is part of the cycle
    pub fn prime_idle(&mut self, slug: &str, now: Instant) {
        self.cursor = self
            .idle
            .cycle
            .iter()
            .position(|s| s == slug)
            .map(|index| IdleCursor { index, since: now });
    }

    /// Every candidate produced by `reports`, best first
    #[must_use]
    pub fn candidates(
        &self,
        reports: &[StateReport],
        eligible: impl Fn(&str) -> bool,
    ) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = reports
            .iter()
            .filter(|report| eligible(report.module.as_str()))
            .flat_map(|report| {
                self.rules
                    .iter()
                    .filter(move |rule| rule.matches(report))
                    .map(move |rule| (report, rule))
            })
            .filter(|(_, rule)| eligible(rule.screen.as_str()))
            .map(|(report, rule)| Candidate {
                screen: rule.screen.clone(),
                module: report.module.clone(),
                weight: report.weight.unwrap_or(rule.weight),
                rule_index: rule.index,
                registration_index: self.registration_index(&report.module),
            })
            .collect();
        candidates.sort_by(compare_candidates);
        candidates
    }

    /// Decide what should be shown at `now`
    ///
    /// `reports` must already be expired against `now`. `current` is the
    /// screen shown right now, `eligible` says whether a module may be
    /// shown (loaded and not faulted).
    pub fn evaluate(
        &mut self,
        reports: &[StateReport],
        now: Instant,
        current: Option<&str>,
        eligible: impl Fn(&str) -> bool,
    ) -> Decision {
        if let Some(winner) = self.candidates(reports, &eligible).into_iter().next() {
            self.cursor = None;
            return Decision::Rule(winner);
        }
        self.idle_decision(now, current, &eligible)
    }

    fn idle_decision(
        &mut self,
        now: Instant,
        current: Option<&str>,
        eligible: &impl Fn(&str) -> bool,
    ) -> Decision {
        let usable: Vec<usize> = self
            .idle
            .cycle
            .iter()
            .enumerate()
            .filter(|(_, slug)| eligible(slug.as_str()))
            .map(|(i, _)| i)
            .collect();
        if usable.is_empty() {
            self.cursor = None;
            return Decision::Nothing;
        }

        let cursor = match self.cursor {
            None => {
                let start = current
                    .and_then(|c| self.idle.cycle.iter().position(|s| s == c))
                    .filter(|i| usable.contains(i))
                    .unwrap_or(usable[0]);
                IdleCursor {
                    index: start,
                    since: now,
                }
            }
            Some(cursor) => self.advance(cursor, now, &usable),
        };
        self.cursor = Some(cursor);

        Decision::Idle {
            screen: self.idle.cycle[cursor.index].clone(),
            position: cursor.index,
        }
    }

    /// Move the cursor forward by the whole dwell periods elapsed
    fn advance(&self, cursor: IdleCursor, now: Instant, usable: &[usize]) -> IdleCursor {
        let dwell = self.idle.dwell.as_nanos();
        let steps = if dwell == 0 {
            0
        } else {
            now.saturating_duration_since(cursor.since).as_nanos() / dwell
        };

        // The cursor may sit on an entry that just became ineligible; the
        // next usable entry then counts as the current one.
        let (mut slot, landed_on_current) = match usable.binary_search(&cursor.index) {
            Ok(slot) => (slot, true),
            Err(slot) => (slot % usable.len(), false),
        };
        if steps == 0 && landed_on_current {
            return cursor;
        }

        #[allow(clippy::cast_possible_truncation)]
        let offset = (steps % usable.len() as u128) as usize;
        slot = (slot + offset) % usable.len();

        let since = if steps == 0 {
            cursor.since
        } else {
            u64::try_from(self.idle.dwell.as_nanos().saturating_mul(steps))
                .ok()
                .and_then(|nanos| cursor.since.checked_add(Duration::from_nanos(nanos)))
                .unwrap_or(now)
        };

        IdleCursor {
            index: usable[slot],
            since,
        }
    }

    fn registration_index(&self, module: &str) -> usize {
        self.registration_order
            .iter()
            .position(|s| s == module)
            .unwrap_or(usize::MAX)
    }
}

/// Order two candidates the way the engine does (best first)
#[must_use]
pub fn compare_candidates(a: &Candidate, b: &Candidate) -> Ordering {
    b.rank().cmp(&a.rank())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::config::SentinelConfig;
    use pretty_assertions::assert_eq;

    const RULES: &str = r#"
        [priorities.idle]
        cycle = ["a", "b", "c"]
        dwell_seconds = 10

        [[priorities.rules]]
        when = { module = "camera", state = ["danger", "warning"] }
        weight = 100

        [[priorities.rules]]
        when = { module = "radar", state = "present" }
        weight = 60

        [[priorities.rules]]
        when = { module = "door", state = "open" }
        weight = 60

        [[priorities.rules]]
        when = { module = "neo" }
        weight = 10
        screen = "a"
    "#;

    struct Fixture {
        clock: ManualClock,
        board: ReportBoard,
        engine: ArbitrationEngine,
    }

    impl Fixture {
        fn new() -> Self {
            let (config, _) = SentinelConfig::parse(RULES).unwrap();
            let clock = ManualClock::new();
            let board = ReportBoard::new(clock.shared(), 0.0);
            let mut engine = ArbitrationEngine::new(&config.priorities);
            engine.set_registration_order(
                ["camera", "radar", "door", "neo", "a", "b", "c"]
                    .map(String::from)
                    .to_vec(),
            );
            Self { clock, board, engine }
        }

        fn decide(&mut self, current: Option<&str>) -> Decision {
            let now = self.clock.now();
            self.board.expire(now);
            let live = self.board.live(now);
            self.engine.evaluate(&live, now, current, |_| true)
        }

        fn screen_at(&mut self, secs: f64) -> String {
            self.clock.set_elapsed_secs(secs);
            self.decide(None).screen().unwrap_or_default().to_string()
        }
    }

    #[test]
    fn test_highest_weight_wins() {
        let mut fx = Fixture::new();
        fx.board.submit("radar", Some("present"), ReportOptions::new());
        fx.board.submit("camera", Some("danger"), ReportOptions::new());
        fx.board.submit("neo", Some("anything"), ReportOptions::new());

        let Decision::Rule(winner) = fx.decide(None) else {
            panic!("expected a rule decision");
        };
        assert_eq!(winner.screen, "camera");
        assert_eq!(winner.weight, 100);
    }

    #[test]
    fn test_equal_weights_resolve_by_rule_order() {
        let mut fx = Fixture::new();
        fx.board.submit("door", Some("open"), ReportOptions::new());
        fx.clock.advance_secs(1.0);
        fx.board.submit("radar", Some("present"), ReportOptions::new());
        assert_eq!(fx.decide(None).screen(), Some("radar"));

        // arrival order does not matter
        let mut fx = Fixture::new();
        fx.board.submit("radar", Some("present"), ReportOptions::new());
        fx.clock.advance_secs(1.0);
        fx.board.submit("door", Some("open"), ReportOptions::new());
        assert_eq!(fx.decide(None).screen(), Some("radar"));
    }

    #[test]
    fn test_same_rule_resolves_by_registration_order() {
        let (config, _) = SentinelConfig::parse(
            r#"
            [[priorities.rules]]
            when = { module = "x" }
            weight = 5
            screen = "shared"
            [[priorities.rules]]
            when = { module = "y" }
            weight = 5
            screen = "shared"
            "#,
        )
        .unwrap();
        let mut engine = ArbitrationEngine::new(&config.priorities);
        engine.set_registration_order(vec!["y".into(), "x".into(), "shared".into()]);

        let clock = ManualClock::new();
        let board = ReportBoard::new(clock.shared(), 0.0);
        board.submit("x", Some("on"), ReportOptions::new().weight(9));
        board.submit("y", Some("on"), ReportOptions::new().weight(9));

        let candidates = engine.candidates(&board.live(clock.now()), |_| true);
        assert_eq!(candidates[0].module, "x");

        // equal weight and equal rule index: registration order decides
        let x = Candidate {
            screen: "shared".into(),
            module: "x".into(),
            weight: 5,
            rule_index: 0,
            registration_index: 1,
        };
        let y = Candidate {
            module: "y".into(),
            registration_index: 0,
            ..x.clone()
        };
        let mut both = vec![x, y];
        both.sort_by(compare_candidates);
        assert_eq!(both[0].module, "y");
    }

    #[test]
    fn test_weight_override_replaces_rule_weight() {
        let mut fx = Fixture::new();
        fx.board.submit("camera", Some("warning"), ReportOptions::new());
        fx.board.submit("radar", Some("present"), ReportOptions::new().weight(150));
        assert_eq!(fx.decide(None).screen(), Some("radar"));
    }

    #[test]
    fn test_unmatched_label_produces_no_candidate() {
        let mut fx = Fixture::new();
        fx.board.submit("camera", Some("idle"), ReportOptions::new());
        assert!(fx.decide(None).is_idle());
    }

    #[test]
    fn test_expiry_reverts_to_idle() {
        let mut fx = Fixture::new();
        fx.board
            .submit("camera", Some("danger"), ReportOptions::new().expires_in_secs(2.0));
        assert_eq!(fx.screen_at(0.0), "camera");
        assert_eq!(fx.screen_at(1.9), "camera");
        assert_eq!(fx.screen_at(2.1), "a");
    }

    #[test]
    fn test_idle_cycling_dwell() {
        let mut fx = Fixture::new();
        let observed: Vec<String> = [0.0, 9.9, 10.0, 19.9, 20.0, 29.9, 30.0, 39.9]
            .into_iter()
            .map(|t| fx.screen_at(t))
            .collect();
        assert_eq!(observed, vec!["a", "a", "b", "b", "c", "c", "a", "a"]);
    }

    #[test]
    fn test_idle_skips_several_periods_at_once() {
        let mut fx = Fixture::new();
        assert_eq!(fx.screen_at(0.0), "a");
        assert_eq!(fx.screen_at(25.0), "c");
        assert_eq!(fx.screen_at(30.0), "a");
    }

    #[test]
    fn test_idle_timer_resets_after_rule_win() {
        let mut fx = Fixture::new();
        assert_eq!(fx.screen_at(0.0), "a");
        assert_eq!(fx.screen_at(12.0), "b");

        fx.board.submit("radar", Some("present"), ReportOptions::new().expires_in_secs(3.0));
        assert_eq!(fx.screen_at(13.0), "radar");

        // idle resumes at the first entry and dwells a full period again
        assert_eq!(fx.screen_at(16.0), "a");
        assert_eq!(fx.screen_at(25.9), "a");
        assert_eq!(fx.screen_at(26.0), "b");
    }

    #[test]
    fn test_idle_continues_from_shown_cycle_member() {
        let mut fx = Fixture::new();
        let now = fx.clock.now();
        let decision = fx.engine.evaluate(&[], now, Some("c"), |_| true);
        assert_eq!(decision.screen(), Some("c"));
        assert_eq!(fx.screen_at(10.0), "a");
    }

    #[test]
    fn test_idle_skips_ineligible_entries() {
        let mut fx = Fixture::new();
        let eligible = |slug: &str| slug != "b";
        let mut at = |secs: f64| {
            fx.clock.set_elapsed_secs(secs);
            let now = fx.clock.now();
            fx.engine
                .evaluate(&[], now, None, eligible)
                .screen()
                .map(str::to_string)
        };
        assert_eq!(at(0.0).as_deref(), Some("a"));
        assert_eq!(at(10.0).as_deref(), Some("c"));
        assert_eq!(at(20.0).as_deref(), Some("a"));
    }

    #[test]
    fn test_ineligible_modules_never_win() {
        let mut fx = Fixture::new();
        fx.board.submit("camera", Some("danger"), ReportOptions::new());
        let now = fx.clock.now();
        let live = fx.board.live(now);
        let decision = fx.engine.evaluate(&live, now, None, |slug| slug != "camera");
        assert_eq!(decision.screen(), Some("a"));
    }

    #[test]
    fn test_nothing_eligible() {
        let mut fx = Fixture::new();
        let now = fx.clock.now();
        assert_eq!(fx.engine.evaluate(&[], now, None, |_| false), Decision::Nothing);
    }

    #[test]
    fn test_zero_dwell_never_rotates() {
        let (config, _) = SentinelConfig::parse(
            "[priorities.idle]\ncycle = [\"a\", \"b\"]\ndwell_seconds = 0",
        )
        .unwrap();
        let mut engine = ArbitrationEngine::new(&config.priorities);
        engine.set_registration_order(vec!["a".into(), "b".into()]);
        let clock = ManualClock::new();

        for secs in [0.0, 100.0, 1000.0] {
            clock.set_elapsed_secs(secs);
            let screen = engine.evaluate(&[], clock.now(), None, |_| true);
            assert_eq!(screen.screen(), Some("a"));
        }
    }

    #[test]
    fn test_cycle_normalisation() {
        let (config, _) = SentinelConfig::parse(
            "[priorities.idle]\ncycle = [\"ghost\", \"b\"]",
        )
        .unwrap();
        let mut engine = ArbitrationEngine::new(&config.priorities);
        engine.set_registration_order(vec!["a".into(), "b".into()]);
        assert_eq!(engine.idle_policy().cycle, vec!["b"]);

        let mut engine = ArbitrationEngine::new(&PriorityConfig::default());
        engine.set_registration_order(vec!["a".into(), "b".into()]);
        assert_eq!(engine.idle_policy().cycle, vec!["a", "b"]);
    }

    #[test]
    fn test_prime_idle() {
        let mut fx = Fixture::new();
        fx.clock.set_elapsed_secs(5.0);
        fx.engine.prime_idle("b", fx.clock.now());
        assert_eq!(fx.screen_at(5.0), "b");
        assert_eq!(fx.screen_at(14.9), "b");
        assert_eq!(fx.screen_at(15.0), "c");
    }
}
