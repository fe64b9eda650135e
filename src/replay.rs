//! Offline replay of recorded page signals
//!
//! A replay script names the session, the page's tracker configuration and
//! the focus state at load, followed by timestamped signals. Replaying runs
//! the state machine exactly as a live page would and totals what it emitted,
//! which is how recorded sessions are audited for lost or double-counted time.

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_NAV_WINDOW_MS;
use crate::error::AttentionError;
use crate::machine::{AttentionMachine, AttentionPhase, FocusSample, TrackerConfig};
use crate::navigation::NavigationContext;
use crate::tracker::BrowserSignal;
use crate::types::{Emission, EpochMillis, LogRecord, SegmentKind, TrackerEvent};

/// One recorded line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum ReplayAction {
    WindowFocus,
    WindowBlur,
    VisibilityChange { hidden: bool },
    PageHide,
    BeforeUnload,
    /// The page controller marked an in-app navigation
    NavMark,
}

impl ReplayAction {
    pub fn browser_signal(&self) -> Option<BrowserSignal> {
        match *self {
            ReplayAction::WindowFocus => Some(BrowserSignal::WindowFocus),
            ReplayAction::WindowBlur => Some(BrowserSignal::WindowBlur),
            ReplayAction::VisibilityChange { hidden } => Some(BrowserSignal::VisibilityChange { hidden }),
            ReplayAction::PageHide => Some(BrowserSignal::PageHide),
            ReplayAction::BeforeUnload => Some(BrowserSignal::BeforeUnload),
            ReplayAction::NavMark => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayStep {
    pub at_ms: EpochMillis,
    #[serde(flatten)]
    pub action: ReplayAction,
}

fn default_nav_window() -> u64 {
    DEFAULT_NAV_WINDOW_MS
}

/// A full page load to replay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayScript {
    pub session_id: String,
    pub tracker: TrackerConfig,
    #[serde(default = "FocusSample::focused")]
    pub initial: FocusSample,
    pub start_ms: EpochMillis,
    #[serde(default = "default_nav_window")]
    pub nav_window_ms: u64,
    #[serde(default)]
    pub steps: Vec<ReplayStep>,
}

impl ReplayScript {
    pub fn from_json(json: &str) -> Result<Self, AttentionError> {
        let script: Self = serde_json::from_str(json)?;
        script.validate()?;
        Ok(script)
    }

    /// Steps must not go back in time, nor start before the page loaded
    pub fn validate(&self) -> Result<(), AttentionError> {
        check_monotonic(self.start_ms, &self.steps)
    }
}

/// Parse newline-delimited steps, skipping blank lines.
///
/// Line numbers in errors are one-based.
pub fn parse_steps_ndjson(input: &str) -> Result<Vec<ReplayStep>, AttentionError> {
    let mut steps = Vec::new();
    for (idx, line) in input.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let step: ReplayStep =
            serde_json::from_str(trimmed).map_err(|e| AttentionError::InvalidEvent {
                line: idx + 1,
                reason: e.to_string(),
            })?;
        steps.push(step);
    }
    Ok(steps)
}

fn check_monotonic(start_ms: EpochMillis, steps: &[ReplayStep]) -> Result<(), AttentionError> {
    let mut last = start_ms;
    for (idx, step) in steps.iter().enumerate() {
        if step.at_ms < last {
            return Err(AttentionError::OutOfOrder {
                step: idx + 1,
                at_ms: step.at_ms,
                previous_ms: last,
            });
        }
        last = step.at_ms;
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedEmission {
    pub at_ms: EpochMillis,
    #[serde(flatten)]
    pub emission: Emission,
}

/// Totals over everything a replay emitted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaySummary {
    /// Sum of coarse bucket records
    pub bucket_ms: u64,
    /// Sum of detailed active segments
    pub active_ms: u64,
    /// Sum of detailed blurred segments
    pub blurred_ms: u64,
    /// Blurred time dropped at teardown because navigation was marked
    pub discarded_ms: u64,
    /// Time from page load to teardown, or to the last step if never torn down
    pub elapsed_ms: u64,
    pub deliveries: usize,
    pub warnings: usize,
    /// Signals that changed nothing (duplicates, or after teardown)
    pub ignored_signals: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayOutcome {
    pub emissions: Vec<TimedEmission>,
    pub final_phase: AttentionPhase,
    pub summary: ReplaySummary,
}

/// Run a script through the state machine
pub fn replay(script: &ReplayScript) -> Result<ReplayOutcome, AttentionError> {
    script.validate()?;

    let nav = NavigationContext::new(script.nav_window_ms);
    let mut machine = AttentionMachine::new(
        script.session_id.clone(),
        script.tracker.clone(),
        script.initial,
        script.start_ms,
    );

    let mut emissions = Vec::new();
    let mut summary = ReplaySummary::default();
    let mut end = script.start_ms;

    for step in &script.steps {
        if !machine.is_closed() {
            end = step.at_ms;
        }

        let Some(signal) = step.action.browser_signal() else {
            nav.mark(step.at_ms);
            continue;
        };

        let event = signal.event();
        let nav_marked = nav.is_marked(step.at_ms);

        if let (AttentionPhase::Blurred { since }, TrackerEvent::Teardown, true) =
            (machine.phase(), event, nav_marked)
        {
            summary.discarded_ms += step.at_ms.saturating_sub(since).max(0) as u64;
        }

        let before = machine.phase();
        let out = machine.step(event, step.at_ms, nav_marked);
        if out.is_empty() && before == machine.phase() {
            summary.ignored_signals += 1;
        }

        for emission in out {
            tally(&mut summary, &emission);
            emissions.push(TimedEmission {
                at_ms: step.at_ms,
                emission,
            });
        }
    }

    summary.elapsed_ms = end.saturating_sub(script.start_ms).max(0) as u64;

    Ok(ReplayOutcome {
        emissions,
        final_phase: machine.phase(),
        summary,
    })
}

fn tally(summary: &mut ReplaySummary, emission: &Emission) {
    match emission {
        Emission::Warn(_) => summary.warnings += 1,
        Emission::Deliver(delivery) => {
            summary.deliveries += 1;
            match &delivery.record {
                LogRecord::Attention(log) => summary.bucket_ms += log.elapsed_ms,
                LogRecord::RcEvent(rc) => match rc.status {
                    SegmentKind::Active => summary.active_ms += rc.duration_ms,
                    SegmentKind::Blurred => summary.blurred_ms += rc.duration_ms,
                },
                LogRecord::ParticipationEnd(_) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DeliveryMode, PageContext};
    use pretty_assertions::assert_eq;

    const T0: EpochMillis = 1_700_000_000_000;

    fn step(offset: EpochMillis, action: ReplayAction) -> ReplayStep {
        ReplayStep {
            at_ms: T0 + offset,
            action,
        }
    }

    fn script(steps: Vec<ReplayStep>) -> ReplayScript {
        ReplayScript {
            session_id: "sess".to_string(),
            tracker: TrackerConfig::new("reading_task1")
                .with_context(PageContext::new("bees", "p1"))
                .with_refocus_warning(Some(5_000)),
            initial: FocusSample::focused(),
            start_ms: T0,
            nav_window_ms: 2_000,
            steps,
        }
    }

    #[test]
    fn test_parse_ndjson_steps() {
        let input = r#"
{"at_ms": 10, "signal": "window_blur"}

{"at_ms": 20, "signal": "visibility_change", "hidden": false}
{"at_ms": 25, "signal": "nav_mark"}
"#;
        let steps = parse_steps_ndjson(input).unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[1].action, ReplayAction::VisibilityChange { hidden: false });
        assert_eq!(steps[2].action, ReplayAction::NavMark);
    }

    #[test]
    fn test_parse_reports_line_number() {
        let input = "{\"at_ms\": 1, \"signal\": \"window_focus\"}\n{\"at_ms\": 2, \"signal\": \"wave\"}\n";
        match parse_steps_ndjson(input) {
            Err(AttentionError::InvalidEvent { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_out_of_order_steps_rejected() {
        let bad = script(vec![
            step(500, ReplayAction::WindowBlur),
            step(100, ReplayAction::WindowFocus),
        ]);
        match replay(&bad) {
            Err(AttentionError::OutOfOrder { step, previous_ms, .. }) => {
                assert_eq!(step, 2);
                assert_eq!(previous_ms, T0 + 500);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_scenario_long_blur_with_warning() {
        let outcome = replay(&script(vec![
            step(3_000, ReplayAction::WindowBlur),
            step(13_000, ReplayAction::WindowFocus),
            step(14_000, ReplayAction::PageHide),
        ]))
        .unwrap();

        let summary = &outcome.summary;
        assert_eq!(summary.warnings, 1);
        assert_eq!(summary.active_ms, 4_000);
        assert_eq!(summary.blurred_ms, 10_000);
        assert_eq!(summary.bucket_ms, 4_000);
        assert_eq!(summary.elapsed_ms, 14_000);
        assert_eq!(outcome.final_phase, AttentionPhase::Closed);
    }

    #[test]
    fn test_scenario_navigation_before_unload() {
        // Focused 3s, blurred, navigation marked 1s before teardown at 2s of blur
        let outcome = replay(&script(vec![
            step(3_000, ReplayAction::WindowBlur),
            step(4_000, ReplayAction::NavMark),
            step(5_000, ReplayAction::PageHide),
            step(5_001, ReplayAction::BeforeUnload),
        ]))
        .unwrap();

        let summary = &outcome.summary;
        assert_eq!(summary.active_ms, 3_000);
        assert_eq!(summary.blurred_ms, 0);
        assert_eq!(summary.discarded_ms, 2_000);
        assert_eq!(summary.deliveries, 2);
        assert_eq!(summary.ignored_signals, 1);
        assert_eq!(
            summary.active_ms + summary.blurred_ms + summary.discarded_ms,
            summary.elapsed_ms
        );
        assert!(outcome
            .emissions
            .iter()
            .filter_map(|e| e.emission.as_delivery())
            .all(|d| d.mode == DeliveryMode::Standard));
    }

    #[test]
    fn test_duplicate_signals_counted_as_ignored() {
        let outcome = replay(&script(vec![
            step(1_000, ReplayAction::WindowBlur),
            step(1_001, ReplayAction::VisibilityChange { hidden: true }),
            step(2_000, ReplayAction::WindowFocus),
            step(2_000, ReplayAction::VisibilityChange { hidden: false }),
        ]))
        .unwrap();

        assert_eq!(outcome.summary.ignored_signals, 2);
        assert_eq!(outcome.summary.warnings, 0);
        assert_eq!(outcome.final_phase, AttentionPhase::Active { since: T0 + 2_000 });
    }

    #[test]
    fn test_script_from_json_defaults() {
        let json = r#"{
            "session_id": "s",
            "tracker": {"bucket": "vocabulary"},
            "start_ms": 0,
            "steps": [{"at_ms": 1500, "signal": "before_unload"}]
        }"#;
        let script = ReplayScript::from_json(json).unwrap();
        assert_eq!(script.initial, FocusSample::focused());
        assert_eq!(script.nav_window_ms, 2_000);

        let outcome = replay(&script).unwrap();
        assert_eq!(outcome.summary.bucket_ms, 1_500);
        assert_eq!(outcome.summary.active_ms, 0);
    }
}
