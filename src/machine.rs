//! Attention state machine
//!
//! A page load owns one machine. The machine is always in exactly one phase:
//! the active clock is running, the blurred clock is running, or the page has
//! been torn down and both are stopped. Keeping the clocks in a single enum
//! makes "both running" unrepresentable.
//!
//! [`transition`] is pure: it takes the current phase, an event and the time,
//! and returns the next phase with the records to deliver. It performs no I/O.

use serde::{Deserialize, Serialize};

use crate::config::BucketTimePolicy;
use crate::types::{
    AttentionLog, AttentionSegment, Delivery, DeliveryMode, Emission, EpochMillis, LogRecord,
    PageContext, RcEventLog, SegmentKind, TrackerEvent, UNATTRIBUTED_PAGE,
};
use crate::warning::RefocusWarningPolicy;

/// Which clock is running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum AttentionPhase {
    Active { since: EpochMillis },
    Blurred { since: EpochMillis },
    /// Torn down; every further signal is ignored
    Closed,
}

impl AttentionPhase {
    pub fn focused(&self) -> bool {
        matches!(self, AttentionPhase::Active { .. })
    }

    pub fn active_start(&self) -> Option<EpochMillis> {
        match self {
            AttentionPhase::Active { since } => Some(*since),
            _ => None,
        }
    }

    pub fn blur_start(&self) -> Option<EpochMillis> {
        match self {
            AttentionPhase::Blurred { since } => Some(*since),
            _ => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, AttentionPhase::Closed)
    }
}

/// Focus state observed when the page starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FocusSample {
    /// Document visibility is "hidden"
    pub hidden: bool,
    /// The window reports having focus
    pub has_focus: bool,
}

impl FocusSample {
    pub fn focused() -> Self {
        Self {
            hidden: false,
            has_focus: true,
        }
    }

    pub fn blurred() -> Self {
        Self {
            hidden: false,
            has_focus: false,
        }
    }

    pub fn is_focused(&self) -> bool {
        !self.hidden && self.has_focus
    }
}

/// What a page tracks and how it reports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Coarse task-phase label, e.g. "reading_task1"
    pub bucket: String,
    /// Passage attribution; enables detailed segments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<PageContext>,
    /// Blur length that triggers a refocus warning; needs `context`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warn_threshold_ms: Option<u64>,
    #[serde(default)]
    pub bucket_time: BucketTimePolicy,
}

impl TrackerConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            context: None,
            warn_threshold_ms: None,
            bucket_time: BucketTimePolicy::Always,
        }
    }

    pub fn with_context(mut self, context: PageContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_refocus_warning(mut self, threshold_ms: Option<u64>) -> Self {
        self.warn_threshold_ms = threshold_ms;
        self
    }

    pub fn with_bucket_time(mut self, policy: BucketTimePolicy) -> Self {
        self.bucket_time = policy;
        self
    }

    /// The warning policy, which only applies to pages with passage context
    pub fn refocus_policy(&self) -> Option<RefocusWarningPolicy> {
        match (&self.context, self.warn_threshold_ms) {
            (Some(_), Some(threshold)) => Some(RefocusWarningPolicy::new(threshold)),
            _ => None,
        }
    }

    fn reports_bucket_time(&self) -> bool {
        match self.bucket_time {
            BucketTimePolicy::Always => true,
            BucketTimePolicy::ContextOnly => self.context.is_some(),
        }
    }
}

/// One input to the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signal {
    pub event: TrackerEvent,
    pub at: EpochMillis,
    /// The in-app navigation flag as read at `at`
    pub nav_marked: bool,
}

impl Signal {
    pub fn new(event: TrackerEvent, at: EpochMillis, nav_marked: bool) -> Self {
        Self {
            event,
            at,
            nav_marked,
        }
    }
}

/// Advance the machine by one signal.
///
/// Duplicate signals (focus while focused, blur while blurred) and anything
/// after teardown leave the phase unchanged and emit nothing.
pub fn transition(
    phase: AttentionPhase,
    session_id: &str,
    config: &TrackerConfig,
    signal: Signal,
) -> (AttentionPhase, Vec<Emission>) {
    let now = signal.at;
    let mut out = Vec::new();

    let next = match (phase, signal.event) {
        (AttentionPhase::Closed, _) => AttentionPhase::Closed,

        (AttentionPhase::Active { .. }, TrackerEvent::FocusGained) => phase,
        (AttentionPhase::Blurred { .. }, TrackerEvent::FocusLost) => phase,

        (AttentionPhase::Blurred { since }, TrackerEvent::FocusGained) => {
            let prior_blur_ms = elapsed_ms(since, now);
            emit_blurred(&mut out, session_id, config, since, now, DeliveryMode::Standard);

            if let Some(policy) = config.refocus_policy() {
                if let Some(warning) = policy.evaluate(prior_blur_ms, signal.nav_marked) {
                    out.push(Emission::Warn(warning));
                }
            }
            AttentionPhase::Active { since: now }
        }

        (AttentionPhase::Active { since }, TrackerEvent::FocusLost) => {
            emit_active(&mut out, session_id, config, since, now, DeliveryMode::Standard);
            AttentionPhase::Blurred { since: now }
        }

        (AttentionPhase::Active { since }, TrackerEvent::Teardown) => {
            emit_active(&mut out, session_id, config, since, now, DeliveryMode::UnloadSafe);
            AttentionPhase::Closed
        }

        (AttentionPhase::Blurred { since }, TrackerEvent::Teardown) => {
            // Leaving through an in-app link is moving on, not a lapse; the
            // blurred span is dropped rather than misattributed.
            if !signal.nav_marked {
                emit_blurred(&mut out, session_id, config, since, now, DeliveryMode::UnloadSafe);
            }
            AttentionPhase::Closed
        }
    };

    (next, out)
}

fn elapsed_ms(start: EpochMillis, end: EpochMillis) -> u64 {
    end.saturating_sub(start).max(0) as u64
}

fn emit_active(
    out: &mut Vec<Emission>,
    session_id: &str,
    config: &TrackerConfig,
    start: EpochMillis,
    end: EpochMillis,
    mode: DeliveryMode,
) {
    let Some(segment) = AttentionSegment::close(SegmentKind::Active, start, end) else {
        return;
    };

    if config.reports_bucket_time() {
        out.push(deliver(
            mode,
            LogRecord::Attention(AttentionLog {
                session_id: session_id.to_string(),
                bucket: config.bucket.clone(),
                elapsed_ms: segment.duration_ms,
            }),
        ));
    }

    if let Some(context) = &config.context {
        out.push(deliver(
            mode,
            rc_event(session_id, &context.passage_id, &context.page_name, segment),
        ));
    }
}

fn emit_blurred(
    out: &mut Vec<Emission>,
    session_id: &str,
    config: &TrackerConfig,
    start: EpochMillis,
    end: EpochMillis,
    mode: DeliveryMode,
) {
    let Some(context) = &config.context else {
        return;
    };
    if let Some(segment) = AttentionSegment::close(SegmentKind::Blurred, start, end) {
        out.push(deliver(
            mode,
            rc_event(session_id, &context.passage_id, UNATTRIBUTED_PAGE, segment),
        ));
    }
}

fn rc_event(session_id: &str, passage_id: &str, page_name: &str, segment: AttentionSegment) -> LogRecord {
    LogRecord::RcEvent(RcEventLog {
        session_id: session_id.to_string(),
        passage_id: passage_id.to_string(),
        page_name: page_name.to_string(),
        status: segment.kind,
        start_time: segment.start_time,
        duration_ms: segment.duration_ms,
    })
}

fn deliver(mode: DeliveryMode, record: LogRecord) -> Emission {
    Emission::Deliver(Delivery { mode, record })
}

/// A machine bound to one session and page configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttentionMachine {
    session_id: String,
    config: TrackerConfig,
    phase: AttentionPhase,
}

impl AttentionMachine {
    /// Start the clock that matches the sampled focus state
    pub fn new(
        session_id: impl Into<String>,
        config: TrackerConfig,
        sample: FocusSample,
        now: EpochMillis,
    ) -> Self {
        let phase = if sample.is_focused() {
            AttentionPhase::Active { since: now }
        } else {
            AttentionPhase::Blurred { since: now }
        };
        Self {
            session_id: session_id.into(),
            config,
            phase,
        }
    }

    pub fn step(&mut self, event: TrackerEvent, now: EpochMillis, nav_marked: bool) -> Vec<Emission> {
        let (next, emissions) = transition(
            self.phase,
            &self.session_id,
            &self.config,
            Signal::new(event, now, nav_marked),
        );
        self.phase = next;
        emissions
    }

    pub fn phase(&self) -> AttentionPhase {
        self.phase
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn focused(&self) -> bool {
        self.phase.focused()
    }

    pub fn active_start(&self) -> Option<EpochMillis> {
        self.phase.active_start()
    }

    pub fn blur_start(&self) -> Option<EpochMillis> {
        self.phase.blur_start()
    }

    pub fn is_closed(&self) -> bool {
        self.phase.is_closed()
    }
}
