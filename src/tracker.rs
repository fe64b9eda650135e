//! Per-page attention tracker
//!
//! [`AttentionTracker`] wires an [`AttentionMachine`] to the page's
//! environment: it reads the session id from the store, stamps time from the
//! clock, consults the navigation flag, hands deliveries to the channel and
//! shows refocus warnings. Without a session id the tracker is inert.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::delivery::{dispatch, DeliveryChannel};
use crate::machine::{AttentionMachine, AttentionPhase, FocusSample, TrackerConfig};
use crate::navigation::NavigationContext;
use crate::store::{KeyValueStore, SessionStore};
use crate::types::{Emission, TrackerEvent};
use crate::warning::WarningPresenter;

/// Raw page lifecycle signals as the browser names them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum BrowserSignal {
    WindowFocus,
    WindowBlur,
    VisibilityChange { hidden: bool },
    PageHide,
    BeforeUnload,
}

impl BrowserSignal {
    pub fn event(&self) -> TrackerEvent {
        match self {
            BrowserSignal::WindowFocus => TrackerEvent::FocusGained,
            BrowserSignal::WindowBlur => TrackerEvent::FocusLost,
            BrowserSignal::VisibilityChange { hidden } => TrackerEvent::from_visibility(*hidden),
            BrowserSignal::PageHide | BrowserSignal::BeforeUnload => TrackerEvent::Teardown,
        }
    }
}

/// Collaborators shared by everything running on one page
#[derive(Clone, Copy)]
pub struct PageEnv<'a> {
    pub nav: &'a NavigationContext,
    pub channel: &'a dyn DeliveryChannel,
    pub presenter: &'a dyn WarningPresenter,
    pub clock: &'a dyn Clock,
}

impl<'a> PageEnv<'a> {
    /// Flag the navigation the page controller is about to perform
    pub fn mark_navigation(&self) {
        self.nav.mark(self.clock.now_ms());
    }

    pub fn navigation_marked(&self) -> bool {
        self.nav.is_marked(self.clock.now_ms())
    }
}

/// What one signal produced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    /// Records accepted by the channel
    pub delivered: usize,
    /// Records the channel refused; these are gone
    pub dropped: usize,
    pub warnings: usize,
}

impl StepReport {
    pub fn is_empty(&self) -> bool {
        self.delivered == 0 && self.dropped == 0 && self.warnings == 0
    }
}

pub struct AttentionTracker<'a> {
    env: PageEnv<'a>,
    machine: Option<AttentionMachine>,
    instance_id: Uuid,
}

impl<'a> AttentionTracker<'a> {
    /// Start tracking a page.
    ///
    /// `sample` is the focus state at this instant. Pages reached before
    /// consent have no session id and get an inert tracker.
    pub fn start<S: KeyValueStore>(
        env: PageEnv<'a>,
        store: &SessionStore<S>,
        config: TrackerConfig,
        sample: FocusSample,
    ) -> Self {
        let instance_id = Uuid::new_v4();
        let machine = store.session_id().map(|session_id| {
            info!(
                tracker = %instance_id,
                bucket = %config.bucket,
                focused = sample.is_focused(),
                "attention tracking started"
            );
            AttentionMachine::new(session_id, config, sample, env.clock.now_ms())
        });

        if machine.is_none() {
            debug!(tracker = %instance_id, "no session, attention tracking disabled");
        }

        Self {
            env,
            machine,
            instance_id,
        }
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn is_inert(&self) -> bool {
        self.machine.is_none()
    }

    pub fn phase(&self) -> Option<AttentionPhase> {
        self.machine.as_ref().map(AttentionMachine::phase)
    }

    pub fn machine(&self) -> Option<&AttentionMachine> {
        self.machine.as_ref()
    }

    pub fn on_signal(&mut self, signal: BrowserSignal) -> StepReport {
        self.handle(signal.event())
    }

    pub fn on_focus_gained(&mut self) -> StepReport {
        self.handle(TrackerEvent::FocusGained)
    }

    pub fn on_focus_lost(&mut self) -> StepReport {
        self.handle(TrackerEvent::FocusLost)
    }

    pub fn on_visibility_change(&mut self, hidden: bool) -> StepReport {
        self.handle(TrackerEvent::from_visibility(hidden))
    }

    /// Close whatever segment is open, on the unload-safe path
    pub fn teardown(&mut self) -> StepReport {
        self.handle(TrackerEvent::Teardown)
    }

    pub fn handle(&mut self, event: TrackerEvent) -> StepReport {
        let Some(machine) = self.machine.as_mut() else {
            return StepReport::default();
        };

        let now = self.env.clock.now_ms();
        let nav_marked = self.env.nav.is_marked(now);
        let emissions = machine.step(event, now, nav_marked);

        if emissions.is_empty() {
            debug!(tracker = %self.instance_id, ?event, "no-op transition");
        }
        if event == TrackerEvent::Teardown && machine.is_closed() && !emissions.is_empty() {
            info!(tracker = %self.instance_id, nav_marked, "attention tracking flushed");
        }

        self.apply(&emissions)
    }

    fn apply(&self, emissions: &[Emission]) -> StepReport {
        let mut report = StepReport::default();
        for emission in emissions {
            match emission {
                Emission::Deliver(delivery) => {
                    // Delivery is best-effort: a failure is logged and the
                    // record is dropped, never surfaced to the participant.
                    match dispatch(self.env.channel, delivery) {
                        Ok(()) => report.delivered += 1,
                        Err(err) => {
                            debug!(
                                tracker = %self.instance_id,
                                path = delivery.record.path(),
                                error = %err,
                                "attention record dropped"
                            );
                            report.dropped += 1;
                        }
                    }
                }
                Emission::Warn(warning) => {
                    self.env.presenter.present(warning);
                    report.warnings += 1;
                }
            }
        }
        report
    }
}

impl std::fmt::Debug for AttentionTracker<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttentionTracker")
            .field("instance_id", &self.instance_id)
            .field("machine", &self.machine)
            .finish()
    }
}
