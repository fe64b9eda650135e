//! Instrument page catalogue
//!
//! Each page of the study decides what its tracker measures: the bucket its
//! active time rolls up into, whether segments are attributed to a passage,
//! and whether a long absence earns a warning. Pages that need a session
//! redirect to consent when there is none.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::InstrumentConfig;
use crate::delivery::dispatch;
use crate::error::AttentionError;
use crate::machine::{FocusSample, TrackerConfig};
use crate::store::{KeyValueStore, SessionStore};
use crate::tracker::{AttentionTracker, PageEnv};
use crate::types::{Delivery, DeliveryMode, LogRecord, PageContext, ParticipationEnd};

const PARTICIPATION_END_SENT_KEY: &str = "participation_end_sent";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "page", rename_all = "snake_case")]
pub enum Page {
    Consent,
    Demographic,
    RcInstructions,
    /// Reading passage at `index` of the assigned list
    Passage { index: usize },
    /// Question `question` (zero-based) for the passage at `index`
    Questions { index: usize, question: u32 },
    PostTask { index: usize },
    VocabInstruction,
    Vocab,
    FinalCheck,
    Thanks,
}

/// Where a page must send the participant instead of rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Redirect {
    Consent,
}

impl Redirect {
    pub fn location(&self) -> &'static str {
        match self {
            Redirect::Consent => "consent.html",
        }
    }
}

/// How a page is tracked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "plan", rename_all = "snake_case")]
pub enum PagePlan {
    Track(TrackerConfig),
    Redirect(Redirect),
    Untracked,
}

impl Page {
    /// Resolve a page from its `data-page` name and query parameters
    pub fn parse(name: &str, index: Option<usize>, question: Option<u32>) -> Result<Self, AttentionError> {
        let index = index.unwrap_or(0);
        let page = match name {
            "consent" => Page::Consent,
            "demographic" => Page::Demographic,
            "rc_instructions" => Page::RcInstructions,
            "passage" => Page::Passage { index },
            "questions" => Page::Questions {
                index,
                question: question.unwrap_or(0),
            },
            "posttask" => Page::PostTask { index },
            "vocab_instruction" => Page::VocabInstruction,
            "vocab" => Page::Vocab,
            "final_check" => Page::FinalCheck,
            "thanks" => Page::Thanks,
            other => return Err(AttentionError::UnknownPage(other.to_string())),
        };
        Ok(page)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Page::Consent => "consent",
            Page::Demographic => "demographic",
            Page::RcInstructions => "rc_instructions",
            Page::Passage { .. } => "passage",
            Page::Questions { .. } => "questions",
            Page::PostTask { .. } => "posttask",
            Page::VocabInstruction => "vocab_instruction",
            Page::Vocab => "vocab",
            Page::FinalCheck => "final_check",
            Page::Thanks => "thanks",
        }
    }

    /// Index into the assigned passages, for pages tied to one
    pub fn passage_index(&self) -> Option<usize> {
        match *self {
            Page::Passage { index } | Page::Questions { index, .. } | Page::PostTask { index } => Some(index),
            _ => None,
        }
    }

    pub fn requires_session(&self) -> bool {
        !matches!(self, Page::Consent | Page::Thanks)
    }

    /// Work out what this page tracks, given the participant's state
    pub fn plan<S: KeyValueStore>(
        &self,
        store: &SessionStore<S>,
        config: &InstrumentConfig,
    ) -> PagePlan {
        if self.requires_session() && store.session_id().is_none() {
            return PagePlan::Redirect(Redirect::Consent);
        }

        let plain = |bucket: &str| {
            PagePlan::Track(TrackerConfig::new(bucket).with_bucket_time(config.bucket_time))
        };

        match *self {
            Page::Consent => plain("consent"),
            Page::Demographic => plain("demographic"),
            Page::RcInstructions => plain("reading_instruction"),
            Page::VocabInstruction | Page::Vocab => plain("vocabulary"),
            Page::FinalCheck | Page::Thanks => PagePlan::Untracked,

            Page::PostTask { index } => match store.passage_at(index) {
                Some(_) => plain(&format!("survey_task{}", index + 1)),
                None => PagePlan::Redirect(Redirect::Consent),
            },

            Page::Passage { index } => match store.passage_at(index) {
                Some(passage_id) => reading_plan(config, index, passage_id, format!("p{}", index + 1)),
                None => PagePlan::Redirect(Redirect::Consent),
            },

            Page::Questions { index, question } => match store.passage_at(index) {
                Some(passage_id) => reading_plan(
                    config,
                    index,
                    passage_id,
                    format!("p{}q{}", index + 1, question + 1),
                ),
                None => PagePlan::Redirect(Redirect::Consent),
            },
        }
    }
}

fn reading_plan(config: &InstrumentConfig, index: usize, passage_id: String, page_name: String) -> PagePlan {
    PagePlan::Track(
        TrackerConfig::new(format!("reading_task{}", index + 1))
            .with_context(PageContext::new(passage_id, page_name))
            .with_refocus_warning(config.refocus_warn_ms)
            .with_bucket_time(config.bucket_time),
    )
}

/// Result of opening a page
#[derive(Debug)]
pub enum PageStart<'a> {
    Tracking(AttentionTracker<'a>),
    Redirect(Redirect),
    Untracked,
}

/// Run the page's start-up: redirect, start a tracker, or, on the thanks
/// page, record the end of participation.
pub fn open_page<'a, S: KeyValueStore>(
    page: Page,
    env: PageEnv<'a>,
    store: &SessionStore<S>,
    config: &InstrumentConfig,
    sample: FocusSample,
) -> PageStart<'a> {
    if page == Page::Thanks {
        record_participation_end(env, store);
    }

    match page.plan(store, config) {
        PagePlan::Track(tracker_config) => {
            PageStart::Tracking(AttentionTracker::start(env, store, tracker_config, sample))
        }
        PagePlan::Redirect(redirect) => {
            debug!(page = page.name(), to = redirect.location(), "redirecting");
            PageStart::Redirect(redirect)
        }
        PagePlan::Untracked => PageStart::Untracked,
    }
}

/// Send the participation-end marker for this session, once.
///
/// Returns whether a marker was handed to the channel.
pub fn record_participation_end<S: KeyValueStore>(env: PageEnv<'_>, store: &SessionStore<S>) -> bool {
    let Some(session_id) = store.session_id() else {
        return false;
    };
    if store.inner().get(PARTICIPATION_END_SENT_KEY).as_deref() == Some(session_id.as_str()) {
        debug!("participation end already recorded");
        return false;
    }

    let delivery = Delivery {
        mode: DeliveryMode::UnloadSafe,
        record: LogRecord::ParticipationEnd(ParticipationEnd {
            session_id: session_id.clone(),
            finished_at_ms: env.clock.now_ms(),
        }),
    };

    match dispatch(env.channel, &delivery) {
        Ok(()) => {
            info!("participation end recorded");
            if let Err(err) = store.inner().set(PARTICIPATION_END_SENT_KEY, &session_id) {
                debug!(error = %err, "could not remember participation end");
            }
            true
        }
        Err(err) => {
            debug!(error = %err, "participation end dropped");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::delivery::RecordingChannel;
    use crate::navigation::NavigationContext;
    use crate::store::MemoryStore;
    use crate::types::DeliveryMode;
    use crate::warning::NoWarnings;
    use pretty_assertions::assert_eq;

    fn session_store() -> SessionStore<MemoryStore> {
        let store = SessionStore::new(MemoryStore::new());
        store.set_session_id("sess-7").unwrap();
        store
            .set_assigned_passages(&["bees".to_string(), "tides".to_string()])
            .unwrap();
        store
    }

    fn tracked(plan: PagePlan) -> TrackerConfig {
        match plan {
            PagePlan::Track(config) => config,
            other => panic!("expected tracking plan, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_pages() {
        assert_eq!(Page::parse("passage", Some(1), None).unwrap(), Page::Passage { index: 1 });
        assert_eq!(
            Page::parse("questions", Some(0), Some(2)).unwrap(),
            Page::Questions { index: 0, question: 2 }
        );
        assert_eq!(Page::PostTask { index: 3 }.passage_index(), Some(3));
        assert_eq!(Page::Vocab.passage_index(), None);
        assert!(matches!(
            Page::parse("lobby", None, None),
            Err(AttentionError::UnknownPage(_))
        ));
    }

    #[test]
    fn test_passage_plan_has_context_and_warning() {
        let store = session_store();
        let config = tracked(Page::Passage { index: 1 }.plan(&store, &InstrumentConfig::default()));

        assert_eq!(config.bucket, "reading_task2");
        assert_eq!(config.context, Some(PageContext::new("tides", "p2")));
        assert_eq!(config.warn_threshold_ms, Some(5_000));
    }

    #[test]
    fn test_question_plan_page_name() {
        let store = session_store();
        let config = tracked(
            Page::Questions { index: 0, question: 2 }.plan(&store, &InstrumentConfig::default()),
        );
        assert_eq!(config.bucket, "reading_task1");
        assert_eq!(config.context.unwrap().page_name, "p1q3");
    }

    #[test]
    fn test_plain_pages_have_no_context() {
        let store = session_store();
        let defaults = InstrumentConfig::default();

        let posttask = tracked(Page::PostTask { index: 0 }.plan(&store, &defaults));
        assert_eq!(posttask.bucket, "survey_task1");
        assert!(posttask.context.is_none());
        assert!(posttask.refocus_policy().is_none());

        assert_eq!(tracked(Page::Vocab.plan(&store, &defaults)).bucket, "vocabulary");
        assert_eq!(Page::FinalCheck.plan(&store, &defaults), PagePlan::Untracked);
    }

    #[test]
    fn test_missing_session_or_passage_redirects() {
        let empty = SessionStore::new(MemoryStore::new());
        let defaults = InstrumentConfig::default();
        assert_eq!(
            Page::RcInstructions.plan(&empty, &defaults),
            PagePlan::Redirect(Redirect::Consent)
        );
        assert!(matches!(Page::Consent.plan(&empty, &defaults), PagePlan::Track(_)));

        let store = session_store();
        assert_eq!(
            Page::Passage { index: 5 }.plan(&store, &defaults),
            PagePlan::Redirect(Redirect::Consent)
        );
    }

    #[test]
    fn test_warning_threshold_follows_config() {
        let store = session_store();
        let config = InstrumentConfig {
            refocus_warn_ms: None,
            ..InstrumentConfig::default()
        };
        let plan = tracked(Page::Passage { index: 0 }.plan(&store, &config));
        assert!(plan.refocus_policy().is_none());
    }

    #[test]
    fn test_thanks_sends_participation_end_once() {
        let store = session_store();
        let nav = NavigationContext::default();
        let channel = RecordingChannel::new();
        let clock = ManualClock::new(1_700_000_999_000);
        let env = PageEnv {
            nav: &nav,
            channel: &channel,
            presenter: &NoWarnings,
            clock: &clock,
        };
        let config = InstrumentConfig::default();

        assert!(matches!(
            open_page(Page::Thanks, env, &store, &config, FocusSample::focused()),
            PageStart::Untracked
        ));
        assert!(matches!(
            open_page(Page::Thanks, env, &store, &config, FocusSample::focused()),
            PageStart::Untracked
        ));

        let sent = channel.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].mode, DeliveryMode::UnloadSafe);
        assert_eq!(sent[0].path, "/api/log/participation_end");
        assert_eq!(
            sent[0].body,
            serde_json::json!({"session_id": "sess-7", "finished_at_ms": 1_700_000_999_000i64})
        );
    }

    #[test]
    fn test_open_passage_starts_tracker() {
        let store = session_store();
        let nav = NavigationContext::default();
        let channel = RecordingChannel::new();
        let clock = ManualClock::new(0);
        let env = PageEnv {
            nav: &nav,
            channel: &channel,
            presenter: &NoWarnings,
            clock: &clock,
        };

        match open_page(
            Page::Passage { index: 0 },
            env,
            &store,
            &InstrumentConfig::default(),
            FocusSample::focused(),
        ) {
            PageStart::Tracking(tracker) => {
                assert!(!tracker.is_inert());
                assert_eq!(tracker.machine().unwrap().config().bucket, "reading_task1");
            }
            other => panic!("expected tracker, got {:?}", other),
        }
    }
}
