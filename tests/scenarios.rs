//! End-to-end page flows through the public API

use attention_flux::delivery::SentRecord;
use attention_flux::pages::Redirect;
use attention_flux::store::FileStore;
use attention_flux::{
    open_page, replay, AttentionPhase, BrowserSignal, CollectedWarnings, DeliveryMode, FocusSample,
    InstrumentConfig, ManualClock, MemoryStore, NavigationContext, Page, PageEnv, PageStart,
    RecordingChannel, ReplayScript, SessionStore,
};
use pretty_assertions::assert_eq;

const T0: i64 = 1_700_000_000_000;

struct Browser {
    nav: NavigationContext,
    channel: RecordingChannel,
    warnings: CollectedWarnings,
    clock: ManualClock,
}

impl Browser {
    fn new() -> Self {
        Self {
            nav: NavigationContext::default(),
            channel: RecordingChannel::new(),
            warnings: CollectedWarnings::new(),
            clock: ManualClock::new(T0),
        }
    }

    fn env(&self) -> PageEnv<'_> {
        PageEnv {
            nav: &self.nav,
            channel: &self.channel,
            presenter: &self.warnings,
            clock: &self.clock,
        }
    }
}

fn enrolled() -> SessionStore<MemoryStore> {
    let store = SessionStore::new(MemoryStore::new());
    store.set_session_id("sess-42").unwrap();
    store
        .set_assigned_passages(&["bees".to_string(), "tides".to_string()])
        .unwrap();
    store
}

fn rc_events(sent: &[SentRecord]) -> Vec<&SentRecord> {
    sent.iter().filter(|s| s.path == "/api/log/rc_event").collect()
}

#[test]
fn long_blur_on_passage_warns_and_reports_both_segments() {
    let browser = Browser::new();
    let store = enrolled();
    let config = InstrumentConfig::default();

    let PageStart::Tracking(mut tracker) = open_page(
        Page::Passage { index: 0 },
        browser.env(),
        &store,
        &config,
        FocusSample::focused(),
    ) else {
        panic!("passage page should be tracked");
    };

    browser.clock.advance(3_000);
    tracker.on_signal(BrowserSignal::WindowBlur);
    browser.clock.advance(10_000);
    tracker.on_signal(BrowserSignal::WindowFocus);

    let warnings = browser.warnings.take();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].blurred_ms, 10_000);

    let sent = browser.channel.take();
    let rc = rc_events(&sent);
    assert_eq!(rc.len(), 2);
    assert_eq!(rc[0].body["status"], "active");
    assert_eq!(rc[0].body["page_name"], "p1");
    assert_eq!(rc[0].body["duration_ms"], 3_000);
    assert_eq!(rc[1].body["status"], "blur");
    assert_eq!(rc[1].body["page_name"], "unknown");
    assert_eq!(rc[1].body["duration_ms"], 10_000);
    assert_eq!(rc[1].body["start_time"], T0 + 3_000);
}

#[test]
fn navigating_away_while_blurred_drops_the_blur() {
    let browser = Browser::new();
    let store = enrolled();
    let config = InstrumentConfig::default();

    let PageStart::Tracking(mut tracker) = open_page(
        Page::Questions { index: 1, question: 0 },
        browser.env(),
        &store,
        &config,
        FocusSample::focused(),
    ) else {
        panic!("question page should be tracked");
    };

    browser.clock.advance(3_000);
    tracker.on_focus_lost();
    browser.clock.advance(1_000);
    browser.env().mark_navigation();
    browser.clock.advance(1_000);
    tracker.on_signal(BrowserSignal::PageHide);
    tracker.on_signal(BrowserSignal::BeforeUnload);

    let sent = browser.channel.take();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|s| s.mode == DeliveryMode::Standard));
    assert_eq!(sent[0].body["bucket"], "reading_task2");
    assert_eq!(sent[0].body["elapsed_ms"], 3_000);
    assert_eq!(sent[1].body["page_name"], "p2q1");
    assert!(browser.warnings.is_empty());
    assert_eq!(tracker.phase(), Some(AttentionPhase::Closed));
}

#[test]
fn every_page_load_reports_its_own_time() {
    let browser = Browser::new();
    let store = enrolled();
    let config = InstrumentConfig::default();

    for page in [Page::Demographic, Page::RcInstructions, Page::PostTask { index: 0 }] {
        let PageStart::Tracking(mut tracker) =
            open_page(page, browser.env(), &store, &config, FocusSample::focused())
        else {
            panic!("{} should be tracked", page.name());
        };
        browser.clock.advance(1_500);
        browser.env().mark_navigation();
        tracker.teardown();
    }

    let sent = browser.channel.take();
    let buckets: Vec<&str> = sent.iter().map(|s| s.body["bucket"].as_str().unwrap()).collect();
    assert_eq!(buckets, vec!["demographic", "reading_instruction", "survey_task1"]);
    assert!(sent.iter().all(|s| s.mode == DeliveryMode::UnloadSafe));
    assert!(sent.iter().all(|s| s.body["elapsed_ms"] == 1_500));
}

#[test]
fn pages_before_consent_redirect_or_stay_silent() {
    let browser = Browser::new();
    let store = SessionStore::new(MemoryStore::new());
    let config = InstrumentConfig::default();

    let start = open_page(
        Page::Passage { index: 0 },
        browser.env(),
        &store,
        &config,
        FocusSample::focused(),
    );
    assert!(matches!(start, PageStart::Redirect(Redirect::Consent)));

    let PageStart::Tracking(mut tracker) =
        open_page(Page::Consent, browser.env(), &store, &config, FocusSample::focused())
    else {
        panic!("consent page should start a tracker");
    };
    assert!(tracker.is_inert());
    browser.clock.advance(5_000);
    assert!(tracker.teardown().is_empty());
    assert!(browser.channel.is_empty());
}

#[test]
fn participation_end_survives_reload_of_thanks_page() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    let browser = Browser::new();
    let config = InstrumentConfig::default();

    {
        let store = SessionStore::new(FileStore::open(&path).unwrap());
        store.set_session_id("sess-42").unwrap();
        let start = open_page(Page::Thanks, browser.env(), &store, &config, FocusSample::focused());
        assert!(matches!(start, PageStart::Untracked));
    }

    let store = SessionStore::new(FileStore::open(&path).unwrap());
    open_page(Page::Thanks, browser.env(), &store, &config, FocusSample::focused());

    let sent = browser.channel.take();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].path, "/api/log/participation_end");
    assert_eq!(sent[0].mode, DeliveryMode::UnloadSafe);
}

#[test]
fn replayed_time_is_conserved() {
    let script = ReplayScript::from_json(
        r#"{
            "session_id": "sess-42",
            "tracker": {
                "bucket": "reading_task1",
                "context": {"passage_id": "bees", "page_name": "p1"},
                "warn_threshold_ms": 5000
            },
            "start_ms": 0,
            "steps": [
                {"at_ms": 1200, "signal": "visibility_change", "hidden": true},
                {"at_ms": 1250, "signal": "window_blur"},
                {"at_ms": 4000, "signal": "window_focus"},
                {"at_ms": 9000, "signal": "window_blur"},
                {"at_ms": 17000, "signal": "visibility_change", "hidden": false},
                {"at_ms": 20000, "signal": "page_hide"}
            ]
        }"#,
    )
    .unwrap();

    let summary = replay(&script).unwrap().summary;
    assert_eq!(summary.active_ms + summary.blurred_ms, summary.elapsed_ms);
    assert_eq!(summary.active_ms, summary.bucket_ms);
    assert_eq!(summary.blurred_ms, 2_800 + 8_000);
    assert_eq!(summary.warnings, 1);
    assert_eq!(summary.ignored_signals, 1);
}
