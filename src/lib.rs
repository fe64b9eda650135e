//! attention-flux - Attention tracking for reading-comprehension study pages
//!
//! Each page load runs a small focus state machine: focused time is reported
//! against the page's task bucket and, on passage and question pages, as
//! detailed active/blurred segments. Long absences earn a refocus warning,
//! and leaving through an in-app link is not counted as a lapse.
//!
//! ## Modules
//!
//! - **Machine**: pure phase transitions and the records they emit
//! - **Tracker**: binds a machine to a page's clock, transport and warnings
//! - **Pages**: the study's page catalogue and per-page tracking plans
//! - **Replay**: audits recorded signal logs offline

pub mod clock;
pub mod config;
pub mod delivery;
pub mod error;
pub mod machine;
pub mod navigation;
pub mod pages;
pub mod replay;
pub mod store;
pub mod tracker;
pub mod types;
pub mod warning;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BucketTimePolicy, InstrumentConfig};
pub use delivery::{dispatch, DeliveryChannel, DeliveryError, HttpChannel, RecordingChannel};
pub use error::AttentionError;
pub use machine::{transition, AttentionMachine, AttentionPhase, FocusSample, Signal, TrackerConfig};
pub use navigation::NavigationContext;
pub use pages::{open_page, record_participation_end, Page, PagePlan, PageStart};
pub use replay::{replay, ReplayOutcome, ReplayScript, ReplaySummary};
pub use store::{FileStore, KeyValueStore, MemoryStore, SessionStore};
pub use tracker::{AttentionTracker, BrowserSignal, PageEnv, StepReport};
pub use types::{Delivery, DeliveryMode, Emission, LogRecord, TrackerEvent};
pub use warning::{CollectedWarnings, NoWarnings, RefocusWarningPolicy, WarningPresenter};

/// Library version, reported by the CLI and FFI
pub const ATTN_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name used in diagnostics
pub const PRODUCER_NAME: &str = "attention-flux";
