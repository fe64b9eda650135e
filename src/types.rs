//! Core data types for attention tracking
//!
//! This module defines the segments, events, and log records that flow from the
//! attention state machine to the delivery channel.

use serde::{Deserialize, Serialize};

/// Endpoint receiving coarse per-bucket active time
pub const ATTENTION_PATH: &str = "/api/log/attention";

/// Endpoint receiving detailed reading-comprehension segments
pub const RC_EVENT_PATH: &str = "/api/log/rc_event";

/// Endpoint receiving the end-of-participation marker
pub const PARTICIPATION_END_PATH: &str = "/api/log/participation_end";

/// Page name attached to blurred segments, which have no page of their own
pub const UNATTRIBUTED_PAGE: &str = "unknown";

/// Milliseconds since the Unix epoch
pub type EpochMillis = i64;

/// Whether a segment was spent focused on the page or away from it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SegmentKind {
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "blur")]
    Blurred,
}

impl SegmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentKind::Active => "active",
            SegmentKind::Blurred => "blur",
        }
    }
}

/// A contiguous span of focused or unfocused time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttentionSegment {
    pub kind: SegmentKind,
    /// When the span began
    pub start_time: EpochMillis,
    /// Length of the span; always positive for emitted segments
    pub duration_ms: u64,
}

impl AttentionSegment {
    /// Close a span that began at `start` and ended at `end`.
    ///
    /// Returns `None` for zero or negative spans, which come from duplicate
    /// signals fired in the same millisecond or from a clock moving backwards.
    pub fn close(kind: SegmentKind, start: EpochMillis, end: EpochMillis) -> Option<Self> {
        let elapsed = end.checked_sub(start)?;
        if elapsed <= 0 {
            return None;
        }
        Some(Self {
            kind,
            start_time: start,
            duration_ms: elapsed as u64,
        })
    }

    pub fn end_time(&self) -> EpochMillis {
        self.start_time + self.duration_ms as EpochMillis
    }
}

/// Passage attribution for reading and question pages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageContext {
    pub passage_id: String,
    /// Label attached to active segments (e.g. "p1", "p2q3")
    pub page_name: String,
}

impl PageContext {
    pub fn new(passage_id: impl Into<String>, page_name: impl Into<String>) -> Self {
        Self {
            passage_id: passage_id.into(),
            page_name: page_name.into(),
        }
    }
}

/// Signals that drive the attention state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerEvent {
    /// Window focus, or the document became visible
    FocusGained,
    /// Window blur, or the document became hidden
    FocusLost,
    /// Page-hide or before-unload
    Teardown,
}

impl TrackerEvent {
    /// Fold a visibility change into a focus transition
    pub fn from_visibility(hidden: bool) -> Self {
        if hidden {
            TrackerEvent::FocusLost
        } else {
            TrackerEvent::FocusGained
        }
    }
}

/// How a record must be handed to the delivery channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Asynchronous request while the page is known to stay alive
    Standard,
    /// Beacon-style send that survives page destruction
    UnloadSafe,
}

/// `POST /api/log/attention` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttentionLog {
    pub session_id: String,
    pub bucket: String,
    pub elapsed_ms: u64,
}

/// `POST /api/log/rc_event` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RcEventLog {
    pub session_id: String,
    pub passage_id: String,
    pub page_name: String,
    pub status: SegmentKind,
    pub start_time: EpochMillis,
    pub duration_ms: u64,
}

/// `POST /api/log/participation_end` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipationEnd {
    pub session_id: String,
    pub finished_at_ms: EpochMillis,
}

/// Any record the instrument logs to the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum LogRecord {
    Attention(AttentionLog),
    RcEvent(RcEventLog),
    ParticipationEnd(ParticipationEnd),
}

impl LogRecord {
    /// API path the record is posted to
    pub fn path(&self) -> &'static str {
        match self {
            LogRecord::Attention(_) => ATTENTION_PATH,
            LogRecord::RcEvent(_) => RC_EVENT_PATH,
            LogRecord::ParticipationEnd(_) => PARTICIPATION_END_PATH,
        }
    }

    /// JSON request body, without the enum tag
    pub fn body(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            LogRecord::Attention(log) => serde_json::to_vec(log),
            LogRecord::RcEvent(log) => serde_json::to_vec(log),
            LogRecord::ParticipationEnd(log) => serde_json::to_vec(log),
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            LogRecord::Attention(log) => &log.session_id,
            LogRecord::RcEvent(log) => &log.session_id,
            LogRecord::ParticipationEnd(log) => &log.session_id,
        }
    }
}

/// A record paired with the delivery path it must take
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub mode: DeliveryMode,
    pub record: LogRecord,
}

/// Raised when a participant returns after staying away too long
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefocusWarning {
    /// How long the page was unfocused before this return
    pub blurred_ms: u64,
    /// Threshold that was met or exceeded
    pub threshold_ms: u64,
    pub message: String,
}

/// Output of a single state machine step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Emission {
    Deliver(Delivery),
    Warn(RefocusWarning),
}

impl Emission {
    pub fn as_delivery(&self) -> Option<&Delivery> {
        match self {
            Emission::Deliver(delivery) => Some(delivery),
            Emission::Warn(_) => None,
        }
    }

    pub fn as_warning(&self) -> Option<&RefocusWarning> {
        match self {
            Emission::Warn(warning) => Some(warning),
            Emission::Deliver(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_close_drops_degenerate_segments() {
        assert_eq!(AttentionSegment::close(SegmentKind::Active, 1_000, 1_000), None);
        assert_eq!(AttentionSegment::close(SegmentKind::Blurred, 2_000, 1_500), None);

        let segment = AttentionSegment::close(SegmentKind::Active, 1_000, 4_000).unwrap();
        assert_eq!(segment.duration_ms, 3_000);
        assert_eq!(segment.end_time(), 4_000);
    }

    #[test]
    fn test_rc_event_wire_format() {
        let record = LogRecord::RcEvent(RcEventLog {
            session_id: "s-1".to_string(),
            passage_id: "p-42".to_string(),
            page_name: UNATTRIBUTED_PAGE.to_string(),
            status: SegmentKind::Blurred,
            start_time: 1_700_000_000_000,
            duration_ms: 10_000,
        });

        assert_eq!(record.path(), "/api/log/rc_event");

        let body: serde_json::Value = serde_json::from_slice(&record.body().unwrap()).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "session_id": "s-1",
                "passage_id": "p-42",
                "page_name": "unknown",
                "status": "blur",
                "start_time": 1_700_000_000_000i64,
                "duration_ms": 10_000
            })
        );
    }

    #[test]
    fn test_attention_body_has_no_tag() {
        let record = LogRecord::Attention(AttentionLog {
            session_id: "s-1".to_string(),
            bucket: "reading_task1".to_string(),
            elapsed_ms: 3_000,
        });

        let body: serde_json::Value = serde_json::from_slice(&record.body().unwrap()).unwrap();
        assert!(body.get("record").is_none());
        assert_eq!(body["bucket"], "reading_task1");
        assert_eq!(body["elapsed_ms"], 3_000);
    }

    #[test]
    fn test_visibility_folds_into_focus_events() {
        assert_eq!(TrackerEvent::from_visibility(true), TrackerEvent::FocusLost);
        assert_eq!(TrackerEvent::from_visibility(false), TrackerEvent::FocusGained);
    }
}
