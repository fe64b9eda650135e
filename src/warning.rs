//! Refocus warning policy
//!
//! On reading and question pages a participant who comes back after a long
//! absence is shown a blocking reminder before the page resumes. Returns that
//! follow an in-app navigation mark are never warned about.

use std::cell::RefCell;

use crate::types::RefocusWarning;

pub const DEFAULT_WARNING_MESSAGE: &str = "Please stay focused on the reading comprehension task.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefocusWarningPolicy {
    threshold_ms: u64,
    message: String,
}

impl RefocusWarningPolicy {
    pub fn new(threshold_ms: u64) -> Self {
        Self {
            threshold_ms,
            message: DEFAULT_WARNING_MESSAGE.to_string(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn threshold_ms(&self) -> u64 {
        self.threshold_ms
    }

    /// Decide whether returning after `blurred_ms` away deserves a warning
    pub fn evaluate(&self, blurred_ms: u64, nav_marked: bool) -> Option<RefocusWarning> {
        if nav_marked || blurred_ms < self.threshold_ms {
            return None;
        }
        Some(RefocusWarning {
            blurred_ms,
            threshold_ms: self.threshold_ms,
            message: self.message.clone(),
        })
    }
}

/// Shows a warning to the participant.
///
/// Implementations block until the participant dismisses it.
pub trait WarningPresenter {
    fn present(&self, warning: &RefocusWarning);
}

/// Presenter for pages that never warn
#[derive(Debug, Default, Clone, Copy)]
pub struct NoWarnings;

impl WarningPresenter for NoWarnings {
    fn present(&self, _warning: &RefocusWarning) {}
}

/// Collects warnings instead of showing them
#[derive(Debug, Default)]
pub struct CollectedWarnings {
    seen: RefCell<Vec<RefocusWarning>>,
}

impl CollectedWarnings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.seen.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.borrow().is_empty()
    }

    pub fn take(&self) -> Vec<RefocusWarning> {
        std::mem::take(&mut *self.seen.borrow_mut())
    }
}

impl WarningPresenter for CollectedWarnings {
    fn present(&self, warning: &RefocusWarning) {
        self.seen.borrow_mut().push(warning.clone());
    }
}

impl<P: WarningPresenter + ?Sized> WarningPresenter for &P {
    fn present(&self, warning: &RefocusWarning) {
        (**self).present(warning)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_is_inclusive() {
        let policy = RefocusWarningPolicy::new(5_000);
        assert!(policy.evaluate(4_999, false).is_none());

        let warning = policy.evaluate(5_000, false).unwrap();
        assert_eq!(warning.blurred_ms, 5_000);
        assert_eq!(warning.threshold_ms, 5_000);
        assert_eq!(warning.message, DEFAULT_WARNING_MESSAGE);
    }

    #[test]
    fn test_navigation_mark_suppresses() {
        let policy = RefocusWarningPolicy::new(5_000);
        assert!(policy.evaluate(60_000, true).is_none());
    }

    #[test]
    fn test_custom_message() {
        let policy = RefocusWarningPolicy::new(1).with_message("Eyes on the passage");
        assert_eq!(policy.evaluate(10, false).unwrap().message, "Eyes on the passage");
    }

    #[test]
    fn test_collected_warnings_drain() {
        let sink = CollectedWarnings::new();
        let warning = RefocusWarningPolicy::new(0).evaluate(1, false).unwrap();
        sink.present(&warning);
        sink.present(&warning);
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.take().len(), 2);
        assert!(sink.is_empty());
    }
}
