//! In-app navigation suppressor
//!
//! Clicking "Next" or submitting a form blurs the page and then tears it down.
//! Page controllers call [`NavigationContext::mark`] right before changing
//! location so those signals are read as moving on, not as leaving the tab.
//!
//! The flag is a deadline rather than a timer: it is set until
//! `marked_at + window` and reads as clear afterwards, so no scheduled reset is
//! needed and tests can drive it with any clock.

use std::cell::Cell;

use tracing::debug;

use crate::config::DEFAULT_NAV_WINDOW_MS;
use crate::types::EpochMillis;

/// Single shared navigation flag for one page load
#[derive(Debug)]
pub struct NavigationContext {
    window_ms: u64,
    marked_until: Cell<Option<EpochMillis>>,
}

impl Default for NavigationContext {
    fn default() -> Self {
        Self::new(DEFAULT_NAV_WINDOW_MS)
    }
}

impl NavigationContext {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            marked_until: Cell::new(None),
        }
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Flag an intentional navigation. Marking again restarts the window.
    pub fn mark(&self, now: EpochMillis) {
        let until = now.saturating_add(self.window_ms as EpochMillis);
        debug!(until, "in-app navigation marked");
        self.marked_until.set(Some(until));
    }

    pub fn is_marked(&self, now: EpochMillis) -> bool {
        matches!(self.marked_until.get(), Some(until) if now < until)
    }

    pub fn clear(&self) {
        self.marked_until.set(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unmarked_by_default() {
        let nav = NavigationContext::default();
        assert!(!nav.is_marked(0));
        assert_eq!(nav.window_ms(), 2_000);
    }

    #[test]
    fn test_mark_expires_after_window() {
        let nav = NavigationContext::new(2_000);
        nav.mark(10_000);
        assert!(nav.is_marked(10_000));
        assert!(nav.is_marked(11_999));
        assert!(!nav.is_marked(12_000));
    }

    #[test]
    fn test_remark_restarts_window() {
        let nav = NavigationContext::new(2_000);
        nav.mark(10_000);
        nav.mark(11_500);
        assert!(nav.is_marked(13_000));
        assert!(!nav.is_marked(13_500));
    }

    #[test]
    fn test_clear() {
        let nav = NavigationContext::new(2_000);
        nav.mark(0);
        nav.clear();
        assert!(!nav.is_marked(1));
    }
}
