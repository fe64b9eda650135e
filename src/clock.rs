//! Wall-clock sources
//!
//! Trackers read time through [`Clock`] so that scenarios can be replayed with
//! a manually advanced clock.

use std::cell::Cell;

use chrono::Utc;

use crate::types::EpochMillis;

pub trait Clock {
    fn now_ms(&self) -> EpochMillis;
}

/// Real wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> EpochMillis {
        Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<EpochMillis>,
}

impl ManualClock {
    pub fn new(start: EpochMillis) -> Self {
        Self {
            now: Cell::new(start),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms as EpochMillis);
    }

    pub fn set(&self, now: EpochMillis) {
        self.now.set(now);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> EpochMillis {
        self.now.get()
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_ms(&self) -> EpochMillis {
        (**self).now_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(1_000);
        clock.advance(250);
        assert_eq!(clock.now_ms(), 1_250);
        clock.set(10);
        assert_eq!(clock.now_ms(), 10);
    }

    #[test]
    fn test_system_clock_is_epoch_millis() {
        // 2020-01-01 in epoch millis
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }
}
