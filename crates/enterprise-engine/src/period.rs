use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::types::Timestamp;

/// Action count for the current fixed-length period.
///
/// Nothing ticks the period over; it is rolled forward lazily the next time
/// it is read or bumped, the same way balances accrue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodCounter {
    period: u64,
    start: Timestamp,
    count: u64,
}

impl PeriodCounter {
    pub fn new(period: u64, now: Timestamp) -> Result<Self> {
        if period == 0 {
            return Err(EngineError::ZeroPeriod);
        }
        Ok(PeriodCounter {
            period,
            start: now,
            count: 0,
        })
    }

    pub fn period(&self) -> u64 {
        self.period
    }

    /// Start of the period containing `now`.
    pub fn period_start(&self, now: Timestamp) -> Timestamp {
        if now < self.start.saturating_add(self.period) {
            return self.start;
        }
        let elapsed_periods = (now - self.start) / self.period;
        self.start + elapsed_periods * self.period
    }

    pub fn count(&self, now: Timestamp) -> u64 {
        if self.period_start(now) == self.start {
            self.count
        } else {
            0
        }
    }

    /// Record one action at `now` and return the count for its period.
    pub fn bump(&mut self, now: Timestamp) -> u64 {
        self.roll(now);
        self.count += 1;
        self.count
    }

    fn roll(&mut self, now: Timestamp) {
        let start = self.period_start(now);
        if start != self.start {
            self.start = start;
            self.count = 0;
        }
    }
}
