use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{EnterpriseId, Rp, Timestamp};

/// Latched moat bookkeeping for one enterprise.
///
/// `countdown_start` is `Some` only while a moat that was held is in its
/// grace period after the balance dropped below the threshold.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoatRecord {
    pub last_had_moat: bool,
    pub countdown_start: Option<Timestamp>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MoatPhase {
    Unprotected,
    Held,
    Expiring { since: Timestamp },
}

impl MoatRecord {
    pub fn phase(&self) -> MoatPhase {
        match (self.last_had_moat, self.countdown_start) {
            (false, _) => MoatPhase::Unprotected,
            (true, None) => MoatPhase::Held,
            (true, Some(since)) => MoatPhase::Expiring { since },
        }
    }

    /// Latch the moat status for `balance` at `now` and report it.
    ///
    /// Only the hook dispatcher calls this, always with a balance that is
    /// about to be committed.
    pub(crate) fn update_and_get_moat_status(
        &mut self,
        balance: Rp,
        threshold: Rp,
        now: Timestamp,
        immunity_period: u64,
    ) -> bool {
        if balance >= threshold {
            self.last_had_moat = true;
            self.countdown_start = None;
            return true;
        }

        if !self.last_had_moat {
            return false;
        }

        match self.countdown_start {
            None => {
                self.countdown_start = Some(now);
                true
            }
            Some(start) if now < start.saturating_add(immunity_period) => true,
            Some(_) => {
                self.last_had_moat = false;
                self.countdown_start = None;
                false
            }
        }
    }

    /// Read-only moat check for use outside an action.
    ///
    /// Gives the same answer `update_and_get_moat_status` would return from
    /// this record, without latching anything.
    pub fn has_moat(&self, balance: Rp, threshold: Rp, now: Timestamp, immunity_period: u64) -> bool {
        if balance >= threshold {
            return true;
        }
        match (self.last_had_moat, self.countdown_start) {
            (true, None) => true,
            (true, Some(start)) => now < start.saturating_add(immunity_period),
            (false, _) => false,
        }
    }
}

/// Moat records keyed by enterprise. Records are created zeroed on first
/// evaluation and never removed.
#[derive(Clone, Debug, Default)]
pub struct MoatBook {
    records: BTreeMap<EnterpriseId, MoatRecord>,
}

impl MoatBook {
    pub fn record(&self, id: EnterpriseId) -> MoatRecord {
        self.records.get(&id).copied().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn put(&mut self, id: EnterpriseId, record: MoatRecord) {
        self.records.insert(id, record);
    }
}
