use tracing::debug;

use crate::config::EconomyConfig;
use crate::moat::{MoatBook, MoatRecord};
use crate::types::{EnterpriseId, Rp, Timestamp};

/// Final balance of one participant, as it is about to be committed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SettledBalance {
    pub id: EnterpriseId,
    pub balance: Rp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MoatUpdate {
    pub id: EnterpriseId,
    pub balance: Rp,
    pub has_moat: bool,
    pub record: MoatRecord,
}

/// Moat evaluations for one action, staged until the action commits.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HookOutcome {
    updates: Vec<MoatUpdate>,
}

impl HookOutcome {
    pub fn updates(&self) -> &[MoatUpdate] {
        &self.updates
    }

    pub fn get(&self, id: EnterpriseId) -> Option<&MoatUpdate> {
        self.updates.iter().rev().find(|u| u.id == id)
    }

    pub fn has_moat(&self, id: EnterpriseId) -> bool {
        self.get(id).map(|u| u.has_moat).unwrap_or(false)
    }
}

/// The single writer of moat state.
///
/// Only the settlement engine holds one, so moat records change only as
/// part of a committed settlement.
#[derive(Debug)]
pub struct ActionHookDispatcher {
    moats: MoatBook,
}

impl ActionHookDispatcher {
    pub(crate) fn new() -> Self {
        ActionHookDispatcher {
            moats: MoatBook::default(),
        }
    }

    /// Evaluate moat status for each participant's final balance.
    ///
    /// Pure with respect to the book: the result is applied by
    /// [`ActionHookDispatcher::commit`] once the rest of the action is
    /// staged.
    pub(crate) fn on_action(
        &self,
        settled: &[SettledBalance],
        now: Timestamp,
        config: &EconomyConfig,
    ) -> HookOutcome {
        let mut outcome = HookOutcome::default();
        for entry in settled {
            let mut record = match outcome.get(entry.id) {
                Some(previous) => previous.record,
                None => self.moats.record(entry.id),
            };
            let has_moat = record.update_and_get_moat_status(
                entry.balance,
                config.moat_threshold,
                now,
                config.moat_immunity_period,
            );
            outcome.updates.push(MoatUpdate {
                id: entry.id,
                balance: entry.balance,
                has_moat,
                record,
            });
        }
        outcome
    }

    pub(crate) fn commit(&mut self, outcome: &HookOutcome) {
        for update in &outcome.updates {
            let before = self.moats.record(update.id);
            if before != update.record {
                debug!(
                    target: "enterprise.moat",
                    id = update.id,
                    balance = %update.balance,
                    from = ?before.phase(),
                    to = ?update.record.phase(),
                    "moat transition"
                );
            }
            self.moats.put(update.id, update.record);
        }
    }

    pub fn moat_record(&self, id: EnterpriseId) -> MoatRecord {
        self.moats.record(id)
    }

    pub fn tracked(&self) -> usize {
        self.moats.len()
    }

    /// Current moat status without latching, for checks outside an action.
    pub fn has_moat(&self, id: EnterpriseId, balance: Rp, now: Timestamp, config: &EconomyConfig) -> bool {
        self.moats
            .record(id)
            .has_moat(balance, config.moat_threshold, now, config.moat_immunity_period)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EconomyConfig {
        EconomyConfig {
            moat_threshold: 100,
            moat_immunity_period: 60,
            ..EconomyConfig::default()
        }
    }

    #[test]
    fn evaluation_is_staged_until_commit() {
        let mut hooks = ActionHookDispatcher::new();
        let outcome = hooks.on_action(&[SettledBalance { id: 1, balance: 150 }], 10, &config());
        assert!(outcome.has_moat(1));
        assert_eq!(hooks.moat_record(1), MoatRecord::default());

        hooks.commit(&outcome);
        assert!(hooks.moat_record(1).last_had_moat);
        assert_eq!(hooks.tracked(), 1);
    }

    #[test]
    fn each_participant_is_evaluated_with_its_own_balance() {
        let mut hooks = ActionHookDispatcher::new();
        let outcome = hooks.on_action(
            &[
                SettledBalance { id: 1, balance: 100 },
                SettledBalance { id: 2, balance: 99 },
            ],
            10,
            &config(),
        );
        hooks.commit(&outcome);
        assert!(outcome.has_moat(1));
        assert!(!outcome.has_moat(2));
        assert_eq!(outcome.get(2).unwrap().balance, 99);
    }

    #[test]
    fn read_only_check_follows_grace_period() {
        let mut hooks = ActionHookDispatcher::new();
        let cfg = config();
        let held = hooks.on_action(&[SettledBalance { id: 7, balance: 100 }], 0, &cfg);
        hooks.commit(&held);
        let dropped = hooks.on_action(&[SettledBalance { id: 7, balance: 10 }], 100, &cfg);
        hooks.commit(&dropped);

        assert!(hooks.has_moat(7, 10, 159, &cfg));
        assert!(!hooks.has_moat(7, 10, 160, &cfg));
        // the read did not latch the expiry
        assert!(hooks.moat_record(7).last_had_moat);
    }

    #[test]
    fn unknown_enterprise_has_no_moat_below_threshold() {
        let hooks = ActionHookDispatcher::new();
        assert!(!hooks.has_moat(42, 99, 0, &config()));
        assert!(hooks.has_moat(42, 100, 0, &config()));
    }
}
