use tracing::{debug, info, warn};

use crate::config::{check_bps, AccrualRates, EconomyConfig, ImmunityWindows, SupplyCaps};
use crate::custody::CustodyRegistry;
use crate::damage::{damage, difficulty_percent, rp_required_ceil};
use crate::error::{EngineError, Result};
use crate::hooks::{ActionHookDispatcher, SettledBalance};
use crate::moat::MoatRecord;
use crate::pricing::{CostQuote, CostQuoter};
use crate::store::EnterpriseStore;
use crate::types::{
    AccountId, Enterprise, EnterpriseId, Immunity, Rp, SupplyTier, Timestamp, DENOMINATOR,
};

/// Who is acting and when.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActionContext {
    pub caller: AccountId,
    pub now: Timestamp,
}

impl ActionContext {
    pub fn new(caller: AccountId, now: Timestamp) -> Self {
        ActionContext { caller, now }
    }
}

/// Which side of an acquisition keeps its identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Survivor {
    Caller,
    Target,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompeteOutcome {
    pub caller_id: EnterpriseId,
    pub target_id: EnterpriseId,
    pub rp_spent: Rp,
    pub damage: Rp,
    pub caller_balance: Rp,
    pub target_balance: Rp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompeteReceipt {
    pub outcome: CompeteOutcome,
    pub caller_has_moat: bool,
    pub target_has_moat: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MergeReceipt {
    pub survivor: EnterpriseId,
    pub retired: EnterpriseId,
    pub transferred: Rp,
    pub fee: Rp,
    pub survivor_balance: Rp,
    pub survivor_has_moat: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AcquireReceipt {
    pub compete: Option<CompeteOutcome>,
    pub survivor: EnterpriseId,
    pub retired: EnterpriseId,
    pub transferred: Rp,
    pub fee: Rp,
    pub survivor_balance: Rp,
    pub survivor_has_moat: bool,
    pub cost: CostQuote,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BalanceReceipt {
    pub id: EnterpriseId,
    pub balance: Rp,
    pub has_moat: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WithdrawReceipt {
    pub id: EnterpriseId,
    pub amount: Rp,
    pub burned: Rp,
    pub to_caller: Rp,
    pub balance: Rp,
    pub has_moat: bool,
}

/// Fire-and-forget notification, one per committed operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettlementEvent {
    Registered {
        id: EnterpriseId,
        tier: SupplyTier,
    },
    Competed(CompeteOutcome),
    Merged {
        survivor: EnterpriseId,
        retired: EnterpriseId,
        transferred: Rp,
        fee: Rp,
        survivor_balance: Rp,
    },
    Acquired {
        survivor: EnterpriseId,
        retired: EnterpriseId,
        transferred: Rp,
        fee: Rp,
        survivor_balance: Rp,
        cost: CostQuote,
    },
    Deposited {
        id: EnterpriseId,
        amount: Rp,
        balance: Rp,
    },
    Withdrew {
        id: EnterpriseId,
        amount: Rp,
        burned: Rp,
        balance: Rp,
    },
    Revived {
        id: EnterpriseId,
    },
    ConfigUpdated {
        field: &'static str,
    },
}

/// Fee kept back when a balance is folded into another enterprise.
///
/// The `+ 1` makes the fee strictly positive for any non-zero balance; the
/// cap keeps it from ever exceeding what is being moved.
pub fn merge_fee(burnt_balance: Rp, merger_burn_bps: u32) -> Result<Rp> {
    let naive = burnt_balance
        .checked_mul(merger_burn_bps as Rp)
        .ok_or(EngineError::ArithmeticOverflow("merge fee"))?
        / DENOMINATOR as Rp
        + 1;
    Ok(naive.min(burnt_balance))
}

/// Burn taken from a withdrawal. Rounds down, so tiny withdrawals are free.
pub fn withdrawal_fee(amount: Rp, withdrawal_burn_bps: u32) -> Result<Rp> {
    Ok(amount
        .checked_mul(withdrawal_burn_bps as Rp)
        .ok_or(EngineError::ArithmeticOverflow("withdrawal fee"))?
        / DENOMINATOR as Rp)
}

fn shield_of(enterprise: &Enterprise, now: Timestamp, windows: &ImmunityWindows) -> Option<Immunity> {
    let active = |start: Option<Timestamp>, window: u64| {
        start.map_or(false, |s| now < s.saturating_add(window))
    };
    if active(enterprise.acquisition_immunity_start, windows.acquisition) {
        Some(Immunity::Acquisition)
    } else if active(enterprise.merger_immunity_start, windows.merger) {
        Some(Immunity::Merger)
    } else if active(enterprise.revival_immunity_start, windows.revival) {
        Some(Immunity::Revival)
    } else {
        None
    }
}

fn immunity_of(
    enterprise: &Enterprise,
    balance: Rp,
    now: Timestamp,
    config: &EconomyConfig,
    hooks: &ActionHookDispatcher,
) -> Option<Immunity> {
    if hooks.has_moat(enterprise.id, balance, now, config) {
        return Some(Immunity::Moat);
    }
    shield_of(enterprise, now, &config.immunity)
}

fn add_rp(lhs: Rp, rhs: Rp, what: &'static str) -> Result<Rp> {
    lhs.checked_add(rhs).ok_or(EngineError::ArithmeticOverflow(what))
}

fn apply_compete(
    config: &EconomyConfig,
    hooks: &ActionHookDispatcher,
    remaining_supply: u64,
    now: Timestamp,
    caller: &mut Enterprise,
    target: &mut Enterprise,
    rp_to_spend: Rp,
) -> Result<CompeteOutcome> {
    let caller_balance = caller.settle_accrual(now, config)?;
    let target_balance = target.settle_accrual(now, config)?;

    if let Some(kind) = immunity_of(target, target_balance, now, config, hooks) {
        return Err(EngineError::TargetImmune { id: target.id, kind });
    }

    let mut rp_spent = rp_to_spend;
    let mut dealt = damage(remaining_supply, rp_to_spend)?;
    if dealt > target_balance {
        rp_spent = rp_required_ceil(remaining_supply, target_balance)?;
        dealt = target_balance;
    }

    let caller_after = caller_balance
        .checked_sub(rp_spent)
        .ok_or(EngineError::InsufficientBalance {
            required: rp_spent,
            available: caller_balance,
        })?;
    let target_after = target_balance - dealt;

    caller.stored_balance = caller_after;
    caller.compete_spend = add_rp(caller.compete_spend, rp_spent, "compete spend")?;
    caller.damage_dealt = add_rp(caller.damage_dealt, dealt, "damage dealt")?;
    caller.clear_shields();
    target.stored_balance = target_after;
    target.damage_taken = add_rp(target.damage_taken, dealt, "damage taken")?;
    if target_after == 0 {
        target.zeroed_at = Some(now);
    }

    Ok(CompeteOutcome {
        caller_id: caller.id,
        target_id: target.id,
        rp_spent,
        damage: dealt,
        caller_balance: caller_after,
        target_balance: target_after,
    })
}

struct Transfer {
    transferred: Rp,
    fee: Rp,
    survivor_balance: Rp,
}

/// Fold `retired`'s balance into `survivor`, less the merger fee.
fn absorb(
    config: &EconomyConfig,
    now: Timestamp,
    survivor: &mut Enterprise,
    retired: &mut Enterprise,
) -> Result<Transfer> {
    let survivor_balance = survivor.settle_accrual(now, config)?;
    let burnt = retired.settle_accrual(now, config)?;
    let fee = merge_fee(burnt, config.merger_burn_bps)?;
    let transferred = burnt - fee;
    let survivor_balance = add_rp(survivor_balance, transferred, "merge transfer")?;

    survivor.stored_balance = survivor_balance;
    survivor.zeroed_at = None;
    retired.stored_balance = 0;
    retired.zeroed_at = Some(now);

    Ok(Transfer {
        transferred,
        fee,
        survivor_balance,
    })
}

fn bump_counter(counter: u32, what: &'static str) -> Result<u32> {
    counter.checked_add(1).ok_or(EngineError::ArithmeticOverflow(what))
}

/// Applies user actions to the enterprise economy.
///
/// Each operation reads virtual balances, does all arithmetic on copies,
/// stages the rows in one unit of work and commits it together with the
/// moat evaluation of every participant. A failed operation commits
/// nothing.
pub struct SettlementEngine<C, Q> {
    admin: AccountId,
    config: EconomyConfig,
    store: EnterpriseStore,
    hooks: ActionHookDispatcher,
    custody: C,
    pricing: Q,
    #[cfg(feature = "events")]
    events: Vec<SettlementEvent>,
}

impl<C: CustodyRegistry, Q: CostQuoter> SettlementEngine<C, Q> {
    pub fn new(admin: AccountId, config: EconomyConfig, custody: C, pricing: Q) -> Result<Self> {
        config.validate()?;
        Ok(SettlementEngine {
            admin,
            config,
            store: EnterpriseStore::new(),
            hooks: ActionHookDispatcher::new(),
            custody,
            pricing,
            #[cfg(feature = "events")]
            events: Vec::new(),
        })
    }

    pub fn admin(&self) -> AccountId {
        self.admin
    }

    pub fn config(&self) -> &EconomyConfig {
        &self.config
    }

    pub fn store(&self) -> &EnterpriseStore {
        &self.store
    }

    pub fn custody(&self) -> &C {
        &self.custody
    }

    /// The custody registry is external; hosts drive it through here.
    pub fn custody_mut(&mut self) -> &mut C {
        &mut self.custody
    }

    pub fn pricing(&self) -> &Q {
        &self.pricing
    }

    #[cfg(feature = "events")]
    pub fn take_events(&mut self) -> Vec<SettlementEvent> {
        std::mem::take(&mut self.events)
    }

    fn emit(&mut self, event: SettlementEvent) {
        #[cfg(feature = "events")]
        self.events.push(event);
        #[cfg(not(feature = "events"))]
        let _ = event;
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Stored row as persisted. The balance here is not accrued; use
    /// [`SettlementEngine::virtual_balance`] for the current value.
    pub fn get_enterprise(&self, id: EnterpriseId) -> Option<&Enterprise> {
        self.store.get(id)
    }

    pub fn virtual_balance(&self, id: EnterpriseId, now: Timestamp) -> Result<Rp> {
        self.registered(id)?.virtual_balance(now, &self.config)
    }

    pub fn enterprise_has_moat(&self, id: EnterpriseId, now: Timestamp) -> Result<bool> {
        let balance = self.virtual_balance(id, now)?;
        Ok(self.hooks.has_moat(id, balance, now, &self.config))
    }

    /// First protection currently keeping `id` from being targeted.
    pub fn immunity_of(&self, id: EnterpriseId, now: Timestamp) -> Result<Option<Immunity>> {
        let enterprise = self.registered(id)?;
        let balance = enterprise.virtual_balance(now, &self.config)?;
        Ok(immunity_of(enterprise, balance, now, &self.config, &self.hooks))
    }

    pub fn moat_record(&self, id: EnterpriseId) -> MoatRecord {
        self.hooks.moat_record(id)
    }

    pub fn remaining_supply(&self) -> u64 {
        self.config.supply_caps.remaining(self.store.supply())
    }

    pub fn difficulty_percent(&self) -> u64 {
        difficulty_percent(self.remaining_supply())
    }

    /// Registered enterprises held by `owner` with their current balances.
    pub fn portfolio(&self, owner: AccountId, now: Timestamp) -> Result<Vec<(EnterpriseId, Rp)>> {
        let held = self.custody.balance_of_owner(owner);
        let mut out = Vec::with_capacity(held);
        for index in 0..held {
            let Some(id) = self.custody.token_of_owner_by_index(owner, index) else {
                break;
            };
            if let Some(enterprise) = self.store.get(id) {
                out.push((id, enterprise.virtual_balance(now, &self.config)?));
            }
        }
        Ok(out)
    }

    pub fn quote(&self, caller_id: EnterpriseId, target_id: EnterpriseId, now: Timestamp) -> CostQuote {
        self.pricing.quote(caller_id, target_id, now)
    }

    // -----------------------------------------------------------------------
    // Precondition helpers
    // -----------------------------------------------------------------------

    fn registered(&self, id: EnterpriseId) -> Result<&Enterprise> {
        if !self.custody.exists(id) {
            return Err(EngineError::UnknownEnterprise(id));
        }
        self.store.get(id).ok_or(EngineError::UnknownEnterprise(id))
    }

    fn ensure_owner(&self, caller: AccountId, id: EnterpriseId) -> Result<()> {
        match self.custody.owner_of(id) {
            Some(owner) if owner == caller => Ok(()),
            Some(_) => Err(EngineError::NotOwner { caller, id }),
            None => Err(EngineError::UnknownEnterprise(id)),
        }
    }

    fn ensure_controlled(&self, caller: AccountId, id: EnterpriseId) -> Result<()> {
        self.ensure_owner(caller, id)?;
        self.registered(id).map(|_| ())
    }

    fn ensure_admin(&self, caller: AccountId) -> Result<()> {
        if caller != self.admin {
            warn!(target: "enterprise.admin", %caller, "rejected admin call");
            return Err(EngineError::NotAdmin { caller });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Settlements
    // -----------------------------------------------------------------------

    /// Enroll a custody-minted enterprise into the economy under `tier`.
    pub fn register(&mut self, ctx: ActionContext, id: EnterpriseId, tier: SupplyTier) -> Result<BalanceReceipt> {
        self.ensure_owner(ctx.caller, id)?;
        if self.store.contains(id) {
            return Err(EngineError::AlreadyRegistered(id));
        }
        let cap = self.config.supply_caps.cap(tier);
        if self.store.supply().minted(tier) >= cap {
            return Err(EngineError::SupplyExhausted(tier));
        }

        let hook = self
            .hooks
            .on_action(&[SettledBalance { id, balance: 0 }], ctx.now, &self.config);
        let mut uow = self.store.begin();
        uow.stage(Enterprise::new(id, tier, ctx.now));
        uow.record_mint(tier);
        uow.commit();
        self.hooks.commit(&hook);

        info!(target: "enterprise.settlement", id, %tier, "enterprise registered");
        self.emit(SettlementEvent::Registered { id, tier });
        Ok(BalanceReceipt {
            id,
            balance: 0,
            has_moat: hook.has_moat(id),
        })
    }

    /// Spend rp from `caller_id` to damage `target_id`.
    ///
    /// Overkill is clamped: the target is zeroed and the caller pays only the
    /// smallest amount that does so. Spending more than the caller holds
    /// fails outright.
    pub fn compete(
        &mut self,
        ctx: ActionContext,
        caller_id: EnterpriseId,
        target_id: EnterpriseId,
        rp_to_spend: Rp,
    ) -> Result<CompeteReceipt> {
        self.ensure_controlled(ctx.caller, caller_id)?;
        if caller_id == target_id {
            return Err(EngineError::SelfTarget(caller_id));
        }
        self.registered(target_id)?;
        if rp_to_spend == 0 {
            return Err(EngineError::ZeroAmount);
        }

        let remaining = self.remaining_supply();
        let mut uow = self.store.begin();
        let mut caller = uow.load(caller_id)?;
        let mut target = uow.load(target_id)?;
        let outcome = apply_compete(
            &self.config,
            &self.hooks,
            remaining,
            ctx.now,
            &mut caller,
            &mut target,
            rp_to_spend,
        )?;

        let hook = self.hooks.on_action(
            &[
                SettledBalance { id: caller_id, balance: outcome.caller_balance },
                SettledBalance { id: target_id, balance: outcome.target_balance },
            ],
            ctx.now,
            &self.config,
        );
        uow.stage(caller);
        uow.stage(target);
        uow.commit();
        self.hooks.commit(&hook);

        info!(
            target: "enterprise.settlement",
            caller_id,
            target_id,
            rp_spent = %outcome.rp_spent,
            damage = %outcome.damage,
            caller_balance = %outcome.caller_balance,
            target_balance = %outcome.target_balance,
            "compete settled"
        );
        self.emit(SettlementEvent::Competed(outcome));
        Ok(CompeteReceipt {
            outcome,
            caller_has_moat: hook.has_moat(caller_id),
            target_has_moat: hook.has_moat(target_id),
        })
    }

    /// Fold one of two enterprises the caller controls into the other.
    pub fn merge(
        &mut self,
        ctx: ActionContext,
        caller_id: EnterpriseId,
        target_id: EnterpriseId,
        burn_id: EnterpriseId,
    ) -> Result<MergeReceipt> {
        if caller_id == target_id {
            return Err(EngineError::SelfTarget(caller_id));
        }
        self.ensure_controlled(ctx.caller, caller_id)?;
        self.ensure_controlled(ctx.caller, target_id)?;
        let survivor_id = if burn_id == caller_id {
            target_id
        } else if burn_id == target_id {
            caller_id
        } else {
            return Err(EngineError::InvalidBurnTarget {
                burn: burn_id,
                first: caller_id,
                second: target_id,
            });
        };

        let mut uow = self.store.begin();
        let mut survivor = uow.load(survivor_id)?;
        let mut retired = uow.load(burn_id)?;
        let transfer = absorb(&self.config, ctx.now, &mut survivor, &mut retired)?;
        survivor.merge_count = bump_counter(survivor.merge_count, "merge count")?;
        survivor.merger_immunity_start = Some(ctx.now);

        let hook = self.hooks.on_action(
            &[
                SettledBalance { id: survivor_id, balance: transfer.survivor_balance },
                SettledBalance { id: burn_id, balance: 0 },
            ],
            ctx.now,
            &self.config,
        );
        uow.stage(survivor);
        uow.stage(retired);
        uow.commit();
        self.hooks.commit(&hook);

        info!(
            target: "enterprise.settlement",
            survivor = survivor_id,
            retired = burn_id,
            transferred = %transfer.transferred,
            fee = %transfer.fee,
            "merge settled"
        );
        self.emit(SettlementEvent::Merged {
            survivor: survivor_id,
            retired: burn_id,
            transferred: transfer.transferred,
            fee: transfer.fee,
            survivor_balance: transfer.survivor_balance,
        });
        Ok(MergeReceipt {
            survivor: survivor_id,
            retired: burn_id,
            transferred: transfer.transferred,
            fee: transfer.fee,
            survivor_balance: transfer.survivor_balance,
            survivor_has_moat: hook.has_moat(survivor_id),
        })
    }

    /// Take over a rival enterprise, keeping whichever side `keep` names.
    pub fn acquire(
        &mut self,
        ctx: ActionContext,
        caller_id: EnterpriseId,
        target_id: EnterpriseId,
        keep: Survivor,
    ) -> Result<AcquireReceipt> {
        self.settle_acquisition(ctx, caller_id, target_id, None, keep)
    }

    /// Compete against a rival and acquire it in the same settlement.
    pub fn compete_and_acquire(
        &mut self,
        ctx: ActionContext,
        caller_id: EnterpriseId,
        target_id: EnterpriseId,
        rp_to_spend: Rp,
        keep: Survivor,
    ) -> Result<AcquireReceipt> {
        if rp_to_spend == 0 {
            return Err(EngineError::ZeroAmount);
        }
        self.settle_acquisition(ctx, caller_id, target_id, Some(rp_to_spend), keep)
    }

    fn settle_acquisition(
        &mut self,
        ctx: ActionContext,
        caller_id: EnterpriseId,
        target_id: EnterpriseId,
        compete_rp: Option<Rp>,
        keep: Survivor,
    ) -> Result<AcquireReceipt> {
        self.ensure_controlled(ctx.caller, caller_id)?;
        if caller_id == target_id {
            return Err(EngineError::SelfTarget(caller_id));
        }
        self.registered(target_id)?;
        if self.custody.owner_of(target_id) == Some(ctx.caller) {
            return Err(EngineError::OwnTarget(target_id));
        }

        let now = ctx.now;
        let remaining = self.remaining_supply();
        let mut uow = self.store.begin();
        let mut caller = uow.load(caller_id)?;
        let mut target = uow.load(target_id)?;

        let compete = match compete_rp {
            Some(rp) => Some(apply_compete(
                &self.config,
                &self.hooks,
                remaining,
                now,
                &mut caller,
                &mut target,
                rp,
            )?),
            None => None,
        };

        // A moated target blocks the takeover whatever the caller holds,
        // which also covers both sides being moated.
        let target_balance = target.settle_accrual(now, &self.config)?;
        if let Some(kind) = immunity_of(&target, target_balance, now, &self.config, &self.hooks) {
            return Err(EngineError::TargetImmune { id: target_id, kind });
        }

        let (survivor, retired) = match keep {
            Survivor::Caller => (&mut caller, &mut target),
            Survivor::Target => (&mut target, &mut caller),
        };
        let transfer = absorb(&self.config, now, survivor, retired)?;
        survivor.acquire_count = bump_counter(survivor.acquire_count, "acquire count")?;
        survivor.acquisition_immunity_start = Some(now);
        let survivor_id = survivor.id;
        let retired_id = retired.id;

        let hook = self.hooks.on_action(
            &[
                SettledBalance { id: caller_id, balance: caller.stored_balance },
                SettledBalance { id: target_id, balance: target.stored_balance },
            ],
            now,
            &self.config,
        );
        let cost = self.pricing.quote_and_bump(caller_id, target_id, now);
        uow.stage(caller);
        uow.stage(target);
        uow.commit();
        self.hooks.commit(&hook);

        if let Some(outcome) = compete {
            debug!(
                target: "enterprise.settlement",
                caller_id,
                target_id,
                rp_spent = %outcome.rp_spent,
                damage = %outcome.damage,
                "compete step of acquisition"
            );
        }
        info!(
            target: "enterprise.settlement",
            survivor = survivor_id,
            retired = retired_id,
            transferred = %transfer.transferred,
            fee = %transfer.fee,
            cost = %cost.total(),
            "acquisition settled"
        );
        self.emit(SettlementEvent::Acquired {
            survivor: survivor_id,
            retired: retired_id,
            transferred: transfer.transferred,
            fee: transfer.fee,
            survivor_balance: transfer.survivor_balance,
            cost,
        });
        Ok(AcquireReceipt {
            compete,
            survivor: survivor_id,
            retired: retired_id,
            transferred: transfer.transferred,
            fee: transfer.fee,
            survivor_balance: transfer.survivor_balance,
            survivor_has_moat: hook.has_moat(survivor_id),
            cost,
        })
    }

    pub fn deposit(&mut self, ctx: ActionContext, id: EnterpriseId, amount: Rp) -> Result<BalanceReceipt> {
        self.ensure_controlled(ctx.caller, id)?;
        if amount == 0 {
            return Err(EngineError::ZeroAmount);
        }

        let mut uow = self.store.begin();
        let mut enterprise = uow.load(id)?;
        let current = enterprise.settle_accrual(ctx.now, &self.config)?;
        let balance = add_rp(current, amount, "deposit")?;
        enterprise.stored_balance = balance;
        enterprise.zeroed_at = None;

        let hook = self
            .hooks
            .on_action(&[SettledBalance { id, balance }], ctx.now, &self.config);
        uow.stage(enterprise);
        uow.commit();
        self.hooks.commit(&hook);

        info!(target: "enterprise.settlement", id, amount = %amount, balance = %balance, "deposit settled");
        self.emit(SettlementEvent::Deposited { id, amount, balance });
        Ok(BalanceReceipt {
            id,
            balance,
            has_moat: hook.has_moat(id),
        })
    }

    pub fn withdraw(&mut self, ctx: ActionContext, id: EnterpriseId, amount: Rp) -> Result<WithdrawReceipt> {
        self.ensure_controlled(ctx.caller, id)?;
        if amount == 0 {
            return Err(EngineError::ZeroAmount);
        }

        let mut uow = self.store.begin();
        let mut enterprise = uow.load(id)?;
        let current = enterprise.settle_accrual(ctx.now, &self.config)?;
        let balance = current
            .checked_sub(amount)
            .ok_or(EngineError::InsufficientBalance {
                required: amount,
                available: current,
            })?;
        let burned = withdrawal_fee(amount, self.config.withdrawal_burn_bps)?;
        enterprise.stored_balance = balance;

        let hook = self
            .hooks
            .on_action(&[SettledBalance { id, balance }], ctx.now, &self.config);
        uow.stage(enterprise);
        uow.commit();
        self.hooks.commit(&hook);

        info!(
            target: "enterprise.settlement",
            id,
            amount = %amount,
            burned = %burned,
            balance = %balance,
            "withdrawal settled"
        );
        self.emit(SettlementEvent::Withdrew { id, amount, burned, balance });
        Ok(WithdrawReceipt {
            id,
            amount,
            burned,
            to_caller: amount - burned,
            balance,
            has_moat: hook.has_moat(id),
        })
    }

    /// Bring a zeroed enterprise back into play behind a revival shield.
    ///
    /// Whatever accrued since the zeroing is discarded: the balance restarts
    /// from nothing at `now`.
    pub fn revive(&mut self, ctx: ActionContext, id: EnterpriseId) -> Result<BalanceReceipt> {
        self.ensure_controlled(ctx.caller, id)?;

        let mut uow = self.store.begin();
        let mut enterprise = uow.load(id)?;
        if enterprise.zeroed_at.is_none() {
            let balance = enterprise.virtual_balance(ctx.now, &self.config)?;
            return Err(EngineError::NotZeroed { id, balance });
        }
        enterprise.stored_balance = 0;
        enterprise.last_accrual_time = ctx.now;
        enterprise.zeroed_at = None;
        enterprise.revival_immunity_start = Some(ctx.now);

        let hook = self
            .hooks
            .on_action(&[SettledBalance { id, balance: 0 }], ctx.now, &self.config);
        uow.stage(enterprise);
        uow.commit();
        self.hooks.commit(&hook);

        info!(target: "enterprise.settlement", id, "enterprise revived");
        self.emit(SettlementEvent::Revived { id });
        Ok(BalanceReceipt {
            id,
            balance: 0,
            has_moat: hook.has_moat(id),
        })
    }

    // -----------------------------------------------------------------------
    // Administration
    // -----------------------------------------------------------------------

    fn update_config(&mut self, field: &'static str, apply: impl FnOnce(&mut EconomyConfig)) {
        let mut next = self.config;
        apply(&mut next);
        if next == self.config {
            debug!(target: "enterprise.admin", field, "config unchanged");
            return;
        }
        self.config = next;
        info!(target: "enterprise.admin", field, "config updated");
        self.emit(SettlementEvent::ConfigUpdated { field });
    }

    pub fn set_game_start_time(&mut self, caller: AccountId, start: Timestamp) -> Result<()> {
        self.ensure_admin(caller)?;
        self.update_config("game_start_time", |c| c.game_start_time = Some(start));
        Ok(())
    }

    pub fn set_accrual_rates(&mut self, caller: AccountId, rates: AccrualRates) -> Result<()> {
        self.ensure_admin(caller)?;
        self.update_config("rates", |c| c.rates = rates);
        Ok(())
    }

    pub fn set_merger_burn_bps(&mut self, caller: AccountId, bps: u32) -> Result<()> {
        self.ensure_admin(caller)?;
        check_bps("merger_burn_bps", bps)?;
        self.update_config("merger_burn_bps", |c| c.merger_burn_bps = bps);
        Ok(())
    }

    pub fn set_withdrawal_burn_bps(&mut self, caller: AccountId, bps: u32) -> Result<()> {
        self.ensure_admin(caller)?;
        check_bps("withdrawal_burn_bps", bps)?;
        self.update_config("withdrawal_burn_bps", |c| c.withdrawal_burn_bps = bps);
        Ok(())
    }

    pub fn set_moat_threshold(&mut self, caller: AccountId, threshold: Rp) -> Result<()> {
        self.ensure_admin(caller)?;
        self.update_config("moat_threshold", |c| c.moat_threshold = threshold);
        Ok(())
    }

    pub fn set_moat_immunity_period(&mut self, caller: AccountId, period: u64) -> Result<()> {
        self.ensure_admin(caller)?;
        self.update_config("moat_immunity_period", |c| c.moat_immunity_period = period);
        Ok(())
    }

    pub fn set_immunity_windows(&mut self, caller: AccountId, windows: ImmunityWindows) -> Result<()> {
        self.ensure_admin(caller)?;
        self.update_config("immunity", |c| c.immunity = windows);
        Ok(())
    }

    pub fn set_supply_caps(&mut self, caller: AccountId, caps: SupplyCaps) -> Result<()> {
        self.ensure_admin(caller)?;
        caps.check_against(self.store.supply())?;
        self.update_config("supply_caps", |c| c.supply_caps = caps);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::custody::InMemoryCustody;
    use crate::pricing::FixedCost;
    use crate::types::SECONDS_PER_DAY;

    const ADMIN: AccountId = AccountId(0);
    const ALICE: AccountId = AccountId(1);
    const BOB: AccountId = AccountId(2);

    type Engine = SettlementEngine<InMemoryCustody, FixedCost>;

    fn config() -> EconomyConfig {
        EconomyConfig {
            game_start_time: None,
            merger_burn_bps: 1_000,
            withdrawal_burn_bps: 500,
            moat_threshold: 1_000,
            moat_immunity_period: 100,
            immunity: ImmunityWindows {
                acquisition: 50,
                merger: 50,
                revival: 50,
            },
            supply_caps: SupplyCaps {
                auction: 20_000,
                free: 0,
                reserved: 0,
            },
            ..EconomyConfig::default()
        }
    }

    /// Engine with `ids` minted and registered, each funded with `balance`.
    fn engine_with(holders: &[(EnterpriseId, AccountId, Rp)]) -> Engine {
        let mut engine = Engine::new(ADMIN, config(), InMemoryCustody::new(), FixedCost::default()).unwrap();
        for &(id, owner, balance) in holders {
            engine.custody_mut().mint(id, owner);
            engine.register(ActionContext::new(owner, 0), id, SupplyTier::Auction).unwrap();
            if balance > 0 {
                engine.deposit(ActionContext::new(owner, 0), id, balance).unwrap();
            }
        }
        engine
    }

    #[test]
    fn merge_fee_is_positive_and_capped() {
        assert_eq!(merge_fee(0, 1_000).unwrap(), 0);
        assert_eq!(merge_fee(1, 0).unwrap(), 1);
        assert_eq!(merge_fee(2, DENOMINATOR).unwrap(), 2);
        assert_eq!(merge_fee(1_000, 1_000).unwrap(), 101);
    }

    #[test]
    fn withdrawal_fee_rounds_down_to_zero() {
        assert_eq!(withdrawal_fee(19, 500).unwrap(), 0);
        assert_eq!(withdrawal_fee(20, 500).unwrap(), 1);
    }

    #[test]
    fn compete_moves_damage_and_spend() {
        // 20_000 remaining supply: 1:1 damage
        let mut engine = engine_with(&[(1, ALICE, 500), (2, BOB, 300)]);
        let receipt = engine.compete(ActionContext::new(ALICE, 10), 1, 2, 120).unwrap();
        assert_eq!(receipt.outcome.rp_spent, 120);
        assert_eq!(receipt.outcome.damage, 120);
        assert_eq!(receipt.outcome.caller_balance, 380);
        assert_eq!(receipt.outcome.target_balance, 180);

        let caller = engine.get_enterprise(1).unwrap();
        assert_eq!(caller.compete_spend, 120);
        assert_eq!(caller.damage_dealt, 120);
        assert_eq!(engine.get_enterprise(2).unwrap().damage_taken, 120);
    }

    #[test]
    fn compete_overkill_charges_only_what_zeroes_target() {
        let mut engine = engine_with(&[(1, ALICE, 500), (2, BOB, 30)]);
        let receipt = engine.compete(ActionContext::new(ALICE, 10), 1, 2, 400).unwrap();
        assert_eq!(receipt.outcome.damage, 30);
        assert_eq!(receipt.outcome.rp_spent, 30);
        assert_eq!(receipt.outcome.target_balance, 0);
        assert_eq!(receipt.outcome.caller_balance, 470);
    }

    #[test]
    fn compete_beyond_balance_fails_without_side_effects() {
        let mut engine = engine_with(&[(1, ALICE, 50), (2, BOB, 300)]);
        let before = *engine.get_enterprise(1).unwrap();
        let err = engine.compete(ActionContext::new(ALICE, 10), 1, 2, 60).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientBalance { required: 60, available: 50 }));
        assert_eq!(*engine.get_enterprise(1).unwrap(), before);
        assert_eq!(engine.get_enterprise(2).unwrap().stored_balance, 300);
    }

    #[test]
    fn compete_preconditions() {
        let mut engine = engine_with(&[(1, ALICE, 50), (2, BOB, 30)]);
        let ctx = ActionContext::new(ALICE, 1);
        assert!(matches!(engine.compete(ctx, 2, 1, 5), Err(EngineError::NotOwner { id: 2, .. })));
        assert!(matches!(engine.compete(ctx, 1, 1, 5), Err(EngineError::SelfTarget(1))));
        assert!(matches!(engine.compete(ctx, 1, 9, 5), Err(EngineError::UnknownEnterprise(9))));
        assert!(matches!(engine.compete(ctx, 1, 2, 0), Err(EngineError::ZeroAmount)));
    }

    #[test]
    fn compete_drops_caller_shields() {
        let mut engine = engine_with(&[(1, ALICE, 500), (2, BOB, 300), (3, ALICE, 10)]);
        engine.merge(ActionContext::new(ALICE, 5), 1, 3, 3).unwrap();
        assert_eq!(engine.immunity_of(1, 6).unwrap(), Some(Immunity::Merger));
        engine.compete(ActionContext::new(ALICE, 6), 1, 2, 10).unwrap();
        assert_eq!(engine.get_enterprise(1).unwrap().merger_immunity_start, None);
        assert_eq!(engine.immunity_of(1, 7).unwrap(), None);
    }

    #[test]
    fn moated_target_cannot_be_competed() {
        let mut engine = engine_with(&[(1, ALICE, 500), (2, BOB, 1_000)]);
        assert!(engine.enterprise_has_moat(2, 1).unwrap());
        let err = engine.compete(ActionContext::new(ALICE, 1), 1, 2, 10).unwrap_err();
        assert!(matches!(err, EngineError::TargetImmune { id: 2, kind: Immunity::Moat }));
    }

    #[test]
    fn merge_with_full_burn_transfers_nothing() {
        let mut engine = engine_with(&[(1, ALICE, 10), (2, ALICE, 2)]);
        engine.set_merger_burn_bps(ADMIN, DENOMINATOR).unwrap();
        let receipt = engine.merge(ActionContext::new(ALICE, 1), 1, 2, 2).unwrap();
        assert_eq!(receipt.fee, 2);
        assert_eq!(receipt.transferred, 0);
        assert_eq!(receipt.survivor_balance, 10);
        assert_eq!(engine.get_enterprise(2).unwrap().stored_balance, 0);
        assert_eq!(engine.get_enterprise(1).unwrap().merge_count, 1);
        assert_eq!(engine.get_enterprise(1).unwrap().merger_immunity_start, Some(1));
    }

    #[test]
    fn merge_requires_owned_pair_and_valid_burn_target() {
        let mut engine = engine_with(&[(1, ALICE, 10), (2, ALICE, 2), (3, BOB, 2)]);
        let ctx = ActionContext::new(ALICE, 1);
        assert!(matches!(
            engine.merge(ctx, 1, 2, 3),
            Err(EngineError::InvalidBurnTarget { burn: 3, first: 1, second: 2 })
        ));
        assert!(matches!(engine.merge(ctx, 1, 3, 3), Err(EngineError::NotOwner { id: 3, .. })));
        assert!(matches!(engine.merge(ctx, 1, 1, 1), Err(EngineError::SelfTarget(1))));
    }

    #[test]
    fn acquire_keeps_chosen_side() {
        let mut engine = engine_with(&[(1, ALICE, 100), (2, BOB, 200)]);
        let receipt = engine
            .acquire(ActionContext::new(ALICE, 1), 1, 2, Survivor::Target)
            .unwrap();
        assert_eq!(receipt.survivor, 2);
        assert_eq!(receipt.retired, 1);
        // 100 burnt at 10% + 1
        assert_eq!(receipt.fee, 11);
        assert_eq!(receipt.survivor_balance, 289);
        let survivor = engine.get_enterprise(2).unwrap();
        assert_eq!(survivor.acquire_count, 1);
        assert_eq!(survivor.acquisition_immunity_start, Some(1));
        assert_eq!(engine.get_enterprise(1).unwrap().stored_balance, 0);
    }

    #[test]
    fn acquire_blocked_by_target_moat_or_shield() {
        let mut engine = engine_with(&[(1, ALICE, 1_500), (2, BOB, 1_200), (3, BOB, 10)]);
        let ctx = ActionContext::new(ALICE, 1);
        assert!(matches!(
            engine.acquire(ctx, 1, 2, Survivor::Caller),
            Err(EngineError::TargetImmune { id: 2, kind: Immunity::Moat })
        ));

        engine.compete(ActionContext::new(ALICE, 2), 1, 3, 10).unwrap();
        engine.revive(ActionContext::new(BOB, 2), 3).unwrap();
        assert!(matches!(
            engine.acquire(ActionContext::new(ALICE, 3), 1, 3, Survivor::Caller),
            Err(EngineError::TargetImmune { id: 3, kind: Immunity::Revival })
        ));
        engine
            .acquire(ActionContext::new(ALICE, 52), 1, 3, Survivor::Caller)
            .unwrap();
    }

    #[test]
    fn acquire_rejects_own_enterprise() {
        let mut engine = engine_with(&[(1, ALICE, 10), (2, ALICE, 10)]);
        assert!(matches!(
            engine.acquire(ActionContext::new(ALICE, 1), 1, 2, Survivor::Caller),
            Err(EngineError::OwnTarget(2))
        ));
    }

    #[test]
    fn compete_and_acquire_zeroes_then_absorbs() {
        let mut engine = engine_with(&[(1, ALICE, 500), (2, BOB, 40)]);
        let receipt = engine
            .compete_and_acquire(ActionContext::new(ALICE, 1), 1, 2, 100, Survivor::Caller)
            .unwrap();
        let compete = receipt.compete.unwrap();
        assert_eq!(compete.rp_spent, 40);
        assert_eq!(compete.target_balance, 0);
        // nothing left to transfer: fee capped at zero
        assert_eq!(receipt.fee, 0);
        assert_eq!(receipt.transferred, 0);
        assert_eq!(receipt.survivor_balance, 460);
        assert_eq!(engine.get_enterprise(1).unwrap().acquire_count, 1);
    }

    #[test]
    fn deposit_and_withdraw_settle_accrual_first() {
        let mut engine = engine_with(&[(1, ALICE, 0)]);
        engine
            .set_accrual_rates(
                ADMIN,
                AccrualRates {
                    max_per_day: 1_000,
                    base_per_day: 100,
                    per_merge: 0,
                    per_acquire: 0,
                },
            )
            .unwrap();
        engine.set_game_start_time(ADMIN, 0).unwrap();

        let receipt = engine.deposit(ActionContext::new(ALICE, SECONDS_PER_DAY), 1, 50).unwrap();
        assert_eq!(receipt.balance, 150);
        let row = engine.get_enterprise(1).unwrap();
        assert_eq!(row.stored_balance, 150);
        assert_eq!(row.last_accrual_time, SECONDS_PER_DAY);

        let receipt = engine.withdraw(ActionContext::new(ALICE, SECONDS_PER_DAY), 1, 100).unwrap();
        assert_eq!(receipt.burned, 5);
        assert_eq!(receipt.to_caller, 95);
        assert_eq!(receipt.balance, 50);

        assert!(matches!(
            engine.withdraw(ActionContext::new(ALICE, SECONDS_PER_DAY), 1, 51),
            Err(EngineError::InsufficientBalance { required: 51, available: 50 })
        ));
    }

    #[test]
    fn register_respects_tier_caps() {
        let mut engine = engine_with(&[]);
        engine.custody_mut().mint(1, ALICE);
        assert!(matches!(
            engine.register(ActionContext::new(ALICE, 0), 1, SupplyTier::Free),
            Err(EngineError::SupplyExhausted(SupplyTier::Free))
        ));
        engine.register(ActionContext::new(ALICE, 0), 1, SupplyTier::Auction).unwrap();
        assert!(matches!(
            engine.register(ActionContext::new(ALICE, 0), 1, SupplyTier::Auction),
            Err(EngineError::AlreadyRegistered(1))
        ));
        assert_eq!(engine.remaining_supply(), 19_999);
    }

    #[test]
    fn revive_requires_a_zeroed_enterprise() {
        let mut engine = engine_with(&[(1, ALICE, 5)]);
        assert!(matches!(
            engine.revive(ActionContext::new(ALICE, 1), 1),
            Err(EngineError::NotZeroed { id: 1, balance: 5 })
        ));
        // emptying it yourself is not the same as being knocked out
        engine.withdraw(ActionContext::new(ALICE, 1), 1, 5).unwrap();
        assert!(matches!(
            engine.revive(ActionContext::new(ALICE, 1), 1),
            Err(EngineError::NotZeroed { id: 1, balance: 0 })
        ));
    }

    #[test]
    fn retired_enterprise_revives_after_accruing() {
        let mut engine = engine_with(&[(1, ALICE, 50), (2, ALICE, 20)]);
        engine
            .set_accrual_rates(
                ADMIN,
                AccrualRates {
                    max_per_day: 1_000,
                    base_per_day: 100,
                    per_merge: 0,
                    per_acquire: 0,
                },
            )
            .unwrap();
        engine.set_game_start_time(ADMIN, 0).unwrap();

        engine.merge(ActionContext::new(ALICE, 10), 1, 2, 2).unwrap();
        assert_eq!(engine.get_enterprise(2).unwrap().zeroed_at, Some(10));
        assert_eq!(engine.get_enterprise(1).unwrap().zeroed_at, None);
        assert_eq!(engine.virtual_balance(2, SECONDS_PER_DAY).unwrap(), 99);

        let receipt = engine.revive(ActionContext::new(ALICE, SECONDS_PER_DAY), 2).unwrap();
        assert_eq!(receipt.balance, 0);
        let row = engine.get_enterprise(2).unwrap();
        assert_eq!(row.stored_balance, 0);
        assert_eq!(row.last_accrual_time, SECONDS_PER_DAY);
        assert_eq!(row.zeroed_at, None);
        assert_eq!(row.revival_immunity_start, Some(SECONDS_PER_DAY));

        assert!(matches!(
            engine.revive(ActionContext::new(ALICE, SECONDS_PER_DAY + 1), 2),
            Err(EngineError::NotZeroed { id: 2, .. })
        ));
    }

    #[test]
    fn deposit_puts_a_zeroed_enterprise_back_in_play() {
        let mut engine = engine_with(&[(1, ALICE, 100), (2, BOB, 10)]);
        engine.compete(ActionContext::new(ALICE, 1), 1, 2, 50).unwrap();
        assert_eq!(engine.get_enterprise(2).unwrap().zeroed_at, Some(1));
        engine.deposit(ActionContext::new(BOB, 2), 2, 1).unwrap();
        assert_eq!(engine.get_enterprise(2).unwrap().zeroed_at, None);
    }

    #[test]
    fn admin_setters_are_gated_validated_and_idempotent() {
        let mut engine = engine_with(&[]);
        assert!(matches!(
            engine.set_moat_threshold(ALICE, 5),
            Err(EngineError::NotAdmin { caller: ALICE })
        ));
        assert!(matches!(
            engine.set_withdrawal_burn_bps(ADMIN, DENOMINATOR + 1),
            Err(EngineError::PercentOutOfRange { .. })
        ));
        engine.set_moat_threshold(ADMIN, 5).unwrap();
        let snapshot = *engine.config();
        engine.set_moat_threshold(ADMIN, 5).unwrap();
        assert_eq!(*engine.config(), snapshot);
    }

    #[cfg(feature = "events")]
    #[test]
    fn each_settlement_emits_one_event() {
        let mut engine = engine_with(&[(1, ALICE, 100), (2, BOB, 100), (3, ALICE, 10), (4, BOB, 10)]);
        engine.take_events();

        engine.compete(ActionContext::new(ALICE, 1), 1, 2, 10).unwrap();
        engine.withdraw(ActionContext::new(ALICE, 1), 3, 5).unwrap();
        engine.merge(ActionContext::new(ALICE, 1), 1, 3, 3).unwrap();
        engine.acquire(ActionContext::new(ALICE, 1), 1, 4, Survivor::Caller).unwrap();
        engine.revive(ActionContext::new(BOB, 1), 4).unwrap();
        engine.set_moat_threshold(ADMIN, 1_000).unwrap();

        let events = engine.take_events();
        assert_eq!(events.len(), 5);
        assert!(matches!(events[0], SettlementEvent::Competed(CompeteOutcome { damage: 10, .. })));
        assert!(matches!(events[1], SettlementEvent::Withdrew { id: 3, amount: 5, balance: 5, .. }));
        assert!(matches!(events[2], SettlementEvent::Merged { survivor: 1, retired: 3, .. }));
        assert!(matches!(events[3], SettlementEvent::Acquired { survivor: 1, retired: 4, .. }));
        assert!(matches!(events[4], SettlementEvent::Revived { id: 4 }));
    }
}
