use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::check_bps;
use crate::error::{EngineError, Result};
use crate::period::PeriodCounter;
use crate::types::{EnterpriseId, Rp, Timestamp, DENOMINATOR};

/// Price of an action split between its three destinations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostQuote {
    pub to_recipient: Rp,
    pub to_treasury: Rp,
    pub to_burn: Rp,
}

impl CostQuote {
    pub fn total(&self) -> Rp {
        self.to_recipient
            .saturating_add(self.to_treasury)
            .saturating_add(self.to_burn)
    }
}

/// Pluggable price oracle for actions between two enterprises.
pub trait CostQuoter {
    fn quote(&self, caller: EnterpriseId, target: EnterpriseId, now: Timestamp) -> CostQuote;

    /// Quote and record that the action is being taken.
    fn quote_and_bump(&mut self, caller: EnterpriseId, target: EnterpriseId, now: Timestamp) -> CostQuote;
}

/// Same price for every action, forever.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FixedCost {
    pub cost: CostQuote,
}

impl CostQuoter for FixedCost {
    fn quote(&self, _caller: EnterpriseId, _target: EnterpriseId, _now: Timestamp) -> CostQuote {
        self.cost
    }

    fn quote_and_bump(&mut self, caller: EnterpriseId, target: EnterpriseId, now: Timestamp) -> CostQuote {
        self.quote(caller, target, now)
    }
}

/// Recipient and treasury shares in basis points; the rest is burned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSplit {
    pub recipient_bps: u32,
    pub treasury_bps: u32,
}

impl PriceSplit {
    pub fn validate(&self) -> Result<()> {
        check_bps("recipient_bps", self.recipient_bps)?;
        check_bps("treasury_bps", self.treasury_bps)?;
        check_bps("recipient_bps + treasury_bps", self.recipient_bps + self.treasury_bps)
    }

    pub fn apply(&self, price: Rp) -> CostQuote {
        let to_recipient = bps_share(price, self.recipient_bps);
        let to_treasury = bps_share(price, self.treasury_bps);
        CostQuote {
            to_recipient,
            to_treasury,
            to_burn: price - to_recipient - to_treasury,
        }
    }
}

/// `floor(amount * bps / DENOMINATOR)` without an intermediate overflow.
fn bps_share(amount: Rp, bps: u32) -> Rp {
    let denominator = DENOMINATOR as Rp;
    let bps = bps as Rp;
    (amount / denominator) * bps + (amount % denominator) * bps / denominator
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointParams {
    pub floor: Rp,
    pub ceiling: Rp,
    /// Price increase per recorded action.
    pub bump_bps: u32,
    pub decay_per_second: Rp,
    pub split: PriceSplit,
    /// Length of the window over which actions are counted.
    pub period: u64,
}

/// Two-sided price: every action pushes it up, idle time pulls it back down.
///
/// Only the last checkpoint is stored; the current price is derived from it
/// on every read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DynamicCheckpoint {
    params: CheckpointParams,
    checkpoint_price: Rp,
    checkpoint_time: Timestamp,
    actions: PeriodCounter,
}

impl DynamicCheckpoint {
    pub fn new(params: CheckpointParams, now: Timestamp) -> Result<Self> {
        if params.floor > params.ceiling {
            return Err(EngineError::InvalidPriceWindow {
                floor: params.floor,
                ceiling: params.ceiling,
            });
        }
        check_bps("bump_bps", params.bump_bps)?;
        params.split.validate()?;
        Ok(DynamicCheckpoint {
            params,
            checkpoint_price: params.floor,
            checkpoint_time: now,
            actions: PeriodCounter::new(params.period, now)?,
        })
    }

    pub fn price_at(&self, now: Timestamp) -> Rp {
        let idle = now.saturating_sub(self.checkpoint_time) as Rp;
        let decayed = self
            .checkpoint_price
            .saturating_sub(self.params.decay_per_second.saturating_mul(idle));
        decayed.max(self.params.floor)
    }

    pub fn actions_in_period(&self, now: Timestamp) -> u64 {
        self.actions.count(now)
    }
}

impl CostQuoter for DynamicCheckpoint {
    fn quote(&self, _caller: EnterpriseId, _target: EnterpriseId, now: Timestamp) -> CostQuote {
        self.params.split.apply(self.price_at(now))
    }

    fn quote_and_bump(&mut self, caller: EnterpriseId, target: EnterpriseId, now: Timestamp) -> CostQuote {
        let price = self.price_at(now);
        let quote = self.params.split.apply(price);

        let raised = price.saturating_add(bps_share(price, self.params.bump_bps));
        self.checkpoint_price = raised.min(self.params.ceiling);
        self.checkpoint_time = now;
        let actions = self.actions.bump(now);

        debug!(
            target: "enterprise.pricing",
            caller,
            target_id = target,
            price = %price,
            next_price = %self.checkpoint_price,
            actions,
            "price checkpoint bumped"
        );
        quote
    }
}
