use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::types::{Rp, SupplyCounters, SupplyTier, Timestamp, DENOMINATOR, RP_UNIT, SECONDS_PER_DAY};

/// Passive accrual rates, all in rp per day.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccrualRates {
    pub max_per_day: Rp,
    pub base_per_day: Rp,
    pub per_merge: Rp,
    pub per_acquire: Rp,
}

impl Default for AccrualRates {
    fn default() -> Self {
        AccrualRates {
            max_per_day: 10 * RP_UNIT,
            base_per_day: RP_UNIT,
            per_merge: RP_UNIT / 2,
            per_acquire: RP_UNIT,
        }
    }
}

/// Shield lengths in seconds, measured from the matching `*_immunity_start`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImmunityWindows {
    pub acquisition: u64,
    pub merger: u64,
    pub revival: u64,
}

impl Default for ImmunityWindows {
    fn default() -> Self {
        ImmunityWindows {
            acquisition: SECONDS_PER_DAY,
            merger: SECONDS_PER_DAY,
            revival: SECONDS_PER_DAY,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupplyCaps {
    pub auction: u64,
    pub free: u64,
    pub reserved: u64,
}

impl SupplyCaps {
    pub fn cap(&self, tier: SupplyTier) -> u64 {
        match tier {
            SupplyTier::Auction => self.auction,
            SupplyTier::Free => self.free,
            SupplyTier::Reserved => self.reserved,
        }
    }

    /// Unminted supply summed over all tiers.
    pub fn remaining(&self, minted: &SupplyCounters) -> u64 {
        SupplyTier::ALL
            .iter()
            .map(|&tier| self.cap(tier).saturating_sub(minted.minted(tier)))
            .sum()
    }

    pub fn check_against(&self, minted: &SupplyCounters) -> Result<()> {
        for tier in SupplyTier::ALL {
            let cap = self.cap(tier);
            let already = minted.minted(tier);
            if cap < already {
                return Err(EngineError::SupplyCapBelowMinted { tier, cap, minted: already });
            }
        }
        Ok(())
    }
}

impl Default for SupplyCaps {
    fn default() -> Self {
        SupplyCaps {
            auction: 5_000,
            free: 4_000,
            reserved: 1_000,
        }
    }
}

/// Administrator-tunable economy parameters.
///
/// Changes apply from the moment they are made: accrual is always computed
/// lazily with the current values, so no stored balance is rewritten.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomyConfig {
    pub game_start_time: Option<Timestamp>,
    pub rates: AccrualRates,
    pub merger_burn_bps: u32,
    pub withdrawal_burn_bps: u32,
    pub moat_threshold: Rp,
    pub moat_immunity_period: u64,
    pub immunity: ImmunityWindows,
    pub supply_caps: SupplyCaps,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        EconomyConfig {
            game_start_time: None,
            rates: AccrualRates::default(),
            merger_burn_bps: 1_000,
            withdrawal_burn_bps: 500,
            moat_threshold: 1_000 * RP_UNIT,
            moat_immunity_period: SECONDS_PER_DAY,
            immunity: ImmunityWindows::default(),
            supply_caps: SupplyCaps::default(),
        }
    }
}

impl EconomyConfig {
    /// Decode and validate a JSON document. Missing fields take defaults.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: EconomyConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        check_bps("merger_burn_bps", self.merger_burn_bps)?;
        check_bps("withdrawal_burn_bps", self.withdrawal_burn_bps)?;
        Ok(())
    }
}

pub(crate) fn check_bps(field: &'static str, value: u32) -> Result<()> {
    if value > DENOMINATOR {
        return Err(EngineError::PercentOutOfRange { field, value });
    }
    Ok(())
}
