use core::fmt;

use serde::{Deserialize, Serialize};

pub type EnterpriseId = u64;
pub type Timestamp = u64;
/// Resource points, fixed point with [`RP_DECIMALS`] decimals.
pub type Rp = u128;

pub const RP_DECIMALS: u32 = 18;
pub const RP_UNIT: Rp = 1_000_000_000_000_000_000;

/// Basis-point denominator shared by every percentage field.
pub const DENOMINATOR: u32 = 10_000;

pub const SECONDS_PER_DAY: u64 = 86_400;

/// Controlling account as reported by the custody registry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(pub u64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "account#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SupplyTier {
    Auction = 0,
    Free = 1,
    Reserved = 2,
}

impl SupplyTier {
    pub const ALL: [SupplyTier; 3] = [SupplyTier::Auction, SupplyTier::Free, SupplyTier::Reserved];
}

impl fmt::Display for SupplyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SupplyTier::Auction => "auction",
            SupplyTier::Free => "free",
            SupplyTier::Reserved => "reserved",
        };
        f.write_str(name)
    }
}

/// Why an enterprise cannot currently be targeted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Immunity {
    Moat,
    Acquisition,
    Merger,
    Revival,
}

impl fmt::Display for Immunity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Immunity::Moat => "moat",
            Immunity::Acquisition => "acquisition shield",
            Immunity::Merger => "merger shield",
            Immunity::Revival => "revival shield",
        };
        f.write_str(name)
    }
}

/// Persisted enterprise row.
///
/// `stored_balance` is only authoritative at `last_accrual_time`; the current
/// balance is always derived through [`crate::accrual::compute_balance`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enterprise {
    pub id: EnterpriseId,
    pub tier: SupplyTier,
    pub stored_balance: Rp,
    pub last_accrual_time: Timestamp,
    pub merge_count: u32,
    pub acquire_count: u32,
    pub acquisition_immunity_start: Option<Timestamp>,
    pub merger_immunity_start: Option<Timestamp>,
    pub revival_immunity_start: Option<Timestamp>,
    pub damage_dealt: Rp,
    pub damage_taken: Rp,
    pub compete_spend: Rp,
    /// Set when a compete drains the balance or a merge retires the row;
    /// only such an enterprise may be revived.
    pub zeroed_at: Option<Timestamp>,
}

impl Enterprise {
    pub fn new(id: EnterpriseId, tier: SupplyTier, now: Timestamp) -> Self {
        Enterprise {
            id,
            tier,
            stored_balance: 0,
            last_accrual_time: now,
            merge_count: 0,
            acquire_count: 0,
            acquisition_immunity_start: None,
            merger_immunity_start: None,
            revival_immunity_start: None,
            damage_dealt: 0,
            damage_taken: 0,
            compete_spend: 0,
            zeroed_at: None,
        }
    }

    /// Drop every shield. Used when the enterprise goes on the offensive.
    ///
    /// The starts become `None` rather than `now`: restarting them at `now`
    /// would leave an attacker shielded for a full window.
    pub fn clear_shields(&mut self) {
        self.acquisition_immunity_start = None;
        self.merger_immunity_start = None;
        self.revival_immunity_start = None;
    }
}

/// Minted count per supply tier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplyCounters {
    minted: [u64; 3],
}

impl SupplyCounters {
    pub fn minted(&self, tier: SupplyTier) -> u64 {
        self.minted[tier as usize]
    }

    pub fn total_minted(&self) -> u64 {
        self.minted.iter().sum()
    }

    pub(crate) fn record_mint(&mut self, tier: SupplyTier) {
        self.minted[tier as usize] += 1;
    }
}
