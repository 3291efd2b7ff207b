//! Economy core for competing enterprises.
//!
//! Balances accrue lazily over time, are spent to damage rivals, and are
//! folded together by mergers and acquisitions. Every settlement commits
//! atomically together with the moat evaluation of its participants.

pub mod accrual;
pub mod config;
pub mod custody;
pub mod damage;
pub mod error;
pub mod hooks;
pub mod moat;
pub mod period;
pub mod pricing;
pub mod settlement;
pub mod store;
pub mod types;

pub use config::{AccrualRates, EconomyConfig, ImmunityWindows, SupplyCaps};
pub use custody::{CustodyRegistry, InMemoryCustody};
pub use error::{EngineError, Result};
pub use hooks::{ActionHookDispatcher, HookOutcome, MoatUpdate, SettledBalance};
pub use moat::{MoatPhase, MoatRecord};
pub use pricing::{CheckpointParams, CostQuote, CostQuoter, DynamicCheckpoint, FixedCost, PriceSplit};
pub use settlement::{
    AcquireReceipt, ActionContext, BalanceReceipt, CompeteOutcome, CompeteReceipt, MergeReceipt,
    SettlementEngine, SettlementEvent, Survivor, WithdrawReceipt,
};
pub use types::{
    AccountId, Enterprise, EnterpriseId, Immunity, Rp, SupplyTier, Timestamp, DENOMINATOR, RP_UNIT,
    SECONDS_PER_DAY,
};
