use thiserror::Error;

use crate::types::{AccountId, EnterpriseId, Immunity, Rp, SupplyTier, DENOMINATOR};

/// Every way a settlement, read or admin call can fail.
///
/// A failed operation never leaves persisted state behind, so callers can
/// resubmit without cleanup.
#[derive(Debug, Error)]
pub enum EngineError {
    // authorization
    #[error("{caller} is not the administrator")]
    NotAdmin { caller: AccountId },

    #[error("{caller} does not control enterprise {id}")]
    NotOwner { caller: AccountId, id: EnterpriseId },

    // preconditions
    #[error("enterprise {0} does not exist")]
    UnknownEnterprise(EnterpriseId),

    #[error("enterprise {0} is already registered")]
    AlreadyRegistered(EnterpriseId),

    #[error("enterprise {0} cannot act on itself")]
    SelfTarget(EnterpriseId),

    #[error("enterprise {0} is controlled by the caller")]
    OwnTarget(EnterpriseId),

    #[error("enterprise {id} is protected by its {kind}")]
    TargetImmune { id: EnterpriseId, kind: Immunity },

    #[error("burn target {burn} is neither {first} nor {second}")]
    InvalidBurnTarget {
        burn: EnterpriseId,
        first: EnterpriseId,
        second: EnterpriseId,
    },

    #[error("amount must be non-zero")]
    ZeroAmount,

    #[error("{0} supply is exhausted")]
    SupplyExhausted(SupplyTier),

    #[error("enterprise {id} was never zeroed and holds {balance} rp")]
    NotZeroed { id: EnterpriseId, balance: Rp },

    // arithmetic
    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: Rp, available: Rp },

    #[error("arithmetic overflow in {0}")]
    ArithmeticOverflow(&'static str),

    // configuration
    #[error("{field} = {value} exceeds {max}", max = DENOMINATOR)]
    PercentOutOfRange { field: &'static str, value: u32 },

    #[error("{tier} cap {cap} is below the {minted} already minted")]
    SupplyCapBelowMinted { tier: SupplyTier, cap: u64, minted: u64 },

    #[error("price floor {floor} exceeds ceiling {ceiling}")]
    InvalidPriceWindow { floor: Rp, ceiling: Rp },

    #[error("period length must be non-zero")]
    ZeroPeriod,

    #[error("config decode failed: {0}")]
    ConfigDecode(#[from] serde_json::Error),
}

pub type Result<T> = core::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_participants() {
        let err = EngineError::NotOwner { caller: AccountId(3), id: 9 };
        assert_eq!(err.to_string(), "account#3 does not control enterprise 9");

        let err = EngineError::TargetImmune { id: 4, kind: Immunity::Moat };
        assert_eq!(err.to_string(), "enterprise 4 is protected by its moat");

        let err = EngineError::PercentOutOfRange { field: "merger_burn_bps", value: 10_001 };
        assert_eq!(err.to_string(), "merger_burn_bps = 10001 exceeds 10000");
    }

    #[test]
    fn serde_errors_convert() {
        let raw = serde_json::from_str::<u32>("not json").unwrap_err();
        let err: EngineError = raw.into();
        assert!(matches!(err, EngineError::ConfigDecode(_)));
    }
}
