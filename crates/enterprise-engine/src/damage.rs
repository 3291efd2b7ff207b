use crate::error::{EngineError, Result};
use crate::types::Rp;

/// Multiplier applied while unminted supply stays above every threshold.
pub const BASE_DIFFICULTY: u64 = 100;

#[derive(Clone, Copy, Debug)]
pub struct DifficultyTier {
    pub max_remaining: u64,
    pub difficulty_percent: u64,
}

const fn tier(max_remaining: u64, difficulty_percent: u64) -> DifficultyTier {
    DifficultyTier {
        max_remaining,
        difficulty_percent,
    }
}

/// Descending by threshold, so difficulty climbs as supply runs out.
pub const DIFFICULTY_TIERS: [DifficultyTier; 11] = [
    tier(10_000, 110),
    tier(7_500, 125),
    tier(5_000, 150),
    tier(2_500, 200),
    tier(1_000, 350),
    tier(500, 600),
    tier(250, 1_250),
    tier(100, 3_000),
    tier(50, 10_000),
    tier(30, 30_000),
    tier(15, 102_500),
];

/// Difficulty for the tightest bracket `remaining_supply` falls into.
pub fn difficulty_percent(remaining_supply: u64) -> u64 {
    let mut selected = BASE_DIFFICULTY;
    for t in DIFFICULTY_TIERS.iter() {
        if remaining_supply <= t.max_remaining {
            selected = t.difficulty_percent;
        } else {
            break;
        }
    }
    selected
}

/// Damage dealt by spending `rp_spent`. Rounds toward zero.
pub fn damage(remaining_supply: u64, rp_spent: Rp) -> Result<Rp> {
    let difficulty = difficulty_percent(remaining_supply) as Rp;
    let scaled = rp_spent
        .checked_mul(100)
        .ok_or(EngineError::ArithmeticOverflow("damage"))?;
    Ok(scaled / difficulty)
}

/// Resource needed for `damage_wanted`, floor of the exact proportion.
pub fn rp_required(remaining_supply: u64, damage_wanted: Rp) -> Result<Rp> {
    let difficulty = difficulty_percent(remaining_supply) as Rp;
    let scaled = damage_wanted
        .checked_mul(difficulty)
        .ok_or(EngineError::ArithmeticOverflow("rp required"))?;
    Ok(scaled / 100)
}

/// Smallest spend whose [`damage`] reaches `damage_wanted`.
///
/// Used to charge exactly enough to zero a target on overkill; it never
/// undercharges because it rounds the proportion up.
pub fn rp_required_ceil(remaining_supply: u64, damage_wanted: Rp) -> Result<Rp> {
    let difficulty = difficulty_percent(remaining_supply) as Rp;
    let scaled = damage_wanted
        .checked_mul(difficulty)
        .ok_or(EngineError::ArithmeticOverflow("rp required"))?;
    Ok(scaled.div_ceil(100))
}
