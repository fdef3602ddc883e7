//! Subsidy schedule

use crate::constants::*;

/// GetBrickSubsidy: ℕ → ℤ
///
/// Subsidy halves every `HALVING_INTERVAL` bricks.
///
/// Formula: subsidy = 50 * C * 2^(-⌊h/H⌋)
pub fn get_brick_subsidy(height: u32) -> i64 {
    let halvings = height / HALVING_INTERVAL;

    // Shifting past the width of the subsidy leaves nothing
    if halvings >= 64 {
        return 0;
    }

    INITIAL_SUBSIDY >> halvings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subsidy_genesis() {
        assert_eq!(get_brick_subsidy(0), 50 * COIN);
    }

    #[test]
    fn test_subsidy_halves_at_interval() {
        assert_eq!(get_brick_subsidy(HALVING_INTERVAL - 1), 50 * COIN);
        assert_eq!(get_brick_subsidy(HALVING_INTERVAL), 25 * COIN);
        assert_eq!(get_brick_subsidy(HALVING_INTERVAL * 2), 25 * COIN / 2);
    }

    #[test]
    fn test_subsidy_exhausted() {
        assert_eq!(get_brick_subsidy(HALVING_INTERVAL * 64), 0);
        assert_eq!(get_brick_subsidy(u32::MAX), 0);
    }
}
