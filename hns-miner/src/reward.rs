//! Block subsidy schedule (spec.md §4.B).

use hns_chain::{Amount, COIN};

const BASE_REWARD: i64 = 1000 * COIN;
const MAX_HALVINGS: u32 = 52;

/// `base = 1000*COIN; halvings = floor(height/interval); reward = halvings
/// >= 52 ? 0 : base >> halvings`.
pub fn base_reward(height: u32, halving_interval: u32) -> Amount {
    let halvings = height / halving_interval;
    let units = if halvings >= MAX_HALVINGS {
        0
    } else {
        BASE_REWARD >> halvings
    };
    Amount::from_base_units(units).expect("subsidy never exceeds MAX_MONEY")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halves_on_schedule() {
        assert_eq!(base_reward(0, 170_000).base_units(), BASE_REWARD);
        assert_eq!(base_reward(170_000, 170_000).base_units(), BASE_REWARD / 2);
        assert_eq!(base_reward(170_000 * 2, 170_000).base_units(), BASE_REWARD / 4);
    }

    #[test]
    fn zero_past_max_halvings() {
        assert_eq!(base_reward(170_000 * 60, 170_000).base_units(), 0);
    }
}
