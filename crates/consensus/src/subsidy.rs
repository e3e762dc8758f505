//! Block subsidy schedule and bee pricing.

use crate::money::{Amount, COIN, COIN_SCALE};
use crate::params::ConsensusParams;

pub fn block_subsidy(height: i32, params: &ConsensusParams) -> Amount {
    if height == params.last_scrypt_block + 1 {
        return params.premine_amount;
    }
    if height >= params.total_money_supply_height {
        return 0;
    }

    let halvings = height / params.subsidy_halving_interval;
    if halvings >= 64 {
        return 0;
    }

    let mut subsidy = 50 * COIN * COIN_SCALE;
    let since_fork = height - params.last_scrypt_block;
    if since_fork > 1 && since_fork <= params.slow_start_blocks {
        subsidy = subsidy * Amount::from(since_fork) / Amount::from(params.slow_start_blocks);
    }
    subsidy >> halvings
}

/// Price of a single bee for a BCT mined at `height`.
pub fn bee_cost(height: i32, params: &ConsensusParams) -> Amount {
    let cost = block_subsidy(height, params) / params.hive.bee_cost_factor;
    cost.max(params.hive.min_bee_cost)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{consensus_params, Network};

    #[test]
    fn subsidy_halves_and_ends() {
        let params = consensus_params(Network::Mainnet);
        let initial = 50 * COIN * COIN_SCALE;
        assert_eq!(block_subsidy(0, &params), initial);
        assert_eq!(block_subsidy(840_000, &params), initial / 2);
        assert_eq!(block_subsidy(1_680_000, &params), initial / 4);
        assert_eq!(block_subsidy(params.total_money_supply_height, &params), 0);
    }

    #[test]
    fn premine_and_slow_start() {
        let params = consensus_params(Network::Mainnet);
        let fork = params.last_scrypt_block;
        assert_eq!(block_subsidy(fork + 1, &params), params.premine_amount);

        let ramp = block_subsidy(fork + 2, &params);
        let full = block_subsidy(fork + params.slow_start_blocks + 1, &params);
        assert!(ramp < full);
        assert_eq!(full, (50 * COIN * COIN_SCALE) >> 1);
    }

    #[test]
    fn bee_cost_respects_floor() {
        let mut params = consensus_params(Network::Mainnet);
        assert_eq!(
            bee_cost(2_000_000, &params),
            block_subsidy(2_000_000, &params) / 2_500
        );
        params.hive.min_bee_cost = COIN * 1_000;
        assert_eq!(bee_cost(2_000_000, &params), COIN * 1_000);
    }
}
