//! Block subsidy schedule.

use crate::money::Amount;
use crate::params::ConsensusParams;

/// Newly minted value a coinbase may claim at `height`, before fees.
pub fn block_subsidy(height: i32, params: &ConsensusParams) -> Amount {
    if height < 0 || params.subsidy_halving_interval <= 0 {
        return 0;
    }
    let halvings = height / params.subsidy_halving_interval;
    if halvings >= 64 {
        return 0;
    }
    params.initial_subsidy >> halvings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::COIN;
    use crate::params::{consensus_params, Network};

    #[test]
    fn halves_on_interval() {
        let params = consensus_params(Network::Regtest);
        assert_eq!(block_subsidy(0, &params), 50 * COIN);
        assert_eq!(block_subsidy(149, &params), 50 * COIN);
        assert_eq!(block_subsidy(150, &params), 25 * COIN);
        assert_eq!(block_subsidy(300, &params), 12 * COIN + 50_000_000);
    }

    #[test]
    fn exhausts_after_64_halvings() {
        let params = consensus_params(Network::Regtest);
        assert_eq!(block_subsidy(150 * 64, &params), 0);
        assert_eq!(block_subsidy(-1, &params), 0);
    }
}
