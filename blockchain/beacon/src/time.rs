// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Round arithmetic. Rounds are paced on a fixed cadence: round 1 happens at
//! `genesis_time`, round `r` at `genesis_time + (r - 1) * period`. Round 0 is
//! the genesis sentinel and is never produced.

use std::time::Duration;

/// The round expected at unix time `now`, or 0 before genesis.
pub fn current_round(now: u64, period: Duration, genesis_time: u64) -> u64 {
    if now < genesis_time {
        return 0;
    }
    (now - genesis_time) / period.as_secs() + 1
}

/// The unix time a round is due at. The sentinel round maps to genesis.
pub fn time_of_round(period: Duration, genesis_time: u64, round: u64) -> u64 {
    if round == 0 {
        return genesis_time;
    }
    genesis_time + (round - 1) * period.as_secs()
}

/// The next round to be produced after `now` and the time it is due.
pub fn next_round(now: u64, period: Duration, genesis_time: u64) -> (u64, u64) {
    let next = current_round(now, period, genesis_time) + 1;
    (next, time_of_round(period, genesis_time, next))
}

#[cfg(test)]
mod tests {
    use super::*;

    const GENESIS: u64 = 1_700_000_000;
    const PERIOD: Duration = Duration::from_secs(30);

    #[test]
    fn before_genesis() {
        assert_eq!(current_round(GENESIS - 1, PERIOD, GENESIS), 0);
        assert_eq!(next_round(GENESIS - 1, PERIOD, GENESIS), (1, GENESIS));
    }

    #[test]
    fn at_genesis() {
        assert_eq!(current_round(GENESIS, PERIOD, GENESIS), 1);
        assert_eq!(time_of_round(PERIOD, GENESIS, 1), GENESIS);
    }

    #[test]
    fn mid_chain() {
        let now = GENESIS + 95;
        assert_eq!(current_round(now, PERIOD, GENESIS), 4);
        assert_eq!(time_of_round(PERIOD, GENESIS, 4), GENESIS + 90);
        assert_eq!(next_round(now, PERIOD, GENESIS), (5, GENESIS + 120));
    }

    #[test]
    fn round_boundaries() {
        assert_eq!(current_round(GENESIS + 29, PERIOD, GENESIS), 1);
        assert_eq!(current_round(GENESIS + 30, PERIOD, GENESIS), 2);
    }

    #[test]
    fn sentinel_round_maps_to_genesis() {
        assert_eq!(time_of_round(PERIOD, GENESIS, 0), GENESIS);
    }
}
