//! Consensus timing configuration.

use basalt_types::BLOCK_PART_SIZE_BYTES;

/// Timeouts and sizes driving the round state machine.
///
/// The per-round deltas grow each timeout linearly with the round number
/// so that a partitioned network eventually overlaps long enough to
/// decide.
#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    /// How long to wait for a proposal in round 0.
    pub timeout_propose_ms: u64,
    /// Extra proposal wait per round.
    pub timeout_propose_delta_ms: u64,
    /// How long to wait for remaining prevotes after seeing +2/3 of any.
    pub timeout_prevote_ms: u64,
    pub timeout_prevote_delta_ms: u64,
    /// How long to wait for remaining precommits after seeing +2/3 of any.
    pub timeout_precommit_ms: u64,
    pub timeout_precommit_delta_ms: u64,
    /// Pause between applying a block and starting the next height.
    pub timeout_commit_ms: u64,
    /// Size of block gossip parts.
    pub block_part_size: u32,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            timeout_propose_ms: 3000,
            timeout_propose_delta_ms: 500,
            timeout_prevote_ms: 1000,
            timeout_prevote_delta_ms: 500,
            timeout_precommit_ms: 1000,
            timeout_precommit_delta_ms: 500,
            timeout_commit_ms: 1000,
            block_part_size: BLOCK_PART_SIZE_BYTES,
        }
    }
}

impl ConsensusConfig {
    pub fn propose_timeout_ms(&self, round: i32) -> u64 {
        self.timeout_propose_ms + self.timeout_propose_delta_ms * round.max(0) as u64
    }

    pub fn prevote_timeout_ms(&self, round: i32) -> u64 {
        self.timeout_prevote_ms + self.timeout_prevote_delta_ms * round.max(0) as u64
    }

    pub fn precommit_timeout_ms(&self, round: i32) -> u64 {
        self.timeout_precommit_ms + self.timeout_precommit_delta_ms * round.max(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_grow_with_round() {
        let config = ConsensusConfig::default();
        assert_eq!(config.propose_timeout_ms(0), 3000);
        assert_eq!(config.propose_timeout_ms(2), 4000);
        assert!(config.prevote_timeout_ms(3) > config.prevote_timeout_ms(0));
        assert!(config.precommit_timeout_ms(3) > config.precommit_timeout_ms(0));
    }
}
