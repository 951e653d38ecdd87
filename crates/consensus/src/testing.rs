//! Test fixtures shared by unit and integration tests.

use std::sync::Arc;

use parking_lot::Mutex;

use basalt_mempool::UnappliedTxQueue;
use basalt_types::{
    Block, BlockData, BlockHeader, BlockId, ConsensusParams, EvidenceData, Hash, KeyPair, PartSet,
    PartSetHeader, Proposal, Validator, ValidatorSet, Vote, VoteType,
};

use crate::{ChainState, ConsensusConfig, ConsensusState, InMemoryEvidencePool};

/// A validator set with its signing keys, sorted by address so key index
/// `i` signs for validator index `i`.
pub struct ValidatorFixture {
    pub chain_id: String,
    pub pairs: Vec<KeyPair>,
    pub validators: Arc<ValidatorSet>,
}

impl ValidatorFixture {
    pub fn new(chain_id: &str, powers: &[i64]) -> Self {
        let mut pairs: Vec<KeyPair> = powers.iter().map(|_| KeyPair::generate()).collect();
        pairs.sort_by_key(|p| p.address());
        let validators = Arc::new(
            ValidatorSet::new(
                pairs
                    .iter()
                    .zip(powers)
                    .map(|(p, &power)| Validator::new(p.public_key(), power))
                    .collect(),
            )
            .unwrap(),
        );
        Self {
            chain_id: chain_id.to_owned(),
            pairs,
            validators,
        }
    }

    /// A signed vote from validator `index`.
    pub fn signed_vote(
        &self,
        index: usize,
        vote_type: VoteType,
        height: i64,
        round: i32,
        block_id: BlockId,
    ) -> Vote {
        let pair = &self.pairs[index];
        let mut vote = Vote {
            vote_type,
            height,
            round,
            block_id,
            timestamp: 1000 + index as i64,
            validator_address: pair.address(),
            validator_index: index as i32,
            signature: None,
        };
        vote.signature = Some(pair.sign(&vote.sign_bytes(&self.chain_id)));
        vote
    }
}

/// A distinct, complete block id derived from `seed`.
pub fn block_id(seed: u8) -> BlockId {
    BlockId {
        hash: Hash([seed; 32]),
        part_set_header: PartSetHeader {
            total: 1,
            hash: Hash([seed; 32]),
        },
    }
}

impl ValidatorFixture {
    /// The chain state all nodes of this fixture start from.
    pub fn chain_state(&self) -> ChainState {
        let mut next = (*self.validators).clone();
        next.increment_proposer_priority(1);
        ChainState {
            chain_id: self.chain_id.clone(),
            initial_height: 1,
            last_block_height: 0,
            last_block_id: BlockId::nil(),
            last_block_time: 0,
            validators: self.validators.clone(),
            next_validators: Arc::new(next),
            last_validators: self.validators.clone(),
            app_hash: Hash::ZERO,
            last_results_hash: Hash::ZERO,
            consensus_params: ConsensusParams::default(),
        }
    }

    /// A consensus state machine owned by validator `index`, with a fresh
    /// mempool and evidence pool.
    pub fn consensus_node(&self, index: usize) -> ConsensusState {
        ConsensusState::new(
            ConsensusConfig::default(),
            self.chain_state(),
            self.pairs[index].clone(),
            Arc::new(Mutex::new(UnappliedTxQueue::new())),
            Arc::new(InMemoryEvidencePool::new()),
        )
    }

    /// The validator index proposing at (initial height, `round`).
    pub fn proposer_index(&self, round: i32) -> usize {
        let mut validators = (*self.validators).clone();
        validators.increment_proposer_priority(round);
        let address = validators.proposer().address;
        self.pairs
            .iter()
            .position(|p| p.address() == address)
            .expect("proposer is in the fixture")
    }

    /// A block valid against this fixture's initial chain state.
    pub fn make_block(&self, txs: Vec<Vec<u8>>, salt: u8) -> (Block, PartSet) {
        let chain = self.chain_state();
        let data = BlockData { txs };
        let header = BlockHeader {
            chain_id: chain.chain_id.clone(),
            height: 1,
            // The salt lands in the timestamp so callers get distinct
            // block hashes from the same payload.
            time: 1 + salt as i64,
            last_block_id: chain.last_block_id,
            last_commit_hash: Hash::ZERO,
            data_hash: data.hash(),
            validators_hash: chain.validators.hash(),
            next_validators_hash: chain.next_validators.hash(),
            consensus_hash: chain.consensus_params.hash(),
            app_hash: chain.app_hash,
            last_results_hash: chain.last_results_hash,
            evidence_hash: Hash::ZERO,
            proposer_address: self.validators.proposer().address,
        };
        let block = Block {
            header,
            data,
            evidence: EvidenceData::default(),
            last_commit: None,
        };
        let parts = block.make_part_set(512);
        (block, parts)
    }

    /// A proposal for `block` signed by validator `proposer`.
    pub fn signed_proposal(
        &self,
        proposer: usize,
        round: i32,
        pol_round: i32,
        block: &Block,
        parts: &PartSet,
    ) -> Proposal {
        let mut proposal = Proposal::new(1, round, pol_round, block.block_id(parts), 1);
        proposal.signature =
            Some(self.pairs[proposer].sign(&proposal.sign_bytes(&self.chain_id)));
        proposal
    }
}
