//! Per-(height, round, type) vote aggregation.

use std::collections::HashMap;

use basalt_types::{
    Address, BitArray, BlockId, BlockIdFlag, Commit, CommitSig, PeerId, ValidatorSet, Vote,
    VoteType,
};
use std::sync::Arc;

use crate::error::VoteSetError;

/// Votes grouped by the block id they were cast for.
#[derive(Debug, Clone)]
struct BlockVotes {
    bit_array: BitArray,
    sum: i64,
}

impl BlockVotes {
    fn new(size: usize) -> Self {
        Self {
            bit_array: BitArray::new(size),
            sum: 0,
        }
    }
}

/// Aggregates the votes of one (height, round, type).
///
/// At most one vote per validator index is accepted; a second vote for a
/// different block is rejected and reported as a conflict so the caller
/// can build double-sign evidence. Once some block id accumulates more
/// than two thirds of the voting power, `two_thirds_majority` latches on
/// it permanently.
#[derive(Debug)]
pub struct VoteSet {
    chain_id: String,
    height: i64,
    round: i32,
    vote_type: VoteType,
    validators: Arc<ValidatorSet>,
    votes: Vec<Option<Vote>>,
    votes_bit_array: BitArray,
    votes_by_block: HashMap<BlockId, BlockVotes>,
    sum: i64,
    maj23: Option<BlockId>,
    peer_maj23s: HashMap<PeerId, BlockId>,
}

impl VoteSet {
    pub fn new(
        chain_id: impl Into<String>,
        height: i64,
        round: i32,
        vote_type: VoteType,
        validators: Arc<ValidatorSet>,
    ) -> Self {
        let size = validators.len();
        Self {
            chain_id: chain_id.into(),
            height,
            round,
            vote_type,
            validators,
            votes: vec![None; size],
            votes_bit_array: BitArray::new(size),
            votes_by_block: HashMap::new(),
            sum: 0,
            maj23: None,
            peer_maj23s: HashMap::new(),
        }
    }

    pub fn height(&self) -> i64 {
        self.height
    }

    pub fn round(&self) -> i32 {
        self.round
    }

    pub fn vote_type(&self) -> VoteType {
        self.vote_type
    }

    pub fn size(&self) -> usize {
        self.validators.len()
    }

    /// Total voting power of all accepted votes.
    pub fn sum(&self) -> i64 {
        self.sum
    }

    /// Add a vote.
    ///
    /// Returns `Ok(true)` when the vote entered the set, `Ok(false)` for
    /// an exact duplicate. Conflicting votes keep the earlier vote and
    /// fail with [`VoteSetError::ConflictingVote`].
    pub fn add_vote(&mut self, vote: Vote) -> Result<bool, VoteSetError> {
        if vote.height != self.height
            || vote.round != self.round
            || vote.vote_type != self.vote_type
        {
            return Err(VoteSetError::Mismatch {
                height: vote.height,
                round: vote.round,
                vote_type: match vote.vote_type {
                    VoteType::Prevote => "prevote",
                    VoteType::Precommit => "precommit",
                },
            });
        }
        vote.validate_basic()?;

        let index = vote.validator_index;
        let validator = self
            .validators
            .get_by_index(index)
            .ok_or(VoteSetError::InvalidIndex(index))?;
        if validator.address != vote.validator_address {
            return Err(VoteSetError::AddressMismatch(index));
        }

        if let Some(existing) = &self.votes[index as usize] {
            if existing.block_id == vote.block_id {
                return Ok(false);
            }
            return Err(VoteSetError::ConflictingVote {
                existing: Box::new(existing.clone()),
            });
        }

        let signature = vote.signature.as_ref().ok_or(VoteSetError::InvalidSignature)?;
        validator
            .pub_key
            .verify(&vote.sign_bytes(&self.chain_id), signature)
            .map_err(|_| VoteSetError::InvalidSignature)?;

        let power = validator.voting_power;
        let set_size = self.validators.len();
        self.votes_bit_array.set(index as usize, true);
        self.sum += power;

        let by_block = self
            .votes_by_block
            .entry(vote.block_id)
            .or_insert_with(|| BlockVotes::new(set_size));
        by_block.bit_array.set(index as usize, true);
        by_block.sum += power;

        if self.maj23.is_none() && by_block.sum > self.validators.two_thirds_threshold() {
            self.maj23 = Some(vote.block_id);
        }
        self.votes[index as usize] = Some(vote);
        Ok(true)
    }

    /// The vote from validator `index`, if any.
    pub fn get(&self, index: i32) -> Option<&Vote> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.votes.get(i))
            .and_then(|v| v.as_ref())
    }

    pub fn get_by_address(&self, address: &Address) -> Option<&Vote> {
        let (index, _) = self.validators.get_by_address(address)?;
        self.get(index)
    }

    /// The latched majority block id, if any. Monotone: never unset and
    /// never changed once set.
    pub fn two_thirds_majority(&self) -> Option<BlockId> {
        self.maj23
    }

    /// Whether votes totalling more than two thirds of the power have
    /// arrived, regardless of which blocks they name.
    pub fn has_two_thirds_any(&self) -> bool {
        self.sum > self.validators.two_thirds_threshold()
    }

    pub fn has_all(&self) -> bool {
        self.sum == self.validators.total_voting_power()
    }

    /// Bitmap of validators whose vote is in the set.
    pub fn bit_array(&self) -> BitArray {
        self.votes_bit_array.clone()
    }

    /// Bitmap of validators who voted for `block_id`.
    pub fn bit_array_by_block_id(&self, block_id: &BlockId) -> Option<BitArray> {
        self.votes_by_block
            .get(block_id)
            .map(|bv| bv.bit_array.clone())
    }

    /// Record a peer's claim that `block_id` has +2/3. At most one claim
    /// per peer; a different second claim errors.
    pub fn set_peer_maj23(&mut self, peer: PeerId, block_id: BlockId) -> Result<(), VoteSetError> {
        match self.peer_maj23s.get(&peer) {
            None => {
                self.peer_maj23s.insert(peer, block_id);
                Ok(())
            }
            Some(existing) if *existing == block_id => Ok(()),
            Some(_) => Err(VoteSetError::ConflictingMaj23 {
                peer: peer.to_string(),
            }),
        }
    }

    /// Build the commit proving the latched majority.
    ///
    /// Precommit sets only. Every validator gets a slot: `ForBlock` with
    /// its signature when it precommitted the majority block, `Nil` when
    /// it precommitted anything else, `Absent` when no vote arrived.
    pub fn make_commit(&self) -> Result<Commit, VoteSetError> {
        if self.vote_type != VoteType::Precommit {
            return Err(VoteSetError::CannotCommit("not a precommit set"));
        }
        let block_id = self
            .maj23
            .ok_or(VoteSetError::CannotCommit("no +2/3 majority"))?;
        if block_id.is_nil() {
            return Err(VoteSetError::CannotCommit("majority is nil"));
        }

        let signatures = self
            .votes
            .iter()
            .map(|slot| match slot {
                None => CommitSig::absent(),
                Some(vote) => CommitSig {
                    flag: if vote.block_id == block_id {
                        BlockIdFlag::ForBlock
                    } else {
                        BlockIdFlag::Nil
                    },
                    validator_address: vote.validator_address,
                    timestamp: vote.timestamp,
                    signature: vote.signature,
                },
            })
            .collect();

        Ok(Commit {
            height: self.height,
            round: self.round,
            block_id,
            signatures,
        })
    }

    /// Rebuild the precommit set a commit proves, verifying every
    /// signature on the way in.
    pub fn from_commit(
        chain_id: impl Into<String>,
        commit: &Commit,
        validators: Arc<ValidatorSet>,
    ) -> Result<VoteSet, VoteSetError> {
        let mut set = VoteSet::new(
            chain_id,
            commit.height,
            commit.round,
            VoteType::Precommit,
            validators,
        );
        for index in 0..commit.signatures.len() {
            if let Some(vote) = commit.vote(index as i32) {
                set.add_vote(vote)?;
            }
        }
        Ok(set)
    }
}

impl std::fmt::Display for VoteSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "votes {}/{}/{}: {}/{} power {}",
            self.height,
            self.round,
            self.vote_type,
            self.votes_bit_array.count_set(),
            self.validators.len(),
            self.sum,
        )
    }
}
