//! Live state of the round the node is working on.

use std::sync::Arc;

use basalt_core::Step;
use basalt_types::{Block, PartSet, Proposal, Timestamp, ValidatorSet};

use crate::height_vote_set::{HeightVoteSet, SharedVoteSet};

/// Everything the state machine tracks about the height in progress.
///
/// Not thread safe: the single consensus task owns it exclusively. Only
/// the vote sets inside `votes` are shared with gossip readers.
pub struct RoundState {
    pub height: i64,
    pub round: i32,
    pub step: Step,
    /// When this height became (or becomes) active.
    pub start_time: Timestamp,
    /// When +2/3 precommits for a block were first seen; drives the start
    /// time of the next height.
    pub commit_time: Timestamp,
    /// Validator snapshot for this height, rotated to the current round.
    pub validators: Arc<ValidatorSet>,
    pub proposal: Option<Proposal>,
    pub proposal_block: Option<Block>,
    pub proposal_block_parts: Option<PartSet>,
    /// Round of the current lock, -1 when unlocked.
    pub locked_round: i32,
    pub locked_block: Option<Block>,
    pub locked_block_parts: Option<PartSet>,
    /// Last round with a POL for a non-nil valid block, -1 when none.
    pub valid_round: i32,
    /// Last known block of that POL, when we hold it.
    pub valid_block: Option<Block>,
    pub valid_block_parts: Option<PartSet>,
    pub votes: Arc<HeightVoteSet>,
    /// Round at which the commit majority appeared, -1 until then.
    pub commit_round: i32,
    /// Precommits that decided the previous height.
    pub last_commit: Option<SharedVoteSet>,
    /// Validators that signed the previous height.
    pub last_validators: Arc<ValidatorSet>,
    /// Set once the precommit-wait timeout for this round is scheduled.
    pub triggered_timeout_precommit: bool,
}

impl RoundState {
    pub fn new(
        height: i64,
        validators: Arc<ValidatorSet>,
        last_validators: Arc<ValidatorSet>,
        votes: Arc<HeightVoteSet>,
    ) -> Self {
        Self {
            height,
            round: 0,
            step: Step::NewHeight,
            start_time: 0,
            commit_time: 0,
            validators,
            proposal: None,
            proposal_block: None,
            proposal_block_parts: None,
            locked_round: -1,
            locked_block: None,
            locked_block_parts: None,
            valid_round: -1,
            valid_block: None,
            valid_block_parts: None,
            votes,
            commit_round: -1,
            last_commit: None,
            last_validators,
            triggered_timeout_precommit: false,
        }
    }

    /// Whether the proposal for the current round is complete: the
    /// signed proposal plus the full block, and, when it claims a proof
    /// of lock, the prevotes backing that claim.
    pub fn is_proposal_complete(&self) -> bool {
        let Some(proposal) = &self.proposal else {
            return false;
        };
        if self.proposal_block.is_none() {
            return false;
        }
        if proposal.pol_round < 0 {
            return true;
        }
        self.votes
            .prevotes(proposal.pol_round)
            .map(|set| set.lock().two_thirds_majority().is_some())
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for RoundState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoundState")
            .field("height", &self.height)
            .field("round", &self.round)
            .field("step", &self.step)
            .field("locked_round", &self.locked_round)
            .field("valid_round", &self.valid_round)
            .field("commit_round", &self.commit_round)
            .field("has_proposal", &self.proposal.is_some())
            .field("has_proposal_block", &self.proposal_block.is_some())
            .finish()
    }
}
