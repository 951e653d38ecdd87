use thiserror::Error;

use basalt_types::{TypesError, Vote};

/// Errors from vote aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoteSetError {
    /// The vote's (height, round, type) does not match this set.
    #[error("vote coordinates {height}/{round}/{vote_type} do not match set")]
    Mismatch {
        height: i64,
        round: i32,
        vote_type: &'static str,
    },

    /// The vote names a validator index outside the set.
    #[error("validator index {0} out of range")]
    InvalidIndex(i32),

    /// The vote's address differs from the validator at its index.
    #[error("validator address does not match index {0}")]
    AddressMismatch(i32),

    /// The signature over the canonical vote bytes did not verify.
    #[error("invalid vote signature")]
    InvalidSignature,

    /// A second, different vote from one validator at one
    /// (height, round, type). The earlier vote is kept; the pair is
    /// evidence of double signing.
    #[error("conflicting vote from validator {}", existing.validator_index)]
    ConflictingVote { existing: Box<Vote> },

    /// A peer claimed two different majorities for one vote set.
    #[error("peer {peer} already claimed a different +2/3 block")]
    ConflictingMaj23 { peer: String },

    /// `set_round` went backwards. Rounds are non-decreasing.
    #[error("round must be non-decreasing: {current} -> {requested}")]
    RoundRegression { current: i32, requested: i32 },

    /// A commit was requested from a set that cannot produce one.
    #[error("cannot build commit: {0}")]
    CannotCommit(&'static str),

    /// A peer exhausted its catch-up round allowance.
    #[error("peer {peer} exceeded catch-up round limit")]
    CatchupExhausted { peer: String },

    /// Vote failed basic validation.
    #[error(transparent)]
    Types(#[from] TypesError),
}

/// Errors from the consensus state machine proper.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsensusError {
    #[error("invalid proposal: {0}")]
    InvalidProposal(String),

    #[error("invalid block: {0}")]
    InvalidBlock(String),

    #[error("node key is not in the validator set")]
    NotAValidator,

    #[error(transparent)]
    VoteSet(#[from] VoteSetError),

    #[error(transparent)]
    Types(#[from] TypesError),
}
