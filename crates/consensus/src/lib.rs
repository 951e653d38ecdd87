//! Basalt consensus: the height/round BFT state machine.
//!
//! A network of validators agrees on one block per height despite up to
//! one third of the voting power misbehaving. Each height runs rounds of
//! propose → prevote → precommit; +2/3 precommits for one block commit
//! it and advance the chain.
//!
//! # Architecture
//!
//! The state machine is synchronous and deterministic: events in,
//! actions out, time injected by the runner. Vote aggregation
//! ([`VoteSet`], [`HeightVoteSet`]) is the one concurrently-read piece,
//! since gossip paths publish vote bitmaps from parallel I/O tasks, so
//! those structures sit behind mutexes scoped to single method calls.
//!
//! ## Safety rules
//!
//! - A validator that precommits a block locks on it: later rounds
//!   prevote the locked block unless +2/3 prevoted something else at a
//!   round at or after the lock (a proof of lock).
//! - `two_thirds_majority` latches: once a vote set reports a majority
//!   block id it never changes.
//! - Conflicting votes from one validator are kept out of the sets and
//!   surfaced as [`DuplicateVoteEvidence`](basalt_types::DuplicateVoteEvidence).

mod chain_state;
mod config;
mod error;
mod evidence_pool;
mod height_vote_set;
mod round_state;
mod state;
mod vote_set;

pub mod testing;

pub use chain_state::ChainState;
pub use config::ConsensusConfig;
pub use error::{ConsensusError, VoteSetError};
pub use evidence_pool::{EvidencePool, InMemoryEvidencePool};
pub use height_vote_set::{HeightVoteSet, SharedVoteSet};
pub use round_state::RoundState;
pub use state::ConsensusState;
pub use vote_set::VoteSet;
