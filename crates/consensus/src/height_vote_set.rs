//! Per-height vote bookkeeping across rounds.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use basalt_types::{BlockId, PeerId, ValidatorSet, Vote, VoteType};

use crate::error::VoteSetError;
use crate::vote_set::VoteSet;

/// A vote set shared with the gossip paths that publish vote bitmaps.
/// The mutex is scoped to single method calls.
pub type SharedVoteSet = Arc<Mutex<VoteSet>>;

/// Maximum unexpected future rounds a single peer may open: one for its
/// last-commit round and one for the official commit round.
const MAX_CATCHUP_ROUNDS_PER_PEER: usize = 2;

#[derive(Clone)]
struct RoundVoteSet {
    prevotes: SharedVoteSet,
    precommits: SharedVoteSet,
}

struct Inner {
    round: i32,
    round_vote_sets: BTreeMap<i32, RoundVoteSet>,
    peer_catchup_rounds: HashMap<PeerId, Vec<i32>>,
}

/// Keeps the vote sets of every round of one height.
///
/// Rounds 0 through the current round always exist. A peer may addition-
/// ally open up to two future "catch-up" rounds, so commits decided at a
/// round we have not reached yet can still be assembled; more than that
/// is treated as abuse and dropped.
pub struct HeightVoteSet {
    chain_id: String,
    height: i64,
    validators: Arc<ValidatorSet>,
    inner: Mutex<Inner>,
}

impl HeightVoteSet {
    pub fn new(chain_id: impl Into<String>, height: i64, validators: Arc<ValidatorSet>) -> Self {
        let hvs = Self {
            chain_id: chain_id.into(),
            height,
            validators,
            inner: Mutex::new(Inner {
                round: 0,
                round_vote_sets: BTreeMap::new(),
                peer_catchup_rounds: HashMap::new(),
            }),
        };
        hvs.inner.lock().round_vote_sets.insert(0, hvs.make_round(0));
        hvs
    }

    fn make_round(&self, round: i32) -> RoundVoteSet {
        RoundVoteSet {
            prevotes: Arc::new(Mutex::new(VoteSet::new(
                self.chain_id.clone(),
                self.height,
                round,
                VoteType::Prevote,
                self.validators.clone(),
            ))),
            precommits: Arc::new(Mutex::new(VoteSet::new(
                self.chain_id.clone(),
                self.height,
                round,
                VoteType::Precommit,
                self.validators.clone(),
            ))),
        }
    }

    pub fn height(&self) -> i64 {
        self.height
    }

    pub fn round(&self) -> i32 {
        self.inner.lock().round
    }

    /// Advance to `round`, creating any missing round entries up to it.
    /// Rounds never go backwards.
    pub fn set_round(&self, round: i32) -> Result<(), VoteSetError> {
        let mut inner = self.inner.lock();
        if round < inner.round {
            return Err(VoteSetError::RoundRegression {
                current: inner.round,
                requested: round,
            });
        }
        for r in inner.round..=round {
            if !inner.round_vote_sets.contains_key(&r) {
                let rvs = self.make_round(r);
                inner.round_vote_sets.insert(r, rvs);
            }
        }
        inner.round = round;
        Ok(())
    }

    /// Add a vote, opening a catch-up round when a peer votes in a round
    /// we have not created yet.
    pub fn add_vote(&self, vote: Vote, peer: Option<&PeerId>) -> Result<bool, VoteSetError> {
        let vote_round = vote.round;
        let vote_type = vote.vote_type;
        let set = {
            let mut inner = self.inner.lock();
            match inner.round_vote_sets.get(&vote_round) {
                Some(rvs) => Self::pick(rvs, vote_type),
                None => {
                    if let Some(peer) = peer {
                        let rounds = inner.peer_catchup_rounds.entry(peer.clone()).or_default();
                        if !rounds.contains(&vote_round) {
                            if rounds.len() >= MAX_CATCHUP_ROUNDS_PER_PEER {
                                warn!(
                                    %peer,
                                    round = vote_round,
                                    "peer exceeded catch-up round allowance"
                                );
                                return Err(VoteSetError::CatchupExhausted {
                                    peer: peer.to_string(),
                                });
                            }
                            rounds.push(vote_round);
                        }
                    }
                    let rvs = self.make_round(vote_round);
                    let set = Self::pick(&rvs, vote_type);
                    inner.round_vote_sets.insert(vote_round, rvs);
                    set
                }
            }
        };
        let added = set.lock().add_vote(vote)?;
        Ok(added)
    }

    fn pick(rvs: &RoundVoteSet, vote_type: VoteType) -> SharedVoteSet {
        match vote_type {
            VoteType::Prevote => rvs.prevotes.clone(),
            VoteType::Precommit => rvs.precommits.clone(),
        }
    }

    pub fn prevotes(&self, round: i32) -> Option<SharedVoteSet> {
        let inner = self.inner.lock();
        inner
            .round_vote_sets
            .get(&round)
            .map(|rvs| rvs.prevotes.clone())
    }

    pub fn precommits(&self, round: i32) -> Option<SharedVoteSet> {
        let inner = self.inner.lock();
        inner
            .round_vote_sets
            .get(&round)
            .map(|rvs| rvs.precommits.clone())
    }

    /// The latest round at or below the current one whose prevotes hold a
    /// +2/3 majority, with the majority block id.
    pub fn pol_info(&self) -> Option<(i32, BlockId)> {
        let rounds: Vec<i32> = {
            let inner = self.inner.lock();
            (0..=inner.round).rev().collect()
        };
        for round in rounds {
            if let Some(prevotes) = self.prevotes(round) {
                if let Some(block_id) = prevotes.lock().two_thirds_majority() {
                    return Some((round, block_id));
                }
            }
        }
        None
    }

    /// Record a peer's majority claim on the matching round/type set.
    pub fn set_peer_maj23(
        &self,
        round: i32,
        vote_type: VoteType,
        peer: PeerId,
        block_id: BlockId,
    ) -> Result<(), VoteSetError> {
        let set = {
            let inner = self.inner.lock();
            inner
                .round_vote_sets
                .get(&round)
                .map(|rvs| Self::pick(rvs, vote_type))
        };
        match set {
            Some(set) => set.lock().set_peer_maj23(peer, block_id),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for HeightVoteSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("HeightVoteSet")
            .field("height", &self.height)
            .field("round", &inner.round)
            .field("rounds", &inner.round_vote_sets.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{block_id, ValidatorFixture};

    fn fixture() -> ValidatorFixture {
        ValidatorFixture::new("hvs-test", &[10, 10, 10])
    }

    #[test]
    fn round_zero_exists_from_the_start() {
        let fx = fixture();
        let hvs = HeightVoteSet::new("hvs-test", 1, fx.validators.clone());
        assert_eq!(hvs.round(), 0);
        assert!(hvs.prevotes(0).is_some());
        assert!(hvs.precommits(0).is_some());
        assert!(hvs.prevotes(1).is_none());
    }

    #[test]
    fn set_round_creates_intermediate_rounds() {
        let fx = fixture();
        let hvs = HeightVoteSet::new("hvs-test", 1, fx.validators.clone());
        hvs.set_round(3).unwrap();
        for round in 0..=3 {
            assert!(hvs.prevotes(round).is_some(), "round {round}");
        }
        assert_eq!(hvs.round(), 3);
    }

    #[test]
    fn rounds_never_regress() {
        let fx = fixture();
        let hvs = HeightVoteSet::new("hvs-test", 1, fx.validators.clone());
        hvs.set_round(2).unwrap();
        assert!(matches!(
            hvs.set_round(1),
            Err(VoteSetError::RoundRegression {
                current: 2,
                requested: 1
            })
        ));
        // Re-entering the current round is allowed.
        hvs.set_round(2).unwrap();
    }

    #[test]
    fn own_votes_land_in_their_round() {
        let fx = fixture();
        let hvs = HeightVoteSet::new("hvs-test", 1, fx.validators.clone());
        let vote = fx.signed_vote(0, VoteType::Prevote, 1, 0, block_id(1));
        assert!(hvs.add_vote(vote, None).unwrap());
        assert_eq!(hvs.prevotes(0).unwrap().lock().sum(), 10);
    }

    #[test]
    fn peer_catchup_rounds_are_capped_at_two() {
        let fx = fixture();
        let hvs = HeightVoteSet::new("hvs-test", 1, fx.validators.clone());
        let peer = PeerId::from("peer-a");

        for (i, round) in [5, 7].iter().enumerate() {
            let vote = fx.signed_vote(i, VoteType::Precommit, 1, *round, block_id(1));
            assert!(hvs.add_vote(vote, Some(&peer)).unwrap());
        }
        // Third unexpected round from the same peer is refused.
        let vote = fx.signed_vote(2, VoteType::Precommit, 1, 9, block_id(1));
        assert!(matches!(
            hvs.add_vote(vote, Some(&peer)),
            Err(VoteSetError::CatchupExhausted { .. })
        ));

        // A different peer still has its own allowance.
        let other = PeerId::from("peer-b");
        let vote = fx.signed_vote(2, VoteType::Precommit, 1, 9, block_id(1));
        assert!(hvs.add_vote(vote, Some(&other)).unwrap());
    }

    #[test]
    fn existing_rounds_do_not_consume_catchup_allowance() {
        let fx = fixture();
        let hvs = HeightVoteSet::new("hvs-test", 1, fx.validators.clone());
        hvs.set_round(4).unwrap();
        let peer = PeerId::from("peer-a");
        for round in 0..=4 {
            let vote = fx.signed_vote(0, VoteType::Prevote, 1, round, block_id(1));
            hvs.add_vote(vote, Some(&peer)).unwrap();
        }
        // The allowance is still fully available for future rounds.
        for (i, round) in [8, 9].iter().enumerate() {
            let vote = fx.signed_vote(i, VoteType::Prevote, 1, *round, block_id(1));
            assert!(hvs.add_vote(vote, Some(&peer)).unwrap());
        }
    }

    #[test]
    fn pol_info_finds_latest_majority() {
        let fx = fixture();
        let hvs = HeightVoteSet::new("hvs-test", 1, fx.validators.clone());
        hvs.set_round(2).unwrap();

        // Majority at round 0.
        for i in 0..3 {
            let vote = fx.signed_vote(i, VoteType::Prevote, 1, 0, block_id(1));
            hvs.add_vote(vote, None).unwrap();
        }
        assert_eq!(hvs.pol_info(), Some((0, block_id(1))));

        // A later majority shadows it.
        for i in 0..3 {
            let vote = fx.signed_vote(i, VoteType::Prevote, 1, 2, block_id(2));
            hvs.add_vote(vote, None).unwrap();
        }
        assert_eq!(hvs.pol_info(), Some((2, block_id(2))));
    }

    #[test]
    fn peer_maj23_routes_to_the_right_set() {
        let fx = fixture();
        let hvs = HeightVoteSet::new("hvs-test", 1, fx.validators.clone());
        let peer = PeerId::from("peer-a");
        hvs.set_peer_maj23(0, VoteType::Prevote, peer.clone(), block_id(1))
            .unwrap();
        // Unknown round is a silent no-op.
        hvs.set_peer_maj23(9, VoteType::Prevote, peer.clone(), block_id(1))
            .unwrap();
        // Conflicting claim on the same set errors.
        assert!(hvs
            .set_peer_maj23(0, VoteType::Prevote, peer, block_id(2))
            .is_err());
    }
}
