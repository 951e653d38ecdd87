//! The height/round consensus state machine.
//!
//! Drives one height at a time through rounds of propose → prevote →
//! precommit until +2/3 of the voting power precommits one block, then
//! hands the block to the application and starts the next height.
//!
//! All inputs arrive as [`Event`]s; all effects leave as [`Action`]s. The
//! runner owns timers, network and the application, and feeds results
//! back. Wall-clock time is injected through `set_time`.

use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use basalt_core::{
    Action, Event, MessageSource, OutboundMessage, Step, SubStateMachine, TimeoutInfo,
};
use basalt_mempool::SharedQueue;
use basalt_types::{
    weighted_median_time, Block, BlockData, BlockId, Commit, DuplicateVoteEvidence, EvidenceData,
    EvidenceList, Hash, KeyPair, Part, PartSet, PeerId, Proposal, Timestamp, Vote, VoteType,
    WeightedTime,
};

use crate::chain_state::ChainState;
use crate::config::ConsensusConfig;
use crate::error::VoteSetError;
use crate::evidence_pool::EvidencePool;
use crate::height_vote_set::HeightVoteSet;
use crate::round_state::RoundState;

/// Byte headroom reserved in a block for the header, commit and evidence
/// when filling the remainder with transactions.
const BLOCK_OVERHEAD_BYTES: i64 = 4096;

/// The consensus state machine.
///
/// Owns the [`RoundState`] exclusively; only the vote sets inside it are
/// shared with gossip readers. Reads the mempool queue when building a
/// proposal and the evidence pool for pending evidence.
pub struct ConsensusState {
    config: ConsensusConfig,
    chain: ChainState,
    key: KeyPair,
    mempool: SharedQueue,
    evidence: Arc<dyn EvidencePool>,
    rs: RoundState,
    now: Timestamp,
    /// Set once `ApplyBlock` has been dispatched for the current height,
    /// cleared when `BlockApplied` arrives.
    finalize_dispatched: bool,
    /// The block handed to the application, held until it is applied.
    deciding_block: Option<(Block, BlockId)>,
}

impl ConsensusState {
    pub fn new(
        config: ConsensusConfig,
        chain: ChainState,
        key: KeyPair,
        mempool: SharedQueue,
        evidence: Arc<dyn EvidencePool>,
    ) -> Self {
        let height = chain.deciding_height();
        let votes = Arc::new(HeightVoteSet::new(
            chain.chain_id.clone(),
            height,
            chain.validators.clone(),
        ));
        let rs = RoundState::new(
            height,
            chain.validators.clone(),
            chain.last_validators.clone(),
            votes,
        );
        Self {
            config,
            chain,
            key,
            mempool,
            evidence,
            rs,
            now: 0,
            finalize_dispatched: false,
            deciding_block: None,
        }
    }

    // ── Accessors ─────────────────────────────────────────────────────

    pub fn round_state(&self) -> &RoundState {
        &self.rs
    }

    pub fn chain(&self) -> &ChainState {
        &self.chain
    }

    pub fn height(&self) -> i64 {
        self.rs.height
    }

    pub fn round(&self) -> i32 {
        self.rs.round
    }

    pub fn step(&self) -> Step {
        self.rs.step
    }

    /// Whether this node proposes for the current (height, round).
    pub fn is_proposer(&self) -> bool {
        self.rs.validators.proposer().address == self.key.address()
    }

    /// Rebuild the last-commit vote set from a persisted commit so a
    /// restarted node can propose again. Every signature is verified
    /// against the validators that signed the previous height.
    pub fn restore_last_commit(&mut self, commit: &Commit) -> Result<(), VoteSetError> {
        if commit.height != self.chain.last_block_height {
            return Err(VoteSetError::Mismatch {
                height: commit.height,
                round: commit.round,
                vote_type: "precommit",
            });
        }
        let set = crate::vote_set::VoteSet::from_commit(
            self.chain.chain_id.clone(),
            commit,
            self.chain.last_validators.clone(),
        )?;
        self.rs.last_commit = Some(Arc::new(parking_lot::Mutex::new(set)));
        Ok(())
    }

    /// Kick the machine off: schedule the first new-height transition.
    pub fn start(&mut self) -> Vec<Action> {
        self.rs.start_time = self.now;
        info!(
            height = self.rs.height,
            validator = %self.key.address(),
            "starting consensus"
        );
        vec![Action::ScheduleTimeout(TimeoutInfo {
            duration_ms: 0,
            height: self.rs.height,
            round: 0,
            step: Step::NewHeight,
        })]
    }

    // ── Timeouts ──────────────────────────────────────────────────────

    #[instrument(skip(self, ti), fields(height = ti.height, round = ti.round, step = %ti.step))]
    fn on_timeout(&mut self, ti: TimeoutInfo) -> Vec<Action> {
        // Late timeouts from superseded coordinates are harmless noise.
        if ti.height != self.rs.height
            || ti.round < self.rs.round
            || (ti.round == self.rs.round && ti.step < self.rs.step)
        {
            debug!(
                at_height = self.rs.height,
                at_round = self.rs.round,
                at_step = %self.rs.step,
                "ignoring stale timeout"
            );
            return vec![];
        }
        match ti.step {
            Step::NewHeight => self.enter_new_round(ti.height, 0),
            Step::Propose => self.enter_prevote(ti.height, ti.round),
            Step::PrevoteWait => self.enter_precommit(ti.height, ti.round),
            Step::PrecommitWait => {
                let mut actions = self.enter_precommit(ti.height, ti.round);
                actions.extend(self.enter_new_round(ti.height, ti.round + 1));
                actions
            }
            step => {
                debug!(%step, "no timeout handling for step");
                vec![]
            }
        }
    }

    // ── Round transitions ─────────────────────────────────────────────

    fn enter_new_round(&mut self, height: i64, round: i32) -> Vec<Action> {
        if height != self.rs.height
            || round < self.rs.round
            || (round == self.rs.round && self.rs.step != Step::NewHeight)
        {
            debug!(height, round, "enter_new_round: already past");
            return vec![];
        }
        info!(height, round, proposer = %self.proposer_for(round), "entering new round");

        if round > self.rs.round {
            let mut validators = (*self.rs.validators).clone();
            validators.increment_proposer_priority(round - self.rs.round);
            self.rs.validators = Arc::new(validators);
        }
        self.rs.round = round;
        self.rs.step = Step::NewRound;
        if round != 0 {
            // The proposal of the previous round is dead; a fresh height
            // at round 0 has nothing to clear.
            self.rs.proposal = None;
            self.rs.proposal_block = None;
            self.rs.proposal_block_parts = None;
        }
        self.rs.triggered_timeout_precommit = false;
        if let Err(e) = self.rs.votes.set_round(round) {
            error!(error = %e, "failed to advance vote round");
        }
        self.enter_propose(height, round)
    }

    fn proposer_for(&self, round: i32) -> basalt_types::Address {
        if round == self.rs.round {
            return self.rs.validators.proposer().address;
        }
        let mut validators = (*self.rs.validators).clone();
        validators.increment_proposer_priority(round - self.rs.round);
        validators.proposer().address
    }

    fn enter_propose(&mut self, height: i64, round: i32) -> Vec<Action> {
        if height != self.rs.height
            || round < self.rs.round
            || (round == self.rs.round && self.rs.step >= Step::Propose)
        {
            debug!(height, round, "enter_propose: already past");
            return vec![];
        }
        debug!(height, round, "entering propose step");
        self.rs.step = Step::Propose;

        let mut actions = vec![Action::ScheduleTimeout(TimeoutInfo {
            duration_ms: self.config.propose_timeout_ms(round),
            height,
            round,
            step: Step::Propose,
        })];

        if self.is_proposer() {
            actions.extend(self.decide_proposal(height, round));
        }

        // The proposal may already be complete: a valid block carried
        // over, or our own proposal once the internal queue drains.
        if self.rs.is_proposal_complete() {
            actions.extend(self.enter_prevote(height, round));
        }
        actions
    }

    /// Build and publish this round's proposal: the valid block when one
    /// is known, otherwise a fresh block from the mempool.
    fn decide_proposal(&mut self, height: i64, round: i32) -> Vec<Action> {
        let (block, parts) = match (&self.rs.valid_block, &self.rs.valid_block_parts) {
            (Some(block), Some(parts)) => (block.clone(), parts.clone()),
            _ => match self.create_proposal_block() {
                Some(pair) => pair,
                None => return vec![],
            },
        };
        let block_id = block.block_id(&parts);
        let mut proposal = Proposal::new(height, round, self.rs.valid_round, block_id, self.now);
        proposal.signature = Some(self.key.sign(&proposal.sign_bytes(&self.chain.chain_id)));

        info!(
            height,
            round,
            block = %block_id,
            txs = block.data.txs.len(),
            pol_round = proposal.pol_round,
            "proposing block"
        );

        let mut actions = vec![
            Action::Broadcast(OutboundMessage::Proposal(proposal.clone())),
            Action::EnqueueInternal(Event::ProposalReceived {
                proposal,
                source: MessageSource::Internal,
            }),
        ];
        for part in parts.parts() {
            actions.push(Action::Broadcast(OutboundMessage::BlockPart {
                height,
                round,
                part: part.clone(),
            }));
            actions.push(Action::EnqueueInternal(Event::BlockPartReceived {
                height,
                round,
                part: part.clone(),
                source: MessageSource::Internal,
            }));
        }
        actions
    }

    /// Assemble a new block from the mempool, pending evidence and the
    /// last commit.
    fn create_proposal_block(&self) -> Option<(Block, PartSet)> {
        let last_commit: Option<Commit> = if self.rs.height == self.chain.initial_height {
            None
        } else {
            match &self.rs.last_commit {
                Some(last_commit) => match last_commit.lock().make_commit() {
                    Ok(commit) => Some(commit),
                    Err(e) => {
                        warn!(error = %e, "cannot propose without a complete last commit");
                        return None;
                    }
                },
                None => {
                    warn!("cannot propose: no last commit for non-initial height");
                    return None;
                }
            }
        };

        let params = &self.chain.consensus_params;
        let pending = self.evidence.pending_evidence(params.evidence.max_bytes);
        let evidence = EvidenceData {
            evidence: EvidenceList {
                hashes: pending.iter().map(|e| e.hash()).collect(),
            },
        };

        let txs = self
            .mempool
            .lock()
            .collect_for_block(params.block.max_bytes - BLOCK_OVERHEAD_BYTES, params.block.max_gas);
        let data = BlockData {
            txs: txs.iter().map(|tx| tx.tx.clone()).collect(),
        };

        let header = basalt_types::BlockHeader {
            chain_id: self.chain.chain_id.clone(),
            height: self.rs.height,
            time: self.block_time(last_commit.as_ref()),
            last_block_id: self.chain.last_block_id,
            last_commit_hash: last_commit.as_ref().map(|c| c.hash()).unwrap_or(Hash::ZERO),
            data_hash: data.hash(),
            validators_hash: self.chain.validators.hash(),
            next_validators_hash: self.chain.next_validators.hash(),
            consensus_hash: params.hash(),
            app_hash: self.chain.app_hash,
            last_results_hash: self.chain.last_results_hash,
            evidence_hash: evidence.hash(),
            proposer_address: self.key.address(),
        };
        let block = Block {
            header,
            data,
            evidence,
            last_commit,
        };
        let parts = block.make_part_set(self.config.block_part_size);
        Some((block, parts))
    }

    /// Proposed block time: the voting-power-weighted median of the last
    /// commit's timestamps, clamped to move forward; the local clock at
    /// the initial height.
    fn block_time(&self, last_commit: Option<&Commit>) -> Timestamp {
        let candidate = match last_commit {
            None => self.now,
            Some(commit) => {
                let mut times: Vec<WeightedTime> = commit
                    .signatures
                    .iter()
                    .filter(|sig| !sig.is_absent())
                    .filter_map(|sig| {
                        self.rs
                            .last_validators
                            .get_by_address(&sig.validator_address)
                            .map(|(_, v)| WeightedTime {
                                time: sig.timestamp,
                                weight: v.voting_power,
                            })
                    })
                    .collect();
                weighted_median_time(&mut times, self.rs.last_validators.total_voting_power())
            }
        };
        candidate.max(self.chain.last_block_time + 1)
    }

    fn enter_prevote(&mut self, height: i64, round: i32) -> Vec<Action> {
        if height != self.rs.height
            || round < self.rs.round
            || (round == self.rs.round && self.rs.step >= Step::Prevote)
        {
            debug!(height, round, "enter_prevote: already past");
            return vec![];
        }
        debug!(height, round, "entering prevote step");
        self.rs.step = Step::Prevote;
        self.do_prevote(height, round)
    }

    /// Decide what to prevote.
    ///
    /// The proposal block gets our prevote when it is complete and valid
    /// and the lock allows it: either we are not locked, or we are locked
    /// on this very block, or the proposal carries a proof of lock from a
    /// round at or after ours that we can verify against observed
    /// prevotes. Anything else gets nil.
    fn do_prevote(&mut self, _height: i64, _round: i32) -> Vec<Action> {
        if !self.rs.is_proposal_complete() {
            debug!("prevoting nil: proposal not complete");
            return self.sign_add_vote(VoteType::Prevote, BlockId::nil());
        }
        let (Some(block), Some(parts)) = (
            self.rs.proposal_block.clone(),
            self.rs.proposal_block_parts.clone(),
        ) else {
            return self.sign_add_vote(VoteType::Prevote, BlockId::nil());
        };

        if let Err(e) = self.validate_block(&block) {
            warn!(error = %e, "prevoting nil: invalid proposal block");
            return self.sign_add_vote(VoteType::Prevote, BlockId::nil());
        }

        let block_id = block.block_id(&parts);
        let lock_allows = if self.rs.locked_round == -1 {
            true
        } else if self
            .rs
            .locked_block
            .as_ref()
            .is_some_and(|locked| locked.hash() == block.hash())
        {
            true
        } else {
            // Relocking needs a proof of lock at or after our lock round,
            // backed by +2/3 prevotes we have seen ourselves.
            let pol_round = self.rs.proposal.as_ref().map(|p| p.pol_round).unwrap_or(-1);
            pol_round >= self.rs.locked_round
                && self
                    .rs
                    .votes
                    .prevotes(pol_round)
                    .and_then(|set| set.lock().two_thirds_majority())
                    .is_some_and(|maj| maj == block_id)
        };

        if lock_allows {
            debug!(block = %block_id, "prevoting proposal block");
            self.sign_add_vote(VoteType::Prevote, block_id)
        } else {
            debug!(
                locked_round = self.rs.locked_round,
                "prevoting nil: locked on a different block"
            );
            self.sign_add_vote(VoteType::Prevote, BlockId::nil())
        }
    }

    fn enter_prevote_wait(&mut self, height: i64, round: i32) -> Vec<Action> {
        if height != self.rs.height
            || round < self.rs.round
            || (round == self.rs.round && self.rs.step >= Step::PrevoteWait)
        {
            debug!(height, round, "enter_prevote_wait: already past");
            return vec![];
        }
        debug!(height, round, "entering prevote-wait step");
        self.rs.step = Step::PrevoteWait;
        vec![Action::ScheduleTimeout(TimeoutInfo {
            duration_ms: self.config.prevote_timeout_ms(round),
            height,
            round,
            step: Step::PrevoteWait,
        })]
    }

    fn enter_precommit(&mut self, height: i64, round: i32) -> Vec<Action> {
        if height != self.rs.height
            || round < self.rs.round
            || (round == self.rs.round && self.rs.step >= Step::Precommit)
        {
            debug!(height, round, "enter_precommit: already past");
            return vec![];
        }
        debug!(height, round, "entering precommit step");
        self.rs.step = Step::Precommit;

        let maj23 = self
            .rs
            .votes
            .prevotes(round)
            .and_then(|set| set.lock().two_thirds_majority());

        let Some(block_id) = maj23 else {
            debug!("precommitting nil: no +2/3 prevotes");
            return self.sign_add_vote(VoteType::Precommit, BlockId::nil());
        };

        if block_id.is_nil() {
            // +2/3 prevoted nil: release any lock and precommit nil.
            if self.rs.locked_block.is_some() {
                info!(height, round, "unlocking: +2/3 prevoted nil");
                self.unlock();
            }
            return self.sign_add_vote(VoteType::Precommit, BlockId::nil());
        }

        // +2/3 prevoted a concrete block.
        if self
            .rs
            .locked_block
            .as_ref()
            .is_some_and(|locked| locked.hash() == block_id.hash)
        {
            debug!(block = %block_id, "relocking at current round");
            self.rs.locked_round = round;
            return self.sign_add_vote(VoteType::Precommit, block_id);
        }

        if let Some(block) = self
            .rs
            .proposal_block
            .clone()
            .filter(|block| block.hash() == block_id.hash)
        {
            if let Err(e) = self.validate_block(&block) {
                error!(error = %e, "refusing to lock on invalid block");
                return self.sign_add_vote(VoteType::Precommit, BlockId::nil());
            }
            info!(height, round, block = %block_id, "locking on block");
            self.rs.locked_round = round;
            self.rs.locked_block = Some(block);
            self.rs.locked_block_parts = self.rs.proposal_block_parts.clone();
            return self.sign_add_vote(VoteType::Precommit, block_id);
        }

        // +2/3 prevoted a block we do not hold. Release any stale lock,
        // start fetching the majority block and precommit nil.
        debug!(block = %block_id, "+2/3 prevotes for a block we do not have");
        self.unlock();
        if !self
            .rs
            .proposal_block_parts
            .as_ref()
            .is_some_and(|parts| parts.has_header(&block_id.part_set_header))
        {
            self.rs.proposal_block = None;
            self.rs.proposal_block_parts = Some(PartSet::from_header(&block_id.part_set_header));
        }
        self.sign_add_vote(VoteType::Precommit, BlockId::nil())
    }

    fn unlock(&mut self) {
        self.rs.locked_round = -1;
        self.rs.locked_block = None;
        self.rs.locked_block_parts = None;
    }

    fn enter_precommit_wait(&mut self, height: i64, round: i32) -> Vec<Action> {
        if height != self.rs.height || round < self.rs.round || self.rs.triggered_timeout_precommit
        {
            debug!(height, round, "enter_precommit_wait: already triggered");
            return vec![];
        }
        debug!(height, round, "entering precommit-wait step");
        self.rs.step = Step::PrecommitWait;
        self.rs.triggered_timeout_precommit = true;
        vec![Action::ScheduleTimeout(TimeoutInfo {
            duration_ms: self.config.precommit_timeout_ms(round),
            height,
            round,
            step: Step::PrecommitWait,
        })]
    }

    fn enter_commit(&mut self, height: i64, commit_round: i32) -> Vec<Action> {
        if height != self.rs.height || self.rs.step == Step::Commit {
            debug!(height, commit_round, "enter_commit: already committing");
            return vec![];
        }
        let Some(block_id) = self
            .rs
            .votes
            .precommits(commit_round)
            .and_then(|set| set.lock().two_thirds_majority())
        else {
            error!(commit_round, "enter_commit without a precommit majority");
            return vec![];
        };
        info!(height, commit_round, block = %block_id, "entering commit step");
        self.rs.step = Step::Commit;
        self.rs.commit_round = commit_round;
        self.rs.commit_time = self.now;

        // The locked block may be the decided one.
        if self
            .rs
            .locked_block
            .as_ref()
            .is_some_and(|locked| locked.hash() == block_id.hash)
        {
            self.rs.proposal_block = self.rs.locked_block.clone();
            self.rs.proposal_block_parts = self.rs.locked_block_parts.clone();
        }
        // Otherwise make sure we are collecting the right parts.
        if !self
            .rs
            .proposal_block
            .as_ref()
            .is_some_and(|block| block.hash() == block_id.hash)
            && !self
                .rs
                .proposal_block_parts
                .as_ref()
                .is_some_and(|parts| parts.has_header(&block_id.part_set_header))
        {
            self.rs.proposal_block = None;
            self.rs.proposal_block_parts = Some(PartSet::from_header(&block_id.part_set_header));
        }
        self.try_finalize(height)
    }

    /// Apply the decided block as soon as it is fully assembled.
    fn try_finalize(&mut self, height: i64) -> Vec<Action> {
        if height != self.rs.height || self.rs.step != Step::Commit || self.finalize_dispatched {
            return vec![];
        }
        let Some(block_id) = self
            .rs
            .votes
            .precommits(self.rs.commit_round)
            .and_then(|set| set.lock().two_thirds_majority())
            .filter(|id| !id.is_nil())
        else {
            return vec![];
        };
        let have_block = self
            .rs
            .proposal_block
            .as_ref()
            .is_some_and(|block| block.hash() == block_id.hash)
            && self
                .rs
                .proposal_block_parts
                .as_ref()
                .is_some_and(|parts| parts.is_complete());
        if !have_block {
            debug!(block = %block_id, "decided block not yet assembled");
            return vec![];
        }

        let Some(block) = self.rs.proposal_block.clone() else {
            return vec![];
        };
        if let Err(e) = self.validate_block(&block) {
            error!(error = %e, "decided block fails validation");
            return vec![];
        }
        let Some(precommits) = self.rs.votes.precommits(self.rs.commit_round) else {
            return vec![];
        };
        let commit = match precommits.lock().make_commit() {
            Ok(commit) => commit,
            Err(e) => {
                error!(error = %e, "failed to build commit");
                return vec![];
            }
        };

        info!(
            height,
            block = %block_id,
            round = self.rs.commit_round,
            txs = block.data.txs.len(),
            "finalizing commit"
        );
        self.finalize_dispatched = true;
        self.deciding_block = Some((block.clone(), block_id));
        vec![Action::ApplyBlock {
            height,
            block: Box::new(block),
            commit,
        }]
    }

    /// The application finished the decided block: fold it into the chain
    /// state and move to the next height.
    #[instrument(skip(self, app_hash, results_hash), fields(height))]
    fn on_block_applied(&mut self, height: i64, app_hash: Hash, results_hash: Hash) -> Vec<Action> {
        if height != self.rs.height || !self.finalize_dispatched {
            warn!(
                height,
                at_height = self.rs.height,
                "ignoring stale block-applied callback"
            );
            return vec![];
        }
        let Some((block, block_id)) = self.deciding_block.take() else {
            warn!(height, "block-applied callback without a deciding block");
            return vec![];
        };
        let tx_ids: Vec<_> = block.data.txs.iter().map(|tx| basalt_types::sha256(tx)).collect();
        self.chain
            .apply_block(&block, block_id, app_hash, results_hash);

        let last_commit = self.rs.votes.precommits(self.rs.commit_round);
        let commit_time = self.rs.commit_time;
        let next_height = height + 1;

        let votes = Arc::new(HeightVoteSet::new(
            self.chain.chain_id.clone(),
            next_height,
            self.chain.validators.clone(),
        ));
        let mut rs = RoundState::new(
            next_height,
            self.chain.validators.clone(),
            self.chain.last_validators.clone(),
            votes,
        );
        rs.last_commit = last_commit;
        rs.commit_time = commit_time;
        rs.start_time = commit_time + self.config.timeout_commit_ms as i64;
        self.rs = rs;
        self.finalize_dispatched = false;

        info!(
            height,
            app_hash = %app_hash,
            next_height,
            "committed block, scheduling next height"
        );
        vec![
            Action::EnqueueInternal(Event::BlockCommitted {
                height,
                block_id,
                tx_ids,
            }),
            Action::ScheduleTimeout(TimeoutInfo {
                duration_ms: (self.rs.start_time - self.now).max(0) as u64,
                height: next_height,
                round: 0,
                step: Step::NewHeight,
            }),
        ]
    }

    // ── Proposals and block parts ─────────────────────────────────────

    #[instrument(skip(self, proposal, source), fields(height = proposal.height, round = proposal.round))]
    fn on_proposal(&mut self, proposal: Proposal, source: &MessageSource) -> Vec<Action> {
        if self.rs.proposal.is_some() {
            return vec![];
        }
        if proposal.height != self.rs.height || proposal.round != self.rs.round {
            debug!("ignoring proposal for other coordinates");
            return vec![];
        }
        if let Err(e) = proposal.validate_basic() {
            warn!(error = %e, "malformed proposal");
            return self.flag(source, "malformed proposal");
        }

        let proposer = self.rs.validators.proposer();
        let Some(signature) = &proposal.signature else {
            return self.flag(source, "unsigned proposal");
        };
        if proposer
            .pub_key
            .verify(&proposal.sign_bytes(&self.chain.chain_id), signature)
            .is_err()
        {
            warn!(proposer = %proposer.address, "proposal signature does not verify");
            return self.flag(source, "bad proposal signature");
        }

        info!(block = %proposal.block_id, pol_round = proposal.pol_round, "received proposal");
        if self.rs.proposal_block_parts.is_none() {
            self.rs.proposal_block_parts =
                Some(PartSet::from_header(&proposal.block_id.part_set_header));
        }
        self.rs.proposal = Some(proposal);

        if self.rs.is_proposal_complete() && self.rs.step <= Step::Propose {
            return self.enter_prevote(self.rs.height, self.rs.round);
        }
        vec![]
    }

    #[instrument(skip(self, part, source), fields(height, round, index = part.index))]
    fn on_block_part(
        &mut self,
        height: i64,
        round: i32,
        part: Part,
        source: &MessageSource,
    ) -> Vec<Action> {
        if height != self.rs.height {
            debug!("ignoring block part for other height");
            return vec![];
        }
        let Some(parts) = self.rs.proposal_block_parts.as_mut() else {
            debug!("no part set to add to yet");
            return vec![];
        };
        match parts.add_part(part) {
            Ok(true) => {}
            Ok(false) => return vec![], // duplicate, silently dropped
            Err(e) => {
                warn!(error = %e, "rejected block part");
                return self.flag(source, "invalid block part");
            }
        }

        if !parts.is_complete() {
            return vec![];
        }
        let block = match Block::from_part_set(parts) {
            Ok(block) => block,
            Err(e) => {
                warn!(error = %e, "completed part set does not decode");
                return self.flag(source, "undecodable block");
            }
        };
        let expected_hash = self.rs.proposal.as_ref().map(|p| p.block_id.hash);
        if expected_hash.is_some_and(|expected| expected != block.hash()) {
            warn!("assembled block does not match proposal");
            return self.flag(source, "block hash mismatch");
        }
        info!(height, block = %block.hash(), "received complete proposal block");
        self.rs.proposal_block = Some(block);

        // A prevote majority may already point at this block.
        let round_now = self.rs.round;
        let maj = self
            .rs
            .votes
            .prevotes(round_now)
            .and_then(|set| set.lock().two_thirds_majority());
        if let Some(block_id) = maj {
            if !block_id.is_nil() && self.rs.valid_round < round_now {
                if self
                    .rs
                    .proposal_block
                    .as_ref()
                    .is_some_and(|b| b.hash() == block_id.hash)
                {
                    self.rs.valid_round = round_now;
                    self.rs.valid_block = self.rs.proposal_block.clone();
                    self.rs.valid_block_parts = self.rs.proposal_block_parts.clone();
                }
            }
        }

        if self.rs.step <= Step::Propose && self.rs.is_proposal_complete() {
            let mut actions = self.enter_prevote(height, self.rs.round);
            actions.extend(self.maybe_precommit_after_complete(height));
            actions
        } else if self.rs.step == Step::Commit {
            self.try_finalize(height)
        } else {
            vec![]
        }
    }

    /// After the block assembles late, a prevote majority for it may
    /// already be sitting in the current round.
    fn maybe_precommit_after_complete(&mut self, height: i64) -> Vec<Action> {
        let round = self.rs.round;
        let maj = self
            .rs
            .votes
            .prevotes(round)
            .and_then(|set| set.lock().two_thirds_majority());
        match maj {
            Some(block_id) if !block_id.is_nil() => self.enter_precommit(height, round),
            _ => vec![],
        }
    }

    // ── Votes ─────────────────────────────────────────────────────────

    #[instrument(skip(self, vote, source), fields(
        height = vote.height,
        round = vote.round,
        vote_type = %vote.vote_type,
        index = vote.validator_index
    ))]
    fn on_vote(&mut self, vote: Vote, source: &MessageSource) -> Vec<Action> {
        // Precommits for the previous height top up the last commit.
        if vote.height + 1 == self.rs.height
            && vote.vote_type == VoteType::Precommit
            && self.rs.step == Step::NewHeight
        {
            if let Some(last_commit) = &self.rs.last_commit {
                match last_commit.lock().add_vote(vote.clone()) {
                    Ok(true) => {
                        return vec![Action::Broadcast(OutboundMessage::HasVote {
                            height: vote.height,
                            round: vote.round,
                            vote_type: vote.vote_type,
                            index: vote.validator_index,
                        })]
                    }
                    Ok(false) => return vec![],
                    Err(e) => {
                        debug!(error = %e, "late last-commit vote rejected");
                        return vec![];
                    }
                }
            }
            return vec![];
        }
        if vote.height != self.rs.height {
            debug!("ignoring vote for other height");
            return vec![];
        }

        let added = self.rs.votes.add_vote(vote.clone(), source.peer());
        match added {
            Ok(true) => {}
            Ok(false) => return vec![],
            Err(VoteSetError::ConflictingVote { existing }) => {
                if vote.validator_address == self.key.address() {
                    error!("conflicting vote carries our own address");
                    return vec![];
                }
                info!(
                    validator = %vote.validator_address,
                    "conflicting votes detected, submitting evidence"
                );
                let mut evidence = match DuplicateVoteEvidence::new(*existing, vote, self.now) {
                    Ok(evidence) => evidence,
                    Err(e) => {
                        warn!(error = %e, "could not build duplicate-vote evidence");
                        return vec![];
                    }
                };
                evidence.total_voting_power = self.rs.validators.total_voting_power();
                evidence.validator_power = self
                    .rs
                    .validators
                    .get_by_address(&evidence.vote_a.validator_address)
                    .map(|(_, v)| v.voting_power)
                    .unwrap_or(0);
                return vec![Action::SubmitEvidence(evidence)];
            }
            Err(VoteSetError::CatchupExhausted { .. }) => {
                return self.flag(source, "catch-up rounds exhausted");
            }
            Err(e) => {
                debug!(error = %e, "vote rejected");
                return self.flag(source, "invalid vote");
            }
        }

        let mut actions = vec![Action::Broadcast(OutboundMessage::HasVote {
            height: vote.height,
            round: vote.round,
            vote_type: vote.vote_type,
            index: vote.validator_index,
        })];
        match vote.vote_type {
            VoteType::Prevote => actions.extend(self.on_prevote_added(&vote)),
            VoteType::Precommit => actions.extend(self.on_precommit_added(&vote)),
        }
        actions
    }

    fn on_prevote_added(&mut self, vote: &Vote) -> Vec<Action> {
        let height = self.rs.height;
        let vote_round = vote.round;
        let Some(prevotes) = self.rs.votes.prevotes(vote_round) else {
            return vec![];
        };
        let maj = prevotes.lock().two_thirds_majority();
        let has_any = prevotes.lock().has_two_thirds_any();

        if let Some(block_id) = maj {
            // A proof of lock for a different block releases ours.
            let locked_elsewhere = self
                .rs
                .locked_block
                .as_ref()
                .is_some_and(|locked| locked.hash() != block_id.hash);
            if locked_elsewhere
                && self.rs.locked_round < vote_round
                && vote_round <= self.rs.round
            {
                info!(round = vote_round, "unlocking: POL for a different block");
                self.unlock();
            }

            // Track the most recent non-nil POL as the valid block.
            if !block_id.is_nil() && self.rs.valid_round < vote_round && vote_round == self.rs.round
            {
                if self
                    .rs
                    .proposal_block
                    .as_ref()
                    .is_some_and(|block| block.hash() == block_id.hash)
                {
                    debug!(round = vote_round, block = %block_id, "updating valid block");
                    self.rs.valid_round = vote_round;
                    self.rs.valid_block = self.rs.proposal_block.clone();
                    self.rs.valid_block_parts = self.rs.proposal_block_parts.clone();
                } else {
                    // Majority for a block we do not hold: start fetching
                    // it; the valid block follows once assembled.
                    debug!(round = vote_round, block = %block_id, "majority block missing, fetching parts");
                    self.rs.proposal_block = None;
                    if !self
                        .rs
                        .proposal_block_parts
                        .as_ref()
                        .is_some_and(|parts| parts.has_header(&block_id.part_set_header))
                    {
                        self.rs.proposal_block_parts =
                            Some(PartSet::from_header(&block_id.part_set_header));
                    }
                }
            }
        }

        let mut actions = Vec::new();
        if self.rs.round < vote_round && has_any {
            // The network has moved on; skip ahead.
            actions.extend(self.enter_new_round(height, vote_round));
        } else if self.rs.round == vote_round && self.rs.step >= Step::Prevote {
            let decided = maj.is_some_and(|id| id.is_nil() || self.rs.is_proposal_complete());
            if decided {
                actions.extend(self.enter_precommit(height, vote_round));
            } else if has_any {
                actions.extend(self.enter_prevote_wait(height, vote_round));
            }
        } else if self.rs.step <= Step::Propose
            && self
                .rs
                .proposal
                .as_ref()
                .is_some_and(|p| p.pol_round >= 0 && p.pol_round == vote_round)
            && self.rs.is_proposal_complete()
        {
            // The prevote completed the proposal's proof of lock.
            actions.extend(self.enter_prevote(height, self.rs.round));
        }
        actions
    }

    fn on_precommit_added(&mut self, vote: &Vote) -> Vec<Action> {
        let height = self.rs.height;
        let vote_round = vote.round;
        let Some(precommits) = self.rs.votes.precommits(vote_round) else {
            return vec![];
        };
        let maj = precommits.lock().two_thirds_majority();
        let has_any = precommits.lock().has_two_thirds_any();

        let mut actions = Vec::new();
        if let Some(block_id) = maj {
            actions.extend(self.enter_new_round(height, vote_round));
            actions.extend(self.enter_precommit(height, vote_round));
            if block_id.is_nil() {
                actions.extend(self.enter_precommit_wait(height, vote_round));
            } else {
                actions.extend(self.enter_commit(height, vote_round));
            }
        } else if self.rs.round <= vote_round && has_any {
            actions.extend(self.enter_new_round(height, vote_round));
            actions.extend(self.enter_precommit_wait(height, vote_round));
        }
        actions
    }

    // ── Gossip bookkeeping ────────────────────────────────────────────

    fn on_peer_maj23(
        &mut self,
        height: i64,
        round: i32,
        vote_type: VoteType,
        block_id: BlockId,
        peer_id: PeerId,
    ) -> Vec<Action> {
        if height != self.rs.height {
            return vec![];
        }
        if let Err(e) = self
            .rs
            .votes
            .set_peer_maj23(round, vote_type, peer_id.clone(), block_id)
        {
            warn!(peer = %peer_id, error = %e, "conflicting majority claim");
            return vec![Action::FlagPeer {
                peer_id,
                reason: "conflicting maj23 claim",
            }];
        }
        let votes = match vote_type {
            VoteType::Prevote => self.rs.votes.prevotes(round),
            VoteType::Precommit => self.rs.votes.precommits(round),
        }
        .and_then(|set| set.lock().bit_array_by_block_id(&block_id))
        .unwrap_or_else(|| basalt_types::BitArray::new(self.rs.validators.len()));

        vec![Action::Broadcast(OutboundMessage::VoteSetBits {
            height,
            round,
            vote_type,
            block_id,
            votes,
        })]
    }

    // ── Helpers ───────────────────────────────────────────────────────

    /// Sign a vote as our validator and queue it for aggregation and
    /// broadcast. Non-validator observers produce nothing.
    fn sign_add_vote(&mut self, vote_type: VoteType, block_id: BlockId) -> Vec<Action> {
        let Some((index, _)) = self.rs.validators.get_by_address(&self.key.address()) else {
            return vec![];
        };
        let mut vote = Vote {
            vote_type,
            height: self.rs.height,
            round: self.rs.round,
            block_id,
            timestamp: self.now,
            validator_address: self.key.address(),
            validator_index: index,
            signature: None,
        };
        vote.signature = Some(self.key.sign(&vote.sign_bytes(&self.chain.chain_id)));
        debug!(%vote, "signed vote");
        vec![
            Action::Broadcast(OutboundMessage::Vote(vote.clone())),
            Action::EnqueueInternal(Event::VoteReceived {
                vote,
                source: MessageSource::Internal,
            }),
        ]
    }

    /// Check a proposal block against the committed chain state.
    fn validate_block(&self, block: &Block) -> Result<(), crate::error::ConsensusError> {
        use crate::error::ConsensusError;
        block.validate_basic()?;
        let header = &block.header;
        if header.chain_id != self.chain.chain_id {
            return Err(ConsensusError::InvalidBlock("wrong chain id".into()));
        }
        if header.height != self.rs.height {
            return Err(ConsensusError::InvalidBlock(format!(
                "height {} != {}",
                header.height, self.rs.height
            )));
        }
        if header.last_block_id != self.chain.last_block_id {
            return Err(ConsensusError::InvalidBlock("wrong last block id".into()));
        }
        if header.app_hash != self.chain.app_hash {
            return Err(ConsensusError::InvalidBlock("wrong app hash".into()));
        }
        if header.validators_hash != self.chain.validators.hash() {
            return Err(ConsensusError::InvalidBlock("wrong validators hash".into()));
        }
        Ok(())
    }

    fn flag(&self, source: &MessageSource, reason: &'static str) -> Vec<Action> {
        match source.peer() {
            Some(peer_id) => vec![Action::FlagPeer {
                peer_id: peer_id.clone(),
                reason,
            }],
            None => vec![],
        }
    }
}

impl SubStateMachine for ConsensusState {
    fn try_handle(&mut self, event: &Event) -> Option<Vec<Action>> {
        match event {
            Event::TimeoutExpired(ti) => Some(self.on_timeout(*ti)),
            Event::ProposalReceived { proposal, source } => {
                Some(self.on_proposal(proposal.clone(), source))
            }
            Event::BlockPartReceived {
                height,
                round,
                part,
                source,
            } => Some(self.on_block_part(*height, *round, part.clone(), source)),
            Event::VoteReceived { vote, source } => Some(self.on_vote(vote.clone(), source)),
            Event::PeerMaj23 {
                height,
                round,
                vote_type,
                block_id,
                peer_id,
            } => Some(self.on_peer_maj23(*height, *round, *vote_type, *block_id, peer_id.clone())),
            Event::BlockApplied {
                height,
                app_hash,
                results_hash,
            } => Some(self.on_block_applied(*height, *app_hash, *results_hash)),
            _ => None,
        }
    }

    fn set_time(&mut self, now: Timestamp) {
        self.now = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ValidatorFixture;
    use std::collections::VecDeque;

    /// Four equal validators; with equal powers the proposer for round r
    /// of the first height is validator index r.
    fn fixture() -> ValidatorFixture {
        ValidatorFixture::new("state-test", &[10, 10, 10, 10])
    }

    /// Process an event, feeding internal enqueues back in, and collect
    /// the externally visible actions.
    fn drive(node: &mut ConsensusState, event: Event) -> Vec<Action> {
        let mut queue = VecDeque::from([event]);
        let mut out = Vec::new();
        while let Some(event) = queue.pop_front() {
            for action in node.try_handle(&event).unwrap_or_default() {
                match action {
                    Action::EnqueueInternal(event) => queue.push_back(event),
                    other => out.push(other),
                }
            }
        }
        out
    }

    fn peer(name: &str) -> MessageSource {
        MessageSource::Peer(PeerId::from(name))
    }

    fn broadcast_votes(actions: &[Action]) -> Vec<Vote> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Broadcast(OutboundMessage::Vote(vote)) => Some(vote.clone()),
                _ => None,
            })
            .collect()
    }

    fn scheduled_steps(actions: &[Action]) -> Vec<Step> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::ScheduleTimeout(ti) => Some(ti.step),
                _ => None,
            })
            .collect()
    }

    /// Fire the pending timeout for the node's current coordinates.
    fn fire(node: &mut ConsensusState, step: Step) -> Vec<Action> {
        let ti = TimeoutInfo {
            duration_ms: 0,
            height: node.height(),
            round: node.round(),
            step,
        };
        drive(node, Event::TimeoutExpired(ti))
    }

    /// Start the node and enter round 0 of height 1.
    fn start_round_zero(node: &mut ConsensusState) -> Vec<Action> {
        node.set_time(1);
        node.start();
        drive(
            node,
            Event::TimeoutExpired(TimeoutInfo {
                duration_ms: 0,
                height: 1,
                round: 0,
                step: Step::NewHeight,
            }),
        )
    }

    /// Deliver a proposal plus all of its parts from `from`.
    fn deliver_proposal(
        node: &mut ConsensusState,
        fx: &ValidatorFixture,
        proposer: usize,
        round: i32,
        pol_round: i32,
        block: &basalt_types::Block,
        parts: &PartSet,
        from: &str,
    ) -> Vec<Action> {
        let proposal = fx.signed_proposal(proposer, round, pol_round, block, parts);
        let mut actions = drive(
            node,
            Event::ProposalReceived {
                proposal,
                source: peer(from),
            },
        );
        for part in parts.parts() {
            actions.extend(drive(
                node,
                Event::BlockPartReceived {
                    height: 1,
                    round,
                    part: part.clone(),
                    source: peer(from),
                },
            ));
        }
        actions
    }

    fn deliver_votes(
        node: &mut ConsensusState,
        fx: &ValidatorFixture,
        indices: &[usize],
        vote_type: VoteType,
        round: i32,
        id: BlockId,
    ) -> Vec<Action> {
        let mut actions = Vec::new();
        for &index in indices {
            let vote = fx.signed_vote(index, vote_type, 1, round, id);
            actions.extend(drive(
                node,
                Event::VoteReceived {
                    vote,
                    source: peer("gossip"),
                },
            ));
        }
        actions
    }

    #[test]
    fn silent_proposer_leads_to_nil_prevote_and_next_round() {
        let fx = fixture();
        let mut node = fx.consensus_node(3);

        let actions = start_round_zero(&mut node);
        assert_eq!(node.round(), 0);
        assert_eq!(node.step(), Step::Propose);
        assert!(!node.is_proposer());
        assert!(scheduled_steps(&actions).contains(&Step::Propose));

        // The proposal never arrives; the propose timeout fires.
        let actions = fire(&mut node, Step::Propose);
        let votes = broadcast_votes(&actions);
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].vote_type, VoteType::Prevote);
        assert!(votes[0].block_id.is_nil());

        // Two more nil prevotes make +2/3 nil: precommit nil, no lock.
        let actions = deliver_votes(&mut node, &fx, &[0, 1], VoteType::Prevote, 0, BlockId::nil());
        let votes = broadcast_votes(&actions);
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].vote_type, VoteType::Precommit);
        assert!(votes[0].block_id.is_nil());
        assert_eq!(node.round_state().locked_round, -1);

        // +2/3 nil precommits arm the precommit-wait timeout; its expiry
        // moves the node to round 1.
        let actions =
            deliver_votes(&mut node, &fx, &[0, 1], VoteType::Precommit, 0, BlockId::nil());
        assert!(scheduled_steps(&actions).contains(&Step::PrecommitWait));
        fire(&mut node, Step::PrecommitWait);
        assert_eq!(node.round(), 1);
        assert_eq!(node.step(), Step::Propose);
        assert_eq!(node.height(), 1);
    }

    #[test]
    fn prevotes_valid_proposal_and_locks_on_majority() {
        let fx = fixture();
        let mut node = fx.consensus_node(3);
        start_round_zero(&mut node);

        let (block, parts) = fx.make_block(vec![b"tx".to_vec()], 0);
        let id = block.block_id(&parts);
        let actions = deliver_proposal(&mut node, &fx, 0, 0, -1, &block, &parts, "p0");

        // A complete valid proposal earns our prevote.
        let votes = broadcast_votes(&actions);
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].vote_type, VoteType::Prevote);
        assert_eq!(votes[0].block_id, id);

        // +2/3 prevotes for the block: lock and precommit it.
        let actions = deliver_votes(&mut node, &fx, &[0, 1], VoteType::Prevote, 0, id);
        let votes = broadcast_votes(&actions);
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].vote_type, VoteType::Precommit);
        assert_eq!(votes[0].block_id, id);
        assert_eq!(node.round_state().locked_round, 0);
        assert_eq!(node.round_state().valid_round, 0);
        assert_eq!(
            node.round_state().locked_block.as_ref().map(|b| b.hash()),
            Some(id.hash)
        );
    }

    #[test]
    fn unlocks_when_majority_prevotes_nil_in_later_round() {
        let fx = fixture();
        let mut node = fx.consensus_node(3);
        start_round_zero(&mut node);

        // Lock on a block in round 0.
        let (block, parts) = fx.make_block(vec![b"tx".to_vec()], 0);
        let id = block.block_id(&parts);
        deliver_proposal(&mut node, &fx, 0, 0, -1, &block, &parts, "p0");
        deliver_votes(&mut node, &fx, &[0, 1], VoteType::Prevote, 0, id);
        assert_eq!(node.round_state().locked_round, 0);

        // No precommit majority for the block: 0 joins us, 1 and 2 nil.
        deliver_votes(&mut node, &fx, &[0], VoteType::Precommit, 0, id);
        let actions =
            deliver_votes(&mut node, &fx, &[1, 2], VoteType::Precommit, 0, BlockId::nil());
        assert!(scheduled_steps(&actions).contains(&Step::PrecommitWait));
        fire(&mut node, Step::PrecommitWait);
        assert_eq!(node.round(), 1);
        assert_eq!(node.round_state().locked_round, 0, "lock survives the round change");

        // Round 1 proposes a different block; locked, we prevote nil.
        let (other, other_parts) = fx.make_block(vec![b"other".to_vec()], 9);
        let actions = deliver_proposal(&mut node, &fx, 1, 1, -1, &other, &other_parts, "p1");
        let votes = broadcast_votes(&actions);
        assert_eq!(votes.len(), 1);
        assert!(votes[0].block_id.is_nil());

        // +2/3 nil prevotes at round 1: unlock and precommit nil.
        let actions =
            deliver_votes(&mut node, &fx, &[0, 1, 2], VoteType::Prevote, 1, BlockId::nil());
        assert_eq!(node.round_state().locked_round, -1);
        assert!(node.round_state().locked_block.is_none());
        let votes = broadcast_votes(&actions);
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].vote_type, VoteType::Precommit);
        assert!(votes[0].block_id.is_nil());
    }

    #[test]
    fn stale_pol_round_does_not_override_lock() {
        let fx = fixture();
        let mut node = fx.consensus_node(3);
        start_round_zero(&mut node);

        // Round 0 passes with nil everything.
        fire(&mut node, Step::Propose);
        deliver_votes(&mut node, &fx, &[0, 1], VoteType::Prevote, 0, BlockId::nil());
        deliver_votes(&mut node, &fx, &[0, 1], VoteType::Precommit, 0, BlockId::nil());
        fire(&mut node, Step::PrecommitWait);
        assert_eq!(node.round(), 1);

        // Round 1: lock on block B.
        let (block_b, parts_b) = fx.make_block(vec![b"b".to_vec()], 1);
        let id_b = block_b.block_id(&parts_b);
        deliver_proposal(&mut node, &fx, 1, 1, -1, &block_b, &parts_b, "p1");
        deliver_votes(&mut node, &fx, &[0, 1], VoteType::Prevote, 1, id_b);
        assert_eq!(node.round_state().locked_round, 1);
        assert_eq!(node.round_state().valid_round, 1);

        // No precommit decision; all others precommit nil.
        deliver_votes(&mut node, &fx, &[0, 1, 2], VoteType::Precommit, 1, BlockId::nil());
        fire(&mut node, Step::PrecommitWait);
        assert_eq!(node.round(), 2);

        // Round 2 offers a different block citing a POL from round 0,
        // which is older than our lock: prevote nil, keep the lock.
        let (block_c, parts_c) = fx.make_block(vec![b"c".to_vec()], 2);
        let actions = deliver_proposal(&mut node, &fx, 2, 2, 0, &block_c, &parts_c, "p2");
        let votes = broadcast_votes(&actions);
        assert_eq!(votes.len(), 1);
        assert!(votes[0].block_id.is_nil(), "must not follow a stale POL");
        assert_eq!(node.round_state().locked_round, 1);
    }

    #[test]
    fn proposer_reproposes_valid_block_with_its_pol_round() {
        let fx = fixture();
        let mut node = fx.consensus_node(3);
        start_round_zero(&mut node);

        // Round 0 nil, round 1 nil, round 2 nil: reach round 3 where this
        // node proposes. Along the way, round 1 locks a valid block.
        fire(&mut node, Step::Propose);
        deliver_votes(&mut node, &fx, &[0, 1], VoteType::Prevote, 0, BlockId::nil());
        deliver_votes(&mut node, &fx, &[0, 1], VoteType::Precommit, 0, BlockId::nil());
        fire(&mut node, Step::PrecommitWait);
        assert_eq!(node.round(), 1);

        let (block_b, parts_b) = fx.make_block(vec![b"b".to_vec()], 1);
        let id_b = block_b.block_id(&parts_b);
        deliver_proposal(&mut node, &fx, 1, 1, -1, &block_b, &parts_b, "p1");
        deliver_votes(&mut node, &fx, &[0, 1], VoteType::Prevote, 1, id_b);
        assert_eq!(node.round_state().locked_round, 1);

        // Split prevote knowledge elsewhere: only nil precommits follow.
        deliver_votes(&mut node, &fx, &[0, 1, 2], VoteType::Precommit, 1, BlockId::nil());
        fire(&mut node, Step::PrecommitWait);
        assert_eq!(node.round(), 2);

        // Round 2: nothing proposed; prevotes split so that no majority
        // forms and the lock survives.
        fire(&mut node, Step::Propose);
        deliver_votes(&mut node, &fx, &[0], VoteType::Prevote, 2, BlockId::nil());
        deliver_votes(&mut node, &fx, &[1, 2], VoteType::Prevote, 2, id_b);
        fire(&mut node, Step::PrevoteWait);
        deliver_votes(&mut node, &fx, &[0, 1, 2], VoteType::Precommit, 2, BlockId::nil());

        // Entering round 3 makes this node the proposer: it re-proposes
        // the valid block with its POL round and prevotes it because it
        // is the locked block.
        let actions = fire(&mut node, Step::PrecommitWait);
        assert_eq!(node.round(), 3);
        assert!(node.is_proposer());

        let proposal = actions
            .iter()
            .find_map(|a| match a {
                Action::Broadcast(OutboundMessage::Proposal(p)) => Some(p.clone()),
                _ => None,
            })
            .expect("proposal broadcast on entering round 3");
        assert_eq!(proposal.block_id, id_b);
        assert_eq!(proposal.pol_round, 1);

        let votes = broadcast_votes(&actions);
        let prevote = votes
            .iter()
            .find(|v| v.vote_type == VoteType::Prevote)
            .expect("prevote for re-proposed block");
        assert_eq!(prevote.block_id, id_b);
    }

    #[test]
    fn commits_block_and_advances_height() {
        let fx = fixture();
        let mut node = fx.consensus_node(3);
        start_round_zero(&mut node);

        let (block, parts) = fx.make_block(vec![b"tx-1".to_vec(), b"tx-2".to_vec()], 0);
        let id = block.block_id(&parts);
        deliver_proposal(&mut node, &fx, 0, 0, -1, &block, &parts, "p0");
        deliver_votes(&mut node, &fx, &[0, 1], VoteType::Prevote, 0, id);

        // +2/3 precommits for the block dispatch the apply call.
        let actions = deliver_votes(&mut node, &fx, &[0, 1], VoteType::Precommit, 0, id);
        let apply = actions
            .iter()
            .find_map(|a| match a {
                Action::ApplyBlock {
                    height,
                    block,
                    commit,
                } => Some((*height, block.clone(), commit.clone())),
                _ => None,
            })
            .expect("apply block dispatched");
        assert_eq!(apply.0, 1);
        assert_eq!(apply.1.hash(), id.hash);
        assert_eq!(apply.2.block_id, id);
        assert_eq!(apply.2.signatures.len(), 4);
        assert_eq!(node.step(), Step::Commit);

        // The application reports back; the node moves to height 2.
        let app_hash = Hash([0xaa; 32]);
        let actions = drive(
            &mut node,
            Event::BlockApplied {
                height: 1,
                app_hash,
                results_hash: Hash::ZERO,
            },
        );
        assert_eq!(node.height(), 2);
        assert_eq!(node.round(), 0);
        assert_eq!(node.step(), Step::NewHeight);
        assert_eq!(node.chain().last_block_height, 1);
        assert_eq!(node.chain().app_hash, app_hash);
        let steps = scheduled_steps(&actions);
        assert_eq!(steps, vec![Step::NewHeight]);
    }

    #[test]
    fn skips_ahead_when_future_round_has_majority() {
        let fx = fixture();
        let mut node = fx.consensus_node(3);
        start_round_zero(&mut node);
        assert_eq!(node.round(), 0);

        // +2/3 prevote activity at round 2 drags us forward.
        deliver_votes(&mut node, &fx, &[0, 1, 2], VoteType::Prevote, 2, BlockId::nil());
        assert_eq!(node.round(), 2);
    }

    #[test]
    fn conflicting_votes_become_evidence() {
        let fx = fixture();
        let mut node = fx.consensus_node(3);
        start_round_zero(&mut node);

        let (block_a, parts_a) = fx.make_block(vec![b"a".to_vec()], 1);
        let (block_b, parts_b) = fx.make_block(vec![b"b".to_vec()], 2);
        let vote_a = fx.signed_vote(0, VoteType::Prevote, 1, 0, block_a.block_id(&parts_a));
        let vote_b = fx.signed_vote(0, VoteType::Prevote, 1, 0, block_b.block_id(&parts_b));

        drive(
            &mut node,
            Event::VoteReceived {
                vote: vote_a.clone(),
                source: peer("gossip"),
            },
        );
        let actions = drive(
            &mut node,
            Event::VoteReceived {
                vote: vote_b,
                source: peer("gossip"),
            },
        );
        let evidence = actions
            .iter()
            .find_map(|a| match a {
                Action::SubmitEvidence(e) => Some(e.clone()),
                _ => None,
            })
            .expect("evidence submitted");
        assert_eq!(evidence.vote_a.validator_address, vote_a.validator_address);
        assert_eq!(evidence.total_voting_power, 40);
        assert_eq!(evidence.validator_power, 10);
    }

    #[test]
    fn stale_timeouts_are_ignored() {
        let fx = fixture();
        let mut node = fx.consensus_node(3);
        start_round_zero(&mut node);

        // A propose timeout for a past round does nothing.
        let actions = drive(
            &mut node,
            Event::TimeoutExpired(TimeoutInfo {
                duration_ms: 0,
                height: 1,
                round: -1,
                step: Step::Propose,
            }),
        );
        assert!(actions.is_empty());
        assert_eq!(node.step(), Step::Propose);

        // A timeout for another height does nothing.
        let actions = drive(
            &mut node,
            Event::TimeoutExpired(TimeoutInfo {
                duration_ms: 0,
                height: 9,
                round: 0,
                step: Step::Propose,
            }),
        );
        assert!(actions.is_empty());
        assert_eq!(node.round(), 0);
    }

    #[test]
    fn peer_maj23_claim_is_answered_with_vote_bits() {
        let fx = fixture();
        let mut node = fx.consensus_node(3);
        start_round_zero(&mut node);

        let (block, parts) = fx.make_block(vec![], 0);
        let id = block.block_id(&parts);
        deliver_votes(&mut node, &fx, &[0, 2], VoteType::Prevote, 0, id);

        let actions = drive(
            &mut node,
            Event::PeerMaj23 {
                height: 1,
                round: 0,
                vote_type: VoteType::Prevote,
                block_id: id,
                peer_id: PeerId::from("claimer"),
            },
        );
        let bits = actions
            .iter()
            .find_map(|a| match a {
                Action::Broadcast(OutboundMessage::VoteSetBits { votes, .. }) => {
                    Some(votes.clone())
                }
                _ => None,
            })
            .expect("vote set bits reply");
        assert_eq!(bits.iter_set().collect::<Vec<_>>(), vec![0, 2]);
    }
}
