//! Event types for the deterministic state machine.

use basalt_types::{BlockId, Hash, Part, PeerId, Proposal, TxId, Vote, VoteType, WrappedTx};

use crate::TimeoutInfo;

/// Priority levels for event ordering when several inputs are ready.
///
/// Lower values are processed first. Consequences of prior processing
/// (internal events) outrank timers, timers outrank peer traffic, and
/// client requests come last, so causality within the node is preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum EventPriority {
    /// Internal events: consequences of prior event processing.
    Internal = 0,
    /// Timer events: scheduled by the node itself.
    Timer = 1,
    /// Network events: external inputs from peers.
    Network = 2,
    /// Client events: external inputs from users.
    Client = 3,
}

/// Where a consensus message came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageSource {
    /// Produced by this node (own proposals, own votes).
    Internal,
    /// Received from the peer with this id.
    Peer(PeerId),
}

impl MessageSource {
    /// The peer to attribute misbehavior to, if any.
    pub fn peer(&self) -> Option<&PeerId> {
        match self {
            MessageSource::Internal => None,
            MessageSource::Peer(id) => Some(id),
        }
    }
}

/// All possible events a node can receive.
///
/// Events are passive data describing something that happened. The state
/// machine processes them and returns actions.
#[derive(Debug, Clone)]
pub enum Event {
    // ── Timers ────────────────────────────────────────────────────────
    /// A scheduled consensus timeout fired.
    TimeoutExpired(TimeoutInfo),

    // ── Consensus messages (internal or from peers) ───────────────────
    /// A block proposal for some (height, round).
    ProposalReceived {
        proposal: Proposal,
        source: MessageSource,
    },

    /// One part of a proposed block.
    BlockPartReceived {
        height: i64,
        round: i32,
        part: Part,
        source: MessageSource,
    },

    /// A prevote or precommit.
    VoteReceived { vote: Vote, source: MessageSource },

    /// A peer claims +2/3 voted for `block_id` at the given coordinates.
    /// Biases gossip so catching-up peers are served what they need.
    PeerMaj23 {
        height: i64,
        round: i32,
        vote_type: VoteType,
        block_id: BlockId,
        peer_id: PeerId,
    },

    // ── Application callbacks ─────────────────────────────────────────
    /// The runner finished applying a decided block: every transaction
    /// delivered, the application committed, state persisted.
    BlockApplied {
        height: i64,
        app_hash: Hash,
        results_hash: Hash,
    },

    /// Verdict of `check_tx` for a submitted transaction.
    TxVerdict {
        code: u32,
        tx: WrappedTx,
        source: MessageSource,
    },

    // ── Internal notifications ────────────────────────────────────────
    /// A block was decided and handed to the application; mempool and
    /// collaborators can drop its transactions.
    BlockCommitted {
        height: i64,
        block_id: BlockId,
        tx_ids: Vec<TxId>,
    },

    // ── Client requests ───────────────────────────────────────────────
    /// A client submitted a raw transaction.
    TxSubmitted { tx: Vec<u8> },
}

impl Event {
    /// The priority class of this event.
    pub fn priority(&self) -> EventPriority {
        match self {
            Event::BlockApplied { .. } | Event::BlockCommitted { .. } => EventPriority::Internal,

            Event::TxVerdict { source, .. } => match source {
                MessageSource::Internal => EventPriority::Internal,
                MessageSource::Peer(_) => EventPriority::Network,
            },

            Event::TimeoutExpired(_) => EventPriority::Timer,

            Event::ProposalReceived { source, .. }
            | Event::BlockPartReceived { source, .. }
            | Event::VoteReceived { source, .. } => match source {
                MessageSource::Internal => EventPriority::Internal,
                MessageSource::Peer(_) => EventPriority::Network,
            },

            Event::PeerMaj23 { .. } => EventPriority::Network,

            Event::TxSubmitted { .. } => EventPriority::Client,
        }
    }

    pub fn is_internal(&self) -> bool {
        self.priority() == EventPriority::Internal
    }

    /// The event type name for telemetry.
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::TimeoutExpired(_) => "TimeoutExpired",
            Event::ProposalReceived { .. } => "ProposalReceived",
            Event::BlockPartReceived { .. } => "BlockPartReceived",
            Event::VoteReceived { .. } => "VoteReceived",
            Event::PeerMaj23 { .. } => "PeerMaj23",
            Event::BlockApplied { .. } => "BlockApplied",
            Event::TxVerdict { .. } => "TxVerdict",
            Event::BlockCommitted { .. } => "BlockCommitted",
            Event::TxSubmitted { .. } => "TxSubmitted",
        }
    }
}
