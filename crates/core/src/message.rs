//! Outbound message types for the peer reactor.

use basalt_types::{BitArray, BlockId, Part, Proposal, Vote, VoteType};

/// Messages a node hands to the peer reactor for broadcast.
///
/// Only the semantics are defined here; the reactor owns the transport
/// framing.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    /// A signed block proposal.
    Proposal(Proposal),

    /// One part of the proposed block.
    BlockPart { height: i64, round: i32, part: Part },

    /// A signed prevote or precommit.
    Vote(Vote),

    /// Announcement that this node holds the vote at `index`, so peers
    /// can skip gossiping it back.
    HasVote {
        height: i64,
        round: i32,
        vote_type: VoteType,
        index: i32,
    },

    /// The bitmap of votes this node holds for a claimed majority,
    /// answering a peer's `PeerMaj23`.
    VoteSetBits {
        height: i64,
        round: i32,
        vote_type: VoteType,
        block_id: BlockId,
        votes: BitArray,
    },
}

impl OutboundMessage {
    /// Human-readable name for telemetry.
    pub fn type_name(&self) -> &'static str {
        match self {
            OutboundMessage::Proposal(_) => "Proposal",
            OutboundMessage::BlockPart { .. } => "BlockPart",
            OutboundMessage::Vote(_) => "Vote",
            OutboundMessage::HasVote { .. } => "HasVote",
            OutboundMessage::VoteSetBits { .. } => "VoteSetBits",
        }
    }
}
